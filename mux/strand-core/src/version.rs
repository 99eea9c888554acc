// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::fmt;

/// A negotiated protocol version
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Version(pub u64);

impl Version {
    pub const V13: Self = Self(13);
    pub const V14: Self = Self(14);
    pub const V15: Self = Self(15);

    /// Starting with version 14 the channel binding covers both Setup
    /// messages so a tampered negotiation fails authentication.
    #[inline]
    pub const fn covers_setup_in_binding(self) -> bool {
        self.0 >= Self::V14.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An inclusive range of protocol versions an endpoint is willing to speak
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct VersionRange {
    pub min: Version,
    pub max: Version,
}

/// The version ranges of the two peers do not intersect
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NoCommonVersion {
    pub local: VersionRange,
    pub remote: VersionRange,
}

impl fmt::Display for NoCommonVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "no compatible versions: local [{}, {}], remote [{}, {}]",
            self.local.min, self.local.max, self.remote.min, self.remote.max
        )
    }
}

#[cfg(feature = "std")]
impl std::error::Error for NoCommonVersion {}

impl VersionRange {
    /// Versions this implementation can speak
    pub const SUPPORTED: Self = Self {
        min: Version::V13,
        max: Version::V15,
    };

    #[inline]
    pub const fn new(min: u64, max: u64) -> Self {
        Self {
            min: Version(min),
            max: Version(max),
        }
    }

    /// Returns the newest version both ranges contain
    pub fn common_version(self, remote: Self) -> Result<Version, NoCommonVersion> {
        let min = self.min.max(remote.min);
        let max = self.max.min(remote.max);
        if min > max {
            return Err(NoCommonVersion {
                local: self,
                remote,
            });
        }
        Ok(max)
    }

    #[inline]
    pub fn contains(self, version: Version) -> bool {
        self.min <= version && version <= self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_version_picks_newest_shared() {
        for (a, b, want) in [
            ((1, 5), (1, 5), 5),
            ((1, 5), (3, 7), 5),
            ((3, 7), (1, 5), 5),
            ((2, 2), (1, 4), 2),
            ((13, 15), (14, 20), 15),
        ] {
            let a = VersionRange::new(a.0, a.1);
            let b = VersionRange::new(b.0, b.1);
            assert_eq!(a.common_version(b).unwrap(), Version(want));
        }
    }

    #[test]
    fn disjoint_ranges_fail() {
        let a = VersionRange::new(1, 3);
        let b = VersionRange::new(4, 8);
        assert!(a.common_version(b).is_err());
        assert!(b.common_version(a).is_err());
    }

    #[test]
    fn binding_coverage_starts_at_14() {
        assert!(!Version::V13.covers_setup_in_binding());
        assert!(Version::V14.covers_setup_in_binding());
        assert!(Version::V15.covers_setup_in_binding());
    }
}
