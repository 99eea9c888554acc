// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Endpoint naming.
//!
//! The wire form is version 6 of the endpoint grammar:
//!
//! ```text
//! @6@<protocol>@<address>@<route>,...@<routing-id-hex>@<m|s>@<blessing>,...@@
//! ```
//!
//! The routing id names the intended remote after any proxy hops; all
//! zeros means "unspecified".

use core::{fmt, str::FromStr};

const FORMAT_VERSION: &str = "6";

/// A 16-byte opaque identifier naming an endpoint across proxy hops
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct RoutingId(pub [u8; 16]);

impl RoutingId {
    pub const NULL: Self = Self([0; 16]);

    #[inline]
    pub fn is_null(&self) -> bool {
        self.0 == [0; 16]
    }
}

impl fmt::Display for RoutingId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for RoutingId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ensure!(s.len() == 32, Err(ParseError::RoutingId));
        let mut bytes = [0u8; 16];
        for (i, slot) in bytes.iter_mut().enumerate() {
            *slot = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| ParseError::RoutingId)?;
        }
        Ok(Self(bytes))
    }
}

/// A network endpoint in its version 6 string grammar
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Endpoint {
    pub protocol: String,
    pub address: String,
    pub routes: Vec<String>,
    pub routing_id: RoutingId,
    pub serves_mount_table: bool,
    pub blessing_names: Vec<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParseError {
    /// the string does not follow the `@6@...@@` grammar
    Grammar,
    /// an unsupported format version
    Version,
    /// a malformed routing id field
    RoutingId,
    /// a malformed mount-table marker
    MountFlag,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            Self::Grammar => "malformed endpoint string",
            Self::Version => "unsupported endpoint format version",
            Self::RoutingId => "malformed routing id",
            Self::MountFlag => "malformed mount-table marker",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ParseError {}

impl Endpoint {
    /// True when no field carries information
    pub fn is_zero(&self) -> bool {
        self.protocol.is_empty()
            && self.address.is_empty()
            && self.routes.is_empty()
            && self.routing_id.is_null()
            && !self.serves_mount_table
            && self.blessing_names.is_empty()
    }

    /// True when `self` names the given routing id, or names no routing
    /// id at all
    #[inline]
    pub fn matches_routing_id(&self, rid: RoutingId) -> bool {
        self.routing_id.is_null() || self.routing_id == rid
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "@{FORMAT_VERSION}@{}@{}@{}@{}@{}@{}@@",
            self.protocol,
            self.address,
            self.routes.join(","),
            self.routing_id,
            if self.serves_mount_table { "m" } else { "s" },
            self.blessing_names.join(","),
        )
    }
}

impl FromStr for Endpoint {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s.strip_prefix('@').ok_or(ParseError::Grammar)?;
        // the canonical form carries a trailing `@@`; tolerate its absence
        let inner = inner.strip_suffix("@@").unwrap_or(inner);
        let fields: Vec<&str> = inner.splitn(7, '@').collect();
        ensure!(fields.len() == 7, Err(ParseError::Grammar));

        ensure!(fields[0] == FORMAT_VERSION, Err(ParseError::Version));

        let protocol = fields[1].to_string();
        let address = fields[2].to_string();
        let routes = split_list(fields[3]);
        let routing_id = fields[4].parse()?;
        let serves_mount_table = match fields[5] {
            "m" => true,
            "s" => false,
            _ => return Err(ParseError::MountFlag),
        };
        let blessing_names = split_list(fields[6]);

        Ok(Self {
            protocol,
            address,
            routes,
            routing_id,
            serves_mount_table,
            blessing_names,
        })
    }
}

fn split_list(field: &str) -> Vec<String> {
    if field.is_empty() {
        return Vec::new();
    }
    field.split(',').map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str =
        "@6@tcp@foo.com:1234@a,b@00112233445566778899aabbccddeeff@m@v.io/foo@@";

    #[test]
    fn round_trips_exactly() {
        let cases = [
            SAMPLE,
            "@6@tcp@bar.com:1234@a,b@00112233445566778899aabbccddeeff@m@v.io/bar@@",
            "@6@tcp@127.0.0.1:8101@@00000000000000000000000000000000@s@@@",
            "@6@wsh@host:80@r1@ffeeddccbbaa99887766554433221100@s@alpha,beta@@",
        ];
        for case in cases {
            let ep: Endpoint = case.parse().unwrap();
            assert_eq!(ep.to_string(), case, "{case}");
        }
    }

    #[test]
    fn parses_fields() {
        let ep: Endpoint = SAMPLE.parse().unwrap();
        assert_eq!(ep.protocol, "tcp");
        assert_eq!(ep.address, "foo.com:1234");
        assert_eq!(ep.routes, ["a", "b"]);
        assert_eq!(
            ep.routing_id.to_string(),
            "00112233445566778899aabbccddeeff"
        );
        assert!(ep.serves_mount_table);
        assert_eq!(ep.blessing_names, ["v.io/foo"]);
    }

    #[test]
    fn tolerates_missing_terminator() {
        let bare = "@6@tcp@foo.com:1234@a,b@00112233445566778899aabbccddeeff@m@v.io/foo";
        let ep: Endpoint = bare.parse().unwrap();
        assert_eq!(ep.to_string(), SAMPLE);
    }

    #[test]
    fn rejects_malformed() {
        for case in [
            "",
            "6@tcp@x@@00000000000000000000000000000000@s@@@",
            "@7@tcp@x@@00000000000000000000000000000000@s@@@",
            "@6@tcp@x@@0011@s@@@",
            "@6@tcp@x@@00000000000000000000000000000000@q@@@",
        ] {
            assert!(case.parse::<Endpoint>().is_err(), "{case}");
        }
    }

    #[test]
    fn null_routing_id_matches_any() {
        let mut ep = Endpoint::default();
        let rid = RoutingId([7; 16]);
        assert!(ep.matches_routing_id(rid));
        ep.routing_id = rid;
        assert!(ep.matches_routing_id(rid));
        ep.routing_id = RoutingId([8; 16]);
        assert!(!ep.matches_routing_id(rid));
    }

    #[test]
    fn zero_endpoint() {
        assert!(Endpoint::default().is_zero());
        let ep: Endpoint = SAMPLE.parse().unwrap();
        assert!(!ep.is_zero());
    }
}
