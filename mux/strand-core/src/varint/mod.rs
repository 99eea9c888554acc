// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::{fmt, ops::Deref};
use s2n_codec::{decoder_invariant, decoder_value, Encoder, EncoderValue};

#[cfg(test)]
mod tests;

//# Unsigned integers are encoded in a variable-length form. Values up to
//# 0x7f occupy a single byte. Larger values are written as a length
//# marker byte `0xff - (n - 1)` followed by the n big-endian bytes of
//# the value, where n is the minimal byte count (1..=8).

/// An unsigned 64-bit integer in the wire's variable-length encoding
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct VarU64(u64);

impl VarU64 {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the number of bytes the value occupies on the wire
    #[inline]
    pub const fn encoding_len(self) -> usize {
        if self.0 <= 0x7f {
            1
        } else {
            1 + Self::payload_len(self.0)
        }
    }

    #[inline]
    const fn payload_len(value: u64) -> usize {
        // minimal big-endian byte count; value is known to be >= 0x80 here
        8 - (value.leading_zeros() / 8) as usize
    }
}

impl fmt::Display for VarU64 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Deref for VarU64 {
    type Target = u64;

    #[inline]
    fn deref(&self) -> &u64 {
        &self.0
    }
}

impl From<u64> for VarU64 {
    #[inline]
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<u32> for VarU64 {
    #[inline]
    fn from(value: u32) -> Self {
        Self(value as u64)
    }
}

impl From<VarU64> for u64 {
    #[inline]
    fn from(value: VarU64) -> Self {
        value.0
    }
}

impl TryFrom<usize> for VarU64 {
    type Error = core::convert::Infallible;

    #[inline]
    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Ok(Self(value as u64))
    }
}

impl TryFrom<VarU64> for usize {
    type Error = core::num::TryFromIntError;

    #[inline]
    fn try_from(value: VarU64) -> Result<Self, Self::Error> {
        usize::try_from(value.0)
    }
}

decoder_value!(
    impl<'a> VarU64 {
        fn decode(buffer: Buffer) -> Result<Self> {
            let (first, buffer) = buffer.decode::<u8>()?;
            if first <= 0x7f {
                return Ok((VarU64(first as u64), buffer));
            }
            let len = (0xff - first + 1) as usize;
            decoder_invariant!(len <= 8, "invalid varint length marker");
            let (bytes, buffer) = buffer.decode_slice(len)?;
            let bytes = bytes.as_less_safe_slice();
            let mut value = 0u64;
            for byte in bytes {
                value = value << 8 | *byte as u64;
            }
            Ok((VarU64(value), buffer))
        }
    }
);

impl EncoderValue for VarU64 {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        let value = self.0;
        if value <= 0x7f {
            encoder.write_sized(1, |buf| buf[0] = value as u8);
            return;
        }
        let len = Self::payload_len(value);
        encoder.write_sized(len + 1, |buf| {
            buf[0] = 0xff - (len as u8 - 1);
            let mut value = value;
            for slot in buf[1..=len].iter_mut().rev() {
                *slot = value as u8;
                value >>= 8;
            }
        });
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        self.encoding_len()
    }

    #[inline]
    fn encoding_size_for_encoder<E: Encoder>(&self, _encoder: &E) -> usize {
        self.encoding_len()
    }
}
