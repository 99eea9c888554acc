// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    message::{flags, tag, Error, Fields, Tag},
    varint::VarU64,
};
use s2n_codec::{DecoderBuffer, Encoder, EncoderValue};

//# Data Record {
//#   Type (8) = 0x08,
//#   Flow ID (v),
//#   Flags (v),
//#   Payload (..),
//# }

/// A payload (or CLOSE signal) for an established flow
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Data {
    pub id: u64,
    pub flags: u64,
    pub payload: Vec<u8>,
}

impl Data {
    pub const fn tag(&self) -> Tag {
        tag::DATA
    }

    #[inline]
    pub fn closes_flow(&self) -> bool {
        self.flags & flags::CLOSE != 0
    }

    pub(crate) fn decode(buffer: DecoderBuffer, size: u64) -> Result<Self, Error> {
        // a bare type byte is the zero message
        if buffer.is_empty() {
            return Ok(Self::default());
        }
        let mut fields = Fields::new(tag::DATA, size);
        let (id, buffer) = fields.track(buffer.decode::<VarU64>())?;
        let (msg_flags, buffer) = fields.track(buffer.decode::<VarU64>())?;
        let payload = buffer.into_less_safe_slice().to_vec();

        Ok(Self {
            id: id.as_u64(),
            flags: msg_flags.as_u64(),
            payload,
        })
    }
}

impl EncoderValue for Data {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());
        encoder.encode(&VarU64::new(self.id));
        encoder.encode(&VarU64::new(self.flags));
        // a payload with encryption disabled travels in the next frame
        if self.flags & flags::DISABLE_ENCRYPTION == 0 {
            encoder.write_slice(&self.payload);
        }
    }
}
