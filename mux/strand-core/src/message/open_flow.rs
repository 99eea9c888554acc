// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    message::{flags, tag, Error, Fields, Tag},
    varint::VarU64,
};
use s2n_codec::{DecoderBuffer, Encoder, EncoderValue};

//# OpenFlow Record {
//#   Type (8) = 0x06,
//#   Flow ID (v),
//#   Initial Counters (v),
//#   Blessings Key (v),
//#   Discharge Key (v),
//#   Flags (v),
//#   Payload (..),
//# }

/// Creates a flow and atomically carries its first payload
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OpenFlow {
    pub id: u64,
    pub initial_counters: u64,
    pub blessings_key: u64,
    pub discharge_key: u64,
    pub flags: u64,
    pub payload: Vec<u8>,
}

impl OpenFlow {
    pub const fn tag(&self) -> Tag {
        tag::OPEN_FLOW
    }

    pub(crate) fn decode(buffer: DecoderBuffer, size: u64) -> Result<Self, Error> {
        let mut fields = Fields::new(tag::OPEN_FLOW, size);
        let (id, buffer) = fields.track(buffer.decode::<VarU64>())?;
        let (initial_counters, buffer) = fields.track(buffer.decode::<VarU64>())?;
        let (blessings_key, buffer) = fields.track(buffer.decode::<VarU64>())?;
        ensure!(
            blessings_key.as_u64() != 0,
            Err(Error::MissingBlessings {
                typ: tag::OPEN_FLOW
            })
        );
        let (discharge_key, buffer) = fields.track(buffer.decode::<VarU64>())?;
        let (msg_flags, buffer) = fields.track(buffer.decode::<VarU64>())?;
        let payload = buffer.into_less_safe_slice().to_vec();

        Ok(Self {
            id: id.as_u64(),
            initial_counters: initial_counters.as_u64(),
            blessings_key: blessings_key.as_u64(),
            discharge_key: discharge_key.as_u64(),
            flags: msg_flags.as_u64(),
            payload,
        })
    }
}

impl EncoderValue for OpenFlow {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());
        encoder.encode(&VarU64::new(self.id));
        encoder.encode(&VarU64::new(self.initial_counters));
        encoder.encode(&VarU64::new(self.blessings_key));
        encoder.encode(&VarU64::new(self.discharge_key));
        encoder.encode(&VarU64::new(self.flags));
        // a payload with encryption disabled travels in the next frame
        if self.flags & flags::DISABLE_ENCRYPTION == 0 {
            encoder.write_slice(&self.payload);
        }
    }
}
