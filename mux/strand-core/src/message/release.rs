// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    message::{tag, Error, Fields, Tag},
    varint::VarU64,
};
use s2n_codec::{DecoderBuffer, Encoder, EncoderValue};

//# Release Record {
//#   Type (8) = 0x07,
//#   Counter { Flow ID (v), Tokens (v) } ...,
//# }

/// A per-flow credit grant
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Counter {
    pub flow_id: u64,
    pub tokens: u64,
}

/// Grants receive credit for one or more flows
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Release {
    pub counters: Vec<Counter>,
}

impl Release {
    pub const fn tag(&self) -> Tag {
        tag::RELEASE
    }

    pub(crate) fn decode(buffer: DecoderBuffer, size: u64) -> Result<Self, Error> {
        let mut fields = Fields::new(tag::RELEASE, size);
        let mut counters = Vec::new();
        let mut buffer = buffer;
        while !buffer.is_empty() {
            let (flow_id, rest) = fields.track(buffer.decode::<VarU64>())?;
            let (tokens, rest) = fields.track(rest.decode::<VarU64>())?;
            counters.push(Counter {
                flow_id: flow_id.as_u64(),
                tokens: tokens.as_u64(),
            });
            buffer = rest;
        }
        Ok(Self { counters })
    }
}

impl EncoderValue for Release {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());
        for counter in &self.counters {
            encoder.encode(&VarU64::new(counter.flow_id));
            encoder.encode(&VarU64::new(counter.tokens));
        }
    }
}
