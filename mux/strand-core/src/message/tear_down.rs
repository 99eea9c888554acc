// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::message::{tag, Error, Tag};
use s2n_codec::{DecoderBuffer, Encoder, EncoderValue};

//# TearDown Record {
//#   Type (8) = 0x02,
//#   Reason (..),
//# }

/// Orderly close of the whole connection, with a human-readable reason
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TearDown {
    pub message: String,
}

impl TearDown {
    pub const fn tag(&self) -> Tag {
        tag::TEAR_DOWN
    }

    pub(crate) fn decode(buffer: DecoderBuffer) -> Result<Self, Error> {
        let message = String::from_utf8_lossy(buffer.into_less_safe_slice()).into_owned();
        Ok(Self { message })
    }
}

impl EncoderValue for TearDown {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());
        encoder.write_slice(self.message.as_bytes());
    }
}
