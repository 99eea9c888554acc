// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::message::{tag, Tag};
use s2n_codec::{Encoder, EncoderValue};

/// The sender intends to stop accepting new flows and drain
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct EnterLameDuck;

impl EnterLameDuck {
    pub const fn tag(&self) -> Tag {
        tag::ENTER_LAME_DUCK
    }
}

impl EncoderValue for EnterLameDuck {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());
    }
}

/// Acknowledges the peer's lame-duck announcement
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AckLameDuck;

impl AckLameDuck {
    pub const fn tag(&self) -> Tag {
        tag::ACK_LAME_DUCK
    }
}

impl EncoderValue for AckLameDuck {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());
    }
}
