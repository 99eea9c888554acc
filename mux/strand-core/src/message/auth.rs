// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    message::{tag, Error, Fields, Tag},
    security::{KeyFamily, Signature},
    varint::VarU64,
};
use s2n_codec::{DecoderBuffer, Encoder, EncoderValue};

//# Auth Record {
//#   Type (8) = 0x05 | 0x0f | 0x10,
//#   Blessings Key (v),
//#   Discharge Key (v),
//#   Channel Binding Signature (..),
//# }
//#
//# The type byte selects the signature algorithm family used to verify
//# the channel binding: ECDSA, ED25519 or RSA.

/// Authenticates the sender: references to its blessings and discharges
/// on the blessings flow, plus a signature over the channel binding
#[derive(Clone, Debug, PartialEq)]
pub struct Auth {
    pub family: KeyFamily,
    pub blessings_key: u64,
    pub discharge_key: u64,
    pub channel_binding: Signature,
}

impl Auth {
    pub const fn tag(&self) -> Tag {
        match self.family {
            KeyFamily::Ecdsa => tag::AUTH_ECDSA,
            KeyFamily::Ed25519 => tag::AUTH_ED25519,
            KeyFamily::Rsa => tag::AUTH_RSA,
        }
    }

    pub(crate) fn decode(
        family: KeyFamily,
        buffer: DecoderBuffer,
        size: u64,
    ) -> Result<Self, Error> {
        let typ = match family {
            KeyFamily::Ecdsa => tag::AUTH_ECDSA,
            KeyFamily::Ed25519 => tag::AUTH_ED25519,
            KeyFamily::Rsa => tag::AUTH_RSA,
        };
        let mut fields = Fields::new(typ, size);
        let (blessings_key, buffer) = fields.track(buffer.decode::<VarU64>())?;
        ensure!(
            blessings_key.as_u64() != 0,
            Err(Error::MissingBlessings { typ })
        );
        let (discharge_key, buffer) = fields.track(buffer.decode::<VarU64>())?;
        let (channel_binding, _) = fields.track(buffer.decode::<Signature>())?;

        Ok(Self {
            family,
            blessings_key: blessings_key.as_u64(),
            discharge_key: discharge_key.as_u64(),
            channel_binding,
        })
    }
}

impl EncoderValue for Auth {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());
        encoder.encode(&VarU64::new(self.blessings_key));
        encoder.encode(&VarU64::new(self.discharge_key));
        encoder.encode(&self.channel_binding);
    }
}
