// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    codec::encode_bytes,
    endpoint::Endpoint,
    message::{tag, Error, Fields, Tag},
    varint::VarU64,
    version::VersionRange,
};
use s2n_codec::{DecoderBuffer, Encoder, EncoderValue};

//# Setup Record {
//#   Type (8) = 0x01,
//#   Min Version (v),
//#   Max Version (v),
//#   Option (..) ...,
//# }
//#
//# Option {
//#   Option Tag (v),
//#   Option Length (v),
//#   Option Value (..),
//# }

/// Option tags understood by this implementation; unknown tags are
/// skipped on decode
pub mod option {
    pub const PEER_NACL_PUBLIC_KEY: u64 = 1;
    pub const PEER_REMOTE_ENDPOINT: u64 = 2;
    pub const PEER_LOCAL_ENDPOINT: u64 = 3;
    pub const MTU: u64 = 4;
    pub const SHARED_TOKENS: u64 = 5;
}

/// The first message each side sends: version range, ephemeral NaCl
/// public key, endpoints, and transport parameters
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Setup {
    pub versions: VersionRange,
    pub peer_nacl_public_key: Option<[u8; 32]>,
    pub peer_remote_endpoint: Option<Endpoint>,
    pub peer_local_endpoint: Option<Endpoint>,
    pub mtu: u64,
    pub shared_tokens: u64,
}

impl Setup {
    pub const fn tag(&self) -> Tag {
        tag::SETUP
    }

    pub(crate) fn decode(buffer: DecoderBuffer, size: u64) -> Result<Self, Error> {
        let mut msg = Self::default();
        if buffer.is_empty() {
            return Ok(msg);
        }

        let mut fields = Fields::new(tag::SETUP, size);
        let (min, buffer) = fields.track(buffer.decode::<VarU64>())?;
        let (max, buffer) = fields.track(buffer.decode::<VarU64>())?;
        msg.versions = VersionRange::new(min.as_u64(), max.as_u64());

        let mut field = 2u64;
        let mut buffer = buffer;
        while !buffer.is_empty() {
            let (opt_tag, rest) = buffer
                .decode::<VarU64>()
                .map_err(|_| Error::InvalidSetupOption { tag: 0, field })?;
            let opt_tag = opt_tag.as_u64();
            let (payload, rest) = rest
                .decode_slice_with_len_prefix::<VarU64>()
                .map_err(|_| Error::InvalidSetupOption { tag: opt_tag, field })?;
            let payload = payload.as_less_safe_slice();

            match opt_tag {
                option::PEER_NACL_PUBLIC_KEY => {
                    let key: [u8; 32] = payload
                        .try_into()
                        .map_err(|_| Error::InvalidSetupOption { tag: opt_tag, field })?;
                    msg.peer_nacl_public_key = Some(key);
                }
                option::PEER_REMOTE_ENDPOINT => {
                    msg.peer_remote_endpoint = Some(decode_endpoint(payload, opt_tag, field)?);
                }
                option::PEER_LOCAL_ENDPOINT => {
                    msg.peer_local_endpoint = Some(decode_endpoint(payload, opt_tag, field)?);
                }
                option::MTU => {
                    msg.mtu = decode_varint_option(payload, opt_tag, field)?;
                }
                option::SHARED_TOKENS => {
                    msg.shared_tokens = decode_varint_option(payload, opt_tag, field)?;
                }
                // forward compatibility: skip options we don't know
                _ => {}
            }

            buffer = rest;
            field += 1;
        }

        Ok(msg)
    }
}

fn decode_endpoint(payload: &[u8], tag: u64, field: u64) -> Result<Endpoint, Error> {
    core::str::from_utf8(payload)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(Error::InvalidSetupOption { tag, field })
}

fn decode_varint_option(payload: &[u8], tag: u64, field: u64) -> Result<u64, Error> {
    let buffer = DecoderBuffer::new(payload);
    let (value, remaining) = buffer
        .decode::<VarU64>()
        .map_err(|_| Error::InvalidSetupOption { tag, field })?;
    remaining
        .ensure_empty()
        .map_err(|_| Error::InvalidSetupOption { tag, field })?;
    Ok(value.as_u64())
}

fn encode_option<E: Encoder>(encoder: &mut E, tag: u64, payload: &[u8]) {
    encoder.encode(&VarU64::new(tag));
    encode_bytes(encoder, payload);
}

impl EncoderValue for Setup {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());
        encoder.encode(&VarU64::new(self.versions.min.0));
        encoder.encode(&VarU64::new(self.versions.max.0));

        if let Some(key) = &self.peer_nacl_public_key {
            encode_option(encoder, option::PEER_NACL_PUBLIC_KEY, key);
        }
        if let Some(ep) = &self.peer_remote_endpoint {
            encode_option(encoder, option::PEER_REMOTE_ENDPOINT, ep.to_string().as_bytes());
        }
        if let Some(ep) = &self.peer_local_endpoint {
            encode_option(encoder, option::PEER_LOCAL_ENDPOINT, ep.to_string().as_bytes());
        }
        if self.mtu != 0 {
            encode_option(encoder, option::MTU, &VarU64::new(self.mtu).encode_to_vec());
        }
        if self.shared_tokens != 0 {
            encode_option(
                encoder,
                option::SHARED_TOKENS,
                &VarU64::new(self.shared_tokens).encode_to_vec(),
            );
        }
    }
}
