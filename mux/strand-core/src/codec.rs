// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Helpers shared by the wire-type codec impls.

use crate::varint::VarU64;
use s2n_codec::{DecoderBuffer, DecoderBufferResult, DecoderError, Encoder};

/// Writes `bytes` with a varint length prefix
#[inline]
pub(crate) fn encode_bytes<E: Encoder>(encoder: &mut E, bytes: &[u8]) {
    encoder.encode(&VarU64::new(bytes.len() as u64));
    encoder.write_slice(bytes);
}

/// Writes `value` with a varint length prefix
#[inline]
pub(crate) fn encode_str<E: Encoder>(encoder: &mut E, value: &str) {
    encode_bytes(encoder, value.as_bytes());
}

/// Reads a varint-length-prefixed byte string
#[inline]
pub(crate) fn decode_bytes<'a>(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Vec<u8>> {
    let (slice, buffer) = buffer.decode_slice_with_len_prefix::<VarU64>()?;
    Ok((slice.as_less_safe_slice().to_vec(), buffer))
}

/// Reads a varint-length-prefixed UTF-8 string
#[inline]
pub(crate) fn decode_string<'a>(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, String> {
    let (slice, buffer) = buffer.decode_slice_with_len_prefix::<VarU64>()?;
    let value = core::str::from_utf8(slice.as_less_safe_slice())
        .map_err(|_| DecoderError::InvariantViolation("invalid utf-8 string"))?
        .to_string();
    Ok((value, buffer))
}

/// The size of a varint-length-prefixed byte string
#[inline]
pub(crate) fn bytes_encoding_size(len: usize) -> usize {
    VarU64::new(len as u64).encoding_len() + len
}
