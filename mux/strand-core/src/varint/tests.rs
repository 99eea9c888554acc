// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::*;
use s2n_codec::{DecoderBuffer, EncoderBuffer};

fn round_trip(value: u64) -> Vec<u8> {
    let value = VarU64::new(value);
    let mut bytes = vec![0u8; 9];
    let mut encoder = EncoderBuffer::new(&mut bytes);
    encoder.encode(&value);
    let len = encoder.len();
    bytes.truncate(len);
    assert_eq!(len, value.encoding_len());

    let buffer = DecoderBuffer::new(&bytes);
    let (decoded, remaining) = buffer.decode::<VarU64>().unwrap();
    assert!(remaining.is_empty());
    assert_eq!(decoded, value);

    bytes
}

#[test]
fn single_byte_form() {
    assert_eq!(round_trip(0), [0x00]);
    assert_eq!(round_trip(1), [0x01]);
    assert_eq!(round_trip(0x7f), [0x7f]);
}

#[test]
fn length_marker_form() {
    assert_eq!(round_trip(0x80), [0xff, 0x80]);
    assert_eq!(round_trip(0xff), [0xff, 0xff]);
    assert_eq!(round_trip(0x100), [0xfe, 0x01, 0x00]);
    assert_eq!(round_trip(1 << 20), [0xfd, 0x10, 0x00, 0x00]);
    assert_eq!(
        round_trip(u64::MAX),
        [0xf8, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]
    );
}

#[test]
fn non_minimal_form_is_accepted() {
    // a small value spelled with a length marker still decodes
    let bytes = [0xfe, 0x00, 0x05];
    let buffer = DecoderBuffer::new(&bytes);
    let (decoded, remaining) = buffer.decode::<VarU64>().unwrap();
    assert!(remaining.is_empty());
    assert_eq!(decoded.as_u64(), 5);
}

#[test]
fn truncated_input_is_rejected() {
    for bytes in [&[0xfe, 0x01][..], &[0xff][..], &[][..]] {
        let buffer = DecoderBuffer::new(bytes);
        assert!(buffer.decode::<VarU64>().is_err());
    }
}

#[test]
fn invalid_length_marker_is_rejected() {
    // 0xf0 would claim 16 payload bytes
    let bytes = [0xf0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
    let buffer = DecoderBuffer::new(&bytes);
    assert!(buffer.decode::<VarU64>().is_err());
}
