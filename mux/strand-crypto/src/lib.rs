// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Key agreement, record encryption and signature handling for strand
//! connections.
//!
//! Records are protected NaCl-style: an X25519 agreement produces the
//! box precomputed key (HSalsa20 of the raw shared secret), records are
//! sealed with XSalsa20Poly1305, and nonces are plain little-endian
//! counters. Each direction seals under its own subkey so the counters
//! of the two directions can never collide.

#![forbid(unsafe_code)]

pub mod cipher;
pub mod signer;

pub use cipher::{BoxKeyPair, Cipher, Error as CipherError, Opener, Role, Sealer};
pub use signer::{verify, EcdsaP256Principal, Ed25519Principal, VerifyError};
