// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Security data types and the `Principal` capability seam.
//!
//! Concrete key handling lives in `strand-crypto`; this module only knows
//! the shapes that travel on the wire.

use crate::{
    codec::{bytes_encoding_size, decode_bytes, decode_string, encode_bytes, encode_str},
    varint::VarU64,
};
use core::fmt;
use s2n_codec::{DecoderBuffer, DecoderBufferResult, DecoderError, Encoder, EncoderValue};

/// The signature algorithm family, selected by the Auth wire tag
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum KeyFamily {
    Ecdsa,
    Ed25519,
    Rsa,
}

/// A concrete signing key algorithm
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum KeyAlgo {
    EcdsaP256,
    EcdsaP384,
    EcdsaP521,
    Ed25519,
    Rsa2048,
    Rsa4096,
}

impl KeyAlgo {
    #[inline]
    pub const fn family(self) -> KeyFamily {
        match self {
            Self::EcdsaP256 | Self::EcdsaP384 | Self::EcdsaP521 => KeyFamily::Ecdsa,
            Self::Ed25519 => KeyFamily::Ed25519,
            Self::Rsa2048 | Self::Rsa4096 => KeyFamily::Rsa,
        }
    }

    pub(crate) const fn wire_byte(self) -> u8 {
        match self {
            Self::EcdsaP256 => 1,
            Self::EcdsaP384 => 2,
            Self::EcdsaP521 => 3,
            Self::Ed25519 => 4,
            Self::Rsa2048 => 5,
            Self::Rsa4096 => 6,
        }
    }

    pub(crate) const fn from_wire_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::EcdsaP256),
            2 => Some(Self::EcdsaP384),
            3 => Some(Self::EcdsaP521),
            4 => Some(Self::Ed25519),
            5 => Some(Self::Rsa2048),
            6 => Some(Self::Rsa4096),
            _ => None,
        }
    }
}

/// A public key: the algorithm plus its canonical key bytes
///
/// ECDSA keys are SEC1 compressed points, Ed25519 keys are the raw 32
/// bytes, RSA keys are PKCS#1 DER.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PublicKey {
    pub algo: KeyAlgo,
    pub bytes: Vec<u8>,
}

impl PublicKey {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Default for PublicKey {
    fn default() -> Self {
        Self {
            algo: KeyAlgo::Ed25519,
            bytes: Vec::new(),
        }
    }
}

impl EncoderValue for PublicKey {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.algo.wire_byte());
        encode_bytes(encoder, &self.bytes);
    }
}

impl<'a> s2n_codec::DecoderValue<'a> for PublicKey {
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (byte, buffer) = buffer.decode::<u8>()?;
        let algo = KeyAlgo::from_wire_byte(byte)
            .ok_or(DecoderError::InvariantViolation("unknown key algorithm"))?;
        let (bytes, buffer) = decode_bytes(buffer)?;
        Ok((Self { algo, bytes }, buffer))
    }
}

/// A digital signature over a purpose-tagged message
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Signature {
    /// Disambiguates what the signature was produced for
    pub purpose: Vec<u8>,
    /// ASCII name of the digest function, e.g. `SHA256`
    pub hash: String,
    /// Raw signature bytes; `r || s` for ECDSA
    pub bytes: Vec<u8>,
}

impl Signature {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl EncoderValue for Signature {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encode_bytes(encoder, &self.purpose);
        encode_str(encoder, &self.hash);
        encode_bytes(encoder, &self.bytes);
    }

    fn encoding_size(&self) -> usize {
        bytes_encoding_size(self.purpose.len())
            + bytes_encoding_size(self.hash.len())
            + bytes_encoding_size(self.bytes.len())
    }
}

impl<'a> s2n_codec::DecoderValue<'a> for Signature {
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (purpose, buffer) = decode_bytes(buffer)?;
        let (hash, buffer) = decode_string(buffer)?;
        let (bytes, buffer) = decode_bytes(buffer)?;
        Ok((
            Self {
                purpose,
                hash,
                bytes,
            },
            buffer,
        ))
    }
}

/// A bundle of delegated name claims bound to a public key
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct Blessings {
    pub public_key: PublicKey,
    pub names: Vec<String>,
}

impl Blessings {
    /// Blessings carrying only a public key, revealing no names
    pub fn nameless(public_key: PublicKey) -> Self {
        Self {
            public_key,
            names: Vec::new(),
        }
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.public_key.is_empty() && self.names.is_empty()
    }
}

impl fmt::Display for Blessings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.names.join(","))
    }
}

impl EncoderValue for Blessings {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.public_key);
        encoder.encode(&VarU64::new(self.names.len() as u64));
        for name in &self.names {
            encode_str(encoder, name);
        }
    }
}

impl<'a> s2n_codec::DecoderValue<'a> for Blessings {
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (public_key, buffer) = buffer.decode::<PublicKey>()?;
        let (count, mut buffer) = buffer.decode::<VarU64>()?;
        let mut names = Vec::with_capacity(count.as_u64().min(64) as usize);
        for _ in 0..count.as_u64() {
            let (name, rest) = decode_string(buffer)?;
            names.push(name);
            buffer = rest;
        }
        Ok((Self { public_key, names }, buffer))
    }
}

/// Evidence satisfying a third-party caveat in a blessing
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct Discharge {
    pub id: String,
    pub data: Vec<u8>,
}

impl EncoderValue for Discharge {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encode_str(encoder, &self.id);
        encode_bytes(encoder, &self.data);
    }
}

impl<'a> s2n_codec::DecoderValue<'a> for Discharge {
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (id, buffer) = decode_string(buffer)?;
        let (data, buffer) = decode_bytes(buffer)?;
        Ok((Self { id, data }, buffer))
    }
}

/// Signing failed inside the principal's key store
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SignError(pub &'static str);

impl fmt::Display for SignError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "signing failed: {}", self.0)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SignError {}

/// The identity capability a connection acts as
pub trait Principal: Send + Sync {
    fn public_key(&self) -> &PublicKey;

    fn sign(&self, message: &[u8]) -> Result<Signature, SignError>;

    /// The blessings presented to peers by default
    fn default_blessings(&self) -> Blessings;

    /// Blessings naming only ourselves, rooted at our own key
    fn bless_self(&self, name: &str) -> Blessings {
        Blessings {
            public_key: self.public_key().clone(),
            names: vec![name.to_string()],
        }
    }
}
