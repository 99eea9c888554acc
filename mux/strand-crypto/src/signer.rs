// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Signature verification across the supported key families, plus
//! concrete principals for endpoints and tests.

use rand_core::OsRng;
use rsa::pkcs1::DecodeRsaPublicKey;
use signature::{Signer, Verifier};
use strand_core::security::{Blessings, KeyAlgo, Principal, PublicKey, SignError, Signature};

#[derive(Clone, Copy, Debug, thiserror::Error, Eq, PartialEq)]
pub enum VerifyError {
    #[error("the signature does not verify under the presented key")]
    BadSignature,
    #[error("the public key bytes are malformed")]
    MalformedKey,
    #[error("the key algorithm is not supported by this build")]
    UnsupportedKeyAlgo,
}

/// Verifies `signature` over `message` under `public_key`
///
/// The caller is responsible for prefixing `message` with the purpose
/// tag the signer used.
pub fn verify(
    public_key: &PublicKey,
    message: &[u8],
    signature: &Signature,
) -> Result<(), VerifyError> {
    match public_key.algo {
        KeyAlgo::Ed25519 => {
            let bytes: &[u8; 32] = public_key
                .bytes
                .as_slice()
                .try_into()
                .map_err(|_| VerifyError::MalformedKey)?;
            let key =
                ed25519_dalek::VerifyingKey::from_bytes(bytes).map_err(|_| VerifyError::MalformedKey)?;
            let sig = ed25519_dalek::Signature::from_slice(&signature.bytes)
                .map_err(|_| VerifyError::BadSignature)?;
            key.verify(message, &sig)
                .map_err(|_| VerifyError::BadSignature)
        }
        KeyAlgo::EcdsaP256 => {
            let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(&public_key.bytes)
                .map_err(|_| VerifyError::MalformedKey)?;
            let sig = p256::ecdsa::Signature::from_slice(&signature.bytes)
                .map_err(|_| VerifyError::BadSignature)?;
            key.verify(message, &sig)
                .map_err(|_| VerifyError::BadSignature)
        }
        KeyAlgo::EcdsaP384 => {
            let key = p384::ecdsa::VerifyingKey::from_sec1_bytes(&public_key.bytes)
                .map_err(|_| VerifyError::MalformedKey)?;
            let sig = p384::ecdsa::Signature::from_slice(&signature.bytes)
                .map_err(|_| VerifyError::BadSignature)?;
            key.verify(message, &sig)
                .map_err(|_| VerifyError::BadSignature)
        }
        // no stable P-521 ECDSA support; the wire tag is understood but
        // such peers cannot be verified
        KeyAlgo::EcdsaP521 => Err(VerifyError::UnsupportedKeyAlgo),
        KeyAlgo::Rsa2048 | KeyAlgo::Rsa4096 => {
            let key = rsa::RsaPublicKey::from_pkcs1_der(&public_key.bytes)
                .map_err(|_| VerifyError::MalformedKey)?;
            let key = rsa::pkcs1v15::VerifyingKey::<rsa::sha2::Sha512>::new(key);
            let sig = rsa::pkcs1v15::Signature::try_from(signature.bytes.as_slice())
                .map_err(|_| VerifyError::BadSignature)?;
            key.verify(message, &sig)
                .map_err(|_| VerifyError::BadSignature)
        }
    }
}

/// An Ed25519 principal with a fresh key, blessed under `name`
pub struct Ed25519Principal {
    signing_key: ed25519_dalek::SigningKey,
    public_key: PublicKey,
    blessings: Blessings,
}

impl Ed25519Principal {
    pub fn generate(name: &str) -> Self {
        let signing_key = ed25519_dalek::SigningKey::generate(&mut OsRng);
        let public_key = PublicKey {
            algo: KeyAlgo::Ed25519,
            bytes: signing_key.verifying_key().to_bytes().to_vec(),
        };
        let blessings = Blessings {
            public_key: public_key.clone(),
            names: vec![name.to_string()],
        };
        Self {
            signing_key,
            public_key,
            blessings,
        }
    }
}

impl Principal for Ed25519Principal {
    fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    fn sign(&self, message: &[u8]) -> Result<Signature, SignError> {
        let sig = self.signing_key.sign(message);
        Ok(Signature {
            purpose: Vec::new(),
            hash: "SHA512".into(),
            bytes: sig.to_bytes().to_vec(),
        })
    }

    fn default_blessings(&self) -> Blessings {
        self.blessings.clone()
    }
}

/// An ECDSA P-256 principal with a fresh key, blessed under `name`
pub struct EcdsaP256Principal {
    signing_key: p256::ecdsa::SigningKey,
    public_key: PublicKey,
    blessings: Blessings,
}

impl EcdsaP256Principal {
    pub fn generate(name: &str) -> Self {
        let signing_key = p256::ecdsa::SigningKey::random(&mut OsRng);
        let public_key = PublicKey {
            algo: KeyAlgo::EcdsaP256,
            bytes: signing_key
                .verifying_key()
                .to_encoded_point(true)
                .as_bytes()
                .to_vec(),
        };
        let blessings = Blessings {
            public_key: public_key.clone(),
            names: vec![name.to_string()],
        };
        Self {
            signing_key,
            public_key,
            blessings,
        }
    }
}

impl Principal for EcdsaP256Principal {
    fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    fn sign(&self, message: &[u8]) -> Result<Signature, SignError> {
        let sig: p256::ecdsa::Signature = self.signing_key.sign(message);
        Ok(Signature {
            purpose: Vec::new(),
            hash: "SHA256".into(),
            bytes: sig.to_bytes().to_vec(),
        })
    }

    fn default_blessings(&self) -> Blessings {
        self.blessings.clone()
    }
}
