// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crypto_secretbox::{
    aead::{Aead, KeyInit},
    Key, Nonce, XSalsa20Poly1305,
};
use hkdf::Hkdf;
use rand_core::OsRng;
use salsa20::cipher::consts::U10;
use sha2::Sha256;
use x25519_dalek::{PublicKey, ReusableSecret};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;
/// Poly1305 authenticator prepended to every sealed record
pub const TAG_LEN: usize = 16;

const DIALER_SEAL_INFO: &[u8] = b"strand dialer seal";
const ACCEPTOR_SEAL_INFO: &[u8] = b"strand acceptor seal";

#[derive(Clone, Copy, Debug, thiserror::Error, Eq, PartialEq)]
pub enum Error {
    #[error("record failed authenticated decryption")]
    AuthFailure,
    #[error("the nonce counter for this direction is exhausted")]
    NonceExhausted,
    #[error("record sealing failed")]
    SealFailure,
}

/// Which end of the connection this cipher belongs to
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    Dialer,
    Acceptor,
}

/// An ephemeral NaCl box key pair, fresh for every connection
pub struct BoxKeyPair {
    public: [u8; KEY_LEN],
    secret: ReusableSecret,
}

impl BoxKeyPair {
    pub fn generate() -> Self {
        let secret = ReusableSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret).to_bytes();
        Self { public, secret }
    }

    #[inline]
    pub fn public_key(&self) -> [u8; KEY_LEN] {
        self.public
    }
}

/// Derives the box precomputed key: HSalsa20(x25519(sk, pk), 0)
fn precompute(secret: &ReusableSecret, peer_public: &[u8; KEY_LEN]) -> [u8; KEY_LEN] {
    let shared = secret.diffie_hellman(&PublicKey::from(*peer_public));
    let zero = [0u8; 16];
    salsa20::hsalsa::<U10>(shared.as_bytes().into(), (&zero).into()).into()
}

fn direction_key(precomputed: &[u8; KEY_LEN], info: &[u8]) -> Key {
    let hk = Hkdf::<Sha256>::new(None, precomputed);
    let mut okm = [0u8; KEY_LEN];
    // expand only fails for oversized outputs
    hk.expand(info, &mut okm)
        .expect("32 bytes is a valid hkdf output length");
    Key::from(okm)
}

fn counter_nonce(counter: u64) -> Nonce {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..8].copy_from_slice(&counter.to_le_bytes());
    Nonce::from(nonce)
}

/// Seals outbound records for one direction
pub struct Sealer {
    cipher: XSalsa20Poly1305,
    counter: u64,
}

impl Sealer {
    /// Seals a record under the next counter nonce
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let nonce = counter_nonce(self.counter);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| Error::SealFailure)?;
        // nonces never repeat: the connection dies before the counter wraps
        self.counter = self.counter.checked_add(1).ok_or(Error::NonceExhausted)?;
        Ok(sealed)
    }
}

/// Opens inbound records for one direction
pub struct Opener {
    cipher: XSalsa20Poly1305,
    counter: u64,
}

impl Opener {
    /// Opens a record sealed under the peer's next counter nonce
    pub fn open(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        let nonce = counter_nonce(self.counter);
        let opened = self
            .cipher
            .decrypt(&nonce, ciphertext)
            .map_err(|_| Error::AuthFailure)?;
        self.counter = self.counter.checked_add(1).ok_or(Error::NonceExhausted)?;
        Ok(opened)
    }
}

/// Both directions of a connection's record protection
pub struct Cipher {
    sealer: Sealer,
    opener: Opener,
    binding: [u8; KEY_LEN],
}

impl Cipher {
    /// Completes the key agreement and keys both directions
    pub fn new(role: Role, keypair: BoxKeyPair, peer_public: &[u8; KEY_LEN]) -> Self {
        let precomputed = precompute(&keypair.secret, peer_public);

        let dialer_key = direction_key(&precomputed, DIALER_SEAL_INFO);
        let acceptor_key = direction_key(&precomputed, ACCEPTOR_SEAL_INFO);
        let (seal_key, open_key) = match role {
            Role::Dialer => (dialer_key, acceptor_key),
            Role::Acceptor => (acceptor_key, dialer_key),
        };

        Self {
            sealer: Sealer {
                cipher: XSalsa20Poly1305::new(&seal_key),
                counter: 0,
            },
            opener: Opener {
                cipher: XSalsa20Poly1305::new(&open_key),
                counter: 0,
            },
            binding: precomputed,
        }
    }

    /// The shared secret both peers sign to bind their credentials to
    /// this channel
    #[inline]
    pub fn channel_binding(&self) -> &[u8; KEY_LEN] {
        &self.binding
    }

    #[inline]
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        self.sealer.seal(plaintext)
    }

    #[inline]
    pub fn open(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        self.opener.open(ciphertext)
    }

    #[inline]
    pub fn sealer(&mut self) -> &mut Sealer {
        &mut self.sealer
    }

    #[inline]
    pub fn opener(&mut self) -> &mut Opener {
        &mut self.opener
    }

    /// Splits the cipher so reader and writer tasks own their direction
    pub fn split(self) -> (Sealer, Opener) {
        (self.sealer, self.opener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (Cipher, Cipher) {
        let dialer = BoxKeyPair::generate();
        let acceptor = BoxKeyPair::generate();
        let dialer_public = dialer.public_key();
        let acceptor_public = acceptor.public_key();
        (
            Cipher::new(Role::Dialer, dialer, &acceptor_public),
            Cipher::new(Role::Acceptor, acceptor, &dialer_public),
        )
    }

    #[test]
    fn seal_open_round_trip() {
        let (mut dialer, mut acceptor) = pair();
        for msg in [&b"hello"[..], b"", b"fake payload"] {
            let sealed = dialer.seal(msg).unwrap();
            assert_ne!(sealed, msg);
            assert_eq!(sealed.len(), msg.len() + TAG_LEN);
            assert_eq!(acceptor.open(&sealed).unwrap(), msg);
        }
        // and the other direction
        let sealed = acceptor.seal(b"reply").unwrap();
        assert_eq!(dialer.open(&sealed).unwrap(), b"reply");
    }

    #[test]
    fn bindings_agree_and_differ_per_connection() {
        let (first_dialer, first_acceptor) = pair();
        assert_eq!(
            first_dialer.channel_binding(),
            first_acceptor.channel_binding()
        );

        let (second_dialer, _) = pair();
        assert_ne!(
            first_dialer.channel_binding(),
            second_dialer.channel_binding()
        );
    }

    #[test]
    fn tampered_record_fails_open() {
        let (mut dialer, mut acceptor) = pair();
        let mut sealed = dialer.seal(b"fake payload").unwrap();
        sealed[TAG_LEN + 2] ^= 0x01;
        assert_eq!(acceptor.open(&sealed), Err(Error::AuthFailure));
    }

    #[test]
    fn directions_do_not_share_a_key_stream() {
        let (mut dialer, mut acceptor) = pair();
        let from_dialer = dialer.seal(b"same plaintext").unwrap();
        let from_acceptor = acceptor.seal(b"same plaintext").unwrap();
        // both used counter zero; the records must still differ
        assert_ne!(from_dialer, from_acceptor);
    }

    #[test]
    fn records_are_ordered_by_counter() {
        let (mut dialer, mut acceptor) = pair();
        let first = dialer.seal(b"one").unwrap();
        let second = dialer.seal(b"two").unwrap();
        // opening out of order fails and leaves the counter in place
        assert_eq!(acceptor.open(&second), Err(Error::AuthFailure));
        assert_eq!(acceptor.open(&first).unwrap(), b"one");
        assert_eq!(acceptor.open(&second).unwrap(), b"two");
    }
}
