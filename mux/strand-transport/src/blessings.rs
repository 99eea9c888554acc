// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The in-band blessings flow.
//!
//! Flow id 1 exists on every connection without an OpenFlow exchange.
//! Each record transfers a blessings or discharge bundle under a
//! monotonically increasing integer key; Auth and OpenFlow messages then
//! reference the bundles by key instead of repeating them. Key 0 is the
//! "absent" sentinel.

use crate::{error::Error, Crypter};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use strand_core::{
    message::{self, Data, Message},
    security::{Blessings, Discharge, PublicKey},
    varint::VarU64,
};
use s2n_codec::{DecoderBuffer, Encoder, EncoderValue};
use tokio::sync::Notify;

/// Reserved id of the blessings flow; id 2 is reserved as its peer-side
/// mirror and never allocated
pub const BLESSINGS_FLOW_ID: u64 = 1;

const RECORD_BLESSINGS: u64 = 1;
const RECORD_DISCHARGES: u64 = 2;
const RECORD_ENCRYPTED_BLESSINGS: u64 = 3;
const RECORD_ENCRYPTED_DISCHARGES: u64 = 4;

/// One record on the blessings flow
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Record {
    Blessings {
        key: u64,
        blessings: Blessings,
    },
    Discharges {
        key: u64,
        discharges: Vec<Discharge>,
    },
    EncryptedBlessings {
        key: u64,
        ciphertexts: Vec<Vec<u8>>,
    },
    EncryptedDischarges {
        key: u64,
        ciphertexts: Vec<Vec<u8>>,
    },
}

fn encode_ciphertexts<E: Encoder>(encoder: &mut E, ciphertexts: &[Vec<u8>]) {
    encoder.encode(&VarU64::new(ciphertexts.len() as u64));
    for ciphertext in ciphertexts {
        encoder.encode(&VarU64::new(ciphertext.len() as u64));
        encoder.write_slice(ciphertext);
    }
}

impl EncoderValue for Record {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        match self {
            Self::Blessings { key, blessings } => {
                encoder.encode(&VarU64::new(RECORD_BLESSINGS));
                encoder.encode(&VarU64::new(*key));
                encoder.encode(blessings);
            }
            Self::Discharges { key, discharges } => {
                encoder.encode(&VarU64::new(RECORD_DISCHARGES));
                encoder.encode(&VarU64::new(*key));
                encoder.encode(&VarU64::new(discharges.len() as u64));
                for discharge in discharges {
                    encoder.encode(discharge);
                }
            }
            Self::EncryptedBlessings { key, ciphertexts } => {
                encoder.encode(&VarU64::new(RECORD_ENCRYPTED_BLESSINGS));
                encoder.encode(&VarU64::new(*key));
                encode_ciphertexts(encoder, ciphertexts);
            }
            Self::EncryptedDischarges { key, ciphertexts } => {
                encoder.encode(&VarU64::new(RECORD_ENCRYPTED_DISCHARGES));
                encoder.encode(&VarU64::new(*key));
                encode_ciphertexts(encoder, ciphertexts);
            }
        }
    }
}

fn invalid_record(cause: s2n_codec::DecoderError, size: usize) -> Error {
    Error::Message(message::Error::InvalidMsg {
        typ: 0x08,
        size: size as u64,
        field: 0,
        cause,
    })
}

impl Record {
    fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let size = bytes.len();
        let fail = |cause| invalid_record(cause, size);

        let buffer = DecoderBuffer::new(bytes);
        let (tag, buffer) = buffer.decode::<VarU64>().map_err(fail)?;
        let (key, buffer) = buffer.decode::<VarU64>().map_err(fail)?;
        let key = key.as_u64();

        match tag.as_u64() {
            RECORD_BLESSINGS => {
                let (blessings, _) = buffer.decode::<Blessings>().map_err(fail)?;
                Ok(Self::Blessings { key, blessings })
            }
            RECORD_DISCHARGES => {
                let (count, mut buffer) = buffer.decode::<VarU64>().map_err(fail)?;
                let mut discharges = Vec::with_capacity(count.as_u64().min(64) as usize);
                for _ in 0..count.as_u64() {
                    let (discharge, rest) = buffer.decode::<Discharge>().map_err(fail)?;
                    discharges.push(discharge);
                    buffer = rest;
                }
                Ok(Self::Discharges { key, discharges })
            }
            RECORD_ENCRYPTED_BLESSINGS | RECORD_ENCRYPTED_DISCHARGES => {
                let (count, mut buffer) = buffer.decode::<VarU64>().map_err(fail)?;
                let mut ciphertexts = Vec::with_capacity(count.as_u64().min(64) as usize);
                for _ in 0..count.as_u64() {
                    let (ciphertext, rest) = buffer
                        .decode_slice_with_len_prefix::<VarU64>()
                        .map_err(fail)?;
                    ciphertexts.push(ciphertext.as_less_safe_slice().to_vec());
                    buffer = rest;
                }
                if tag.as_u64() == RECORD_ENCRYPTED_BLESSINGS {
                    Ok(Self::EncryptedBlessings { key, ciphertexts })
                } else {
                    Ok(Self::EncryptedDischarges { key, ciphertexts })
                }
            }
            _ => Err(invalid_record(
                s2n_codec::DecoderError::InvariantViolation("unknown blessings record"),
                size,
            )),
        }
    }
}

#[derive(Default)]
struct Outgoing {
    next_key: u64,
    blessings_keys: HashMap<Blessings, u64>,
    discharge_keys: HashMap<Vec<Discharge>, u64>,
}

impl Outgoing {
    fn next_key(&mut self) -> u64 {
        self.next_key += 1;
        self.next_key
    }
}

#[derive(Default)]
struct Incoming {
    blessings: HashMap<u64, Blessings>,
    discharges: HashMap<u64, Vec<Discharge>>,
    bound_key: Option<PublicKey>,
    closed: bool,
}

/// Caches blessings and discharges flowing in both directions on flow 1
pub(crate) struct BlessingsFlow {
    outgoing: Mutex<Outgoing>,
    incoming: Mutex<Incoming>,
    notify: Notify,
    crypter: Option<Arc<dyn Crypter>>,
}

impl BlessingsFlow {
    pub fn new(crypter: Option<Arc<dyn Crypter>>) -> Self {
        Self {
            outgoing: Mutex::new(Outgoing::default()),
            incoming: Mutex::new(Incoming::default()),
            notify: Notify::new(),
            crypter,
        }
    }

    /// Assigns stable keys for the bundles and returns the Data messages
    /// that transfer any bundle the peer has not seen yet
    pub fn prepare_send(
        &self,
        blessings: &Blessings,
        discharges: &[Discharge],
        authorized_peers: &[String],
    ) -> Result<(u64, u64, Vec<Message>), Error> {
        let mut outgoing = self.outgoing.lock().unwrap();
        let mut records = Vec::new();

        let blessings_key = match outgoing.blessings_keys.get(blessings) {
            Some(key) => *key,
            None => {
                let key = outgoing.next_key();
                outgoing.blessings_keys.insert(blessings.clone(), key);
                records.push(self.blessings_record(key, blessings, authorized_peers)?);
                key
            }
        };

        let discharge_key = if discharges.is_empty() {
            0
        } else {
            match outgoing.discharge_keys.get(discharges) {
                Some(key) => *key,
                None => {
                    let key = outgoing.next_key();
                    outgoing.discharge_keys.insert(discharges.to_vec(), key);
                    records.push(Record::Discharges {
                        key,
                        discharges: discharges.to_vec(),
                    });
                    key
                }
            }
        };

        let messages = records
            .into_iter()
            .map(|record| {
                Message::from(Data {
                    id: BLESSINGS_FLOW_ID,
                    flags: 0,
                    payload: record.encode_to_vec(),
                })
            })
            .collect();

        Ok((blessings_key, discharge_key, messages))
    }

    fn blessings_record(
        &self,
        key: u64,
        blessings: &Blessings,
        authorized_peers: &[String],
    ) -> Result<Record, Error> {
        if authorized_peers.is_empty() {
            return Ok(Record::Blessings {
                key,
                blessings: blessings.clone(),
            });
        }
        match &self.crypter {
            Some(crypter) => {
                let plaintext = blessings.encode_to_vec();
                let ciphertexts = crypter
                    .encrypt_for_patterns(authorized_peers, &plaintext)
                    .map_err(Error::NotTrusted)?;
                Ok(Record::EncryptedBlessings { key, ciphertexts })
            }
            // the channel itself is already encrypted; without a crypter
            // the bundle goes in the clear to the authenticated peer
            None => Ok(Record::Blessings {
                key,
                blessings: blessings.clone(),
            }),
        }
    }

    /// Handles one inbound record from flow 1
    pub fn process(&self, payload: &[u8]) -> Result<(), Error> {
        let record = Record::decode(payload)?;
        let record = self.decrypt_record(record)?;
        let mut incoming = self.incoming.lock().unwrap();
        match record {
            Record::Blessings { key, blessings } => {
                if let Some(bound) = &incoming.bound_key {
                    if blessings.public_key != *bound {
                        return Err(Error::InconsistentPublicKey);
                    }
                }
                incoming.blessings.insert(key, blessings);
            }
            Record::Discharges { key, discharges } => {
                incoming.discharges.insert(key, discharges);
            }
            Record::EncryptedBlessings { .. } | Record::EncryptedDischarges { .. } => {
                return Err(Error::NotTrusted(
                    "restricted blessings received and no crypter is configured".into(),
                ));
            }
        }
        drop(incoming);
        self.notify.notify_waiters();
        Ok(())
    }

    fn decrypt_record(&self, record: Record) -> Result<Record, Error> {
        let Some(crypter) = &self.crypter else {
            return Ok(record);
        };
        match record {
            Record::EncryptedBlessings { key, ciphertexts } => {
                let plaintext = crypter.decrypt(&ciphertexts).map_err(Error::NotTrusted)?;
                let (blessings, _) = DecoderBuffer::new(&plaintext)
                    .decode::<Blessings>()
                    .map_err(|cause| invalid_record(cause, plaintext.len()))?;
                Ok(Record::Blessings { key, blessings })
            }
            Record::EncryptedDischarges { key, ciphertexts } => {
                let plaintext = crypter.decrypt(&ciphertexts).map_err(Error::NotTrusted)?;
                let mut discharges = Vec::new();
                let mut buffer = DecoderBuffer::new(&plaintext);
                while !buffer.is_empty() {
                    let (discharge, rest) = buffer
                        .decode::<Discharge>()
                        .map_err(|cause| invalid_record(cause, plaintext.len()))?;
                    discharges.push(discharge);
                    buffer = rest;
                }
                Ok(Record::Discharges { key, discharges })
            }
            other => Ok(other),
        }
    }

    /// Waits until the referenced bundles have arrived
    pub async fn get_remote(
        &self,
        blessings_key: u64,
        discharge_key: u64,
    ) -> Result<(Blessings, Vec<Discharge>), Error> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let incoming = self.incoming.lock().unwrap();
                if incoming.closed {
                    return Err(Error::ConnectionClosed);
                }
                if let Some(found) = lookup(&incoming, blessings_key, discharge_key) {
                    return Ok(found);
                }
            }
            notified.await;
        }
    }

    /// The bundles if they have already arrived
    pub fn try_get_remote(
        &self,
        blessings_key: u64,
        discharge_key: u64,
    ) -> Option<(Blessings, Vec<Discharge>)> {
        let incoming = self.incoming.lock().unwrap();
        lookup(&incoming, blessings_key, discharge_key)
    }

    /// After the first non-empty blessings arrive, all further blessings
    /// on this connection must present the same public key
    pub fn set_public_key_binding(&self, public_key: PublicKey) {
        self.incoming.lock().unwrap().bound_key = Some(public_key);
    }

    pub fn close(&self) {
        self.incoming.lock().unwrap().closed = true;
        self.notify.notify_waiters();
    }
}

fn lookup(
    incoming: &Incoming,
    blessings_key: u64,
    discharge_key: u64,
) -> Option<(Blessings, Vec<Discharge>)> {
    let blessings = if blessings_key == 0 {
        Blessings::default()
    } else {
        incoming.blessings.get(&blessings_key)?.clone()
    };
    let discharges = if discharge_key == 0 {
        Vec::new()
    } else {
        incoming.discharges.get(&discharge_key)?.clone()
    };
    Some((blessings, discharges))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::security::KeyAlgo;

    fn blessings(name: &str) -> Blessings {
        Blessings {
            public_key: PublicKey {
                algo: KeyAlgo::Ed25519,
                bytes: vec![7; 32],
            },
            names: vec![name.to_string()],
        }
    }

    fn payload_of(msg: &Message) -> &[u8] {
        match msg {
            Message::Data(data) => {
                assert_eq!(data.id, BLESSINGS_FLOW_ID);
                &data.payload
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn keys_are_stable_per_bundle() {
        let flow = BlessingsFlow::new(None);
        let (key1, dkey1, msgs) = flow.prepare_send(&blessings("a"), &[], &[]).unwrap();
        assert_eq!((key1, dkey1), (1, 0));
        assert_eq!(msgs.len(), 1);

        // the same bundle reuses its key with nothing new to transfer
        let (key2, _, msgs) = flow.prepare_send(&blessings("a"), &[], &[]).unwrap();
        assert_eq!(key2, key1);
        assert!(msgs.is_empty());

        let (key3, _, msgs) = flow.prepare_send(&blessings("b"), &[], &[]).unwrap();
        assert_ne!(key3, key1);
        assert_eq!(msgs.len(), 1);
    }

    #[test]
    fn discharges_get_their_own_key() {
        let flow = BlessingsFlow::new(None);
        let discharges = vec![Discharge {
            id: "caveat".into(),
            data: vec![1, 2],
        }];
        let (bkey, dkey, msgs) = flow.prepare_send(&blessings("a"), &discharges, &[]).unwrap();
        assert_eq!(bkey, 1);
        assert_eq!(dkey, 2);
        assert_eq!(msgs.len(), 2);
    }

    #[tokio::test]
    async fn records_transfer_between_flows() {
        let sender = BlessingsFlow::new(None);
        let receiver = BlessingsFlow::new(None);

        let discharges = vec![Discharge {
            id: "caveat".into(),
            data: vec![9],
        }];
        let (bkey, dkey, msgs) = sender
            .prepare_send(&blessings("carol"), &discharges, &[])
            .unwrap();
        for msg in &msgs {
            receiver.process(payload_of(msg)).unwrap();
        }

        let (got_blessings, got_discharges) = receiver.get_remote(bkey, dkey).await.unwrap();
        assert_eq!(got_blessings, blessings("carol"));
        assert_eq!(got_discharges, discharges);
    }

    #[tokio::test]
    async fn get_remote_blocks_until_arrival() {
        let receiver = Arc::new(BlessingsFlow::new(None));
        let waiter = {
            let receiver = receiver.clone();
            tokio::spawn(async move { receiver.get_remote(1, 0).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        let sender = BlessingsFlow::new(None);
        let (_, _, msgs) = sender.prepare_send(&blessings("dave"), &[], &[]).unwrap();
        receiver.process(payload_of(&msgs[0])).unwrap();

        let (got, _) = waiter.await.unwrap().unwrap();
        assert_eq!(got, blessings("dave"));
    }

    #[test]
    fn binding_rejects_a_different_public_key() {
        let receiver = BlessingsFlow::new(None);
        receiver.set_public_key_binding(PublicKey {
            algo: KeyAlgo::Ed25519,
            bytes: vec![8; 32],
        });

        let sender = BlessingsFlow::new(None);
        let (_, _, msgs) = sender.prepare_send(&blessings("mallory"), &[], &[]).unwrap();
        assert!(matches!(
            receiver.process(payload_of(&msgs[0])),
            Err(Error::InconsistentPublicKey)
        ));
    }

    #[test]
    fn zero_keys_are_absent() {
        let flow = BlessingsFlow::new(None);
        let (blessings, discharges) = flow.try_get_remote(0, 0).unwrap();
        assert!(blessings.is_zero());
        assert!(discharges.is_empty());
    }

    struct ReverseCrypter;

    impl Crypter for ReverseCrypter {
        fn encrypt_for_patterns(
            &self,
            _patterns: &[String],
            plaintext: &[u8],
        ) -> Result<Vec<Vec<u8>>, String> {
            Ok(vec![plaintext.iter().rev().copied().collect()])
        }

        fn decrypt(&self, ciphertexts: &[Vec<u8>]) -> Result<Vec<u8>, String> {
            Ok(ciphertexts[0].iter().rev().copied().collect())
        }
    }

    #[tokio::test]
    async fn restricted_blessings_round_trip_through_the_crypter() {
        let crypter: Arc<dyn Crypter> = Arc::new(ReverseCrypter);
        let sender = BlessingsFlow::new(Some(crypter.clone()));
        let receiver = BlessingsFlow::new(Some(crypter));

        let patterns = vec!["idp:ops".to_string()];
        let (bkey, _, msgs) = sender
            .prepare_send(&blessings("restricted"), &[], &patterns)
            .unwrap();
        // the record on the wire is the encrypted variant
        let record = Record::decode(payload_of(&msgs[0])).unwrap();
        assert!(matches!(record, Record::EncryptedBlessings { .. }));

        receiver.process(payload_of(&msgs[0])).unwrap();
        let (got, _) = receiver.get_remote(bkey, 0).await.unwrap();
        assert_eq!(got, blessings("restricted"));
    }

    #[test]
    fn restricted_blessings_without_a_crypter_fail() {
        let crypter: Arc<dyn Crypter> = Arc::new(ReverseCrypter);
        let sender = BlessingsFlow::new(Some(crypter));
        let receiver = BlessingsFlow::new(None);

        let patterns = vec!["idp:ops".to_string()];
        let (_, _, msgs) = sender
            .prepare_send(&blessings("restricted"), &[], &patterns)
            .unwrap();
        assert!(matches!(
            receiver.process(payload_of(&msgs[0])),
            Err(Error::NotTrusted(_))
        ));
    }
}
