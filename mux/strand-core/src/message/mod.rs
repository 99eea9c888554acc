// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The on-the-wire message set.
//!
//! Every record starts with a single type byte followed by the variant's
//! fields. Numbers are wire varints, byte strings are length-prefixed,
//! and a handful of variants place their payload in the remainder of the
//! record with no prefix at all.

use crate::security::KeyFamily;
use core::fmt;
use s2n_codec::{DecoderBuffer, DecoderError, Encoder, EncoderValue};

pub mod auth;
pub mod data;
pub mod health_check;
pub mod lame_duck;
pub mod open_flow;
pub mod proxy;
pub mod release;
pub mod setup;
pub mod tear_down;


pub use auth::Auth;
pub use data::Data;
pub use health_check::{HealthCheckRequest, HealthCheckResponse};
pub use lame_duck::{AckLameDuck, EnterLameDuck};
pub use open_flow::OpenFlow;
pub use proxy::{MultiProxyRequest, ProxyErrorResponse, ProxyResponse, ProxyServerRequest};
pub use release::{Counter, Release};
pub use setup::Setup;
pub use tear_down::TearDown;

pub(crate) type Tag = u8;

/// Wire type bytes
pub(crate) mod tag {
    use super::Tag;

    pub const SETUP: Tag = 0x01;
    pub const TEAR_DOWN: Tag = 0x02;
    pub const ENTER_LAME_DUCK: Tag = 0x03;
    pub const ACK_LAME_DUCK: Tag = 0x04;
    pub const AUTH_ECDSA: Tag = 0x05;
    pub const OPEN_FLOW: Tag = 0x06;
    pub const RELEASE: Tag = 0x07;
    pub const DATA: Tag = 0x08;
    pub const MULTI_PROXY_REQUEST: Tag = 0x09;
    pub const PROXY_SERVER_REQUEST: Tag = 0x0a;
    pub const PROXY_RESPONSE: Tag = 0x0b;
    pub const HEALTH_CHECK_REQUEST: Tag = 0x0c;
    pub const HEALTH_CHECK_RESPONSE: Tag = 0x0d;
    pub const PROXY_ERROR_RESPONSE: Tag = 0x0e;
    pub const AUTH_ED25519: Tag = 0x0f;
    pub const AUTH_RSA: Tag = 0x10;
}

/// Bit flags carried by Data and OpenFlow
pub mod flags {
    /// The sending side of the flow is closed by this message
    pub const CLOSE: u64 = 1 << 0;
    /// The payload travels unencrypted in the next frame rather than in
    /// this record
    pub const DISABLE_ENCRYPTION: u64 = 1 << 1;
}

/// Message decoding failures
#[derive(Debug)]
pub enum Error {
    /// A field failed to decode at the named position
    InvalidMsg {
        typ: Tag,
        size: u64,
        field: u64,
        cause: DecoderError,
    },
    /// The leading type byte is unrecognized
    UnknownMsg { typ: Tag },
    /// A Setup option failed to decode
    InvalidSetupOption { tag: u64, field: u64 },
    /// An Auth or OpenFlow arrived without blessings
    MissingBlessings { typ: Tag },
}

impl Error {
    /// A stable identifier for wire-compatible reporting
    pub const fn id(&self) -> &'static str {
        match self {
            Self::InvalidMsg { .. } => "InvalidMsg",
            Self::UnknownMsg { .. } => "UnknownMsg",
            Self::InvalidSetupOption { .. } => "InvalidSetupOption",
            Self::MissingBlessings { .. } => "MissingBlessings",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidMsg {
                typ,
                size,
                field,
                cause,
            } => write!(
                f,
                "message of type {typ} and size {size} failed decoding at field {field}: {cause}"
            ),
            Self::UnknownMsg { typ } => write!(f, "unknown message type {typ}"),
            Self::InvalidSetupOption { tag, field } => {
                write!(f, "setup option {tag} failed decoding at field {field}")
            }
            Self::MissingBlessings { typ } => {
                write!(f, "message of type {typ} received with no blessings")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Tracks the field position while decoding a record so failures name
/// the field that broke
pub(crate) struct Fields {
    typ: Tag,
    size: u64,
    next: u64,
}

impl Fields {
    pub(crate) fn new(typ: Tag, size: u64) -> Self {
        Self { typ, size, next: 0 }
    }

    pub(crate) fn track<T>(&mut self, result: Result<T, DecoderError>) -> Result<T, Error> {
        let field = self.next;
        self.next += 1;
        result.map_err(|cause| Error::InvalidMsg {
            typ: self.typ,
            size: self.size,
            field,
            cause,
        })
    }
}

macro_rules! messages {
    ($($variant:ident),* $(,)?) => {
        /// A decoded wire message
        #[derive(Clone, Debug, PartialEq)]
        pub enum Message {
            $(
                $variant($variant),
            )*
        }

        impl Message {
            pub fn tag(&self) -> Tag {
                match self {
                    $(
                        Message::$variant(msg) => msg.tag(),
                    )*
                }
            }
        }

        $(
            impl From<$variant> for Message {
                #[inline]
                fn from(msg: $variant) -> Self {
                    Message::$variant(msg)
                }
            }
        )*

        impl EncoderValue for Message {
            fn encode<E: Encoder>(&self, encoder: &mut E) {
                match self {
                    $(
                        Message::$variant(msg) => encoder.encode(msg),
                    )*
                }
            }
        }
    };
}

messages!(
    Setup,
    TearDown,
    EnterLameDuck,
    AckLameDuck,
    Auth,
    OpenFlow,
    Release,
    Data,
    MultiProxyRequest,
    ProxyServerRequest,
    ProxyResponse,
    ProxyErrorResponse,
    HealthCheckRequest,
    HealthCheckResponse,
);

impl Message {
    /// Decodes a single record
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let size = bytes.len() as u64;
        let buffer = DecoderBuffer::new(bytes);
        let (typ, buffer) = buffer.decode::<u8>().map_err(|cause| Error::InvalidMsg {
            typ: 0,
            size,
            field: 0,
            cause,
        })?;

        match typ {
            tag::SETUP => Setup::decode(buffer, size).map(Self::Setup),
            tag::TEAR_DOWN => TearDown::decode(buffer).map(Self::TearDown),
            tag::ENTER_LAME_DUCK => Ok(Self::EnterLameDuck(EnterLameDuck)),
            tag::ACK_LAME_DUCK => Ok(Self::AckLameDuck(AckLameDuck)),
            tag::AUTH_ECDSA => Auth::decode(KeyFamily::Ecdsa, buffer, size).map(Self::Auth),
            tag::AUTH_ED25519 => Auth::decode(KeyFamily::Ed25519, buffer, size).map(Self::Auth),
            tag::AUTH_RSA => Auth::decode(KeyFamily::Rsa, buffer, size).map(Self::Auth),
            tag::OPEN_FLOW => OpenFlow::decode(buffer, size).map(Self::OpenFlow),
            tag::RELEASE => Release::decode(buffer, size).map(Self::Release),
            tag::DATA => Data::decode(buffer, size).map(Self::Data),
            tag::MULTI_PROXY_REQUEST => Ok(Self::MultiProxyRequest(MultiProxyRequest)),
            tag::PROXY_SERVER_REQUEST => Ok(Self::ProxyServerRequest(ProxyServerRequest)),
            tag::PROXY_RESPONSE => ProxyResponse::decode(buffer, size).map(Self::ProxyResponse),
            tag::PROXY_ERROR_RESPONSE => {
                ProxyErrorResponse::decode(buffer).map(Self::ProxyErrorResponse)
            }
            tag::HEALTH_CHECK_REQUEST => Ok(Self::HealthCheckRequest(HealthCheckRequest)),
            tag::HEALTH_CHECK_RESPONSE => Ok(Self::HealthCheckResponse(HealthCheckResponse)),
            typ => Err(Error::UnknownMsg { typ }),
        }
    }

    /// Encodes the record into a fresh buffer
    pub fn encode_to_vec(&self) -> Vec<u8> {
        EncoderValue::encode_to_vec(self)
    }

    /// True when this message's payload travels in a companion plaintext
    /// frame instead of the record itself
    pub fn expects_plaintext_payload(&self) -> bool {
        match self {
            Self::Data(msg) => msg.flags & flags::DISABLE_ENCRYPTION != 0,
            Self::OpenFlow(msg) => msg.flags & flags::DISABLE_ENCRYPTION != 0,
            _ => false,
        }
    }

    /// Removes and returns the payload destined for a companion frame
    pub fn take_plaintext_payload(&mut self) -> Option<Vec<u8>> {
        match self {
            Self::Data(msg) if msg.flags & flags::DISABLE_ENCRYPTION != 0 => {
                Some(core::mem::take(&mut msg.payload))
            }
            Self::OpenFlow(msg) if msg.flags & flags::DISABLE_ENCRYPTION != 0 => {
                Some(core::mem::take(&mut msg.payload))
            }
            _ => None,
        }
    }

    /// Reattaches a payload received in a companion frame
    pub fn set_plaintext_payload(&mut self, payload: Vec<u8>) {
        match self {
            Self::Data(msg) => msg.payload = payload,
            Self::OpenFlow(msg) => msg.payload = payload,
            _ => {}
        }
    }
}
