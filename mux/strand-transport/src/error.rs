// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use strand_core::version::NoCommonVersion;

/// Connection and flow errors.
///
/// Each kind carries a stable string id so TearDown reasons stay
/// wire-compatible across releases.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("error reading from the underlying transport: {0}")]
    Recv(#[source] std::io::Error),
    #[error("error writing to the underlying transport: {0}")]
    Send(#[source] std::io::Error),
    #[error("frame length does not fit in a 3-byte unsigned integer")]
    LargerThan3ByteUInt,
    #[error(transparent)]
    Message(strand_core::message::Error),
    #[error(transparent)]
    Crypto(strand_crypto::CipherError),
    #[error("the peer's setup message is missing a required option: {0}")]
    MissingSetupOption(&'static str),
    #[error(transparent)]
    NoCompatibleVersions(NoCommonVersion),
    #[error("no public key was received from the peer")]
    NoPublicKey,
    #[error("the channel binding was invalid")]
    InvalidChannelBinding,
    #[error("the acceptor did not send blessings")]
    AcceptorBlessingsMissing,
    #[error("blessings bound to a different public key were received")]
    InconsistentPublicKey,
    #[error("the peer is not trusted: {0}")]
    NotTrusted(String),
    #[error("the handshake did not complete in time")]
    HandshakeTimeout,
    #[error("the peer tore the connection down: {0}")]
    TearDownReceived(String),
    #[error("the flow is closed")]
    FlowClosed,
    #[error("the operation was canceled")]
    Canceled,
    #[error("the channel timed out")]
    ChannelTimeout,
    #[error("timed out waiting for flow-control credit")]
    BackpressureTimeout,
    #[error("the connection's flow limit was reached")]
    TooManyFlows,
    #[error("the connection is closed")]
    ConnectionClosed,
}

impl Error {
    /// A stable identifier for wire-compatible reporting
    pub fn id(&self) -> &'static str {
        match self {
            Self::Recv(_) => "Recv",
            Self::Send(_) => "Send",
            Self::LargerThan3ByteUInt => "LargerThan3ByteUInt",
            Self::Message(err) => err.id(),
            Self::Crypto(_) => "AuthFailure",
            Self::MissingSetupOption(_) => "MissingSetupOption",
            Self::NoCompatibleVersions(_) => "NoCompatibleVersions",
            Self::NoPublicKey => "NoPublicKey",
            Self::InvalidChannelBinding => "InvalidChannelBinding",
            Self::AcceptorBlessingsMissing => "AcceptorBlessingsMissing",
            Self::InconsistentPublicKey => "InconsistentPublicKey",
            Self::NotTrusted(_) => "NotTrusted",
            Self::HandshakeTimeout => "HandshakeTimeout",
            Self::TearDownReceived(_) => "TearDownReceived",
            Self::FlowClosed => "FlowClosed",
            Self::Canceled => "Canceled",
            Self::ChannelTimeout => "ChannelTimeout",
            Self::BackpressureTimeout => "BackpressureTimeout",
            Self::TooManyFlows => "TooManyFlows",
            Self::ConnectionClosed => "ConnectionClosed",
        }
    }

    /// True when the error tears down the whole connection rather than a
    /// single flow
    pub fn is_fatal_to_connection(&self) -> bool {
        !matches!(
            self,
            Self::FlowClosed | Self::Canceled | Self::ChannelTimeout | Self::BackpressureTimeout
        )
    }
}

impl From<strand_core::message::Error> for Error {
    fn from(err: strand_core::message::Error) -> Self {
        Self::Message(err)
    }
}

impl From<strand_crypto::CipherError> for Error {
    fn from(err: strand_crypto::CipherError) -> Self {
        Self::Crypto(err)
    }
}

impl From<NoCommonVersion> for Error {
    fn from(err: NoCommonVersion) -> Self {
        Self::NoCompatibleVersions(err)
    }
}
