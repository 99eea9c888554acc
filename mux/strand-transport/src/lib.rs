// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The connection machinery of the strand transport: framing, the
//! message pipe, the Setup/Auth handshake, credit-based flow control and
//! the flow multiplexer.
//!
//! A [`conn::Conn`] owns one byte-oriented duplex transport and carries
//! many independent, ordered, flow-controlled flows over it, each
//! authenticated end-to-end and bound to the underlying channel.

pub mod blessings;
pub mod conn;
pub mod error;
pub mod flow;
pub mod flow_control;
pub mod framer;
pub mod handshake;
pub mod options;
pub mod pipe;

pub use conn::Conn;
pub use error::Error;
pub use flow::Flow;
pub use options::ConnOptions;

use std::{future::Future, pin::Pin, time::Duration};
use strand_core::{
    endpoint::Endpoint,
    security::{Blessings, Discharge},
};

/// A blessing the authorizer refused to accept, and why
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RejectedBlessing {
    pub name: String,
    pub reason: String,
}

/// Decides whether a peer's credentials authorize the connection
pub trait PeerAuthorizer: Send + Sync {
    #[allow(clippy::type_complexity)]
    fn authorize_peer(
        &self,
        local: &Endpoint,
        remote: &Endpoint,
        blessings: &Blessings,
        discharges: &[Discharge],
    ) -> Result<(Vec<String>, Vec<RejectedBlessing>), String>;
}

/// Receives flows the peer opens on an accepted connection
pub trait FlowHandler: Send + Sync {
    fn handle_flow(&self, flow: Flow);
}

/// Prepares discharges for third-party caveats; may issue sub-RPCs
pub trait DischargePreparer: Send + Sync {
    #[allow(clippy::type_complexity)]
    fn prepare_discharges<'a>(
        &'a self,
        blessings: &'a Blessings,
    ) -> Pin<Box<dyn Future<Output = (Vec<Discharge>, Option<Duration>)> + Send + 'a>>;
}

/// Pattern-based encryption for blessings sent to restricted peers;
/// the identity-based scheme itself lives outside the transport
pub trait Crypter: Send + Sync {
    fn encrypt_for_patterns(
        &self,
        patterns: &[String],
        plaintext: &[u8],
    ) -> Result<Vec<Vec<u8>>, String>;

    fn decrypt(&self, ciphertexts: &[Vec<u8>]) -> Result<Vec<u8>, String>;
}
