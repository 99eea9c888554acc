// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// The default maximum plaintext size of an encrypted record
pub const DEFAULT_MTU: u64 = 16 * 1024;

/// The default receive-buffering commitment advertised in Setup
pub const DEFAULT_SHARED_TOKENS: u64 = 1 << 20;

/// The default cap on concurrently open flows per connection
pub const DEFAULT_MAX_FLOWS: usize = 4096;

/// The default bound on the whole Setup/Auth exchange
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

/// Tunables for a single connection
#[derive(Clone, Debug)]
pub struct ConnOptions {
    /// Applied to the whole Setup/Auth exchange
    pub handshake_timeout: Duration,
    /// Proposed maximum record plaintext size; the smaller proposal wins
    pub mtu: u64,
    /// Proposed receive-buffering commitment; the smaller proposal wins
    /// and feeds per-flow credit, the shared pool and the release
    /// threshold
    pub shared_tokens: u64,
    /// Open flows past this limit fail the connection
    pub max_flows: usize,
    /// Idle bound; `None` disables health checking
    pub channel_timeout: Option<Duration>,
}

impl Default for ConnOptions {
    fn default() -> Self {
        Self::RECOMMENDED
    }
}

impl ConnOptions {
    pub const RECOMMENDED: Self = Self {
        handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        mtu: DEFAULT_MTU,
        shared_tokens: DEFAULT_SHARED_TOKENS,
        max_flows: DEFAULT_MAX_FLOWS,
        channel_timeout: None,
    };

    pub fn with_mtu(mut self, mtu: u64) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn with_shared_tokens(mut self, shared_tokens: u64) -> Self {
        self.shared_tokens = shared_tokens;
        self
    }

    pub fn with_max_flows(mut self, max_flows: usize) -> Self {
        self.max_flows = max_flows;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_channel_timeout(mut self, timeout: Duration) -> Self {
        self.channel_timeout = Some(timeout);
        self
    }
}
