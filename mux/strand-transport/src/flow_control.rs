// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Credit accounting for the multiplexer.
//!
//! The sender side tracks a per-flow counter and a connection-shared
//! pool; a write may consume `min(flow, shared)` bytes and suspends when
//! either pool is empty. The receiver side counts consumed bytes per
//! flow and schedules a Release once a flow crosses half of the
//! negotiated per-flow buffer.

use crate::error::Error;
use std::{collections::HashMap, sync::Mutex};
use strand_core::message::Counter;
use tokio::sync::Notify;

struct SendState {
    shared: u64,
    flows: HashMap<u64, u64>,
    closed: bool,
}

/// Outbound credit: what the peer has agreed to buffer for us
pub(crate) struct SendCredit {
    /// Cap for the shared pool and for any single flow's counter
    negotiated: u64,
    state: Mutex<SendState>,
    notify: Notify,
}

impl SendCredit {
    pub fn new(negotiated: u64) -> Self {
        Self {
            negotiated,
            state: Mutex::new(SendState {
                shared: negotiated,
                flows: HashMap::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    pub fn add_flow(&self, id: u64, initial: u64) {
        let mut state = self.state.lock().unwrap();
        state.flows.insert(id, initial.min(self.negotiated));
    }

    /// Returns the flow's remaining counter to the shared pool
    pub fn remove_flow(&self, id: u64) {
        let mut state = self.state.lock().unwrap();
        if let Some(remaining) = state.flows.remove(&id) {
            state.shared = (state.shared + remaining).min(self.negotiated);
        }
        drop(state);
        self.notify.notify_waiters();
    }

    /// Applies a Release from the peer
    pub fn release(&self, counters: &[Counter]) {
        let mut state = self.state.lock().unwrap();
        for counter in counters {
            if let Some(flow) = state.flows.get_mut(&counter.flow_id) {
                *flow = (*flow + counter.tokens).min(self.negotiated);
            }
            state.shared = (state.shared + counter.tokens).min(self.negotiated);
        }
        drop(state);
        self.notify.notify_waiters();
    }

    /// Takes up to `want` bytes of credit for `id`, suspending while none
    /// is available
    pub async fn acquire(&self, id: u64, want: u64) -> Result<u64, Error> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // register before re-checking so a concurrent release is not
            // lost between the check and the await
            notified.as_mut().enable();
            {
                let mut state = self.state.lock().unwrap();
                ensure_open(&state)?;
                let shared = state.shared;
                let Some(flow) = state.flows.get_mut(&id) else {
                    return Err(Error::FlowClosed);
                };
                let granted = want.min(*flow).min(shared);
                if granted > 0 {
                    *flow -= granted;
                    state.shared -= granted;
                    return Ok(granted);
                }
            }
            notified.await;
        }
    }

    /// Credit available right now, without waiting
    #[cfg(test)]
    pub fn available(&self, id: u64) -> u64 {
        let state = self.state.lock().unwrap();
        state
            .flows
            .get(&id)
            .map(|flow| (*flow).min(state.shared))
            .unwrap_or(0)
    }

    /// Fails all pending and future acquisitions
    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.notify.notify_waiters();
    }
}

fn ensure_open(state: &SendState) -> Result<(), Error> {
    if state.closed {
        return Err(Error::ConnectionClosed);
    }
    Ok(())
}

/// Inbound accounting: consumed bytes owed back to the peer as Releases
pub(crate) struct RecvAccounting {
    threshold: u64,
    consumed: Mutex<HashMap<u64, u64>>,
}

impl RecvAccounting {
    pub fn new(negotiated: u64) -> Self {
        Self {
            threshold: (negotiated / 2).max(1),
            consumed: Mutex::new(HashMap::new()),
        }
    }

    /// Records `n` consumed bytes; returns the counters to piggyback in
    /// one Release when the flow crossed the threshold
    pub fn on_read(&self, id: u64, n: u64) -> Option<Vec<Counter>> {
        let mut consumed = self.consumed.lock().unwrap();
        let entry = consumed.entry(id).or_insert(0);
        *entry += n;
        if *entry < self.threshold {
            return None;
        }
        Some(drain(&mut consumed))
    }

    /// Releases whatever the closing flow still owes
    pub fn on_close(&self, id: u64) -> Option<Vec<Counter>> {
        let mut consumed = self.consumed.lock().unwrap();
        let owed = consumed.remove(&id)?;
        if owed == 0 {
            return None;
        }
        Some(vec![Counter {
            flow_id: id,
            tokens: owed,
        }])
    }
}

fn drain(consumed: &mut HashMap<u64, u64>) -> Vec<Counter> {
    let counters = consumed
        .iter()
        .filter(|(_, tokens)| **tokens > 0)
        .map(|(flow_id, tokens)| Counter {
            flow_id: *flow_id,
            tokens: *tokens,
        })
        .collect();
    consumed.clear();
    counters
}
