// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Flow handles.
//!
//! A [`Flow`] is one ordered, flow-controlled stream inside a
//! connection. Writes are chunked to the connection MTU and consume
//! credit; the first write of a dialed flow travels inside the OpenFlow
//! message itself so opening costs no extra round trip.

use crate::{conn::ConnInner, error::Error};
use std::sync::Arc;
use strand_core::{
    ensure,
    message::{flags, Data, Message, OpenFlow},
    security::Blessings,
};
use tokio::sync::mpsc;

pub(crate) enum RecvItem {
    Bytes(Vec<u8>),
    End,
}

pub(crate) struct PendingOpen {
    pub blessings_key: u64,
    pub discharge_key: u64,
}

/// One logical stream inside a connection
pub struct Flow {
    pub(crate) conn: Arc<ConnInner>,
    pub(crate) id: u64,
    pub(crate) recv: mpsc::UnboundedReceiver<RecvItem>,
    pub(crate) leftover: Vec<u8>,
    pub(crate) remote_done: bool,
    pub(crate) write_closed: bool,
    pub(crate) pending_open: Option<PendingOpen>,
    pub(crate) remote_blessings: Blessings,
}

impl Flow {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The blessings the peer attached when it opened this flow; zero
    /// for flows we dialed
    pub fn remote_blessings(&self) -> &Blessings {
        &self.remote_blessings
    }

    /// Writes all of `data`, suspending for credit as needed
    pub async fn write(&mut self, data: &[u8]) -> Result<usize, Error> {
        self.write_inner(data, false).await
    }

    /// Writes all of `data` and closes the sending side; the final
    /// message carries both the last bytes and the CLOSE flag
    pub async fn write_and_close(&mut self, data: &[u8]) -> Result<usize, Error> {
        self.write_inner(data, true).await
    }

    /// Closes the sending side; idempotent
    pub async fn close(&mut self) -> Result<(), Error> {
        if self.write_closed {
            return Ok(());
        }
        self.write_inner(&[], true).await?;
        Ok(())
    }

    async fn write_inner(&mut self, data: &[u8], close: bool) -> Result<usize, Error> {
        ensure!(!self.write_closed, Err(Error::FlowClosed));
        if data.is_empty() && !close {
            return Ok(0);
        }

        let mtu = self.conn.mtu() as usize;
        let mut remaining = data;
        let mut wrote = 0usize;
        loop {
            let want = remaining.len().min(mtu);
            let granted = if want == 0 {
                0
            } else {
                self.conn.acquire_credit(self.id, want as u64).await? as usize
            };
            let chunk = &remaining[..granted];
            remaining = &remaining[granted..];
            let last = remaining.is_empty();
            let msg_flags = if last && close { flags::CLOSE } else { 0 };
            let msg = self.next_message(chunk.to_vec(), msg_flags);
            self.conn.send_flow_data(msg).await?;
            wrote += granted;
            if last {
                break;
            }
        }

        if close {
            self.write_closed = true;
            self.conn.note_local_close(self.id);
        }
        Ok(wrote)
    }

    /// The next outbound message for this flow: OpenFlow exactly once,
    /// Data afterwards
    fn next_message(&mut self, payload: Vec<u8>, msg_flags: u64) -> Message {
        match self.pending_open.take() {
            Some(open) => Message::from(OpenFlow {
                id: self.id,
                initial_counters: self.conn.negotiated_tokens(),
                blessings_key: open.blessings_key,
                discharge_key: open.discharge_key,
                flags: msg_flags,
                payload,
            }),
            None => Message::from(Data {
                id: self.id,
                flags: msg_flags,
                payload,
            }),
        }
    }

    /// Reads into `buf`; `Ok(0)` is end-of-flow
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        loop {
            if !self.leftover.is_empty() {
                let n = self.leftover.len().min(buf.len());
                buf[..n].copy_from_slice(&self.leftover[..n]);
                self.leftover.drain(..n);
                self.conn.note_consumed(self.id, n as u64);
                return Ok(n);
            }
            if self.remote_done {
                return Ok(0);
            }
            match self.recv.recv().await {
                Some(RecvItem::Bytes(bytes)) => self.leftover = bytes,
                Some(RecvItem::End) => self.remote_done = true,
                None => return Err(Error::ConnectionClosed),
            }
        }
    }

    /// Reads until the peer closes its side
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, Error> {
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }
}

impl Drop for Flow {
    fn drop(&mut self) {
        // a handle dropped without close() still releases its state
        self.conn.drop_flow(self.id, !self.write_closed);
    }
}

/// Batches writes up to the connection MTU.
///
/// A single payload handed to [`write_msg`](Self::write_msg) is never
/// fragmented across messages; closing flushes the remainder together
/// with the CLOSE flag.
pub struct BufferingFlow {
    flow: Flow,
    buf: Vec<u8>,
    mtu: usize,
}

impl BufferingFlow {
    pub fn new(flow: Flow) -> Self {
        let mtu = flow.conn.mtu() as usize;
        Self {
            flow,
            buf: Vec::with_capacity(mtu),
            mtu,
        }
    }

    /// Buffers `data`, writing through once the buffer would exceed the
    /// MTU
    pub async fn write(&mut self, data: &[u8]) -> Result<usize, Error> {
        self.append(data).await
    }

    /// Buffers each payload in turn; individual payloads stay whole
    pub async fn write_msg(&mut self, parts: &[&[u8]]) -> Result<usize, Error> {
        let mut wrote = 0;
        for part in parts {
            wrote += self.append(part).await?;
        }
        Ok(wrote)
    }

    async fn append(&mut self, data: &[u8]) -> Result<usize, Error> {
        if self.buf.len() + data.len() < self.mtu {
            self.buf.extend_from_slice(data);
            return Ok(data.len());
        }
        let pending = std::mem::take(&mut self.buf);
        if !pending.is_empty() {
            self.flow.write(&pending).await?;
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    /// Writes out any buffered bytes
    pub async fn flush(&mut self) -> Result<(), Error> {
        let pending = std::mem::take(&mut self.buf);
        if !pending.is_empty() {
            self.flow.write(&pending).await?;
        }
        Ok(())
    }

    /// Flushes the remaining bytes and closes the flow in one message
    pub async fn close(mut self) -> Result<(), Error> {
        let pending = std::mem::take(&mut self.buf);
        self.flow.write_and_close(&pending).await?;
        Ok(())
    }

    /// Reads from the underlying flow
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.flow.read(buf).await
    }

    pub fn flow(&mut self) -> &mut Flow {
        &mut self.flow
    }
}
