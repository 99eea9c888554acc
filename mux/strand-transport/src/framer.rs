// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Length-delimited framing over the byte transport.
//!
//! ```text
//! Frame {
//!   Length (24),   // big-endian
//!   Payload (..),
//! }
//! ```

use crate::error::Error;
use strand_core::{
    buffer::{NetBuf, NetBufPool},
    ensure,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// The largest payload a 3-byte length can describe
pub const MAX_FRAME_LEN: usize = 0x00ff_ffff;

pub struct FrameReader<R> {
    inner: R,
    pool: NetBufPool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, pool: NetBufPool) -> Self {
        Self { inner, pool }
    }

    /// Reads one length-delimited frame into a pooled buffer
    pub async fn read_frame(&mut self) -> Result<NetBuf, Error> {
        let mut header = [0u8; 3];
        self.inner
            .read_exact(&mut header)
            .await
            .map_err(Error::Recv)?;
        let len = u32::from_be_bytes([0, header[0], header[1], header[2]]) as usize;

        let mut buf = self.pool.get(len);
        buf.resize(len, 0);
        self.inner
            .read_exact(&mut buf[..])
            .await
            .map_err(Error::Recv)?;
        Ok(buf)
    }
}

pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Writes one length-delimited frame and flushes it
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<(), Error> {
        ensure!(payload.len() <= MAX_FRAME_LEN, Err(Error::LargerThan3ByteUInt));
        let len = payload.len() as u32;
        let header = [(len >> 16) as u8, (len >> 8) as u8, len as u8];
        self.inner.write_all(&header).await.map_err(Error::Send)?;
        self.inner.write_all(payload).await.map_err(Error::Send)?;
        self.inner.flush().await.map_err(Error::Send)?;
        Ok(())
    }
}
