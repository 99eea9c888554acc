// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Message-granular reader/writer layered above the framer.
//!
//! Setup messages travel in the clear; once `enable_encryption` runs,
//! every record is sealed. A message flagged `DISABLE_ENCRYPTION` has
//! its header sealed as usual while its payload follows in the next
//! frame untouched, so intermediaries that only rewrite headers can
//! forward payload bytes without a decrypt/encrypt round trip.

use crate::{
    error::Error,
    framer::{FrameReader, FrameWriter},
};
use strand_core::{buffer::NetBufPool, message::Message};
use strand_crypto::{BoxKeyPair, Cipher, Opener, Role, Sealer};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};

fn companion_payload(msg: &Message) -> Option<&[u8]> {
    match msg {
        Message::Data(data) if msg.expects_plaintext_payload() => Some(&data.payload),
        Message::OpenFlow(open) if msg.expects_plaintext_payload() => Some(&open.payload),
        _ => None,
    }
}

pub struct MessagePipe<T> {
    reader: FrameReader<ReadHalf<T>>,
    writer: FrameWriter<WriteHalf<T>>,
    cipher: Option<Cipher>,
    mtu: u64,
    per_flow_buffer: u64,
    encapsulation_hook: Option<Box<dyn FnOnce() + Send>>,
}

impl<T: AsyncRead + AsyncWrite> MessagePipe<T> {
    pub fn new(transport: T, pool: NetBufPool) -> Self {
        let (read, write) = tokio::io::split(transport);
        Self {
            reader: FrameReader::new(read, pool),
            writer: FrameWriter::new(write),
            cipher: None,
            mtu: crate::options::DEFAULT_MTU,
            per_flow_buffer: crate::options::DEFAULT_SHARED_TOKENS,
            encapsulation_hook: None,
        }
    }

    /// Raw frame halves, used by the setup exchange to send and receive
    /// concurrently
    pub(crate) fn frame_halves(
        &mut self,
    ) -> (
        &mut FrameReader<ReadHalf<T>>,
        &mut FrameWriter<WriteHalf<T>>,
    ) {
        (&mut self.reader, &mut self.writer)
    }

    /// Completes key agreement and seals everything from here on.
    /// Returns the channel binding.
    pub fn enable_encryption(
        &mut self,
        role: Role,
        keypair: BoxKeyPair,
        peer_public: &[u8; 32],
    ) -> [u8; 32] {
        let cipher = Cipher::new(role, keypair, peer_public);
        let binding = *cipher.channel_binding();
        self.cipher = Some(cipher);
        // an outer encrypted flow no longer needs to double-encrypt us
        if let Some(hook) = self.encapsulation_hook.take() {
            hook();
        }
        binding
    }

    /// Registers the embedder's hook run once our own encryption is on
    pub fn set_encapsulation_hook(&mut self, hook: Box<dyn FnOnce() + Send>) {
        self.encapsulation_hook = Some(hook);
    }

    pub fn set_mtu(&mut self, mtu: u64, per_flow_buffer: u64) {
        self.mtu = mtu;
        self.per_flow_buffer = per_flow_buffer;
    }

    #[inline]
    pub fn mtu(&self) -> u64 {
        self.mtu
    }

    #[inline]
    pub fn per_flow_buffer(&self) -> u64 {
        self.per_flow_buffer
    }

    pub async fn send(&mut self, msg: &Message) -> Result<(), Error> {
        send_inner(&mut self.writer, self.cipher.as_mut().map(Cipher::sealer), msg).await
    }

    pub async fn recv(&mut self) -> Result<Message, Error> {
        recv_inner(&mut self.reader, self.cipher.as_mut().map(Cipher::opener)).await
    }

    /// Splits into halves so the reader and writer tasks each own their
    /// direction
    pub fn split(self) -> (PipeReader<T>, PipeWriter<T>) {
        let (sealer, opener) = match self.cipher {
            Some(cipher) => {
                let (sealer, opener) = cipher.split();
                (Some(sealer), Some(opener))
            }
            None => (None, None),
        };
        (
            PipeReader {
                reader: self.reader,
                opener,
            },
            PipeWriter {
                writer: self.writer,
                sealer,
                mtu: self.mtu,
            },
        )
    }
}

pub struct PipeReader<T> {
    reader: FrameReader<ReadHalf<T>>,
    opener: Option<Opener>,
}

impl<T: AsyncRead + AsyncWrite> PipeReader<T> {
    pub async fn recv(&mut self) -> Result<Message, Error> {
        recv_inner(&mut self.reader, self.opener.as_mut()).await
    }
}

pub struct PipeWriter<T> {
    writer: FrameWriter<WriteHalf<T>>,
    sealer: Option<Sealer>,
    mtu: u64,
}

impl<T: AsyncRead + AsyncWrite> PipeWriter<T> {
    pub async fn send(&mut self, msg: &Message) -> Result<(), Error> {
        send_inner(&mut self.writer, self.sealer.as_mut(), msg).await
    }

    #[inline]
    pub fn mtu(&self) -> u64 {
        self.mtu
    }
}

async fn send_inner<W: AsyncWrite + Unpin>(
    writer: &mut FrameWriter<W>,
    sealer: Option<&mut Sealer>,
    msg: &Message,
) -> Result<(), Error> {
    let record = msg.encode_to_vec();
    match sealer {
        Some(sealer) => {
            let sealed = sealer.seal(&record)?;
            writer.write_frame(&sealed).await?;
        }
        None => writer.write_frame(&record).await?,
    }
    if let Some(payload) = companion_payload(msg) {
        writer.write_frame(payload).await?;
    }
    Ok(())
}

async fn recv_inner<R: AsyncRead + Unpin>(
    reader: &mut FrameReader<R>,
    opener: Option<&mut Opener>,
) -> Result<Message, Error> {
    let frame = reader.read_frame().await?;
    let mut msg = match opener {
        Some(opener) => {
            let opened = opener.open(&frame)?;
            Message::decode(&opened)?
        }
        None => Message::decode(&frame)?,
    };
    if msg.expects_plaintext_payload() {
        let payload = reader.read_frame().await?;
        msg.set_plaintext_payload(payload.into_vec());
    }
    Ok(msg)
}
