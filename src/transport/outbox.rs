//! Outbound frame queue
//!
//! Frames are written a piece at a time from the sync loop's `select!`,
//! alongside the frame read. A peer that is itself blocked writing to us
//! keeps getting drained while our own large frame goes out.

use std::collections::VecDeque;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{protocol, Result, TransportError};

/// Encoded frames waiting to be written to the peer.
#[derive(Debug, Default)]
pub struct Outbox {
    frames: VecDeque<Vec<u8>>,
    // Bytes of the front frame already written.
    offset: usize,
    unflushed: bool,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one payload as a netstring frame.
    pub fn push(&mut self, payload: &[u8]) {
        self.frames.push_back(protocol::encode(payload));
    }

    pub fn push_goodbye(&mut self) {
        self.frames.push_back(protocol::GOODBYE.to_vec());
    }

    /// Nothing left to write or flush.
    pub fn is_idle(&self) -> bool {
        self.frames.is_empty() && !self.unflushed
    }

    /// Frames not yet completely written.
    pub fn pending_frames(&self) -> usize {
        self.frames.len()
    }

    /// Perform a single write, or a flush once every frame is written.
    ///
    /// Cancel safe: the queue only advances after the write completes, so
    /// the future may lose a `select!` race and be created again.
    pub async fn drive<W>(&mut self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let Some(frame) = self.frames.front() else {
            writer.flush().await?;
            self.unflushed = false;
            return Ok(());
        };

        let n = writer.write(&frame[self.offset..]).await?;
        if n == 0 {
            return Err(TransportError::Io(std::io::ErrorKind::WriteZero.into()));
        }
        self.offset += n;
        if self.offset == frame.len() {
            self.frames.pop_front();
            self.offset = 0;
            self.unflushed = true;
        }
        Ok(())
    }

    /// Write and flush everything queued.
    pub async fn drain<W>(&mut self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        while !self.is_idle() {
            self.drive(writer).await?;
        }
        Ok(())
    }
}
