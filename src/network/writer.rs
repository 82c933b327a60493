//! Serialized write path
//!
//! The receive path and the heartbeat task both send frames. Every frame
//! goes out under one lock so two writers never interleave bytes.

use bytes::BytesMut;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use super::connection::ConnectionResult;
use crate::protocol::{encode_frame, FrameType, HEADER_SIZE, HEARTBEAT_PAYLOAD};

/// Write half of a transport
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Cloneable handle onto the single write path of a connection
#[derive(Clone)]
pub struct FrameWriter {
    inner: Arc<Mutex<BoxedWriter>>,
    frames_sent: Arc<AtomicU64>,
    bytes_sent: Arc<AtomicU64>,
}

impl FrameWriter {
    pub fn new(writer: BoxedWriter) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
            frames_sent: Arc::new(AtomicU64::new(0)),
            bytes_sent: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Encode and write one frame, returning the bytes written
    pub async fn send(&self, frame_type: u8, payload: &[u8]) -> ConnectionResult<usize> {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        encode_frame(frame_type, payload, &mut buf)?;

        {
            let mut writer = self.inner.lock().await;
            writer.write_all(&buf).await?;
            writer.flush().await?;
        }

        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(buf.len() as u64, Ordering::Relaxed);
        tracing::trace!("Sent frame {:#04x} ({} bytes)", frame_type, buf.len());

        Ok(buf.len())
    }

    pub async fn send_heartbeat(&self) -> ConnectionResult<usize> {
        self.send(FrameType::Heartbeat.as_byte(), &HEARTBEAT_PAYLOAD).await
    }

    /// Shut down the write direction of the transport
    pub async fn shutdown(&self) -> ConnectionResult<()> {
        let mut writer = self.inner.lock().await;
        writer.shutdown().await?;
        Ok(())
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }
}
