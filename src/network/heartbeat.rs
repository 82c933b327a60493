//! Heartbeat keepalive
//!
//! Sends a heartbeat frame, waits one interval, repeats. A failed send ends
//! the task for good and reports the connection as lost. `stop()` wakes the
//! wait immediately.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::connection::{DisconnectReason, LostSignal};
use super::writer::FrameWriter;

/// Handle to a running heartbeat task
pub struct Heartbeat {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl Heartbeat {
    /// Start the keepalive loop on the current runtime
    pub fn spawn(writer: FrameWriter, interval: Duration, lost: LostSignal) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                // A write stuck on a full transport must not outlive stop()
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    result = writer.send_heartbeat() => {
                        if let Err(e) = result {
                            tracing::warn!("Heartbeat failed, connection lost: {}", e);
                            lost.notify(DisconnectReason::HeartbeatFailed(e.to_string()));
                            break;
                        }
                    }
                }

                tokio::select! {
                    biased;
                    // Err means the handle was dropped
                    _ = shutdown_rx.changed() => {}
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            tracing::debug!("Heartbeat task exited");
        });

        Self {
            shutdown_tx,
            task: Some(task),
        }
    }

    /// Request the task to stop. Safe to call any number of times.
    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Whether the task is still running
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the task and wait for it to exit
    pub async fn shutdown(&mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Heartbeat task ended abnormally: {}", e);
            }
        }
    }

    /// Stop the task and wait at most `grace` for it, aborting it after that
    pub async fn shutdown_timeout(&mut self, grace: Duration) {
        self.stop();
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(grace, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("Heartbeat task ended abnormally: {}", e),
                Err(_) => {
                    tracing::warn!("Heartbeat task did not stop within {:?}, aborting", grace);
                    task.abort();
                }
            }
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Decoder, FrameType};
    use std::time::Instant;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_heartbeat_cadence_and_stop() {
        let (client, mut server) = tokio::io::duplex(1024);
        let lost = LostSignal::new();
        let writer = FrameWriter::new(Box::new(client));
        let mut heartbeat =
            Heartbeat::spawn(writer.clone(), Duration::from_millis(50), lost.clone());

        let mut decoder = Decoder::new();
        let mut frames = Vec::new();
        let mut buf = [0u8; 64];
        while frames.len() < 3 {
            let n = tokio::time::timeout(Duration::from_secs(1), server.read(&mut buf))
                .await
                .expect("heartbeat within one interval")
                .unwrap();
            frames.extend(decoder.push(&buf[..n]));
        }
        for frame in &frames {
            assert_eq!(frame.kind(), Some(FrameType::Heartbeat));
            assert_eq!(frame.payload.as_ref(), &[0x00, 0x00]);
        }

        let started = Instant::now();
        heartbeat.shutdown().await;
        assert!(started.elapsed() < Duration::from_millis(50));
        assert!(!heartbeat.is_running());

        let sent = writer.frames_sent();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(writer.frames_sent(), sent);
        assert!(lost.reason().is_none());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_prompt() {
        let (client, _server) = tokio::io::duplex(1024);
        let mut heartbeat = Heartbeat::spawn(
            FrameWriter::new(Box::new(client)),
            Duration::from_secs(5),
            LostSignal::new(),
        );

        heartbeat.stop();
        heartbeat.stop();

        let started = Instant::now();
        heartbeat.shutdown().await;
        heartbeat.shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_stop_interrupts_blocked_write() {
        // Room for one heartbeat; the peer never reads
        let (client, _server) = tokio::io::duplex(8);
        let writer = FrameWriter::new(Box::new(client));
        let lost = LostSignal::new();
        let mut heartbeat =
            Heartbeat::spawn(writer.clone(), Duration::from_millis(5), lost.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(writer.frames_sent(), 1);
        assert!(heartbeat.is_running());

        tokio::time::timeout(Duration::from_secs(1), heartbeat.shutdown())
            .await
            .expect("stop() should interrupt the pending write");
        assert!(!heartbeat.is_running());
        assert!(lost.reason().is_none());

        // The write lock is free again
        tokio::time::timeout(Duration::from_secs(1), writer.shutdown())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_timeout_stops_task() {
        let (client, _server) = tokio::io::duplex(8);
        let mut heartbeat = Heartbeat::spawn(
            FrameWriter::new(Box::new(client)),
            Duration::from_millis(5),
            LostSignal::new(),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        let started = Instant::now();
        heartbeat.shutdown_timeout(Duration::from_millis(100)).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        heartbeat.shutdown_timeout(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn test_send_failure_reports_loss() {
        let (client, server) = tokio::io::duplex(1024);
        drop(server);

        let lost = LostSignal::new();
        let mut rx = lost.subscribe();
        let mut heartbeat = Heartbeat::spawn(
            FrameWriter::new(Box::new(client)),
            Duration::from_millis(10),
            lost.clone(),
        );

        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            lost.reason(),
            Some(DisconnectReason::HeartbeatFailed(_))
        ));

        heartbeat.shutdown().await;
        assert!(!heartbeat.is_running());
    }
}
