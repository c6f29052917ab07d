//! Per-client delivery loop

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use super::multipart::write_part;
use crate::store::FrameStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    WaitingForFirstFrame,
    Streaming,
    Terminated,
}

/// Why a session stopped
#[derive(Debug)]
pub enum SessionEnd {
    /// The client went away
    Cancelled,
    /// Writing to the client failed
    WriteFailed(io::Error),
}

/// Serves one client: snapshot, write one part, sleep, repeat.
///
/// Each session paces itself; nothing it does can stall the capture thread
/// or another session.
pub struct StreamSession {
    store: Arc<FrameStore>,
    interval: Duration,
    cancel: CancellationToken,
    state: SessionState,
    parts_sent: u64,
}

impl StreamSession {
    pub fn new(store: Arc<FrameStore>, interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            store,
            interval,
            cancel,
            state: SessionState::WaitingForFirstFrame,
            parts_sent: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn parts_sent(&self) -> u64 {
        self.parts_sent
    }

    /// Stream until cancelled or the writer fails
    #[instrument(skip_all)]
    pub async fn run<W>(&mut self, mut writer: W) -> SessionEnd
    where
        W: AsyncWrite + Unpin,
    {
        let end = self.stream(&mut writer).await;
        self.state = SessionState::Terminated;
        debug!(parts = self.parts_sent, ?end, "session finished");
        end
    }

    async fn stream<W>(&mut self, writer: &mut W) -> SessionEnd
    where
        W: AsyncWrite + Unpin,
    {
        loop {
            if self.cancel.is_cancelled() {
                return SessionEnd::Cancelled;
            }

            let frame = match self.store.snapshot() {
                Some(frame) if frame.is_viable() => frame,
                _ => {
                    if !self.pause(self.interval / 2).await {
                        return SessionEnd::Cancelled;
                    }
                    continue;
                }
            };
            self.state = SessionState::Streaming;

            tokio::select! {
                _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
                res = write_part(writer, &frame.data) => {
                    if let Err(e) = res {
                        return SessionEnd::WriteFailed(e);
                    }
                }
            }
            self.parts_sent += 1;
            metrics::counter!("stream_parts_sent").increment(1);
            trace!(
                sequence = frame.meta.sequence,
                len = frame.len(),
                age_ms = frame.timestamp.elapsed().as_millis() as u64,
                "sent part"
            );
            drop(frame);

            if !self.pause(self.interval).await {
                return SessionEnd::Cancelled;
            }
        }
    }

    /// Sleep unless cancelled first; false means cancelled
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
