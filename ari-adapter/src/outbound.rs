//! Outbound side of a session: frame channels and the writer task.

use crate::error::AdapterError;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

/// Write handle of one stream.
///
/// Frames are queued on an unbounded channel and written in order by the
/// writer task; a send fails once the task has stopped or the stream has
/// been closed.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<String>,
    closing: Arc<Notify>,
}

/// Creates a write handle and the receiver its frames arrive on.
pub fn outbound() -> (Outbound, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let closing = Arc::new(Notify::new());
    (Outbound { tx, closing }, rx)
}

impl Outbound {
    pub fn write(&self, frame: String) -> Result<(), AdapterError> {
        self.tx.send(frame).map_err(|_| AdapterError::StreamClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Asks the writer task to write what is queued, then shut the stream
    /// down.
    pub fn close(&self) {
        self.closing.notify_one();
    }
}

/// The streams a session writes to.
#[derive(Debug, Clone)]
pub enum StreamMode {
    /// One request/reply stream carries everything.
    Single(Outbound),
    /// Legacy layout: replies on the primary stream, pushes and keepalives
    /// on both.
    Dual { primary: Outbound, notify: Outbound },
}

impl StreamMode {
    pub fn primary(&self) -> &Outbound {
        match self {
            StreamMode::Single(primary) | StreamMode::Dual { primary, .. } => primary,
        }
    }

    pub fn is_dual(&self) -> bool {
        matches!(self, StreamMode::Dual { .. })
    }

    /// Writes a reply to the primary stream.
    pub fn write_reply(&self, frame: String) -> Result<(), AdapterError> {
        self.primary().write(frame)
    }

    /// Writes a frame to every distinct stream.
    ///
    /// Every stream is attempted; the first failure is returned.
    pub fn write_all(&self, frame: String) -> Result<(), AdapterError> {
        match self {
            StreamMode::Single(primary) => primary.write(frame),
            StreamMode::Dual { primary, notify } => {
                let first = primary.write(frame.clone());
                let second = notify.write(frame);
                first.and(second)
            }
        }
    }

    /// Closes every stream.
    pub fn close(&self) {
        match self {
            StreamMode::Single(primary) => primary.close(),
            StreamMode::Dual { primary, notify } => {
                primary.close();
                notify.close();
            }
        }
    }
}

/// Spawns the task draining `rx` into `writer`.
///
/// The task ends when every sender is dropped, `out` is closed or a write
/// fails. Either way the receiver is dropped, so later sends report
/// [`AdapterError::StreamClosed`]. On a clean end the stream is shut down.
pub fn spawn_writer<W>(
    mut writer: W,
    out: &Outbound,
    mut rx: mpsc::UnboundedReceiver<String>,
    log_id: String,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let closing = Arc::clone(&out.closing);
    tokio::spawn(async move {
        let mut close_requested = false;
        loop {
            let frame = tokio::select! {
                frame = rx.recv() => frame,
                _ = closing.notified(), if !close_requested => {
                    close_requested = true;
                    // refuse new frames, keep the queued ones
                    rx.close();
                    continue;
                }
            };
            let Some(frame) = frame else { break };
            tracing::debug!("[{}] >> {}", log_id, frame.trim_end());
            if let Err(e) = writer.write_all(frame.as_bytes()).await {
                tracing::warn!("[{}] write failed: {}", log_id, e);
                return;
            }
            if let Err(e) = writer.flush().await {
                tracing::warn!("[{}] flush failed: {}", log_id, e);
                return;
            }
        }
        let _ = writer.shutdown().await;
        tracing::debug!("[{}] writer stopped", log_id);
    })
}
