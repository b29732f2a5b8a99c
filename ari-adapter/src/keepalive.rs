//! Keepalive negotiation and the per-session keepalive timer.

use crate::outbound::StreamMode;
use ari_protocol::message::write_keepalive;
use ari_protocol::MIN_KEEPALIVE_MS;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Effective keepalive interval for a versioned peer.
///
/// The smaller of the local and peer intervals wins when both are positive,
/// the positive one when only one is. `None` disables keepalives.
pub fn negotiate(local_ms: i64, peer_hint_ms: Option<i64>) -> Option<Duration> {
    let peer_ms = peer_hint_ms.unwrap_or(0);
    let chosen = match (local_ms > 0, peer_ms > 0) {
        (true, true) => local_ms.min(peer_ms),
        (true, false) => local_ms,
        (false, true) => peer_ms,
        (false, false) => return None,
    };
    // chosen is positive here
    let chosen = chosen as u64;
    Some(Duration::from_millis(chosen.max(MIN_KEEPALIVE_MS)))
}

/// A running keepalive task. Dropping the handle stops it.
#[derive(Debug)]
pub struct KeepaliveTimer {
    period: Duration,
    task: JoinHandle<()>,
}

impl KeepaliveTimer {
    /// Starts writing keepalives to every stream of `streams`, the first one
    /// immediately. The task runs on `runtime` and stops by itself on the
    /// first failed write.
    pub fn start(runtime: &Handle, streams: StreamMode, period: Duration, log_id: String) -> Self {
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = streams.write_all(write_keepalive()) {
                    tracing::debug!("[{}] keepalive stopped: {}", log_id, e);
                    return;
                }
            }
        });
        Self { period, task }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Whether the task has stopped.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for KeepaliveTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::outbound;

    #[test]
    fn test_negotiate() {
        assert_eq!(negotiate(10_000, Some(5_000)), Some(Duration::from_millis(5_000)));
        assert_eq!(negotiate(3_000, Some(5_000)), Some(Duration::from_millis(3_000)));
        assert_eq!(negotiate(10_000, None), Some(Duration::from_millis(10_000)));
        assert_eq!(negotiate(0, Some(4_000)), Some(Duration::from_millis(4_000)));
        assert_eq!(negotiate(-1, Some(0)), None);
        assert_eq!(negotiate(0, None), None);
    }

    #[test]
    fn test_negotiate_enforces_minimum() {
        assert_eq!(negotiate(200, None), Some(Duration::from_millis(1_000)));
        assert_eq!(negotiate(10_000, Some(50)), Some(Duration::from_millis(1_000)));
    }

    #[tokio::test]
    async fn test_first_keepalive_is_immediate() {
        let (out, mut rx) = outbound();
        let timer = KeepaliveTimer::start(
            &Handle::current(),
            StreamMode::Single(out),
            Duration::from_secs(60),
            "test".to_string(),
        );
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(frame.as_deref(), Some("KEEPALIVE\n"));
        assert_eq!(timer.period(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_keepalive_repeats_on_both_streams() {
        let (primary, mut primary_rx) = outbound();
        let (notify, mut notify_rx) = outbound();
        let _timer = KeepaliveTimer::start(
            &Handle::current(),
            StreamMode::Dual { primary, notify },
            Duration::from_millis(10),
            "test".to_string(),
        );
        for _ in 0..3 {
            let p = tokio::time::timeout(Duration::from_secs(1), primary_rx.recv()).await;
            let n = tokio::time::timeout(Duration::from_secs(1), notify_rx.recv()).await;
            assert_eq!(p.unwrap().as_deref(), Some("KEEPALIVE\n"));
            assert_eq!(n.unwrap().as_deref(), Some("KEEPALIVE\n"));
        }
    }

    #[tokio::test]
    async fn test_stops_when_stream_closes() {
        let (out, rx) = outbound();
        drop(rx);
        let timer = KeepaliveTimer::start(
            &Handle::current(),
            StreamMode::Single(out),
            Duration::from_millis(10),
            "test".to_string(),
        );
        tokio::time::timeout(Duration::from_secs(1), async {
            while !timer.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_drop_cancels_task() {
        let (out, mut rx) = outbound();
        let timer = KeepaliveTimer::start(
            &Handle::current(),
            StreamMode::Single(out),
            Duration::from_millis(10),
            "test".to_string(),
        );
        drop(timer);
        // the aborted task releases the last sender, so the channel drains and ends
        let drained = tokio::time::timeout(Duration::from_secs(1), async {
            while rx.recv().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok());
    }
}
