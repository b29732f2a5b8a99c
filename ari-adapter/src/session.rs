//! State shared by both provider sessions: lifecycle phase, init handshake,
//! keepalive timer and the streams.

use crate::config::SessionConfig;
use crate::error::AdapterError;
use crate::keepalive::{negotiate, KeepaliveTimer};
use crate::outbound::StreamMode;
use crate::response::Response;
use ari_protocol::message::{write_exception, write_init_reply, write_remote_credentials};
use ari_protocol::{InitRequest, STRICT_KEEPALIVE_MS};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use uuid::Uuid;

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the init request.
    AwaitingInit,
    /// Init received; every verb is accepted.
    Operational,
    /// Terminal.
    Closed,
}

struct CoreState {
    phase: Phase,
    keepalive: Option<KeepaliveTimer>,
}

pub(crate) struct SessionCore {
    pub(crate) log_id: String,
    pub(crate) streams: StreamMode,
    pub(crate) config: SessionConfig,
    // keepalives are spawned here, whichever thread resolves the init
    runtime: Option<Handle>,
    state: Mutex<CoreState>,
}

impl SessionCore {
    pub(crate) fn new(streams: StreamMode, config: SessionConfig) -> Self {
        Self {
            log_id: Uuid::new_v4().to_string(),
            streams,
            config,
            runtime: Handle::try_current().ok(),
            state: Mutex::new(CoreState {
                phase: Phase::AwaitingInit,
                keepalive: None,
            }),
        }
    }

    /// Writes the credentials handshake on every stream.
    pub(crate) fn send_credentials(&self) -> Result<(), AdapterError> {
        let frame = write_remote_credentials(
            self.config.user.as_deref(),
            self.config.password.as_deref(),
            &self.config.sdk_name,
        );
        self.write_all(frame)
    }

    /// Writes a reply to the primary stream. A failed write stops the
    /// keepalive timer.
    pub(crate) fn write_reply(&self, frame: String) -> Result<(), AdapterError> {
        let result = self.streams.write_reply(frame);
        if result.is_err() {
            self.stop_keepalive();
        }
        result
    }

    /// Writes a frame to every stream. A failed write stops the keepalive
    /// timer.
    pub(crate) fn write_all(&self, frame: String) -> Result<(), AdapterError> {
        let result = self.streams.write_all(frame);
        if result.is_err() {
            self.stop_keepalive();
        }
        result
    }

    fn stop_keepalive(&self) {
        let timer = self.state.lock().keepalive.take();
        if timer.is_some() {
            tracing::debug!("[{}] stream gone, keepalive stopped", self.log_id);
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    pub(crate) fn ensure_open(&self) -> Result<(), AdapterError> {
        match self.phase() {
            Phase::Closed => Err(AdapterError::SessionClosed),
            _ => Ok(()),
        }
    }

    /// Admits a non-init request.
    pub(crate) fn check_operational(&self, verb: &'static str) -> Result<(), AdapterError> {
        match self.phase() {
            Phase::Operational => Ok(()),
            Phase::AwaitingInit => Err(AdapterError::UnexpectedBeforeInit(verb)),
            Phase::Closed => Err(AdapterError::SessionClosed),
        }
    }

    /// Admits the init request and moves to [`Phase::Operational`].
    ///
    /// Peers without a protocol version get keepalives right away, at the
    /// strict interval.
    pub(crate) fn begin_init(&self, init: &InitRequest) -> Result<(), AdapterError> {
        {
            let mut state = self.state.lock();
            match state.phase {
                Phase::AwaitingInit => state.phase = Phase::Operational,
                Phase::Operational => return Err(AdapterError::DuplicateInit),
                Phase::Closed => return Err(AdapterError::SessionClosed),
            }
        }
        if init.is_legacy() {
            tracing::info!("[{}] peer sent no protocol version, legacy mode", self.log_id);
            self.arm_keepalive(Some(Duration::from_millis(STRICT_KEEPALIVE_MS)));
        }
        Ok(())
    }

    /// Response for the init request of verb `verb`.
    ///
    /// On success a versioned peer gets the init reply and keepalives start at
    /// the negotiated interval; a legacy peer gets nothing. Errors are always
    /// written.
    pub(crate) fn init_response(
        self: &Arc<Self>,
        id: String,
        verb: &'static str,
        init: &InitRequest,
    ) -> Response<()> {
        let core = Arc::clone(self);
        let legacy = init.is_legacy();
        let hint = init.keepalive_hint_ms;
        Response::new(move |outcome| {
            core.ensure_open()?;
            match outcome {
                Ok(()) if legacy => Ok(()),
                Ok(()) => {
                    core.write_reply(write_init_reply(&id, verb))?;
                    core.arm_keepalive(negotiate(core.config.keepalive_ms, hint));
                    Ok(())
                }
                Err(exception) => core.write_reply(write_exception(&id, verb, &exception)),
            }
        })
    }

    fn arm_keepalive(&self, period: Option<Duration>) {
        let runtime = self.runtime.clone().or_else(|| Handle::try_current().ok());
        let previous = {
            let mut state = self.state.lock();
            if state.phase == Phase::Closed {
                return;
            }
            match (period, runtime) {
                (Some(period), Some(runtime)) => {
                    tracing::info!(
                        "[{}] keepalive every {} ms",
                        self.log_id,
                        period.as_millis()
                    );
                    let timer = KeepaliveTimer::start(
                        &runtime,
                        self.streams.clone(),
                        period,
                        self.log_id.clone(),
                    );
                    state.keepalive.replace(timer)
                }
                (Some(_), None) => {
                    tracing::warn!("[{}] no runtime, keepalive not started", self.log_id);
                    state.keepalive.take()
                }
                (None, _) => {
                    tracing::info!("[{}] keepalive disabled", self.log_id);
                    state.keepalive.take()
                }
            }
        };
        drop(previous);
    }

    /// Handles a close request from the peer.
    pub(crate) fn close_by_peer(&self, reason: Option<String>) -> AdapterError {
        let reason = reason.unwrap_or_else(|| "close requested by peer".to_string());
        tracing::warn!("[{}] closed by peer: {}", self.log_id, reason);
        self.shutdown();
        AdapterError::PeerClosed(reason)
    }

    /// Moves to [`Phase::Closed`], stops the keepalive timer and closes the
    /// streams once their queued frames are written.
    pub(crate) fn shutdown(&self) {
        let timer = {
            let mut state = self.state.lock();
            if state.phase == Phase::Closed {
                return;
            }
            state.phase = Phase::Closed;
            state.keepalive.take()
        };
        drop(timer);
        self.streams.close();
        tracing::info!("[{}] session closed", self.log_id);
    }

    pub(crate) fn keepalive_period(&self) -> Option<Duration> {
        self.state.lock().keepalive.as_ref().map(KeepaliveTimer::period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::outbound;
    use ari_protocol::Exception;
    use std::collections::HashMap;

    fn versioned_init(hint: Option<i64>) -> InitRequest {
        InitRequest {
            requested_version: Some("1.8.2".to_string()),
            keepalive_hint_ms: hint,
            params: HashMap::new(),
        }
    }

    fn new_core(keepalive_ms: i64) -> (Arc<SessionCore>, tokio::sync::mpsc::UnboundedReceiver<String>) {
        let (out, rx) = outbound();
        let config = SessionConfig {
            keepalive_ms,
            ..Default::default()
        };
        (Arc::new(SessionCore::new(StreamMode::Single(out), config)), rx)
    }

    #[test]
    fn test_phases() {
        let (core, _rx) = new_core(0);
        assert_eq!(core.phase(), Phase::AwaitingInit);
        assert!(matches!(
            core.check_operational("SUB"),
            Err(AdapterError::UnexpectedBeforeInit("SUB"))
        ));

        core.begin_init(&versioned_init(None)).unwrap();
        assert_eq!(core.phase(), Phase::Operational);
        assert!(core.check_operational("SUB").is_ok());
        assert!(matches!(
            core.begin_init(&versioned_init(None)),
            Err(AdapterError::DuplicateInit)
        ));

        core.shutdown();
        assert!(matches!(
            core.check_operational("SUB"),
            Err(AdapterError::SessionClosed)
        ));
        assert!(matches!(core.ensure_open(), Err(AdapterError::SessionClosed)));
    }

    #[test]
    fn test_credentials_frame() {
        let (out, mut rx) = outbound();
        let config = SessionConfig {
            user: Some("adapter".to_string()),
            password: None,
            ..Default::default()
        };
        let core = SessionCore::new(StreamMode::Single(out), config);
        core.send_credentials().unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            "1|RAC|S|user|S|adapter|S|enableClosePacket|S|true|S|SDK|S|Rust+Adapter+SDK\n"
        );
    }

    #[test]
    fn test_versioned_init_reply_without_keepalive() {
        let (core, mut rx) = new_core(0);
        let init = versioned_init(None);
        core.begin_init(&init).unwrap();
        core.init_response("7".to_string(), "MPI", &init)
            .success(())
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), "7|MPI|S|ARI.version|S|1.8.2\n");
        assert_eq!(core.keepalive_period(), None);
    }

    #[tokio::test]
    async fn test_versioned_init_arms_negotiated_keepalive() {
        let (core, _rx) = new_core(10_000);
        let init = versioned_init(Some(4_000));
        core.begin_init(&init).unwrap();
        core.init_response("1".to_string(), "DPI", &init)
            .success(())
            .unwrap();
        assert_eq!(core.keepalive_period(), Some(Duration::from_millis(4_000)));

        core.shutdown();
        assert_eq!(core.keepalive_period(), None);
    }

    #[tokio::test]
    async fn test_legacy_init_is_silent_with_strict_keepalive() {
        let (core, mut rx) = new_core(60_000);
        let init = InitRequest::default();
        core.begin_init(&init).unwrap();
        assert_eq!(
            core.keepalive_period(),
            Some(Duration::from_millis(STRICT_KEEPALIVE_MS))
        );

        core.init_response("1".to_string(), "DPI", &init)
            .success(())
            .unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        // only the keepalive, no init reply
        assert_eq!(frame.as_deref(), Some("KEEPALIVE\n"));
    }

    #[test]
    fn test_init_error_is_written() {
        let (core, mut rx) = new_core(0);
        let init = InitRequest::default();
        core.init_response("1".to_string(), "MPI", &init)
            .error(Exception::generic("bad params"))
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), "1|MPI|E|bad+params\n");
    }

    #[test]
    fn test_close_by_peer() {
        let (core, _rx) = new_core(0);
        let err = core.close_by_peer(Some("keepalive timeout".to_string()));
        assert!(matches!(err, AdapterError::PeerClosed(ref r) if r == "keepalive timeout"));
        assert_eq!(core.phase(), Phase::Closed);

        let (core, _rx) = new_core(0);
        let err = core.close_by_peer(None);
        assert!(err.to_string().contains("close requested by peer"));
    }
}
