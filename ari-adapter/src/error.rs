//! Adapter error types.

use thiserror::Error;

/// Adapter errors.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ari_protocol::ProtocolError),

    #[error("{0} received before init")]
    UnexpectedBeforeInit(&'static str),

    #[error("init received twice")]
    DuplicateInit,

    #[error("response already resolved")]
    AlreadyResolved,

    #[error("item not subscribed: {0}")]
    ItemNotSubscribed(String),

    #[error("missing handler: {0}")]
    MissingHandler(&'static str),

    #[error("stream closed")]
    StreamClosed,

    #[error("connect timeout")]
    Timeout,

    #[error("closed by peer: {0}")]
    PeerClosed(String),

    #[error("session closed")]
    SessionClosed,

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),
}

impl AdapterError {
    /// Returns whether the error terminates the session.
    ///
    /// Usage faults are raised to the caller of the offending API and leave
    /// the session untouched.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            AdapterError::AlreadyResolved
                | AdapterError::ItemNotSubscribed(_)
                | AdapterError::MissingHandler(_)
        )
    }
}
