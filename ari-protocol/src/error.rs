//! Protocol error types and exception kinds.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Protocol-level errors raised while encoding, framing or decoding messages.
///
/// Every variant is fatal for the connection that produced it: the protocol
/// has no resynchronisation mechanism.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("empty line received")]
    EmptyLine,

    #[error("unknown verb: {0}")]
    UnknownVerb(String),

    #[error("{verb}: missing token at position {position}")]
    MissingToken { verb: &'static str, position: usize },

    #[error("{verb}: {count} unexpected trailing token(s)")]
    TrailingTokens { verb: &'static str, count: usize },

    #[error("{verb}: expected type '{expected}', got {found:?}")]
    UnexpectedType {
        verb: &'static str,
        expected: char,
        found: String,
    },

    #[error("invalid integer: {0:?}")]
    InvalidInteger(String),

    #[error("invalid double: {0:?}")]
    InvalidDouble(String),

    #[error("invalid boolean: {0:?}")]
    InvalidBoolean(String),

    #[error("invalid mode character: {0:?}")]
    InvalidMode(char),

    #[error("mode set must not be empty")]
    EmptyModeSet,

    #[error("invalid percent-escape in {0:?}")]
    InvalidEscape(String),

    #[error("invalid base64 payload: {0}")]
    InvalidBase64(String),

    #[error("invalid UTF-8 in line")]
    InvalidUtf8,
}

/// Exception kinds that can be reported back to the proxy.
///
/// The wire codes are part of the protocol contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExceptionKind {
    #[default]
    Generic,
    Failure,
    Subscription,
    Access,
    Credits,
    ConflictingSession,
    Items,
    Schema,
    Notification,
    Metadata,
    Data,
}

impl ExceptionKind {
    /// Returns the wire code written after the verb.
    pub fn code(&self) -> &'static str {
        match self {
            ExceptionKind::Generic => "E",
            ExceptionKind::Failure => "EF",
            ExceptionKind::Subscription => "EU",
            ExceptionKind::Access => "EA",
            ExceptionKind::Credits => "EC",
            ExceptionKind::ConflictingSession => "EX",
            ExceptionKind::Items => "EI",
            ExceptionKind::Schema => "ES",
            ExceptionKind::Notification => "EN",
            ExceptionKind::Metadata => "EM",
            ExceptionKind::Data => "ED",
        }
    }

    /// Maps an exception name to its kind.
    ///
    /// Unknown or absent names fall back to [`ExceptionKind::Generic`].
    pub fn from_name(name: Option<&str>) -> Self {
        match name {
            Some("failure") => ExceptionKind::Failure,
            Some("subscription") => ExceptionKind::Subscription,
            Some("access") => ExceptionKind::Access,
            Some("credits") => ExceptionKind::Credits,
            Some("conflictingSession") => ExceptionKind::ConflictingSession,
            Some("items") => ExceptionKind::Items,
            Some("schema") => ExceptionKind::Schema,
            Some("notification") => ExceptionKind::Notification,
            Some("metadata") => ExceptionKind::Metadata,
            Some("data") => ExceptionKind::Data,
            _ => ExceptionKind::Generic,
        }
    }

    /// Whether the kind carries client code and client message fields.
    pub fn carries_client_info(&self) -> bool {
        matches!(
            self,
            ExceptionKind::Credits | ExceptionKind::ConflictingSession
        )
    }
}

impl FromStr for ExceptionKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_name(Some(s)))
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExceptionKind::Generic => "generic",
            ExceptionKind::Failure => "failure",
            ExceptionKind::Subscription => "subscription",
            ExceptionKind::Access => "access",
            ExceptionKind::Credits => "credits",
            ExceptionKind::ConflictingSession => "conflictingSession",
            ExceptionKind::Items => "items",
            ExceptionKind::Schema => "schema",
            ExceptionKind::Notification => "notification",
            ExceptionKind::Metadata => "metadata",
            ExceptionKind::Data => "data",
        };
        f.write_str(name)
    }
}

/// An application-level exception to be written as a reply.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Exception {
    pub kind: ExceptionKind,
    pub message: Option<String>,
    /// Client-visible error code (credits and conflicting-session kinds).
    pub client_code: Option<i64>,
    /// Client-visible message (credits and conflicting-session kinds).
    pub client_message: Option<String>,
    /// Session that conflicts with the new one (conflicting-session kind).
    pub conflicting_session: Option<String>,
}

impl Exception {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// A generic exception with the given message.
    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Generic, message)
    }

    pub fn with_client_info(mut self, code: i64, message: impl Into<String>) -> Self {
        self.client_code = Some(code);
        self.client_message = Some(message.into());
        self
    }

    pub fn with_conflicting_session(mut self, session: impl Into<String>) -> Self {
        self.conflicting_session = Some(session.into());
        self
    }
}
