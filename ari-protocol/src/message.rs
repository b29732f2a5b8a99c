//! Envelope shared by both verb families: init, close, keepalive and the
//! credentials handshake.

use crate::codec::{MessageBuilder, TokenReader};
use crate::error::{Exception, ProtocolError};
use crate::PROTOCOL_VERSION;
use std::collections::HashMap;

/// Verb of the keepalive frame, sent and received without an id.
pub const KEEPALIVE: &str = "KEEPALIVE";

/// Verb of the close frame.
pub const CLOSE: &str = "CLOSE";

/// Verb of the credentials handshake frame.
pub const REMOTE_CREDENTIALS: &str = "RAC";

/// Fixed id of the credentials handshake frame.
pub const REMOTE_CREDENTIALS_ID: &str = "1";

/// Init parameter carrying the requested protocol version.
pub const VERSION_KEY: &str = "ARI.version";

/// Init parameter carrying the peer keepalive hint, in milliseconds.
pub const KEEPALIVE_HINTS_KEY: &str = "keepalive.hints";

/// Close parameter carrying the reason.
pub const CLOSE_REASON_KEY: &str = "reason";

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message<B> {
    /// Correlation id chosen by the peer, echoed verbatim in the reply.
    pub id: String,
    pub body: B,
}

impl<B> Message<B> {
    pub fn new(id: impl Into<String>, body: B) -> Self {
        Self {
            id: id.into(),
            body,
        }
    }
}

/// First two tokens of a line.
pub(crate) enum Head<'a> {
    Keepalive,
    Request {
        id: &'a str,
        verb: &'a str,
        tail: &'a [&'a str],
    },
}

pub(crate) fn split_head<'a>(tokens: &'a [&'a str]) -> Result<Head<'a>, ProtocolError> {
    match tokens {
        [] | [""] => Err(ProtocolError::EmptyLine),
        [KEEPALIVE] => Ok(Head::Keepalive),
        [_] => Err(ProtocolError::MissingToken {
            verb: "<envelope>",
            position: 1,
        }),
        [id, verb, tail @ ..] => Ok(Head::Request {
            id: *id,
            verb: *verb,
            tail,
        }),
    }
}

/// Init request, common to both families.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitRequest {
    /// Protocol version requested by the peer; absent on legacy peers.
    pub requested_version: Option<String>,
    /// Keepalive interval hinted by the peer, in milliseconds.
    pub keepalive_hint_ms: Option<i64>,
    /// Adapter parameters, with the protocol keys removed.
    pub params: HashMap<String, Option<String>>,
}

impl InitRequest {
    pub(crate) fn read(reader: &mut TokenReader<'_>) -> Result<Self, ProtocolError> {
        let mut params = reader.map()?;
        let requested_version = params.remove(VERSION_KEY).flatten();
        let keepalive_hint_ms = match params.remove(KEEPALIVE_HINTS_KEY).flatten() {
            Some(hint) => Some(
                hint.parse()
                    .map_err(|_| ProtocolError::InvalidInteger(hint.clone()))?,
            ),
            None => None,
        };
        Ok(Self {
            requested_version,
            keepalive_hint_ms,
            params,
        })
    }

    /// Whether the peer speaks a protocol version with the init handshake.
    pub fn is_legacy(&self) -> bool {
        self.requested_version.is_none()
    }
}

/// Close request, common to both families.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CloseRequest {
    pub reason: Option<String>,
}

impl CloseRequest {
    pub(crate) fn read(reader: &mut TokenReader<'_>) -> Result<Self, ProtocolError> {
        let mut params = reader.map()?;
        Ok(Self {
            reason: params.remove(CLOSE_REASON_KEY).flatten(),
        })
    }
}

/// Reply to an init request, advertising the supported version.
pub fn write_init_reply(id: &str, verb: &str) -> String {
    MessageBuilder::new(id, verb)
        .string(Some(VERSION_KEY))
        .string(Some(PROTOCOL_VERSION))
        .build()
}

/// Empty success reply.
pub fn write_void_reply(id: &str, verb: &str) -> String {
    MessageBuilder::new(id, verb).void().build()
}

/// Exception reply for any verb.
pub fn write_exception(id: &str, verb: &str, exception: &Exception) -> String {
    MessageBuilder::new(id, verb).exception(exception).build()
}

pub fn write_keepalive() -> String {
    format!("{}\n", KEEPALIVE)
}

/// Credentials frame written as soon as a stream is attached.
pub fn write_remote_credentials(
    user: Option<&str>,
    password: Option<&str>,
    sdk_name: &str,
) -> String {
    let mut builder = MessageBuilder::new(REMOTE_CREDENTIALS_ID, REMOTE_CREDENTIALS);
    if let Some(user) = user {
        builder = builder.string(Some("user")).string(Some(user));
    }
    if let Some(password) = password {
        builder = builder.string(Some("password")).string(Some(password));
    }
    builder
        .string(Some("enableClosePacket"))
        .string(Some("true"))
        .string(Some("SDK"))
        .string(Some(sdk_name))
        .build()
}
