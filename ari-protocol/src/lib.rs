//! # ari-protocol
//!
//! Wire protocol implementation for the ARI remote adapter protocol.
//!
//! This crate provides:
//! - Typed field codec over the pipe-delimited, percent-escaped line format
//! - Line framing with carry-over across chunks
//! - Data-provider and metadata-provider verb sets
//! - The shared envelope: init, close, keepalive and credentials handshake

pub mod codec;
pub mod data;
pub mod error;
pub mod frame;
pub mod message;
pub mod metadata;

pub use codec::{MessageBuilder, ModeSet, TokenReader};
pub use data::{DataFamily, DataMessage, DataRequest, DiffAlgorithm, FieldValue};
pub use error::{Exception, ExceptionKind, ProtocolError};
pub use frame::{Family, LineFramer};
pub use message::{CloseRequest, InitRequest, Message};
pub use metadata::{
    GetItemDataRequest, GetItemsRequest, GetSchemaRequest, GetUserItemDataRequest, ItemData,
    MetadataFamily, MetadataMessage, MetadataRequest, MetadataVerb, MpnDevice,
    MpnDeviceAccessRequest, MpnDeviceTokenChangeRequest, MpnSubscriptionActivationRequest,
    MpnSubscriptionInfo, NotifyNewSessionRequest, NotifyNewTablesRequest,
    NotifySessionCloseRequest, NotifyTablesCloseRequest, NotifyUserMessageRequest,
    NotifyUserRequest, ReplyPayload, TableInfo, UserAuthorization, UserItemData,
};

/// Protocol version advertised in init replies.
pub const PROTOCOL_VERSION: &str = "1.8.2";

/// Smallest keepalive interval ever armed, in milliseconds.
pub const MIN_KEEPALIVE_MS: u64 = 1000;

/// Keepalive interval imposed on peers that skip the init handshake.
pub const STRICT_KEEPALIVE_MS: u64 = 1000;

/// Keepalive interval used when nothing is configured.
pub const DEFAULT_KEEPALIVE_MS: i64 = 10_000;
