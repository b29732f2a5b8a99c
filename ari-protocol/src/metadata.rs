//! Metadata-provider verb family.

use crate::codec::{MessageBuilder, ModeSet, TokenReader};
use crate::error::{Exception, ProtocolError};
use crate::frame::Family;
use crate::message::{self, split_head, CloseRequest, Head, InitRequest, Message, CLOSE};
use std::collections::HashMap;

/// Verbs of the metadata family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataVerb {
    Init,
    GetItemData,
    GetUserItemData,
    GetSchema,
    GetItems,
    NotifyUser,
    NotifyUserAuth,
    NotifyUserMessage,
    NotifyNewSession,
    NotifySessionClose,
    NotifyNewTables,
    NotifyTablesClose,
    NotifyMpnDeviceAccess,
    NotifyMpnSubscriptionActivation,
    NotifyMpnDeviceTokenChange,
}

impl MetadataVerb {
    const ALL: [MetadataVerb; 15] = [
        MetadataVerb::Init,
        MetadataVerb::GetItemData,
        MetadataVerb::GetUserItemData,
        MetadataVerb::GetSchema,
        MetadataVerb::GetItems,
        MetadataVerb::NotifyUser,
        MetadataVerb::NotifyUserAuth,
        MetadataVerb::NotifyUserMessage,
        MetadataVerb::NotifyNewSession,
        MetadataVerb::NotifySessionClose,
        MetadataVerb::NotifyNewTables,
        MetadataVerb::NotifyTablesClose,
        MetadataVerb::NotifyMpnDeviceAccess,
        MetadataVerb::NotifyMpnSubscriptionActivation,
        MetadataVerb::NotifyMpnDeviceTokenChange,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            MetadataVerb::Init => "MPI",
            MetadataVerb::GetItemData => "GIT",
            MetadataVerb::GetUserItemData => "GUI",
            MetadataVerb::GetSchema => "GSC",
            MetadataVerb::GetItems => "GIS",
            MetadataVerb::NotifyUser => "NUS",
            MetadataVerb::NotifyUserAuth => "NUA",
            MetadataVerb::NotifyUserMessage => "NUM",
            MetadataVerb::NotifyNewSession => "NNS",
            MetadataVerb::NotifySessionClose => "NSC",
            MetadataVerb::NotifyNewTables => "NNT",
            MetadataVerb::NotifyTablesClose => "NTC",
            MetadataVerb::NotifyMpnDeviceAccess => "MDA",
            MetadataVerb::NotifyMpnSubscriptionActivation => "MSA",
            MetadataVerb::NotifyMpnDeviceTokenChange => "MDC",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|verb| verb.code() == code)
    }
}

/// One table block of `NNT`, `NTC` and `MSA`.
#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    pub win_index: i64,
    pub modes: ModeSet,
    pub group: String,
    pub data_adapter: Option<String>,
    pub schema: String,
    pub first_item_index: i64,
    pub last_item_index: i64,
    pub selector: Option<String>,
}

impl TableInfo {
    /// Tokens per block: eight typed fields.
    pub const TOKENS: usize = 16;

    fn read(reader: &mut TokenReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            win_index: required_integer(reader)?,
            modes: reader.mode()?,
            group: reader.text()?,
            data_adapter: reader.string()?,
            schema: reader.text()?,
            first_item_index: required_integer(reader)?,
            last_item_index: required_integer(reader)?,
            selector: reader.string()?,
        })
    }

    fn read_all(reader: &mut TokenReader<'_>) -> Result<Vec<Self>, ProtocolError> {
        let mut tables = Vec::with_capacity(reader.remaining() / Self::TOKENS);
        while !reader.is_empty() {
            tables.push(Self::read(reader)?);
        }
        Ok(tables)
    }
}

fn required_integer(reader: &mut TokenReader<'_>) -> Result<i64, ProtocolError> {
    reader
        .integer()?
        .ok_or_else(|| ProtocolError::InvalidInteger(crate::codec::NULL_MARKER.to_string()))
}

/// A push-notification device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MpnDevice {
    pub platform: String,
    pub application_id: String,
    pub device_token: String,
}

impl MpnDevice {
    fn read(reader: &mut TokenReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            platform: reader.text()?,
            application_id: reader.text()?,
            device_token: reader.text()?,
        })
    }
}

/// Push-notification subscription attached to an `MSA` request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MpnSubscriptionInfo {
    pub device: MpnDevice,
    pub trigger: Option<String>,
    pub notification_format: String,
}

/// `GIT` request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetItemDataRequest {
    pub items: Vec<String>,
}

/// `GUI` request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetUserItemDataRequest {
    pub user: Option<String>,
    pub items: Vec<String>,
}

/// `GSC` request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetSchemaRequest {
    pub user: Option<String>,
    pub group: String,
    pub schema: String,
    pub session: String,
}

/// `GIS` request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetItemsRequest {
    pub user: Option<String>,
    pub group: String,
    pub session: String,
}

/// `NUS` and `NUA` request; only `NUA` carries a client principal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotifyUserRequest {
    pub user: Option<String>,
    pub password: Option<String>,
    pub client_principal: Option<String>,
    pub headers: HashMap<String, Option<String>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotifyUserMessageRequest {
    pub user: Option<String>,
    pub session: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotifyNewSessionRequest {
    pub user: Option<String>,
    pub session: String,
    pub context: HashMap<String, Option<String>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotifySessionCloseRequest {
    pub session: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotifyNewTablesRequest {
    pub user: Option<String>,
    pub session: String,
    pub tables: Vec<TableInfo>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotifyTablesCloseRequest {
    pub session: String,
    pub tables: Vec<TableInfo>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MpnDeviceAccessRequest {
    pub user: Option<String>,
    pub session: String,
    pub device: MpnDevice,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MpnSubscriptionActivationRequest {
    pub user: Option<String>,
    pub session: String,
    pub table: TableInfo,
    pub subscription: MpnSubscriptionInfo,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MpnDeviceTokenChangeRequest {
    pub user: Option<String>,
    pub session: String,
    pub device: MpnDevice,
    pub new_device_token: String,
}

/// Inbound metadata-provider requests.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataRequest {
    Init(InitRequest),
    GetItemData(GetItemDataRequest),
    GetUserItemData(GetUserItemDataRequest),
    GetSchema(GetSchemaRequest),
    GetItems(GetItemsRequest),
    NotifyUser(NotifyUserRequest),
    NotifyUserAuth(NotifyUserRequest),
    NotifyUserMessage(NotifyUserMessageRequest),
    NotifyNewSession(NotifyNewSessionRequest),
    NotifySessionClose(NotifySessionCloseRequest),
    NotifyNewTables(NotifyNewTablesRequest),
    NotifyTablesClose(NotifyTablesCloseRequest),
    NotifyMpnDeviceAccess(MpnDeviceAccessRequest),
    NotifyMpnSubscriptionActivation(MpnSubscriptionActivationRequest),
    NotifyMpnDeviceTokenChange(MpnDeviceTokenChangeRequest),
    Close(CloseRequest),
    Keepalive,
}

impl MetadataRequest {
    /// Verb of the request; `None` for the envelope-only close and keepalive.
    pub fn verb(&self) -> Option<MetadataVerb> {
        let verb = match self {
            MetadataRequest::Init(_) => MetadataVerb::Init,
            MetadataRequest::GetItemData(_) => MetadataVerb::GetItemData,
            MetadataRequest::GetUserItemData(_) => MetadataVerb::GetUserItemData,
            MetadataRequest::GetSchema(_) => MetadataVerb::GetSchema,
            MetadataRequest::GetItems(_) => MetadataVerb::GetItems,
            MetadataRequest::NotifyUser(_) => MetadataVerb::NotifyUser,
            MetadataRequest::NotifyUserAuth(_) => MetadataVerb::NotifyUserAuth,
            MetadataRequest::NotifyUserMessage(_) => MetadataVerb::NotifyUserMessage,
            MetadataRequest::NotifyNewSession(_) => MetadataVerb::NotifyNewSession,
            MetadataRequest::NotifySessionClose(_) => MetadataVerb::NotifySessionClose,
            MetadataRequest::NotifyNewTables(_) => MetadataVerb::NotifyNewTables,
            MetadataRequest::NotifyTablesClose(_) => MetadataVerb::NotifyTablesClose,
            MetadataRequest::NotifyMpnDeviceAccess(_) => MetadataVerb::NotifyMpnDeviceAccess,
            MetadataRequest::NotifyMpnSubscriptionActivation(_) => {
                MetadataVerb::NotifyMpnSubscriptionActivation
            }
            MetadataRequest::NotifyMpnDeviceTokenChange(_) => {
                MetadataVerb::NotifyMpnDeviceTokenChange
            }
            MetadataRequest::Close(_) | MetadataRequest::Keepalive => return None,
        };
        Some(verb)
    }
}

pub type MetadataMessage = Message<MetadataRequest>;

/// Decoder for the metadata-provider family.
pub struct MetadataFamily;

impl Family for MetadataFamily {
    type Message = MetadataMessage;

    fn read(tokens: &[&str]) -> Result<MetadataMessage, ProtocolError> {
        let (id, code, tail) = match split_head(tokens)? {
            Head::Keepalive => return Ok(Message::new("", MetadataRequest::Keepalive)),
            Head::Request { id, verb, tail } => (id, verb, tail),
        };

        if code == CLOSE {
            let mut reader = TokenReader::new(CLOSE, tail);
            return Ok(Message::new(
                id,
                MetadataRequest::Close(CloseRequest::read(&mut reader)?),
            ));
        }

        let verb = MetadataVerb::from_code(code)
            .ok_or_else(|| ProtocolError::UnknownVerb(code.to_string()))?;
        let mut r = TokenReader::new(verb.code(), tail);

        let body = match verb {
            MetadataVerb::Init => MetadataRequest::Init(InitRequest::read(&mut r)?),
            MetadataVerb::GetItemData => {
                MetadataRequest::GetItemData(GetItemDataRequest { items: r.list()? })
            }
            MetadataVerb::GetUserItemData => {
                MetadataRequest::GetUserItemData(GetUserItemDataRequest {
                    user: r.string()?,
                    items: r.list()?,
                })
            }
            MetadataVerb::GetSchema => MetadataRequest::GetSchema(GetSchemaRequest {
                user: r.string()?,
                group: r.text()?,
                schema: r.text()?,
                session: r.text()?,
            }),
            MetadataVerb::GetItems => MetadataRequest::GetItems(GetItemsRequest {
                user: r.string()?,
                group: r.text()?,
                session: r.text()?,
            }),
            MetadataVerb::NotifyUser => MetadataRequest::NotifyUser(NotifyUserRequest {
                user: r.string()?,
                password: r.string()?,
                client_principal: None,
                headers: r.map()?,
            }),
            MetadataVerb::NotifyUserAuth => MetadataRequest::NotifyUserAuth(NotifyUserRequest {
                user: r.string()?,
                password: r.string()?,
                client_principal: r.string()?,
                headers: r.map()?,
            }),
            MetadataVerb::NotifyUserMessage => {
                MetadataRequest::NotifyUserMessage(NotifyUserMessageRequest {
                    user: r.string()?,
                    session: r.text()?,
                    message: r.text()?,
                })
            }
            MetadataVerb::NotifyNewSession => {
                MetadataRequest::NotifyNewSession(NotifyNewSessionRequest {
                    user: r.string()?,
                    session: r.text()?,
                    context: r.map()?,
                })
            }
            MetadataVerb::NotifySessionClose => {
                MetadataRequest::NotifySessionClose(NotifySessionCloseRequest {
                    session: r.text()?,
                })
            }
            MetadataVerb::NotifyNewTables => {
                MetadataRequest::NotifyNewTables(NotifyNewTablesRequest {
                    user: r.string()?,
                    session: r.text()?,
                    tables: TableInfo::read_all(&mut r)?,
                })
            }
            MetadataVerb::NotifyTablesClose => {
                MetadataRequest::NotifyTablesClose(NotifyTablesCloseRequest {
                    session: r.text()?,
                    tables: TableInfo::read_all(&mut r)?,
                })
            }
            MetadataVerb::NotifyMpnDeviceAccess => {
                MetadataRequest::NotifyMpnDeviceAccess(MpnDeviceAccessRequest {
                    user: r.string()?,
                    session: r.text()?,
                    device: MpnDevice::read(&mut r)?,
                })
            }
            MetadataVerb::NotifyMpnSubscriptionActivation => {
                let user = r.string()?;
                let session = r.text()?;
                let table = TableInfo::read(&mut r)?;
                let device = MpnDevice::read(&mut r)?;
                let trigger = r.string()?;
                let notification_format = r.text()?;
                MetadataRequest::NotifyMpnSubscriptionActivation(
                    MpnSubscriptionActivationRequest {
                        user,
                        session,
                        table,
                        subscription: MpnSubscriptionInfo {
                            device,
                            trigger,
                            notification_format,
                        },
                    },
                )
            }
            MetadataVerb::NotifyMpnDeviceTokenChange => {
                MetadataRequest::NotifyMpnDeviceTokenChange(MpnDeviceTokenChangeRequest {
                    user: r.string()?,
                    session: r.text()?,
                    device: MpnDevice::read(&mut r)?,
                    new_device_token: r.text()?,
                })
            }
        };
        r.finish()?;

        Ok(Message::new(id, body))
    }
}

/// Per-item answer to `GIT`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemData {
    pub distinct_snapshot_length: Option<i64>,
    pub min_source_frequency: Option<f64>,
    pub allowed_modes: ModeSet,
}

impl Default for ItemData {
    fn default() -> Self {
        Self {
            distinct_snapshot_length: Some(0),
            min_source_frequency: Some(0.0),
            allowed_modes: ModeSet::all(),
        }
    }
}

/// Per-item answer to `GUI`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UserItemData {
    pub allowed_buffer_size: Option<i64>,
    pub allowed_max_frequency: Option<f64>,
    pub allowed_modes: ModeSet,
}

impl Default for UserItemData {
    fn default() -> Self {
        Self {
            allowed_buffer_size: Some(0),
            allowed_max_frequency: Some(0.0),
            allowed_modes: ModeSet::all(),
        }
    }
}

/// Answer to `NUS` and `NUA`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UserAuthorization {
    pub allowed_max_bandwidth: Option<f64>,
    pub wants_tables_notification: bool,
}

/// A success payload that can be appended to a reply.
pub trait ReplyPayload {
    fn append(&self, builder: MessageBuilder) -> Result<MessageBuilder, ProtocolError>;
}

impl ReplyPayload for () {
    fn append(&self, builder: MessageBuilder) -> Result<MessageBuilder, ProtocolError> {
        Ok(builder.void())
    }
}

impl ReplyPayload for Vec<ItemData> {
    fn append(&self, builder: MessageBuilder) -> Result<MessageBuilder, ProtocolError> {
        if self.is_empty() {
            return Ok(builder.void());
        }
        self.iter().try_fold(builder, |b, data| {
            b.integer(data.distinct_snapshot_length)
                .double(data.min_source_frequency)
                .mode(data.allowed_modes)
        })
    }
}

impl ReplyPayload for Vec<UserItemData> {
    fn append(&self, builder: MessageBuilder) -> Result<MessageBuilder, ProtocolError> {
        if self.is_empty() {
            return Ok(builder.void());
        }
        self.iter().try_fold(builder, |b, data| {
            b.integer(data.allowed_buffer_size)
                .double(data.allowed_max_frequency)
                .mode(data.allowed_modes)
        })
    }
}

/// Field or item names.
impl ReplyPayload for Vec<String> {
    fn append(&self, builder: MessageBuilder) -> Result<MessageBuilder, ProtocolError> {
        if self.is_empty() {
            return Ok(builder.void());
        }
        Ok(builder.list(self))
    }
}

impl ReplyPayload for UserAuthorization {
    fn append(&self, builder: MessageBuilder) -> Result<MessageBuilder, ProtocolError> {
        Ok(builder
            .double(self.allowed_max_bandwidth)
            .boolean(self.wants_tables_notification))
    }
}

/// Success reply for any non-init verb.
pub fn write_reply<P: ReplyPayload + ?Sized>(
    id: &str,
    verb: MetadataVerb,
    payload: &P,
) -> Result<String, ProtocolError> {
    Ok(payload
        .append(MessageBuilder::new(id, verb.code()))?
        .build())
}

pub fn write_init_reply(id: &str) -> String {
    message::write_init_reply(id, MetadataVerb::Init.code())
}

pub fn write_exception(id: &str, verb: MetadataVerb, exception: &Exception) -> String {
    message::write_exception(id, verb.code(), exception)
}
