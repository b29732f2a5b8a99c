//! Data-provider verb family.
//!
//! Inbound requests are `DPI` (init), `SUB`, `USB`, `CLOSE` and `KEEPALIVE`.
//! Outbound pushes are not correlated with a request: they carry a
//! synthesized id and, for item-bound pushes, the id of the request that
//! subscribed the item.

use crate::codec::{format_double, MessageBuilder, TokenReader};
use crate::error::{Exception, ProtocolError};
use crate::frame::Family;
use crate::message::{self, split_head, CloseRequest, Head, InitRequest, Message, CLOSE};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

pub const DATA_INIT: &str = "DPI";
pub const SUBSCRIBE: &str = "SUB";
pub const UNSUBSCRIBE: &str = "USB";
pub const UPDATE_BY_MAP: &str = "UD3";
pub const END_OF_SNAPSHOT: &str = "EOS";
pub const CLEAR_SNAPSHOT: &str = "CLS";
pub const DECLARE_FIELD_DIFF_ORDER: &str = "DFD";
pub const FAILURE: &str = "FAL";

/// Message of the subscription exception sent to requests drained as late.
pub const SUBSCRIBE_TOO_LATE: &str = "Subscribe request come too late";

/// Inbound data-provider requests.
#[derive(Debug, Clone, PartialEq)]
pub enum DataRequest {
    Init(InitRequest),
    Subscribe { item: String },
    Unsubscribe { item: String },
    Close(CloseRequest),
    Keepalive,
}

pub type DataMessage = Message<DataRequest>;

/// Decoder for the data-provider family.
pub struct DataFamily;

impl Family for DataFamily {
    type Message = DataMessage;

    fn read(tokens: &[&str]) -> Result<DataMessage, ProtocolError> {
        let (id, verb, tail) = match split_head(tokens)? {
            Head::Keepalive => return Ok(Message::new("", DataRequest::Keepalive)),
            Head::Request { id, verb, tail } => (id, verb, tail),
        };

        let body = match verb {
            DATA_INIT => {
                let mut reader = TokenReader::new(DATA_INIT, tail);
                DataRequest::Init(InitRequest::read(&mut reader)?)
            }
            SUBSCRIBE => DataRequest::Subscribe {
                item: read_item(SUBSCRIBE, tail)?,
            },
            UNSUBSCRIBE => DataRequest::Unsubscribe {
                item: read_item(UNSUBSCRIBE, tail)?,
            },
            CLOSE => {
                let mut reader = TokenReader::new(CLOSE, tail);
                DataRequest::Close(CloseRequest::read(&mut reader)?)
            }
            other => return Err(ProtocolError::UnknownVerb(other.to_string())),
        };

        Ok(Message::new(id, body))
    }
}

fn read_item(verb: &'static str, tail: &[&str]) -> Result<String, ProtocolError> {
    let mut reader = TokenReader::new(verb, tail);
    let item = reader.text()?;
    reader.finish()?;
    Ok(item)
}

/// A field value carried by an update.
///
/// Every value travels as a string; the variant only decides how it is
/// stringified.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
    Bytes(Vec<u8>),
}

impl FieldValue {
    pub fn to_wire_string(&self) -> Option<String> {
        match self {
            FieldValue::Null => None,
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Integer(n) => Some(n.to_string()),
            FieldValue::Double(d) => Some(format_double(*d)),
            FieldValue::Boolean(b) => Some(b.to_string()),
            FieldValue::Bytes(b) => Some(BASE64.encode(b)),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Integer(value.into())
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Double(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(value: Vec<u8>) -> Self {
        FieldValue::Bytes(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}

/// Diff algorithms a field may be declared to support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiffAlgorithm {
    JsonPatch,
    DiffMatchPatch,
}

impl DiffAlgorithm {
    pub fn code(&self) -> char {
        match self {
            DiffAlgorithm::JsonPatch => 'J',
            DiffAlgorithm::DiffMatchPatch => 'M',
        }
    }
}

pub fn write_init_reply(id: &str) -> String {
    message::write_init_reply(id, DATA_INIT)
}

pub fn write_init_exception(id: &str, exception: &Exception) -> String {
    message::write_exception(id, DATA_INIT, exception)
}

pub fn write_subscribe_reply(id: &str) -> String {
    message::write_void_reply(id, SUBSCRIBE)
}

pub fn write_subscribe_exception(id: &str, exception: &Exception) -> String {
    message::write_exception(id, SUBSCRIBE, exception)
}

pub fn write_unsubscribe_reply(id: &str) -> String {
    message::write_void_reply(id, UNSUBSCRIBE)
}

pub fn write_unsubscribe_exception(id: &str, exception: &Exception) -> String {
    message::write_exception(id, UNSUBSCRIBE, exception)
}

/// `<push id>|UD3|S|<item>|S|<subscription id>|B|<snapshot>|S|<field>|S|<value>...`
pub fn write_update<I, K>(
    push_id: &str,
    item: &str,
    subscription_id: &str,
    is_snapshot: bool,
    fields: I,
) -> String
where
    I: IntoIterator<Item = (K, FieldValue)>,
    K: AsRef<str>,
{
    let entries = fields
        .into_iter()
        .map(|(name, value)| (name, value.to_wire_string()));
    MessageBuilder::new(push_id, UPDATE_BY_MAP)
        .string(Some(item))
        .string(Some(subscription_id))
        .boolean(is_snapshot)
        .map(entries)
        .build()
}

pub fn write_end_of_snapshot(push_id: &str, item: &str, subscription_id: &str) -> String {
    MessageBuilder::new(push_id, END_OF_SNAPSHOT)
        .string(Some(item))
        .string(Some(subscription_id))
        .build()
}

pub fn write_clear_snapshot(push_id: &str, item: &str, subscription_id: &str) -> String {
    MessageBuilder::new(push_id, CLEAR_SNAPSHOT)
        .string(Some(item))
        .string(Some(subscription_id))
        .build()
}

/// Declares, per field, the diff algorithms in order of preference.
pub fn write_field_diff_order<I, K, A>(
    push_id: &str,
    item: &str,
    subscription_id: &str,
    fields: I,
) -> String
where
    I: IntoIterator<Item = (K, A)>,
    K: AsRef<str>,
    A: AsRef<[DiffAlgorithm]>,
{
    let entries = fields.into_iter().map(|(name, algorithms)| {
        let codes: String = algorithms.as_ref().iter().map(DiffAlgorithm::code).collect();
        (name, Some(codes))
    });
    MessageBuilder::new(push_id, DECLARE_FIELD_DIFF_ORDER)
        .string(Some(item))
        .string(Some(subscription_id))
        .map(entries)
        .build()
}

pub fn write_failure(push_id: &str, exception: &Exception) -> String {
    message::write_exception(push_id, FAILURE, exception)
}
