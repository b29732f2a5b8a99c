//! Typed field codec for the pipe-delimited ARI wire format.
//!
//! Every field travels as a one-character type tag followed by its value:
//!
//! ```text
//! <id>|<verb>|S|<string>|I|<integer>|D|<double>|B|<0 or 1>|M|<modes>|V
//! ```
//!
//! Strings are percent-escaped the way `encodeURIComponent` does it, except
//! that a space travels as `+`. `#` stands for null and `$` for the empty
//! string.

use crate::error::{Exception, ExceptionKind, ProtocolError};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::HashMap;

/// Field separator.
pub const SEPARATOR: char = '|';

/// End-of-message marker.
pub const TERMINATOR: char = '\n';

/// Encoded form of a null value.
pub const NULL_MARKER: &str = "#";

/// Encoded form of an empty string.
pub const EMPTY_MARKER: &str = "$";

/// Type tags.
pub mod tag {
    pub const VOID: char = 'V';
    pub const STRING: char = 'S';
    pub const BYTES: char = 'Y';
    pub const BOOLEAN: char = 'B';
    pub const INTEGER: char = 'I';
    pub const DOUBLE: char = 'D';
    pub const MODE: char = 'M';
}

/// Characters left untouched by `encodeURIComponent`.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub fn encode_string(value: Option<&str>) -> String {
    match value {
        None => NULL_MARKER.to_string(),
        Some("") => EMPTY_MARKER.to_string(),
        Some(s) => utf8_percent_encode(s, URI_COMPONENT)
            .to_string()
            .replace("%20", "+"),
    }
}

pub fn decode_string(token: &str) -> Result<Option<String>, ProtocolError> {
    match token {
        NULL_MARKER => Ok(None),
        EMPTY_MARKER => Ok(Some(String::new())),
        _ => {
            check_escapes(token)?;
            let spaced = token.replace('+', " ");
            let decoded = percent_decode_str(&spaced)
                .decode_utf8()
                .map_err(|_| ProtocolError::InvalidEscape(token.to_string()))?;
            Ok(Some(decoded.into_owned()))
        }
    }
}

/// Rejects a `%` that is not followed by two hex digits.
fn check_escapes(token: &str) -> Result<(), ProtocolError> {
    let bytes = token.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err(ProtocolError::InvalidEscape(token.to_string()));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    Ok(())
}

pub fn encode_bytes(value: Option<&[u8]>) -> String {
    match value {
        None => NULL_MARKER.to_string(),
        Some([]) => EMPTY_MARKER.to_string(),
        Some(b) => BASE64.encode(b),
    }
}

pub fn decode_bytes(token: &str) -> Result<Option<Vec<u8>>, ProtocolError> {
    match token {
        NULL_MARKER => Ok(None),
        EMPTY_MARKER => Ok(Some(Vec::new())),
        _ => BASE64
            .decode(token)
            .map(Some)
            .map_err(|e| ProtocolError::InvalidBase64(e.to_string())),
    }
}

pub fn encode_integer(value: Option<i64>) -> String {
    match value {
        None => NULL_MARKER.to_string(),
        Some(n) => n.to_string(),
    }
}

pub fn decode_integer(token: &str) -> Result<Option<i64>, ProtocolError> {
    if token == NULL_MARKER {
        return Ok(None);
    }
    token
        .parse()
        .map(Some)
        .map_err(|_| ProtocolError::InvalidInteger(token.to_string()))
}

/// Encodes a double the way a JavaScript number prints.
pub fn encode_double(value: Option<f64>) -> String {
    match value {
        None => NULL_MARKER.to_string(),
        Some(d) => format_double(d),
    }
}

pub(crate) fn format_double(d: f64) -> String {
    if d.is_nan() {
        "NaN".to_string()
    } else if d.is_infinite() {
        let sign = if d > 0.0 { "" } else { "-" };
        format!("{}Infinity", sign)
    } else if d == 0.0 {
        // covers -0.0
        "0".to_string()
    } else if d.abs() >= 1e21 || d.abs() < 1e-6 {
        // exponent form with an explicit sign, as 1e+21 and 1.5e-7
        let formatted = format!("{:e}", d);
        match formatted.split_once('e') {
            Some((mantissa, exponent)) if !exponent.starts_with('-') => {
                format!("{}e+{}", mantissa, exponent)
            }
            _ => formatted,
        }
    } else {
        d.to_string()
    }
}

pub fn decode_double(token: &str) -> Result<Option<f64>, ProtocolError> {
    match token {
        NULL_MARKER => Ok(None),
        "NaN" => Ok(Some(f64::NAN)),
        "Infinity" => Ok(Some(f64::INFINITY)),
        "-Infinity" => Ok(Some(f64::NEG_INFINITY)),
        _ => token
            .parse()
            .map(Some)
            .map_err(|_| ProtocolError::InvalidDouble(token.to_string())),
    }
}

pub fn encode_boolean(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

pub fn decode_boolean(token: &str) -> Result<bool, ProtocolError> {
    match token {
        "1" => Ok(true),
        "0" => Ok(false),
        _ => Err(ProtocolError::InvalidBoolean(token.to_string())),
    }
}

/// Set of publishing modes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ModeSet(u8);

impl ModeSet {
    pub const RAW: u8 = 1 << 0;
    pub const MERGE: u8 = 1 << 1;
    pub const DISTINCT: u8 = 1 << 2;
    pub const COMMAND: u8 = 1 << 3;

    /// Wire order of the mode codes.
    const CODES: [(u8, char); 4] = [
        (Self::RAW, 'R'),
        (Self::MERGE, 'M'),
        (Self::DISTINCT, 'D'),
        (Self::COMMAND, 'C'),
    ];

    pub fn new() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        Self(Self::RAW | Self::MERGE | Self::DISTINCT | Self::COMMAND)
    }

    pub fn with_raw(mut self) -> Self {
        self.0 |= Self::RAW;
        self
    }

    pub fn with_merge(mut self) -> Self {
        self.0 |= Self::MERGE;
        self
    }

    pub fn with_distinct(mut self) -> Self {
        self.0 |= Self::DISTINCT;
        self
    }

    pub fn with_command(mut self) -> Self {
        self.0 |= Self::COMMAND;
        self
    }

    pub fn is_raw(&self) -> bool {
        self.0 & Self::RAW != 0
    }

    pub fn is_merge(&self) -> bool {
        self.0 & Self::MERGE != 0
    }

    pub fn is_distinct(&self) -> bool {
        self.0 & Self::DISTINCT != 0
    }

    pub fn is_command(&self) -> bool {
        self.0 & Self::COMMAND != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Builds a set from raw bits, ignoring unknown ones.
    pub fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::all().0)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        if self.is_empty() {
            return Err(ProtocolError::EmptyModeSet);
        }
        Ok(Self::CODES
            .iter()
            .filter(|(bit, _)| self.0 & bit != 0)
            .map(|(_, code)| *code)
            .collect())
    }

    pub fn decode(token: &str) -> Result<Self, ProtocolError> {
        let mut set = Self::new();
        for c in token.chars() {
            let (bit, _) = Self::CODES
                .iter()
                .find(|(_, code)| *code == c)
                .ok_or(ProtocolError::InvalidMode(c))?;
            set.0 |= bit;
        }
        Ok(set)
    }
}

/// Joins already-encoded tokens into a complete wire message.
pub fn join_tokens<S: AsRef<str>>(tokens: &[S]) -> String {
    let mut out = String::with_capacity(tokens.iter().map(|t| t.as_ref().len() + 1).sum());
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 {
            out.push(SEPARATOR);
        }
        out.push_str(token.as_ref());
    }
    out.push(TERMINATOR);
    out
}

/// Incremental builder for outbound messages.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    tokens: Vec<String>,
}

impl MessageBuilder {
    /// Starts a message with its correlation id and verb.
    pub fn new(id: impl Into<String>, verb: &str) -> Self {
        Self {
            tokens: vec![id.into(), verb.to_string()],
        }
    }

    fn typed(mut self, tag: char, value: String) -> Self {
        self.tokens.push(tag.to_string());
        self.tokens.push(value);
        self
    }

    pub fn void(mut self) -> Self {
        self.tokens.push(tag::VOID.to_string());
        self
    }

    pub fn string(self, value: Option<&str>) -> Self {
        self.typed(tag::STRING, encode_string(value))
    }

    pub fn bytes(self, value: Option<&[u8]>) -> Self {
        self.typed(tag::BYTES, encode_bytes(value))
    }

    pub fn boolean(self, value: bool) -> Self {
        self.typed(tag::BOOLEAN, encode_boolean(value).to_string())
    }

    pub fn integer(self, value: Option<i64>) -> Self {
        self.typed(tag::INTEGER, encode_integer(value))
    }

    pub fn double(self, value: Option<f64>) -> Self {
        self.typed(tag::DOUBLE, encode_double(value))
    }

    pub fn mode(self, value: ModeSet) -> Result<Self, ProtocolError> {
        let encoded = value.encode()?;
        Ok(self.typed(tag::MODE, encoded))
    }

    /// Appends an untyped token as-is.
    pub fn raw(mut self, token: impl Into<String>) -> Self {
        self.tokens.push(token.into());
        self
    }

    /// Appends a key/value map as interleaved string tokens.
    pub fn map<I, K, V>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Option<V>)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in entries {
            self = self
                .string(Some(key.as_ref()))
                .string(value.as_ref().map(AsRef::<str>::as_ref));
        }
        self
    }

    /// Appends plain values as string tokens.
    pub fn list<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for value in values {
            self = self.string(Some(value.as_ref()));
        }
        self
    }

    /// Appends the exception code, message and any client fields.
    pub fn exception(mut self, exception: &Exception) -> Self {
        self.tokens.push(exception.kind.code().to_string());
        self.tokens
            .push(encode_string(exception.message.as_deref()));
        if exception.kind.carries_client_info() {
            self.tokens.push(encode_integer(exception.client_code));
            self.tokens
                .push(encode_string(exception.client_message.as_deref()));
            if exception.kind == ExceptionKind::ConflictingSession {
                self.tokens
                    .push(encode_string(exception.conflicting_session.as_deref()));
            }
        }
        self
    }

    /// Number of tokens pushed so far, id and verb included.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn build(self) -> String {
        join_tokens(&self.tokens)
    }
}

/// Sequential reader over the tokens following the verb.
pub struct TokenReader<'a> {
    verb: &'static str,
    tokens: &'a [&'a str],
    pos: usize,
}

impl<'a> TokenReader<'a> {
    /// Positions start at 2: id and verb are consumed by the envelope.
    const FIRST_POSITION: usize = 2;

    pub fn new(verb: &'static str, tail: &'a [&'a str]) -> Self {
        Self {
            verb,
            tokens: tail,
            pos: 0,
        }
    }

    pub fn verb(&self) -> &'static str {
        self.verb
    }

    pub fn remaining(&self) -> usize {
        self.tokens.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn next_raw(&mut self) -> Result<&'a str, ProtocolError> {
        let token = self
            .tokens
            .get(self.pos)
            .copied()
            .ok_or(ProtocolError::MissingToken {
                verb: self.verb,
                position: self.pos + Self::FIRST_POSITION,
            })?;
        self.pos += 1;
        Ok(token)
    }

    fn expect_tag(&mut self, expected: char) -> Result<&'a str, ProtocolError> {
        let found = self.next_raw()?;
        if found.len() != 1 || !found.starts_with(expected) {
            return Err(ProtocolError::UnexpectedType {
                verb: self.verb,
                expected,
                found: found.to_string(),
            });
        }
        self.next_raw()
    }

    pub fn string(&mut self) -> Result<Option<String>, ProtocolError> {
        decode_string(self.expect_tag(tag::STRING)?)
    }

    /// Reads a string, treating null as empty.
    pub fn text(&mut self) -> Result<String, ProtocolError> {
        Ok(self.string()?.unwrap_or_default())
    }

    pub fn bytes(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        decode_bytes(self.expect_tag(tag::BYTES)?)
    }

    pub fn boolean(&mut self) -> Result<bool, ProtocolError> {
        decode_boolean(self.expect_tag(tag::BOOLEAN)?)
    }

    pub fn integer(&mut self) -> Result<Option<i64>, ProtocolError> {
        decode_integer(self.expect_tag(tag::INTEGER)?)
    }

    pub fn double(&mut self) -> Result<Option<f64>, ProtocolError> {
        decode_double(self.expect_tag(tag::DOUBLE)?)
    }

    pub fn mode(&mut self) -> Result<ModeSet, ProtocolError> {
        ModeSet::decode(self.expect_tag(tag::MODE)?)
    }

    /// Reads string key/value pairs until the end of the message.
    pub fn map(&mut self) -> Result<HashMap<String, Option<String>>, ProtocolError> {
        let mut entries = HashMap::new();
        while !self.is_empty() {
            let key = self.text()?;
            let value = self.string()?;
            entries.insert(key, value);
        }
        Ok(entries)
    }

    /// Reads string values until the end of the message.
    pub fn list(&mut self) -> Result<Vec<String>, ProtocolError> {
        let mut values = Vec::with_capacity(self.remaining() / 2);
        while !self.is_empty() {
            values.push(self.text()?);
        }
        Ok(values)
    }

    /// Fails if tokens are left over.
    pub fn finish(self) -> Result<(), ProtocolError> {
        match self.remaining() {
            0 => Ok(()),
            count => Err(ProtocolError::TrailingTokens {
                verb: self.verb,
                count,
            }),
        }
    }
}
