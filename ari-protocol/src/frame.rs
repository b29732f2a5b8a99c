//! Line framing for the ARI stream.
//!
//! The stream is a sequence of `\n`-terminated records. A record may also end
//! with `\r\n`; a `\r\n` followed by further newlines collapses into a single
//! terminator. Records are split on `|` and handed to the decoder of a verb
//! family.

use crate::codec::SEPARATOR;
use crate::error::ProtocolError;
use bytes::{Buf, BytesMut};
use std::collections::VecDeque;

/// A verb family: the decoder for one side of the protocol.
pub trait Family {
    type Message;

    /// Decodes the tokens of one complete line.
    fn read(tokens: &[&str]) -> Result<Self::Message, ProtocolError>;
}

/// Reassembles lines across chunks and queues the decoded messages.
pub struct LineFramer<F: Family> {
    buffer: BytesMut,
    /// Set after a `\r\n` terminator; swallows directly following newlines.
    after_crlf: bool,
    queue: VecDeque<F::Message>,
}

impl<F: Family> LineFramer<F> {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            after_crlf: false,
            queue: VecDeque::new(),
        }
    }

    /// Appends a chunk and decodes every line it completes.
    ///
    /// Messages decoded before a faulty line stay queued; the fault is
    /// returned as soon as it is met.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), ProtocolError> {
        self.buffer.extend_from_slice(chunk);

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line = self.buffer.split_to(pos);
            self.buffer.advance(1);

            let crlf = line.last() == Some(&b'\r');
            if crlf {
                line.truncate(line.len() - 1);
            }

            if line.is_empty() && self.after_crlf && !crlf {
                continue;
            }
            self.after_crlf = crlf;

            let text = std::str::from_utf8(&line).map_err(|_| ProtocolError::InvalidUtf8)?;
            let tokens: Vec<&str> = text.split(SEPARATOR).collect();
            let message = F::read(&tokens)?;
            self.queue.push_back(message);
        }

        Ok(())
    }

    /// Removes and returns the oldest decoded message.
    pub fn pop(&mut self) -> Option<F::Message> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of decoded messages waiting to be popped.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Bytes of the incomplete trailing line.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl<F: Family> Default for LineFramer<F> {
    fn default() -> Self {
        Self::new()
    }
}
