//! Request and reply messages exchanged over the service endpoint.
//!
//! Both directions are a sequence of text lines separated by `\n` and
//! encoded as UTF-16LE. Line 0 of a request is the command name; line 0 of a
//! reply is a [`Status`] tag.

use crate::wide::{decode_utf16le, encode_utf16le};
use std::fmt;
use thiserror::Error;

/// Maximum size of a single request message in bytes.
///
/// Anything larger is discarded by the service without a reply.
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024;

/// Line separator for requests and replies.
pub const LINE_SEPARATOR: char = '\n';

/// Error text sent back for commands the service does not understand.
pub const BAD_MESSAGE_TYPE: &str = "Bad message type.";

/// Content line of a List reply when no volumes are mounted.
pub const NO_ENTRIES: &str = "No Entries";

/// Error type for protocol operations.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The payload contained no text at all.
    #[error("empty payload")]
    EmptyPayload,

    /// A reply did not follow the expected layout.
    #[error("malformed reply: {0}")]
    MalformedReply(String),

    /// IO error during communication.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Status tag carried on line 0 of every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// The request succeeded; the remaining lines carry its data.
    Data,
    /// The request failed; the remaining lines carry a message.
    Error,
}

impl Status {
    /// Wire spelling of this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Data => "Data",
            Self::Error => "Error",
        }
    }

    /// Parse a wire status tag. Matching is case-sensitive.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "Data" => Some(Self::Data),
            "Error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded request: the command name followed by its argument lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    lines: Vec<String>,
}

impl Request {
    /// Create a request with no arguments.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            lines: vec![command.into()],
        }
    }

    /// Append an argument line.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.lines.push(arg.into());
        self
    }

    /// Build a request from already split lines.
    pub fn from_lines(lines: Vec<String>) -> Result<Self, ProtocolError> {
        if lines.is_empty() {
            return Err(ProtocolError::EmptyPayload);
        }
        Ok(Self { lines })
    }

    /// Split raw request text into lines.
    ///
    /// Argument lines are kept as-is (no trimming, no validation); only a
    /// completely empty payload is rejected.
    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        if text.is_empty() {
            return Err(ProtocolError::EmptyPayload);
        }
        Ok(Self {
            lines: text.split(LINE_SEPARATOR).map(str::to_owned).collect(),
        })
    }

    /// Decode a request from wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Self::from_text(&decode_utf16le(bytes))
    }

    /// The command name (line 0).
    #[must_use]
    pub fn command(&self) -> &str {
        &self.lines[0]
    }

    /// Argument lines following the command name.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.lines[1..]
    }

    /// All lines, command name included.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Join the lines back into request text.
    #[must_use]
    pub fn to_text(&self) -> String {
        self.lines.join("\n")
    }

    /// Encode this request for sending.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        encode_utf16le(&self.to_text())
    }
}

/// A reply: a status tag line followed by status-specific content lines.
///
/// The reply is held as the exact text that goes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    text: String,
}

impl Reply {
    /// A `Data` reply with the given content lines.
    #[must_use]
    pub fn data<I, S>(content: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut text = Status::Data.as_str().to_owned();
        for line in content {
            text.push(LINE_SEPARATOR);
            text.push_str(&line.into());
        }
        Self { text }
    }

    /// An `Error` reply carrying a human-readable message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            text: format!("{}{LINE_SEPARATOR}{}", Status::Error, message.into()),
        }
    }

    /// The reply sent for unknown commands and undecodable payloads.
    #[must_use]
    pub fn bad_message_type() -> Self {
        Self::error(BAD_MESSAGE_TYPE)
    }

    /// Wrap reply text produced elsewhere without interpreting it.
    ///
    /// The terminator after the last line is dropped, once. Every other
    /// character is kept, and an empty reply stays empty.
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        let mut text = text.into();
        if text.ends_with(LINE_SEPARATOR) {
            text.pop();
        }
        Self { text }
    }

    /// Decode a reply from wire bytes, verbatim.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let text = decode_utf16le(bytes);
        if text.is_empty() {
            return Err(ProtocolError::EmptyPayload);
        }
        Ok(Self { text })
    }

    /// The status tag, if line 0 is a known one.
    #[must_use]
    pub fn status(&self) -> Option<Status> {
        self.lines().next().and_then(Status::parse)
    }

    /// Text after the status tag line.
    #[must_use]
    pub fn body(&self) -> &str {
        self.text
            .split_once(LINE_SEPARATOR)
            .map_or("", |(_, body)| body)
    }

    /// All lines, status tag included.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.text.split(LINE_SEPARATOR)
    }

    /// Reply text as transmitted.
    #[must_use]
    pub fn as_text(&self) -> &str {
        &self.text
    }

    /// Reply text as an owned string.
    #[must_use]
    pub fn to_text(&self) -> String {
        self.text.clone()
    }

    /// Encode this reply for sending.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        encode_utf16le(&self.text)
    }
}
