//! Singer message decoding.
//!
//! Taps write one JSON message per line. Lines are read as bytes and repaired before they
//! are parsed, so a record with Latin-1 text in it still decodes.

use crate::normalize::repair;
use crate::types::InputRecord;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    Schema {
        stream: String,
        #[serde(default)]
        schema: Value,
        #[serde(default)]
        key_properties: Vec<String>,
    },
    Record {
        stream: String,
        record: InputRecord,
    },
    State {
        value: Value,
    },
    /// Message types this target has no use for, such as `ACTIVATE_VERSION`.
    #[serde(other)]
    Other,
}

#[derive(thiserror::Error, Debug)]
pub enum MessageError {
    #[error("could not read input: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid message on line {line}: {source}")]
    Invalid {
        line: usize,
        source: serde_json::Error,
    },
}

/// Decodes one line of input.
pub fn parse_message(line: &[u8]) -> Result<Message, serde_json::Error> {
    serde_json::from_str(&repair(line))
}

/// Reads messages from a line-delimited stream, skipping blank lines.
pub struct MessageReader<R> {
    reader: R,
    buf: Vec<u8>,
    line: usize,
}

impl<R: AsyncBufRead + Unpin> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        MessageReader {
            reader,
            buf: Vec::new(),
            line: 0,
        }
    }

    /// Returns the next message, or `None` at the end of the input.
    pub async fn next_message(&mut self) -> Result<Option<Message>, MessageError> {
        loop {
            self.buf.clear();
            if self.reader.read_until(b'\n', &mut self.buf).await? == 0 {
                return Ok(None);
            }
            self.line += 1;

            let line = self.buf.trim_ascii();
            if line.is_empty() {
                continue;
            }

            return parse_message(line)
                .map(Some)
                .map_err(|source| MessageError::Invalid {
                    line: self.line,
                    source,
                });
        }
    }
}
