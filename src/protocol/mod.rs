//! The line-delimited command protocol spoken with the host.
//!
//! Every line is a JSON array whose first element names the command:
//!
//! | Command | Direction | Parameters |
//! |---|---|---|
//! | `status` | out | code, reason phrase |
//! | `header` | in/out | name, value |
//! | `start-body` | in/out | |
//! | `data` | in/out | base64 chunk |
//! | `end-body` | in/out | |
//! | `abort` | in | |
//!
//! `header` commands always precede `start-body`, and nothing follows `end-body`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

pub mod lines;

pub use lines::{LineReader, LineStream};

/// Errors produced while decoding a command line.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("command is not a JSON array: {0}")]
    Json(#[from] serde_json::Error),

    #[error("command array is empty or its name is not a string")]
    MissingName,

    #[error("invalid parameters for `{command}` command")]
    InvalidParams { command: &'static str },

    #[error("invalid base64 payload in `data` command: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status { code: u16, text: String },
    Header { name: String, value: String },
    StartBody,
    /// Decoded body bytes; base64 only exists on the wire.
    Data(Bytes),
    EndBody,
    Abort,
    /// A command this version does not know. Kept so callers can log it.
    Unknown(String),
}

impl Command {
    /// Name of the command as it appears on the wire.
    pub fn name(&self) -> &str {
        match self {
            Self::Status { .. } => "status",
            Self::Header { .. } => "header",
            Self::StartBody => "start-body",
            Self::Data(_) => "data",
            Self::EndBody => "end-body",
            Self::Abort => "abort",
            Self::Unknown(name) => name,
        }
    }

    /// Parses one line of the command stream.
    ///
    /// Unknown command names decode to [`Command::Unknown`]; extra trailing
    /// parameters are ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// use procweb::protocol::Command;
    ///
    /// let cmd = Command::decode(r#"["data","aGk="]"#).unwrap();
    /// assert_eq!(cmd, Command::Data("hi".into()));
    /// ```
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let items: Vec<Value> = serde_json::from_str(line)?;
        let mut items = items.into_iter();
        let name = match items.next() {
            Some(Value::String(name)) => name,
            _ => return Err(ProtocolError::MissingName),
        };

        Ok(match name.as_str() {
            "status" => {
                let code = items
                    .next()
                    .and_then(|v| v.as_u64())
                    .and_then(|v| u16::try_from(v).ok())
                    .ok_or(ProtocolError::InvalidParams { command: "status" })?;
                let text = match items.next() {
                    Some(Value::String(text)) => text,
                    None | Some(Value::Null) => String::new(),
                    Some(_) => return Err(ProtocolError::InvalidParams { command: "status" }),
                };
                Self::Status { code, text }
            }
            "header" => match (items.next(), items.next()) {
                (Some(Value::String(name)), Some(Value::String(value))) => {
                    Self::Header { name, value }
                }
                _ => return Err(ProtocolError::InvalidParams { command: "header" }),
            },
            "start-body" => Self::StartBody,
            "data" => match items.next() {
                Some(Value::String(chunk)) => Self::Data(BASE64.decode(chunk)?.into()),
                _ => return Err(ProtocolError::InvalidParams { command: "data" }),
            },
            "end-body" => Self::EndBody,
            "abort" => Self::Abort,
            _ => Self::Unknown(name),
        })
    }

    /// Serializes the command as a single JSON line, without the trailing `\n`.
    ///
    /// # Examples
    ///
    /// ```
    /// use procweb::protocol::Command;
    ///
    /// let line = Command::Status { code: 404, text: "Not Found".into() }.encode();
    /// assert_eq!(line, r#"["status",404,"Not Found"]"#);
    /// ```
    pub fn encode(&self) -> String {
        let value = match self {
            Self::Status { code, text } => serde_json::json!(["status", code, text]),
            Self::Header { name, value } => serde_json::json!(["header", name, value]),
            Self::Data(chunk) => serde_json::json!(["data", BASE64.encode(chunk)]),
            other => serde_json::json!([other.name()]),
        };
        value.to_string()
    }
}
