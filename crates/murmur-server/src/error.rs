use serde_json::{Map, Value, json};
use thiserror::Error;

use murmur_types::api::STATUS_ERROR;

/// Why a command was refused. Each variant maps to one wire error code.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("channel '{0}' does not exist")]
    UnknownChannel(String),

    #[error("user '{0}' does not exist")]
    UnknownUser(String),

    #[error("no summary has been generated yet")]
    SummaryNotFound,

    #[error("summary could not be read: {0:#}")]
    SummaryUnreadable(anyhow::Error),

    #[error("storage failure: {0:#}")]
    Storage(anyhow::Error),

    #[error("malformed request: {0}")]
    MalformedRequest(String),
}

impl CommandError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "missing_field",
            Self::UnknownChannel(_) => "unknown_channel",
            Self::UnknownUser(_) => "unknown_user",
            Self::SummaryNotFound => "summary_not_found",
            Self::SummaryUnreadable(_) => "summary_unreadable",
            Self::Storage(_) => "storage",
            Self::MalformedRequest(_) => "malformed_request",
        }
    }

    /// Reply payload: `{status: "error", error, message[, field]}`.
    pub fn to_data(&self) -> Value {
        let mut data = Map::new();
        data.insert("status".into(), json!(STATUS_ERROR));
        data.insert("error".into(), json!(self.code()));
        data.insert("message".into(), json!(self.to_string()));
        if let Self::MissingField(field) = self {
            data.insert("field".into(), json!(field));
        }
        Value::Object(data)
    }
}
