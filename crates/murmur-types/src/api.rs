use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// -- Status values --

pub const STATUS_OK: &str = "OK";
pub const STATUS_ERROR: &str = "error";
pub const STATUS_UNKNOWN: &str = "unknown";

// -- Command envelopes --

/// A command request: `{service, data}`.
///
/// Both fields are optional on the wire so that a request missing either one
/// can still be answered with a typed error instead of a decode failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl Request {
    pub fn new(service: impl Into<String>, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => Some(map),
            _ => None,
        };
        Self {
            service: Some(service.into()),
            data,
        }
    }

    /// String value of a `data` field. Non-string values count as absent.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.data.as_ref()?.get(name)?.as_str()
    }
}

/// A command reply: `{data}`, echoing `service` when the request named one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    pub data: Value,
}

impl Response {
    pub fn new(service: Option<String>, data: Value) -> Self {
        Self { service, data }
    }

    pub fn status(&self) -> Option<&str> {
        self.data.get("status")?.as_str()
    }

    /// Error code of an error reply.
    pub fn error(&self) -> Option<&str> {
        self.data.get("error")?.as_str()
    }
}
