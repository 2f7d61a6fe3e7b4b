//! Request and reply encodings of the command endpoint.

use anyhow::{Context, Result};

use murmur_types::api::{Request, Response};

use crate::config::WireCodec;
use crate::error::CommandError;

impl WireCodec {
    pub fn decode_request(self, raw: &[u8]) -> Result<Request, CommandError> {
        let decoded = match self {
            Self::Json => serde_json::from_slice(raw).map_err(|e| e.to_string()),
            Self::Msgpack => rmp_serde::from_slice(raw).map_err(|e| e.to_string()),
        };
        decoded.map_err(CommandError::MalformedRequest)
    }

    pub fn encode_response(self, response: &Response) -> Result<Vec<u8>> {
        match self {
            Self::Json => serde_json::to_vec(response).context("encoding JSON reply"),
            Self::Msgpack => rmp_serde::to_vec_named(response).context("encoding MessagePack reply"),
        }
    }

    /// Client side of the exchange.
    pub fn encode_request(self, request: &Request) -> Result<Vec<u8>> {
        match self {
            Self::Json => serde_json::to_vec(request).context("encoding JSON request"),
            Self::Msgpack => rmp_serde::to_vec_named(request).context("encoding MessagePack request"),
        }
    }

    pub fn decode_response(self, raw: &[u8]) -> Result<Response> {
        match self {
            Self::Json => serde_json::from_slice(raw).context("decoding JSON reply"),
            Self::Msgpack => rmp_serde::from_slice(raw).context("decoding MessagePack reply"),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn msgpack_request_keeps_field_names() {
        let req = Request::new("publish", json!({"user": "alice", "channel": "geral", "message": "oi"}));
        let raw = WireCodec::Msgpack.encode_request(&req).unwrap();
        let back = WireCodec::Msgpack.decode_request(&raw).unwrap();
        assert_eq!(back.service.as_deref(), Some("publish"));
        assert_eq!(back.field("channel"), Some("geral"));
    }

    #[test]
    fn json_request_is_plain_text() {
        let raw = br#"{"service":"login","data":{"user":"alice"}}"#;
        let req = WireCodec::Json.decode_request(raw).unwrap();
        assert_eq!(req.field("user"), Some("alice"));
    }

    #[test]
    fn garbage_is_malformed() {
        let err = WireCodec::Json.decode_request(b"not json").unwrap_err();
        assert_eq!(err.code(), "malformed_request");

        let err = WireCodec::Msgpack.decode_request(&[0xc1]).unwrap_err();
        assert_eq!(err.code(), "malformed_request");
    }

    #[test]
    fn msgpack_reply_decodes_as_json_value() {
        let resp = Response::new(Some("users".into()), json!({"users": ["alice", "bob"]}));
        let raw = WireCodec::Msgpack.encode_response(&resp).unwrap();
        let back = WireCodec::Msgpack.decode_response(&raw).unwrap();
        assert_eq!(back, resp);
    }
}
