//! Decoding of responses already received from a build-farm server.
//!
//! JSON payloads go through two stages: the body must parse as JSON (else
//! [`ClientError::InvalidBody`]) and the parsed value must match the expected
//! shape, including [`Schema::validate`] checks (else
//! [`ClientError::SchemaViolation`]).

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use regex::Regex;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::sync::LazyLock;

use crate::errors::{ClientError, Result};

/// A successful (2xx) response with its body fully collected.
#[derive(Clone, Debug)]
pub struct RawResponse {
    pub server: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseMode {
    Json,
    Text,
    Raw,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Decoded<T> {
    Json(T),
    Text(String),
    Raw(Bytes),
}

/// Shape checks that deserialization alone cannot express.
///
/// Required fields and enum membership are enforced by `Deserialize`;
/// ranges and non-emptiness belong in `validate`.
pub trait Schema: DeserializeOwned {
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

impl Schema for serde_json::Value {}

impl<T: Schema> Schema for Vec<T> {
    fn validate(&self) -> std::result::Result<(), String> {
        self.iter()
            .enumerate()
            .try_for_each(|(i, item)| item.validate().map_err(|e| format!("[{i}]: {e}")))
    }
}

pub fn decode<T: Schema>(raw: RawResponse, mode: ResponseMode) -> Result<Decoded<T>> {
    match mode {
        ResponseMode::Json => decode_json(&raw).map(Decoded::Json),
        ResponseMode::Text => decode_text(&raw).map(Decoded::Text),
        ResponseMode::Raw => Ok(Decoded::Raw(raw.body)),
    }
}

pub fn decode_json<T: Schema>(raw: &RawResponse) -> Result<T> {
    let value: serde_json::Value =
        serde_json::from_slice(&raw.body).map_err(|e| ClientError::InvalidBody {
            server: raw.server.clone(),
            detail: e.to_string(),
        })?;

    let schema_violation = |detail: String| {
        tracing::warn!(server = %raw.server, %detail, "response failed schema validation");
        ClientError::SchemaViolation {
            server: raw.server.clone(),
            detail,
        }
    };

    let typed: T = serde_json::from_value(value).map_err(|e| schema_violation(e.to_string()))?;
    typed.validate().map_err(schema_violation)?;
    Ok(typed)
}

/// The body as text, unmodified. A body that is not UTF-8 is an
/// [`ClientError::InvalidBody`]; use [`ResponseMode::Raw`] for binary data.
pub fn decode_text(raw: &RawResponse) -> Result<String> {
    String::from_utf8(raw.body.to_vec()).map_err(|e| ClientError::InvalidBody {
        server: raw.server.clone(),
        detail: e.to_string(),
    })
}

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b(?:\[[0-?]*[ -/]*[@-~]|\][^\x07\x1b]*(?:\x07|\x1b\\)|[ -/]+[0-~]|[@-Z\\-_])")
        .expect("valid ANSI escape pattern")
});

/// Removes terminal colour and formatting escape sequences.
pub fn strip_ansi(text: &str) -> Cow<'_, str> {
    ANSI_ESCAPE.replace_all(text, "")
}
