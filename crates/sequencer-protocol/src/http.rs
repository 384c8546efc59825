//! HTTP error shape shared by every non-2xx response (§4.6, §7).
//!
//! Mirrors `rt_protocol::HttpErrorEnvelope` / `error_codes`: a frozen set of
//! `&'static str` codes plus one envelope struct, reused verbatim for the
//! WS `error` frame's `message` field.

use serde::{Deserialize, Serialize};

/// Frozen error codes, stable across client and server releases.
pub mod error_codes {
    pub const VALIDATION: &str = "VALIDATION";
    pub const CAPACITY: &str = "CAPACITY";
    pub const IMMUTABLE: &str = "IMMUTABLE";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const ALREADY_PUBLISHED: &str = "ALREADY_PUBLISHED";
    pub const PAYLOAD_TOO_LARGE: &str = "PAYLOAD_TOO_LARGE";
    pub const BAD_SESSION_ID: &str = "BAD_SESSION_ID";
    pub const INTERNAL: &str = "INTERNAL";
}

/// Envelope for every non-2xx HTTP response (§4.6's "Validation failures
/// → 400 with `{error, details[]}`" plus the 404/409/413 exit conditions).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpErrorEnvelope {
    pub code: String,
    pub error: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl HttpErrorEnvelope {
    pub fn new(code: &str, error: impl Into<String>) -> Self {
        Self { code: code.to_owned(), error: error.into(), details: Vec::new() }
    }

    pub fn with_details(code: &str, error: impl Into<String>, details: Vec<String>) -> Self {
        Self { code: code.to_owned(), error: error.into(), details }
    }
}
