use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{
    core::{SyncError, SyncResult},
    transport::TransportResponse,
};

// Error bodies are echoed into history, keep them short
const MAX_ERROR_BODY: usize = 512;

/// How a successful response body is parsed
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    #[default]
    Json,
    Text,
    Blob,
}

/// Parsed response body
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    Json(JsonValue),
    Text(String),
    Blob(Bytes),
}

impl ResponsePayload {
    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            ResponsePayload::Json(value) => Some(value),
            _ => None,
        }
    }

    /// The value handed to the normalizer. Blobs are never normalized.
    pub fn normalizable(&self) -> Option<JsonValue> {
        match self {
            ResponsePayload::Json(value) => Some(value.clone()),
            ResponsePayload::Text(text) => Some(JsonValue::String(text.clone())),
            ResponsePayload::Blob(_) => None,
        }
    }
}

/// Turn a raw response into a payload, non-2xx statuses and parse failures are network errors.
pub fn parse_response(
    response_type: ResponseType,
    response: TransportResponse,
) -> SyncResult<ResponsePayload> {
    if !response.status.is_success() {
        let body = String::from_utf8_lossy(&response.body);
        let message = match body.char_indices().nth(MAX_ERROR_BODY) {
            Some((cut, _)) => format!("{}...", &body[..cut]),
            None => body.into_owned(),
        };
        return Err(SyncError::status(response.status.as_u16(), message));
    }

    match response_type {
        ResponseType::Json => serde_json::from_slice(&response.body)
            .map(ResponsePayload::Json)
            .map_err(|e| SyncError::network(format!("Invalid JSON response: {e}"))),
        ResponseType::Text => Ok(ResponsePayload::Text(
            String::from_utf8_lossy(&response.body).into_owned(),
        )),
        ResponseType::Blob => Ok(ResponsePayload::Blob(response.body)),
    }
}
