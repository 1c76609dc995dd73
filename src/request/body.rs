//! Outgoing payload construction
//!
//! The system default body is merged under the request body (request keys win).
//! With file attachments the request switches to a multipart form carrying the
//! files under one field name and the JSON body under another.

use bytes::Bytes;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::transport::{FormPart, MultipartForm, RequestBody};

/// A file uploaded with a request
#[derive(Debug, Clone, PartialEq)]
pub struct FileAttachment {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl FileAttachment {
    pub fn new(file_name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: None,
            data: data.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Field names used for multipart uploads
#[derive(Debug, Clone, Copy)]
pub struct FormFields<'a> {
    pub file_field: &'a str,
    pub body_field: &'a str,
}

pub fn merge_body(
    defaults: &JsonMap<String, JsonValue>,
    body: Option<&JsonMap<String, JsonValue>>,
) -> JsonMap<String, JsonValue> {
    let mut merged = defaults.clone();
    if let Some(body) = body {
        merged.extend(body.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    merged
}

pub fn build_body(
    defaults: &JsonMap<String, JsonValue>,
    body: Option<&JsonMap<String, JsonValue>>,
    files: &[FileAttachment],
    fields: FormFields<'_>,
) -> RequestBody {
    let merged = JsonValue::Object(merge_body(defaults, body));

    if files.is_empty() {
        return RequestBody::Json(Bytes::from(merged.to_string()));
    }

    let mut parts: Vec<FormPart> = files
        .iter()
        .map(|file| FormPart::File {
            name: fields.file_field.to_string(),
            file_name: file.file_name.clone(),
            content_type: file.content_type.clone(),
            data: file.data.clone(),
        })
        .collect();
    parts.push(FormPart::Text {
        name: fields.body_field.to_string(),
        value: merged.to_string(),
    });

    RequestBody::Multipart(MultipartForm { parts })
}
