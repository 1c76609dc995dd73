use std::{fmt, sync::Arc};

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde_json::{Map as JsonMap, Value as JsonValue};

use super::{body::FileAttachment, response::ResponsePayload, ResponseType};
use crate::{
    core::SyncError,
    normalize::{MergeStrategy, NormalizeFn, Storage, StrategyTable},
};

/// Receives the parsed payload, or the error, of a settled request
pub type ResultCallback = Box<dyn FnOnce(&Result<ResponsePayload, SyncError>) + Send + Sync>;

/// Per-request options
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<JsonMap<String, JsonValue>>,
    pub files: Vec<FileAttachment>,
    /// Applied last, replacing default and generated headers of the same name
    pub headers: HeaderMap,
    /// Override the system-default strategy per storage key
    pub strategies: Option<StrategyTable>,
    pub normalize: Option<NormalizeFn>,
    pub response_type: Option<ResponseType>,
    /// Skip the storage write (the callback still runs)
    pub ignore: bool,
    /// Clear the endpoint history before appending this settlement
    pub history_clear: bool,
    pub callback: Option<ResultCallback>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::new(Method::GET)
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("method", &self.method)
            .field("body", &self.body)
            .field("files", &self.files.len())
            .field("headers", &self.headers)
            .field("strategies", &self.strategies)
            .field("normalize", &self.normalize.is_some())
            .field("response_type", &self.response_type)
            .field("ignore", &self.ignore)
            .field("history_clear", &self.history_clear)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            body: None,
            files: Vec::new(),
            headers: HeaderMap::new(),
            strategies: None,
            normalize: None,
            response_type: None,
            ignore: false,
            history_clear: false,
            callback: None,
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn post() -> Self {
        Self::new(Method::POST)
    }

    pub fn put() -> Self {
        Self::new(Method::PUT)
    }

    pub fn delete() -> Self {
        Self::new(Method::DELETE)
    }

    /// Set the JSON body. Non-object values are wrapped under a `"data"` key.
    pub fn body(mut self, body: JsonValue) -> Self {
        self.body = Some(match body {
            JsonValue::Object(map) => map,
            other => {
                let mut map = JsonMap::new();
                map.insert("data".to_string(), other);
                map
            }
        });
        self
    }

    pub fn file(mut self, file: FileAttachment) -> Self {
        self.files.push(file);
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn strategy(mut self, key: impl Into<String>, strategy: MergeStrategy) -> Self {
        self.strategies
            .get_or_insert_with(StrategyTable::new)
            .insert(key.into(), strategy);
        self
    }

    pub fn normalize_with<F>(mut self, normalize: F) -> Self
    where
        F: Fn(&Storage, &JsonValue, &StrategyTable) -> Storage + Send + Sync + 'static,
    {
        self.normalize = Some(Arc::new(normalize));
        self
    }

    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = Some(response_type);
        self
    }

    pub fn ignore(mut self) -> Self {
        self.ignore = true;
        self
    }

    pub fn history_clear(mut self) -> Self {
        self.history_clear = true;
        self
    }

    pub fn on_result<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&Result<ResponsePayload, SyncError>) + Send + Sync + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }
}
