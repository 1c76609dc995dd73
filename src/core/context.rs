//! Request context management
//!
//! This module provides the RequestContext that holds per-request state
//! and lets hooks pass data between interception points.

use std::{
    any::Any,
    collections::HashMap,
    time::{Duration, Instant, SystemTime},
};

use http::Method;

use super::id::RequestId;

/// Context that holds per-request state and metadata
pub struct RequestContext {
    endpoint: String,
    request_id: RequestId,
    method: Method,
    started_at: SystemTime,
    request_start: Instant,

    /// Custom variables available to hooks (type-erased, thread-safe)
    vars: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl RequestContext {
    pub fn new(endpoint: impl Into<String>, request_id: RequestId, method: Method) -> Self {
        Self {
            endpoint: endpoint.into(),
            request_id,
            method,
            started_at: SystemTime::now(),
            request_start: Instant::now(),
            vars: HashMap::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.request_start.elapsed()
    }

    /// Store a typed value into the context
    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.vars.insert(key.into(), Box::new(value));
    }

    /// Get a typed reference from the context
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.vars.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Get a string slice if the stored value is a `String`
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get::<String>(key).map(|s| s.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Box<dyn Any + Send + Sync>> {
        self.vars.remove(key)
    }
}
