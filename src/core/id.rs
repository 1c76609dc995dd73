use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use rand::seq::SliceRandom;
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::config::{RequestIdAlgorithm, RequestIdConfig, DEFAULT_CHAR_SET};

/// Opaque token identifying one request operation
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(Arc<str>);

impl Serialize for RequestId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        RequestId(Arc::from(value))
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        RequestId(Arc::from(value))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Produces a fresh request id for every submission.
pub struct RequestIdGenerator {
    config: RequestIdConfig,
    sequence: AtomicU64,
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new(RequestIdConfig::default())
    }
}

impl RequestIdGenerator {
    pub fn new(config: RequestIdConfig) -> Self {
        Self {
            config,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self) -> RequestId {
        match self.config.algorithm {
            RequestIdAlgorithm::Uuid => Uuid::new_v4().to_string().into(),
            RequestIdAlgorithm::RangeId => self.range_id().into(),
        }
    }

    // Random prefix alone may collide, the sequence suffix keeps ids unique in-process.
    fn range_id(&self) -> String {
        let char_set = if self.config.range_id.char_set.is_empty() {
            DEFAULT_CHAR_SET
        } else {
            &self.config.range_id.char_set
        };
        let chars: Vec<char> = char_set.chars().collect();
        let mut rng = rand::thread_rng();
        let mut id: String = (0..self.config.range_id.length)
            .filter_map(|_| chars.choose(&mut rng))
            .collect();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        id.push('-');
        id.push_str(&seq.to_string());
        id
    }
}
