//! Cancellation registry
//!
//! Tracks in-flight cancelable operations keyed by endpoint. Both indices
//! (request id -> entry, endpoint -> request ids) and the latest request id
//! per endpoint live behind one mutex so an entry is never visible in one
//! index without the other.

use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard, PoisonError},
};

use log::debug;

use super::{id::RequestId, signal::AbortHandle};

struct RegistryEntry {
    endpoint: String,
    handle: AbortHandle,
}

#[derive(Default)]
struct RegistryIndex {
    entries: HashMap<RequestId, RegistryEntry>,
    by_endpoint: HashMap<String, HashSet<RequestId>>,
    // Survives unregister, cleared by `release_latest`
    latest: HashMap<String, RequestId>,
}

impl RegistryIndex {
    fn insert(&mut self, endpoint: &str, request_id: RequestId, handle: AbortHandle) {
        self.remove(&request_id);
        self.by_endpoint
            .entry(endpoint.to_string())
            .or_default()
            .insert(request_id.clone());
        self.entries.insert(
            request_id,
            RegistryEntry {
                endpoint: endpoint.to_string(),
                handle,
            },
        );
    }

    fn take_others(&mut self, endpoint: &str, except: &RequestId) -> Vec<(RequestId, AbortHandle)> {
        let targets: Vec<RequestId> = self
            .by_endpoint
            .get(endpoint)
            .map(|ids| ids.iter().filter(|id| *id != except).cloned().collect())
            .unwrap_or_default();

        targets
            .into_iter()
            .filter_map(|id| self.remove(&id).map(|entry| (id, entry.handle)))
            .collect()
    }

    fn remove(&mut self, request_id: &RequestId) -> Option<RegistryEntry> {
        let entry = self.entries.remove(request_id)?;
        if let Some(ids) = self.by_endpoint.get_mut(&entry.endpoint) {
            ids.remove(request_id);
            if ids.is_empty() {
                self.by_endpoint.remove(&entry.endpoint);
            }
        }
        Some(entry)
    }
}

/// Registry of abort handles for in-flight requests
#[derive(Default)]
pub struct CancellationRegistry {
    index: Mutex<RegistryIndex>,
}

impl CancellationRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an abort handle. Re-registering the same id overwrites the old entry.
    pub fn register(&self, endpoint: &str, request_id: RequestId, handle: AbortHandle) {
        debug!("Registering request {} for endpoint {}", request_id, endpoint);
        self.lock().insert(endpoint, request_id, handle);
    }

    /// Cancel every other request on `endpoint`, register this one and mark it
    /// as the endpoint's latest, all in one critical section.
    ///
    /// Of two concurrent calls for one endpoint, the later one always cancels
    /// the earlier, so at most one request per endpoint stays live.
    pub fn supersede(
        &self,
        endpoint: &str,
        request_id: RequestId,
        handle: AbortHandle,
    ) -> Vec<RequestId> {
        let cancelled = {
            let mut index = self.lock();
            let cancelled = index.take_others(endpoint, &request_id);
            index.insert(endpoint, request_id.clone(), handle);
            index.latest.insert(endpoint.to_string(), request_id);
            cancelled
        };
        abort_all(endpoint, cancelled)
    }

    /// Whether `request_id` is the most recent superseding request on `endpoint`
    pub fn is_latest(&self, endpoint: &str, request_id: &RequestId) -> bool {
        self.lock().latest.get(endpoint) == Some(request_id)
    }

    /// Forget the latest marker for `endpoint` if it still points at `request_id`
    pub fn release_latest(&self, endpoint: &str, request_id: &RequestId) {
        let mut index = self.lock();
        if index.latest.get(endpoint) == Some(request_id) {
            index.latest.remove(endpoint);
        }
    }

    /// Remove an entry. Unknown ids are ignored, completion and cancellation may race.
    pub fn unregister(&self, request_id: &RequestId) -> bool {
        let removed = self.lock().remove(request_id).is_some();
        if removed {
            debug!("Unregistered request {}", request_id);
        }
        removed
    }

    /// Abort and unregister every request for `endpoint` except `except`.
    ///
    /// All abort handles have been signalled when this returns. Returns the
    /// ids that were cancelled.
    pub fn cancel_others(&self, endpoint: &str, except: &RequestId) -> Vec<RequestId> {
        let cancelled = self.lock().take_others(endpoint, except);
        abort_all(endpoint, cancelled)
    }

    pub fn is_registered(&self, request_id: &RequestId) -> bool {
        self.lock().entries.contains_key(request_id)
    }

    /// Request ids currently registered for an endpoint
    pub fn registered_for(&self, endpoint: &str) -> Vec<RequestId> {
        self.lock()
            .by_endpoint
            .get(endpoint)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Get registry counts for monitoring
    pub fn get_stats(&self) -> RegistryStats {
        let index = self.lock();
        RegistryStats {
            request_count: index.entries.len(),
            endpoint_count: index.by_endpoint.len(),
        }
    }
}

fn abort_all(endpoint: &str, cancelled: Vec<(RequestId, AbortHandle)>) -> Vec<RequestId> {
    for (id, handle) in &cancelled {
        debug!("Cancelling request {} superseded on endpoint {}", id, endpoint);
        handle.abort();
    }
    cancelled.into_iter().map(|(id, _)| id).collect()
}

/// Statistics about registry contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    pub request_count: usize,
    pub endpoint_count: usize,
}
