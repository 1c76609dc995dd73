//! Store integration surface
//!
//! The shared mutable state the coordinator reads and writes: the activity
//! set, per-endpoint success/error histories and the normalized storage.
//! Every mutation is broadcast as a [`StoreEvent`] so observers never poll.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, SystemTime},
};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use log::{debug, warn};
use tokio::sync::broadcast;

use crate::{
    core::{RequestId, SyncError},
    normalize::Storage,
    request::ResponsePayload,
};

const EVENT_CAPACITY: usize = 1024;

/// Immutable record of one settled request
#[derive(Debug, Clone)]
pub struct SettlementRecord {
    pub endpoint: String,
    pub request_id: RequestId,
    pub method: String,
    pub outcome: Result<ResponsePayload, SyncError>,
    pub started_at: SystemTime,
    pub ended_at: SystemTime,
}

impl SettlementRecord {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(&self.outcome, Err(e) if e.is_cancelled())
    }

    pub fn error(&self) -> Option<&SyncError> {
        self.outcome.as_ref().err()
    }

    pub fn payload(&self) -> Option<&ResponsePayload> {
        self.outcome.as_ref().ok()
    }

    pub fn duration(&self) -> Duration {
        self.ended_at
            .duration_since(self.started_at)
            .unwrap_or_default()
    }
}

/// State transitions published by the store
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    ActivityAdded {
        endpoint: String,
        request_id: RequestId,
    },
    ActivityRemoved {
        endpoint: String,
        request_id: RequestId,
    },
    HistoryAppended {
        endpoint: String,
        request_id: RequestId,
        success: bool,
    },
    HistoryCleared {
        endpoint: Option<String>,
    },
    StorageReplaced {
        request_id: Option<RequestId>,
    },
}

#[derive(Default)]
struct EndpointHistory {
    success: Vec<Arc<SettlementRecord>>,
    errors: Vec<Arc<SettlementRecord>>,
}

pub struct Store {
    activity: DashMap<String, HashSet<RequestId>>,
    histories: DashMap<String, EndpointHistory>,
    storage: ArcSwap<Storage>,
    commit_lock: Mutex<()>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self::with_storage(Storage::new())
    }

    pub fn with_storage(storage: Storage) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            activity: DashMap::new(),
            histories: DashMap::new(),
            storage: ArcSwap::from_pointee(storage),
            commit_lock: Mutex::new(()),
            events,
        }
    }

    /// Subscribe to state transitions
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: StoreEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn add_activity(&self, endpoint: &str, request_id: &RequestId) -> bool {
        let added = self
            .activity
            .entry(endpoint.to_string())
            .or_default()
            .insert(request_id.clone());
        if added {
            self.publish(StoreEvent::ActivityAdded {
                endpoint: endpoint.to_string(),
                request_id: request_id.clone(),
            });
        }
        added
    }

    pub fn remove_activity(&self, endpoint: &str, request_id: &RequestId) -> bool {
        let removed = self
            .activity
            .get_mut(endpoint)
            .map(|mut ids| ids.remove(request_id))
            .unwrap_or(false);
        self.activity.remove_if(endpoint, |_, ids| ids.is_empty());

        if removed {
            self.publish(StoreEvent::ActivityRemoved {
                endpoint: endpoint.to_string(),
                request_id: request_id.clone(),
            });
        } else {
            warn!("Activity for request {request_id} on {endpoint} was already removed");
        }
        removed
    }

    pub fn is_active(&self, endpoint: &str) -> bool {
        self.activity.contains_key(endpoint)
    }

    pub fn activity(&self, endpoint: &str) -> Vec<RequestId> {
        self.activity
            .get(endpoint)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Total number of in-flight requests across endpoints
    pub fn active_count(&self) -> usize {
        self.activity.iter().map(|entry| entry.value().len()).sum()
    }

    /// Append a settlement to the success or error history of its endpoint.
    ///
    /// With `clear_first` both histories of the endpoint are emptied in the
    /// same critical section, so only this record remains.
    pub fn append_history(&self, record: Arc<SettlementRecord>, clear_first: bool) {
        let endpoint = record.endpoint.clone();
        let request_id = record.request_id.clone();
        let success = record.is_success();
        {
            let mut history = self.histories.entry(endpoint.clone()).or_default();
            if clear_first {
                history.success.clear();
                history.errors.clear();
            }
            if success {
                history.success.push(record);
            } else {
                history.errors.push(record);
            }
        }

        if clear_first {
            self.publish(StoreEvent::HistoryCleared {
                endpoint: Some(endpoint.clone()),
            });
        }
        self.publish(StoreEvent::HistoryAppended {
            endpoint,
            request_id,
            success,
        });
    }

    pub fn success_history(&self, endpoint: &str) -> Vec<Arc<SettlementRecord>> {
        self.histories
            .get(endpoint)
            .map(|h| h.success.clone())
            .unwrap_or_default()
    }

    pub fn error_history(&self, endpoint: &str) -> Vec<Arc<SettlementRecord>> {
        self.histories
            .get(endpoint)
            .map(|h| h.errors.clone())
            .unwrap_or_default()
    }

    /// Clear history for one endpoint, or for all endpoints with `None`
    pub fn clear_history(&self, endpoint: Option<&str>) {
        match endpoint {
            Some(endpoint) => {
                self.histories.remove(endpoint);
            }
            None => self.histories.clear(),
        }
        debug!("History cleared for {}", endpoint.unwrap_or("all endpoints"));
        self.publish(StoreEvent::HistoryCleared {
            endpoint: endpoint.map(str::to_string),
        });
    }

    /// Current storage snapshot
    pub fn storage(&self) -> Arc<Storage> {
        self.storage.load_full()
    }

    /// Replace storage wholesale outside any request
    pub fn replace_storage(&self, storage: Storage) {
        let _guard = self.commit_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.storage.store(Arc::new(storage));
        self.publish(StoreEvent::StorageReplaced { request_id: None });
    }

    /// Compute and commit a new storage value in one critical section.
    ///
    /// `compute` sees the current storage and returns the replacement, or
    /// `None` to leave storage untouched. Returns whether a commit happened.
    pub fn commit<F>(&self, request_id: &RequestId, compute: F) -> bool
    where
        F: FnOnce(&Storage) -> Option<Storage>,
    {
        let _guard = self.commit_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.storage.load();
        match compute(&current) {
            Some(next) => {
                self.storage.store(Arc::new(next));
                self.publish(StoreEvent::StorageReplaced {
                    request_id: Some(request_id.clone()),
                });
                true
            }
            None => false,
        }
    }
}
