//! Core traits for reqflow components
//!
//! These are the seams between the coordinator and the outside world: the
//! network boundary and the ordered interception points around a request.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;

use super::{context::RequestContext, error::SyncResult, signal::AbortSignal};
use crate::{
    store::SettlementRecord,
    transport::{OutgoingRequest, TransportResponse},
};

/// One outgoing network call per request
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the call.
    ///
    /// The coordinator already races the call against `signal`, so honouring
    /// it here is optional and only saves work.
    async fn send(
        &self,
        request: OutgoingRequest,
        signal: AbortSignal,
    ) -> SyncResult<TransportResponse>;
}

/// Interception points in the settlement state machine.
///
/// Hooks run in descending priority order at each point.
#[async_trait]
pub trait RequestHook: Send + Sync {
    /// Return the name of this hook
    fn name(&self) -> &str;

    /// Return the priority of this hook
    fn priority(&self) -> i32;

    /// Edit the outgoing request before it is sent.
    ///
    /// An error fails the request without a network call.
    async fn before_send(
        &self,
        _ctx: &mut RequestContext,
        _request: &mut OutgoingRequest,
    ) -> SyncResult<()> {
        Ok(())
    }

    /// Decide whether a successful response may be committed to storage.
    ///
    /// # Returns
    ///
    /// * `true` to let the commit proceed
    /// * `false` to skip the storage write for this settlement
    async fn before_commit(&self, _ctx: &RequestContext, _response: &JsonValue) -> bool {
        true
    }

    /// Observe the settlement once history and storage have been updated.
    async fn after_settle(&self, _ctx: &mut RequestContext, _record: &SettlementRecord) {}
}

/// Factory signature for hooks built from configuration
pub type HookCreateFn = fn(YamlValue) -> SyncResult<Arc<dyn RequestHook>>;
