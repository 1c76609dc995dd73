//! Request lifecycle coordinator
//!
//! Drives one logical request from submission to store mutation:
//!
//! `Created -> Registered -> InFlight -> {Fulfilled | Cancelled | NetworkError} -> Settled`
//!
//! Every settlement removes its activity entry once, appends one history record
//! and invokes the result callback at most once. Only fulfilled, non-ignored
//! requests that are still the latest for their endpoint commit to storage.

pub mod body;
pub mod options;
pub mod response;

#[cfg(test)]
mod tests;

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use http::{header::CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, Method};
use log::{debug, info, warn};

use crate::{
    config::{Config, Modules},
    core::{
        abort_pair, AbortSignal, CancellationRegistry, ErrorContext, RequestContext,
        RequestHook, RequestId, RequestIdGenerator, SyncError, SyncResult, Transport,
    },
    hook::{access_log::STATUS_VAR, HookExecutor},
    normalize::{self, effective_strategies, NormalizeFn, Storage, StrategyTable},
    queue::{QueueTicket, SequentialQueue},
    store::{SettlementRecord, Store},
    transport::{HttpTransport, OutgoingRequest, RequestBody},
};

pub use body::{FileAttachment, FormFields};
pub use options::{RequestOptions, ResultCallback};
pub use response::{parse_response, ResponsePayload, ResponseType};

const JSON_CONTENT_TYPE: &str = "application/json";

/// Builder for a [`Coordinator`]
pub struct CoordinatorBuilder {
    config: Config,
    store: Option<Arc<Store>>,
    transport: Option<Arc<dyn Transport>>,
    normalizer: Option<NormalizeFn>,
    hooks: Vec<Arc<dyn RequestHook>>,
}

impl CoordinatorBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: None,
            transport: None,
            normalizer: None,
            hooks: Vec::new(),
        }
    }

    /// Share an existing store instead of creating an empty one
    pub fn store(mut self, store: Arc<Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// System-default normalizer, replacing the built-in one
    pub fn normalizer(mut self, normalizer: NormalizeFn) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    pub fn hook(mut self, hook: Arc<dyn RequestHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn build(self) -> SyncResult<Coordinator> {
        let config = self.config;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(
                config.request.timeout_ms.map(Duration::from_millis),
            )?),
        };

        let mut default_headers = HeaderMap::new();
        for (name, value) in &config.request.default_headers {
            let name = HeaderName::from_bytes(name.as_bytes()).config_context("Invalid header name")?;
            let value = HeaderValue::from_str(value).config_context("Invalid header value")?;
            default_headers.insert(name, value);
        }
        let request_id_header = HeaderName::from_bytes(config.request.request_id_header.as_bytes())
            .config_context("Invalid request id header")?;

        let hooks = HookExecutor::from_config(&config.hooks, self.hooks)?;
        info!(
            "Coordinator ready (modules: {:?}, hooks: {:?})",
            config.modules,
            hooks.names()
        );

        Ok(Coordinator {
            inner: Arc::new(CoordinatorInner {
                ids: RequestIdGenerator::new(config.request_id.clone()),
                store: self.store.unwrap_or_default(),
                registry: CancellationRegistry::new(),
                queue: SequentialQueue::new(),
                transport,
                hooks,
                normalizer: self.normalizer,
                default_headers,
                request_id_header,
                config,
            }),
        })
    }
}

struct CoordinatorInner {
    config: Config,
    store: Arc<Store>,
    registry: CancellationRegistry,
    queue: SequentialQueue,
    transport: Arc<dyn Transport>,
    hooks: HookExecutor,
    ids: RequestIdGenerator,
    normalizer: Option<NormalizeFn>,
    default_headers: HeaderMap,
    request_id_header: HeaderName,
}

/// Cheaply cloneable handle to the request coordinator
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

impl Coordinator {
    pub fn builder(config: Config) -> CoordinatorBuilder {
        CoordinatorBuilder::new(config)
    }

    /// Coordinator with an HTTP transport and an empty store
    pub fn from_config(config: Config) -> SyncResult<Self> {
        CoordinatorBuilder::new(config).build()
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.inner.store
    }

    pub fn modules(&self) -> Modules {
        self.inner.config.modules
    }

    pub fn registry(&self) -> &CancellationRegistry {
        &self.inner.registry
    }

    pub fn queue(&self) -> &SequentialQueue {
        &self.inner.queue
    }

    pub fn clear_history(&self, endpoint: Option<&str>) {
        self.inner.store.clear_history(endpoint);
    }

    /// Run any task through the global sequential queue
    pub fn enqueue_sequential<F, T>(&self, task: F) -> QueueTicket<T>
    where
        F: std::future::Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.inner.queue.enqueue(task)
    }

    /// Submit a request through the sequential queue, ordering it after every
    /// previously queued task regardless of endpoint.
    pub fn submit_sequential(
        &self,
        endpoint: impl Into<String>,
        options: RequestOptions,
    ) -> QueueTicket<Arc<SettlementRecord>> {
        let coordinator = self.clone();
        let endpoint = endpoint.into();
        self.inner
            .queue
            .enqueue(async move { coordinator.submit(&endpoint, options).await })
    }

    /// Submit a request and drive it to settlement.
    ///
    /// Never fails: errors are captured in the returned settlement record.
    /// Dropping the returned future before it completes settles the request
    /// as cancelled.
    pub async fn submit(
        &self,
        endpoint: &str,
        mut options: RequestOptions,
    ) -> Arc<SettlementRecord> {
        let inner = &self.inner;
        let modules = inner.config.modules;
        let request_id = inner.ids.next_id();
        let mut ctx = RequestContext::new(endpoint, request_id.clone(), options.method.clone());
        let (handle, signal) = abort_pair();

        if modules.cancellation {
            let superseded = inner
                .registry
                .supersede(endpoint, request_id.clone(), handle);
            if !superseded.is_empty() {
                debug!(
                    "Request {} on {} superseded {} in-flight request(s)",
                    request_id,
                    endpoint,
                    superseded.len()
                );
            }
        }
        if modules.listener {
            inner.store.add_activity(endpoint, &request_id);
        }

        let mut settlement = Settlement {
            inner: inner.clone(),
            endpoint: endpoint.to_string(),
            request_id,
            method: options.method.clone(),
            started_at: ctx.started_at(),
            history_clear: options.history_clear,
            callback: options.callback.take(),
            pending: true,
        };

        let outcome = self.execute(&mut ctx, &options, signal.clone()).await;
        let record = settlement.settle(outcome);

        if let Ok(payload) = &record.outcome {
            if modules.storage && !options.ignore {
                self.commit(&ctx, &options, &signal, payload).await;
            }
        }

        inner.hooks.after_settle(&mut ctx, &record).await;

        // Releases the latest marker for the endpoint
        drop(settlement);
        record
    }

    async fn execute(
        &self,
        ctx: &mut RequestContext,
        options: &RequestOptions,
        signal: AbortSignal,
    ) -> SyncResult<ResponsePayload> {
        let mut request = self.build_request(ctx, options);
        self.inner.hooks.before_send(ctx, &mut request).await?;

        let response_type = options
            .response_type
            .unwrap_or(self.inner.config.request.response_type);

        let mut abort = signal.clone();
        let response = tokio::select! {
            biased;
            _ = abort.aborted() => return Err(cancelled(ctx)),
            response = self.inner.transport.send(request, signal.clone()) => response?,
        };
        ctx.set(STATUS_VAR, response.status.as_u16());

        let payload = parse_response(response_type, response)?;

        // Bytes may arrive after the abort fired
        if signal.is_aborted() {
            return Err(cancelled(ctx));
        }
        Ok(payload)
    }

    fn build_request(&self, ctx: &RequestContext, options: &RequestOptions) -> OutgoingRequest {
        let inner = &self.inner;
        let defaults = &inner.config.request;

        let body = if options.method == Method::GET {
            RequestBody::Empty
        } else {
            body::build_body(
                &defaults.default_body,
                options.body.as_ref(),
                &options.files,
                FormFields {
                    file_field: &defaults.file_field,
                    body_field: &defaults.body_field,
                },
            )
        };

        let mut headers = inner.default_headers.clone();
        if !body.is_multipart() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        }
        if let Ok(value) = HeaderValue::from_str(ctx.request_id().as_str()) {
            headers.insert(inner.request_id_header.clone(), value);
        }
        for (name, value) in options.headers.iter() {
            headers.insert(name.clone(), value.clone());
        }
        if body.is_multipart() {
            // The transport sets the multipart boundary itself
            headers.remove(CONTENT_TYPE);
        }

        OutgoingRequest {
            request_id: ctx.request_id().clone(),
            method: options.method.clone(),
            url: resolve_url(inner.config.base_url.as_deref(), ctx.endpoint()),
            headers,
            body,
        }
    }

    async fn commit(
        &self,
        ctx: &RequestContext,
        options: &RequestOptions,
        signal: &AbortSignal,
        payload: &ResponsePayload,
    ) {
        let inner = &self.inner;
        let Some(response) = payload.normalizable() else {
            debug!(
                "Request {} returned a blob, storage left untouched",
                ctx.request_id()
            );
            return;
        };

        let normalizer = options
            .normalize
            .as_ref()
            .or(inner.normalizer.as_ref());
        if normalizer.is_none() && !response.is_object() {
            debug!(
                "Request {} returned a non-object payload, storage left untouched",
                ctx.request_id()
            );
            return;
        }

        if !inner.hooks.before_commit(ctx, &response).await {
            return;
        }

        let strategies = effective_strategies(
            &inner.config.merge_strategies,
            options.strategies.as_ref(),
        );
        let guarded = inner.config.modules.cancellation;
        let endpoint = ctx.endpoint();
        let request_id = ctx.request_id();

        let committed = inner.store.commit(request_id, |current| {
            let stale = signal.is_aborted() || !inner.registry.is_latest(endpoint, request_id);
            if guarded && stale {
                return None;
            }
            Some(apply_normalizer(normalizer, current, &response, &strategies))
        });

        if !committed {
            warn!(
                "Stale response for request {} on {} not committed",
                request_id, endpoint
            );
        }
    }
}

/// Settlement bookkeeping for one submitted request.
///
/// Dropped while still pending, e.g. when the caller abandons the `submit`
/// future, it settles the request as cancelled. Dropping it always releases
/// the endpoint's latest marker.
struct Settlement {
    inner: Arc<CoordinatorInner>,
    endpoint: String,
    request_id: RequestId,
    method: Method,
    started_at: SystemTime,
    history_clear: bool,
    callback: Option<ResultCallback>,
    pending: bool,
}

impl Settlement {
    fn settle(&mut self, outcome: SyncResult<ResponsePayload>) -> Arc<SettlementRecord> {
        self.pending = false;
        let inner = &self.inner;
        let modules = inner.config.modules;

        if modules.cancellation {
            inner.registry.unregister(&self.request_id);
        }

        let record = Arc::new(SettlementRecord {
            endpoint: self.endpoint.clone(),
            request_id: self.request_id.clone(),
            method: self.method.to_string(),
            outcome,
            started_at: self.started_at,
            ended_at: SystemTime::now(),
        });

        match &record.outcome {
            Ok(_) => debug!("Request {} on {} fulfilled", record.request_id, record.endpoint),
            Err(e) if e.is_cancelled() => {
                debug!("Request {} on {} cancelled", record.request_id, record.endpoint)
            }
            Err(e) => warn!(
                "Request {} on {} failed: {}",
                record.request_id, record.endpoint, e
            ),
        }

        if let Some(callback) = self.callback.take() {
            callback(&record.outcome);
        }
        if modules.listener {
            inner.store.remove_activity(&self.endpoint, &self.request_id);
        }
        if modules.history {
            inner.store.append_history(record.clone(), self.history_clear);
        }

        record
    }
}

impl Drop for Settlement {
    fn drop(&mut self) {
        if self.pending {
            warn!(
                "Request {} on {} dropped before settlement",
                self.request_id, self.endpoint
            );
            let reason = SyncError::Cancelled(format!(
                "request {} to {} was dropped by the caller",
                self.request_id, self.endpoint
            ));
            self.settle(Err(reason));
        }
        if self.inner.config.modules.cancellation {
            self.inner
                .registry
                .release_latest(&self.endpoint, &self.request_id);
        }
    }
}

fn apply_normalizer(
    normalizer: Option<&NormalizeFn>,
    current: &Storage,
    response: &serde_json::Value,
    strategies: &StrategyTable,
) -> Storage {
    match normalizer {
        Some(custom) => custom(current, response, strategies),
        None => normalize::normalize(current, response, strategies),
    }
}

fn cancelled(ctx: &RequestContext) -> SyncError {
    SyncError::Cancelled(format!(
        "request {} to {} was aborted",
        ctx.request_id(),
        ctx.endpoint()
    ))
}

/// Join a relative endpoint onto the base url. Absolute endpoints are used as is.
pub fn resolve_url(base_url: Option<&str>, endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint.to_string();
    }
    match base_url {
        Some(base) => format!(
            "{}/{}",
            base.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        ),
        None => endpoint.to_string(),
    }
}
