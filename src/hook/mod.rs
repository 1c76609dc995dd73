pub mod access_log;
pub mod header_rewrite;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;

use crate::{
    config_error,
    core::{HookCreateFn, RequestContext, RequestHook, SyncResult},
    store::SettlementRecord,
    transport::OutgoingRequest,
};

/// Global registry mapping built-in hook names to their factory functions.
///
/// Hooks are registered with their priority values as comments for reference.
/// Higher priority values run earlier at each interception point.
static HOOK_BUILDER_REGISTRY: Lazy<HashMap<&'static str, HookCreateFn>> = Lazy::new(|| {
    let arr: Vec<(&str, HookCreateFn)> = vec![
        (access_log::HOOK_NAME, access_log::create_access_log_hook), // 399
        (
            header_rewrite::HOOK_NAME,
            header_rewrite::create_header_rewrite_hook,
        ), // 1008
    ];
    arr.into_iter().collect()
});

/// Creates a built-in hook from configuration.
///
/// # Errors
/// Returns a configuration error for unknown hook names or invalid configuration
pub fn build_hook(name: &str, cfg: YamlValue) -> SyncResult<Arc<dyn RequestHook>> {
    let builder = HOOK_BUILDER_REGISTRY
        .get(name)
        .ok_or_else(|| config_error!("Unknown hook type: {}", name))?;
    builder(cfg)
}

/// Runs a set of hooks in descending priority order
#[derive(Default, Clone)]
pub struct HookExecutor {
    hooks: Vec<Arc<dyn RequestHook>>,
}

impl HookExecutor {
    pub fn new(mut hooks: Vec<Arc<dyn RequestHook>>) -> Self {
        hooks.sort_by_key(|hook| std::cmp::Reverse(hook.priority()));
        Self { hooks }
    }

    /// Build the executor for the hooks named in configuration plus any extra hooks
    pub fn from_config(
        config: &HashMap<String, YamlValue>,
        extra: Vec<Arc<dyn RequestHook>>,
    ) -> SyncResult<Self> {
        let mut hooks = extra;
        for (name, cfg) in config {
            hooks.push(build_hook(name, cfg.clone())?);
        }
        Ok(Self::new(hooks))
    }

    pub fn names(&self) -> Vec<&str> {
        self.hooks.iter().map(|hook| hook.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

#[async_trait]
impl RequestHook for HookExecutor {
    fn name(&self) -> &str {
        "hook-executor"
    }

    fn priority(&self) -> i32 {
        0
    }

    async fn before_send(
        &self,
        ctx: &mut RequestContext,
        request: &mut OutgoingRequest,
    ) -> SyncResult<()> {
        for hook in self.hooks.iter() {
            hook.before_send(ctx, request).await?;
        }
        Ok(())
    }

    async fn before_commit(&self, ctx: &RequestContext, response: &JsonValue) -> bool {
        for hook in self.hooks.iter() {
            if !hook.before_commit(ctx, response).await {
                log::debug!(
                    "Hook {} vetoed storage commit for request {}",
                    hook.name(),
                    ctx.request_id()
                );
                return false;
            }
        }
        true
    }

    async fn after_settle(&self, ctx: &mut RequestContext, record: &SettlementRecord) {
        for hook in self.hooks.iter() {
            hook.after_settle(ctx, record).await;
        }
    }
}
