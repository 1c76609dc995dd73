use std::sync::Arc;

use async_trait::async_trait;
use log::info;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;

use crate::{
    core::{ErrorContext, ErrorKind, RequestContext, RequestHook, SyncResult},
    store::SettlementRecord,
    transport::OutgoingRequest,
};

pub const HOOK_NAME: &str = "access-log";
const PRIORITY: i32 = 399;

pub const ACCESS_LOG_TARGET: &str = "reqflow::access";
/// Context key the coordinator stores the response status under
pub const STATUS_VAR: &str = "status";
const URL_VAR: &str = "url";

pub fn create_access_log_hook(cfg: YamlValue) -> SyncResult<Arc<dyn RequestHook>> {
    let config: HookConfig =
        serde_yaml::from_value(cfg).config_context("Invalid access log hook config")?;

    let log_format = LogFormat::parse(&config.log_format)?;

    Ok(Arc::new(HookAccessLog { log_format }))
}

/// Configuration for the access log hook.
#[derive(Default, Debug, Serialize, Deserialize)]
struct HookConfig {
    #[serde(default = "HookConfig::default_log_format")]
    log_format: String,
}

impl HookConfig {
    fn default_log_format() -> String {
        "$method $endpoint $status $outcome ${request_time}ms".to_string()
    }
}

pub struct HookAccessLog {
    log_format: LogFormat,
}

#[async_trait]
impl RequestHook for HookAccessLog {
    fn name(&self) -> &str {
        HOOK_NAME
    }

    fn priority(&self) -> i32 {
        PRIORITY
    }

    async fn before_send(
        &self,
        ctx: &mut RequestContext,
        request: &mut OutgoingRequest,
    ) -> SyncResult<()> {
        ctx.set(URL_VAR, request.url.clone());
        Ok(())
    }

    async fn after_settle(&self, ctx: &mut RequestContext, record: &SettlementRecord) {
        let outcome = outcome_label(record);
        info!(
            target: ACCESS_LOG_TARGET,
            endpoint = ctx.endpoint(),
            request_id = record.request_id.as_str(),
            outcome = outcome;
            "{}",
            self.log_format.render(ctx, record)
        );
    }
}

fn outcome_label(record: &SettlementRecord) -> &'static str {
    match record.error().map(|e| e.kind()) {
        None => "success",
        Some(ErrorKind::Cancelled) => "cancelled",
        Some(ErrorKind::Network) => "network_error",
        Some(_) => "unknown_error",
    }
}

#[derive(Debug, PartialEq)]
enum Segment {
    Static(String),
    Variable(String),
}

#[derive(Debug)]
struct LogFormat {
    segments: Vec<Segment>,
}

impl LogFormat {
    fn parse(format: &str) -> SyncResult<Self> {
        let re = Regex::new(r"\$\{([a-zA-Z0-9_]+)\}|\$([a-zA-Z0-9_]+)")
            .config_context("Failed to parse log format")?;
        let mut segments = Vec::new();
        let mut last_pos = 0;

        for caps in re.captures_iter(format) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            if last_pos < whole.start() {
                segments.push(Segment::Static(format[last_pos..whole.start()].to_string()));
            }
            let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            segments.push(Segment::Variable(name.to_string()));
            last_pos = whole.end();
        }

        if last_pos < format.len() {
            segments.push(Segment::Static(format[last_pos..].to_string()));
        }

        Ok(LogFormat { segments })
    }

    fn render(&self, ctx: &RequestContext, record: &SettlementRecord) -> String {
        let mut output = String::with_capacity(128);

        for segment in &self.segments {
            match segment {
                Segment::Static(text) => output.push_str(text),
                Segment::Variable(var) => {
                    let value = match var.as_str() {
                        "endpoint" => record.endpoint.clone(),
                        "request_id" => record.request_id.to_string(),
                        "method" => record.method.clone(),
                        "url" => ctx.get_str(URL_VAR).unwrap_or_default().to_string(),
                        "status" => ctx
                            .get::<u16>(STATUS_VAR)
                            .copied()
                            .or_else(|| record.error().and_then(|e| e.http_status()))
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                        "outcome" => outcome_label(record).to_string(),
                        "request_time" => record.duration().as_millis().to_string(),
                        "error" => record.error().map(|e| e.to_string()).unwrap_or_default(),
                        _ => String::new(),
                    };
                    output.push_str(&value);
                }
            }
        }

        output
    }
}
