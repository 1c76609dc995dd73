use std::sync::Arc;

use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;
use validator::{Validate, ValidationError};

use crate::{
    core::{ErrorContext, RequestContext, RequestHook, SyncResult},
    transport::OutgoingRequest,
};

pub const HOOK_NAME: &str = "header-rewrite";
const PRIORITY: i32 = 1008;

pub fn create_header_rewrite_hook(cfg: YamlValue) -> SyncResult<Arc<dyn RequestHook>> {
    let config: HookConfig =
        serde_yaml::from_value(cfg).config_context("Invalid header rewrite hook config")?;

    config
        .validate()
        .config_context("Invalid header rewrite hook config")?;

    let set = compile(&config.set)?;
    let add = compile(&config.add)?;
    let remove = config
        .remove
        .iter()
        .map(|name| HeaderName::from_bytes(name.as_bytes()))
        .collect::<Result<Vec<_>, _>>()
        .config_context("Invalid header name")?;

    Ok(Arc::new(HookHeaderRewrite { set, add, remove }))
}

fn compile(heads: &[Head]) -> SyncResult<Vec<(HeaderName, HeaderValue)>> {
    heads
        .iter()
        .map(|head| -> SyncResult<(HeaderName, HeaderValue)> {
            let name = HeaderName::from_bytes(head.name.as_bytes())
                .config_context("Invalid header name")?;
            let value = HeaderValue::from_str(&head.value).config_context("Invalid header value")?;
            Ok((name, value))
        })
        .collect()
}

#[derive(Clone, Default, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "Head::validate_head"))]
struct Head {
    name: String,
    value: String,
}

impl Head {
    fn validate_head(&self) -> Result<(), ValidationError> {
        if HeaderName::from_bytes(self.name.as_bytes()).is_err() {
            return Err(ValidationError::new("invalid_header_name"));
        }
        if HeaderValue::from_str(&self.value).is_err() {
            return Err(ValidationError::new("invalid_header_value"));
        }
        Ok(())
    }
}

#[derive(Clone, Default, Debug, Serialize, Deserialize, Validate)]
struct HookConfig {
    #[serde(default)]
    #[validate(nested)]
    add: Vec<Head>,
    #[serde(default)]
    #[validate(nested)]
    set: Vec<Head>,
    #[serde(default)]
    remove: Vec<String>,
}

pub struct HookHeaderRewrite {
    set: Vec<(HeaderName, HeaderValue)>,
    add: Vec<(HeaderName, HeaderValue)>,
    remove: Vec<HeaderName>,
}

impl HookHeaderRewrite {
    fn apply_headers(&self, headers: &mut HeaderMap) {
        for (name, value) in &self.set {
            headers.insert(name.clone(), value.clone());
        }

        for name in &self.remove {
            headers.remove(name);
        }

        for (name, value) in &self.add {
            headers.append(name.clone(), value.clone());
        }
    }
}

#[async_trait]
impl RequestHook for HookHeaderRewrite {
    fn name(&self) -> &str {
        HOOK_NAME
    }

    fn priority(&self) -> i32 {
        PRIORITY
    }

    async fn before_send(
        &self,
        _ctx: &mut RequestContext,
        request: &mut OutgoingRequest,
    ) -> SyncResult<()> {
        self.apply_headers(&mut request.headers);
        Ok(())
    }
}
