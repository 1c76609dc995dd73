use std::collections::HashMap;
use std::fs;

use http::{HeaderName, HeaderValue, Uri};
use log::{debug, trace};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use serde_yaml::Value as YamlValue;
use validator::{Validate, ValidationError};

use crate::{
    core::{ErrorContext, SyncResult},
    normalize::MergeStrategy,
    request::ResponseType,
};

pub const DEFAULT_CHAR_SET: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const DEFAULT_REQUEST_ID_HEADER: &str = "X-Request-Id";

const FIELD_NAME_PATTERN: &str = r"^[A-Za-z0-9_.\[\]-]+$";

#[derive(Default, Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Config {
    /// Prefix joined with relative endpoints
    #[validate(custom(function = "Config::validate_base_url"))]
    pub base_url: Option<String>,

    #[serde(default)]
    pub modules: Modules,

    #[validate(nested)]
    #[serde(default)]
    pub request: RequestDefaults,

    #[validate(nested)]
    #[serde(default)]
    pub request_id: RequestIdConfig,

    /// System-default merge strategy per storage key
    #[serde(default)]
    pub merge_strategies: HashMap<String, MergeStrategy>,

    /// Built-in hooks by name
    #[serde(default)]
    pub hooks: HashMap<String, YamlValue>,

    #[validate(nested)]
    pub log: Option<Log>,
}

// Config file load and validation
impl Config {
    pub fn load_from_yaml<P>(path: P) -> SyncResult<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path)
            .config_context(&format!("Unable to read conf file from {path}"))?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    pub fn from_yaml(conf_str: &str) -> SyncResult<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: Config =
            serde_yaml::from_str(conf_str).config_context("Unable to parse yaml conf")?;

        trace!("Loaded conf: {conf:?}");

        conf.validate().config_context("Conf file valid failed")?;

        Ok(conf)
    }

    pub fn to_yaml(&self) -> SyncResult<String> {
        serde_yaml::to_string(self).with_context("Unable to serialize conf")
    }

    fn validate_base_url(base_url: &String) -> Result<(), ValidationError> {
        let uri: Uri = base_url
            .parse()
            .map_err(|_| ValidationError::new("invalid_base_url"))?;
        match uri.scheme_str() {
            Some("http") | Some("https") => Ok(()),
            _ => Err(ValidationError::new("base_url_scheme_must_be_http")),
        }
    }
}

/// Independently togglable coordinator modules
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modules {
    #[serde(default = "Modules::enabled")]
    pub listener: bool,
    #[serde(default = "Modules::enabled")]
    pub history: bool,
    #[serde(default = "Modules::enabled")]
    pub storage: bool,
    #[serde(default = "Modules::enabled", alias = "cancelation")]
    pub cancellation: bool,
}

impl Default for Modules {
    fn default() -> Self {
        Self {
            listener: true,
            history: true,
            storage: true,
            cancellation: true,
        }
    }
}

impl Modules {
    fn enabled() -> bool {
        true
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "RequestDefaults::validate_distinct_fields"))]
pub struct RequestDefaults {
    #[serde(default)]
    #[validate(custom(function = "RequestDefaults::validate_headers"))]
    pub default_headers: HashMap<String, String>,
    /// Merged under every request body, request keys win
    #[serde(default)]
    pub default_body: JsonMap<String, JsonValue>,
    #[serde(default)]
    pub response_type: ResponseType,
    #[serde(default = "RequestDefaults::default_file_field")]
    #[validate(custom(function = "RequestDefaults::validate_field_name"))]
    pub file_field: String,
    #[serde(default = "RequestDefaults::default_body_field")]
    #[validate(custom(function = "RequestDefaults::validate_field_name"))]
    pub body_field: String,
    #[serde(default = "RequestDefaults::default_request_id_header")]
    #[validate(custom(function = "RequestDefaults::validate_header_name"))]
    pub request_id_header: String,
    pub timeout_ms: Option<u64>,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            default_headers: HashMap::new(),
            default_body: JsonMap::new(),
            response_type: ResponseType::default(),
            file_field: Self::default_file_field(),
            body_field: Self::default_body_field(),
            request_id_header: Self::default_request_id_header(),
            timeout_ms: None,
        }
    }
}

impl RequestDefaults {
    fn default_file_field() -> String {
        "files".to_string()
    }

    fn default_body_field() -> String {
        "body".to_string()
    }

    fn default_request_id_header() -> String {
        DEFAULT_REQUEST_ID_HEADER.to_string()
    }

    fn validate_field_name(name: &String) -> Result<(), ValidationError> {
        let re = Regex::new(FIELD_NAME_PATTERN).map_err(|_| ValidationError::new("invalid_regex"))?;
        if re.is_match(name) {
            Ok(())
        } else {
            let mut err = ValidationError::new("invalid_field_name");
            err.add_param("name".into(), name);
            Err(err)
        }
    }

    fn validate_header_name(name: &String) -> Result<(), ValidationError> {
        HeaderName::from_bytes(name.as_bytes())
            .map(|_| ())
            .map_err(|_| ValidationError::new("invalid_header_name"))
    }

    fn validate_headers(headers: &HashMap<String, String>) -> Result<(), ValidationError> {
        for (name, value) in headers {
            if HeaderName::from_bytes(name.as_bytes()).is_err()
                || HeaderValue::from_str(value).is_err()
            {
                let mut err = ValidationError::new("invalid_header");
                err.add_param("name".into(), name);
                return Err(err);
            }
        }
        Ok(())
    }

    fn validate_distinct_fields(&self) -> Result<(), ValidationError> {
        if self.file_field == self.body_field {
            Err(ValidationError::new("file_field_and_body_field_must_differ"))
        } else {
            Ok(())
        }
    }
}

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestIdAlgorithm {
    #[default]
    Uuid,
    RangeId,
}

#[derive(Clone, Default, Debug, Serialize, Deserialize, Validate)]
pub struct RequestIdConfig {
    #[serde(default)]
    pub algorithm: RequestIdAlgorithm,
    #[serde(default)]
    #[validate(nested)]
    pub range_id: RangeId,
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct RangeId {
    #[serde(default = "RangeId::default_char_set")]
    pub char_set: String,
    #[serde(default = "RangeId::default_length")]
    #[validate(range(min = 1, max = 128))]
    pub length: u32,
}

impl Default for RangeId {
    fn default() -> Self {
        Self {
            char_set: Self::default_char_set(),
            length: Self::default_length(),
        }
    }
}

impl RangeId {
    pub fn default_char_set() -> String {
        DEFAULT_CHAR_SET.to_string()
    }

    pub fn default_length() -> u32 {
        16
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Log {
    #[validate(length(min = 1))]
    pub path: String,
}
