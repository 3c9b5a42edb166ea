//! Configuration for the echo mock server.
//!
//! Defines the server settings, path rules, response templates and upstream
//! proxy descriptors, plus loading of the server file and the rule directory.

use crate::duration::serde_format;
use crate::error::RuleError;
use crate::matcher::RuleStore;
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

/// Body prefix marking a response body as a template.
pub const TEMPLATE_MARKER: &str = "template:";

/// Main server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind
    #[serde(default = "default_port")]
    pub port: u16,

    /// Time allowed for reading request headers (0 = unlimited)
    #[serde(default, with = "serde_format")]
    pub read_timeout: Duration,

    /// Time allowed for producing a response (0 = unlimited)
    #[serde(default, with = "serde_format")]
    pub write_timeout: Duration,

    /// Response used when no rule matches
    #[serde(default)]
    pub default_response: ResponseTemplate,

    /// Rules declared inline in the server file
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<RuleDefinition>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            read_timeout: Duration::ZERO,
            write_timeout: Duration::ZERO,
            default_response: ResponseTemplate::default(),
            paths: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load the server configuration from a JSON or YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let config: Self = read_document(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.default_response
            .validate()
            .map_err(|e| anyhow::anyhow!("defaultResponse: {}", e))?;
        Ok(())
    }

    /// Address string for the listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A single path rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDefinition {
    /// Optional unique identifier used by the admin API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Regular expression tested against the request path
    pub pattern: String,

    /// Allowed methods (empty = any)
    #[serde(default)]
    pub methods: Vec<String>,

    /// Normal response
    #[serde(default)]
    pub response: ResponseTemplate,

    /// Response returned on every `error_every`-th hit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_response: Option<ResponseTemplate>,

    /// Error cadence (0 or negative = disabled)
    #[serde(default)]
    pub error_every: i64,

    /// Upstream consulted before the body is resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyConfig>,
}

impl RuleDefinition {
    /// Create a rule with the given pattern and an empty response.
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            name: None,
            pattern: pattern.into(),
            methods: Vec::new(),
            response: ResponseTemplate::default(),
            error_response: None,
            error_every: 0,
            proxy: None,
        }
    }

    /// Validate everything except the pattern, which the store compiles.
    pub fn validate(&self) -> Result<(), RuleError> {
        self.response.validate()?;
        if let Some(error_response) = &self.error_response {
            error_response.validate()?;
        }
        Ok(())
    }

    /// Whether `method` is allowed by this rule.
    pub fn allows_method(&self, method: &str) -> bool {
        self.methods.is_empty() || self.methods.iter().any(|m| m.eq_ignore_ascii_case(method))
    }

    /// Whether the `count`-th hit on a path should get the error response.
    pub fn error_due(&self, count: u64) -> bool {
        self.error_response.is_some()
            && self.error_every > 0
            && count > 0
            && count % self.error_every as u64 == 0
    }

    /// Display label for log lines.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.pattern)
    }
}

/// Status, headers, body and delay applied to a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseTemplate {
    /// HTTP status code (0 = 200)
    #[serde(default)]
    pub status_code: u16,

    /// Response headers, applied verbatim
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Literal JSON, literal text, or `template:` followed by a template
    #[serde(default)]
    pub body: String,

    /// Time to hold the response before writing it
    #[serde(default, with = "serde_format")]
    pub delay: Duration,

    /// Echo the request snapshot alongside the response
    #[serde(default)]
    pub include_request: bool,
}

impl Default for ResponseTemplate {
    fn default() -> Self {
        Self {
            status_code: 200,
            headers: HashMap::new(),
            body: String::new(),
            delay: Duration::ZERO,
            include_request: false,
        }
    }
}

impl ResponseTemplate {
    /// Effective status code.
    pub fn status(&self) -> u16 {
        if self.status_code == 0 {
            200
        } else {
            self.status_code
        }
    }

    /// Validate the response template.
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.status_code != 0 && !(100..=599).contains(&self.status_code) {
            return Err(RuleError::InvalidStatus(self.status_code));
        }
        Ok(())
    }

    /// Template source, if the body carries the template marker.
    pub fn template_source(&self) -> Option<&str> {
        self.body.strip_prefix(TEMPLATE_MARKER)
    }
}

/// Upstream proxy descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    /// Upstream URL
    pub url: String,

    /// Upstream request timeout (0 = none)
    #[serde(default, with = "serde_format")]
    pub timeout: Duration,

    /// Prefix removed from the request path before appending it to `url`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strip_prefix: Option<String>,

    /// Send the inbound Host header upstream
    #[serde(default)]
    pub preserve_host: bool,

    /// Inbound headers copied to the upstream request
    #[serde(default)]
    pub forward_headers: Vec<String>,

    /// Upstream response headers copied onto the final response
    #[serde(default)]
    pub response_headers: Vec<String>,
}

impl ProxyConfig {
    /// Resolve the upstream URL for a request path and query.
    pub fn target_url(&self, path: &str, query: Option<&str>) -> String {
        let Some(prefix) = self.strip_prefix.as_deref() else {
            return self.url.clone();
        };
        let Some(rest) = path.strip_prefix(prefix) else {
            return self.url.clone();
        };

        let mut url = self.url.trim_end_matches('/').to_string();
        if !rest.is_empty() && !rest.starts_with('/') {
            url.push('/');
        }
        url.push_str(rest);
        if let Some(q) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(q);
        }
        url
    }
}

/// Load every rule file under `dir` into `store`.
///
/// Files are visited in lexical order so rule priority is stable. A file that
/// cannot be read, parsed or added is logged and skipped. Returns the number
/// of rules added.
pub fn load_rule_dir(dir: &Path, store: &RuleStore) -> anyhow::Result<usize> {
    if !dir.exists() {
        warn!(dir = %dir.display(), "Rule directory does not exist, no rules loaded");
        return Ok(0);
    }

    let mut files = Vec::new();
    collect_rule_files(dir, &mut files)
        .with_context(|| format!("walking rule directory {}", dir.display()))?;
    files.sort();

    let mut loaded = 0;
    for file in files {
        let rule: RuleDefinition = match read_document(&file) {
            Ok(rule) => rule,
            Err(e) => {
                error!(file = %file.display(), error = %e, "Failed to load rule file");
                continue;
            }
        };
        match store.add(rule) {
            Ok(()) => {
                info!(file = %file.display(), "Loaded rule file");
                loaded += 1;
            }
            Err(e) => error!(file = %file.display(), error = %e, "Failed to add rule"),
        }
    }
    Ok(loaded)
}

/// Add the inline `paths` of a server config to `store`, skipping bad rules.
pub fn load_inline_rules(config: &ServerConfig, store: &RuleStore) -> usize {
    let mut loaded = 0;
    for (i, rule) in config.paths.iter().enumerate() {
        match store.add(rule.clone()) {
            Ok(()) => loaded += 1,
            Err(e) => error!(index = i, error = %e, "Failed to add inline rule"),
        }
    }
    loaded
}

fn collect_rule_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_rule_files(&path, out)?;
        } else if is_config_file(&path) {
            out.push(path);
        }
    }
    Ok(())
}

fn is_config_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("json" | "yaml" | "yml")
    )
}

/// Read a JSON or YAML document, chosen by file extension.
fn read_document<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let value = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml" | "yml") => serde_yaml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?,
        _ => serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?,
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rule_with_string_delay() {
        let json = r#"{
            "name": "orders",
            "pattern": "^/orders/.*",
            "methods": ["GET", "POST"],
            "response": {
                "statusCode": 201,
                "headers": {"X-Custom": "a"},
                "body": "{\"ok\":true}",
                "delay": "100ms"
            },
            "errorResponse": {"statusCode": 503},
            "errorEvery": 3
        }"#;
        let rule: RuleDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(rule.name.as_deref(), Some("orders"));
        assert_eq!(rule.response.status(), 201);
        assert_eq!(rule.response.delay, Duration::from_millis(100));
        assert_eq!(rule.error_response.as_ref().unwrap().status(), 503);
        assert_eq!(rule.error_every, 3);
    }

    #[test]
    fn test_parse_rule_with_numeric_delay() {
        let json = r#"{"pattern": "^/x$", "response": {"delay": 250000000}}"#;
        let rule: RuleDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(rule.response.delay, Duration::from_millis(250));
    }

    #[test]
    fn test_legacy_fields_ignored() {
        let json = r#"{
            "pattern": "^/test/.*",
            "counterEnabled": true,
            "errorFrequency": 0.5
        }"#;
        let rule: RuleDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(rule.pattern, "^/test/.*");
        assert!(rule.methods.is_empty());
    }

    #[test]
    fn test_response_template_round_trip() {
        for raw in [
            r#"{"statusCode": 202, "headers": {"A": "b"}, "body": "x", "delay": 1500000000, "includeRequest": true}"#,
            r#"{"statusCode": 202, "headers": {"A": "b"}, "body": "x", "delay": "1.5s", "includeRequest": true}"#,
        ] {
            let parsed: ResponseTemplate = serde_json::from_str(raw).unwrap();
            let encoded = serde_json::to_string(&parsed).unwrap();
            assert!(encoded.contains(r#""delay":"1s500ms""#));
            let reparsed: ResponseTemplate = serde_json::from_str(&encoded).unwrap();
            assert_eq!(parsed, reparsed);
        }
    }

    #[test]
    fn test_status_defaults_and_validation() {
        let mut template = ResponseTemplate {
            status_code: 0,
            ..Default::default()
        };
        assert_eq!(template.status(), 200);
        assert!(template.validate().is_ok());

        template.status_code = 42;
        assert!(matches!(template.validate(), Err(RuleError::InvalidStatus(42))));
    }

    #[test]
    fn test_error_due() {
        let mut rule = RuleDefinition::new("^/e$");
        rule.error_every = 3;
        // No error response configured
        assert!(!rule.error_due(3));

        rule.error_response = Some(ResponseTemplate {
            status_code: 500,
            ..Default::default()
        });
        assert!(!rule.error_due(0));
        assert!(!rule.error_due(2));
        assert!(rule.error_due(3));
        assert!(rule.error_due(9));

        rule.error_every = -1;
        assert!(!rule.error_due(3));
    }

    #[test]
    fn test_allows_method() {
        let mut rule = RuleDefinition::new("^/");
        assert!(rule.allows_method("DELETE"));
        rule.methods = vec!["GET".to_string()];
        assert!(rule.allows_method("GET"));
        assert!(rule.allows_method("get"));
        assert!(!rule.allows_method("POST"));
    }

    #[test]
    fn test_proxy_target_url() {
        let mut proxy = ProxyConfig {
            url: "http://upstream:9000/api/".to_string(),
            timeout: Duration::ZERO,
            strip_prefix: None,
            preserve_host: false,
            forward_headers: vec![],
            response_headers: vec![],
        };
        assert_eq!(
            proxy.target_url("/orders/1", Some("a=b")),
            "http://upstream:9000/api/"
        );

        proxy.strip_prefix = Some("/orders".to_string());
        assert_eq!(
            proxy.target_url("/orders/1", Some("a=b")),
            "http://upstream:9000/api/1?a=b"
        );
        assert_eq!(proxy.target_url("/other", None), "http://upstream:9000/api/");
    }

    #[test]
    fn test_server_config_defaults() {
        let config: ServerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.read_timeout, Duration::ZERO);
        assert_eq!(config.default_response.status(), 200);
    }

    #[test]
    fn test_server_config_from_files() {
        let dir = tempfile::tempdir().unwrap();

        let json_path = dir.path().join("server.json");
        std::fs::write(
            &json_path,
            r#"{
                "host": "localhost",
                "port": 9090,
                "readTimeout": "30s",
                "writeTimeout": "30s",
                "defaultResponse": {"statusCode": 200, "headers": {"Content-Type": "application/json"}}
            }"#,
        )
        .unwrap();
        let config = ServerConfig::from_file(&json_path).unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.read_timeout, Duration::from_secs(30));
        assert_eq!(config.bind_address(), "localhost:9090");

        let yaml_path = dir.path().join("server.yaml");
        std::fs::write(&yaml_path, "port: 7070\nwriteTimeout: 2s\n").unwrap();
        let config = ServerConfig::from_file(&yaml_path).unwrap();
        assert_eq!(config.port, 7070);
        assert_eq!(config.write_timeout, Duration::from_secs(2));

        assert!(ServerConfig::from_file(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_server_config_rejects_bad_default_status() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(&path, r#"{"defaultResponse": {"statusCode": 1000}}"#).unwrap();
        assert!(ServerConfig::from_file(&path).is_err());
    }

    #[test]
    fn test_load_rule_dir_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();

        std::fs::write(
            dir.path().join("a.json"),
            r#"{"pattern": "^/test/.*", "methods": ["GET", "POST"], "response": {"delay": "100ms"}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("b.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("c.json"), r#"{"pattern": "("}"#).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(nested.join("d.yaml"), "pattern: ^/yaml$\n").unwrap();

        let store = RuleStore::new();
        let loaded = load_rule_dir(dir.path(), &store).unwrap();
        assert_eq!(loaded, 2);
        assert!(store.find("/test/123", "GET").is_some());
        assert!(store.find("/yaml", "GET").is_some());
    }

    #[test]
    fn test_load_rule_dir_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuleStore::new();
        assert_eq!(load_rule_dir(&dir.path().join("nope"), &store).unwrap(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_inline_rules() {
        let config: ServerConfig = serde_json::from_str(
            r#"{"paths": [{"pattern": "^/a$"}, {"pattern": "["}, {"pattern": "^/b$"}]}"#,
        )
        .unwrap();
        let store = RuleStore::new();
        assert_eq!(load_inline_rules(&config, &store), 2);
        assert_eq!(store.len(), 2);
    }
}
