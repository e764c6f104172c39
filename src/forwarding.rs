//! Forwarding Model - Outputs, Pipelines, Requests
//!
//! Raw specs are untrusted: `type` and `sourceType` stay strings until
//! validation so that missing or unknown values can be reported.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use crate::config::GeneratorConfig;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    Elasticsearch,
    Forward,
    Cloudwatch,
    Syslog,
}

impl OutputType {
    pub const ALL: [OutputType; 4] = [
        OutputType::Elasticsearch,
        OutputType::Forward,
        OutputType::Cloudwatch,
        OutputType::Syslog,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputType::Elasticsearch => "elasticsearch",
            OutputType::Forward => "forward",
            OutputType::Cloudwatch => "cloudwatch",
            OutputType::Syslog => "syslog",
        }
    }

    /// Cloudwatch addresses its service through the region, not an endpoint.
    pub fn requires_endpoint(&self) -> bool {
        !matches!(self, OutputType::Cloudwatch)
    }

    /// Port used when the endpoint does not name one.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            OutputType::Elasticsearch => Some(9200),
            OutputType::Forward => Some(24224),
            OutputType::Cloudwatch => None,
            OutputType::Syslog => Some(514),
        }
    }
}

impl FromStr for OutputType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OutputType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceType {
    #[serde(rename = "logs.app")]
    App,
    #[serde(rename = "logs.infra")]
    Infra,
    #[serde(rename = "logs.audit")]
    Audit,
}

impl SourceType {
    pub const ALL: [SourceType; 3] = [SourceType::App, SourceType::Infra, SourceType::Audit];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::App => "logs.app",
            SourceType::Infra => "logs.infra",
            SourceType::Audit => "logs.audit",
        }
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputSecretSpec {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutputSpec {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub output_type: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub secret: Option<OutputSecretSpec>,
    #[serde(default)]
    pub cloudwatch: Option<CloudwatchSpec>,
    #[serde(default)]
    pub syslog: Option<SyslogSpec>,
}

impl OutputSpec {
    pub fn parsed_type(&self) -> Option<OutputType> {
        self.output_type.parse().ok()
    }

    pub fn secret_name(&self) -> Option<&str> {
        self.secret.as_ref().map(|s| s.name.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CloudwatchSpec {
    #[serde(default)]
    pub region: String,
    #[serde(default = "default_log_group_name")]
    pub log_group_name: String,
    #[serde(default)]
    pub log_stream_strategy: LogStreamStrategy,
}

fn default_log_group_name() -> String { "openshiftlogging".to_string() }

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogStreamStrategy {
    #[serde(default)]
    pub name: LogStreamStrategyType,
    #[serde(default)]
    pub stream_name: Option<String>,
    #[serde(default)]
    pub retention_in_days: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogStreamStrategyType {
    /// One stream per tag.
    #[default]
    Unique,
    /// Every record goes to `streamName`.
    Static,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyslogSpec {
    #[serde(default)]
    pub protocol: SyslogProtocol,
    #[serde(default)]
    pub facility: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub rfc: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub payload_key: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyslogProtocol {
    #[default]
    Tcp,
    Udp,
}

impl SyslogProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyslogProtocol::Tcp => "tcp",
            SyslogProtocol::Udp => "udp",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub source_type: String,
    #[serde(default)]
    pub output_refs: Vec<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl PipelineSpec {
    pub fn parsed_source_type(&self) -> Option<SourceType> {
        self.source_type.parse().ok()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ForwardingSpec {
    #[serde(default)]
    pub disable_default_forwarding: bool,
    #[serde(default)]
    pub outputs: Vec<OutputSpec>,
    #[serde(default)]
    pub pipelines: Vec<PipelineSpec>,
}

impl ForwardingSpec {
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty() && self.pipelines.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogStoreType {
    Elasticsearch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSettings {
    #[serde(default = "default_collector")]
    pub collector: String,
    #[serde(default)]
    pub log_store: Option<LogStoreType>,
    #[serde(default)]
    pub forwarding_enabled: bool,
}

fn default_collector() -> String { "fluentd".to_string() }

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            collector: default_collector(),
            log_store: None,
            forwarding_enabled: false,
        }
    }
}

/// Everything one generation needs, as supplied by the reconcile loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardingRequest {
    #[serde(default)]
    pub cluster: ClusterSettings,
    #[serde(default)]
    pub forwarding: ForwardingSpec,
    #[serde(default)]
    pub generator: GeneratorConfig,
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Failed to read request {0}: {1}")]
    Io(String, #[source] std::io::Error),

    #[error("Invalid JSON request: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid YAML request: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ForwardingRequest {
    /// Load a request document; `.json` files are parsed as JSON, anything else as YAML.
    pub fn from_path(path: &Path) -> Result<Self, RequestError> {
        let content = fs::read_to_string(path)
            .map_err(|e| RequestError::Io(path.display().to_string(), e))?;
        if path.extension().map_or(false, |e| e == "json") {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(serde_yaml::from_str(&content)?)
        }
    }
}
