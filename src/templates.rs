//! Template System - Named Collector Config Fragments
//!
//! Every template renders one self-contained fluentd block with no trailing
//! newline. Output keywords must match the fluentd plugins exactly; the
//! text is handed to the collector without further checks.
//!
//! Records flow through three label scopes: the source scope of their log
//! type copies them into each pipeline scope, which copies them into the
//! scope of every output the pipeline references.

use std::collections::HashMap;
use thiserror::Error;

use crate::config::GeneratorConfig;
use crate::forwarding::{LogStreamStrategyType, OutputSpec, OutputType, SourceType};

pub const PIPELINE_LABEL_TEMPLATE: &str = "pipelineLabelConf";
pub const SOURCE_ROUTE_TEMPLATE: &str = "sourceToPipelineCopy";
pub const LEGACY_INCLUDE_TEMPLATE: &str = "legacyInclude";

pub const APPLICATION_LABEL: &str = "@_APPLICATION";
pub const INFRASTRUCTURE_LABEL: &str = "@_INFRASTRUCTURE";
pub const AUDIT_LABEL: &str = "@_AUDIT";

/// Record key the pipeline labels are written under.
pub const LABELS_RECORD_KEY: &str = "openshift";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("Template not found: {0}")]
    UnknownTemplate(String),

    #[error("Template {template} expects {expected} data")]
    DataMismatch { template: String, expected: &'static str },

    #[error("Template {template} is missing parameter {param}")]
    MissingParameter { template: String, param: &'static str },

    #[error("Invalid endpoint {0:?}")]
    InvalidEndpoint(String),
}

/// Data handed to a template.
#[derive(Debug, Clone, Copy)]
pub enum TemplateData<'a> {
    /// `labels_json` adds the label filter; `outputs` adds the relabel stage.
    Pipeline { pipeline: &'a str, labels_json: Option<&'a str>, outputs: &'a [String] },
    /// `targets` are full label names, `@` included.
    SourceRoute { source: SourceType, targets: &'a [String] },
    Output { output: &'a OutputSpec, config: &'a GeneratorConfig },
    LegacyInclude { label: &'a str, path: &'a str },
}

pub type RenderFn = fn(&str, &TemplateData<'_>) -> Result<String, RenderError>;

#[derive(Clone)]
pub struct Template {
    pub name: &'static str,
    pub description: &'static str,
    render: RenderFn,
}

impl std::fmt::Debug for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

impl Template {
    pub fn new(name: &'static str, description: &'static str, render: RenderFn) -> Self {
        Self { name, description, render }
    }
}

/// The rendering primitive the generator depends on.
pub trait TemplateEngine {
    fn render(&self, name: &str, data: &TemplateData<'_>) -> Result<String, RenderError>;
}

impl<T: TemplateEngine + ?Sized> TemplateEngine for &T {
    fn render(&self, name: &str, data: &TemplateData<'_>) -> Result<String, RenderError> {
        (**self).render(name, data)
    }
}

/// Template registry - holds the named templates
pub struct TemplateRegistry {
    templates: HashMap<&'static str, Template>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self { templates: HashMap::new() }
    }

    /// Registry with every fluentd template the generator uses.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Template::new(
            PIPELINE_LABEL_TEMPLATE,
            "Attach pipeline labels and copy records to the pipeline's outputs",
            render_pipeline,
        ));
        registry.register(Template::new(
            SOURCE_ROUTE_TEMPLATE,
            "Copy records of a log source into its pipelines",
            render_source_route,
        ));
        registry.register(Template::new(
            LEGACY_INCLUDE_TEMPLATE,
            "Include a legacy configuration file",
            render_legacy_include,
        ));
        for output_type in OutputType::ALL {
            registry.register(output_template(output_type));
        }
        registry
    }

    pub fn get(&self, name: &str) -> Option<&Template> {
        self.templates.get(name)
    }

    /// Templates sorted by name.
    pub fn list(&self) -> Vec<&Template> {
        let mut templates: Vec<_> = self.templates.values().collect();
        templates.sort_by_key(|t| t.name);
        templates
    }

    pub fn register(&mut self, template: Template) {
        self.templates.insert(template.name, template);
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TemplateEngine for TemplateRegistry {
    fn render(&self, name: &str, data: &TemplateData<'_>) -> Result<String, RenderError> {
        let template = self
            .get(name)
            .ok_or_else(|| RenderError::UnknownTemplate(name.to_string()))?;
        (template.render)(name, data)
    }
}

/// Template name for an output type's block.
pub fn output_template_name(output_type: OutputType) -> &'static str {
    match output_type {
        OutputType::Elasticsearch => "outputLabelConf.elasticsearch",
        OutputType::Forward => "outputLabelConf.forward",
        OutputType::Cloudwatch => "outputLabelConf.cloudwatch",
        OutputType::Syslog => "outputLabelConf.syslog",
    }
}

fn output_template(output_type: OutputType) -> Template {
    let name = output_template_name(output_type);
    match output_type {
        OutputType::Elasticsearch => Template::new(name, "Ship to Elasticsearch", render_elasticsearch),
        OutputType::Forward => Template::new(name, "Ship with fluentd forward protocol", render_forward),
        OutputType::Cloudwatch => Template::new(name, "Ship to AWS CloudWatch Logs", render_cloudwatch),
        OutputType::Syslog => Template::new(name, "Ship to a remote syslog server", render_syslog),
    }
}

/// `my-pipeline.v1` -> `my_pipeline_v1`
pub fn label_token(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Scope name of an output's label block, e.g. `@MY_CLOUDWATCH`.
pub fn output_label_name(name: &str) -> String {
    format!("@{}", label_token(name).to_uppercase())
}

/// Scope name of a pipeline's label block; case is kept.
pub fn pipeline_label_name(name: &str) -> String {
    format!("@{}", label_token(name))
}

pub fn source_label_name(source: SourceType) -> &'static str {
    match source {
        SourceType::App => APPLICATION_LABEL,
        SourceType::Infra => INFRASTRUCTURE_LABEL,
        SourceType::Audit => AUDIT_LABEL,
    }
}

fn output_data<'a>(
    template: &str,
    data: &TemplateData<'a>,
) -> Result<(&'a OutputSpec, &'a GeneratorConfig), RenderError> {
    match *data {
        TemplateData::Output { output, config } => Ok((output, config)),
        _ => Err(RenderError::DataMismatch {
            template: template.to_string(),
            expected: "output",
        }),
    }
}

/// Sets either `key value` or the commented-out system default.
fn param(lines: &mut Vec<String>, indent: &str, key: &str, value: Option<&str>, default: &str) {
    match value {
        Some(v) => lines.push(format!("{}{} {}", indent, key, v)),
        None => lines.push(format!("{}#{} {}", indent, key, default)),
    }
}

/// Splits `[scheme://]host[:port][/path]`.
pub fn split_endpoint(endpoint: &str, default_port: u16) -> Result<(String, u16), RenderError> {
    let rest = endpoint.split_once("://").map_or(endpoint, |(_, r)| r);
    let authority = rest.split('/').next().unwrap_or_default();
    if authority.is_empty() {
        return Err(RenderError::InvalidEndpoint(endpoint.to_string()));
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port
                .parse::<u16>()
                .map_err(|_| RenderError::InvalidEndpoint(endpoint.to_string()))?;
            Ok((host.to_string(), port))
        }
        Some(_) => Err(RenderError::InvalidEndpoint(endpoint.to_string())),
        None => Ok((authority.to_string(), default_port)),
    }
}

fn host_port(output: &OutputSpec, output_type: OutputType) -> Result<(String, u16), RenderError> {
    split_endpoint(&output.endpoint, output_type.default_port().unwrap_or_default())
}

fn copy_to_labels(lines: &mut Vec<String>, targets: impl IntoIterator<Item = String>) {
    lines.push("  <match **>".to_string());
    lines.push("    @type copy".to_string());
    for target in targets {
        lines.push("    <store>".to_string());
        lines.push("      @type relabel".to_string());
        lines.push(format!("      @label {}", target));
        lines.push("    </store>".to_string());
    }
    lines.push("  </match>".to_string());
}

fn file_buffer(lines: &mut Vec<String>, output: &OutputSpec, config: &GeneratorConfig) {
    lines.push("    <buffer>".to_string());
    lines.push("      @type file".to_string());
    lines.push(format!(
        "      path '{}/{}'",
        config.buffer_root.trim_end_matches('/'),
        label_token(&output.name).to_lowercase()
    ));
    lines.push("      flush_mode interval".to_string());
    lines.push("      flush_interval 1s".to_string());
    lines.push("      flush_thread_count 2".to_string());
    lines.push("      retry_type exponential_backoff".to_string());
    lines.push("      retry_wait 1s".to_string());
    lines.push("      retry_max_interval 300s".to_string());
    lines.push("      retry_forever true".to_string());
    lines.push("      overflow_action block".to_string());
    lines.push("    </buffer>".to_string());
}

fn render_pipeline(template: &str, data: &TemplateData<'_>) -> Result<String, RenderError> {
    let TemplateData::Pipeline { pipeline, labels_json, outputs } = *data else {
        return Err(RenderError::DataMismatch {
            template: template.to_string(),
            expected: "pipeline",
        });
    };
    let mut lines = vec![format!("<label {}>", pipeline_label_name(pipeline))];
    if let Some(labels_json) = labels_json {
        lines.extend([
            "  <filter **>".to_string(),
            "    @type record_transformer".to_string(),
            "    <record>".to_string(),
            format!("      {} {{ \"labels\": {} }}", LABELS_RECORD_KEY, labels_json),
            "    </record>".to_string(),
            "  </filter>".to_string(),
        ]);
    }
    if !outputs.is_empty() {
        copy_to_labels(&mut lines, outputs.iter().map(|o| output_label_name(o)));
    }
    lines.push("</label>".to_string());
    Ok(lines.join("\n"))
}

fn render_source_route(template: &str, data: &TemplateData<'_>) -> Result<String, RenderError> {
    let TemplateData::SourceRoute { source, targets } = *data else {
        return Err(RenderError::DataMismatch {
            template: template.to_string(),
            expected: "source route",
        });
    };
    if targets.is_empty() {
        return Err(RenderError::MissingParameter {
            template: template.to_string(),
            param: "targets",
        });
    }
    let mut lines = vec![format!("<label {}>", source_label_name(source))];
    copy_to_labels(&mut lines, targets.iter().cloned());
    lines.push("</label>".to_string());
    Ok(lines.join("\n"))
}

fn render_legacy_include(template: &str, data: &TemplateData<'_>) -> Result<String, RenderError> {
    let TemplateData::LegacyInclude { label, path } = *data else {
        return Err(RenderError::DataMismatch {
            template: template.to_string(),
            expected: "legacy include",
        });
    };
    Ok([
        format!("<label {}>", label),
        format!("  @include {}", path),
        "</label>".to_string(),
    ]
    .join("\n"))
}

fn render_elasticsearch(template: &str, data: &TemplateData<'_>) -> Result<String, RenderError> {
    let (output, config) = output_data(template, data)?;
    let (host, port) = host_port(output, OutputType::Elasticsearch)?;
    let secret = output.secret_name();

    let mut lines = vec![
        format!("<label {}>", output_label_name(&output.name)),
        "  <match **>".to_string(),
        "    @type elasticsearch".to_string(),
        format!("    @id {}", label_token(&output.name).to_lowercase()),
        format!("    host {}", host),
        format!("    port {}", port),
    ];
    match secret {
        Some(secret) => {
            lines.push("    scheme https".to_string());
            lines.push("    ssl_version TLSv1_2".to_string());
            lines.push(format!("    client_key '{}'", config.secret_path(secret, "tls.key")));
            lines.push(format!("    client_cert '{}'", config.secret_path(secret, "tls.crt")));
            lines.push(format!("    ca_file '{}'", config.secret_path(secret, "ca-bundle.crt")));
        }
        None => lines.push("    scheme http".to_string()),
    }
    lines.extend(
        [
            "    target_index_key viaq_index_name",
            "    id_key viaq_msg_id",
            "    remove_keys viaq_index_name",
            "    type_name _doc",
            "    http_backend typhoeus",
            "    write_operation create",
            "    reload_connections 'true'",
            "    reload_after 200",
            "    sniffer_class_name 'Fluent::Plugin::ElasticsearchSimpleSniffer'",
            "    reload_on_failure false",
            "    request_timeout 2147483648",
        ]
        .map(String::from),
    );
    file_buffer(&mut lines, output, config);
    lines.push("  </match>".to_string());
    lines.push("</label>".to_string());
    Ok(lines.join("\n"))
}

fn render_forward(template: &str, data: &TemplateData<'_>) -> Result<String, RenderError> {
    let (output, config) = output_data(template, data)?;
    let (host, port) = host_port(output, OutputType::Forward)?;

    let mut lines = vec![
        format!("<label {}>", output_label_name(&output.name)),
        "  <match **>".to_string(),
        "    @type forward".to_string(),
        format!("    @id {}", label_token(&output.name).to_lowercase()),
    ];
    if let Some(secret) = output.secret_name() {
        let shared_key = config.secret_path(secret, "shared_key");
        lines.push("    <security>".to_string());
        lines.push("      self_hostname ${hostname}".to_string());
        lines.push(format!(
            "      shared_key \"#{{File.exists?('{0}') ? open('{0}','r') do |f|f.read end : ''}}\"",
            shared_key
        ));
        lines.push("    </security>".to_string());
        lines.push("    transport tls".to_string());
        lines.push("    tls_verify_hostname false".to_string());
        lines.push("    tls_version 'TLSv1_2'".to_string());
        lines.push(format!("    tls_client_private_key_path {}", config.secret_path(secret, "tls.key")));
        lines.push(format!("    tls_client_cert_path {}", config.secret_path(secret, "tls.crt")));
        lines.push(format!("    tls_cert_path {}", config.secret_path(secret, "ca-bundle.crt")));
    }
    file_buffer(&mut lines, output, config);
    lines.push("    <server>".to_string());
    lines.push(format!("      host {}", host));
    lines.push(format!("      port {}", port));
    lines.push("    </server>".to_string());
    lines.push("  </match>".to_string());
    lines.push("</label>".to_string());
    Ok(lines.join("\n"))
}

fn render_cloudwatch(template: &str, data: &TemplateData<'_>) -> Result<String, RenderError> {
    let (output, config) = output_data(template, data)?;
    let cw = output.cloudwatch.as_ref().ok_or_else(|| RenderError::MissingParameter {
        template: template.to_string(),
        param: "cloudwatch",
    })?;
    let strategy = &cw.log_stream_strategy;
    let stream_name = match strategy.name {
        LogStreamStrategyType::Unique => "${tag}".to_string(),
        LogStreamStrategyType::Static => strategy
            .stream_name
            .clone()
            .unwrap_or_else(|| output.name.clone()),
    };

    let mut lines = vec![
        format!("<label {}>", output_label_name(&output.name)),
        "  <filter **>".to_string(),
        "    @type record_transformer".to_string(),
        "    <record>".to_string(),
        format!("      cw_stream_name {}", stream_name),
    ];
    if let Some(days) = strategy.retention_in_days {
        lines.push(format!("      cw_retention_days {}", days));
    }
    lines.extend(
        [
            "    </record>",
            "  </filter>",
            "  <match **>",
            "    @type cloudwatch_logs",
            "    auto_create_stream true",
        ]
        .map(String::from),
    );
    lines.push(format!("    region {}", cw.region));
    lines.push(format!("    log_group_name {}", cw.log_group_name));
    lines.push("    log_stream_name_key cw_stream_name".to_string());
    lines.push("    remove_log_stream_name_key true".to_string());
    lines.push("    auto_create_stream true".to_string());
    lines.push("    concurrency 2".to_string());
    if let Some(secret) = output.secret_name() {
        lines.push(format!("    aws_key_id {}", config.secret_path(secret, "aws_access_key_id")));
        lines.push(format!("    aws_sec_key {}", config.secret_path(secret, "aws_secret_access_key")));
    }
    let retention_key = strategy.retention_in_days.map(|_| "cw_retention_days");
    param(&mut lines, "    ", "retention_in_days_key", retention_key, "cw_retention_days");
    lines.extend(
        [
            "    #max_message_length 32768",
            "    #use_tag_as_group false",
            "    #use_tag_as_stream false",
            "    include_time_key true",
            "    #localtime true",
            "    #log_group_name_key group_name_key",
            "    #remove_log_group_name_key true",
            "    #put_log_events_retry_wait 1s",
            "    #put_log_events_retry_limit 17",
            "    #put_log_events_disable_retry_limit false",
            "    log_rejected_request true",
            "  </match>",
            "</label>",
        ]
        .map(String::from),
    );
    Ok(lines.join("\n"))
}

fn render_syslog(template: &str, data: &TemplateData<'_>) -> Result<String, RenderError> {
    let (output, config) = output_data(template, data)?;
    if config.use_old_remote_syslog_plugin {
        return render_syslog_buffered(output, config);
    }
    let (host, port) = host_port(output, OutputType::Syslog)?;
    let syslog = output.syslog.clone().unwrap_or_default();

    let mut lines = vec![
        format!("<label {}>", output_label_name(&output.name)),
        "  <match **>".to_string(),
        "    @type remote_syslog".to_string(),
        format!("    @id {}", label_token(&output.name).to_lowercase()),
        format!("    host {}", host),
        format!("    port {}", port),
        format!("    protocol {}", syslog.protocol.as_str()),
    ];
    param(&mut lines, "    ", "facility", syslog.facility.as_deref(), "user");
    param(&mut lines, "    ", "severity", syslog.severity.as_deref(), "debug");
    param(&mut lines, "    ", "rfc", syslog.rfc.as_deref(), "rfc5424");
    param(&mut lines, "    ", "program", syslog.tag.as_deref(), "fluentd");
    param(&mut lines, "    ", "payload_key", syslog.payload_key.as_deref(), "message");
    if let Some(secret) = output.secret_name() {
        lines.push("    tls true".to_string());
        lines.push(format!("    ca_file '{}'", config.secret_path(secret, "ca-bundle.crt")));
        lines.push("    verify_mode true".to_string());
    }
    file_buffer(&mut lines, output, config);
    lines.push("  </match>".to_string());
    lines.push("</label>".to_string());
    Ok(lines.join("\n"))
}

/// The `syslog_buffered` plugin speaks TCP only and has no TLS support.
fn render_syslog_buffered(output: &OutputSpec, config: &GeneratorConfig) -> Result<String, RenderError> {
    let (host, port) = host_port(output, OutputType::Syslog)?;
    let syslog = output.syslog.clone().unwrap_or_default();
    let token = label_token(&output.name).to_lowercase();

    let mut lines = vec![
        format!("<label {}>", output_label_name(&output.name)),
        "  <match **>".to_string(),
        "    @type syslog_buffered".to_string(),
        format!("    @id {}", token),
        format!("    remote_syslog {}", host),
        format!("    port {}", port),
        "    hostname ${hostname}".to_string(),
    ];
    param(&mut lines, "    ", "facility", syslog.facility.as_deref(), "user");
    param(&mut lines, "    ", "severity", syslog.severity.as_deref(), "debug");
    param(&mut lines, "    ", "tag_key", syslog.tag.as_deref(), "tag");
    if let Some(payload_key) = syslog.payload_key.as_deref() {
        lines.push("    use_record true".to_string());
        lines.push(format!("    payload_key {}", payload_key));
    } else {
        lines.push("    #payload_key message".to_string());
    }
    lines.push("    buffer_type file".to_string());
    lines.push(format!("    buffer_path '{}/{}'", config.buffer_root.trim_end_matches('/'), token));
    lines.push("    flush_interval 1s".to_string());
    lines.push("    retry_wait 1s".to_string());
    lines.push("    max_retry_wait 300s".to_string());
    lines.push("    disable_retry_limit true".to_string());
    lines.push("  </match>".to_string());
    lines.push("</label>".to_string());
    Ok(lines.join("\n"))
}
