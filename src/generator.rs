//! Config Generator - accepted spec to fluentd configuration text
//!
//! Block order is part of the output contract: source routing blocks in
//! source order, pipeline blocks sorted by pipeline name, output blocks in
//! declaration order, then legacy includes.

use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

use crate::config::GeneratorConfig;
use crate::forwarding::{ForwardingSpec, OutputSpec, OutputType, PipelineSpec, SourceType};
use crate::hashing::canonical_json;
use crate::templates::{
    output_template_name, pipeline_label_name, RenderError, TemplateData, TemplateEngine,
    LEGACY_INCLUDE_TEMPLATE, PIPELINE_LABEL_TEMPLATE, SOURCE_ROUTE_TEMPLATE,
};

pub const LEGACY_SECURE_FORWARD_LABEL: &str = "@_LEGACY_SECUREFORWARD";
pub const LEGACY_SECURE_FORWARD_CONF: &str = "/etc/fluent/configs.d/secure-forward/secure-forward.conf";
pub const LEGACY_SYSLOG_LABEL: &str = "@_LEGACY_SYSLOG";
pub const LEGACY_SYSLOG_CONF: &str = "/etc/fluent/configs.d/dynamic/output-remote-syslog.conf";

/// Sources the legacy configurations receive.
const LEGACY_SOURCES: [SourceType; 2] = [SourceType::App, SourceType::Infra];

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("Output {name} has unknown type {output_type:?}")]
    UnknownOutputType { name: String, output_type: String },

    #[error("Pipeline {name} has unknown source type {source_type:?}")]
    UnknownSourceType { name: String, source_type: String },

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Pipeline name -> key-sorted JSON of its labels. Pipelines without labels are skipped.
pub fn pipelines_to_serialized_labels(
    pipelines: &[PipelineSpec],
) -> Result<BTreeMap<String, String>, serde_json::Error> {
    let mut serialized = BTreeMap::new();
    for pipeline in pipelines.iter().filter(|p| !p.labels.is_empty()) {
        serialized.insert(pipeline.name.clone(), canonical_json(&pipeline.labels)?);
    }
    Ok(serialized)
}

pub struct ConfigGenerator<E: TemplateEngine> {
    engine: E,
    config: GeneratorConfig,
}

impl<E: TemplateEngine> ConfigGenerator<E> {
    pub fn new(engine: E, config: GeneratorConfig) -> Self {
        Self { engine, config }
    }

    /// One label block per pipeline, in key order of the map.
    pub fn generate_pipeline_label_blocks(
        &self,
        pipeline_labels: &BTreeMap<String, String>,
    ) -> Result<Vec<String>, RenderError> {
        pipeline_labels
            .iter()
            .map(|(pipeline, labels_json)| {
                self.engine.render(
                    PIPELINE_LABEL_TEMPLATE,
                    &TemplateData::Pipeline {
                        pipeline: pipeline.as_str(),
                        labels_json: Some(labels_json.as_str()),
                        outputs: &[],
                    },
                )
            })
            .collect()
    }

    /// Pipeline scopes sorted by name: the label filter, if any, then the
    /// copy into each referenced output scope.
    pub fn generate_pipeline_blocks(
        &self,
        pipelines: &[PipelineSpec],
        pipeline_labels: &BTreeMap<String, String>,
    ) -> Result<Vec<String>, RenderError> {
        let mut sorted: Vec<&PipelineSpec> = pipelines.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));
        sorted
            .into_iter()
            .map(|pipeline| {
                self.engine.render(
                    PIPELINE_LABEL_TEMPLATE,
                    &TemplateData::Pipeline {
                        pipeline: pipeline.name.as_str(),
                        labels_json: pipeline_labels.get(&pipeline.name).map(String::as_str),
                        outputs: pipeline.output_refs.as_slice(),
                    },
                )
            })
            .collect()
    }

    /// One copy block per log source feeding its pipelines, plus the legacy
    /// scopes when those are included.
    pub fn generate_source_route_blocks(
        &self,
        pipelines: &[PipelineSpec],
    ) -> Result<Vec<String>, GenerateError> {
        let mut sorted: Vec<&PipelineSpec> = pipelines.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));

        let mut routes: BTreeMap<SourceType, Vec<String>> = BTreeMap::new();
        for pipeline in sorted {
            let source = pipeline.parsed_source_type().ok_or_else(|| GenerateError::UnknownSourceType {
                name: pipeline.name.clone(),
                source_type: pipeline.source_type.clone(),
            })?;
            routes.entry(source).or_default().push(pipeline_label_name(&pipeline.name));
        }
        for (label, _) in self.legacy_includes() {
            for source in LEGACY_SOURCES {
                routes.entry(source).or_default().push(label.to_string());
            }
        }

        let mut blocks = Vec::with_capacity(routes.len());
        for (source, targets) in &routes {
            debug!(source = %source.as_str(), targets = targets.len(), "Rendering source route");
            blocks.push(self.engine.render(
                SOURCE_ROUTE_TEMPLATE,
                &TemplateData::SourceRoute { source: *source, targets: targets.as_slice() },
            )?);
        }
        Ok(blocks)
    }

    pub fn generate_output_label_blocks(
        &self,
        outputs: &[OutputSpec],
    ) -> Result<Vec<String>, GenerateError> {
        let mut blocks = Vec::with_capacity(outputs.len());
        for output in outputs {
            let output_type: OutputType = output.output_type.parse().map_err(|output_type| {
                GenerateError::UnknownOutputType {
                    name: output.name.clone(),
                    output_type,
                }
            })?;
            debug!(output = %output.name, %output_type, "Rendering output block");
            blocks.push(self.engine.render(
                output_template_name(output_type),
                &TemplateData::Output { output, config: &self.config },
            )?);
        }
        Ok(blocks)
    }

    fn legacy_includes(&self) -> Vec<(&'static str, &'static str)> {
        let mut includes = vec![];
        if self.config.include_legacy_forward_config {
            includes.push((LEGACY_SECURE_FORWARD_LABEL, LEGACY_SECURE_FORWARD_CONF));
        }
        if self.config.include_legacy_syslog_config {
            includes.push((LEGACY_SYSLOG_LABEL, LEGACY_SYSLOG_CONF));
        }
        includes
    }

    fn generate_legacy_blocks(&self) -> Result<Vec<String>, RenderError> {
        self.legacy_includes()
            .into_iter()
            .map(|(label, path)| {
                self.engine
                    .render(LEGACY_INCLUDE_TEMPLATE, &TemplateData::LegacyInclude { label, path })
            })
            .collect()
    }

    /// Render the whole configuration. Any failure discards everything rendered so far.
    pub fn generate(&self, spec: &ForwardingSpec) -> Result<String, GenerateError> {
        let pipeline_labels = pipelines_to_serialized_labels(&spec.pipelines)?;

        let mut blocks = self.generate_source_route_blocks(&spec.pipelines)?;
        blocks.extend(self.generate_pipeline_blocks(&spec.pipelines, &pipeline_labels)?);
        blocks.extend(self.generate_output_label_blocks(&spec.outputs)?);
        blocks.extend(self.generate_legacy_blocks()?);

        debug!(blocks = blocks.len(), "Generated collector configuration");
        let mut config = blocks.join("\n\n");
        if !config.is_empty() {
            config.push('\n');
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forwarding::{CloudwatchSpec, LogStreamStrategy, OutputSecretSpec};
    use crate::templates::TemplateRegistry;
    use std::cell::Cell;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn generator() -> ConfigGenerator<TemplateRegistry> {
        ConfigGenerator::new(TemplateRegistry::builtin(), GeneratorConfig::default())
    }

    fn labeled(name: &str, labels: &[(&str, &str)]) -> PipelineSpec {
        PipelineSpec {
            name: name.to_string(),
            source_type: "logs.app".to_string(),
            output_refs: vec!["out".to_string()],
            labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    fn trim_lines(text: &str) -> String {
        text.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_empty_pipelines_serialize_to_empty_map() {
        let labels = pipelines_to_serialized_labels(&[]).unwrap();
        assert!(labels.is_empty());
        assert!(generator().generate_pipeline_label_blocks(&labels).unwrap().is_empty());
    }

    #[test]
    fn test_pipeline_without_labels_is_skipped() {
        let labels = pipelines_to_serialized_labels(&[labeled("p1", &[])]).unwrap();
        assert!(labels.is_empty());
    }

    #[test]
    fn test_labels_serialized_sorted() {
        let labels = pipelines_to_serialized_labels(&[labeled(
            "TestPipeline",
            &[("field2", "label2"), ("field1", "label1")],
        )])
        .unwrap();
        let mut expected = BTreeMap::new();
        expected.insert(
            "TestPipeline".to_string(),
            r#"{"field1":"label1","field2":"label2"}"#.to_string(),
        );
        assert_eq!(labels, expected);
    }

    #[test]
    fn test_single_pipeline_label_block() {
        let labels = pipelines_to_serialized_labels(&[labeled("p1", &[("k", "v")])]).unwrap();
        let blocks = generator().generate_pipeline_label_blocks(&labels).unwrap();
        assert_eq!(
            blocks,
            vec![r#"<label @p1>
  <filter **>
    @type record_transformer
    <record>
      openshift { "labels": {"k":"v"} }
    </record>
  </filter>
</label>"#
                .to_string()]
        );
    }

    #[test]
    fn test_multiple_pipeline_blocks_sorted_by_name() {
        let mut labels = BTreeMap::new();
        labels.insert("pipeline2".to_string(), r#"{"label4":"value4"}"#.to_string());
        labels.insert("pipeline1".to_string(), r#"{"label1":"value1"}"#.to_string());
        let blocks = generator().generate_pipeline_label_blocks(&labels).unwrap();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].starts_with("<label @pipeline1>"));
        assert!(blocks[1].starts_with("<label @pipeline2>"));
        assert!(blocks[1].contains(r#"openshift { "labels": {"label4":"value4"} }"#));
    }

    #[test]
    fn test_cloudwatch_output_block() {
        let outputs = vec![OutputSpec {
            name: "my-cloudwatch".to_string(),
            output_type: "cloudwatch".to_string(),
            cloudwatch: Some(CloudwatchSpec {
                region: "anumber1".to_string(),
                log_group_name: "openshiftlogging".to_string(),
                log_stream_strategy: LogStreamStrategy {
                    retention_in_days: Some(7),
                    ..Default::default()
                },
            }),
            secret: Some(OutputSecretSpec { name: "my-secret".to_string() }),
            ..Default::default()
        }];
        let expected = r#"
            <label @MY_CLOUDWATCH>
              <filter **>
                @type record_transformer
                <record>
                  cw_stream_name ${tag}
                  cw_retention_days 7
                </record>
              </filter>
              <match **>
                @type cloudwatch_logs
                auto_create_stream true
                region anumber1
                log_group_name openshiftlogging
                log_stream_name_key cw_stream_name
                remove_log_stream_name_key true
                auto_create_stream true
                concurrency 2
                aws_key_id /var/run/ocp-collector/secrets/my-secret/aws_access_key_id
                aws_sec_key /var/run/ocp-collector/secrets/my-secret/aws_secret_access_key
                retention_in_days_key cw_retention_days
                #max_message_length 32768
                #use_tag_as_group false
                #use_tag_as_stream false
                include_time_key true
                #localtime true
                #log_group_name_key group_name_key
                #remove_log_group_name_key true
                #put_log_events_retry_wait 1s
                #put_log_events_retry_limit 17
                #put_log_events_disable_retry_limit false
                log_rejected_request true
              </match>
            </label>"#;

        let blocks = generator().generate_output_label_blocks(&outputs).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(trim_lines(&blocks[0]), trim_lines(expected));
    }

    #[test]
    fn test_cloudwatch_without_retention_comments_key() {
        let outputs = vec![OutputSpec {
            name: "cw".to_string(),
            output_type: "cloudwatch".to_string(),
            cloudwatch: Some(CloudwatchSpec {
                region: "eu-west-1".to_string(),
                log_group_name: "group".to_string(),
                log_stream_strategy: LogStreamStrategy::default(),
            }),
            ..Default::default()
        }];
        let blocks = generator().generate_output_label_blocks(&outputs).unwrap();
        assert!(blocks[0].contains("    #retention_in_days_key cw_retention_days\n"));
        assert!(!blocks[0].contains("cw_retention_days 7"));
        assert!(!blocks[0].contains("aws_key_id"));
    }

    #[test]
    fn test_unknown_output_type_is_error() {
        let outputs = vec![OutputSpec {
            name: "odd".to_string(),
            output_type: "kafka".to_string(),
            endpoint: "broker:9092".to_string(),
            ..Default::default()
        }];
        let err = generator().generate_output_label_blocks(&outputs).unwrap_err();
        assert!(matches!(err, GenerateError::UnknownOutputType { .. }));
    }

    #[test]
    fn test_generate_assembles_routes_pipelines_then_outputs() {
        let spec = ForwardingSpec {
            disable_default_forwarding: false,
            outputs: vec![OutputSpec {
                name: "out".to_string(),
                output_type: "forward".to_string(),
                endpoint: "fwd.example.com".to_string(),
                ..Default::default()
            }],
            pipelines: vec![labeled("p1", &[("k", "v")])],
        };
        let config = generator().generate(&spec).unwrap();
        let route_at = config.find("<label @_APPLICATION>").unwrap();
        let label_at = config.find("<label @p1>").unwrap();
        let output_at = config.find("<label @OUT>").unwrap();
        assert!(route_at < label_at && label_at < output_at);
        assert!(config.contains("      port 24224\n"));
        assert!(config.ends_with("</label>\n"));
    }

    #[test]
    fn test_pipeline_block_keeps_label_filter_and_relabels() {
        let spec = ForwardingSpec {
            pipelines: vec![labeled("p1", &[("k", "v")])],
            ..Default::default()
        };
        let config = generator().generate(&spec).unwrap();
        assert_eq!(
            config,
            r#"<label @_APPLICATION>
  <match **>
    @type copy
    <store>
      @type relabel
      @label @p1
    </store>
  </match>
</label>

<label @p1>
  <filter **>
    @type record_transformer
    <record>
      openshift { "labels": {"k":"v"} }
    </record>
  </filter>
  <match **>
    @type copy
    <store>
      @type relabel
      @label @OUT
    </store>
  </match>
</label>
"#
        );
    }

    #[test]
    fn test_source_routes_group_pipelines_by_source() {
        let mut infra = labeled("infra-a", &[]);
        infra.source_type = "logs.infra".to_string();
        let mut audit = labeled("audit", &[]);
        audit.source_type = "logs.audit".to_string();
        let pipelines = vec![labeled("zz-app", &[]), audit, infra, labeled("app", &[])];

        let blocks = generator().generate_source_route_blocks(&pipelines).unwrap();
        assert_eq!(blocks.len(), 3);
        assert!(blocks[0].starts_with("<label @_APPLICATION>"));
        let app = blocks[0].find("@label @app\n").unwrap();
        let zz = blocks[0].find("@label @zz_app\n").unwrap();
        assert!(app < zz);
        assert!(blocks[1].starts_with("<label @_INFRASTRUCTURE>"));
        assert!(blocks[1].contains("@label @infra_a\n"));
        assert!(blocks[2].starts_with("<label @_AUDIT>"));
    }

    #[test]
    fn test_pipeline_without_labels_still_relabels() {
        let blocks = generator()
            .generate_pipeline_blocks(&[labeled("p1", &[])], &BTreeMap::new())
            .unwrap();
        assert_eq!(blocks.len(), 1);
        assert!(!blocks[0].contains("<filter **>"));
        assert!(blocks[0].contains("      @label @OUT\n"));
    }

    #[test]
    fn test_unknown_source_type_is_error() {
        let mut pipeline = labeled("p", &[]);
        pipeline.source_type = "logs.bogus".to_string();
        let spec = ForwardingSpec { pipelines: vec![pipeline], ..Default::default() };
        let err = generator().generate(&spec).unwrap_err();
        assert!(matches!(err, GenerateError::UnknownSourceType { .. }));
    }

    #[test]
    fn test_render_failure_returns_no_partial_config() {
        // Renders the first block, then fails.
        struct FailsAfterFirst(Cell<u32>);

        impl TemplateEngine for FailsAfterFirst {
            fn render(&self, name: &str, data: &TemplateData<'_>) -> Result<String, RenderError> {
                let calls = self.0.get();
                self.0.set(calls + 1);
                if calls == 0 {
                    TemplateRegistry::builtin().render(name, data)
                } else {
                    Err(RenderError::UnknownTemplate(name.to_string()))
                }
            }
        }

        let spec = ForwardingSpec {
            outputs: vec![OutputSpec {
                name: "out".to_string(),
                output_type: "elasticsearch".to_string(),
                endpoint: "es.svc".to_string(),
                ..Default::default()
            }],
            pipelines: vec![labeled("p1", &[("k", "v")])],
            ..Default::default()
        };
        let engine = FailsAfterFirst(Cell::new(0));
        let result = ConfigGenerator::new(&engine, GeneratorConfig::default()).generate(&spec);
        assert!(matches!(result, Err(GenerateError::Render(RenderError::UnknownTemplate(_)))));
        assert_eq!(engine.0.get(), 2);
    }

    #[test]
    fn test_generate_empty_spec() {
        assert_eq!(generator().generate(&ForwardingSpec::default()).unwrap(), "");
    }

    #[test]
    fn test_legacy_includes_appended() {
        let config = GeneratorConfig {
            include_legacy_forward_config: true,
            include_legacy_syslog_config: true,
            ..Default::default()
        };
        let text = ConfigGenerator::new(TemplateRegistry::builtin(), config)
            .generate(&ForwardingSpec::default())
            .unwrap();
        let includes = format!(
            "<label {}>\n  @include {}\n</label>\n\n<label {}>\n  @include {}\n</label>\n",
            LEGACY_SECURE_FORWARD_LABEL,
            LEGACY_SECURE_FORWARD_CONF,
            LEGACY_SYSLOG_LABEL,
            LEGACY_SYSLOG_CONF
        );
        assert!(text.ends_with(&includes));

        let routes = format!(
            "  <match **>\n    @type copy\n    <store>\n      @type relabel\n      @label {}\n    </store>\n    <store>\n      @type relabel\n      @label {}\n    </store>\n  </match>\n</label>\n\n",
            LEGACY_SECURE_FORWARD_LABEL, LEGACY_SYSLOG_LABEL
        );
        assert_eq!(
            text,
            format!("<label @_APPLICATION>\n{routes}<label @_INFRASTRUCTURE>\n{routes}{includes}")
        );
    }

    #[test]
    fn test_generate_deterministic_across_label_insertion_order() {
        let mut a = labeled("p1", &[]);
        let mut b = labeled("p1", &[]);
        let mut labels_a = HashMap::new();
        let mut labels_b = HashMap::new();
        for (k, v) in [("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")] {
            labels_a.insert(k.to_string(), v.to_string());
        }
        for (k, v) in [("d", "4"), ("c", "3"), ("b", "2"), ("a", "1")] {
            labels_b.insert(k.to_string(), v.to_string());
        }
        a.labels = labels_a;
        b.labels = labels_b;
        let spec_a = ForwardingSpec { pipelines: vec![a], ..Default::default() };
        let spec_b = ForwardingSpec { pipelines: vec![b], ..Default::default() };
        assert_eq!(generator().generate(&spec_a).unwrap(), generator().generate(&spec_b).unwrap());
    }
}
