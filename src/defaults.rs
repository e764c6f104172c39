//! Default Forwarding - Reserved Names and the Managed Store Route
//!
//! The default spec is built from constants and is never validated.

use std::sync::OnceLock;

use crate::forwarding::{
    ForwardingRequest, ForwardingSpec, LogStoreType, OutputSecretSpec, OutputSpec, OutputType,
    PipelineSpec, SourceType,
};
use crate::generator::{LEGACY_SECURE_FORWARD_LABEL, LEGACY_SYSLOG_LABEL};
use crate::status::{EntityStatus, ForwardingStatus};
use crate::templates::{APPLICATION_LABEL, AUDIT_LABEL, INFRASTRUCTURE_LABEL};

pub const INTERNAL_OUTPUT_NAME: &str = "clo-default-output-es";
pub const DEFAULT_APP_PIPELINE_NAME: &str = "clo-default-app-pipeline";
pub const DEFAULT_INFRA_PIPELINE_NAME: &str = "clo-default-infra-pipeline";
pub const COLLECTOR_SECRET_NAME: &str = "fluentd";
pub const LOG_STORE_SERVICE: &str = "elasticsearch.openshift-logging.svc:9200";

const GENERATED_OUTPUT_MESSAGE: &str = "This is an operator generated output because forwarding is undefined and 'DisableDefaultForwarding' is false";
const GENERATED_PIPELINE_MESSAGE: &str = "This is an operator generated pipeline because forwarding is undefined and 'DisableDefaultForwarding' is false";

/// Names user-declared entities may not take.
#[derive(Debug)]
pub struct ReservedNames {
    pub output: &'static str,
    pub pipelines: [&'static str; 2],
    /// Label scopes the generator emits on its own.
    pub labels: [&'static str; 5],
}

impl ReservedNames {
    pub fn get() -> &'static ReservedNames {
        static RESERVED: OnceLock<ReservedNames> = OnceLock::new();
        RESERVED.get_or_init(|| ReservedNames {
            output: INTERNAL_OUTPUT_NAME,
            pipelines: [DEFAULT_APP_PIPELINE_NAME, DEFAULT_INFRA_PIPELINE_NAME],
            labels: [
                APPLICATION_LABEL,
                INFRASTRUCTURE_LABEL,
                AUDIT_LABEL,
                LEGACY_SECURE_FORWARD_LABEL,
                LEGACY_SYSLOG_LABEL,
            ],
        })
    }

    pub fn is_reserved_output(&self, name: &str) -> bool {
        self.output == name
    }

    pub fn is_reserved_pipeline(&self, name: &str) -> bool {
        self.pipelines.contains(&name)
    }

    /// `label` is a full scope name such as `@_APPLICATION`.
    pub fn is_reserved_label(&self, label: &str) -> bool {
        self.labels.contains(&label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForwardingDecision {
    /// Route to the managed store; the spec and status are trusted as-is.
    UseDefault(ForwardingSpec, ForwardingStatus),
    /// Validate and use the caller's declared forwarding.
    UseExplicit,
    /// Nothing to forward.
    Empty,
}

pub fn decide(request: &ForwardingRequest) -> ForwardingDecision {
    let managed_store = request.cluster.log_store == Some(LogStoreType::Elasticsearch);
    let forwarding = &request.forwarding;

    if managed_store && !forwarding.disable_default_forwarding && forwarding.pipelines.is_empty() {
        let (spec, status) = default_forwarding();
        return ForwardingDecision::UseDefault(spec, status);
    }
    if request.cluster.forwarding_enabled {
        ForwardingDecision::UseExplicit
    } else {
        ForwardingDecision::Empty
    }
}

pub fn default_forwarding() -> (ForwardingSpec, ForwardingStatus) {
    let spec = ForwardingSpec {
        disable_default_forwarding: false,
        outputs: vec![OutputSpec {
            name: INTERNAL_OUTPUT_NAME.to_string(),
            output_type: OutputType::Elasticsearch.as_str().to_string(),
            endpoint: LOG_STORE_SERVICE.to_string(),
            secret: Some(OutputSecretSpec {
                name: COLLECTOR_SECRET_NAME.to_string(),
            }),
            ..Default::default()
        }],
        pipelines: vec![
            default_pipeline(DEFAULT_APP_PIPELINE_NAME, SourceType::App),
            default_pipeline(DEFAULT_INFRA_PIPELINE_NAME, SourceType::Infra),
        ],
    };
    let status = ForwardingStatus {
        outputs: vec![EntityStatus::generated(INTERNAL_OUTPUT_NAME, GENERATED_OUTPUT_MESSAGE)],
        pipelines: vec![
            EntityStatus::generated(DEFAULT_APP_PIPELINE_NAME, GENERATED_PIPELINE_MESSAGE),
            EntityStatus::generated(DEFAULT_INFRA_PIPELINE_NAME, GENERATED_PIPELINE_MESSAGE),
        ],
        log_sources: vec![SourceType::App, SourceType::Infra],
    };
    (spec, status)
}

fn default_pipeline(name: &str, source: SourceType) -> PipelineSpec {
    PipelineSpec {
        name: name.to_string(),
        source_type: source.as_str().to_string(),
        output_refs: vec![INTERNAL_OUTPUT_NAME.to_string()],
        labels: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forwarding::ClusterSettings;
    use crate::status::{ConditionReason, EntityState};

    fn request(log_store: bool, enabled: bool, disable_default: bool, pipelines: usize) -> ForwardingRequest {
        ForwardingRequest {
            cluster: ClusterSettings {
                log_store: log_store.then_some(LogStoreType::Elasticsearch),
                forwarding_enabled: enabled,
                ..Default::default()
            },
            forwarding: ForwardingSpec {
                disable_default_forwarding: disable_default,
                outputs: vec![],
                pipelines: vec![PipelineSpec::default(); pipelines],
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_default_when_store_and_no_pipelines() {
        match decide(&request(true, false, false, 0)) {
            ForwardingDecision::UseDefault(spec, status) => {
                assert_eq!(spec.outputs.len(), 1);
                assert_eq!(spec.outputs[0].name, INTERNAL_OUTPUT_NAME);
                assert_eq!(spec.outputs[0].secret_name(), Some(COLLECTOR_SECRET_NAME));
                assert_eq!(spec.pipelines.len(), 2);
                assert!(spec.pipelines.iter().all(|p| p.output_refs == vec![INTERNAL_OUTPUT_NAME]));
                assert!(status.all_accepted());
                assert_eq!(status.pipelines.len(), 2);
                assert_eq!(status.log_sources, vec![SourceType::App, SourceType::Infra]);
            }
            other => panic!("expected default forwarding, got {:?}", other),
        }
    }

    #[test]
    fn test_default_applies_even_when_forwarding_enabled() {
        assert!(matches!(decide(&request(true, true, false, 0)), ForwardingDecision::UseDefault(..)));
    }

    #[test]
    fn test_no_default_when_disabled() {
        assert_eq!(decide(&request(true, false, true, 0)), ForwardingDecision::Empty);
        assert_eq!(decide(&request(true, true, true, 0)), ForwardingDecision::UseExplicit);
    }

    #[test]
    fn test_no_default_when_pipelines_declared() {
        assert_eq!(decide(&request(true, true, false, 1)), ForwardingDecision::UseExplicit);
        assert_eq!(decide(&request(true, false, false, 1)), ForwardingDecision::Empty);
    }

    #[test]
    fn test_no_store() {
        assert_eq!(decide(&request(false, false, false, 0)), ForwardingDecision::Empty);
        assert_eq!(decide(&request(false, true, false, 0)), ForwardingDecision::UseExplicit);
    }

    #[test]
    fn test_reserved_names() {
        let reserved = ReservedNames::get();
        assert!(reserved.is_reserved_output(INTERNAL_OUTPUT_NAME));
        assert!(reserved.is_reserved_pipeline(DEFAULT_APP_PIPELINE_NAME));
        assert!(reserved.is_reserved_pipeline(DEFAULT_INFRA_PIPELINE_NAME));
        assert!(!reserved.is_reserved_pipeline(INTERNAL_OUTPUT_NAME));
        assert!(reserved.is_reserved_label("@_APPLICATION"));
        assert!(reserved.is_reserved_label(LEGACY_SYSLOG_LABEL));
        assert!(!reserved.is_reserved_label("@APPLICATION"));
    }

    #[test]
    fn test_generated_status_is_accepted() {
        let (_, status) = default_forwarding();
        let out = status.output(INTERNAL_OUTPUT_NAME).unwrap();
        assert_eq!(out.state, EntityState::Accepted);
        assert!(out.message.as_deref().unwrap().contains("operator generated output"));
        assert!(status
            .pipelines
            .iter()
            .all(|p| p.reason == Some(ConditionReason::ConditionsMet)));
    }
}
