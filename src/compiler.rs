//! Forwarding Compiler - Single Entry Point
//!
//! compile MUST normalize first. Only the normalized spec reaches the
//! generator; the default route is the one path that skips validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::defaults::{decide, ForwardingDecision, ReservedNames};
use crate::forwarding::{ForwardingRequest, ForwardingSpec};
use crate::generator::{ConfigGenerator, GenerateError};
use crate::hashing::config_hash;
use crate::secrets::{SecretLookup, SecretLookupError};
use crate::status::ForwardingStatus;
use crate::templates::TemplateRegistry;
use crate::validation::{OutputValidator, PipelineValidator};
use crate::ENGINE_VERSION;

pub const SUPPORTED_COLLECTOR: &str = "fluentd";

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{0} collector does not support pipelines feature")]
    UnsupportedCollector(String),

    /// `status` holds every output and pipeline status evaluated around the failure.
    #[error("Secret lookup failed: {source}")]
    SecretLookup {
        #[source]
        source: SecretLookupError,
        status: Box<ForwardingStatus>,
    },

    #[error("Generation failed: {0}")]
    Generate(#[from] GenerateError),
}

impl CompileError {
    /// Status report that was built before the failure, if any.
    pub fn status(&self) -> Option<&ForwardingStatus> {
        match self {
            CompileError::SecretLookup { status, .. } => Some(&**status),
            _ => None,
        }
    }
}

/// Validated spec plus the status report describing how it was reached.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Normalized {
    pub spec: ForwardingSpec,
    pub status: ForwardingStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledConfig {
    pub config: String,
    pub config_hash: String,
    pub engine_version: String,
    pub generated_at: DateTime<Utc>,
    pub spec: ForwardingSpec,
    pub status: ForwardingStatus,
}

pub struct ForwardingCompiler {
    registry: TemplateRegistry,
    reserved: &'static ReservedNames,
}

impl ForwardingCompiler {
    pub fn new(registry: TemplateRegistry) -> Self {
        Self {
            registry,
            reserved: ReservedNames::get(),
        }
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    /// Reconcile a raw request into an accepted spec and its status.
    pub fn normalize(
        &self,
        request: &ForwardingRequest,
        secrets: &dyn SecretLookup,
    ) -> Result<Normalized, CompileError> {
        match decide(request) {
            ForwardingDecision::UseDefault(spec, status) => {
                debug!("Configuring logforwarding to utilize the operator managed logstore");
                Ok(Normalized { spec, status })
            }
            ForwardingDecision::Empty => {
                debug!("Forwarding is not enabled; nothing to normalize");
                Ok(Normalized::default())
            }
            ForwardingDecision::UseExplicit => self.validate(&request.forwarding, secrets),
        }
    }

    fn validate(
        &self,
        forwarding: &ForwardingSpec,
        secrets: &dyn SecretLookup,
    ) -> Result<Normalized, CompileError> {
        let outputs = OutputValidator::new(self.reserved).validate(&forwarding.outputs, secrets);
        let pipelines = PipelineValidator::new(self.reserved)
            .validate(&forwarding.pipelines, &outputs.accepted_names);

        let status = ForwardingStatus {
            outputs: outputs.statuses,
            pipelines: pipelines.statuses,
            log_sources: pipelines.log_sources,
        };
        if let Some(source) = outputs.lookup_error {
            return Err(CompileError::SecretLookup {
                source,
                status: Box::new(status),
            });
        }

        Ok(Normalized {
            spec: ForwardingSpec {
                disable_default_forwarding: forwarding.disable_default_forwarding,
                outputs: outputs.accepted,
                pipelines: pipelines.accepted,
            },
            status,
        })
    }

    /// Compile a request into collector configuration
    ///
    /// Any operational failure aborts; no partial configuration is returned.
    pub fn compile(
        &self,
        request: &ForwardingRequest,
        secrets: &dyn SecretLookup,
    ) -> Result<CompiledConfig, CompileError> {
        if request.cluster.collector != SUPPORTED_COLLECTOR {
            return Err(CompileError::UnsupportedCollector(request.cluster.collector.clone()));
        }

        let Normalized { spec, status } = self.normalize(request, secrets)?;

        let generator = ConfigGenerator::new(&self.registry, request.generator.clone());
        let config = generator.generate(&spec)?;
        let config_hash = config_hash(&config);

        info!(
            outputs = spec.outputs.len(),
            pipelines = spec.pipelines.len(),
            hash = %config_hash,
            "Generated collector configuration"
        );

        Ok(CompiledConfig {
            config,
            config_hash,
            engine_version: ENGINE_VERSION.to_string(),
            generated_at: Utc::now(),
            spec,
            status,
        })
    }
}

impl Default for ForwardingCompiler {
    fn default() -> Self {
        Self::new(TemplateRegistry::builtin())
    }
}
