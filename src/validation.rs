//! Validation System - Conditions, Not Errors
//!
//! Rules append conditions to an entity's status. Any condition keeps the
//! entity out of the accepted spec; only operational failures are errors.

use std::collections::{BTreeSet, HashSet};
use tracing::{debug, error, warn};

use crate::defaults::ReservedNames;
use crate::forwarding::{OutputSpec, OutputType, PipelineSpec, SourceType};
use crate::secrets::{SecretLookup, SecretLookupError};
use crate::status::{
    ConditionReason, ConditionType, EntityState, OutputStatus, PipelineStatus,
};
use crate::templates::{output_label_name, pipeline_label_name, split_endpoint};

// Per thread, so parallel tests do not see each other's calls.
#[cfg(feature = "test-hooks")]
thread_local! {
    static VALIDATION_CALL_COUNT: std::cell::Cell<u32> = std::cell::Cell::new(0);
}

#[cfg(feature = "test-hooks")]
pub fn get_validation_call_count() -> u32 {
    VALIDATION_CALL_COUNT.with(|c| c.get())
}

#[cfg(feature = "test-hooks")]
pub fn reset_validation_call_count() {
    VALIDATION_CALL_COUNT.with(|c| c.set(0));
}

#[cfg(feature = "test-hooks")]
fn count_validation_call() {
    VALIDATION_CALL_COUNT.with(|c| c.set(c.get() + 1));
}

/// Output rule trait - appends conditions for one concern
pub trait OutputRule {
    fn name(&self) -> &'static str;
    fn check(
        &self,
        output: &OutputSpec,
        secrets: &dyn SecretLookup,
        status: &mut OutputStatus,
    ) -> Result<(), SecretLookupError>;
}

// --- Concrete Rules ---

pub struct TypeRule;

impl OutputRule for TypeRule {
    fn name(&self) -> &'static str { "type" }

    fn check(
        &self,
        output: &OutputSpec,
        _secrets: &dyn SecretLookup,
        status: &mut OutputStatus,
    ) -> Result<(), SecretLookupError> {
        if output.output_type.is_empty() {
            status.add_condition(ConditionType::Type, ConditionReason::MissingType, "");
        }
        match output.parsed_type() {
            None => status.add_condition(
                ConditionType::Type,
                ConditionReason::UnrecognizedType,
                format!("Unrecognized output type {:?}", output.output_type),
            ),
            Some(OutputType::Cloudwatch) => {
                let has_region = output
                    .cloudwatch
                    .as_ref()
                    .map_or(false, |cw| !cw.region.is_empty());
                if !has_region {
                    status.add_condition(
                        ConditionType::Type,
                        ConditionReason::MissingTypeSpec,
                        "cloudwatch outputs require a region",
                    );
                }
            }
            Some(_) => {}
        }
        Ok(())
    }
}

pub struct EndpointRule;

impl OutputRule for EndpointRule {
    fn name(&self) -> &'static str { "endpoint" }

    fn check(
        &self,
        output: &OutputSpec,
        _secrets: &dyn SecretLookup,
        status: &mut OutputStatus,
    ) -> Result<(), SecretLookupError> {
        let output_type = output.parsed_type();
        let required = output_type.map_or(true, |t| t.requires_endpoint());
        if required && output.endpoint.is_empty() {
            status.add_condition(ConditionType::Endpoint, ConditionReason::MissingEndpoint, "");
            return Ok(());
        }
        // Accepted endpoints must split into host and port when rendered.
        if let Some(default_port) = output_type.and_then(|t| t.default_port()) {
            if let Err(e) = split_endpoint(&output.endpoint, default_port) {
                status.add_condition(ConditionType::Endpoint, ConditionReason::InvalidEndpoint, e.to_string());
            }
        }
        Ok(())
    }
}

pub struct SecretRule;

impl OutputRule for SecretRule {
    fn name(&self) -> &'static str { "secret" }

    fn check(
        &self,
        output: &OutputSpec,
        secrets: &dyn SecretLookup,
        status: &mut OutputStatus,
    ) -> Result<(), SecretLookupError> {
        match output.secret_name() {
            None => {}
            Some("") => {
                status.add_condition(ConditionType::Secret, ConditionReason::MissingSecretName, "");
            }
            Some(secret) => {
                if !secrets.exists(secret)? {
                    status.add_condition(
                        ConditionType::Secret,
                        ConditionReason::SecretDoesNotExist,
                        format!("Secret {:?} does not exist", secret),
                    );
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct OutputValidation {
    pub accepted: Vec<OutputSpec>,
    pub accepted_names: HashSet<String>,
    pub statuses: Vec<OutputStatus>,
    /// First lookup failure. Statuses are complete, but the result must not be generated from.
    pub lookup_error: Option<SecretLookupError>,
}

/// Validator orchestrates output rules in declaration order
pub struct OutputValidator<'a> {
    reserved: &'a ReservedNames,
    rules: Vec<Box<dyn OutputRule>>,
}

impl<'a> OutputValidator<'a> {
    pub fn new(reserved: &'a ReservedNames) -> Self {
        Self {
            reserved,
            rules: vec![
                Box::new(TypeRule),
                Box::new(EndpointRule),
                Box::new(SecretRule),
            ],
        }
    }

    pub fn validate(
        &self,
        outputs: &[OutputSpec],
        secrets: &dyn SecretLookup,
    ) -> OutputValidation {
        #[cfg(feature = "test-hooks")]
        count_validation_call();

        let mut result = OutputValidation::default();
        let mut labels: HashSet<String> = HashSet::new();

        for (i, output) in outputs.iter().enumerate() {
            let mut status = OutputStatus::new(output.name.clone());
            let placeholder = format!("output[{}]", i);
            let label = output_label_name(&output.name);

            if output.name.is_empty() {
                status.name = placeholder;
                status.add_condition(ConditionType::Name, ConditionReason::MissingName, "");
            } else if self.reserved.is_reserved_output(&output.name) {
                status.name = placeholder;
                status.add_condition(ConditionType::Name, ConditionReason::ReservedNameConflict, "");
            } else if result.accepted_names.contains(&output.name) {
                status.name = placeholder;
                status.add_condition(
                    ConditionType::Name,
                    ConditionReason::NonUniqueName,
                    "The output name is not unique among all defined outputs.",
                );
            } else if self.reserved.is_reserved_label(&label) {
                status.name = placeholder;
                status.add_condition(
                    ConditionType::Name,
                    ConditionReason::ReservedNameConflict,
                    format!("Label {} is used internally", label),
                );
            } else if labels.contains(&label) {
                status.name = placeholder;
                status.add_condition(
                    ConditionType::Name,
                    ConditionReason::NonUniqueName,
                    format!("Label {} is already used by another output", label),
                );
            }

            let mut failed = false;
            for rule in &self.rules {
                if let Err(e) = rule.check(output, secrets, &mut status) {
                    error!(output = %status.name, rule = rule.name(), error = %e, "Output evaluation aborted");
                    result.lookup_error.get_or_insert(e);
                    failed = true;
                    break;
                }
            }

            if !failed && !status.has_conditions() {
                status.state = EntityState::Accepted;
                result.accepted_names.insert(output.name.clone());
                labels.insert(label);
                result.accepted.push(output.clone());
            }
            debug!(output = %status.name, state = ?status.state, conditions = status.conditions.len(), "Status of output evaluation");
            result.statuses.push(status);
        }
        result
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineValidation {
    pub accepted: Vec<PipelineSpec>,
    pub statuses: Vec<PipelineStatus>,
    pub log_sources: Vec<SourceType>,
}

pub struct PipelineValidator<'a> {
    reserved: &'a ReservedNames,
}

impl<'a> PipelineValidator<'a> {
    pub fn new(reserved: &'a ReservedNames) -> Self {
        Self { reserved }
    }

    pub fn validate(
        &self,
        pipelines: &[PipelineSpec],
        output_names: &HashSet<String>,
    ) -> PipelineValidation {
        #[cfg(feature = "test-hooks")]
        count_validation_call();

        let mut result = PipelineValidation::default();
        let mut pipeline_names: HashSet<&str> = HashSet::new();
        let mut pipeline_labels: HashSet<String> = HashSet::new();
        let output_labels: HashSet<String> = output_names.iter().map(|n| output_label_name(n)).collect();
        let mut log_sources: BTreeSet<SourceType> = BTreeSet::new();

        for (i, pipeline) in pipelines.iter().enumerate() {
            let mut status = PipelineStatus::new(pipeline.name.clone());
            let placeholder = format!("pipeline[{}]", i);
            let label = pipeline_label_name(&pipeline.name);

            if pipeline.name.is_empty() {
                status.name = placeholder;
                status.add_condition(ConditionType::Name, ConditionReason::MissingName, "");
            } else if self.reserved.is_reserved_pipeline(&pipeline.name) {
                status.name = placeholder;
                status.add_condition(ConditionType::Name, ConditionReason::ReservedNameConflict, "");
            } else if pipeline_names.contains(pipeline.name.as_str()) {
                status.name = placeholder;
                status.add_condition(ConditionType::Name, ConditionReason::UniqueName, "");
            } else if self.reserved.is_reserved_label(&label) {
                status.name = placeholder;
                status.add_condition(
                    ConditionType::Name,
                    ConditionReason::ReservedNameConflict,
                    format!("Label {} is used internally", label),
                );
            } else if pipeline_labels.contains(&label) {
                status.name = placeholder;
                status.add_condition(
                    ConditionType::Name,
                    ConditionReason::UniqueName,
                    format!("Label {} is already used by another pipeline", label),
                );
            } else if output_labels.contains(&label) {
                status.name = placeholder;
                status.add_condition(
                    ConditionType::Name,
                    ConditionReason::UniqueName,
                    format!("Label {} is already used by an output", label),
                );
            }

            if pipeline.source_type.is_empty() {
                status.add_condition(ConditionType::SourceType, ConditionReason::MissingSource, "");
            }
            let source_type = pipeline.parsed_source_type();
            if source_type.is_none() {
                status.add_condition(
                    ConditionType::SourceType,
                    ConditionReason::UnrecognizedSourceType,
                    format!("Unrecognized source type {:?}", pipeline.source_type),
                );
            }

            // Structurally invalid pipelines never get their refs evaluated.
            let source_type = match source_type {
                Some(source) if !status.has_conditions() => source,
                _ => {
                    result.statuses.push(status);
                    continue;
                }
            };

            let mut refs = Vec::with_capacity(pipeline.output_refs.len());
            for output in &pipeline.output_refs {
                if output_names.contains(output) {
                    refs.push(output.clone());
                } else {
                    warn!(output_ref = %output, pipeline = %pipeline.name, "OutputRef for forwarding pipeline was not defined");
                    status.add_condition(
                        ConditionType::OutputRef,
                        ConditionReason::UnrecognizedOutputRef,
                        format!("Output {:?} is not an accepted output", output),
                    );
                }
            }

            if refs.is_empty() {
                warn!(pipeline = %pipeline.name, "Dropping forwarding pipeline as its outputRefs have no corresponding outputs");
                status.add_condition(ConditionType::OutputRef, ConditionReason::MissingOutputs, "");
                result.statuses.push(status);
                continue;
            }

            status.state = EntityState::Accepted;
            if refs.len() != pipeline.output_refs.len() {
                status.state = EntityState::Degraded;
                status.add_condition(ConditionType::OutputRef, ConditionReason::MissingOutputs, "");
            }
            pipeline_names.insert(pipeline.name.as_str());
            pipeline_labels.insert(label);
            log_sources.insert(source_type);
            result.accepted.push(PipelineSpec {
                name: pipeline.name.clone(),
                source_type: pipeline.source_type.clone(),
                output_refs: refs,
                labels: pipeline.labels.clone(),
            });
            result.statuses.push(status);
        }

        result.log_sources = log_sources.into_iter().collect();
        result
    }
}
