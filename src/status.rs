//! Status Model - Append-Only Evidence
//!
//! Each validation pass builds fresh statuses. Conditions are only ever
//! appended; the state is derived from them by the validators.

use serde::{Deserialize, Serialize};

use crate::forwarding::SourceType;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConditionType {
    Name,
    Type,
    Endpoint,
    Secret,
    SourceType,
    OutputRef,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConditionReason {
    MissingName,
    ReservedNameConflict,
    NonUniqueName,
    UniqueName,
    MissingType,
    UnrecognizedType,
    MissingTypeSpec,
    MissingEndpoint,
    InvalidEndpoint,
    MissingSecretName,
    SecretDoesNotExist,
    MissingSource,
    UnrecognizedSourceType,
    UnrecognizedOutputRef,
    MissingOutputs,
    ConditionsMet,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub reason: ConditionReason,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EntityState {
    Accepted,
    Degraded,
    Dropped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntityStatus {
    pub name: String,
    pub state: EntityState,
    /// Why the state holds when no condition explains it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ConditionReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

pub type OutputStatus = EntityStatus;
pub type PipelineStatus = EntityStatus;

impl EntityStatus {
    /// A new status starts dropped; validators promote it once checks pass.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: EntityState::Dropped,
            reason: None,
            message: None,
            conditions: vec![],
        }
    }

    /// Status for an entity the system fabricated itself.
    pub fn generated(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: EntityState::Accepted,
            reason: Some(ConditionReason::ConditionsMet),
            message: Some(message.into()),
            conditions: vec![],
        }
    }

    pub fn add_condition(
        &mut self,
        condition_type: ConditionType,
        reason: ConditionReason,
        message: impl Into<String>,
    ) {
        self.conditions.push(Condition {
            condition_type,
            reason,
            message: message.into(),
        });
    }

    pub fn has_conditions(&self) -> bool {
        !self.conditions.is_empty()
    }

    pub fn has_reason(&self, reason: ConditionReason) -> bool {
        self.conditions.iter().any(|c| c.reason == reason)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ForwardingStatus {
    #[serde(default)]
    pub outputs: Vec<OutputStatus>,
    #[serde(default)]
    pub pipelines: Vec<PipelineStatus>,
    #[serde(default)]
    pub log_sources: Vec<SourceType>,
}

impl ForwardingStatus {
    /// True when every output and pipeline was accepted as declared.
    pub fn all_accepted(&self) -> bool {
        self.outputs
            .iter()
            .chain(self.pipelines.iter())
            .all(|s| s.state == EntityState::Accepted)
    }

    pub fn output(&self, name: &str) -> Option<&OutputStatus> {
        self.outputs.iter().find(|s| s.name == name)
    }

    pub fn pipeline(&self, name: &str) -> Option<&PipelineStatus> {
        self.pipelines.iter().find(|s| s.name == name)
    }
}
