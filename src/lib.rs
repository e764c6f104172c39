//! LogForward Core - Log Forwarding Compiler
//!
//! # Guarantees
//! 1. Bad Entities Are Reported, Not Raised
//! 2. Accepted Specs Are Consistent
//! 3. Defaults Are Trusted
//! 4. Deterministic Output
//! 5. Operational Failures Abort Whole

pub mod config;
pub mod forwarding;
pub mod status;
pub mod secrets;
pub mod defaults;
pub mod validation;
pub mod hashing;
pub mod templates;
pub mod generator;
pub mod compiler;

pub use config::GeneratorConfig;
pub use forwarding::{ForwardingRequest, ForwardingSpec, OutputSpec, OutputType, PipelineSpec, SourceType};
pub use status::{Condition, ConditionReason, ConditionType, EntityState, EntityStatus, ForwardingStatus};
pub use secrets::{MountedSecrets, SecretLookup, SecretLookupError, StaticSecrets};
pub use defaults::{decide, ForwardingDecision, ReservedNames};
pub use hashing::{canonical_json, config_hash};
pub use templates::{RenderError, TemplateEngine, TemplateRegistry};
pub use generator::{pipelines_to_serialized_labels, ConfigGenerator, GenerateError};
pub use compiler::{CompileError, CompiledConfig, ForwardingCompiler, Normalized};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
