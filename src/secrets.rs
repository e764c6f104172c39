//! Secret Lookup - existence checks only
//!
//! Only "not found" takes part in validation. Every other failure is an
//! operational error and aborts generation.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretLookupError {
    #[error("Failed to look up secret {0}: {1}")]
    Io(String, #[source] std::io::Error),

    #[error("Secret lookup unavailable: {0}")]
    Unavailable(String),
}

pub trait SecretLookup {
    fn exists(&self, name: &str) -> Result<bool, SecretLookupError>;
}

/// Fixed set of known secret names.
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets {
    names: HashSet<String>,
}

impl StaticSecrets {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>) {
        self.names.insert(name.into());
    }
}

impl SecretLookup for StaticSecrets {
    fn exists(&self, name: &str) -> Result<bool, SecretLookupError> {
        Ok(self.names.contains(name))
    }
}

/// Secrets mounted as `<root>/<name>/` directories.
#[derive(Debug, Clone)]
pub struct MountedSecrets {
    root: PathBuf,
}

impl MountedSecrets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SecretLookup for MountedSecrets {
    fn exists(&self, name: &str) -> Result<bool, SecretLookupError> {
        match std::fs::metadata(self.root.join(name)) {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SecretLookupError::Io(name.to_string(), e)),
        }
    }
}
