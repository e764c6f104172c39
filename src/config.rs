//! Generator configuration

use serde::{Deserialize, Serialize};

pub const DEFAULT_SECRETS_MOUNT_ROOT: &str = "/var/run/ocp-collector/secrets";
pub const DEFAULT_BUFFER_ROOT: &str = "/var/lib/fluentd";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorConfig {
    /// Append an `@include` of the legacy secure-forward configuration.
    #[serde(default)]
    pub include_legacy_forward_config: bool,
    /// Append an `@include` of the legacy remote syslog configuration.
    #[serde(default)]
    pub include_legacy_syslog_config: bool,
    /// Render syslog outputs for the `syslog_buffered` plugin instead of `remote_syslog`.
    #[serde(default)]
    pub use_old_remote_syslog_plugin: bool,
    #[serde(default = "default_secrets_mount_root")]
    pub secrets_mount_root: String,
    #[serde(default = "default_buffer_root")]
    pub buffer_root: String,
}

fn default_secrets_mount_root() -> String { DEFAULT_SECRETS_MOUNT_ROOT.to_string() }
fn default_buffer_root() -> String { DEFAULT_BUFFER_ROOT.to_string() }

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            include_legacy_forward_config: false,
            include_legacy_syslog_config: false,
            use_old_remote_syslog_plugin: false,
            secrets_mount_root: default_secrets_mount_root(),
            buffer_root: default_buffer_root(),
        }
    }
}

impl GeneratorConfig {
    /// Path of a key file inside a mounted secret.
    pub fn secret_path(&self, secret: &str, key: &str) -> String {
        format!("{}/{}/{}", self.secrets_mount_root.trim_end_matches('/'), secret, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let config: GeneratorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, GeneratorConfig::default());
    }

    #[test]
    fn test_flags_read_camel_case() {
        let config: GeneratorConfig =
            serde_yaml::from_str("useOldRemoteSyslogPlugin: true\nincludeLegacySyslogConfig: true\n").unwrap();
        assert!(config.use_old_remote_syslog_plugin);
        assert!(config.include_legacy_syslog_config);
        assert!(!config.include_legacy_forward_config);
    }

    #[test]
    fn test_secret_path() {
        let config = GeneratorConfig {
            secrets_mount_root: "/secrets/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.secret_path("es", "tls.key"), "/secrets/es/tls.key");
    }
}
