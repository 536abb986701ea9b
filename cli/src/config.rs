// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! `BrokerConfig`: the broker's typed, validated manifest (§2.1, §4.12 of
//! the design). Follows the reference platform's Kubernetes-style
//! `apiVersion`/`kind`/`metadata`/`spec` convention — a YAML file discovered
//! by precedence, with `ENCLAVEJS_*` environment variables overriding the
//! listen address and log level for container-style deployments.

use std::path::{Path, PathBuf};

use enclavejs_core::domain::guard::GuardPreset;
use enclavejs_core::domain::session::SessionLimits;
use serde::{Deserialize, Serialize};

pub const API_VERSION: &str = "enclavejs.dev/v1";
pub const KIND: &str = "BrokerConfig";

/// Top-level manifest envelope, matching the reference platform's
/// `NodeConfigManifest` shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfigManifest {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: ManifestMetadata,
    pub spec: BrokerConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<std::collections::HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 8088 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionPolicy {
    /// If true, sessions without a `ClientHello` are rejected rather than
    /// running unencrypted (§4.7 — the broker's choice, not the spec's).
    pub required: bool,
}

impl Default for EncryptionPolicy {
    fn default() -> Self {
        Self { required: false }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterConfig {
    pub max_concurrent_sessions: usize,
    pub sessions_per_second: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self { max_concurrent_sessions: 256, sessions_per_second: 50 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerConfigSpec {
    #[serde(default)]
    pub listen: ListenConfig,
    /// Defaults merged into every `SessionLimits` a caller doesn't fully
    /// specify (§4.10).
    #[serde(default = "SessionLimits::default")]
    pub default_limits: SessionLimits,
    /// The `GuardPreset` applied when a session-create request omits one.
    #[serde(default = "default_preset")]
    pub default_preset: String,
    #[serde(default)]
    pub encryption: EncryptionPolicy,
    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,
    #[serde(default = "default_replay_buffer_capacity")]
    pub replay_buffer_capacity: usize,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_preset() -> String {
    "SECURE".to_string()
}

fn default_replay_buffer_capacity() -> usize {
    1000
}

fn default_heartbeat_interval_ms() -> u64 {
    15_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BrokerConfigSpec {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            default_limits: SessionLimits::default(),
            default_preset: default_preset(),
            encryption: EncryptionPolicy::default(),
            rate_limiter: RateLimiterConfig::default(),
            replay_buffer_capacity: default_replay_buffer_capacity(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            log_level: default_log_level(),
        }
    }
}

impl Default for BrokerConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata { name: "default".to_string(), labels: None },
            spec: BrokerConfigSpec::default(),
        }
    }
}

impl BrokerConfigManifest {
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("failed to read config file {:?}: {e}", path.as_ref()))?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml_string(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Discovery precedence (§4.12): `ENCLAVEJS_CONFIG_PATH` env var, then
    /// `./enclavejs.yaml`, then `~/.enclavejs/config.yaml`, then
    /// `/etc/enclavejs/config.yaml` on Unix.
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("ENCLAVEJS_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }
        let cwd = PathBuf::from("./enclavejs.yaml");
        if cwd.exists() {
            return Some(cwd);
        }
        if let Some(home) = dirs_next::home_dir() {
            let user_config = home.join(".enclavejs").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }
        #[cfg(unix)]
        {
            let system_config = PathBuf::from("/etc/enclavejs/config.yaml");
            if system_config.exists() {
                return Some(system_config);
            }
        }
        None
    }

    /// Explicit path wins, then discovery, then an in-memory default —
    /// matching the reference platform's `load_or_default` precedence.
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut config = if let Some(path) = cli_path {
            tracing::info!(path = %path.display(), "loading broker config from explicit path");
            Self::from_yaml_file(&path)?
        } else if let Some(path) = Self::discover_config() {
            tracing::info!(path = %path.display(), "loading broker config from discovered path");
            Self::from_yaml_file(&path)?
        } else {
            tracing::warn!("no broker config file found; using built-in defaults");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment overrides for the listen address and log level — the two
    /// settings container orchestration almost always needs to inject
    /// without baking a file into the image (§4.12).
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("ENCLAVEJS_HOST") {
            self.spec.listen.host = host;
        }
        if let Ok(port) = std::env::var("ENCLAVEJS_PORT") {
            if let Ok(port) = port.parse() {
                self.spec.listen.port = port;
            }
        }
        if let Ok(level) = std::env::var("ENCLAVEJS_LOG_LEVEL") {
            self.spec.log_level = level;
        }
        if let Ok(preset) = std::env::var("ENCLAVEJS_GUARD_PRESET") {
            self.spec.default_preset = preset;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!("invalid apiVersion '{}': expected '{API_VERSION}'", self.api_version);
        }
        if self.kind != KIND {
            anyhow::bail!("invalid kind '{}': expected '{KIND}'", self.kind);
        }
        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name must not be empty");
        }
        if GuardPreset::parse(&self.spec.default_preset).is_none() {
            anyhow::bail!("spec.defaultPreset '{}' is not one of STRICT, SECURE, STANDARD, PERMISSIVE", self.spec.default_preset);
        }
        if self.spec.rate_limiter.sessions_per_second == 0 {
            anyhow::bail!("spec.rateLimiter.sessionsPerSecond must be non-zero");
        }
        if self.spec.rate_limiter.max_concurrent_sessions == 0 {
            anyhow::bail!("spec.rateLimiter.maxConcurrentSessions must be non-zero");
        }
        Ok(())
    }

    pub fn default_preset(&self) -> GuardPreset {
        GuardPreset::parse(&self.spec.default_preset).unwrap_or(GuardPreset::Secure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
apiVersion: enclavejs.dev/v1
kind: BrokerConfig
metadata:
  name: local-dev
spec:
  listen:
    host: 0.0.0.0
    port: 9000
  defaultPreset: STRICT
"#
    }

    #[test]
    fn parses_a_minimal_manifest_and_fills_defaults() {
        let manifest = BrokerConfigManifest::from_yaml_str(sample_yaml()).unwrap();
        assert_eq!(manifest.spec.listen.port, 9000);
        assert_eq!(manifest.default_preset(), GuardPreset::Strict);
        assert_eq!(manifest.spec.rate_limiter.max_concurrent_sessions, 256);
        manifest.validate().unwrap();
    }

    #[test]
    fn rejects_wrong_api_version() {
        let mut manifest = BrokerConfigManifest::default();
        manifest.api_version = "wrong/v2".to_string();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn rejects_unknown_guard_preset() {
        let mut manifest = BrokerConfigManifest::default();
        manifest.spec.default_preset = "YOLO".to_string();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn env_override_wins_over_file_value() {
        std::env::set_var("ENCLAVEJS_PORT", "7777");
        let mut manifest = BrokerConfigManifest::from_yaml_str(sample_yaml()).unwrap();
        manifest.apply_env_overrides();
        assert_eq!(manifest.spec.listen.port, 7777);
        std::env::remove_var("ENCLAVEJS_PORT");
    }

    #[test]
    fn round_trips_through_yaml() {
        let manifest = BrokerConfigManifest::default();
        let yaml = manifest.to_yaml_string().unwrap();
        let back = BrokerConfigManifest::from_yaml_str(&yaml).unwrap();
        assert_eq!(back.spec.listen.port, manifest.spec.listen.port);
    }
}
