//! Process configuration and operator-editable settings.
//!
//! Three layers, outermost first:
//! - environment variables (`AUTOAGENT_*`) for process wiring,
//! - `Settings` fetched from the control plane (`GET /api/settings`),
//! - an optional per-project `autoagent.toml` read from the project root.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Default control-plane base URL.
pub const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Process-level configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Base URL of the control plane.
    pub api_url: String,
    /// Local scratch directory for run artifacts.
    pub data_dir: Option<String>,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self {
            api_url: std::env::var("AUTOAGENT_API_URL")
                .unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            data_dir: std::env::var("AUTOAGENT_DATA_DIR").ok(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Operator settings (control-plane backed)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How outbound network access from `run_command` is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EgressMode {
    #[default]
    Off,
    Audit,
    Enforce,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub egress_policy_mode: EgressMode,
    pub egress_allow_hosts: Vec<String>,
    pub egress_exception_hosts: Vec<String>,
    pub trace_retention_days: u32,
    pub artifact_retention_days: u32,
    pub prompt_retention_days: u32,
    pub prompt_cache_retention_days: u32,
    pub cleanup_interval_minutes: u64,
    pub prompt_cache_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            egress_policy_mode: EgressMode::Off,
            egress_allow_hosts: Vec::new(),
            egress_exception_hosts: Vec::new(),
            trace_retention_days: 30,
            artifact_retention_days: 30,
            prompt_retention_days: 14,
            prompt_cache_retention_days: 1,
            cleanup_interval_minutes: 15,
            prompt_cache_enabled: false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-project configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Optional `autoagent.toml` at the project root.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectConfig {
    /// When non-empty, only the listed tools may run in this project.
    #[serde(default)]
    pub allowed_tools: Vec<String>,
}

impl ProjectConfig {
    /// Load `autoagent.toml` from the project root. A missing file is not
    /// an error; a malformed one is.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let path = project_dir.join("autoagent.toml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("autoagent.toml: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_defaults() {
        let s = Settings::default();
        assert_eq!(s.egress_policy_mode, EgressMode::Off);
        assert!(!s.prompt_cache_enabled);
        assert_eq!(s.cleanup_interval_minutes, 15);
    }

    #[test]
    fn settings_partial_json_fills_defaults() {
        let s: Settings =
            serde_json::from_str(r#"{"egressPolicyMode":"enforce","egressAllowHosts":["api.example.com"]}"#)
                .unwrap();
        assert_eq!(s.egress_policy_mode, EgressMode::Enforce);
        assert_eq!(s.egress_allow_hosts, vec!["api.example.com"]);
        assert_eq!(s.trace_retention_days, 30);
    }

    #[test]
    fn project_config_missing_file_is_default() {
        let dir = std::env::temp_dir().join("aa-config-test-none");
        std::fs::create_dir_all(&dir).unwrap();
        let cfg = ProjectConfig::load(&dir).unwrap();
        assert!(cfg.allowed_tools.is_empty());
    }

    #[test]
    fn project_config_parses_allowlist() {
        let dir = std::env::temp_dir().join("aa-config-test-allow");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("autoagent.toml"),
            "allowed_tools = [\"read_file\", \"search_code\"]\n",
        )
        .unwrap();
        let cfg = ProjectConfig::load(&dir).unwrap();
        assert_eq!(cfg.allowed_tools, vec!["read_file", "search_code"]);
        std::fs::remove_dir_all(&dir).ok();
    }
}
