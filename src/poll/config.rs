// src/poll/config.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::poll::types::Source;

const ENV_PATH: &str = "FORKWATCH_CONFIG_PATH";
const ENV_TOKEN: &str = "GITHUB_TOKEN";

const DEFAULT_INTERVAL_MINUTES: u64 = 30;
const DEFAULT_INTER_SOURCE_DELAY_MS: u64 = 1000;

/// Pipeline configuration: monitored sources plus polling cadence.
/// Owned externally; the pipeline treats it as read-only input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub sources: Vec<Source>,
    /// Bearer credential for the GitHub API. Unauthenticated polling works
    /// but gets a much lower rate-limit ceiling.
    #[serde(default)]
    pub github_token: Option<String>,
    #[serde(default = "default_interval")]
    pub poll_interval_minutes: u64,
    #[serde(default = "default_delay")]
    pub inter_source_delay_ms: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_MINUTES
}
fn default_delay() -> u64 {
    DEFAULT_INTER_SOURCE_DELAY_MS
}
fn default_enabled() -> bool {
    true
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            github_token: None,
            poll_interval_minutes: DEFAULT_INTERVAL_MINUTES,
            inter_source_delay_ms: DEFAULT_INTER_SOURCE_DELAY_MS,
            enabled: true,
        }
    }
}

impl MonitorConfig {
    /// Load from an explicit path. Supports TOML or JSON formats.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let mut cfg = parse_config(&content, ext.as_str())?;
        cfg.finish()
    }

    /// Load using env var + fallbacks:
    /// 1) $FORKWATCH_CONFIG_PATH
    /// 2) config/sources.toml
    /// 3) config/sources.json
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            } else {
                return Err(anyhow!("FORKWATCH_CONFIG_PATH points to non-existent path"));
            }
        }
        let toml_p = PathBuf::from("config/sources.toml");
        if toml_p.exists() {
            return Self::load_from(&toml_p);
        }
        let json_p = PathBuf::from("config/sources.json");
        if json_p.exists() {
            return Self::load_from(&json_p);
        }
        MonitorConfig::default().finish()
    }

    /// Env token override + sanity clamps.
    fn finish(mut self) -> Result<Self> {
        if let Ok(tok) = std::env::var(ENV_TOKEN) {
            if !tok.trim().is_empty() {
                self.github_token = Some(tok.trim().to_string());
            }
        }
        self.poll_interval_minutes = self.poll_interval_minutes.max(1);

        let mut seen = std::collections::HashSet::new();
        for s in &self.sources {
            if s.id.trim().is_empty() {
                return Err(anyhow!("source with empty id"));
            }
            if !seen.insert(s.id.clone()) {
                return Err(anyhow!("duplicate source id `{}`", s.id));
            }
        }
        Ok(self)
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<MonitorConfig> {
    // Try TOML first if hinted or content looks like toml.
    let try_toml = hint_ext == "toml" || s.contains("[[sources]]");
    if try_toml {
        if let Ok(v) = toml::from_str::<MonitorConfig>(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = serde_json::from_str::<MonitorConfig>(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = toml::from_str::<MonitorConfig>(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported config format"))
}
