use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use photolab_contracts::modes::ModeRegistry;
use photolab_contracts::session::DEFAULT_HISTORY_CAPACITY;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_REQUEST_TIMEOUT_S: f64 = 60.0;

const TIMEOUT_RANGE_S: (f64, f64) = (5.0, 300.0);
const HISTORY_CAPACITY_RANGE: (usize, usize) = (1, 32);

/// Runtime settings. Resolved from the environment, then overridden by CLI
/// flags where given.
#[derive(Debug, Clone, PartialEq)]
pub struct LabSettings {
    pub api_base: String,
    pub model: String,
    pub request_timeout_s: f64,
    pub history_capacity: usize,
    pub modes_path: Option<PathBuf>,
}

impl Default for LabSettings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout_s: DEFAULT_REQUEST_TIMEOUT_S,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            modes_path: None,
        }
    }
}

impl LabSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_base: non_empty_env("PHOTOLAB_API_BASE")
                .or_else(|| non_empty_env("GEMINI_API_BASE"))
                .map(|value| normalize_api_base(&value))
                .unwrap_or(defaults.api_base),
            model: non_empty_env("PHOTOLAB_MODEL").unwrap_or(defaults.model),
            request_timeout_s: clamp_timeout(
                non_empty_env("PHOTOLAB_REQUEST_TIMEOUT")
                    .and_then(|value| value.parse::<f64>().ok())
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_S),
            ),
            history_capacity: clamp_history_capacity(
                non_empty_env("PHOTOLAB_HISTORY_CAPACITY")
                    .and_then(|value| value.parse::<usize>().ok())
                    .unwrap_or(DEFAULT_HISTORY_CAPACITY),
            ),
            modes_path: non_empty_env("PHOTOLAB_MODES_PATH").map(PathBuf::from),
        }
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = normalize_api_base(api_base);
        self
    }

    pub fn with_request_timeout(mut self, seconds: f64) -> Self {
        self.request_timeout_s = clamp_timeout(seconds);
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = clamp_history_capacity(capacity);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_s)
    }

    /// Built-in modes, plus any rows from `modes_path`.
    pub fn load_mode_registry(&self) -> Result<ModeRegistry> {
        let mut registry = ModeRegistry::default();
        if let Some(path) = self.modes_path.as_ref() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed reading modes file {}", path.display()))?;
            registry
                .merge_json(&raw)
                .with_context(|| format!("invalid modes file {}", path.display()))?;
        }
        Ok(registry)
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn normalize_api_base(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return DEFAULT_API_BASE.to_string();
    }
    trimmed.to_string()
}

fn clamp_timeout(seconds: f64) -> f64 {
    if !seconds.is_finite() {
        return DEFAULT_REQUEST_TIMEOUT_S;
    }
    seconds.clamp(TIMEOUT_RANGE_S.0, TIMEOUT_RANGE_S.1)
}

fn clamp_history_capacity(capacity: usize) -> usize {
    capacity.clamp(HISTORY_CAPACITY_RANGE.0, HISTORY_CAPACITY_RANGE.1)
}
