//! Analyzer configuration.
//!
//! Loaded once at startup (YAML file and/or environment) and shared read-only
//! afterwards.

use crate::error::{CoreError, Result};
use crate::report::ToolKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings for one external analyzer executable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSettings {
    /// Executable name (resolved through `PATH`) or absolute path.
    pub path: String,
    /// Extra arguments placed before the tool's own arguments.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_tool_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl ToolSettings {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
            timeout_seconds: default_tool_timeout(),
            enabled: true,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn default_tool_timeout() -> u64 {
    30
}

fn default_enabled() -> bool {
    true
}

fn default_quality() -> ToolSettings {
    ToolSettings::new("flake8")
}

fn default_security() -> ToolSettings {
    ToolSettings::new("bandit")
}

fn default_tests() -> ToolSettings {
    ToolSettings::new("pytest")
}

fn default_max_output_bytes() -> usize {
    1024 * 1024
}

fn default_max_source_bytes() -> usize {
    256 * 1024
}

/// Top-level analyzer configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyzerConfig {
    #[serde(default = "default_quality")]
    pub quality: ToolSettings,
    #[serde(default = "default_security")]
    pub security: ToolSettings,
    #[serde(default = "default_tests")]
    pub tests: ToolSettings,
    /// Parent directory for per-request workspaces. System temp dir when unset.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
    /// Bound on a whole request. Defaults to the longest tool timeout plus a
    /// grace period.
    #[serde(default)]
    pub request_timeout_seconds: Option<u64>,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            quality: default_quality(),
            security: default_security(),
            tests: default_tests(),
            workspace_root: None,
            request_timeout_seconds: None,
            max_output_bytes: default_max_output_bytes(),
            max_source_bytes: default_max_source_bytes(),
        }
    }
}

const REQUEST_GRACE_SECONDS: u64 = 5;

impl AnalyzerConfig {
    /// Read a YAML config file. Missing keys fall back to defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            CoreError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| CoreError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Apply `CODECHECK_*` environment overrides on top of the current values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("CODECHECK_FLAKE8_PATH") {
            self.quality.path = path;
        }
        if let Some(path) = lookup("CODECHECK_BANDIT_PATH") {
            self.security.path = path;
        }
        if let Some(path) = lookup("CODECHECK_PYTEST_PATH") {
            self.tests.path = path;
        }
        if let Some(raw) = lookup("CODECHECK_TOOL_TIMEOUT") {
            let seconds: u64 = raw.trim().parse().map_err(|_| {
                CoreError::Config(format!("CODECHECK_TOOL_TIMEOUT is not a number: {}", raw))
            })?;
            for settings in [&mut self.quality, &mut self.security, &mut self.tests] {
                settings.timeout_seconds = seconds;
            }
        }
        if let Some(root) = lookup("CODECHECK_WORKSPACE_ROOT") {
            self.workspace_root = Some(PathBuf::from(root));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for kind in ToolKind::ALL {
            let settings = self.tool(kind);
            if settings.path.trim().is_empty() {
                return Err(CoreError::Config(format!("{} tool path is empty", kind)));
            }
            if settings.timeout_seconds == 0 {
                return Err(CoreError::Config(format!("{} tool timeout must be > 0", kind)));
            }
        }
        if self.request_timeout_seconds == Some(0) {
            return Err(CoreError::Config("request timeout must be > 0".to_string()));
        }
        if self.max_output_bytes == 0 || self.max_source_bytes == 0 {
            return Err(CoreError::Config("size limits must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn tool(&self, kind: ToolKind) -> &ToolSettings {
        match kind {
            ToolKind::Quality => &self.quality,
            ToolKind::Security => &self.security,
            ToolKind::Tests => &self.tests,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        let seconds = self.request_timeout_seconds.unwrap_or_else(|| {
            let longest = ToolKind::ALL
                .iter()
                .map(|kind| self.tool(*kind).timeout_seconds)
                .max()
                .unwrap_or(0);
            longest + REQUEST_GRACE_SECONDS
        });
        Duration::from_secs(seconds)
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}
