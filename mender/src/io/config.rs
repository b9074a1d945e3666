//! Repair configuration stored under `<workspace>/.mender/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::build::DEFAULT_BUILD_TIMEOUT;

/// Repair configuration (TOML).
///
/// Intended to be edited by humans. Missing fields take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RepairConfig {
    /// Workspace-relative file the pipeline repairs.
    pub target_file: String,

    /// Byte cap for reading the target file through the engine.
    pub read_max_bytes: usize,

    pub build: BuildConfig,
    pub retrieve: RetrieveConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildConfig {
    /// Build entrypoint, run with the workspace as working directory.
    pub command: Vec<String>,
    /// Wall-clock budget for each build, in seconds.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrieveConfig {
    pub query: String,
    pub top_k: usize,
    pub max_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine executable; a bare name is looked up on `PATH`.
    pub path: PathBuf,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: vec!["./build.sh".to_string()],
            timeout_secs: DEFAULT_BUILD_TIMEOUT.as_secs(),
        }
    }
}

impl Default for RetrieveConfig {
    fn default() -> Self {
        Self {
            query: "std::".to_string(),
            top_k: 5,
            max_bytes: 200_000,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("engine_cli"),
        }
    }
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            target_file: "main.cpp".to_string(),
            read_max_bytes: 200_000,
            build: BuildConfig::default(),
            retrieve: RetrieveConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl RepairConfig {
    pub fn validate(&self) -> Result<()> {
        let target = Path::new(&self.target_file);
        if self.target_file.trim().is_empty() || target.is_absolute() {
            return Err(anyhow!("target_file must be a non-empty workspace-relative path"));
        }
        if self.read_max_bytes == 0 {
            return Err(anyhow!("read_max_bytes must be > 0"));
        }
        if self.build.command.is_empty() || self.build.command[0].trim().is_empty() {
            return Err(anyhow!("build.command must be a non-empty array"));
        }
        if self.build.timeout_secs == 0 {
            return Err(anyhow!("build.timeout_secs must be > 0"));
        }
        if self.retrieve.query.is_empty() {
            return Err(anyhow!("retrieve.query must not be empty"));
        }
        if self.retrieve.top_k == 0 {
            return Err(anyhow!("retrieve.top_k must be > 0"));
        }
        if self.retrieve.max_bytes == 0 {
            return Err(anyhow!("retrieve.max_bytes must be > 0"));
        }
        if self.engine.path.as_os_str().is_empty() {
            return Err(anyhow!("engine.path must not be empty"));
        }
        Ok(())
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build.timeout_secs)
    }
}

/// Default config location inside a workspace.
pub fn config_path(workspace: &Path) -> PathBuf {
    workspace.join(".mender").join("config.toml")
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RepairConfig::default()`.
pub fn load_config(path: &Path) -> Result<RepairConfig> {
    if !path.exists() {
        let cfg = RepairConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RepairConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RepairConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
