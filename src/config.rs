use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::transfer::{QueueOptions, TransferFlags};

const DEFAULT_TOOL: &str = "rclone";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Explicit tool binary. When unset the tool is looked up on PATH.
    pub tool_path: Option<PathBuf>,
    pub download_dir: PathBuf,
    /// Folder on every mirror that holds the archives.
    pub source_root: String,
    /// Only remotes whose name contains this are used as mirrors.
    pub remote_filter: Option<String>,
    pub bandwidth_limit: Option<String>,
    pub tool_retries: u32,
    pub max_job_retries: u32,
    pub backoff_base_secs: u64,
    pub list_timeout_secs: u64,
    pub inplace: bool,
    pub verbosity: u8,
    pub stats_interval: String,
}

impl Default for Config {
    fn default() -> Self {
        let download_dir = dirs::download_dir()
            .or_else(dirs::home_dir)
            .map(|d| d.join(env!("CARGO_PKG_NAME")))
            .unwrap_or_else(|| PathBuf::from("downloads"));
        Self {
            tool_path: None,
            download_dir,
            source_root: String::new(),
            remote_filter: None,
            bandwidth_limit: None,
            tool_retries: 1,
            max_job_retries: crate::transfer::queue::DEFAULT_MAX_RETRIES,
            backoff_base_secs: 1,
            list_timeout_secs: 30,
            inplace: true,
            verbosity: 1,
            stats_interval: "1s".to_string(),
        }
    }
}

impl Config {
    /// `~/.mirrorpilot`
    pub fn default_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("cannot find the user's home directory")?;
        Ok(home.join(".".to_owned() + env!("CARGO_PKG_NAME")))
    }

    /// Read `config.json` from `dir`, writing defaults on first run.
    pub fn load_or_init(dir: &Path) -> Result<Self> {
        let path = dir.join("config.json");
        // 首次运行写入默认配置 (first run writes defaults)
        if !path.exists() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            let config = Config::default();
            config.save(dir)?;
            return Ok(config);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        let path = dir.join("config.json");
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// Configured tool path, or the tool found on PATH.
    pub fn resolve_tool(&self) -> Result<PathBuf> {
        match &self.tool_path {
            Some(p) => Ok(p.clone()),
            None => which::which(DEFAULT_TOOL)
                .with_context(|| format!("'{}' not found on PATH; set it with `mp set -t`", DEFAULT_TOOL)),
        }
    }

    pub fn transfer_flags(&self) -> TransferFlags {
        TransferFlags {
            bandwidth_limit: self.bandwidth_limit.clone(),
            verbosity: self.verbosity,
            retries: self.tool_retries,
            inplace: self.inplace,
            stats_interval: Some(self.stats_interval.clone()).filter(|s| !s.is_empty()),
            extra: Vec::new(),
        }
    }

    pub fn queue_options(&self, failure_log: Option<PathBuf>) -> QueueOptions {
        QueueOptions {
            max_retries: self.max_job_retries,
            backoff_base: Duration::from_secs(self.backoff_base_secs),
            failure_log,
            ..QueueOptions::default()
        }
    }

    pub fn list_timeout(&self) -> Duration {
        Duration::from_secs(self.list_timeout_secs.max(1))
    }
}
