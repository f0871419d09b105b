//! quality-scanner CLI 配置管理
//!
//! 配置来源（后者覆盖前者）：
//! - 项目本地文件（.quality-scan.toml）
//! - 显式指定的路径（--config）
//! - 命令行参数

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 默认配置文件名（在工作目录查找）
pub const DEFAULT_CONFIG_FILE: &str = ".quality-scan.toml";

/// Scanner 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 服务端地址，例如 "http://localhost:3000"
    pub server_url: String,

    /// 项目 key
    pub project_key: Option<String>,

    /// 项目显示名（默认取 key）
    pub project_name: Option<String>,

    /// 质量门名称
    pub gate_name: String,

    /// 要分析的分支
    pub branch: Option<String>,

    /// 覆盖率报告路径（相对源码目录）
    pub coverage_path: Option<String>,

    /// 覆盖率格式提示（lcov, coverage_json, go_cover）
    pub coverage_format: Option<String>,

    /// 轮询间隔（秒）
    pub poll_interval_secs: u64,

    /// 轮询总超时（秒）
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:3000".to_string(),
            project_key: None,
            project_name: None,
            gate_name: "Default Gate".to_string(),
            branch: None,
            coverage_path: None,
            coverage_format: None,
            poll_interval_secs: 2,
            timeout_secs: 600,
        }
    }
}

impl Config {
    /// 从指定文件加载配置
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// 从默认位置加载配置，文件不存在时回退到默认值
    pub fn load() -> Result<Self> {
        let path = PathBuf::from(DEFAULT_CONFIG_FILE);
        if path.exists() {
            Self::from_file(&path)
        } else {
            debug!("No config file found, using defaults");
            Ok(Self::default())
        }
    }

    /// 写出默认配置文件；已存在时拒绝覆盖
    pub fn init_default(path: Option<&Path>) -> Result<PathBuf> {
        let path = path
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        if path.exists() {
            anyhow::bail!("Configuration file already exists: {}", path.display());
        }

        let rendered =
            toml::to_string_pretty(&Config::default()).context("Failed to render default config")?;
        std::fs::write(&path, rendered)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(path)
    }
}
