//! Runner 配置管理

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runner 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Runner 基本信息
    pub runner: RunnerInfo,

    /// 控制面配置
    pub control_plane: ControlPlaneConfig,

    /// RabbitMQ 配置
    pub message_queue: MessageQueueConfig,

    /// 执行配置
    pub execution: ExecutionConfig,
}

/// Runner 基本信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerInfo {
    /// Runner 名称（唯一标识）
    pub name: String,

    /// 能力标签
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// 是否支持 Docker 执行
    #[serde(default = "default_true")]
    pub docker_supported: bool,

    /// 最大并发作业数
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_jobs: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent() -> usize {
    2
}

/// 控制面配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    /// 控制面 API 地址
    pub api_url: String,

    /// Runner API Key（用于注册、认领和归档下载）
    pub api_key: String,

    /// 心跳间隔（秒）
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
}

fn default_heartbeat_interval() -> u64 {
    30
}

/// RabbitMQ 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageQueueConfig {
    /// AMQP 地址
    pub amqp_url: String,

    /// 交换机名称
    #[serde(default = "default_exchange")]
    pub exchange: String,

    /// 预取消息数量
    #[serde(default = "default_prefetch")]
    pub prefetch: u16,
}

fn default_exchange() -> String {
    "quality.analysis".to_string()
}

fn default_prefetch() -> u16 {
    1
}

/// 执行配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// workspace 基础目录
    #[serde(default = "default_workspace_dir")]
    pub workspace_base_dir: String,

    /// 保留最近 N 个工作区（清理策略）
    #[serde(default = "default_retain_count")]
    pub workspace_retain_count: usize,

    /// 沙箱最大并发数（整个 Runner 范围，独立于作业数）
    #[serde(default = "default_max_sandboxes")]
    pub max_concurrent_sandboxes: usize,

    /// 沙箱配置
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

/// 沙箱执行配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// 单个分析器的超时（秒）
    #[serde(default = "default_sandbox_timeout")]
    pub timeout_secs: u64,

    /// 每条输出流的捕获上限（字节，超出截断最旧部分）
    #[serde(default = "default_max_log_bytes")]
    pub max_log_bytes: usize,

    /// 内存限制（GB）
    #[serde(default)]
    pub memory_limit_gb: Option<i64>,

    /// CPU 份额（相对权重，1024 为基准）
    #[serde(default)]
    pub cpu_shares: Option<i64>,

    /// 最大进程数
    #[serde(default)]
    pub pids_limit: Option<i64>,

    /// 网络模式 (bridge, host, none)
    #[serde(default)]
    pub network_mode: Option<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_sandbox_timeout(),
            max_log_bytes: default_max_log_bytes(),
            memory_limit_gb: Some(4),
            cpu_shares: Some(1024),
            pids_limit: Some(1024),
            network_mode: Some("none".to_string()),
        }
    }
}

fn default_workspace_dir() -> String {
    "/tmp/quality-runner/workspace".to_string()
}

fn default_retain_count() -> usize {
    5
}

fn default_max_sandboxes() -> usize {
    4
}

fn default_sandbox_timeout() -> u64 {
    600 // 10分钟
}

fn default_max_log_bytes() -> usize {
    256 * 1024 // 256KB
}

impl RunnerConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            runner: RunnerInfo {
                name: std::env::var("RUNNER_NAME").context("RUNNER_NAME must be set")?,
                capabilities: std::env::var("RUNNER_CAPABILITIES")
                    .ok()
                    .unwrap_or_else(|| "docker".to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                docker_supported: std::env::var("RUNNER_DOCKER_SUPPORTED")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(true),
                max_concurrent_jobs: std::env::var("RUNNER_MAX_CONCURRENT_JOBS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(2),
            },
            control_plane: ControlPlaneConfig {
                api_url: std::env::var("CONTROL_PLANE_API_URL")
                    .context("CONTROL_PLANE_API_URL must be set")?,
                api_key: std::env::var("RUNNER_API_KEY").context("RUNNER_API_KEY must be set")?,
                heartbeat_interval_secs: std::env::var("RUNNER_HEARTBEAT_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            },
            message_queue: MessageQueueConfig {
                amqp_url: std::env::var("RABBITMQ_AMQP_URL")
                    .context("RABBITMQ_AMQP_URL must be set")?,
                exchange: std::env::var("RABBITMQ_EXCHANGE")
                    .ok()
                    .unwrap_or_else(default_exchange),
                prefetch: std::env::var("RABBITMQ_PREFETCH")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1),
            },
            execution: ExecutionConfig {
                workspace_base_dir: std::env::var("RUNNER_WORKSPACE_DIR")
                    .ok()
                    .unwrap_or_else(default_workspace_dir),
                workspace_retain_count: std::env::var("RUNNER_WORKSPACE_RETAIN_COUNT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(default_retain_count),
                max_concurrent_sandboxes: std::env::var("RUNNER_MAX_CONCURRENT_SANDBOXES")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(default_max_sandboxes),
                sandbox: SandboxConfig {
                    timeout_secs: std::env::var("RUNNER_SANDBOX_TIMEOUT_SECS")
                        .ok()
                        .and_then(|v| v.parse().ok())
                        .unwrap_or_else(default_sandbox_timeout),
                    max_log_bytes: std::env::var("RUNNER_SANDBOX_MAX_LOG_BYTES")
                        .ok()
                        .and_then(|v| v.parse().ok())
                        .unwrap_or_else(default_max_log_bytes),
                    memory_limit_gb: std::env::var("RUNNER_SANDBOX_MEMORY_GB")
                        .ok()
                        .and_then(|v| v.parse().ok())
                        .or(Some(4)),
                    cpu_shares: Some(1024),
                    pids_limit: Some(1024),
                    network_mode: std::env::var("RUNNER_SANDBOX_NETWORK_MODE").ok().or_else(|| Some("none".to_string())),
                },
            },
        })
    }

    /// 获取心跳间隔
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.control_plane.heartbeat_interval_secs)
    }

    /// 获取沙箱超时
    pub fn sandbox_timeout(&self) -> Duration {
        Duration::from_secs(self.execution.sandbox.timeout_secs)
    }

    /// 生成队列名称
    pub fn queue_name(&self) -> String {
        common::messages::QueueNames::TASK.to_string()
    }
}
