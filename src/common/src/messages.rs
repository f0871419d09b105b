//! RabbitMQ 消息协议定义
//!
//! 定义 Runner 和控制面之间的通信协议

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use uuid::Uuid;

use crate::coverage::{CanonicalCoverage, Format};
use crate::duplication::DuplicationBlock;
use crate::model::{AnalyzerOutcome, Issue};

/// 分析任务消息（控制面 -> Runner）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisTaskMessage {
    /// 分析作业 ID
    pub analysis_id: Uuid,

    /// 项目 key
    pub project_key: String,

    /// 分支名（与 pull_request 互斥）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Pull Request 描述（与 branch 互斥）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<PullRequestInfo>,

    /// Commit SHA
    pub commit_sha: String,

    /// 请求的分析器（有序）
    pub analyzers: Vec<AnalyzerSpec>,

    /// 当前尝试序号（从 1 开始）
    pub attempt: u32,

    /// 源码归档下载路径（相对控制面 API 根）
    pub source_path: String,
}

/// Pull Request 描述
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PullRequestInfo {
    /// 托管平台（github/gitlab/...）
    pub provider: String,

    /// 仓库标识
    pub repo: String,

    /// PR 编号
    pub pr_number: u64,

    /// 源分支
    pub source_branch: String,

    /// 目标分支
    pub target_branch: String,
}

/// 单个分析器的调用规格
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerSpec {
    /// 分析器 key（唯一标识）
    pub key: String,

    /// 沙箱镜像引用
    pub image: String,

    /// 不透明配置（原样传给分析器）
    #[serde(default)]
    pub config: serde_json::Value,
}

/// 分析状态更新消息（Runner -> 控制面）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisStatusMessage {
    /// 分析作业 ID
    pub analysis_id: Uuid,

    /// Runner 名称
    pub runner_name: String,

    /// 状态
    pub status: RunnerAnalysisStatus,

    /// 尝试序号
    pub attempt: u32,

    /// 错误信息
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// 错误分类
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,

    /// 时间戳
    pub timestamp: DateTime<Utc>,
}

/// Runner 侧的分析执行状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunnerAnalysisStatus {
    /// 已接收
    Received,
    /// 准备中（下载/解压归档）
    Preparing,
    /// 执行中
    Running,
    /// 本次尝试成功
    Succeeded,
    /// 本次尝试失败（致命/基础设施错误）
    Failed,
}

/// 错误分类
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// 网络错误
    Network,
    /// 归档存储错误
    Storage,
    /// 工作区错误
    Workspace,
    /// 沙箱错误
    Sandbox,
    /// 报告解析错误
    Parse,
    /// 超时
    Timeout,
    /// 资源不足
    Resource,
    /// 未知错误
    Unknown,
}

/// 单个分析器调用记录
///
/// 沙箱运行结束后创建，此后不可变。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerInvocationRecord {
    /// 分析器 key
    pub analyzer_key: String,

    /// 调用结果
    pub outcome: AnalyzerOutcome,

    /// 退出码（超时/OOM 时可能缺失）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// 墙钟时长（毫秒）
    pub duration_ms: u64,

    /// 是否被 OOM 杀死
    pub oom_killed: bool,

    /// 截断后的标准输出（保留尾部）
    pub stdout_tail: String,

    /// 截断后的标准错误（保留尾部）
    pub stderr_tail: String,
}

/// 分析结果消息（Runner -> 控制面）
///
/// 携带一次尝试的全部规范化产物。控制面先持久化产物，
/// 再翻转作业状态，保证外部观察者不会看到无产物的终态。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResultMessage {
    /// 分析作业 ID
    pub analysis_id: Uuid,

    /// Runner 名称
    pub runner_name: String,

    /// 尝试序号
    pub attempt: u32,

    /// 各分析器的调用记录
    pub invocations: Vec<AnalyzerInvocationRecord>,

    /// 规范化问题列表
    pub issues: Vec<Issue>,

    /// 规范化覆盖率（所有来源合并后）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<CanonicalCoverage>,

    /// 覆盖率来源格式（多来源时取第一个）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_format: Option<Format>,

    /// 重复块列表
    pub duplications: Vec<DuplicationBlock>,

    /// 时间戳
    pub timestamp: DateTime<Utc>,
}

/// Runner 注册消息（Runner -> 控制面）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerRegistrationMessage {
    /// Runner 名称
    pub name: String,

    /// 能力标签
    pub capabilities: Vec<String>,

    /// 是否支持 Docker
    pub docker_supported: bool,

    /// 最大并发数
    pub max_concurrent_jobs: usize,

    /// 操作系统
    pub os: String,

    /// 架构
    pub arch: String,

    /// Runner 版本
    pub version: String,

    /// 主机名
    pub hostname: String,

    /// 时间戳
    pub timestamp: DateTime<Utc>,
}

/// Runner 心跳消息（Runner -> 控制面）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerHeartbeatMessage {
    /// Runner 名称
    pub name: String,

    /// 状态
    pub status: RunnerStatus,

    /// 当前执行的任务数
    pub current_jobs: usize,

    /// 最后错误
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// 系统信息
    pub system: SystemInfo,

    /// 时间戳
    pub timestamp: DateTime<Utc>,
}

/// Runner 状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunnerStatus {
    /// 在线
    Online,
    /// 活跃
    Active,
    /// 维护中
    Maintenance,
    /// 离线
    Offline,
}

/// 系统信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    /// CPU 使用率（0-100）
    pub cpu_usage_percent: f32,

    /// 内存使用率（0-100）
    pub memory_usage_percent: f32,

    /// 可用内存（MB）
    pub available_memory_mb: u64,
}

/// Routing keys for RabbitMQ
pub struct RoutingKeys;

impl RoutingKeys {
    /// 分析任务路由
    pub const ANALYSIS_TASK: &'static str = "analysis.task";

    /// 分析状态路由
    pub const ANALYSIS_STATUS: &'static str = "analysis.status";

    /// 分析结果路由
    pub const ANALYSIS_RESULT: &'static str = "analysis.result";
}

/// Exchange names
pub struct Exchanges;

impl Exchanges {
    /// 分析交换机
    pub const ANALYSIS: &'static str = "quality.analysis";
}

/// Queue names
pub struct QueueNames;

impl QueueNames {
    /// 任务队列
    pub const TASK: &'static str = "analysis.task.queue";

    /// 任务重试队列（按消息 TTL 死信回任务队列）
    pub const TASK_RETRY: &'static str = "analysis.task.queue.retry";

    /// 状态队列
    pub const STATUS: &'static str = "analysis.status.queue";

    /// 结果队列
    pub const RESULT: &'static str = "analysis.result.queue";
}

/// Queue types
pub struct QueueTypes;

impl QueueTypes {
    /// 死信队列后缀
    pub const DEAD_LETTER_SUFFIX: &'static str = ".dlq";

    /// 重试队列后缀
    pub const RETRY_SUFFIX: &'static str = ".retry";
}
