//! 任务队列抽象
//!
//! 调度逻辑只依赖这里的 trait，不直接依赖具体消息中间件。
//! 生产实现基于 RabbitMQ（见 `rabbitmq` 模块），测试使用内存实现。

use std::time::Duration;

use async_trait::async_trait;

use common::messages::AnalysisTaskMessage;

use crate::error::Result;

/// 分析任务队列
///
/// 投递语义为 at-least-once：消费侧必须幂等。
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// 入队一条任务
    ///
    /// `delay` 为 Some 时延迟投递（重试退避路径）。
    async fn enqueue(&self, task: &AnalysisTaskMessage, delay: Option<Duration>) -> Result<()>;
}

/// 计算重试退避时长：base * 2^(attempt_index - 1)
///
/// `attempt_index` 是刚失败的尝试序号（从 1 开始）。
/// 指数被钳制在 16，避免溢出。
pub fn compute_backoff(base: Duration, attempt_index: u32) -> Duration {
    let exponent = attempt_index.saturating_sub(1).min(16);
    base * 2u32.pow(exponent)
}
