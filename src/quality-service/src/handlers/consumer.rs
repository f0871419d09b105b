//! Runner 消息消费入口
//! 解析队列回传的状态/结果消息并驱动调度器

use std::sync::Arc;

use anyhow::{Context, Result};

use common::messages::{AnalysisResultMessage, AnalysisStatusMessage};

use crate::services::SchedulerService;

/// 分析消息消费器
#[derive(Clone)]
pub struct AnalysisMessageConsumer {
    scheduler: Arc<SchedulerService>,
}

impl AnalysisMessageConsumer {
    /// 创建消费器
    pub fn new(scheduler: Arc<SchedulerService>) -> Self {
        Self { scheduler }
    }

    /// 处理状态消息
    pub async fn handle_status_message(&self, data: Vec<u8>) -> Result<()> {
        let msg: AnalysisStatusMessage =
            serde_json::from_slice(&data).context("Failed to parse status message")?;

        metrics::counter!("consumer.status_messages").increment(1);

        self.scheduler
            .handle_status_message(&msg)
            .await
            .context("Failed to handle status message")?;

        Ok(())
    }

    /// 处理结果消息
    pub async fn handle_result_message(&self, data: Vec<u8>) -> Result<()> {
        let msg: AnalysisResultMessage =
            serde_json::from_slice(&data).context("Failed to parse result message")?;

        metrics::counter!("consumer.result_messages").increment(1);

        self.scheduler
            .handle_result_message(&msg)
            .await
            .context("Failed to handle result message")?;

        Ok(())
    }
}
