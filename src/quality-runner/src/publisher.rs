//! RabbitMQ 消息发布器 - 向控制面发送状态和结果

use anyhow::{Context, Result};
use chrono::Utc;
use lapin::types::FieldTable;
use lapin::{options::*, BasicProperties, Channel, ExchangeKind};
use tracing::{debug, info};
use uuid::Uuid;

use common::messages::{
    AnalysisResultMessage, AnalysisStatusMessage, AnalysisTaskMessage, ErrorCategory,
    RoutingKeys, RunnerAnalysisStatus,
};

use crate::config::RunnerConfig;

/// 消息发布器
pub struct MessagePublisher {
    channel: Channel,
    runner_name: String,
    exchange: String,
}

impl MessagePublisher {
    /// 创建新的发布器
    pub async fn new(config: &RunnerConfig, channel: Channel) -> Result<Self> {
        let exchange = config.message_queue.exchange.clone();
        let runner_name = config.runner.name.clone();

        // 与控制面保持一致：使用同一个 exchange，通过 routing key 区分消息类型
        channel
            .exchange_declare(
                &exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .context("Failed to declare analysis exchange")?;

        info!("Message publisher created for runner: {}, exchange: {}", runner_name, exchange);

        Ok(Self {
            channel,
            runner_name,
            exchange,
        })
    }

    /// 发布分析状态
    pub async fn publish_status(
        &self,
        task: &AnalysisTaskMessage,
        status: RunnerAnalysisStatus,
        error: Option<String>,
        error_category: Option<ErrorCategory>,
    ) -> Result<()> {
        let message = AnalysisStatusMessage {
            analysis_id: task.analysis_id,
            runner_name: self.runner_name.clone(),
            status: status.clone(),
            attempt: task.attempt,
            error,
            error_category,
            timestamp: Utc::now(),
        };

        let routing_key = format!("{}.{}", RoutingKeys::ANALYSIS_STATUS, task.analysis_id);
        self.publish(&routing_key, &message).await?;

        debug!(
            analysis_id = %task.analysis_id,
            status = ?status,
            "Published analysis status",
        );

        Ok(())
    }

    /// 发布分析结果
    ///
    /// 携带一次尝试的全部调用记录与规范化产物。
    pub async fn publish_result(&self, result: &AnalysisResultMessage) -> Result<()> {
        let routing_key = format!("{}.{}", RoutingKeys::ANALYSIS_RESULT, result.analysis_id);
        self.publish(&routing_key, result).await?;

        info!(
            analysis_id = %result.analysis_id,
            attempt = result.attempt,
            invocations = result.invocations.len(),
            issues = result.issues.len(),
            "Published analysis result",
        );

        Ok(())
    }

    /// 构造结果消息骨架
    pub fn new_result_message(&self, analysis_id: Uuid, attempt: u32) -> AnalysisResultMessage {
        AnalysisResultMessage {
            analysis_id,
            runner_name: self.runner_name.clone(),
            attempt,
            invocations: vec![],
            issues: vec![],
            coverage: None,
            coverage_format: None,
            duplications: vec![],
            timestamp: Utc::now(),
        }
    }

    async fn publish<T: serde::Serialize>(&self, routing_key: &str, message: &T) -> Result<()> {
        let payload = serde_json::to_vec(message).context("Failed to serialize message")?;

        self.channel
            .basic_publish(
                &self.exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_delivery_mode(2) // 持久化
                    .with_content_type("application/json".into()),
            )
            .await
            .context("Failed to publish message")?;

        Ok(())
    }
}
