//! 分析任务 Worker
//!
//! 从 RabbitMQ 消费分析任务。队列投递是 at-least-once：
//! 每条消息先通过控制面的认领 CAS，认领失败（重复投递或
//! 已终态）就确认并跳过。

use anyhow::{Context, Result};
use futures_util::StreamExt;
use lapin::{options::*, Channel, Connection, ConnectionProperties, ExchangeKind, Queue};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use lapin::types::FieldTable;

use common::messages::{AnalysisTaskMessage, RoutingKeys, RunnerAnalysisStatus};

use crate::client::ControlPlaneClient;
use crate::config::RunnerConfig;
use crate::executor::AnalysisExecutor;
use crate::publisher::MessagePublisher;

/// 任务 Worker
pub struct TaskWorker {
    config: Arc<RunnerConfig>,
    channel: Channel,
    queue: Queue,
    executor: Arc<AnalysisExecutor>,
    publisher: Arc<MessagePublisher>,
    client: Arc<ControlPlaneClient>,
    semaphore: Arc<Semaphore>,
    /// 当前在处理的作业数（心跳用）
    current_jobs: Arc<AtomicUsize>,
}

impl TaskWorker {
    /// 创建新的 Worker
    pub async fn new(
        config: Arc<RunnerConfig>,
        executor: Arc<AnalysisExecutor>,
        client: Arc<ControlPlaneClient>,
        current_jobs: Arc<AtomicUsize>,
    ) -> Result<Self> {
        // 连接到 RabbitMQ
        let conn =
            Connection::connect(&config.message_queue.amqp_url, ConnectionProperties::default())
                .await
                .context("Failed to connect to RabbitMQ")?;

        info!("Connected to RabbitMQ");

        let channel = conn
            .create_channel()
            .await
            .context("Failed to create channel")?;

        // 声明交换机
        channel
            .exchange_declare(
                config.message_queue.exchange.as_str(),
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .context("Failed to declare exchange")?;

        info!("Declared exchange: {}", config.message_queue.exchange);

        // 声明任务队列（与控制面共享）
        let queue_name = config.queue_name();
        let queue = channel
            .queue_declare(
                &queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .context("Failed to declare queue")?;

        info!("Declared queue: {}", queue_name);

        // 设置预取
        channel
            .basic_qos(config.message_queue.prefetch, BasicQosOptions::default())
            .await
            .context("Failed to set QoS")?;

        // 绑定队列到交换机
        channel
            .queue_bind(
                &queue_name,
                &config.message_queue.exchange,
                RoutingKeys::ANALYSIS_TASK,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .context("Failed to bind queue")?;

        debug!(
            "Bound queue {} to exchange with routing key: {}",
            queue_name,
            RoutingKeys::ANALYSIS_TASK
        );

        // 创建消息发布器
        let publisher = Arc::new(MessagePublisher::new(&config, channel.clone()).await?);

        // 创建信号量用于作业并发控制
        let semaphore = Arc::new(Semaphore::new(config.runner.max_concurrent_jobs));

        Ok(Self {
            config,
            channel,
            queue,
            executor,
            publisher,
            client,
            semaphore,
            current_jobs,
        })
    }

    /// 启动 Worker
    pub async fn run(&self) -> Result<()> {
        info!("Starting task worker: {}", self.config.runner.name);

        let mut consumer = self
            .channel
            .basic_consume(
                self.queue.name().as_str(),
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .context("Failed to create consumer")?;

        info!("Consumer created for queue: {}", self.queue.name());

        while let Some(delivery) = consumer.next().await {
            let delivery = delivery.context("Failed to get delivery")?;

            // 获取信号量许可
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .context("Worker semaphore closed")?;

            let executor = self.executor.clone();
            let publisher = self.publisher.clone();
            let client = self.client.clone();
            let channel = self.channel.clone();
            let current_jobs = self.current_jobs.clone();

            tokio::spawn(async move {
                current_jobs.fetch_add(1, Ordering::SeqCst);

                match Self::process_delivery(delivery, executor, publisher, client, channel).await
                {
                    Ok(_) => {}
                    Err(e) => {
                        error!("Failed to process task: {:#}", e);
                    }
                }

                current_jobs.fetch_sub(1, Ordering::SeqCst);
                drop(permit);
            });
        }

        Ok(())
    }

    /// 处理单条消息
    async fn process_delivery(
        delivery: lapin::message::Delivery,
        executor: Arc<AnalysisExecutor>,
        publisher: Arc<MessagePublisher>,
        client: Arc<ControlPlaneClient>,
        channel: Channel,
    ) -> Result<()> {
        // 解析消息
        let task: AnalysisTaskMessage =
            serde_json::from_slice(&delivery.data).context("Failed to parse task message")?;

        info!(
            analysis_id = %task.analysis_id,
            attempt = task.attempt,
            "Received analysis task",
        );

        // 确认消息
        channel
            .basic_ack(delivery.delivery_tag, BasicAckOptions::default())
            .await
            .context("Failed to ack message")?;

        // 认领作业；CAS 失败 = 重复投递，直接跳过
        let claimed = client
            .claim_analysis(task.analysis_id)
            .await
            .context("Failed to claim analysis")?;

        if !claimed {
            info!(
                analysis_id = %task.analysis_id,
                "Analysis not claimable, skipping delivery",
            );
            return Ok(());
        }

        // 发送接收状态
        publisher
            .publish_status(&task, RunnerAnalysisStatus::Received, None, None)
            .await?;

        // 执行分析
        match executor.execute(task.clone(), publisher.as_ref()).await {
            Ok(_) => {
                info!(analysis_id = %task.analysis_id, "Analysis task processed");
            }
            Err(e) => {
                error!(analysis_id = %task.analysis_id, "Analysis execution failed: {:#}", e);
                // 执行层面的意外错误也作为失败尝试上报
                let _ = publisher
                    .publish_status(
                        &task,
                        RunnerAnalysisStatus::Failed,
                        Some(format!("{:#}", e)),
                        Some(common::messages::ErrorCategory::Unknown),
                    )
                    .await;
            }
        }

        Ok(())
    }
}
