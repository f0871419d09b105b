//! quality-runner 入口
//! 注册到控制面、启动心跳循环、消费分析任务

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod client;
mod config;
mod executor;
mod publisher;
mod sandbox;
mod worker;
mod workspace;

use client::ControlPlaneClient;
use config::RunnerConfig;
use executor::AnalysisExecutor;
use sandbox::DockerSandbox;
use worker::TaskWorker;

fn print_version() {
    println!("quality-runner {}", env!("CARGO_PKG_VERSION"));
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::args().any(|a| a == "--version" || a == "-V") {
        print_version();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(RunnerConfig::from_env()?);

    info!(
        runner = %config.runner.name,
        version = env!("CARGO_PKG_VERSION"),
        max_concurrent_jobs = config.runner.max_concurrent_jobs,
        "Quality runner starting...",
    );

    // 连接 Docker
    let sandbox = Arc::new(DockerSandbox::connect(config.execution.sandbox.clone()).await?);

    // 控制面客户端与注册
    let client = Arc::new(ControlPlaneClient::new((*config).clone())?);
    let heartbeat_interval_secs = client.register().await?;

    // 当前作业计数（心跳上报）
    let current_jobs = Arc::new(AtomicUsize::new(0));

    // 心跳循环
    let heartbeat_client = client.clone();
    let heartbeat_jobs = current_jobs.clone();
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(heartbeat_interval_secs));
        loop {
            ticker.tick().await;
            let jobs = heartbeat_jobs.load(Ordering::SeqCst);
            if let Err(e) = heartbeat_client.send_heartbeat(jobs).await {
                warn!("Heartbeat failed: {:#}", e);
            }
        }
    });

    // 执行引擎与 Worker
    let executor = Arc::new(AnalysisExecutor::new(config.clone(), sandbox, client.clone())?);
    let task_worker = TaskWorker::new(config.clone(), executor, client, current_jobs).await?;

    tokio::select! {
        result = task_worker.run() => {
            if let Err(e) = result {
                error!("Worker stopped with error: {:#}", e);
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C received, shutting down");
        }
    }

    info!("Quality runner stopped");
    Ok(())
}
