use std::sync::Arc;

use quality_service::{
    config::AppConfig,
    db,
    handlers::consumer::AnalysisMessageConsumer,
    handlers::health,
    middleware::AppState,
    rabbitmq::{RabbitMqConsumer, RabbitMqPublisherPool},
    routes,
    services::{GateService, SchedulerService, StorageService},
    telemetry,
};
use tokio::net::TcpListener;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "--version" => {
                println!("quality-service {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_help();
                return Ok(());
            }
            _ => {
                eprintln!("未知参数: {}", args[1]);
                print_help();
                std::process::exit(1);
            }
        }
    }

    if let Ok(path) = std::env::var("QUALITY_ENV") {
        dotenv::from_filename(format!(".env.{}", path)).ok();
    } else {
        dotenv::from_filename(".env.local").ok();
        dotenv::dotenv().ok();
    }

    health::set_start_time();

    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    telemetry::init_telemetry(&config);
    telemetry::init_metrics();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Quality service starting...");

    let db_pool = db::create_pool(&config.database).await?;
    db::run_migrations(&db_pool).await?;

    tracing::info!("Database initialized");

    // 初始化 RabbitMQ 发布器池
    let rabbitmq_publisher = Arc::new(RabbitMqPublisherPool::new(config.rabbitmq.clone()));

    // 初始化归档存储
    let storage_service = Arc::new(
        StorageService::new(&config.storage.base_dir)
            .map_err(|e| anyhow::anyhow!("Failed to initialize storage: {}", e))?,
    );

    // 初始化调度与质量门服务
    let scheduler = Arc::new(SchedulerService::new(
        db_pool.clone(),
        rabbitmq_publisher.clone(),
        config.scheduling.clone(),
    ));
    let gate_service = Arc::new(GateService::new(db_pool.clone()));

    let app_state = Arc::new(AppState {
        config: config.clone(),
        db: db_pool.clone(),
        scheduler: scheduler.clone(),
        gate_service,
        storage_service,
        rabbitmq_publisher,
    });

    let app = routes::create_router(app_state.clone());

    // 启动 RabbitMQ 消费者（Runner 回传链路）
    let consumer_handle = start_rabbitmq_consumer(app_state.clone()).await;

    let addr = &config.server.addr;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(addr = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(
            config.server.graceful_shutdown_timeout_secs,
            consumer_handle,
        ))
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// 启动 RabbitMQ 消费者后台任务
async fn start_rabbitmq_consumer(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    let consumer_state = state.clone();
    tokio::spawn(async move {
        // 尝试创建消费者（如果 RabbitMQ 未配置，则跳过）
        let consumer = match RabbitMqConsumer::new(consumer_state.config.rabbitmq.clone()).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Failed to create RabbitMQ consumer: {}. Message consumption disabled.", e);
                return;
            }
        };

        // 设置消费队列
        if let Err(e) = consumer.setup_consumer_queues().await {
            tracing::warn!(
                "Failed to setup consumer queues: {}. Message consumption disabled.",
                e
            );
            return;
        }

        tracing::info!("RabbitMQ consumer started, listening for analysis status and result messages");

        let msg_consumer = AnalysisMessageConsumer::new(consumer_state.scheduler.clone());

        // 启动状态消息消费者
        let status_consumer = consumer.clone();
        let status_msg_consumer = msg_consumer.clone();
        let status_handle = tokio::spawn(async move {
            if let Err(e) = status_consumer
                .consume_status_messages(move |data| {
                    let consumer = status_msg_consumer.clone();
                    tokio::spawn(async move {
                        if let Err(e) = consumer.handle_status_message(data).await {
                            tracing::error!("Failed to handle status message: {}", e);
                        }
                    });
                })
                .await
            {
                tracing::error!("Status consumer error: {}", e);
            }
        });

        // 启动结果消息消费者
        let result_msg_consumer = msg_consumer.clone();
        let result_handle = tokio::spawn(async move {
            if let Err(e) = consumer
                .consume_result_messages(move |data| {
                    let consumer = result_msg_consumer.clone();
                    tokio::spawn(async move {
                        if let Err(e) = consumer.handle_result_message(data).await {
                            tracing::error!("Failed to handle result message: {}", e);
                        }
                    });
                })
                .await
            {
                tracing::error!("Result consumer error: {}", e);
            }
        });

        // 等待两个消费者完成（正常情况下不会完成）
        tokio::select! {
            _ = status_handle => {
                tracing::warn!("Status consumer stopped unexpectedly");
            }
            _ = result_handle => {
                tracing::warn!("Result consumer stopped unexpectedly");
            }
        }

        tracing::info!("RabbitMQ consumer stopped");
    })
}

async fn shutdown_signal(timeout_secs: u64, _consumer_handle: tokio::task::JoinHandle<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, starting graceful shutdown");
        },
    }

    tokio::time::sleep(tokio::time::Duration::from_secs(timeout_secs)).await;
    tracing::warn!("Graceful shutdown timeout reached, forcing exit");
}

fn print_help() {
    println!("quality-service {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("用法: quality-service [选项]");
    println!();
    println!("选项:");
    println!("  --version     打印版本信息并退出");
    println!("  --help        打印此帮助信息并退出");
    println!();
    println!("环境变量:");
    println!("  所有配置通过环境变量完成（前缀 QUALITY_）");
}
