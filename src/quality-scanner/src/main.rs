//! quality-scanner CLI - 代码质量分析扫描器
//!
//! 提供两个子命令：
//! - `init`：写出默认配置文件
//! - `run`：打包源码、提交分析、轮询状态并查询质量门

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod archive;
mod client;
mod config;
mod exit_codes;
mod run;

use config::Config;

/// 代码质量分析扫描器
#[derive(Parser)]
#[command(
    name = "quality-scan",
    version,
    about = "Submit a source tree for quality analysis and evaluate its quality gate",
    propagate_version = true,
    after_help = "Exit codes: 0 = success/gate passed, 1 = failure/unknown/timeout, 2 = gate failed."
)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// 输出更多日志
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 写出默认配置文件
    Init,

    /// 执行一次扫描：打包 -> 提交 -> 轮询 -> 质量门
    Run(run::RunArgs),
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Init => {
            let path = Config::init_default(cli.config.as_deref())?;
            println!("Configuration initialized at: {}", path.display());
            Ok(())
        }
        Commands::Run(args) => {
            let config = match &cli.config {
                Some(path) => Config::from_file(path)?,
                None => Config::load()?,
            };

            let code = match run::execute(args, &config).await {
                Ok(code) => code,
                Err(e) => {
                    // 协议/致命错误：打印原因并以失败码退出
                    eprintln!("Error: {:#}", e);
                    exit_codes::FAILURE
                }
            };

            std::process::exit(code);
        }
    }
}
