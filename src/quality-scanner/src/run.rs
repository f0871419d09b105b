//! run 子命令
//!
//! 驱动一次完整扫描：打包源码树 -> 幂等确保项目与质量门 ->
//! multipart 提交 -> 固定间隔轮询到终态 -> 获取质量门结果，
//! 最后映射为进程退出码。

use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use crate::archive;
use crate::client::{PullRequestMeta, ScannerClient, SubmissionMeta, SubmitReply};
use crate::config::Config;
use crate::exit_codes;

/// run 子命令参数
#[derive(Debug, Args)]
pub struct RunArgs {
    /// 服务端地址
    #[arg(long)]
    pub server_url: Option<String>,

    /// 项目 key
    #[arg(long)]
    pub project_key: Option<String>,

    /// 项目显示名
    #[arg(long)]
    pub project_name: Option<String>,

    /// 要打包的源码目录
    #[arg(long, default_value = ".")]
    pub source_dir: PathBuf,

    /// 分支名（与 PR 五元组互斥）
    #[arg(long)]
    pub branch: Option<String>,

    /// Commit SHA
    #[arg(long)]
    pub commit: String,

    /// PR 托管平台
    #[arg(long)]
    pub provider: Option<String>,

    /// PR 仓库标识
    #[arg(long)]
    pub repo: Option<String>,

    /// PR 编号
    #[arg(long)]
    pub pr_number: Option<u64>,

    /// PR 源分支
    #[arg(long)]
    pub source_branch: Option<String>,

    /// PR 目标分支
    #[arg(long)]
    pub target_branch: Option<String>,

    /// 覆盖率报告路径
    #[arg(long)]
    pub coverage_path: Option<PathBuf>,

    /// 覆盖率格式（lcov, coverage_json, go_cover）
    #[arg(long)]
    pub coverage_format: Option<String>,

    /// 轮询间隔（秒）
    #[arg(long)]
    pub poll_interval_secs: Option<u64>,

    /// 轮询总超时（秒）
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// 跳过质量门查询
    #[arg(long)]
    pub skip_gate: bool,

    /// 分析失败时视为致命（退出码 1，不再查询质量门）
    #[arg(long)]
    pub fail_on_analysis_failure: bool,

    /// API Token
    #[arg(long, env = "QUALITY_TOKEN")]
    pub token: String,
}

/// 解析后的有效运行设置（参数覆盖配置文件）
struct RunSettings {
    server_url: String,
    project_key: String,
    project_name: String,
    gate_name: String,
    branch: Option<String>,
    pull_request: Option<PullRequestMeta>,
    commit: String,
    coverage_path: Option<PathBuf>,
    coverage_format: Option<String>,
    poll_interval: Duration,
    timeout: Duration,
}

impl RunSettings {
    fn resolve(args: &RunArgs, config: &Config) -> Result<Self> {
        let project_key = args
            .project_key
            .clone()
            .or_else(|| config.project_key.clone())
            .context("project key is required (--project-key or config file)")?;

        let pull_request = resolve_pull_request(args)?;
        let branch = args.branch.clone().or_else(|| config.branch.clone());

        if branch.is_some() && pull_request.is_some() {
            anyhow::bail!("--branch and the pull request flags are mutually exclusive");
        }
        if branch.is_none() && pull_request.is_none() {
            anyhow::bail!("either --branch or the pull request flags are required");
        }

        Ok(Self {
            server_url: args
                .server_url
                .clone()
                .unwrap_or_else(|| config.server_url.clone()),
            project_name: args
                .project_name
                .clone()
                .or_else(|| config.project_name.clone())
                .unwrap_or_else(|| project_key.clone()),
            project_key,
            gate_name: config.gate_name.clone(),
            branch,
            pull_request,
            commit: args.commit.clone(),
            coverage_path: args
                .coverage_path
                .clone()
                .or_else(|| config.coverage_path.clone().map(PathBuf::from)),
            coverage_format: args
                .coverage_format
                .clone()
                .or_else(|| config.coverage_format.clone()),
            poll_interval: Duration::from_secs(
                args.poll_interval_secs.unwrap_or(config.poll_interval_secs),
            ),
            timeout: Duration::from_secs(args.timeout_secs.unwrap_or(config.timeout_secs)),
        })
    }
}

/// 组装 PR 五元组：全给或全不给
fn resolve_pull_request(args: &RunArgs) -> Result<Option<PullRequestMeta>> {
    let given = [
        args.provider.is_some(),
        args.repo.is_some(),
        args.pr_number.is_some(),
        args.source_branch.is_some(),
        args.target_branch.is_some(),
    ];

    if given.iter().all(|g| !g) {
        return Ok(None);
    }
    if given.iter().any(|g| !g) {
        anyhow::bail!(
            "pull request mode requires --provider, --repo, --pr-number, --source-branch and --target-branch"
        );
    }

    Ok(Some(PullRequestMeta {
        provider: args.provider.clone().unwrap(),
        repo: args.repo.clone().unwrap(),
        pr_number: args.pr_number.unwrap(),
        source_branch: args.source_branch.clone().unwrap(),
        target_branch: args.target_branch.clone().unwrap(),
    }))
}

/// 质量门裁决到退出码的映射
fn gate_exit_code(overall: &str) -> i32 {
    match overall {
        "PASS" => exit_codes::SUCCESS,
        "FAIL" => exit_codes::GATE_FAILED,
        // 未知/无法解析的裁决
        _ => exit_codes::FAILURE,
    }
}

/// 终态后的处置：Some(code) 立即退出，None 继续质量门流程
fn decide_after_terminal(status: &str, fail_on_analysis_failure: bool) -> Option<i32> {
    if status == "FAILED" && fail_on_analysis_failure {
        return Some(exit_codes::FAILURE);
    }
    None
}

/// 执行 run 子命令，返回进程退出码
pub async fn execute(args: RunArgs, config: &Config) -> Result<i32> {
    let settings = RunSettings::resolve(&args, config)?;
    let client = ScannerClient::new(&settings.server_url, &args.token)?;

    // Pack：打包源码树
    println!("Packing source tree: {}", args.source_dir.display());
    let source_zip = archive::pack_source_tree(&args.source_dir)?;
    info!(size = source_zip.len(), "Source archive built");

    let coverage_file = match &settings.coverage_path {
        Some(path) => Some(
            std::fs::read(path)
                .with_context(|| format!("Failed to read coverage file: {}", path.display()))?,
        ),
        None => None,
    };

    // Ensure：幂等确保项目与质量门存在
    client
        .ensure_project(&settings.project_key, &settings.project_name)
        .await?;
    client
        .ensure_gate(&settings.project_key, &settings.gate_name)
        .await?;

    // Submit：multipart 上传
    let reply = client
        .submit(
            &SubmissionMeta {
                project_key: settings.project_key.clone(),
                branch: settings.branch.clone(),
                pull_request: settings.pull_request.clone(),
                commit_sha: settings.commit.clone(),
                coverage_format: settings.coverage_format.clone(),
            },
            source_zip,
            coverage_file,
        )
        .await?;

    println!("Analysis submitted: {}", reply.analysis_id);

    // Poll：固定间隔轮询到终态或超时
    let final_status = poll_until_terminal(&client, &reply, settings.poll_interval, settings.timeout)
        .await?;

    if let Some(code) = decide_after_terminal(&final_status, args.fail_on_analysis_failure) {
        println!("Analysis finished with status {} (treated as fatal)", final_status);
        return Ok(code);
    }

    // Gate：可选的质量门查询
    if args.skip_gate {
        println!("Analysis finished with status {} (gate check skipped)", final_status);
        return Ok(exit_codes::SUCCESS);
    }

    let gate = client
        .fetch_gate(&reply.analysis_id, reply.gate_url.as_deref())
        .await?;

    println!("Quality gate: {}", gate.overall);
    if let Some(conditions) = gate.conditions.as_array() {
        for condition in conditions {
            let metric = condition.get("metric_key").and_then(|v| v.as_str()).unwrap_or("?");
            let passed = condition.get("passed").and_then(|v| v.as_bool()).unwrap_or(false);
            let actual = condition
                .get("actual")
                .map(|v| v.to_string())
                .unwrap_or_else(|| "missing".to_string());
            println!(
                "  {} {} (actual: {})",
                if passed { "PASS" } else { "FAIL" },
                metric,
                actual
            );
        }
    }

    Ok(gate_exit_code(&gate.overall))
}

/// 轮询状态直到终态；每次状态变化打印一行，重复状态打印进度点
async fn poll_until_terminal(
    client: &ScannerClient,
    reply: &SubmitReply,
    interval: Duration,
    timeout: Duration,
) -> Result<String> {
    let started = Instant::now();
    let mut last_status = String::new();

    loop {
        if started.elapsed() > timeout {
            println!();
            anyhow::bail!(
                "Polling timed out after {}s (last status: {})",
                timeout.as_secs(),
                if last_status.is_empty() { "unknown" } else { &last_status }
            );
        }

        let status = client
            .fetch_status(&reply.analysis_id, reply.status_url.as_deref())
            .await?;

        if status != last_status {
            if !last_status.is_empty() {
                println!();
            }
            print!("Status: {}", status);
            let _ = std::io::stdout().flush();
            last_status = status.clone();
        } else {
            // 状态未变化：单个进度点
            print!(".");
            let _ = std::io::stdout().flush();
        }

        if status == "SUCCESS" || status == "FAILED" {
            println!();
            return Ok(status);
        }

        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> RunArgs {
        RunArgs {
            server_url: None,
            project_key: Some("platform-api".to_string()),
            project_name: None,
            source_dir: PathBuf::from("."),
            branch: Some("main".to_string()),
            commit: "abc123".to_string(),
            provider: None,
            repo: None,
            pr_number: None,
            source_branch: None,
            target_branch: None,
            coverage_path: None,
            coverage_format: None,
            poll_interval_secs: None,
            timeout_secs: None,
            skip_gate: false,
            fail_on_analysis_failure: false,
            token: "t".to_string(),
        }
    }

    // -- 退出码映射 ------------------------------------------------------------

    #[test]
    fn test_gate_pass_exits_zero() {
        assert_eq!(gate_exit_code("PASS"), 0);
    }

    #[test]
    fn test_gate_fail_exits_two() {
        assert_eq!(gate_exit_code("FAIL"), 2);
    }

    #[test]
    fn test_unknown_gate_exits_one() {
        assert_eq!(gate_exit_code("UNKNOWN"), 1);
        assert_eq!(gate_exit_code(""), 1);
        assert_eq!(gate_exit_code("pass"), 1);
    }

    #[test]
    fn test_failed_analysis_with_fatal_flag_exits_before_gate() {
        // fail-on-failure 开启时 FAILED 直接给退出码 1，不触发质量门查询
        assert_eq!(decide_after_terminal("FAILED", true), Some(1));
    }

    #[test]
    fn test_failed_analysis_without_flag_continues() {
        assert_eq!(decide_after_terminal("FAILED", false), None);
        assert_eq!(decide_after_terminal("SUCCESS", true), None);
        assert_eq!(decide_after_terminal("SUCCESS", false), None);
    }

    // -- 设置解析 --------------------------------------------------------------

    #[test]
    fn test_resolve_requires_project_key() {
        let mut args = base_args();
        args.project_key = None;
        assert!(RunSettings::resolve(&args, &Config::default()).is_err());
    }

    #[test]
    fn test_resolve_branch_mode() {
        let settings = RunSettings::resolve(&base_args(), &Config::default()).unwrap();
        assert_eq!(settings.branch.as_deref(), Some("main"));
        assert!(settings.pull_request.is_none());
        // 项目名默认取 key
        assert_eq!(settings.project_name, "platform-api");
    }

    #[test]
    fn test_resolve_pr_mode() {
        let mut args = base_args();
        args.branch = None;
        args.provider = Some("github".to_string());
        args.repo = Some("acme/platform".to_string());
        args.pr_number = Some(7);
        args.source_branch = Some("feature/z".to_string());
        args.target_branch = Some("main".to_string());

        let settings = RunSettings::resolve(&args, &Config::default()).unwrap();
        let pr = settings.pull_request.unwrap();
        assert_eq!(pr.pr_number, 7);
        assert!(settings.branch.is_none());
    }

    #[test]
    fn test_resolve_partial_pr_rejected() {
        let mut args = base_args();
        args.branch = None;
        args.provider = Some("github".to_string());

        assert!(RunSettings::resolve(&args, &Config::default()).is_err());
    }

    #[test]
    fn test_resolve_branch_and_pr_mutually_exclusive() {
        let mut args = base_args();
        args.provider = Some("github".to_string());
        args.repo = Some("acme/platform".to_string());
        args.pr_number = Some(7);
        args.source_branch = Some("feature/z".to_string());
        args.target_branch = Some("main".to_string());

        assert!(RunSettings::resolve(&args, &Config::default()).is_err());
    }

    #[test]
    fn test_resolve_neither_branch_nor_pr_rejected() {
        let mut args = base_args();
        args.branch = None;
        assert!(RunSettings::resolve(&args, &Config::default()).is_err());
    }

    #[test]
    fn test_args_override_config() {
        let mut config = Config::default();
        config.poll_interval_secs = 10;
        config.timeout_secs = 1200;

        let mut args = base_args();
        args.poll_interval_secs = Some(1);

        let settings = RunSettings::resolve(&args, &config).unwrap();
        assert_eq!(settings.poll_interval, Duration::from_secs(1));
        // 未覆盖的取配置值
        assert_eq!(settings.timeout, Duration::from_secs(1200));
    }
}
