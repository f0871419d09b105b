//! 分析任务执行引擎
//!
//! 一次任务 = 下载并解压源码归档，然后对每个请求的分析器
//! 启动一个沙箱（Runner 范围内有界并发），收集调用记录，
//! 摄取 OK 调用产出的报告，最后把规范化结果发回控制面。
//!
//! 单个分析器失败只记录在调用上；只有归档获取/解压这类
//! 致命错误才把本次尝试报告为失败。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use common::coverage;
use common::ingest;
use common::messages::{
    AnalysisResultMessage, AnalysisTaskMessage, AnalyzerSpec, ErrorCategory,
    RunnerAnalysisStatus,
};
use common::model::AnalyzerOutcome;

use crate::client::ControlPlaneClient;
use crate::config::RunnerConfig;
use crate::publisher::MessagePublisher;
use crate::sandbox::{run_analyzer, Sandbox, SandboxSpec};
use crate::workspace::{extract_archive, WorkspaceManager};

/// 分析执行引擎
pub struct AnalysisExecutor {
    config: Arc<RunnerConfig>,
    workspace_manager: WorkspaceManager,
    sandbox: Arc<dyn Sandbox>,
    client: Arc<ControlPlaneClient>,
    /// Runner 范围的沙箱并发上限（独立于作业并发）
    sandbox_semaphore: Arc<Semaphore>,
}

impl AnalysisExecutor {
    /// 创建执行引擎
    pub fn new(
        config: Arc<RunnerConfig>,
        sandbox: Arc<dyn Sandbox>,
        client: Arc<ControlPlaneClient>,
    ) -> Result<Self> {
        let workspace_manager = WorkspaceManager::from_config(&config)?;

        // 启动时清理旧工作区
        if let Err(e) = workspace_manager.cleanup_old_workspaces() {
            warn!("Failed to cleanup old workspaces on startup: {}", e);
        }

        let sandbox_semaphore =
            Arc::new(Semaphore::new(config.execution.max_concurrent_sandboxes));

        Ok(Self {
            config,
            workspace_manager,
            sandbox,
            client,
            sandbox_semaphore,
        })
    }

    /// 执行分析任务
    pub async fn execute(
        &self,
        task: AnalysisTaskMessage,
        publisher: &MessagePublisher,
    ) -> Result<()> {
        info!(
            analysis_id = %task.analysis_id,
            attempt = task.attempt,
            analyzers = task.analyzers.len(),
            "Starting analysis execution",
        );

        publisher
            .publish_status(&task, RunnerAnalysisStatus::Preparing, None, None)
            .await?;

        let workspace = self
            .workspace_manager
            .create_workspace(task.analysis_id, task.attempt)?;

        // 获取并解压源码归档；失败是本次尝试的致命错误
        if let Err((e, category)) = self.prepare_workspace(&task, &workspace).await {
            error!(analysis_id = %task.analysis_id, "Workspace preparation failed: {:#}", e);
            publisher
                .publish_status(
                    &task,
                    RunnerAnalysisStatus::Failed,
                    Some(format!("{:#}", e)),
                    Some(category),
                )
                .await?;
            self.cleanup(&workspace);
            return Ok(());
        }

        publisher
            .publish_status(&task, RunnerAnalysisStatus::Running, None, None)
            .await?;

        // 有界并发地运行所有请求的分析器
        let mut handles = Vec::with_capacity(task.analyzers.len());
        for spec in &task.analyzers {
            let permit = self
                .sandbox_semaphore
                .clone()
                .acquire_owned()
                .await
                .context("Sandbox semaphore closed")?;

            let sandbox = self.sandbox.clone();
            let sandbox_spec = build_sandbox_spec(&task, spec, &workspace);
            let analyzer_key = spec.key.clone();
            let timeout = self.config.sandbox_timeout();
            let max_log_bytes = self.config.execution.sandbox.max_log_bytes;

            handles.push(tokio::spawn(async move {
                let record =
                    run_analyzer(sandbox, sandbox_spec, &analyzer_key, timeout, max_log_bytes)
                        .await;
                drop(permit);
                record
            }));
        }

        let mut result = publisher.new_result_message(task.analysis_id, task.attempt);
        for handle in handles {
            let record = handle.await.context("Analyzer task panicked")?;
            info!(
                analysis_id = %task.analysis_id,
                analyzer = %record.analyzer_key,
                outcome = record.outcome.as_str(),
                duration_ms = record.duration_ms,
                "Analyzer invocation finished",
            );
            result.invocations.push(record);
        }

        // 只摄取 OK 调用的报告；其余调用贡献零产物
        let ok_analyzers: Vec<String> = result
            .invocations
            .iter()
            .filter(|r| r.outcome == AnalyzerOutcome::Ok)
            .map(|r| r.analyzer_key.clone())
            .collect();
        for analyzer_key in ok_analyzers {
            ingest_analyzer_report(&workspace, &analyzer_key, &mut result);
        }

        publisher.publish_result(&result).await?;

        let any_usable = result.invocations.iter().any(|r| r.outcome.is_usable());
        if any_usable {
            publisher
                .publish_status(&task, RunnerAnalysisStatus::Succeeded, None, None)
                .await?;
        }

        info!(
            analysis_id = %task.analysis_id,
            attempt = task.attempt,
            usable = any_usable,
            issues = result.issues.len(),
            "Analysis execution completed",
        );

        self.cleanup(&workspace);

        Ok(())
    }

    /// 下载并解压源码归档
    async fn prepare_workspace(
        &self,
        task: &AnalysisTaskMessage,
        workspace: &Path,
    ) -> std::result::Result<(), (anyhow::Error, ErrorCategory)> {
        let bytes = self
            .client
            .download_source(&task.source_path)
            .await
            .map_err(|e| (e, ErrorCategory::Network))?;

        extract_archive(workspace, &bytes).map_err(|e| (e, ErrorCategory::Storage))?;

        Ok(())
    }

    /// 清理工作区
    fn cleanup(&self, workspace: &Path) {
        if let Err(e) = self.workspace_manager.cleanup_workspace(workspace) {
            warn!("Failed to cleanup workspace {:?}: {}", workspace, e);
        }
        let _ = self.workspace_manager.cleanup_old_workspaces();
    }
}

/// 为一个分析器构造沙箱规格
fn build_sandbox_spec(
    task: &AnalysisTaskMessage,
    analyzer: &AnalyzerSpec,
    workspace: &Path,
) -> SandboxSpec {
    let mut env = vec![
        format!("ANALYZER_KEY={}", analyzer.key),
        format!("ANALYSIS_ID={}", task.analysis_id),
        format!("PROJECT_KEY={}", task.project_key),
        format!("COMMIT_SHA={}", task.commit_sha),
        format!("REPORT_PATH=/workspace/{}", ingest::report_file_name(&analyzer.key)),
    ];
    if let Some(branch) = &task.branch {
        env.push(format!("BRANCH={}", branch));
    }
    if !analyzer.config.is_null() {
        env.push(format!("ANALYZER_CONFIG={}", analyzer.config));
    }

    SandboxSpec {
        name: format!(
            "quality-{}-{}-{}",
            task.analysis_id.simple(),
            analyzer.key,
            task.attempt
        ),
        image: analyzer.image.clone(),
        env,
        workspace_dir: workspace.to_path_buf(),
    }
}

/// 摄取单个分析器的报告文件
///
/// 缺失或无法解析的报告只丢弃该分析器的贡献，不影响作业。
fn ingest_analyzer_report(
    workspace: &Path,
    analyzer_key: &str,
    result: &mut AnalysisResultMessage,
) {
    let report_path = workspace.join(ingest::report_file_name(analyzer_key));

    let raw = match std::fs::read_to_string(&report_path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(
                analyzer = analyzer_key,
                path = %report_path.display(),
                "No report produced: {}",
                e
            );
            return;
        }
    };

    let report = match ingest::parse_report(analyzer_key, &raw) {
        Ok(report) => report,
        Err(e) => {
            warn!(analyzer = analyzer_key, "Report dropped: {}", e);
            return;
        }
    };

    result.issues.extend(report.issues);
    result.duplications.extend(report.duplications);

    if let Some(coverage_ref) = report.coverage {
        ingest_coverage(workspace, analyzer_key, &coverage_ref, result);
    }
}

/// 摄取分析器引用的覆盖率文件
fn ingest_coverage(
    workspace: &Path,
    analyzer_key: &str,
    coverage_ref: &ingest::CoverageRef,
    result: &mut AnalysisResultMessage,
) {
    // 覆盖率路径必须留在工作区内
    if coverage_ref.path.split('/').any(|p| p == "..") {
        warn!(analyzer = analyzer_key, path = %coverage_ref.path, "Coverage path escapes workspace, dropped");
        return;
    }

    let path: PathBuf = workspace.join(&coverage_ref.path);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(analyzer = analyzer_key, path = %path.display(), "Coverage file unreadable: {}", e);
            return;
        }
    };

    let parsed = match coverage_ref.format {
        Some(format) => coverage::parse(&raw, format).map(|c| (format, c)),
        None => coverage::detect_format(&raw)
            .and_then(|format| coverage::parse(&raw, format).map(|c| (format, c))),
    };

    match parsed {
        Ok((format, parsed_coverage)) => {
            match &mut result.coverage {
                Some(existing) => existing.merge(parsed_coverage),
                None => result.coverage = Some(parsed_coverage),
            }
            if result.coverage_format.is_none() {
                result.coverage_format = Some(format);
            }
        }
        Err(e) => {
            // 解析失败：记录并丢弃，不影响作业
            warn!(analyzer = analyzer_key, "Coverage dropped: {}", e);
        }
    }
}
