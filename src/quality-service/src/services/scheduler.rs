//! 作业调度服务
//!
//! 持有作业生命周期：创建、派发、认领后的状态流转、
//! 尝试失败的指数退避重试，以及结果落库与终态翻转。
//!
//! 状态机：PENDING -> RUNNING -> {SUCCESS | PENDING(重试) | FAILED}。
//! 产物写入与终态翻转共用一个事务，外部观察者不会看到
//! 无产物的终态。

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use uuid::Uuid;

use common::messages::{
    AnalysisResultMessage, AnalysisStatusMessage, AnalysisTaskMessage, RunnerAnalysisStatus,
};
use common::model::AnalyzerOutcome;

use crate::config::SchedulingConfig;
use crate::error::{AppError, Result};
use crate::models::analysis::{Analysis, NewAnalysis};
use crate::queue::{compute_backoff, TaskQueue};
use crate::repository::{AnalysisRepo, ResultRepo};

/// 一次尝试结束后的处置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptDecision {
    /// 作业成功
    Succeed,
    /// 退避后重试（给出延迟）
    Retry(Duration),
    /// 作业失败（终态）
    Fail,
}

/// 判定一次尝试的处置
///
/// 单个分析器出错只记录在其调用上，不会使作业失败：
/// 只要有一个分析器产出可用报告，作业即成功。
/// 所有分析器都产出致命错误时记一次失败尝试，走重试；
/// 尝试次数用尽后进入 FAILED。
/// `fail_on_analyzer_error` 将策略翻转为任一分析器出错即失败。
pub fn decide_attempt(
    outcomes: &[AnalyzerOutcome],
    attempt: u32,
    max_attempts: u32,
    fail_on_analyzer_error: bool,
    backoff_base: Duration,
) -> AttemptDecision {
    let any_usable = outcomes.iter().any(|o| o.is_usable());
    let any_failed = outcomes.iter().any(|o| !o.is_usable());

    if fail_on_analyzer_error && any_failed {
        return AttemptDecision::Fail;
    }

    if any_usable {
        return AttemptDecision::Succeed;
    }

    // 没有任何可用报告：本次尝试失败
    if attempt >= max_attempts {
        AttemptDecision::Fail
    } else {
        AttemptDecision::Retry(compute_backoff(backoff_base, attempt))
    }
}

/// 作业调度服务
pub struct SchedulerService {
    pool: PgPool,
    queue: Arc<dyn TaskQueue>,
    config: SchedulingConfig,
}

impl SchedulerService {
    /// 创建调度服务
    pub fn new(pool: PgPool, queue: Arc<dyn TaskQueue>, config: SchedulingConfig) -> Self {
        Self { pool, queue, config }
    }

    /// 配置的最大尝试次数
    pub fn max_attempts(&self) -> i32 {
        self.config.max_attempts as i32
    }

    /// 创建作业记录（PENDING）
    pub async fn create(&self, input: &NewAnalysis) -> Result<Analysis> {
        let analysis = AnalysisRepo::create(&self.pool, input).await?;
        metrics::counter!("scheduler.analyses.created").increment(1);
        Ok(analysis)
    }

    /// 派发作业：递增尝试计数并发布任务消息
    pub async fn dispatch(&self, analysis: &Analysis, delay: Option<Duration>) -> Result<()> {
        let attempt = AnalysisRepo::mark_dispatched(&self.pool, analysis.id)
            .await?
            .ok_or_else(|| {
                AppError::Conflict(format!("analysis {} is not pending", analysis.id))
            })?;

        let task = AnalysisTaskMessage {
            analysis_id: analysis.id,
            project_key: analysis.project_key.clone(),
            branch: analysis.branch.clone(),
            pull_request: analysis.pull_request(),
            commit_sha: analysis.commit_sha.clone(),
            analyzers: analysis.analyzers.0.clone(),
            attempt: attempt as u32,
            source_path: format!("/api/v1/internal/analyses/{}/source", analysis.id),
        };

        self.queue.enqueue(&task, delay).await?;

        tracing::info!(
            analysis_id = %analysis.id,
            attempt,
            delayed_secs = delay.map(|d| d.as_secs()).unwrap_or(0),
            "Analysis task dispatched",
        );
        metrics::counter!("scheduler.tasks.dispatched").increment(1);

        Ok(())
    }

    /// Runner 认领作业（PENDING -> RUNNING 的 CAS）
    pub async fn claim(&self, analysis_id: Uuid, runner_name: &str) -> Result<bool> {
        let claimed = AnalysisRepo::claim(&self.pool, analysis_id, runner_name).await?;
        if claimed {
            tracing::info!(
                analysis_id = %analysis_id,
                runner = runner_name,
                "Analysis claimed",
            );
        } else {
            tracing::debug!(
                analysis_id = %analysis_id,
                runner = runner_name,
                "Claim rejected (duplicate delivery or terminal state)",
            );
        }
        Ok(claimed)
    }

    /// 处理 Runner 回传的状态消息
    ///
    /// 只有致命失败（Runner 连分析器都没能运行）在这里驱动
    /// 状态机；其余状态只做观测记录。
    pub async fn handle_status_message(&self, msg: &AnalysisStatusMessage) -> Result<()> {
        tracing::debug!(
            analysis_id = %msg.analysis_id,
            runner = %msg.runner_name,
            status = ?msg.status,
            "Runner status update",
        );

        if msg.status == RunnerAnalysisStatus::Failed {
            let error = msg.error.clone().unwrap_or_else(|| "runner failure".to_string());

            // 致命/基础设施错误走与"全部分析器失败"相同的重试路径
            let decision = decide_attempt(
                &[],
                msg.attempt,
                self.config.max_attempts,
                self.config.fail_on_analyzer_error,
                Duration::from_secs(self.config.backoff_base_secs),
            );
            let retry_delay = match decision {
                AttemptDecision::Retry(delay) => Some(delay),
                _ => None,
            };

            self.finish_failed_attempt(msg.analysis_id, msg.attempt, &[], &error, retry_delay)
                .await?;
        }

        Ok(())
    }

    /// 处理 Runner 回传的结果消息
    ///
    /// 幂等：终态 CAS 失败（重复投递）时整个事务回滚，不产生
    /// 重复产物。
    pub async fn handle_result_message(&self, msg: &AnalysisResultMessage) -> Result<()> {
        let outcomes: Vec<AnalyzerOutcome> =
            msg.invocations.iter().map(|i| i.outcome).collect();

        let decision = decide_attempt(
            &outcomes,
            msg.attempt,
            self.config.max_attempts,
            self.config.fail_on_analyzer_error,
            Duration::from_secs(self.config.backoff_base_secs),
        );

        match decision {
            AttemptDecision::Succeed => self.finish_success(msg).await,
            AttemptDecision::Fail => {
                let error = summarize_failure(msg);
                self.finish_failed_attempt(
                    msg.analysis_id,
                    msg.attempt,
                    &msg.invocations,
                    &error,
                    None,
                )
                .await
            }
            AttemptDecision::Retry(delay) => {
                let error = summarize_failure(msg);
                self.finish_failed_attempt(
                    msg.analysis_id,
                    msg.attempt,
                    &msg.invocations,
                    &error,
                    Some(delay),
                )
                .await
            }
        }
    }

    /// 成功路径：一个事务内先做终态 CAS，再写入全部产物
    async fn finish_success(&self, msg: &AnalysisResultMessage) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let applied = AnalysisRepo::mark_success_tx(&mut tx, msg.analysis_id).await?;
        if !applied {
            // 重复投递或作业不在 RUNNING：丢弃本条消息
            tx.rollback().await?;
            tracing::warn!(
                analysis_id = %msg.analysis_id,
                "Result message dropped (analysis not running)",
            );
            return Ok(());
        }

        ResultRepo::insert_invocations_tx(&mut tx, msg.analysis_id, msg.attempt as i32, &msg.invocations)
            .await?;
        ResultRepo::insert_issues_tx(&mut tx, msg.analysis_id, &msg.issues).await?;
        if let Some(coverage) = &msg.coverage {
            let format = msg.coverage_format.unwrap_or(common::coverage::Format::Lcov);
            ResultRepo::insert_coverage_tx(&mut tx, msg.analysis_id, format, coverage).await?;
        }
        ResultRepo::insert_duplications_tx(&mut tx, msg.analysis_id, &msg.duplications).await?;

        tx.commit().await?;

        tracing::info!(
            analysis_id = %msg.analysis_id,
            attempt = msg.attempt,
            issues = msg.issues.len(),
            duplications = msg.duplications.len(),
            "Analysis succeeded",
        );
        metrics::counter!("scheduler.analyses.succeeded").increment(1);

        Ok(())
    }

    /// 失败尝试路径：记录调用，然后重试或进入终态
    ///
    /// `retry_delay` 为 Some 时退回 PENDING 并延迟重新派发，
    /// 为 None 时直接进入 FAILED。
    async fn finish_failed_attempt(
        &self,
        analysis_id: Uuid,
        attempt: u32,
        invocations: &[common::messages::AnalyzerInvocationRecord],
        error: &str,
        retry_delay: Option<Duration>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let applied = match retry_delay {
            Some(_) => AnalysisRepo::requeue_tx(&mut tx, analysis_id, error).await?,
            None => AnalysisRepo::mark_failed_tx(&mut tx, analysis_id, error).await?,
        };

        if !applied {
            tx.rollback().await?;
            tracing::warn!(
                analysis_id = %analysis_id,
                "Failure message dropped (analysis not running)",
            );
            return Ok(());
        }

        ResultRepo::insert_invocations_tx(&mut tx, analysis_id, attempt as i32, invocations).await?;
        tx.commit().await?;

        match retry_delay {
            Some(delay) => {
                tracing::warn!(
                    analysis_id = %analysis_id,
                    attempt,
                    delay_secs = delay.as_secs(),
                    error,
                    "Attempt failed, scheduling retry",
                );
                metrics::counter!("scheduler.attempts.retried").increment(1);

                let analysis = AnalysisRepo::find_by_id(&self.pool, analysis_id)
                    .await?
                    .ok_or_else(|| AppError::not_found("analysis"))?;
                self.dispatch(&analysis, Some(delay)).await?;
            }
            None => {
                tracing::error!(
                    analysis_id = %analysis_id,
                    attempt,
                    error,
                    "Analysis failed permanently",
                );
                metrics::counter!("scheduler.analyses.failed").increment(1);
            }
        }

        Ok(())
    }
}

/// 为失败尝试生成错误摘要
fn summarize_failure(msg: &AnalysisResultMessage) -> String {
    let failed: Vec<String> = msg
        .invocations
        .iter()
        .filter(|i| !i.outcome.is_usable())
        .map(|i| format!("{}={}", i.analyzer_key, i.outcome.as_str()))
        .collect();

    if failed.is_empty() {
        "no analyzer produced a usable report".to_string()
    } else {
        format!("analyzer failures: {}", failed.join(", "))
    }
}
