//! 分析作业仓库
//!
//! 状态转换全部通过带状态前提的单条 UPDATE 实现（CAS），
//! 队列投递是 at-least-once，重复投递靠 CAS 失败来幂等吸收。

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::analysis::{Analysis, NewAnalysis};

/// 分析作业表的列清单
const COLUMNS: &str = "\
    id, project_key, branch, \
    pr_provider, pr_repo, pr_number, pr_source_branch, pr_target_branch, \
    commit_sha, analyzers, status, attempt, max_attempts, \
    error_message, runner_name, created_at, started_at, finished_at";

/// 分析作业数据访问
pub struct AnalysisRepo;

impl AnalysisRepo {
    /// 创建新作业（PENDING，attempt = 0）
    pub async fn create(pool: &PgPool, input: &NewAnalysis) -> Result<Analysis, sqlx::Error> {
        let (provider, repo, number, source, target) = match &input.pull_request {
            Some(pr) => (
                Some(pr.provider.clone()),
                Some(pr.repo.clone()),
                Some(pr.pr_number as i64),
                Some(pr.source_branch.clone()),
                Some(pr.target_branch.clone()),
            ),
            None => (None, None, None, None, None),
        };

        let query = format!(
            "INSERT INTO analyses \
                 (project_key, branch, pr_provider, pr_repo, pr_number, \
                  pr_source_branch, pr_target_branch, commit_sha, analyzers, max_attempts) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Analysis>(&query)
            .bind(&input.project_key)
            .bind(&input.branch)
            .bind(provider)
            .bind(repo)
            .bind(number)
            .bind(source)
            .bind(target)
            .bind(&input.commit_sha)
            .bind(sqlx::types::Json(&input.analyzers))
            .bind(input.max_attempts)
            .fetch_one(pool)
            .await
    }

    /// 按 ID 查找作业
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Analysis>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM analyses WHERE id = $1");
        sqlx::query_as::<_, Analysis>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// 派发前递增尝试计数
    ///
    /// 只对 PENDING 作业生效，返回新的尝试序号。
    pub async fn mark_dispatched(pool: &PgPool, id: Uuid) -> Result<Option<i32>, sqlx::Error> {
        sqlx::query_scalar(
            "UPDATE analyses SET attempt = attempt + 1 \
             WHERE id = $1 AND status = 'pending' \
             RETURNING attempt",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Runner 认领作业：PENDING -> RUNNING 的原子转换
    ///
    /// 返回 `false` 表示 CAS 失败（重复投递或已终态），
    /// 调用方应确认消息并跳过。
    pub async fn claim(pool: &PgPool, id: Uuid, runner_name: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE analyses \
             SET status = 'running', started_at = COALESCE(started_at, NOW()), runner_name = $2 \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(runner_name)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// 在事务内将作业标记为成功：RUNNING -> SUCCESS
    pub async fn mark_success_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE analyses \
             SET status = 'success', finished_at = NOW(), error_message = NULL \
             WHERE id = $1 AND status = 'running'",
        )
        .bind(id)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// 在事务内将作业标记为失败：RUNNING -> FAILED
    pub async fn mark_failed_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        error: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE analyses \
             SET status = 'failed', finished_at = NOW(), error_message = $2 \
             WHERE id = $1 AND status = 'running'",
        )
        .bind(id)
        .bind(error)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// 在事务内将作业退回待执行（重试路径）：RUNNING -> PENDING
    pub async fn requeue_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        error: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE analyses \
             SET status = 'pending', error_message = $2 \
             WHERE id = $1 AND status = 'running'",
        )
        .bind(id)
        .bind(error)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

}
