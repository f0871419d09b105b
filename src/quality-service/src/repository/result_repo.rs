//! 分析产物仓库
//! 调用记录、问题、覆盖率、重复块的写入与指标聚合查询

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use common::coverage::{CanonicalCoverage, Format};
use common::duplication::DuplicationBlock;
use common::messages::AnalyzerInvocationRecord;
use common::model::Issue;

use crate::models::report::{CoverageFileRow, DuplicationBlockRow, InvocationRow, IssueRow};

/// 分析产物数据访问
pub struct ResultRepo;

impl ResultRepo {
    /// 在事务内写入一次尝试的调用记录
    pub async fn insert_invocations_tx(
        tx: &mut Transaction<'_, Postgres>,
        analysis_id: Uuid,
        attempt: i32,
        invocations: &[AnalyzerInvocationRecord],
    ) -> Result<(), sqlx::Error> {
        for invocation in invocations {
            sqlx::query(
                "INSERT INTO analyzer_invocations \
                     (analysis_id, analyzer_key, attempt, outcome, exit_code, \
                      duration_ms, oom_killed, stdout_tail, stderr_tail) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(analysis_id)
            .bind(&invocation.analyzer_key)
            .bind(attempt)
            .bind(invocation.outcome.as_str())
            .bind(invocation.exit_code)
            .bind(invocation.duration_ms as i64)
            .bind(invocation.oom_killed)
            .bind(&invocation.stdout_tail)
            .bind(&invocation.stderr_tail)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// 在事务内写入问题列表
    pub async fn insert_issues_tx(
        tx: &mut Transaction<'_, Postgres>,
        analysis_id: Uuid,
        issues: &[Issue],
    ) -> Result<(), sqlx::Error> {
        for issue in issues {
            sqlx::query(
                "INSERT INTO issues \
                     (analysis_id, analyzer_key, rule_key, severity, kind, \
                      file_path, line, message, fingerprint) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(analysis_id)
            .bind(&issue.analyzer_key)
            .bind(&issue.rule_key)
            .bind(issue.severity.as_str())
            .bind(issue.kind.as_str())
            .bind(&issue.file_path)
            .bind(issue.line.map(|l| l as i32))
            .bind(&issue.message)
            .bind(&issue.fingerprint)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// 在事务内写入覆盖率（逐文件）
    pub async fn insert_coverage_tx(
        tx: &mut Transaction<'_, Postgres>,
        analysis_id: Uuid,
        format: Format,
        coverage: &CanonicalCoverage,
    ) -> Result<(), sqlx::Error> {
        for (path, file) in &coverage.files {
            sqlx::query(
                "INSERT INTO coverage_files \
                     (analysis_id, format, file_path, lines_found, lines_hit, \
                      branches_found, branches_hit) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(analysis_id)
            .bind(format.as_str())
            .bind(path)
            .bind(file.lines_found as i64)
            .bind(file.lines_hit as i64)
            .bind(file.branches_found as i64)
            .bind(file.branches_hit as i64)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// 在事务内写入重复块
    pub async fn insert_duplications_tx(
        tx: &mut Transaction<'_, Postgres>,
        analysis_id: Uuid,
        blocks: &[DuplicationBlock],
    ) -> Result<(), sqlx::Error> {
        for block in blocks {
            sqlx::query(
                "INSERT INTO duplication_blocks \
                     (analysis_id, first_file, first_start_line, first_end_line, \
                      second_file, second_start_line, second_end_line, \
                      lines, tokens, excerpt) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(analysis_id)
            .bind(&block.first.file_path)
            .bind(block.first.start_line as i32)
            .bind(block.first.end_line as i32)
            .bind(&block.second.file_path)
            .bind(block.second.start_line as i32)
            .bind(block.second.end_line as i32)
            .bind(block.lines as i32)
            .bind(block.tokens as i32)
            .bind(&block.excerpt)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// 按严重级别统计问题数
    pub async fn issue_severity_counts(
        pool: &PgPool,
        analysis_id: Uuid,
    ) -> Result<Vec<(String, i64)>, sqlx::Error> {
        sqlx::query_as(
            "SELECT severity, COUNT(*) FROM issues \
             WHERE analysis_id = $1 GROUP BY severity",
        )
        .bind(analysis_id)
        .fetch_all(pool)
        .await
    }

    /// 按类别统计问题数
    pub async fn issue_kind_counts(
        pool: &PgPool,
        analysis_id: Uuid,
    ) -> Result<Vec<(String, i64)>, sqlx::Error> {
        sqlx::query_as(
            "SELECT kind, COUNT(*) FROM issues \
             WHERE analysis_id = $1 GROUP BY kind",
        )
        .bind(analysis_id)
        .fetch_all(pool)
        .await
    }

    /// 覆盖率行数合计：(lines_found, lines_hit)
    pub async fn coverage_totals(
        pool: &PgPool,
        analysis_id: Uuid,
    ) -> Result<(i64, i64), sqlx::Error> {
        let row: (Option<i64>, Option<i64>) = sqlx::query_as(
            "SELECT SUM(lines_found), SUM(lines_hit) FROM coverage_files \
             WHERE analysis_id = $1",
        )
        .bind(analysis_id)
        .fetch_one(pool)
        .await?;
        Ok((row.0.unwrap_or(0), row.1.unwrap_or(0)))
    }

    /// 是否存在覆盖率数据
    pub async fn has_coverage(pool: &PgPool, analysis_id: Uuid) -> Result<bool, sqlx::Error> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM coverage_files WHERE analysis_id = $1")
                .bind(analysis_id)
                .fetch_one(pool)
                .await?;
        Ok(count > 0)
    }

    /// 读取全部重复块
    pub async fn duplication_rows(
        pool: &PgPool,
        analysis_id: Uuid,
    ) -> Result<Vec<DuplicationBlockRow>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, analysis_id, first_file, first_start_line, first_end_line, \
                    second_file, second_start_line, second_end_line, lines, tokens, excerpt \
             FROM duplication_blocks WHERE analysis_id = $1",
        )
        .bind(analysis_id)
        .fetch_all(pool)
        .await
    }

    /// 读取作业的问题列表
    pub async fn issues_for(
        pool: &PgPool,
        analysis_id: Uuid,
    ) -> Result<Vec<IssueRow>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, analysis_id, analyzer_key, rule_key, severity, kind, \
                    file_path, line, message, fingerprint, created_at \
             FROM issues \
             WHERE analysis_id = $1 \
             ORDER BY severity, file_path, line",
        )
        .bind(analysis_id)
        .fetch_all(pool)
        .await
    }

    /// 读取作业的逐文件覆盖率
    pub async fn coverage_files_for(
        pool: &PgPool,
        analysis_id: Uuid,
    ) -> Result<Vec<CoverageFileRow>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, analysis_id, format, file_path, lines_found, lines_hit, \
                    branches_found, branches_hit \
             FROM coverage_files \
             WHERE analysis_id = $1 \
             ORDER BY file_path",
        )
        .bind(analysis_id)
        .fetch_all(pool)
        .await
    }

    /// 读取作业的调用记录（按尝试与分析器排序）
    pub async fn invocations_for(
        pool: &PgPool,
        analysis_id: Uuid,
    ) -> Result<Vec<InvocationRow>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, analysis_id, analyzer_key, attempt, outcome, exit_code, \
                    duration_ms, oom_killed, stdout_tail, stderr_tail, created_at \
             FROM analyzer_invocations \
             WHERE analysis_id = $1 \
             ORDER BY attempt, analyzer_key",
        )
        .bind(analysis_id)
        .fetch_all(pool)
        .await
    }
}
