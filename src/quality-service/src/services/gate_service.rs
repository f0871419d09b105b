//! 质量门服务
//!
//! 按需从最新持久化的产物计算指标映射，结合项目当前条件
//! 集合评估质量门。结果从不缓存，两个输入任何一方变化都
//! 立即反映在下一次评估中。

use std::collections::HashMap;

use sqlx::PgPool;
use uuid::Uuid;

use common::duplication::summarize;
use common::gate::{evaluate, GateCondition, QualityGateResult};

use crate::error::{AppError, Result};
use crate::models::analysis::{Analysis, AnalysisStatus};
use crate::repository::{GateRepo, ResultRepo};

/// 质量门服务
pub struct GateService {
    pool: PgPool,
}

impl GateService {
    /// 创建质量门服务
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 计算一次分析的指标映射
    ///
    /// 指标键：coverage、issues、{severity}_issues、bugs、
    /// vulnerabilities、code_smells、duplicated_lines、
    /// duplicated_blocks、duplicated_files。
    /// 没有任何覆盖率数据时不设置 coverage 键（缺失指标在
    /// 评估时按失败处理）。
    pub async fn metrics_for(&self, analysis_id: Uuid) -> Result<HashMap<String, f64>> {
        let mut metrics_map = HashMap::new();

        // 覆盖率
        if ResultRepo::has_coverage(&self.pool, analysis_id).await? {
            let (found, hit) = ResultRepo::coverage_totals(&self.pool, analysis_id).await?;
            let percentage = if found == 0 {
                0.0
            } else {
                100.0 * hit as f64 / found as f64
            };
            metrics_map.insert("coverage".to_string(), percentage);
        }

        // 问题计数
        let severity_counts = ResultRepo::issue_severity_counts(&self.pool, analysis_id).await?;
        let mut total_issues = 0i64;
        for severity in ["INFO", "MINOR", "MAJOR", "CRITICAL", "BLOCKER"] {
            let count = severity_counts
                .iter()
                .find(|(s, _)| s == severity)
                .map(|(_, c)| *c)
                .unwrap_or(0);
            total_issues += count;
            metrics_map.insert(format!("{}_issues", severity.to_lowercase()), count as f64);
        }
        metrics_map.insert("issues".to_string(), total_issues as f64);

        let kind_counts = ResultRepo::issue_kind_counts(&self.pool, analysis_id).await?;
        for (kind, metric_key) in [
            ("BUG", "bugs"),
            ("VULNERABILITY", "vulnerabilities"),
            ("CODE_SMELL", "code_smells"),
        ] {
            let count = kind_counts
                .iter()
                .find(|(k, _)| k == kind)
                .map(|(_, c)| *c)
                .unwrap_or(0);
            metrics_map.insert(metric_key.to_string(), count as f64);
        }

        // 重复度：聚合值总是由块数据推导
        let rows = ResultRepo::duplication_rows(&self.pool, analysis_id).await?;
        let blocks: Vec<_> = rows.iter().map(|r| r.to_block()).collect();
        let summary = summarize(&blocks);
        metrics_map.insert("duplicated_lines".to_string(), summary.duplicated_lines as f64);
        metrics_map.insert("duplicated_blocks".to_string(), summary.total_clones as f64);
        metrics_map.insert("duplicated_files".to_string(), summary.total_sources as f64);

        Ok(metrics_map)
    }

    /// 读取项目的质量门条件集合
    pub async fn conditions_for_project(&self, project_key: &str) -> Result<Vec<GateCondition>> {
        let gate = GateRepo::find_by_project(&self.pool, project_key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("quality gate for project {}", project_key)))?;

        let rows = GateRepo::conditions_for(&self.pool, gate.id).await?;
        let conditions = rows.iter().filter_map(|r| r.to_condition()).collect();
        Ok(conditions)
    }

    /// 评估一次分析的质量门
    ///
    /// 只有 SUCCESS 的分析有可评估的指标；其余状态返回 409。
    pub async fn evaluate_for(&self, analysis: &Analysis) -> Result<QualityGateResult> {
        if analysis.status != AnalysisStatus::Success {
            return Err(AppError::Conflict(format!(
                "analysis {} is {} and has no gate result",
                analysis.id, analysis.status
            )));
        }

        let conditions = self.conditions_for_project(&analysis.project_key).await?;
        let metrics_map = self.metrics_for(analysis.id).await?;

        let result = evaluate(&conditions, &metrics_map);

        tracing::info!(
            analysis_id = %analysis.id,
            project_key = %analysis.project_key,
            overall = result.overall.as_str(),
            conditions = result.conditions.len(),
            "Quality gate evaluated",
        );
        metrics::counter!("gate.evaluations").increment(1);

        Ok(result)
    }
}
