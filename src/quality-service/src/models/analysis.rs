//! 分析作业模型
//! 作业行类型、状态机与提交/状态 DTO

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

use common::coverage::{CanonicalCoverage, Format};
use common::messages::{AnalyzerSpec, PullRequestInfo};

/// 作业状态
///
/// 状态机：Pending -> Running -> {Success | Pending(重试) | Failed}。
/// Success/Failed 为终态，此后不再变更。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "analysis_status", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStatus {
    /// 待执行（含重试等待）
    Pending,
    /// 执行中
    Running,
    /// 成功
    Success,
    /// 失败
    Failed,
}

impl AnalysisStatus {
    /// 返回对外协议中的字符串形式
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "PENDING",
            AnalysisStatus::Running => "RUNNING",
            AnalysisStatus::Success => "SUCCESS",
            AnalysisStatus::Failed => "FAILED",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, AnalysisStatus::Success | AnalysisStatus::Failed)
    }
}

impl std::fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_wire_str())
    }
}

/// 分析作业记录
///
/// 只有调度器修改此记录。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Analysis {
    pub id: Uuid,
    pub project_key: String,

    // 分支与 PR 五元组互斥
    pub branch: Option<String>,
    pub pr_provider: Option<String>,
    pub pr_repo: Option<String>,
    pub pr_number: Option<i64>,
    pub pr_source_branch: Option<String>,
    pub pr_target_branch: Option<String>,

    pub commit_sha: String,

    /// 请求的分析器（有序）
    pub analyzers: Json<Vec<AnalyzerSpec>>,

    pub status: AnalysisStatus,

    /// 当前尝试序号（0 = 尚未派发）
    pub attempt: i32,

    /// 最大尝试次数
    pub max_attempts: i32,

    pub error_message: Option<String>,

    /// 最近一次处理此作业的 Runner
    pub runner_name: Option<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Analysis {
    /// 组装 PR 描述（列存储 -> 协议结构）
    pub fn pull_request(&self) -> Option<PullRequestInfo> {
        Some(PullRequestInfo {
            provider: self.pr_provider.clone()?,
            repo: self.pr_repo.clone()?,
            pr_number: self.pr_number? as u64,
            source_branch: self.pr_source_branch.clone()?,
            target_branch: self.pr_target_branch.clone()?,
        })
    }
}

/// 新作业的提交数据（multipart 解析后的产物）
#[derive(Debug, Clone)]
pub struct NewAnalysis {
    pub project_key: String,
    pub branch: Option<String>,
    pub pull_request: Option<PullRequestInfo>,
    pub commit_sha: String,
    pub analyzers: Vec<AnalyzerSpec>,
    pub max_attempts: i32,

    /// 提交时随归档一起上传的覆盖率（已归一化）
    pub uploaded_coverage: Option<(Format, CanonicalCoverage)>,
}

impl NewAnalysis {
    /// 校验分支与 PR 五元组的互斥约束
    pub fn validate_target(&self) -> Result<(), String> {
        match (&self.branch, &self.pull_request) {
            (Some(_), Some(_)) => {
                Err("branch and pull request descriptor are mutually exclusive".to_string())
            }
            (None, None) => Err("either branch or pull request descriptor is required".to_string()),
            _ => Ok(()),
        }
    }
}

/// 提交响应
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub analysis_id: Uuid,
    pub status_url: String,
    pub gate_url: String,
}

/// 状态查询响应
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub analysis_id: Uuid,
    pub status: AnalysisStatus,
    pub attempt: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_analysis(branch: Option<&str>, pr: bool) -> NewAnalysis {
        NewAnalysis {
            project_key: "platform-api".to_string(),
            branch: branch.map(|b| b.to_string()),
            pull_request: pr.then(|| PullRequestInfo {
                provider: "github".to_string(),
                repo: "acme/platform".to_string(),
                pr_number: 7,
                source_branch: "feature/y".to_string(),
                target_branch: "main".to_string(),
            }),
            commit_sha: "abc123".to_string(),
            analyzers: vec![],
            max_attempts: 3,
            uploaded_coverage: None,
        }
    }

    #[test]
    fn test_status_wire_serialization() {
        let statuses = vec![
            (AnalysisStatus::Pending, "PENDING"),
            (AnalysisStatus::Running, "RUNNING"),
            (AnalysisStatus::Success, "SUCCESS"),
            (AnalysisStatus::Failed, "FAILED"),
        ];

        for (status, expected) in statuses {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", expected));
            assert_eq!(status.as_wire_str(), expected);
            assert_eq!(status.to_string(), expected);
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!AnalysisStatus::Pending.is_terminal());
        assert!(!AnalysisStatus::Running.is_terminal());
        assert!(AnalysisStatus::Success.is_terminal());
        assert!(AnalysisStatus::Failed.is_terminal());
    }

    #[test]
    fn test_target_branch_only_valid() {
        assert!(new_analysis(Some("main"), false).validate_target().is_ok());
    }

    #[test]
    fn test_target_pr_only_valid() {
        assert!(new_analysis(None, true).validate_target().is_ok());
    }

    #[test]
    fn test_target_both_rejected() {
        assert!(new_analysis(Some("main"), true).validate_target().is_err());
    }

    #[test]
    fn test_target_neither_rejected() {
        assert!(new_analysis(None, false).validate_target().is_err());
    }

    #[test]
    fn test_status_response_serialization() {
        let response = StatusResponse {
            analysis_id: Uuid::new_v4(),
            status: AnalysisStatus::Running,
            attempt: 2,
            error: None,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"analysisId\""));
        assert!(json.contains("\"status\":\"RUNNING\""));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn test_submit_response_serialization() {
        let id = Uuid::new_v4();
        let response = SubmitResponse {
            analysis_id: id,
            status_url: format!("/api/v1/analyses/{}/status", id),
            gate_url: format!("/api/v1/analyses/{}/gate", id),
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"analysisId\""));
        assert!(json.contains("\"statusUrl\""));
        assert!(json.contains("\"gateUrl\""));
    }
}
