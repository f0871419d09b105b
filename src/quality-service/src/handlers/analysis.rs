//! 分析作业 API 处理器
//! 提交（multipart）、状态查询、质量门查询

use std::str::FromStr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use common::coverage::{self, CanonicalCoverage, Format};
use common::messages::PullRequestInfo;

use crate::error::{AppError, Result};
use crate::middleware::AppState;
use crate::models::analysis::{NewAnalysis, StatusResponse, SubmitResponse};
use crate::models::project::validate_project_key;
use crate::repository::{AnalysisRepo, ProjectRepo, ResultRepo};

/// Commit SHA：7-40 位十六进制
static COMMIT_SHA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[0-9a-fA-F]{7,40}$").expect("valid commit sha regex"));

/// multipart 元数据字段的累积状态
///
/// 接收端按流顺序消费字段，所有元数据字段必须出现在
/// 文件字段之前。
#[derive(Default)]
struct SubmissionFields {
    project_key: Option<String>,
    branch: Option<String>,
    provider: Option<String>,
    repo: Option<String>,
    pr_number: Option<String>,
    source_branch: Option<String>,
    target_branch: Option<String>,
    commit_sha: Option<String>,
    coverage_format: Option<String>,
}

impl SubmissionFields {
    /// 按字段名写入；未知字段返回 false
    fn set(&mut self, name: &str, value: String) -> bool {
        let slot = match name {
            "projectKey" => &mut self.project_key,
            "branch" | "branchName" => &mut self.branch,
            "provider" => &mut self.provider,
            "repo" => &mut self.repo,
            "prNumber" => &mut self.pr_number,
            "sourceBranch" => &mut self.source_branch,
            "targetBranch" => &mut self.target_branch,
            "commitSha" => &mut self.commit_sha,
            "coverageFormat" => &mut self.coverage_format,
            _ => return false,
        };
        *slot = Some(value);
        true
    }

    /// 组装 PR 五元组；全缺时返回 Ok(None)，部分缺失报错
    fn pull_request(&self) -> Result<Option<PullRequestInfo>> {
        let parts = [
            &self.provider,
            &self.repo,
            &self.pr_number,
            &self.source_branch,
            &self.target_branch,
        ];

        if parts.iter().all(|p| p.is_none()) {
            return Ok(None);
        }
        if parts.iter().any(|p| p.is_none()) {
            return Err(AppError::validation(
                "pull request descriptor requires provider, repo, prNumber, sourceBranch and targetBranch",
            ));
        }

        let pr_number: u64 = self
            .pr_number
            .as_deref()
            .unwrap()
            .parse()
            .map_err(|_| AppError::validation("prNumber must be a positive integer"))?;

        Ok(Some(PullRequestInfo {
            provider: self.provider.clone().unwrap(),
            repo: self.repo.clone().unwrap(),
            pr_number,
            source_branch: self.source_branch.clone().unwrap(),
            target_branch: self.target_branch.clone().unwrap(),
        }))
    }
}

/// POST /api/v1/analyses
///
/// multipart 提交：元数据字段在前，随后是 sourceZip 与可选的
/// coverageFile 文件字段。成功返回 201 与轮询/质量门地址。
pub async fn submit_analysis(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    let mut fields = SubmissionFields::default();
    let mut source_zip: Option<Vec<u8>> = None;
    let mut coverage_file: Option<Vec<u8>> = None;
    let mut file_seen = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(&format!("multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "sourceZip" => {
                file_seen = true;
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::bad_request(&format!("sourceZip read error: {}", e)))?;
                source_zip = Some(bytes.to_vec());
            }
            "coverageFile" => {
                file_seen = true;
                let bytes = field.bytes().await.map_err(|e| {
                    AppError::bad_request(&format!("coverageFile read error: {}", e))
                })?;
                coverage_file = Some(bytes.to_vec());
            }
            other => {
                // 元数据字段必须先于文件字段到达
                if file_seen {
                    return Err(AppError::bad_request(
                        "metadata fields must precede file parts",
                    ));
                }
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::bad_request(&format!("field read error: {}", e)))?;
                if !fields.set(other, value) {
                    tracing::debug!(field = other, "Ignoring unknown submission field");
                }
            }
        }
    }

    // 必填字段校验
    let project_key = fields
        .project_key
        .clone()
        .ok_or_else(|| AppError::validation("projectKey is required"))?;
    validate_project_key(&project_key).map_err(AppError::Validation)?;

    let commit_sha = fields
        .commit_sha
        .clone()
        .ok_or_else(|| AppError::validation("commitSha is required"))?;
    if !COMMIT_SHA_RE.is_match(&commit_sha) {
        return Err(AppError::validation("commitSha must be a 7-40 character hex string"));
    }

    let source_zip =
        source_zip.ok_or_else(|| AppError::validation("sourceZip file part is required"))?;
    if source_zip.is_empty() {
        return Err(AppError::validation("sourceZip must not be empty"));
    }

    // 项目必须已存在（ensure 流程先于提交）
    if !ProjectRepo::exists(&state.db, &project_key).await? {
        return Err(AppError::NotFound(format!("project {}", project_key)));
    }

    let new_analysis = NewAnalysis {
        project_key,
        branch: fields.branch.clone(),
        pull_request: fields.pull_request()?,
        commit_sha,
        analyzers: state.config.analyzers.clone(),
        max_attempts: state.scheduler.max_attempts(),
        uploaded_coverage: normalize_uploaded_coverage(
            coverage_file.as_deref(),
            fields.coverage_format.as_deref(),
        ),
    };
    new_analysis
        .validate_target()
        .map_err(AppError::Validation)?;

    // 创建作业，落盘归档，写入随提交上传的覆盖率，然后派发
    let analysis = state.scheduler.create(&new_analysis).await?;
    state
        .storage_service
        .store_archive(analysis.id, &source_zip)
        .await?;

    if let Some((format, coverage)) = &new_analysis.uploaded_coverage {
        let mut tx = state.db.begin().await?;
        ResultRepo::insert_coverage_tx(&mut tx, analysis.id, *format, coverage).await?;
        tx.commit().await?;
    }

    state.scheduler.dispatch(&analysis, None).await?;

    tracing::info!(
        analysis_id = %analysis.id,
        project_key = %analysis.project_key,
        commit = %analysis.commit_sha,
        "Analysis submitted",
    );

    let response = SubmitResponse {
        analysis_id: analysis.id,
        status_url: format!("/api/v1/analyses/{}/status", analysis.id),
        gate_url: format!("/api/v1/analyses/{}/gate", analysis.id),
    };

    Ok((StatusCode::CREATED, Json(response)))
}

/// 归一化随提交上传的覆盖率文件
///
/// 解析失败只丢弃该文件的贡献，不阻止提交。
fn normalize_uploaded_coverage(
    raw: Option<&[u8]>,
    format_hint: Option<&str>,
) -> Option<(Format, CanonicalCoverage)> {
    let raw = raw?;
    let text = std::str::from_utf8(raw)
        .map_err(|e| {
            tracing::warn!("Uploaded coverage is not valid UTF-8: {}", e);
            e
        })
        .ok()?;

    let format = match format_hint {
        Some(hint) => Format::from_str(hint)
            .map_err(|e| tracing::warn!("Unknown coverageFormat hint: {}", e))
            .ok()?,
        None => coverage::detect_format(text)
            .map_err(|e| tracing::warn!("Could not detect coverage format: {}", e))
            .ok()?,
    };

    match coverage::parse(text, format) {
        Ok(parsed) => Some((format, parsed)),
        Err(e) => {
            // 解析失败：记录并丢弃，不影响作业
            tracing::warn!(format = format.as_str(), "Uploaded coverage dropped: {}", e);
            None
        }
    }
}

/// GET /api/v1/analyses/{id}/status
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(analysis_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let analysis = AnalysisRepo::find_by_id(&state.db, analysis_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("analysis {}", analysis_id)))?;

    Ok(Json(StatusResponse {
        analysis_id: analysis.id,
        status: analysis.status,
        attempt: analysis.attempt,
        error: analysis.error_message,
    }))
}

/// GET /api/v1/analyses/{id}/issues
pub async fn list_issues(
    State(state): State<Arc<AppState>>,
    Path(analysis_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    ensure_analysis_exists(&state, analysis_id).await?;
    let issues = ResultRepo::issues_for(&state.db, analysis_id).await?;
    Ok(Json(issues))
}

/// GET /api/v1/analyses/{id}/invocations
///
/// 每次尝试的每个分析器各一条记录。
pub async fn list_invocations(
    State(state): State<Arc<AppState>>,
    Path(analysis_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    ensure_analysis_exists(&state, analysis_id).await?;
    let invocations = ResultRepo::invocations_for(&state.db, analysis_id).await?;
    Ok(Json(invocations))
}

/// GET /api/v1/analyses/{id}/coverage
pub async fn list_coverage(
    State(state): State<Arc<AppState>>,
    Path(analysis_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    ensure_analysis_exists(&state, analysis_id).await?;
    let files = ResultRepo::coverage_files_for(&state.db, analysis_id).await?;
    Ok(Json(files))
}

async fn ensure_analysis_exists(state: &Arc<AppState>, analysis_id: Uuid) -> Result<()> {
    AnalysisRepo::find_by_id(&state.db, analysis_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("analysis {}", analysis_id)))?;
    Ok(())
}

/// GET /api/v1/analyses/{id}/gate
///
/// 按需评估：最新条件集合 x 该分析的持久化指标。
pub async fn get_gate(
    State(state): State<Arc<AppState>>,
    Path(analysis_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let analysis = AnalysisRepo::find_by_id(&state.db, analysis_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("analysis {}", analysis_id)))?;

    let result = state.gate_service.evaluate_for(&analysis).await?;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_set_known_names() {
        let mut fields = SubmissionFields::default();
        assert!(fields.set("projectKey", "p".to_string()));
        assert!(fields.set("branchName", "main".to_string()));
        assert!(fields.set("commitSha", "abc".to_string()));
        assert!(!fields.set("unknownField", "x".to_string()));

        assert_eq!(fields.project_key.as_deref(), Some("p"));
        assert_eq!(fields.branch.as_deref(), Some("main"));
    }

    #[test]
    fn test_pull_request_all_or_nothing() {
        let mut fields = SubmissionFields::default();
        assert!(fields.pull_request().unwrap().is_none());

        fields.set("provider", "github".to_string());
        assert!(fields.pull_request().is_err());

        fields.set("repo", "acme/x".to_string());
        fields.set("prNumber", "12".to_string());
        fields.set("sourceBranch", "feature".to_string());
        fields.set("targetBranch", "main".to_string());

        let pr = fields.pull_request().unwrap().unwrap();
        assert_eq!(pr.pr_number, 12);
        assert_eq!(pr.provider, "github");
    }

    #[test]
    fn test_pull_request_bad_number() {
        let mut fields = SubmissionFields::default();
        fields.set("provider", "github".to_string());
        fields.set("repo", "acme/x".to_string());
        fields.set("prNumber", "abc".to_string());
        fields.set("sourceBranch", "feature".to_string());
        fields.set("targetBranch", "main".to_string());

        assert!(fields.pull_request().is_err());
    }

    #[test]
    fn test_commit_sha_pattern() {
        assert!(COMMIT_SHA_RE.is_match("deadbeef"));
        assert!(COMMIT_SHA_RE.is_match("a3f9c2e81b4d5a6f7890abcdef1234567890abcd"));
        assert!(!COMMIT_SHA_RE.is_match("short"));
        assert!(!COMMIT_SHA_RE.is_match("not-a-sha!"));
        assert!(!COMMIT_SHA_RE.is_match(""));
    }

    #[test]
    fn test_normalize_coverage_with_hint() {
        let lcov = "SF:a.rs\nDA:1,1\nend_of_record\n";
        let result = normalize_uploaded_coverage(Some(lcov.as_bytes()), Some("lcov"));
        let (format, coverage) = result.unwrap();
        assert_eq!(format, Format::Lcov);
        assert_eq!(coverage.files.len(), 1);
    }

    #[test]
    fn test_normalize_coverage_detects_format() {
        let go = "mode: set\na.go:1.1,2.2 3 1\n";
        let (format, coverage) = normalize_uploaded_coverage(Some(go.as_bytes()), None).unwrap();
        assert_eq!(format, Format::GoCover);
        assert_eq!(coverage.files["a.go"].lines_hit, 3);
    }

    #[test]
    fn test_normalize_coverage_malformed_dropped() {
        // 解析失败返回 None 而不是错误
        assert!(normalize_uploaded_coverage(Some(b"garbage"), None).is_none());
        assert!(normalize_uploaded_coverage(Some(b"SF:a\nDA:bad\n"), Some("lcov")).is_none());
        assert!(normalize_uploaded_coverage(None, Some("lcov")).is_none());
    }
}
