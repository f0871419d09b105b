//! 服务端协议客户端
//!
//! 只通过线上协议与服务端交互：提交用 multipart（元数据字段
//! 先于文件字段序列化，接收端按流顺序消费），状态与质量门用
//! 普通 GET。协议层错误立即中止，不做部分重试。

use anyhow::{bail, Context, Result};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

/// 提交请求的元数据
#[derive(Debug, Clone)]
pub struct SubmissionMeta {
    pub project_key: String,
    pub branch: Option<String>,
    pub pull_request: Option<PullRequestMeta>,
    pub commit_sha: String,
    pub coverage_format: Option<String>,
}

/// PR 五元组
#[derive(Debug, Clone)]
pub struct PullRequestMeta {
    pub provider: String,
    pub repo: String,
    pub pr_number: u64,
    pub source_branch: String,
    pub target_branch: String,
}

/// 提交响应
#[derive(Debug, Clone)]
pub struct SubmitReply {
    pub analysis_id: String,
    pub status_url: Option<String>,
    pub gate_url: Option<String>,
}

/// 质量门响应
#[derive(Debug, Clone)]
pub struct GateReply {
    /// 整体裁决字符串（PASS/FAIL；其它值视为未知）
    pub overall: String,
    /// 逐条件明细（原样保留）
    pub conditions: Value,
}

/// 服务端客户端
pub struct ScannerClient {
    http: reqwest::Client,
    server_url: String,
    token: String,
}

impl ScannerClient {
    /// 创建客户端
    pub fn new(server_url: &str, token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            server_url: server_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn auth(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server_url, path)
    }

    /// 幂等确保项目存在：GET，404 则 POST，容忍并发创建者
    pub async fn ensure_project(&self, key: &str, name: &str) -> Result<()> {
        let response = self
            .http
            .get(self.url(&format!("/api/v1/projects/{}", key)))
            .header("Authorization", self.auth())
            .send()
            .await
            .context("Failed to check project")?;

        match response.status() {
            s if s.is_success() => {
                debug!(project = key, "Project already exists");
                return Ok(());
            }
            StatusCode::NOT_FOUND => {}
            s => bail!("Project check failed with status {}", s),
        }

        let response = self
            .http
            .post(self.url("/api/v1/projects"))
            .header("Authorization", self.auth())
            .json(&serde_json::json!({ "key": key, "name": name }))
            .send()
            .await
            .context("Failed to create project")?;

        match response.status() {
            s if s.is_success() => Ok(()),
            // 并发创建者赢了也算成功
            StatusCode::CONFLICT => Ok(()),
            s => {
                let body = response.text().await.unwrap_or_default();
                bail!("Project creation failed with status {}: {}", s, body)
            }
        }
    }

    /// 幂等确保质量门存在
    pub async fn ensure_gate(&self, project_key: &str, gate_name: &str) -> Result<()> {
        let response = self
            .http
            .get(self.url(&format!("/api/v1/projects/{}/gate", project_key)))
            .header("Authorization", self.auth())
            .send()
            .await
            .context("Failed to check quality gate")?;

        match response.status() {
            s if s.is_success() => {
                debug!(project = project_key, "Quality gate already exists");
                return Ok(());
            }
            StatusCode::NOT_FOUND => {}
            s => bail!("Quality gate check failed with status {}", s),
        }

        let response = self
            .http
            .post(self.url(&format!("/api/v1/projects/{}/gate", project_key)))
            .header("Authorization", self.auth())
            .json(&serde_json::json!({ "name": gate_name }))
            .send()
            .await
            .context("Failed to create quality gate")?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::CONFLICT => Ok(()),
            s => {
                let body = response.text().await.unwrap_or_default();
                bail!("Quality gate creation failed with status {}: {}", s, body)
            }
        }
    }

    /// 提交分析
    ///
    /// 所有元数据字段先于文件字段加入表单：接收端按流顺序
    /// 消费字段。
    pub async fn submit(
        &self,
        meta: &SubmissionMeta,
        source_zip: Vec<u8>,
        coverage_file: Option<Vec<u8>>,
    ) -> Result<SubmitReply> {
        let mut form = Form::new().text("projectKey", meta.project_key.clone());

        if let Some(branch) = &meta.branch {
            form = form.text("branch", branch.clone());
        }
        if let Some(pr) = &meta.pull_request {
            form = form
                .text("provider", pr.provider.clone())
                .text("repo", pr.repo.clone())
                .text("prNumber", pr.pr_number.to_string())
                .text("sourceBranch", pr.source_branch.clone())
                .text("targetBranch", pr.target_branch.clone());
        }

        form = form.text("commitSha", meta.commit_sha.clone());

        if let Some(format) = &meta.coverage_format {
            form = form.text("coverageFormat", format.clone());
        }

        // 文件字段最后加入
        form = form.part(
            "sourceZip",
            Part::bytes(source_zip)
                .file_name("source.zip")
                .mime_str("application/zip")
                .context("Invalid archive mime type")?,
        );

        if let Some(coverage) = coverage_file {
            form = form.part(
                "coverageFile",
                Part::bytes(coverage)
                    .file_name("coverage")
                    .mime_str("application/octet-stream")
                    .context("Invalid coverage mime type")?,
            );
        }

        let response = self
            .http
            .post(self.url("/api/v1/analyses"))
            .header("Authorization", self.auth())
            .multipart(form)
            .send()
            .await
            .context("Failed to upload analysis")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Analysis upload failed with status {}: {}", status, body);
        }

        let body: Value = response
            .json()
            .await
            .context("Failed to parse submit response")?;

        let reply = parse_submit_reply(&body)
            .ok_or_else(|| anyhow::anyhow!("Submit response carries no analysis id: {}", body))?;

        debug!(analysis_id = %reply.analysis_id, "Analysis submitted");
        Ok(reply)
    }

    /// 查询分析状态，返回状态字符串（PENDING/RUNNING/SUCCESS/FAILED）
    pub async fn fetch_status(&self, analysis_id: &str, status_url: Option<&str>) -> Result<String> {
        let url = match status_url {
            Some(path) => self.url(path),
            None => self.url(&format!("/api/v1/analyses/{}/status", analysis_id)),
        };

        let response = self
            .http
            .get(&url)
            .header("Authorization", self.auth())
            .send()
            .await
            .context("Failed to fetch analysis status")?;

        if response.status() == StatusCode::NOT_FOUND {
            bail!("Analysis {} not found", analysis_id);
        }
        if !response.status().is_success() {
            bail!("Status fetch failed with status {}", response.status());
        }

        let body: Value = response
            .json()
            .await
            .context("Failed to parse status response")?;

        body.get("status")
            .and_then(|s| s.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Status response carries no status field: {}", body))
    }

    /// 获取质量门结果
    pub async fn fetch_gate(&self, analysis_id: &str, gate_url: Option<&str>) -> Result<GateReply> {
        let url = match gate_url {
            Some(path) => self.url(path),
            None => self.url(&format!("/api/v1/analyses/{}/gate", analysis_id)),
        };

        let response = self
            .http
            .get(&url)
            .header("Authorization", self.auth())
            .send()
            .await
            .context("Failed to fetch quality gate")?;

        if !response.status().is_success() {
            bail!("Gate fetch failed with status {}", response.status());
        }

        let body: Value = response
            .json()
            .await
            .context("Failed to parse gate response")?;

        let overall = body
            .get("overall")
            .and_then(|s| s.as_str())
            .unwrap_or("UNKNOWN")
            .to_string();

        Ok(GateReply {
            overall,
            conditions: body.get("conditions").cloned().unwrap_or(Value::Null),
        })
    }
}

/// 从提交响应中提取 analysisId（或嵌套的 id）
fn parse_submit_reply(body: &Value) -> Option<SubmitReply> {
    let analysis_id = body
        .get("analysisId")
        .and_then(|v| v.as_str())
        .or_else(|| body.get("id").and_then(|v| v.as_str()))
        .or_else(|| {
            body.get("analysis")
                .and_then(|a| a.get("id"))
                .and_then(|v| v.as_str())
        })?
        .to_string();

    let field = |name: &str| body.get(name).and_then(|v| v.as_str()).map(|s| s.to_string());

    Some(SubmitReply {
        analysis_id,
        status_url: field("statusUrl"),
        gate_url: field("gateUrl"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_submit_reply_flat() {
        let body = serde_json::json!({
            "analysisId": "abc-123",
            "statusUrl": "/api/v1/analyses/abc-123/status",
            "gateUrl": "/api/v1/analyses/abc-123/gate"
        });

        let reply = parse_submit_reply(&body).unwrap();
        assert_eq!(reply.analysis_id, "abc-123");
        assert_eq!(reply.status_url.as_deref(), Some("/api/v1/analyses/abc-123/status"));
    }

    #[test]
    fn test_parse_submit_reply_bare_id() {
        let body = serde_json::json!({ "id": "xyz" });
        let reply = parse_submit_reply(&body).unwrap();
        assert_eq!(reply.analysis_id, "xyz");
        assert!(reply.status_url.is_none());
    }

    #[test]
    fn test_parse_submit_reply_nested() {
        let body = serde_json::json!({ "analysis": { "id": "nested-1" } });
        let reply = parse_submit_reply(&body).unwrap();
        assert_eq!(reply.analysis_id, "nested-1");
    }

    #[test]
    fn test_parse_submit_reply_missing_id() {
        let body = serde_json::json!({ "ok": true });
        assert!(parse_submit_reply(&body).is_none());
    }

    #[test]
    fn test_client_url_joins() {
        let client = ScannerClient::new("http://localhost:3000/", "t").unwrap();
        assert_eq!(client.url("/health"), "http://localhost:3000/health");
    }
}
