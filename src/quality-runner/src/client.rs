//! 控制面 API 客户端

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::Client;
use reqwest::StatusCode;
use sysinfo::System;
use tracing::{debug, info, warn};
use uuid::Uuid;

use common::messages::{
    RunnerHeartbeatMessage, RunnerRegistrationMessage, RunnerStatus, SystemInfo,
};

use crate::config::RunnerConfig;

/// 控制面 API 客户端
pub struct ControlPlaneClient {
    client: Client,
    config: RunnerConfig,
}

impl ControlPlaneClient {
    /// 创建新的客户端
    pub fn new(config: RunnerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, config })
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.config.control_plane.api_key)
    }

    /// 注册 Runner，返回心跳间隔（控制面可覆盖）
    pub async fn register(&self) -> Result<u64> {
        info!("Registering runner with control plane");

        let msg = RunnerRegistrationMessage {
            name: self.config.runner.name.clone(),
            capabilities: self.config.runner.capabilities.clone(),
            docker_supported: self.config.runner.docker_supported,
            max_concurrent_jobs: self.config.runner.max_concurrent_jobs,
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            hostname: gethostname::gethostname().to_string_lossy().to_string(),
            timestamp: Utc::now(),
        };

        let response = self
            .client
            .post(format!(
                "{}/api/v1/runners/register",
                self.config.control_plane.api_url
            ))
            .header("Authorization", self.auth_header())
            .json(&msg)
            .send()
            .await
            .context("Failed to send registration request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Registration failed with status {}: {}", status, body);
        }

        #[derive(serde::Deserialize)]
        struct RegisterResponse {
            runner_id: String,
            heartbeat_interval_secs: Option<u64>,
        }

        let resp: RegisterResponse = response
            .json()
            .await
            .context("Failed to parse registration response")?;

        info!("Runner registered successfully with ID: {}", resp.runner_id);

        Ok(resp
            .heartbeat_interval_secs
            .unwrap_or(self.config.control_plane.heartbeat_interval_secs))
    }

    /// 发送心跳
    pub async fn send_heartbeat(&self, current_jobs: usize) -> Result<()> {
        let mut sys = System::new_all();
        sys.refresh_all();

        let cpu_usage = sys.global_cpu_usage();
        let total_memory = sys.total_memory();
        let used_memory = sys.used_memory();
        let available_memory = sys.available_memory();

        let memory_usage = if total_memory > 0 {
            (used_memory as f32 / total_memory as f32) * 100.0
        } else {
            0.0
        };

        let msg = RunnerHeartbeatMessage {
            name: self.config.runner.name.clone(),
            status: if current_jobs > 0 {
                RunnerStatus::Active
            } else {
                RunnerStatus::Online
            },
            current_jobs,
            last_error: None,
            system: SystemInfo {
                cpu_usage_percent: cpu_usage,
                memory_usage_percent: memory_usage,
                available_memory_mb: available_memory / 1024 / 1024,
            },
            timestamp: Utc::now(),
        };

        let response = self
            .client
            .post(format!(
                "{}/api/v1/runners/heartbeat",
                self.config.control_plane.api_url
            ))
            .header("Authorization", self.auth_header())
            .json(&msg)
            .send()
            .await
            .context("Failed to send heartbeat")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("Heartbeat failed with status {}: {}", status, body);
            anyhow::bail!("Heartbeat failed with status {}: {}", status, body);
        }

        debug!("Heartbeat sent successfully");
        Ok(())
    }

    /// 认领分析作业（PENDING -> RUNNING 的 CAS）
    ///
    /// 返回 `false` 表示作业不可认领（重复投递或已终态），
    /// 调用方应确认消息并跳过。
    pub async fn claim_analysis(&self, analysis_id: Uuid) -> Result<bool> {
        let response = self
            .client
            .post(format!(
                "{}/api/v1/internal/analyses/{}/claim",
                self.config.control_plane.api_url, analysis_id
            ))
            .header("Authorization", self.auth_header())
            .json(&serde_json::json!({ "runner_name": self.config.runner.name }))
            .send()
            .await
            .context("Failed to send claim request")?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::CONFLICT => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("Claim failed with status {}: {}", status, body);
            }
        }
    }

    /// 下载源码归档
    pub async fn download_source(&self, source_path: &str) -> Result<Vec<u8>> {
        let url = format!("{}{}", self.config.control_plane.api_url, source_path);

        let response = self
            .client
            .get(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .context("Failed to download source archive")?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("Source download failed with status {}", status);
        }

        let bytes = response
            .bytes()
            .await
            .context("Failed to read source archive body")?;

        debug!(size = bytes.len(), "Source archive downloaded");
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ControlPlaneConfig, ExecutionConfig, MessageQueueConfig, RunnerInfo, SandboxConfig,
    };

    fn create_test_config() -> RunnerConfig {
        RunnerConfig {
            runner: RunnerInfo {
                name: "test-runner".to_string(),
                capabilities: vec![],
                docker_supported: true,
                max_concurrent_jobs: 1,
            },
            control_plane: ControlPlaneConfig {
                api_url: "http://localhost:3000".to_string(),
                api_key: "test-key".to_string(),
                heartbeat_interval_secs: 30,
            },
            message_queue: MessageQueueConfig {
                amqp_url: "amqp://localhost:5672".to_string(),
                exchange: "quality.analysis".to_string(),
                prefetch: 1,
            },
            execution: ExecutionConfig {
                workspace_base_dir: "/tmp/test-workspace".to_string(),
                workspace_retain_count: 3,
                max_concurrent_sandboxes: 2,
                sandbox: SandboxConfig::default(),
            },
        }
    }

    #[test]
    fn test_client_creation() {
        let client = ControlPlaneClient::new(create_test_config()).unwrap();
        assert_eq!(client.config.runner.name, "test-runner");
    }

    #[test]
    fn test_auth_header_format() {
        let client = ControlPlaneClient::new(create_test_config()).unwrap();
        assert_eq!(client.auth_header(), "Bearer test-key");
    }

    #[test]
    fn test_registration_message_structure() {
        let msg = RunnerRegistrationMessage {
            name: "test-runner".to_string(),
            capabilities: vec!["docker".to_string()],
            docker_supported: true,
            max_concurrent_jobs: 4,
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            version: "0.1.0".to_string(),
            hostname: "test-host".to_string(),
            timestamp: chrono::Utc::now(),
        };

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"name\":\"test-runner\""));
        assert!(json.contains("\"capabilities\":[\"docker\"]"));
    }

}
