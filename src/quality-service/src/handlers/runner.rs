//! Runner API 处理器
//! 注册、心跳、作业认领与源码归档下载

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::messages::{RunnerHeartbeatMessage, RunnerRegistrationMessage};

use crate::error::{AppError, Result};
use crate::middleware::AppState;
use crate::repository::RunnerRepo;

/// 注册响应
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub runner_id: String,
    pub heartbeat_interval_secs: u64,
}

/// 认领请求
#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub runner_name: String,
}

/// 认领响应
#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub claimed: bool,
}

/// POST /api/v1/runners/register
pub async fn register_runner(
    State(state): State<Arc<AppState>>,
    Json(msg): Json<RunnerRegistrationMessage>,
) -> Result<impl IntoResponse> {
    let runner_id = RunnerRepo::upsert_registration(&state.db, &msg).await?;

    tracing::info!(
        runner = %msg.name,
        capabilities = ?msg.capabilities,
        max_concurrent_jobs = msg.max_concurrent_jobs,
        "Runner registered",
    );

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            runner_id: runner_id.to_string(),
            heartbeat_interval_secs: 30,
        }),
    ))
}

/// POST /api/v1/runners/heartbeat
pub async fn runner_heartbeat(
    State(state): State<Arc<AppState>>,
    Json(msg): Json<RunnerHeartbeatMessage>,
) -> Result<impl IntoResponse> {
    let known = RunnerRepo::record_heartbeat(&state.db, &msg).await?;
    if !known {
        return Err(AppError::NotFound(format!("runner {}", msg.name)));
    }

    tracing::debug!(
        runner = %msg.name,
        current_jobs = msg.current_jobs,
        cpu = msg.system.cpu_usage_percent,
        "Runner heartbeat",
    );

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/internal/analyses/{id}/claim
///
/// PENDING -> RUNNING 的原子认领。重复投递会在这里被拒绝，
/// Runner 应确认消息并跳过。
pub async fn claim_analysis(
    State(state): State<Arc<AppState>>,
    Path(analysis_id): Path<Uuid>,
    Json(request): Json<ClaimRequest>,
) -> Result<impl IntoResponse> {
    let claimed = state.scheduler.claim(analysis_id, &request.runner_name).await?;

    if claimed {
        Ok((StatusCode::OK, Json(ClaimResponse { claimed: true })).into_response())
    } else {
        Err(AppError::Conflict(format!(
            "analysis {} is not claimable",
            analysis_id
        )))
    }
}

/// GET /api/v1/internal/analyses/{id}/source
///
/// 下载源码归档（zip）。
pub async fn download_source(
    State(state): State<Arc<AppState>>,
    Path(analysis_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let bytes = state.storage_service.read_archive(analysis_id).await?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/zip")],
        bytes,
    ))
}
