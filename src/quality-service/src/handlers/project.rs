//! 项目与质量门 API 处理器
//! GET-then-POST-on-404 的幂等 ensure 模式

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use validator::Validate;

use crate::error::{AppError, Result};
use crate::middleware::AppState;
use crate::models::gate::{default_conditions, CreateGateRequest, GateResponse};
use crate::models::project::{validate_project_key, CreateProjectRequest};
use crate::repository::{GateRepo, ProjectRepo};

/// GET /api/v1/projects/{key}
pub async fn get_project(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse> {
    let project = ProjectRepo::find_by_key(&state.db, &key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("project {}", key)))?;

    Ok(Json(project))
}

/// POST /api/v1/projects
///
/// 幂等：key 已存在时返回既有项目（容忍并发创建者）。
pub async fn create_project(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse> {
    request
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    validate_project_key(&request.key).map_err(AppError::Validation)?;

    let project = ProjectRepo::create(&state.db, &request.key, &request.name).await?;

    tracing::info!(project_key = %project.key, "Project ensured");

    Ok((StatusCode::CREATED, Json(project)))
}

/// GET /api/v1/projects/{key}/gate
pub async fn get_project_gate(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse> {
    let gate = GateRepo::find_by_project(&state.db, &key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("quality gate for project {}", key)))?;

    let rows = GateRepo::conditions_for(&state.db, gate.id).await?;
    let conditions = rows.iter().filter_map(|r| r.to_condition()).collect();

    Ok(Json(GateResponse {
        name: gate.name,
        conditions,
    }))
}

/// POST /api/v1/projects/{key}/gate
///
/// 创建项目的质量门并播种默认条件集合。
/// 幂等：已存在时返回既有门。
pub async fn create_project_gate(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(request): Json<CreateGateRequest>,
) -> Result<impl IntoResponse> {
    request
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    if !ProjectRepo::exists(&state.db, &key).await? {
        return Err(AppError::NotFound(format!("project {}", key)));
    }

    let gate =
        GateRepo::create_with_conditions(&state.db, &key, &request.name, &default_conditions())
            .await?;

    let rows = GateRepo::conditions_for(&state.db, gate.id).await?;
    let conditions = rows.iter().filter_map(|r| r.to_condition()).collect();

    tracing::info!(project_key = %key, gate = %gate.name, "Quality gate ensured");

    Ok((
        StatusCode::CREATED,
        Json(GateResponse {
            name: gate.name,
            conditions,
        }),
    ))
}
