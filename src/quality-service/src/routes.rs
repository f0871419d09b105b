//! 路由注册
//! 创建所有 API 路由并应用中间件

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

use crate::handlers;
use crate::middleware::{
    request_tracking_middleware, runner_auth_middleware, scanner_auth_middleware, AppState,
};

/// 创建应用路由
pub fn create_router(state: Arc<AppState>) -> Router {
    // 公开端点（健康检查）
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check));

    // Scanner 端点（API Token 鉴权）
    let scanner_routes = Router::new()
        .route("/api/v1/analyses", post(handlers::analysis::submit_analysis))
        .route("/api/v1/analyses/{id}/status", get(handlers::analysis::get_status))
        .route("/api/v1/analyses/{id}/gate", get(handlers::analysis::get_gate))
        .route("/api/v1/analyses/{id}/issues", get(handlers::analysis::list_issues))
        .route(
            "/api/v1/analyses/{id}/invocations",
            get(handlers::analysis::list_invocations),
        )
        .route("/api/v1/analyses/{id}/coverage", get(handlers::analysis::list_coverage))
        .route("/api/v1/projects", post(handlers::project::create_project))
        .route("/api/v1/projects/{key}", get(handlers::project::get_project))
        .route(
            "/api/v1/projects/{key}/gate",
            get(handlers::project::get_project_gate).post(handlers::project::create_project_gate),
        )
        .layer(middleware::from_fn_with_state(state.clone(), scanner_auth_middleware));

    // Runner 端点（Runner API Key 鉴权）
    let runner_routes = Router::new()
        .route("/api/v1/runners/register", post(handlers::runner::register_runner))
        .route("/api/v1/runners/heartbeat", post(handlers::runner::runner_heartbeat))
        .route(
            "/api/v1/internal/analyses/{id}/claim",
            post(handlers::runner::claim_analysis),
        )
        .route(
            "/api/v1/internal/analyses/{id}/source",
            get(handlers::runner::download_source),
        )
        .layer(middleware::from_fn_with_state(state.clone(), runner_auth_middleware));

    let max_upload = state.config.server.max_upload_mb * 1024 * 1024;

    Router::new()
        .merge(public_routes)
        .merge(scanner_routes)
        .merge(runner_routes)
        .layer(middleware::from_fn(request_tracking_middleware))
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
