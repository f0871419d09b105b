//! 应用状态与中间件
//! AppState 组装、请求追踪、API Token 鉴权

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::rabbitmq::RabbitMqPublisherPool;
use crate::services::{GateService, SchedulerService, StorageService};

/// 全局应用状态
pub struct AppState {
    pub config: AppConfig,
    pub db: sqlx::PgPool,
    /// 作业调度服务
    pub scheduler: Arc<SchedulerService>,
    /// 质量门服务
    pub gate_service: Arc<GateService>,
    /// 归档存储服务
    pub storage_service: Arc<StorageService>,
    /// RabbitMQ 发布器池（就绪探针使用）
    pub rabbitmq_publisher: Arc<RabbitMqPublisherPool>,
}

/// 请求追踪中间件
/// 为每个请求生成 request_id 并记录时延指标
pub async fn request_tracking_middleware(req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %method,
        path = %path,
    );
    let _guard = span.enter();

    let start = std::time::Instant::now();
    let response = next.run(req).await;
    let elapsed = start.elapsed();

    metrics::histogram!("http.request.duration_ms").record(elapsed.as_millis() as f64);
    metrics::counter!("http.requests").increment(1);

    tracing::debug!(
        status = response.status().as_u16(),
        elapsed_ms = elapsed.as_millis() as u64,
        "Request completed",
    );

    response
}

/// 从请求头提取 Bearer token
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Scanner 鉴权中间件（API Token）
pub async fn scanner_auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    match bearer_token(req.headers()) {
        Some(token) if state.config.check_api_token(token) => next.run(req).await,
        _ => {
            metrics::counter!("http.auth.rejected", "surface" => "scanner").increment(1);
            AppError::Unauthorized.into_response()
        }
    }
}

/// Runner 鉴权中间件（Runner API Key）
pub async fn runner_auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    match bearer_token(req.headers()) {
        Some(key) if state.config.check_runner_key(key) => next.run(req).await,
        _ => {
            metrics::counter!("http.auth.rejected", "surface" => "runner").increment(1);
            AppError::Unauthorized.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers), Some("abc123"));
    }

    #[test]
    fn test_bearer_token_missing_header() {
        let headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_bearer_token_wrong_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(bearer_token(&headers), None);
    }
}
