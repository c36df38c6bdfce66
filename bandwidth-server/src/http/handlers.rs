use super::state::AppState;
use crate::detector::{DetectorConfig, DetectorConfigUpdate, DetectorSnapshot, DEFAULT_TARGET};
use crate::queue::{DeadLetter, QueueStats};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use common::{MonitorError, Settings, SettingsUpdate};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

#[derive(Serialize)]
pub struct ApiResponse<T> {
    status: String,
    data: Option<T>,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            status: "success".to_string(),
            data: Some(data),
            error: None,
        }
    }

    fn error(message: String) -> ApiResponse<()> {
        ApiResponse {
            status: "error".to_string(),
            data: None,
            error: Some(message),
        }
    }
}

/// 处理器错误，客户端输入错误返回 400，其余返回 500
pub struct ApiError(MonitorError);

impl From<MonitorError> for ApiError {
    fn from(e: MonitorError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_client_error() {
            warn!("Rejected request: {}", self.0);
            StatusCode::BAD_REQUEST
        } else {
            error!("Request failed: {}", self.0);
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(ApiResponse::<()>::error(self.0.to_string()))).into_response()
    }
}

/// `?target=` 查询参数
#[derive(Debug, Deserialize)]
pub struct TargetQuery {
    pub target: Option<String>,
}

impl TargetQuery {
    pub fn target(&self) -> &str {
        self.target.as_deref().unwrap_or(DEFAULT_TARGET)
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    timestamp: DateTime<Utc>,
}

/// 健康检查
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    status: &'static str,
    detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    alert_id: Option<Uuid>,
}

/// 单次上报采样
///
/// 载荷由流水线自行解析，格式错误统一返回 400。
pub async fn post_metrics(
    State(state): State<AppState>,
    Query(query): Query<TargetQuery>,
    body: String,
) -> Result<Json<MetricsResponse>, ApiError> {
    let outcome = state.pipeline.ingest(query.target(), &body).await?;
    Ok(Json(MetricsResponse {
        status: "success",
        detected: outcome.detected,
        alert_id: outcome.alert_id,
    }))
}

/// 获取设置
pub async fn get_settings(State(state): State<AppState>) -> Json<Settings> {
    Json(state.settings.get().await)
}

#[derive(Serialize)]
pub struct SettingsUpdated {
    status: &'static str,
    message: &'static str,
    settings: Settings,
}

/// 部分更新设置，任何字段无效则整体拒绝
pub async fn put_settings(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<SettingsUpdated>, ApiError> {
    let update: SettingsUpdate = serde_json::from_str(&body)
        .map_err(|e| MonitorError::InvalidConfig(format!("malformed settings: {}", e)))?;
    let settings = state.settings.update(&update).await?;
    Ok(Json(SettingsUpdated {
        status: "success",
        message: "Settings updated",
        settings,
    }))
}

/// 获取已知目标列表
pub async fn list_targets(State(state): State<AppState>) -> Json<ApiResponse<Vec<String>>> {
    Json(ApiResponse::success(state.registry.targets()))
}

/// 获取目标的检测窗口快照
pub async fn get_target_window(
    Path(target): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<DetectorSnapshot>>, StatusCode> {
    match state.registry.snapshot(&target).await {
        Some(snapshot) => Ok(Json(ApiResponse::success(snapshot))),
        None => Err(StatusCode::NOT_FOUND),
    }
}

/// 更新单个目标的检测配置
pub async fn update_target_config(
    Path(target): Path<String>,
    State(state): State<AppState>,
    body: String,
) -> Result<Json<ApiResponse<DetectorConfig>>, ApiError> {
    let update: DetectorConfigUpdate = serde_json::from_str(&body)
        .map_err(|e| MonitorError::InvalidConfig(format!("malformed detector config: {}", e)))?;
    let config = state.registry.update_target(&target, &update).await?;
    Ok(Json(ApiResponse::success(config)))
}

/// 获取永久失败的告警
pub async fn failed_alerts(State(state): State<AppState>) -> Json<ApiResponse<Vec<DeadLetter>>> {
    Json(ApiResponse::success(state.queue.dead_letters()))
}

/// 告警队列状态
pub async fn queue_stats(State(state): State<AppState>) -> Json<ApiResponse<QueueStats>> {
    Json(ApiResponse::success(state.queue.stats()))
}
