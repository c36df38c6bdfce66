use super::state::AppState;
use super::{handlers, live};
use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // 健康检查
        .route("/health", get(handlers::health_check))
        // 采样上报：POST 单次，GET 升级为 WebSocket
        .route(
            "/metrics",
            post(handlers::post_metrics).get(live::metrics_socket),
        )
        // 实时推送
        .route("/live", get(live::live_socket))
        .route("/live/sse", get(live::live_sse))
        // 设置面板
        .route(
            "/settings",
            get(handlers::get_settings).put(handlers::put_settings),
        )
        // 检测器
        .route("/api/v1/targets", get(handlers::list_targets))
        .route(
            "/api/v1/targets/:target/window",
            get(handlers::get_target_window),
        )
        .route(
            "/api/v1/targets/:target/config",
            put(handlers::update_target_config),
        )
        // 告警队列
        .route("/api/v1/alerts/failed", get(handlers::failed_alerts))
        .route("/api/v1/alerts/stats", get(handlers::queue_stats))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
