// WebSocket / SSE 长连接
//
// - GET /metrics (WebSocket)：持续上报，每条文本消息是一个采样，无效消息回复错误帧后忽略
// - GET /live (WebSocket) 与 GET /live/sse：实时推送采样，可用 ?target= 过滤

use super::handlers::TargetQuery;
use super::state::AppState;
use crate::fanout::SubscriberFilter;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::{
        sse::{Event, KeepAlive, Sse},
        Response,
    },
};
use futures::{
    sink::SinkExt,
    stream::{Stream, StreamExt},
};
use serde::Serialize;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 上报通道的错误帧
#[derive(Debug, Serialize)]
struct ErrorFrame {
    status: &'static str,
    error: String,
}

/// 持续上报通道
pub async fn metrics_socket(
    ws: WebSocketUpgrade,
    Query(query): Query<TargetQuery>,
    State(state): State<AppState>,
) -> Response {
    let target = query.target().to_string();
    ws.on_upgrade(move |socket| ingest_socket(socket, state, target))
}

async fn ingest_socket(socket: WebSocket, state: AppState, target: String) {
    info!("Metrics WebSocket connected for target {}", target);
    let (mut sender, mut receiver) = socket.split();

    loop {
        let message = tokio::select! {
            message = receiver.next() => message,
            _ = state.shutdown.cancelled() => break,
        };

        let text = match message {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    if send_error(&mut sender, "binary frames must be UTF-8 JSON".to_string())
                        .await
                        .is_err()
                    {
                        break;
                    }
                    continue;
                }
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!("Metrics WebSocket error for {}: {}", target, e);
                break;
            }
        };

        if let Err(e) = state.pipeline.ingest(&target, &text).await {
            warn!("Ignoring sample from WebSocket ({}): {}", target, e);
            if send_error(&mut sender, e.to_string()).await.is_err() {
                break;
            }
        }
    }

    info!("Metrics WebSocket disconnected for target {}", target);
}

async fn send_error<S>(sender: &mut S, error: String) -> Result<(), ()>
where
    S: futures::Sink<Message> + Unpin,
{
    let frame = ErrorFrame {
        status: "error",
        error,
    };
    let text = serde_json::to_string(&frame).map_err(|_| ())?;
    sender.send(Message::Text(text)).await.map_err(|_| ())
}

/// 实时推送（WebSocket）
pub async fn live_socket(
    ws: WebSocketUpgrade,
    Query(query): Query<TargetQuery>,
    State(state): State<AppState>,
) -> Response {
    let filter = filter_for(&query);
    ws.on_upgrade(move |socket| live_task(socket, state, filter))
}

async fn live_task(socket: WebSocket, state: AppState, filter: SubscriberFilter) {
    let mut subscription = state.broadcaster.subscribe(filter);
    let (mut sender, mut receiver) = socket.split();
    debug!(
        "Live WebSocket subscriber joined ({} total)",
        state.broadcaster.subscriber_count()
    );

    loop {
        tokio::select! {
            payload = subscription.next() => {
                let Some(payload) = payload else { break };
                if sender.send(Message::Text(payload.to_string())).await.is_err() {
                    break;
                }
            }
            message = receiver.next() => match message {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = state.shutdown.cancelled() => break,
        }
    }

    let _ = sender.send(Message::Close(None)).await;
    debug!("Live WebSocket subscriber left");
}

/// 实时推送（SSE）
pub async fn live_sse(
    Query(query): Query<TargetQuery>,
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let shutdown = state.shutdown.clone();
    let stream = state
        .broadcaster
        .stream(filter_for(&query))
        .map(|payload| Ok(Event::default().event("sample").data(payload)))
        .take_until(async move { shutdown.cancelled().await });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn filter_for(query: &TargetQuery) -> SubscriberFilter {
    match &query.target {
        Some(target) => SubscriberFilter::new().with_target(target.clone()),
        None => SubscriberFilter::new(),
    }
}
