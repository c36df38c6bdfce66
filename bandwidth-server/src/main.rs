mod config;
mod detector;
mod fanout;
mod http;
mod ingest;
mod notify;
mod queue;
mod settings;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("🚀 Bandwidth monitor starting...");

    // 加载配置
    let config = config::Config::load()?;
    info!("✓ Configuration loaded");

    // 检测器
    let registry =
        detector::DetectorRegistry::new(config.detector, Arc::new(detector::SystemClock))?;
    let settings = settings::SettingsStore::new(config.settings, registry.clone());
    let defaults = registry.default_config();
    info!(
        "✓ Drop detection: below {} Mbps for {} samples within {}s, cooldown {}ms",
        defaults.threshold, defaults.duration_threshold, defaults.window_seconds, defaults.cooldown_ms
    );

    // 告警队列
    let journal: Arc<dyn queue::JobJournal> = match &config.journal_path {
        Some(path) => Arc::new(queue::FileJournal::open(path).await?),
        None => {
            warn!("QUEUE_JOURNAL_PATH not set, pending alerts will not survive a restart");
            Arc::new(queue::MemoryJournal::new())
        }
    };
    let alert_queue = queue::AlertQueue::open(journal, config.queue.clone()).await?;
    info!("✓ Alert queue opened");

    // 通知通道
    let client = reqwest::Client::builder()
        .timeout(config.channel_timeout)
        .build()?;
    let channels: Vec<Arc<dyn notify::NotificationChannel>> = vec![
        Arc::new(notify::EmailChannel::new(client.clone(), config.email.clone())),
        Arc::new(notify::PushChannel::new(client, config.push.clone())),
    ];
    let dispatcher = Arc::new(notify::NotificationDispatcher::new(
        channels,
        config.channel_timeout,
    ));
    let workers = queue::WorkerPool::spawn(alert_queue.clone(), dispatcher, config.workers);
    info!("✓ {} alert workers started", config.workers.max(1));

    // 接入流水线
    let sink: Arc<dyn ingest::SampleSink> = Arc::new(ingest::LogSink);
    let pipeline = ingest::IngestPipeline::new(
        registry,
        fanout::SampleBroadcaster::new(config.broadcast_capacity),
        alert_queue.clone(),
        sink,
    );

    let shutdown = CancellationToken::new();
    let state = http::AppState::new(pipeline, settings, shutdown.clone());
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let server = http::HttpServer::new(addr, state);

    // Ctrl+C 触发优雅关闭
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    info!("✅ Bandwidth monitor ready!");

    if let Err(e) = server.run().await {
        error!("HTTP server error: {}", e);
        shutdown.cancel();
    }

    // 先停止接收告警，再给 worker 留出收尾时间
    alert_queue.close();
    workers.shutdown(config.shutdown_grace).await;

    let stats = alert_queue.stats();
    if stats.ready + stats.in_flight + stats.delayed > 0 {
        warn!(
            "{} alert jobs left undelivered, they will be redelivered on restart",
            stats.ready + stats.in_flight + stats.delayed
        );
    }

    info!("Bandwidth monitor stopped");
    Ok(())
}
