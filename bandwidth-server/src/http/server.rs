use super::state::AppState;
use common::Result;
use std::net::SocketAddr;
use tracing::info;

pub struct HttpServer {
    addr: SocketAddr,
    state: AppState,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self { addr, state }
    }

    /// 运行直到关闭令牌被取消，已建立的请求处理完后返回
    pub async fn run(self) -> Result<()> {
        let shutdown = self.state.shutdown.clone();
        let app = super::routes::create_router(self.state);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!("HTTP server listening on {}", self.addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }
}
