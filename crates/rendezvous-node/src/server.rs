//! Signaling server -- HTTP listener that hands WebSocket connections to the
//! peer pool configured for the request path.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::config::NodeConfig;
use crate::peer_pool::{PeerPool, PoolConfig};
use crate::session::{serve_session, DEFAULT_KEEPALIVE_INTERVAL};
use crate::ws_transport::WsTransport;

/// Default WebSocket message limit, in bytes.
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

pub struct SignalingServer {
    pools: HashMap<String, PeerPool>,
    keepalive_interval: Duration,
    max_payload: usize,
    /// Tells upgraded sessions to close when the listener shuts down.
    sessions_shutdown: broadcast::Sender<()>,
}

impl Default for SignalingServer {
    fn default() -> Self {
        Self::new(DEFAULT_KEEPALIVE_INTERVAL, DEFAULT_MAX_PAYLOAD)
    }
}

impl SignalingServer {
    pub fn new(keepalive_interval: Duration, max_payload: usize) -> Self {
        Self {
            pools: HashMap::new(),
            keepalive_interval,
            max_payload,
            sessions_shutdown: broadcast::channel(1).0,
        }
    }

    /// Build a server with one pool per configured app.
    pub fn from_config(cfg: &NodeConfig) -> Self {
        let mut server = Self::new(cfg.keepalive_interval(), cfg.server.max_payload);
        for pool in cfg.pool_configs() {
            server.create_pool(pool);
        }
        server
    }

    /// Create the pool for `config.path`. An existing pool at that path wins.
    pub fn create_pool(&mut self, config: PoolConfig) -> PeerPool {
        if let Some(existing) = self.pools.get(&config.path) {
            tracing::warn!(path = %config.path, "server: pool already exists");
            return existing.clone();
        }
        let pool = PeerPool::new(config);
        self.pools.insert(pool.path().to_string(), pool.clone());
        pool
    }

    pub fn pool(&self, path: &str) -> Option<&PeerPool> {
        self.pools.get(path)
    }

    pub fn keepalive_interval(&self) -> Duration {
        self.keepalive_interval
    }

    /// Session count per pool path.
    pub async fn pool_sizes(&self) -> BTreeMap<String, usize> {
        let mut sizes = BTreeMap::new();
        for (path, pool) in &self.pools {
            sizes.insert(path.clone(), pool.count().await);
        }
        sizes
    }

    /// Wait until every pool is empty. Returns false if sessions remain
    /// after `timeout`.
    pub async fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining: usize = self.pool_sizes().await.values().sum();
            if remaining == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(remaining, "server: sessions still open after shutdown");
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/health", get(health))
            .fallback(upgrade)
            .with_state(self)
    }

    /// Serve on `listener` until `shutdown` fires. Upgraded sessions are told
    /// to close at the same time.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> std::io::Result<()> {
        let local = listener.local_addr()?;
        let mut paths: Vec<&str> = self.pools.keys().map(String::as_str).collect();
        paths.sort_unstable();
        tracing::info!(addr = %local, apps = ?paths, "server: listening");

        let sessions = self.sessions_shutdown.clone();
        let app = self.clone().router();
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            let _ = sessions.send(());
        })
        .await
    }
}

async fn health(State(server): State<Arc<SignalingServer>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "pools": server.pool_sizes().await,
    }))
}

async fn upgrade(
    State(server): State<Arc<SignalingServer>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    uri: Uri,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let path = uri.path().to_string();
    let Some(pool) = server.pool(&path).cloned() else {
        tracing::warn!(%remote, %path, "server: no app at path");
        return (StatusCode::NOT_FOUND, "unknown app path").into_response();
    };
    let Some(ws) = ws else {
        tracing::debug!(%remote, %path, "server: plain http request to app path");
        return (StatusCode::BAD_REQUEST, "websocket upgrade required").into_response();
    };

    tracing::debug!(%remote, %path, "server: upgrading");
    let keepalive = server.keepalive_interval;
    let shutdown = server.sessions_shutdown.subscribe();
    ws.max_message_size(server.max_payload)
        .on_upgrade(move |socket| {
            let transport = WsTransport::new(socket, remote, path);
            serve_session(pool, transport, keepalive, Some(shutdown))
        })
}
