use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::Config;
use crate::http::connection::Connection;
use crate::router::Router;

/// Binds `cfg.server.listen_addr` and serves `router` until the accept loop fails.
pub async fn run(cfg: &Config, router: Arc<Router>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&cfg.server.listen_addr)
        .await
        .with_context(|| format!("binding {}", cfg.server.listen_addr))?;
    info!("Listening on {}", listener.local_addr()?);

    serve(listener, cfg, router).await
}

/// Accepts on an already bound listener, one task per connection.
pub async fn serve(listener: TcpListener, cfg: &Config, router: Arc<Router>) -> anyhow::Result<()> {
    log_setup(&router);

    loop {
        let (socket, peer) = listener.accept().await?;
        info!("Accepted connection from {}", peer);

        let conn = Connection::new(socket, Arc::clone(&router))
            .with_peer(peer)
            .with_timeouts(cfg.server.timeouts.clone())
            .with_websocket_config(cfg.websocket.clone());

        tokio::spawn(async move {
            if let Err(e) = conn.run().await {
                error!("Connection error from {}: {:#}", peer, e);
            }
        });
    }
}

fn log_setup(router: &Router) {
    for route in router.routes() {
        info!("Route {}", route);
    }

    match router.worker_pool() {
        Some(pool) => info!(
            size = pool.size(),
            capacity = pool.capacity(),
            policy = ?pool.policy(),
            "Worker pool enabled"
        ),
        None => info!("Handlers run on connection tasks"),
    }

    if let Some(limiter) = router.rate_limiter() {
        info!(
            max_tokens = limiter.max_tokens(),
            refill_ms = limiter.refill_interval().as_millis() as u64,
            "Rate limiter enabled"
        );
    }
}
