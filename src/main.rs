use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use switchyard::config::Config;
use switchyard::http::response::{Response, StatusCode};
use switchyard::router::{Context, Next, Router, Routing, from_fn};
use switchyard::server;
use switchyard::ws::{WebSocket, WebSocketSender};
use tracing::info;

/// Open chat connections, owned by the application rather than the engine.
type ChatRoom = Arc<Mutex<HashMap<u64, WebSocketSender>>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;
    let router = Arc::new(build_router(&cfg));

    tokio::select! {
        res = server::listener::run(&cfg, Arc::clone(&router)) => {
            res?;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    router.shutdown().await;
    Ok(())
}

fn build_router(cfg: &Config) -> Router {
    let mut router = Router::new();
    router.configure(cfg);

    router.use_middleware(from_fn(|ctx: Context, next: Next| async move {
        let method = ctx.request().method.clone();
        let path = ctx.request().path.clone();
        let response = next.run(ctx).await;
        info!(%method, %path, status = response.status.as_u16(), "Served");
        response
    }));

    router
        .get("/", |_ctx| async { Response::ok("Hello from Switchyard\n") })
        .get("/hello/:name", |ctx: Context| async move {
            let name = ctx.param("name").unwrap_or("stranger");
            Response::text(StatusCode::Ok, format!("Hello, {name}!\n"))
        })
        .websocket("/ws/echo", echo);

    let room: ChatRoom = Arc::default();
    router.websocket("/ws/chat", move |ws| chat(ws, Arc::clone(&room)));

    router
}

async fn echo(mut ws: WebSocket) {
    while let Some(msg) = ws.recv().await {
        if ws.send(msg).is_err() {
            break;
        }
    }
}

async fn chat(mut ws: WebSocket, room: ChatRoom) {
    let id = ws.id();
    room.lock().insert(id, ws.sender());
    info!(conn = id, members = room.lock().len(), "Joined chat");

    while let Some(msg) = ws.recv().await {
        // Snapshot so the lock is not held while sending.
        let members: Vec<WebSocketSender> = room.lock().values().cloned().collect();
        for member in members {
            let _ = member.send(msg.clone());
        }
    }

    room.lock().remove(&id);
    info!(conn = id, "Left chat");
}
