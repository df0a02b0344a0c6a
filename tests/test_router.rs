use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use switchyard::Error;
use switchyard::exec::Backpressure;
use switchyard::http::request::{Method, Request, RequestBuilder};
use switchyard::http::response::{Response, StatusCode};
use switchyard::router::{BoxedHandler, Context, Middleware, Next, Router, Routing, from_fn};

fn req(method: Method, path: &str) -> Request {
    RequestBuilder::new().method(method).path(path).build().unwrap()
}

async fn ok(_ctx: Context) -> Response {
    Response::ok("ok")
}

fn reply(body: &'static str) -> impl Fn(Context) -> std::future::Ready<Response> + Send + Sync {
    move |_ctx| std::future::ready(Response::ok(body))
}

fn body(response: &Response) -> &str {
    std::str::from_utf8(&response.body).unwrap()
}

fn stamp(name: &'static str) -> impl Middleware {
    from_fn(move |ctx: Context, next: Next| async move {
        let mut response = next.run(ctx).await;
        response.headers.insert(name.to_string(), "1".to_string());
        response
    })
}

fn trace(log: Arc<Mutex<Vec<String>>>, name: &'static str) -> impl Middleware {
    from_fn(move |ctx: Context, next: Next| {
        let log = Arc::clone(&log);
        async move {
            log.lock().push(format!("{name}>"));
            let response = next.run(ctx).await;
            log.lock().push(format!("<{name}"));
            response
        }
    })
}

#[test]
fn test_resolves_dynamic_route_and_reports_405_for_wrong_method() {
    let mut router = Router::new();
    router.get("/users/:id", ok);

    let resolved = router.resolve(&Method::GET, "/users/42").unwrap();
    assert_eq!(resolved.params.get("id"), Some("42"));
    assert_eq!(resolved.route.pattern, "/users/:id");

    match router.resolve(&Method::POST, "/users/42") {
        Err(Error::MethodNotAllowed { allow }) => assert_eq!(allow, vec![Method::GET]),
        other => panic!("expected 405, got {other:?}"),
    }

    assert!(matches!(
        router.resolve(&Method::GET, "/users"),
        Err(Error::RouteNotFound)
    ));
}

#[test]
fn test_static_route_beats_dynamic_route() {
    let mut router = Router::new();
    router.get("/users/:id", ok);
    router.get("/users/me", ok);

    let resolved = router.resolve(&Method::GET, "/users/me").unwrap();
    assert_eq!(resolved.route.pattern, "/users/me");
    assert!(resolved.params.is_empty());
}

#[test]
fn test_first_registered_dynamic_route_wins() {
    let mut router = Router::new();
    router.get("/files/:name", ok);
    router.get("/files/:id", ok);

    let resolved = router.resolve(&Method::GET, "/files/readme").unwrap();
    assert_eq!(resolved.route.pattern, "/files/:name");
    assert_eq!(resolved.params.get("name"), Some("readme"));
}

#[test]
fn test_dynamic_routes_fall_through_on_method() {
    let mut router = Router::new();
    router.get("/items/:id", ok);
    router.delete("/items/:key", ok);

    let resolved = router.resolve(&Method::DELETE, "/items/9").unwrap();
    assert_eq!(resolved.route.pattern, "/items/:key");
    assert_eq!(resolved.params.get("key"), Some("9"));

    match router.resolve(&Method::PUT, "/items/9") {
        Err(Error::MethodNotAllowed { allow }) => {
            assert_eq!(allow, vec![Method::GET, Method::DELETE])
        }
        other => panic!("expected 405, got {other:?}"),
    }
}

#[test]
fn test_static_path_holds_one_route_per_method() {
    let mut router = Router::new();
    router.get("/items", reply("list"));
    router.post("/items", reply("create"));

    assert_eq!(router.resolve(&Method::POST, "/items").unwrap().route.method, Some(Method::POST));
    match router.resolve(&Method::PUT, "/items") {
        Err(Error::MethodNotAllowed { allow }) => {
            assert_eq!(allow, vec![Method::GET, Method::POST])
        }
        other => panic!("expected 405, got {other:?}"),
    }
}

#[test]
fn test_options_passes_the_method_check() {
    let mut router = Router::new();
    router.post("/submit", ok);
    router.put("/docs/:id", ok);

    assert!(router.resolve(&Method::OPTIONS, "/submit").is_ok());
    let resolved = router.resolve(&Method::OPTIONS, "/docs/3").unwrap();
    assert_eq!(resolved.params.get("id"), Some("3"));
}

#[test]
fn test_any_accepts_every_method() {
    let mut router = Router::new();
    router.any("/echo", ok);

    for method in [Method::GET, Method::POST, Method::PATCH, Method::TRACE] {
        assert!(router.resolve(&method, "/echo").is_ok(), "{method}");
    }
}

#[test]
fn test_exact_method_is_preferred_over_any() {
    let mut router = Router::new();
    router.any("/thing", reply("any"));
    router.get("/thing", reply("get"));

    assert_eq!(router.resolve(&Method::GET, "/thing").unwrap().route.method, Some(Method::GET));
    assert_eq!(router.resolve(&Method::PUT, "/thing").unwrap().route.method, None);
}

#[test]
fn test_empty_pattern_is_ignored() {
    let mut router = Router::new();
    router.get("", ok);

    assert!(router.routes().is_empty());
}

#[test]
fn test_route_listing_is_static_then_dynamic() {
    let mut router = Router::new();
    router
        .get("/users/:id", ok)
        .get("/b", ok)
        .post("/a", ok)
        .get("/a", ok)
        .any("/c", ok);

    assert_eq!(
        router.routes(),
        vec!["POST /a", "GET /a", "GET /b", "ANY /c", "GET /users/:id"]
    );
}

#[tokio::test]
async fn test_reregistering_replaces_the_handler() {
    let mut router = Router::new();
    router.get("/v", reply("one"));
    router.get("/v", reply("two"));
    router.get("/v/:n", reply("three"));
    router.get("/v/:n", reply("four"));

    assert_eq!(router.routes().len(), 2);
    assert_eq!(body(&router.dispatch(req(Method::GET, "/v"), None).await), "two");
    assert_eq!(body(&router.dispatch(req(Method::GET, "/v/1"), None).await), "four");
}

#[tokio::test]
async fn test_dispatch_answers_routing_errors_with_status() {
    let mut router = Router::new();
    router.get("/only-get", ok);

    let missing = router.dispatch(req(Method::GET, "/nope"), None).await;
    assert_eq!(missing.status, StatusCode::NotFound);

    let wrong = router.dispatch(req(Method::DELETE, "/only-get"), None).await;
    assert_eq!(wrong.status, StatusCode::MethodNotAllowed);
    assert_eq!(wrong.header("Allow"), Some("GET"));
}

#[tokio::test]
async fn test_dispatch_routes_on_path_without_query() {
    let mut router = Router::new();
    router.get("/search", |ctx: Context| async move {
        Response::ok(ctx.request().query().unwrap_or("").to_string())
    });

    let response = router.dispatch(req(Method::GET, "/search?q=radix"), None).await;
    assert_eq!(body(&response), "q=radix");
}

#[tokio::test]
async fn test_handler_sees_params_and_peer() {
    let mut router = Router::new();
    router.get("/orders/:id", |ctx: Context| async move {
        let id: u32 = ctx.param_as("id").unwrap_or(0);
        let peer = ctx.peer().map(|p| p.to_string()).unwrap_or_default();
        Response::ok(format!("{} from {}", id * 2, peer))
    });

    let peer: SocketAddr = "10.1.2.3:4000".parse().unwrap();
    let response = router.dispatch(req(Method::GET, "/orders/21"), Some(peer)).await;

    assert_eq!(body(&response), "42 from 10.1.2.3:4000");
}

#[tokio::test]
async fn test_first_registered_middleware_is_outermost() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut router = Router::new();
    router.use_middleware(trace(Arc::clone(&log), "a"));
    router.use_middleware(trace(Arc::clone(&log), "b"));
    {
        let mut group = router.group("/g");
        group.use_middleware(trace(Arc::clone(&log), "c"));
        let handler_log = Arc::clone(&log);
        group.get("/x", move |_ctx| {
            handler_log.lock().push("handler".to_string());
            std::future::ready(Response::ok("x"))
        });
    }

    router.dispatch(req(Method::GET, "/g/x"), None).await;

    assert_eq!(
        *log.lock(),
        vec!["a>", "b>", "c>", "handler", "<c", "<b", "<a"]
    );
}

#[tokio::test]
async fn test_closure_middleware_can_short_circuit() {
    let mut router = Router::new();
    router.use_middleware(|next: BoxedHandler| -> BoxedHandler {
        Arc::new(move |ctx: Context| {
            let next = Arc::clone(&next);
            async move {
                if ctx.request().header("Authorization").is_none() {
                    return Response::text(StatusCode::BadRequest, "no auth");
                }
                next.call(ctx).await
            }
        })
    });
    router.get("/secret", ok);

    let denied = router.dispatch(req(Method::GET, "/secret"), None).await;
    assert_eq!(denied.status, StatusCode::BadRequest);

    let allowed = RequestBuilder::new()
        .method(Method::GET)
        .path("/secret")
        .header("Authorization", "token")
        .build()
        .unwrap();
    assert_eq!(router.dispatch(allowed, None).await.status, StatusCode::Ok);
}

#[tokio::test]
async fn test_middleware_passes_typed_values_to_handlers() {
    #[derive(Clone)]
    struct User(&'static str);

    let mut router = Router::new();
    router.use_middleware(from_fn(|mut ctx: Context, next: Next| async move {
        ctx.extensions_mut().insert(User("ada"));
        next.run(ctx).await
    }));
    router.get("/me", |ctx: Context| async move {
        let user = ctx.extensions().get::<User>().map_or("nobody", |u| u.0);
        Response::ok(user)
    });

    let response = router.dispatch(req(Method::GET, "/me"), None).await;
    assert_eq!(body(&response), "ada");
}

#[tokio::test]
async fn test_groups_copy_middleware_on_branch() {
    let mut router = Router::new();
    {
        let mut api = router.group("/api");
        api.use_middleware(stamp("X-Api"));
        {
            let mut admin = api.group("/admin");
            admin.use_middleware(stamp("X-Admin"));
            admin.get("/stats", ok);
        }
        api.get("/users", ok);
    }
    router.get("/health", ok);

    let stats = router.dispatch(req(Method::GET, "/api/admin/stats"), None).await;
    assert_eq!(stats.header("X-Api"), Some("1"));
    assert_eq!(stats.header("X-Admin"), Some("1"));

    let users = router.dispatch(req(Method::GET, "/api/users"), None).await;
    assert_eq!(users.header("X-Api"), Some("1"));
    assert_eq!(users.header("X-Admin"), None);

    let health = router.dispatch(req(Method::GET, "/health"), None).await;
    assert_eq!(health.header("X-Api"), None);
}

#[test]
fn test_group_root_keeps_trailing_slash() {
    let mut router = Router::new();
    {
        let mut api = router.group("/api");
        api.get("/", ok);
        api.get("/users", ok);
    }

    assert_eq!(router.routes(), vec!["GET /api/", "GET /api/users"]);
    assert!(router.resolve(&Method::GET, "/api/").is_ok());
    assert!(matches!(router.resolve(&Method::GET, "/api"), Err(Error::RouteNotFound)));
}

#[tokio::test]
async fn test_group_middleware_is_bound_at_registration() {
    let mut router = Router::new();
    {
        let mut api = router.group("/api");
        api.get("/early", ok);
        api.use_middleware(stamp("X-Late"));
        api.get("/late", ok);
    }

    let early = router.dispatch(req(Method::GET, "/api/early"), None).await;
    let late = router.dispatch(req(Method::GET, "/api/late"), None).await;

    assert_eq!(early.header("X-Late"), None);
    assert_eq!(late.header("X-Late"), Some("1"));
}

#[tokio::test]
async fn test_rate_limited_requests_never_reach_the_handler() {
    let hits = Arc::new(Mutex::new(0));
    let mut router = Router::new();
    router.with_rate_limiter(2, Duration::from_secs(60));
    let counter = Arc::clone(&hits);
    router.get("/", move |_ctx| {
        *counter.lock() += 1;
        std::future::ready(Response::ok("hi"))
    });

    let mut statuses = Vec::new();
    for _ in 0..3 {
        statuses.push(router.dispatch(req(Method::GET, "/"), None).await.status);
    }

    assert_eq!(
        statuses,
        vec![StatusCode::Ok, StatusCode::Ok, StatusCode::TooManyRequests]
    );
    assert_eq!(*hits.lock(), 2);
    router.shutdown().await;
}

#[tokio::test]
async fn test_routing_errors_do_not_consume_tokens() {
    let mut router = Router::new();
    router.with_rate_limiter(1, Duration::from_secs(60));
    router.get("/", ok);

    router.dispatch(req(Method::GET, "/missing"), None).await;

    assert_eq!(router.dispatch(req(Method::GET, "/"), None).await.status, StatusCode::Ok);
    router.shutdown().await;
}

#[tokio::test]
async fn test_worker_pool_runs_handlers_and_returns_their_response() {
    let mut router = Router::new();
    router.with_worker_pool(2, Backpressure::Block);
    router.get("/square/:n", |ctx: Context| async move {
        let n: u64 = ctx.param_as("n").unwrap_or(0);
        Response::ok((n * n).to_string())
    });

    let response = router.dispatch(req(Method::GET, "/square/12"), None).await;
    assert_eq!(body(&response), "144");

    router.shutdown().await;
    let after = router.dispatch(req(Method::GET, "/square/2"), None).await;
    assert_eq!(after.status, StatusCode::ServiceUnavailable);
}

#[tokio::test]
async fn test_panicking_handler_yields_500() {
    let mut router = Router::new();
    router.get("/boom", |_ctx: Context| async move {
        if true {
            panic!("handler failure");
        }
        Response::ok("unreachable")
    });

    let inline = router.dispatch(req(Method::GET, "/boom"), None).await;
    assert_eq!(inline.status, StatusCode::InternalServerError);

    router.with_worker_pool(1, Backpressure::Block);
    let pooled = router.dispatch(req(Method::GET, "/boom"), None).await;
    assert_eq!(pooled.status, StatusCode::InternalServerError);

    // The worker survived the panic.
    router.get("/fine", ok);
    let fine = router.dispatch(req(Method::GET, "/fine"), None).await;
    assert_eq!(fine.status, StatusCode::Ok);
    router.shutdown().await;
}

#[tokio::test]
async fn test_websocket_route_rejects_plain_requests() {
    let mut router = Router::new();
    router.websocket("/ws", |_ws| async {});

    let plain = router.dispatch(req(Method::GET, "/ws"), None).await;
    assert_eq!(plain.status, StatusCode::BadRequest);
    assert!(!plain.is_upgrade());

    let upgrade = RequestBuilder::new()
        .method(Method::GET)
        .path("/ws")
        .header("Upgrade", "websocket")
        .header("Connection", "keep-alive, Upgrade")
        .header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==")
        .build()
        .unwrap();
    let accepted = router.dispatch(upgrade, None).await;

    assert_eq!(accepted.status, StatusCode::SwitchingProtocols);
    assert_eq!(
        accepted.header("Sec-WebSocket-Accept"),
        Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=")
    );
    assert!(accepted.is_upgrade());
}
