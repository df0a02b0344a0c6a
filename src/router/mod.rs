//! Request routing and dispatch.
//!
//! # Resolution order
//!
//! 1. Exact match of the request path in the static [`PrefixTrie`]. A path
//!    that matches with no route for the method is `405`, unless the method is
//!    `OPTIONS`.
//! 2. Dynamic patterns (`/users/:id`), tried in registration order. The first
//!    pattern that matches both path and method wins.
//! 3. Otherwise `404`.
//!
//! # Dispatch
//!
//! ```text
//!   resolve ──▶ rate limiter ──▶ global middleware ──▶ group middleware ──▶ handler
//!                  │ no token                                  (on the worker pool
//!                  ▼                                            when one is configured)
//!                 429
//! ```
//!
//! Routes are registered before the router is shared; registration takes
//! `&mut self`, so it cannot race with traffic.

pub mod group;
pub mod handler;
pub mod pattern;
pub mod route;
pub mod trie;

use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::exec::{Backpressure, RateLimiter, WorkerPool};
use crate::http::request::{Method, Request};
use crate::http::response::{Response, Upgrade};
use crate::ws::{self, WebSocket, WebSocketHandler};

pub use group::RouteGroup;
pub use handler::{BoxedHandler, BoxedMiddleware, Context, Handler, Middleware, Next, from_fn};
pub use pattern::Params;
pub use route::Route;
pub use trie::PrefixTrie;

/// A resolved route and the parameters its pattern captured.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub route: Arc<Route>,
    pub params: Params,
}

#[derive(Default)]
pub struct Router {
    statics: PrefixTrie<Vec<Arc<Route>>>,
    dynamics: Vec<Arc<Route>>,
    middleware: Vec<BoxedMiddleware>,
    limiter: Option<RateLimiter>,
    pool: Option<WorkerPool>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds global middleware. The first one added is outermost.
    pub fn use_middleware(&mut self, middleware: impl Middleware) -> &mut Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Runs handlers on a pool of `size` workers instead of the calling task.
    pub fn with_worker_pool(&mut self, size: usize, policy: Backpressure) -> &mut Self {
        self.pool = Some(WorkerPool::new(size, policy));
        self
    }

    /// Admits at most `max_tokens` requests per `refill_interval`.
    pub fn with_rate_limiter(&mut self, max_tokens: u32, refill_interval: Duration) -> &mut Self {
        if let Some(old) = self.limiter.replace(RateLimiter::new(max_tokens, refill_interval)) {
            old.stop();
        }
        self
    }

    /// Applies the `worker_pool` and `rate_limit` sections of `cfg`.
    pub fn configure(&mut self, cfg: &Config) -> &mut Self {
        if let Some(pool) = &cfg.worker_pool {
            self.with_worker_pool(pool.size, pool.backpressure);
        }
        if let Some(limit) = &cfg.rate_limit {
            self.with_rate_limiter(limit.max_tokens, limit.refill_interval());
        }
        self
    }

    pub fn group(&mut self, prefix: &str) -> RouteGroup<'_> {
        RouteGroup::new(self, prefix)
    }

    pub fn worker_pool(&self) -> Option<&WorkerPool> {
        self.pool.as_ref()
    }

    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.limiter.as_ref()
    }

    /// Finds the route for `method` and `path`.
    pub fn resolve(&self, method: &Method, path: &str) -> Result<Resolved> {
        if let Some(routes) = self.statics.get(path) {
            return match route::select(routes, method) {
                Some(route) => Ok(Resolved {
                    route: Arc::clone(route),
                    params: Params::new(),
                }),
                None => Err(Error::MethodNotAllowed {
                    allow: route::allowed(routes.iter().map(|r| &**r)),
                }),
            };
        }

        let mut preflight = None;
        let mut matched: Vec<&Route> = Vec::new();
        for route in &self.dynamics {
            let Some(params) = pattern::match_pattern(&route.pattern, path) else {
                continue;
            };
            if route.accepts(method) {
                return Ok(Resolved {
                    route: Arc::clone(route),
                    params,
                });
            }
            if preflight.is_none() {
                preflight = Some(Resolved {
                    route: Arc::clone(route),
                    params,
                });
            }
            matched.push(route);
        }

        match preflight {
            Some(resolved) if *method == Method::OPTIONS => Ok(resolved),
            Some(_) => Err(Error::MethodNotAllowed {
                allow: route::allowed(matched),
            }),
            None => Err(Error::RouteNotFound),
        }
    }

    /// Resolves `request`, applies admission control, and runs the handler
    /// chain. Every failure is answered with its own status; nothing here
    /// panics the caller.
    pub async fn dispatch(&self, request: Request, peer: Option<SocketAddr>) -> Response {
        let started = Instant::now();
        let method = request.method.clone();
        let path = request.route_path().to_string();

        let resolved = match self.resolve(&method, &path) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(method = %method, path = %path, status = e.status().as_u16(), "{e}");
                if matches!(e, Error::RouteNotFound)
                    && let Some((prefix, _)) = self.statics.longest_prefix(&path)
                {
                    debug!(path = %path, nearest = prefix, "Closest registered static path");
                }
                return e.into_response();
            }
        };

        if let Some(limiter) = &self.limiter
            && !limiter.allow()
        {
            warn!(method = %method, path = %path, "Rate limit exceeded");
            return Error::RateLimited.into_response();
        }

        let handler = handler::compose(Arc::clone(&resolved.route.handler), &self.middleware);
        let mut ctx = Context::new(request).with_peer(peer);
        ctx.set_params(resolved.params);

        let response = match &self.pool {
            Some(pool) => {
                let (tx, rx) = oneshot::channel();
                let task = async move {
                    let _ = tx.send(handler.call(ctx).await);
                };
                match pool.submit(task).await {
                    Ok(()) => rx.await.unwrap_or_else(|_| {
                        error!(method = %method, path = %path, "Handler ended without a response");
                        Response::internal_error()
                    }),
                    Err(e) => {
                        warn!(method = %method, path = %path, "{e}");
                        e.into_response()
                    }
                }
            }
            None => AssertUnwindSafe(handler.call(ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    error!(method = %method, path = %path, "Handler panicked");
                    Response::internal_error()
                }),
        };

        debug!(
            method = %method,
            path = %path,
            route = %resolved.route.pattern,
            status = response.status.as_u16(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "Request handled"
        );
        response
    }

    /// `"METHOD pattern"` for every route: static paths in trie order, then
    /// dynamic patterns in registration order.
    pub fn routes(&self) -> Vec<String> {
        let mut listing = Vec::new();
        self.statics.walk(|_, routes| {
            listing.extend(routes.iter().map(|r| r.to_string()));
            ControlFlow::Continue(())
        });
        listing.extend(self.dynamics.iter().map(|r| r.to_string()));
        listing
    }

    /// Stops the rate limiter and drains the worker pool.
    pub async fn shutdown(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.stop();
        }
        if let Some(pool) = &self.pool {
            pool.shutdown().await;
        }
        info!("Router shut down");
    }
}

/// Route registration shared by [`Router`] and [`RouteGroup`].
pub trait Routing {
    /// Registers `handler` for `method` (`None` for any method) at `pattern`.
    fn route(&mut self, method: Option<Method>, pattern: &str, handler: BoxedHandler) -> &mut Self;

    fn get<F, Fut>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.route(Some(Method::GET), pattern, Arc::new(handler))
    }

    fn post<F, Fut>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.route(Some(Method::POST), pattern, Arc::new(handler))
    }

    fn put<F, Fut>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.route(Some(Method::PUT), pattern, Arc::new(handler))
    }

    fn delete<F, Fut>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.route(Some(Method::DELETE), pattern, Arc::new(handler))
    }

    fn patch<F, Fut>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.route(Some(Method::PATCH), pattern, Arc::new(handler))
    }

    fn options<F, Fut>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.route(Some(Method::OPTIONS), pattern, Arc::new(handler))
    }

    fn head<F, Fut>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.route(Some(Method::HEAD), pattern, Arc::new(handler))
    }

    fn trace<F, Fut>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.route(Some(Method::TRACE), pattern, Arc::new(handler))
    }

    fn connect<F, Fut>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.route(Some(Method::CONNECT), pattern, Arc::new(handler))
    }

    /// Registers `handler` for every method.
    fn any<F, Fut>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.route(None, pattern, Arc::new(handler))
    }

    /// Registers a WebSocket endpoint.
    ///
    /// A `GET` with valid upgrade headers is answered `101` and `handler`
    /// then runs with the established connection. Anything else is `400`.
    fn websocket<F, Fut>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: Fn(WebSocket) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let on_upgrade = ws::handler(handler);
        self.route(
            Some(Method::GET),
            pattern,
            Arc::new(move |ctx: Context| upgrade(ctx, Arc::clone(&on_upgrade))),
        )
    }
}

async fn upgrade(ctx: Context, on_upgrade: WebSocketHandler) -> Response {
    match ws::negotiate(ctx.request()) {
        Ok(handshake) => handshake.accept(Upgrade::new(on_upgrade)),
        Err(e) => {
            warn!(path = %ctx.request().route_path(), "{e}");
            e.into_response()
        }
    }
}

impl Routing for Router {
    fn route(&mut self, method: Option<Method>, pattern: &str, handler: BoxedHandler) -> &mut Self {
        if pattern.is_empty() {
            warn!("Ignoring route with empty pattern");
            return self;
        }

        let route = Arc::new(Route::new(method, pattern, handler));

        if pattern::is_dynamic(pattern) {
            match self
                .dynamics
                .iter_mut()
                .find(|r| r.pattern == route.pattern && r.method == route.method)
            {
                Some(slot) => {
                    warn!(route = %route, "Replacing existing route");
                    *slot = route;
                }
                None => self.dynamics.push(route),
            }
            return self;
        }

        match self.statics.get_mut(pattern) {
            Some(routes) => match routes.iter_mut().find(|r| r.method == route.method) {
                Some(slot) => {
                    warn!(route = %route, "Replacing existing route");
                    *slot = route;
                }
                None => routes.push(route),
            },
            None => {
                self.statics.insert(pattern, vec![route]);
            }
        }
        self
    }
}
