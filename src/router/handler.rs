//! Request handlers, middleware, and the per-request context they share.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::http::request::Request;
use crate::http::response::Response;
use crate::router::pattern::Params;

/// Typed values attached to a request, one per type.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value`, returning the previous value of the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|prev| prev.downcast().ok().map(|boxed| *boxed))
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.map.get(&TypeId::of::<T>())?.downcast_ref()
    }

    pub fn get_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.map.get_mut(&TypeId::of::<T>())?.downcast_mut()
    }

    pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast().ok().map(|boxed| *boxed))
    }
}

impl std::fmt::Debug for Extensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extensions").field("len", &self.map.len()).finish()
    }
}

/// Everything a handler sees about one request.
#[derive(Debug)]
pub struct Context {
    request: Request,
    params: Params,
    peer: Option<SocketAddr>,
    extensions: Extensions,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            params: Params::new(),
            peer: None,
            extensions: Extensions::new(),
        }
    }

    pub fn with_peer(mut self, peer: Option<SocketAddr>) -> Self {
        self.peer = peer;
        self
    }

    pub(crate) fn set_params(&mut self, params: Params) {
        self.params = params;
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn into_request(self) -> Request {
        self.request
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// A captured path parameter, or `None` when the route did not capture it.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// A captured path parameter parsed into `T`.
    pub fn param_as<T: FromStr>(&self, name: &str) -> Option<T> {
        self.param(name)?.parse().ok()
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}

/// Something that turns a request context into a response.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> BoxFuture<'static, Response>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> BoxFuture<'static, Response> {
        Box::pin(self(ctx))
    }
}

pub type BoxedHandler = Arc<dyn Handler>;

/// A handler-to-handler transform.
///
/// Middleware registered first ends up outermost: it sees the request first
/// and the response last.
pub trait Middleware: Send + Sync + 'static {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler;
}

impl<F> Middleware for F
where
    F: Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static,
{
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        self(next)
    }
}

pub type BoxedMiddleware = Arc<dyn Middleware>;

/// Folds `layers` around `handler` right to left.
pub fn compose(handler: BoxedHandler, layers: &[BoxedMiddleware]) -> BoxedHandler {
    layers
        .iter()
        .rev()
        .fold(handler, |next, layer| layer.wrap(next))
}

/// The remainder of the chain, handed to [`from_fn`] middleware.
#[derive(Clone)]
pub struct Next(BoxedHandler);

impl Next {
    pub async fn run(self, ctx: Context) -> Response {
        self.0.call(ctx).await
    }
}

/// Builds middleware from an async function of `(Context, Next)`.
///
/// ```ignore
/// router.use_middleware(from_fn(|ctx, next: Next| async move {
///     let response = next.run(ctx).await;
///     tracing::info!(status = response.status.as_u16(), "done");
///     response
/// }));
/// ```
pub fn from_fn<F, Fut>(f: F) -> FromFn<F>
where
    F: Fn(Context, Next) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    FromFn { f }
}

pub struct FromFn<F> {
    f: F,
}

impl<F, Fut> Middleware for FromFn<F>
where
    F: Fn(Context, Next) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        let f = self.f.clone();
        Arc::new(move |ctx: Context| f(ctx, Next(next.clone())))
    }
}
