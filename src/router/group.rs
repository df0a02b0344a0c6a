use std::sync::Arc;

use crate::http::request::Method;
use crate::router::Router;
use crate::router::Routing;
use crate::router::handler::{BoxedHandler, Middleware, compose};

/// Routes registered under a shared prefix and middleware list.
///
/// Branching with [`RouteGroup::group`] copies the prefix and middleware,
/// so middleware added to a child later never reaches its parent or
/// siblings. Middleware is bound when a route is registered; adding more
/// afterwards affects only routes registered after it.
pub struct RouteGroup<'r> {
    router: &'r mut Router,
    prefix: String,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl<'r> RouteGroup<'r> {
    pub(crate) fn new(router: &'r mut Router, prefix: &str) -> Self {
        Self {
            router,
            prefix: join(prefix, ""),
            middleware: Vec::new(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn use_middleware(&mut self, middleware: impl Middleware) -> &mut Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// A nested group under `prefix`, inheriting this group's middleware.
    pub fn group(&mut self, prefix: &str) -> RouteGroup<'_> {
        RouteGroup {
            prefix: join(&self.prefix, prefix.trim_end_matches('/')),
            middleware: self.middleware.clone(),
            router: &mut *self.router,
        }
    }
}

impl Routing for RouteGroup<'_> {
    fn route(&mut self, method: Option<Method>, pattern: &str, handler: BoxedHandler) -> &mut Self {
        let handler = compose(handler, &self.middleware);
        let pattern = join(&self.prefix, pattern);
        self.router.route(method, &pattern, handler);
        self
    }
}

/// Joins two path fragments with exactly one `/` between them. A trailing
/// `/` on `path` survives, so `/api` + `/` is `/api/`.
pub(crate) fn join(prefix: &str, path: &str) -> String {
    let trailing = path.ends_with('/');
    let prefix = prefix.trim_matches('/');
    let path = path.trim_start_matches('/');

    let mut joined = match (prefix.is_empty(), path.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{path}"),
        (false, true) => format!("/{prefix}"),
        (false, false) => format!("/{prefix}/{path}"),
    };
    if trailing && !joined.ends_with('/') {
        joined.push('/');
    }
    joined
}
