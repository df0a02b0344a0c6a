use std::fmt;

use crate::http::request::Method;
use crate::router::handler::BoxedHandler;

/// A registered endpoint. `method == None` accepts every method.
pub struct Route {
    pub method: Option<Method>,
    pub pattern: String,
    /// Handler with its group middleware already applied.
    pub(crate) handler: BoxedHandler,
}

impl Route {
    pub(crate) fn new(method: Option<Method>, pattern: impl Into<String>, handler: BoxedHandler) -> Self {
        Self {
            method,
            pattern: pattern.into(),
            handler,
        }
    }

    /// Exact method match, or a route that takes any method.
    pub fn accepts(&self, method: &Method) -> bool {
        self.method.as_ref().is_none_or(|m| m == method)
    }

    pub fn method_label(&self) -> &'static str {
        self.method.as_ref().map_or("ANY", Method::as_str)
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method_label())
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method_label(), self.pattern)
    }
}

/// Picks the route at one path that serves `method`.
///
/// An exact method beats `ANY`. `OPTIONS` falls back to the first route
/// registered at the path.
pub(crate) fn select<'a, R>(routes: &'a [R], method: &Method) -> Option<&'a R>
where
    R: AsRef<Route>,
{
    routes
        .iter()
        .find(|r| r.as_ref().method.as_ref() == Some(method))
        .or_else(|| routes.iter().find(|r| r.as_ref().method.is_none()))
        .or_else(|| routes.first().filter(|_| *method == Method::OPTIONS))
}

/// Distinct methods of `routes`, in registration order, for an `Allow` header.
pub(crate) fn allowed<'a>(routes: impl IntoIterator<Item = &'a Route>) -> Vec<Method> {
    let mut allow = Vec::new();
    for method in routes.into_iter().filter_map(|r| r.method.clone()) {
        if !allow.contains(&method) {
            allow.push(method);
        }
    }
    allow
}
