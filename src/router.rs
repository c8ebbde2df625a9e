//! Route registration.
//!
//! A thin layer over [`matchit`]: one radix tree per HTTP method, `{name}`
//! path parameters, `{*rest}` catch-alls. The router adds what a service
//! needs around the trees and nothing more:
//!
//! - router-level [middleware](crate::middleware), run before the route is
//!   looked up;
//! - [`Router::mount`] to graft a sub-router under a prefix;
//! - a not-found handler, and `405 Method Not Allowed` with an `Allow`
//!   header when the path exists under other methods;
//! - [`Router::routes`] to list what was registered.
//!
//! Build it once at startup. After [`Server::serve`](crate::Server::serve)
//! takes it, the tables are read-only.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use http::header::ALLOW;
use http::{HeaderValue, StatusCode};
use matchit::Router as MatchitRouter;
use tracing::info;

use crate::context::Context;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler};
use crate::method::Method;
use crate::middleware::{self, Middleware};

/// One registered route, as reported by [`Router::routes`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RouteInfo {
    pub method: Method,
    pub pattern: String,
    /// Middleware layers a request passes through before the handler.
    pub middlewares: usize,
}

struct Route {
    method: Method,
    pattern: String,
    handler: BoxedHandler,
    /// Layers already composed into `handler` (from mounted routers).
    depth: usize,
}

/// The application router.
///
/// ```rust,no_run
/// use si::{Context, Router, middleware};
///
/// # async fn list_users(_: Context) {}
/// # async fn get_user(_: Context) {}
/// # async fn create_user(_: Context) {}
/// # async fn health(_: Context) {}
/// let users = Router::new()
///     .get("/", list_users)
///     .get("/{id}", get_user)
///     .post("/", create_user);
///
/// let app = Router::new()
///     .middleware(middleware::request_id())
///     .get("/health", health)
///     .mount("/users", users);
/// ```
pub struct Router {
    trees: HashMap<Method, MatchitRouter<BoxedHandler>>,
    routes: Vec<Route>,
    middlewares: Vec<Middleware>,
    not_found: Option<BoxedHandler>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            trees: HashMap::new(),
            routes: Vec::new(),
            middlewares: Vec::new(),
            not_found: None,
        }
    }

    /// Registers `handler` for `method` on `pattern`.
    ///
    /// # Panics
    ///
    /// Panics if the pattern is malformed or conflicts with one already
    /// registered for the same method. Routes are set up at startup, so this
    /// fails fast instead of serving a half-built table.
    pub fn on(self, method: Method, pattern: &str, handler: impl Handler) -> Self {
        self.add(method, pattern, handler.into_boxed_handler(), 0)
    }

    pub fn get(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::Get, pattern, handler)
    }

    pub fn post(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::Post, pattern, handler)
    }

    pub fn put(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::Put, pattern, handler)
    }

    pub fn patch(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::Patch, pattern, handler)
    }

    pub fn delete(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::Delete, pattern, handler)
    }

    pub fn head(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::Head, pattern, handler)
    }

    pub fn options(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::Options, pattern, handler)
    }

    pub fn connect(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::Connect, pattern, handler)
    }

    pub fn trace(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::Trace, pattern, handler)
    }

    /// Registers `handler` for every method.
    pub fn any(self, pattern: &str, handler: impl Handler) -> Self {
        let handler = handler.into_boxed_handler();
        Method::ALL
            .into_iter()
            .fold(self, |router, method| router.add(method, pattern, Arc::clone(&handler), 0))
    }

    /// Adds a middleware around every request this router handles, including
    /// requests that match no route. The first one added is the outermost.
    pub fn middleware(mut self, m: impl Into<Middleware>) -> Self {
        self.middlewares.push(m.into());
        self
    }

    /// Answers requests that match no route. The default writes
    /// `404 page not found`.
    pub fn not_found(mut self, handler: impl Handler) -> Self {
        self.not_found = Some(handler.into_boxed_handler());
        self
    }

    /// Registers every route of `sub` under `prefix`.
    ///
    /// `sub`'s middleware wraps only `sub`'s routes and runs after this
    /// router's own. `sub`'s not-found handler is not carried over. A route
    /// `/` in `sub` answers both `{prefix}` and `{prefix}/`.
    pub fn mount(self, prefix: &str, sub: Router) -> Self {
        let prefix = prefix.trim_end_matches('/');
        let layers = sub.middlewares.len();
        sub.routes.into_iter().fold(self, |mut router, route| {
            let handler = middleware::compose(&sub.middlewares, route.handler);
            let depth = route.depth + layers;
            if route.pattern == "/" && !prefix.is_empty() {
                router = router.add(route.method, prefix, Arc::clone(&handler), depth);
            }
            let pattern = format!("{prefix}{}", route.pattern);
            router.add(route.method, &pattern, handler, depth)
        })
    }

    /// Every registered route, in registration order.
    pub fn routes(&self) -> Vec<RouteInfo> {
        self.routes
            .iter()
            .map(|r| RouteInfo {
                method: r.method,
                pattern: r.pattern.clone(),
                middlewares: self.middlewares.len() + r.depth,
            })
            .collect()
    }

    /// Logs the route table at `info` level, one event per route.
    pub fn print_routes(&self) {
        for route in self.routes() {
            info!(
                method = route.method.as_str(),
                pattern = %route.pattern,
                middlewares = route.middlewares,
                "route"
            );
        }
    }

    fn add(mut self, method: Method, pattern: &str, handler: BoxedHandler, depth: usize) -> Self {
        self.trees
            .entry(method)
            .or_default()
            .insert(pattern, Arc::clone(&handler))
            .unwrap_or_else(|e| panic!("invalid route `{method} {pattern}`: {e}"));
        self.routes.push(Route { method, pattern: pattern.to_owned(), handler, depth });
        self
    }

    /// Freezes the router into the handler the server calls per request.
    pub(crate) fn into_handler(self) -> BoxedHandler {
        let dispatch: BoxedHandler = Arc::new(Dispatch {
            trees: self.trees,
            not_found: self.not_found,
        });
        middleware::compose(&self.middlewares, dispatch)
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes())
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

/// The innermost layer: looks the request up and calls the route.
struct Dispatch {
    trees: HashMap<Method, MatchitRouter<BoxedHandler>>,
    not_found: Option<BoxedHandler>,
}

enum Lookup {
    Found(BoxedHandler, HashMap<String, String>),
    WrongMethod(Vec<Method>),
    Missing,
}

impl Dispatch {
    fn lookup(&self, method: &http::Method, path: &str) -> Lookup {
        let Ok(method) = Method::try_from(method) else {
            return Lookup::Missing;
        };
        if let Some(matched) = self.trees.get(&method).and_then(|tree| tree.at(path).ok()) {
            let params = matched.params.iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect();
            return Lookup::Found(Arc::clone(matched.value), params);
        }

        let allowed: Vec<Method> = Method::ALL
            .into_iter()
            .filter(|m| self.trees.get(m).is_some_and(|tree| tree.at(path).is_ok()))
            .collect();
        if allowed.is_empty() { Lookup::Missing } else { Lookup::WrongMethod(allowed) }
    }
}

impl ErasedHandler for Dispatch {
    fn call(&self, mut ctx: Context) -> BoxFuture {
        match self.lookup(ctx.request().method(), ctx.path()) {
            Lookup::Found(handler, params) => {
                ctx.request.set_params(params);
                handler.call(ctx)
            }
            Lookup::WrongMethod(allowed) => Box::pin(async move {
                let allow = allowed.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(", ");
                if let Ok(sink) = ctx.sink_mut() {
                    if let Ok(value) = HeaderValue::from_str(&allow) {
                        sink.headers_mut().insert(ALLOW, value);
                    }
                    sink.write_status(StatusCode::METHOD_NOT_ALLOWED);
                }
            }),
            Lookup::Missing => match &self.not_found {
                Some(handler) => handler.call(ctx),
                None => Box::pin(async move {
                    let _ = ctx.plain_error(StatusCode::NOT_FOUND, "404 page not found").await;
                }),
            },
        }
    }
}
