//! Middleware.
//!
//! A [`Middleware`] turns the handler after it into a new handler. It can
//! read or rewrite the [`Context`] before delegating, decline to delegate
//! (answering the request itself), or act once the inner handler returns.
//!
//! ```text
//! router.middleware(m1).middleware(m2).get("/", h)
//!
//!   request ──▶ m1 ──▶ m2 ──▶ h
//!                 ◀──    ◀──
//! ```
//!
//! Registration order is nesting order: the first middleware registered is
//! the outermost, runs first on the way in and last on the way out.
//!
//! Write your own with [`from_fn`] (full control) or [`before`] (pre-only,
//! always delegates):
//!
//! ```rust,no_run
//! use si::middleware::{self, Next};
//! use si::{Context, Router};
//!
//! async fn require_token(mut ctx: Context, next: Next) {
//!     if ctx.bearer_token().is_empty() {
//!         let _ = ctx.send_error_json("missing token", 401).await;
//!         return;
//!     }
//!     next.run(ctx).await;
//! }
//!
//! # async fn me(_: Context) {}
//! let app = Router::new()
//!     .middleware(middleware::request_id())
//!     .middleware(middleware::from_fn(require_token))
//!     .get("/me", me);
//! ```
//!
//! Built-ins: [`Logger`], [`request_id`], [`clean_path`].

pub mod clean_path;
pub mod logger;
pub mod request_id;

pub use clean_path::clean_path;
pub use logger::{Logger, Terminal};
pub use request_id::{REQUEST_ID, request_id};

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::context::Context;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};

/// A transformation from the next handler to a new handler.
///
/// Cheap to clone. Built once at startup and applied when the router is
/// assembled; it is never invoked per request.
#[derive(Clone)]
pub struct Middleware {
    wrap: Arc<dyn Fn(BoxedHandler) -> BoxedHandler + Send + Sync>,
}

impl Middleware {
    pub(crate) fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        (self.wrap)(next)
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Middleware")
    }
}

/// Wraps `handler` in `middlewares`, first element outermost.
pub(crate) fn compose(middlewares: &[Middleware], handler: BoxedHandler) -> BoxedHandler {
    middlewares.iter().rev().fold(handler, |next, m| m.wrap(next))
}

/// The rest of the chain, as seen from inside a middleware.
pub struct Next {
    inner: BoxedHandler,
}

impl Next {
    /// Hands the context to the next middleware, or to the handler.
    pub async fn run(self, ctx: Context) {
        self.inner.call(ctx).await;
    }
}

/// Builds a middleware from an async function of the context and the rest
/// of the chain.
///
/// Dropping `next` without calling [`Next::run`] short-circuits: nothing
/// inside this middleware runs.
pub fn from_fn<F, Fut>(f: F) -> Middleware
where
    F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let f = Arc::new(f);
    Middleware {
        wrap: Arc::new(move |inner: BoxedHandler| -> BoxedHandler {
            Arc::new(FromFn { f: Arc::clone(&f), inner })
        }),
    }
}

/// Builds a middleware that edits the context and then always delegates.
pub fn before<F>(f: F) -> Middleware
where
    F: Fn(&mut Context) + Send + Sync + 'static,
{
    from_fn(move |mut ctx, next| {
        f(&mut ctx);
        next.run(ctx)
    })
}

struct FromFn<F> {
    f: Arc<F>,
    inner: BoxedHandler,
}

impl<F, Fut> ErasedHandler for FromFn<F>
where
    F: Fn(Context, Next) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(&self, ctx: Context) -> BoxFuture {
        let next = Next { inner: Arc::clone(&self.inner) };
        Box::pin((*self.f)(ctx, next))
    }
}
