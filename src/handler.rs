//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! The router keeps handlers of many concrete types in one table, and the
//! middleware chain wraps them in further handlers of yet other types. Both
//! work on **trait objects** (`dyn ErasedHandler`) so every layer looks the
//! same from the outside.
//!
//! ```text
//! async fn hello(ctx: Context) { … }          ← user writes this
//!        ↓ router.get("/", hello)
//! hello.into_boxed_handler()                  ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(hello))                  ← heap-allocated wrapper
//!        ↓  middleware wraps it: m(BoxedHandler) -> BoxedHandler
//! handler.call(ctx)  at request time          ← one vtable dispatch per layer
//! ```
//!
//! A handler receives the request's [`Context`] by value and owns it for the
//! rest of the request. It answers by writing through the context, not by
//! returning a value.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;

/// A heap-allocated, type-erased handler future.
///
/// `Send + 'static` so the server can run it on its own task.
#[doc(hidden)]
pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Object-safe form of a handler: a context in, a boxed future out.
///
/// Public only because `Handler::into_boxed_handler` returns it.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, ctx: Context) -> BoxFuture;
}

/// A type-erased handler shared across concurrent requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// Anything that can answer a request.
///
/// You never implement this yourself. It is satisfied by any `async fn` (or
/// closure returning a future) with the signature:
///
/// ```text
/// async fn name(ctx: Context)
/// ```
///
/// The trait is **sealed**: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut> private::Sealed for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
}

impl<F, Fut> Handler for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Bridges a concrete handler `F` to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut> ErasedHandler for FnHandler<F>
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(&self, ctx: Context) -> BoxFuture {
        Box::pin((self.0)(ctx))
    }
}
