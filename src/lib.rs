//! # si
//!
//! A small HTTP layer where every handler gets one [`Context`]: the request
//! to read, the response to write, and whatever middleware attached on the
//! way in.
//!
//! ## What's here
//!
//! - [`Context`]: request accessors (headers, cookies, query and path
//!   parameters, content negotiation, JSON/form/multipart bodies that can be
//!   read more than once) and response writers (bytes, strings, JSON, HTML,
//!   files, redirects, cookies).
//! - [Server-Sent Events](sse) with a flush after every frame.
//! - [Middleware](middleware) as handler-to-handler transforms, plus a
//!   request logger, request ids and path cleaning.
//! - A [`Router`] over [`matchit`] radix trees, and a hyper [`Server`] with
//!   graceful shutdown.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use serde::Deserialize;
//! use si::middleware::{self, Logger, Terminal};
//! use si::{Context, Router, Server};
//!
//! #[derive(Deserialize, serde::Serialize)]
//! struct NewUser {
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), si::Error> {
//!     let app = Router::new()
//!         .middleware(Logger::new(Terminal::detect()))
//!         .middleware(middleware::request_id())
//!         .get("/users/{id}", get_user)
//!         .post("/users", create_user);
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await
//! }
//!
//! async fn get_user(mut ctx: Context) {
//!     let id = ctx.param_int("id");
//!     let _ = ctx.sj(&serde_json::json!({ "id": id })).await;
//! }
//!
//! async fn create_user(mut ctx: Context) {
//!     match ctx.json_body::<NewUser>().await {
//!         Ok(user) => { let _ = ctx.send_json(Some(&user), 201).await; }
//!         Err(_)   => { let _ = ctx.send_error_json("invalid body", 400).await; }
//!     }
//! }
//! ```
//!
//! ## Errors
//!
//! Malformed query and path values quietly become a default. Body decoding
//! and writes return [`Error`]; what the client sees is up to the handler.

mod attributes;
mod context;
mod cookie;
mod error;
mod handler;
mod method;
mod request;
mod response;
mod router;
mod server;
mod sink;
mod transport;

pub mod middleware;
pub mod sse;

pub use attributes::{AttributeKey, Attributes};
pub use context::Context;
pub use cookie::{Cookie, SameSite};
pub use error::{BoxError, Error};
pub use handler::Handler;
pub use method::Method;
pub use request::{FormData, Request};
pub use router::{RouteInfo, Router};
pub use server::{Server, ShutdownHandle};
pub use sink::{Flushable, Recorder, ResponseSink, SinkFuture};
pub use sse::SseWriter;
