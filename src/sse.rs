//! Server-Sent Events.
//!
//! [`Context::sse`] turns a request into an event stream: it sends the
//! `text/event-stream` head, flushes it so the client sees the connection
//! open, then hands an [`SseWriter`] to your callback. Every frame the writer
//! emits is flushed before the call returns.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use si::Context;
//!
//! async fn ticks(mut ctx: Context) {
//!     let _ = ctx.sse(|mut sse| async move {
//!         sse.retry(3_000).await?;
//!         for n in 0.. {
//!             if sse.is_closed() {
//!                 break;
//!             }
//!             sse.id(&n.to_string()).await?;
//!             sse.event("tick", &format!("{n}")).await?;
//!             tokio::time::sleep(Duration::from_secs(1)).await;
//!         }
//!         Ok::<_, si::Error>(())
//!     }).await;
//! }
//! ```
//!
//! The writer has no timeouts and does not watch the connection. A callback
//! that produces events forever must check [`SseWriter::is_closed`] (or stop
//! on the first write error) to notice that the client left.

use std::future::Future;

use http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use http::{HeaderValue, StatusCode};
use serde::Serialize;
use tracing::debug;

use crate::context::Context;
use crate::error::Error;
use crate::sink::ResponseSink;

/// Writes SSE frames to a streaming response.
///
/// Owns the response sink for as long as the callback given to
/// [`Context::sse`] runs. Dropping it ends the response.
pub struct SseWriter {
    sink: Box<dyn ResponseSink>,
}

impl SseWriter {
    /// `event: <name>` (skipped when `name` is empty), one `data:` line per
    /// line of `data`, then a blank line.
    pub async fn event(&mut self, name: &str, data: &str) -> Result<(), Error> {
        self.emit(encode_event(name, data)).await
    }

    /// An unnamed event.
    pub async fn data(&mut self, data: &str) -> Result<(), Error> {
        self.event("", data).await
    }

    /// A named event whose data is `value` encoded as JSON. Nothing is
    /// written if encoding fails.
    pub async fn json<T: Serialize + ?Sized>(&mut self, name: &str, value: &T) -> Result<(), Error> {
        let data = serde_json::to_string(value)?;
        self.event(name, &data).await
    }

    /// `id: <id>`. Browsers send the last id back as `Last-Event-ID` when
    /// they reconnect.
    pub async fn id(&mut self, id: &str) -> Result<(), Error> {
        self.emit(format!("id: {id}\n")).await
    }

    /// `retry: <ms>`, the client's reconnection delay.
    pub async fn retry(&mut self, ms: u64) -> Result<(), Error> {
        self.emit(format!("retry: {ms}\n\n")).await
    }

    /// `: <text>`. Clients ignore comments, which makes them a cheap
    /// keep-alive.
    pub async fn comment(&mut self, text: &str) -> Result<(), Error> {
        self.emit(format!(": {text}\n\n")).await
    }

    /// `true` once the client is known to be gone.
    pub fn is_closed(&self) -> bool {
        self.sink.is_closed()
    }

    async fn emit(&mut self, frame: String) -> Result<(), Error> {
        self.sink.write(frame.as_bytes()).await?;
        match self.sink.as_flushable() {
            Some(flusher) => Ok(flusher.flush().await?),
            None => Err(Error::StreamingUnsupported),
        }
    }
}

fn encode_event(name: &str, data: &str) -> String {
    let mut frame = String::with_capacity(name.len() + data.len() + 16);
    if !name.is_empty() {
        frame.push_str("event: ");
        frame.push_str(name);
        frame.push('\n');
    }
    for line in data.split('\n') {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
    frame.push('\n');
    frame
}

impl Context {
    /// Upgrades the response to an event stream and runs `f` with the writer.
    ///
    /// If the response sink cannot flush, a plain-text
    /// `500 streaming not supported` is sent instead, `f` is never called, and
    /// [`Error::StreamingUnsupported`] is returned. Once `f` finishes the
    /// response is over: later writes through this context return
    /// [`Error::ResponseClosed`].
    pub async fn sse<F, Fut, R>(&mut self, f: F) -> Result<R, Error>
    where
        F: FnOnce(SseWriter) -> Fut,
        Fut: Future<Output = R>,
    {
        let sink = self.sink_mut()?;
        if sink.as_flushable().is_none() {
            self.plain_error(StatusCode::INTERNAL_SERVER_ERROR, "streaming not supported").await?;
            return Err(Error::StreamingUnsupported);
        }

        let Some(mut sink) = self.sink.take() else {
            return Err(Error::ResponseClosed);
        };
        let headers = sink.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        sink.write_status(StatusCode::OK);
        if let Some(flusher) = sink.as_flushable() {
            flusher.flush().await?;
        }

        debug!(path = self.path(), "event stream opened");
        let out = f(SseWriter { sink }).await;
        debug!(path = self.path(), "event stream closed");
        Ok(out)
    }
}
