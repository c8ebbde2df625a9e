//! Request logging.
//!
//! One `info` event per request, emitted after the handler returns, with the
//! method, path, final status and elapsed time as structured fields. The
//! message is a one-line summary, coloured when the terminal supports it:
//!
//! ```text
//! GET /users/42 200 1.204ms
//! ```
//!
//! Colour support is not probed per request. Decide it once at startup with
//! [`Terminal::detect`] and hand the result to [`Logger::new`].

use std::io::IsTerminal;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use http::{HeaderMap, StatusCode};
use tracing::info;

use super::{Middleware, from_fn};
use crate::sink::{Flushable, ResponseSink, SinkFuture};

const RESET: &str = "\x1b[0m";
const MAGENTA: &str = "\x1b[35m";
const GREEN: &str = "\x1b[32m";
const CYAN: &str = "\x1b[36m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";

/// What the log output can render.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Terminal {
    color: bool,
}

impl Terminal {
    /// Colour when stderr is a terminal and `NO_COLOR` is unset.
    pub fn detect() -> Self {
        let color = std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none();
        Self { color }
    }

    pub const fn plain() -> Self {
        Self { color: false }
    }

    pub const fn colored() -> Self {
        Self { color: true }
    }

    pub fn is_colored(&self) -> bool {
        self.color
    }

    fn paint(&self, color: &str, text: &str) -> String {
        if self.color {
            format!("{color}{text}{RESET}")
        } else {
            text.to_owned()
        }
    }
}

/// Logs every request that passes through it.
#[derive(Clone, Copy, Debug, Default)]
pub struct Logger {
    terminal: Terminal,
}

impl Logger {
    pub fn new(terminal: Terminal) -> Self {
        Self { terminal }
    }

    fn summary(&self, method: &str, path: &str, status: u16, elapsed: Duration) -> String {
        let status_color = match status {
            200..=299 => GREEN,
            300..=399 => CYAN,
            400..=499 => YELLOW,
            _ => RED,
        };
        format!(
            "{} {} {} {:?}",
            self.terminal.paint(MAGENTA, method),
            path,
            self.terminal.paint(status_color, &status.to_string()),
            elapsed,
        )
    }
}

impl From<Logger> for Middleware {
    fn from(logger: Logger) -> Self {
        from_fn(move |mut ctx, next| async move {
            let start = Instant::now();
            let method = ctx.method().to_owned();
            let path = ctx.path().to_owned();
            let status = Arc::new(AtomicU16::new(0));

            let captured = Arc::clone(&status);
            ctx.map_sink(move |inner| Box::new(StatusCapture { inner, status: captured }));
            next.run(ctx).await;

            let elapsed = start.elapsed();
            // Nothing written at all still goes out as 200.
            let status = match status.load(Ordering::Relaxed) {
                0 => StatusCode::OK.as_u16(),
                code => code,
            };
            info!(
                method = %method,
                path = %path,
                status,
                elapsed = ?elapsed,
                "{}",
                logger.summary(&method, &path, status, elapsed)
            );
        })
    }
}

/// Passes writes through and remembers the first final status.
struct StatusCapture {
    inner: Box<dyn ResponseSink>,
    status: Arc<AtomicU16>,
}

impl StatusCapture {
    /// `true` if this call set the status.
    fn capture(&self, status: StatusCode) -> bool {
        self.status
            .compare_exchange(0, status.as_u16(), Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }
}

impl ResponseSink for StatusCapture {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn write_status(&mut self, status: StatusCode) {
        if status.is_informational() || self.capture(status) {
            self.inner.write_status(status);
        }
    }

    fn write<'a>(&'a mut self, data: &'a [u8]) -> SinkFuture<'a> {
        self.capture(StatusCode::OK);
        self.inner.write(data)
    }

    fn as_flushable(&mut self) -> Option<&mut dyn Flushable> {
        if self.inner.as_flushable().is_some() { Some(self) } else { None }
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl Flushable for StatusCapture {
    fn flush(&mut self) -> SinkFuture<'_> {
        self.capture(StatusCode::OK);
        match self.inner.as_flushable() {
            Some(flusher) => flusher.flush(),
            None => Box::pin(std::future::ready(Ok(()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::handler::Handler;
    use crate::middleware::compose;
    use crate::request::Request;
    use crate::sink::Recorder;

    fn capture(rec: &Recorder) -> (StatusCapture, Arc<AtomicU16>) {
        let status = Arc::new(AtomicU16::new(0));
        (StatusCapture { inner: rec.sink(), status: Arc::clone(&status) }, status)
    }

    #[test]
    fn first_final_status_wins() {
        let rec = Recorder::new();
        let (mut sink, status) = capture(&rec);
        sink.write_status(StatusCode::EARLY_HINTS);
        sink.write_status(StatusCode::CREATED);
        sink.write_status(StatusCode::INTERNAL_SERVER_ERROR);
        drop(sink);

        assert_eq!(status.load(Ordering::Relaxed), 201);
        assert_eq!(rec.status(), Some(201));
        assert_eq!(rec.informational(), [103]);
    }

    #[tokio::test]
    async fn body_write_implies_ok() {
        let rec = Recorder::new();
        let (mut sink, status) = capture(&rec);
        sink.write(b"hi").await.unwrap();
        sink.write_status(StatusCode::NOT_FOUND);

        assert_eq!(status.load(Ordering::Relaxed), 200);
    }

    #[test]
    fn flush_capability_follows_inner_sink() {
        let flushable = Recorder::new();
        assert!(capture(&flushable).0.as_flushable().is_some());

        let plain = Recorder::unflushable();
        assert!(capture(&plain).0.as_flushable().is_none());
    }

    #[test]
    fn summary_colours() {
        let elapsed = Duration::from_millis(3);
        assert_eq!(Logger::new(Terminal::plain()).summary("GET", "/a", 200, elapsed), "GET /a 200 3ms");
        assert_eq!(
            Logger::new(Terminal::colored()).summary("POST", "/b", 404, elapsed),
            "\x1b[35mPOST\x1b[0m /b \x1b[33m404\x1b[0m 3ms"
        );
        assert!(Logger::new(Terminal::colored()).summary("GET", "/", 503, elapsed).contains("\x1b[31m503"));
    }

    #[tokio::test]
    async fn handler_sees_response_through_logger() {
        let rec = Recorder::new();
        let handler = (|mut ctx: Context| async move {
            let _ = ctx.send_string("made", 201).await;
        })
        .into_boxed_handler();
        let req = http::Request::post("/things").body(http_body_util::Empty::<bytes::Bytes>::new()).unwrap();

        compose(&[Logger::new(Terminal::plain()).into()], handler)
            .call(Context::new(Request::new(req), rec.sink()))
            .await;

        assert_eq!(rec.status(), Some(201));
        assert_eq!(rec.body_string(), "made");
    }
}
