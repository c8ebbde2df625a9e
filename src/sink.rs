//! Response sinks.
//!
//! A [`ResponseSink`] is where a [`Context`](crate::Context) writes its
//! response: a header map, a one-shot status line and a byte stream. The
//! server plugs in a hyper-backed sink; tests plug in a [`Recorder`].
//!
//! Flushing is a separate capability. A sink that can push buffered bytes to
//! the peer on demand hands out a [`Flushable`] from
//! [`ResponseSink::as_flushable`]; one that cannot returns `None`, and
//! anything that needs incremental delivery (SSE) refuses to start.

use std::future::{Future, ready};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use http::{HeaderMap, StatusCode};

/// Future returned by sink writes and flushes.
pub type SinkFuture<'a> = Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>>;

/// Outbound half of a request.
///
/// The contract mirrors a raw HTTP/1.1 writer:
///
/// - headers are collected until the first final status (or the first body
///   write, which implies `200 OK`) commits them; later edits are ignored;
/// - a second final status is ignored;
/// - informational statuses (`1xx`) do not commit anything.
///
/// Callers own the ordering. Nothing here defends against writing a body
/// before setting headers.
pub trait ResponseSink: Send + Sync {
    fn headers_mut(&mut self) -> &mut HeaderMap;

    fn write_status(&mut self, status: StatusCode);

    fn write<'a>(&'a mut self, data: &'a [u8]) -> SinkFuture<'a>;

    /// The flush capability, when this sink has one.
    fn as_flushable(&mut self) -> Option<&mut dyn Flushable> {
        None
    }

    /// `true` once the peer is known to be gone.
    fn is_closed(&self) -> bool {
        false
    }
}

/// Forces buffered response bytes out to the peer.
pub trait Flushable: Send {
    fn flush(&mut self) -> SinkFuture<'_>;
}

// ── Recorder ──────────────────────────────────────────────────────────────────

/// In-memory response sink for tests.
///
/// Hand [`Recorder::sink`] to a [`Context`](crate::Context) and keep the
/// `Recorder` to inspect what was written:
///
/// ```rust
/// # #[tokio::main(flavor = "current_thread")] async fn main() {
/// use si::{Context, Recorder, Request};
///
/// let rec = Recorder::new();
/// let req = Request::new(http::Request::new(http_body_util::Empty::<bytes::Bytes>::new()));
/// let mut ctx = Context::new(req, rec.sink());
///
/// ctx.send_string("hello", 0).await.unwrap();
///
/// assert_eq!(rec.status(), Some(200));
/// assert_eq!(rec.body_string(), "hello");
/// # }
/// ```
#[derive(Clone)]
pub struct Recorder {
    state: Arc<Mutex<Recorded>>,
    flushable: bool,
    /// Body writes allowed before the peer "hangs up". `None` is unlimited.
    writes: Option<usize>,
}

#[derive(Default)]
struct Recorded {
    status: Option<StatusCode>,
    informational: Vec<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
    flushes: usize,
}

impl Recorder {
    /// A flushable recorder, like a real connection.
    pub fn new() -> Self {
        Self { state: Arc::default(), flushable: true, writes: None }
    }

    /// A recorder whose sinks have no flush capability.
    pub fn unflushable() -> Self {
        Self { flushable: false, ..Self::new() }
    }

    /// A recorder whose sinks behave as if the peer hung up: every write and
    /// flush fails with `BrokenPipe`.
    pub fn disconnected() -> Self {
        Self::fails_after(0)
    }

    /// A recorder whose sinks accept `writes` body writes, then behave like
    /// [`disconnected`](Self::disconnected) ones.
    pub fn fails_after(writes: usize) -> Self {
        Self { writes: Some(writes), ..Self::new() }
    }

    /// A fresh sink writing into this recorder.
    pub fn sink(&self) -> Box<dyn ResponseSink> {
        Box::new(RecorderSink {
            state: Arc::clone(&self.state),
            headers: HeaderMap::new(),
            committed: false,
            flushable: self.flushable,
            writes: self.writes,
        })
    }

    /// The committed final status.
    pub fn status(&self) -> Option<u16> {
        self.lock().status.map(|s| s.as_u16())
    }

    /// Every informational status written, in order.
    pub fn informational(&self) -> Vec<u16> {
        self.lock().informational.iter().map(|s| s.as_u16()).collect()
    }

    /// First value of a committed header.
    pub fn header(&self, name: &str) -> Option<String> {
        self.lock()
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }

    /// Every committed header.
    pub fn headers(&self) -> HeaderMap {
        self.lock().headers.clone()
    }

    pub fn body(&self) -> Vec<u8> {
        self.lock().body.clone()
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.lock().body).into_owned()
    }

    pub fn flushes(&self) -> usize {
        self.lock().flushes
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Recorder {
    fn default() -> Self { Self::new() }
}

struct RecorderSink {
    state: Arc<Mutex<Recorded>>,
    headers: HeaderMap,
    committed: bool,
    flushable: bool,
    writes: Option<usize>,
}

impl RecorderSink {
    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn commit(&mut self, status: StatusCode) {
        if self.committed {
            return;
        }
        self.committed = true;
        let headers = self.headers.clone();
        let mut state = self.lock();
        state.status = Some(status);
        state.headers = headers;
    }

    fn hung_up(&self) -> bool {
        self.writes == Some(0)
    }

    fn broken_pipe() -> io::Error {
        io::Error::new(io::ErrorKind::BrokenPipe, "peer disconnected")
    }
}

impl ResponseSink for RecorderSink {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_status(&mut self, status: StatusCode) {
        if status.is_informational() {
            self.lock().informational.push(status);
        } else {
            self.commit(status);
        }
    }

    fn write<'a>(&'a mut self, data: &'a [u8]) -> SinkFuture<'a> {
        if self.hung_up() {
            return Box::pin(ready(Err(Self::broken_pipe())));
        }
        if let Some(left) = self.writes.as_mut() {
            *left -= 1;
        }
        self.commit(StatusCode::OK);
        self.lock().body.extend_from_slice(data);
        Box::pin(ready(Ok(())))
    }

    fn as_flushable(&mut self) -> Option<&mut dyn Flushable> {
        if self.flushable { Some(self) } else { None }
    }

    fn is_closed(&self) -> bool {
        self.hung_up()
    }
}

impl Flushable for RecorderSink {
    fn flush(&mut self) -> SinkFuture<'_> {
        if self.hung_up() {
            return Box::pin(ready(Err(Self::broken_pipe())));
        }
        self.commit(StatusCode::OK);
        self.lock().flushes += 1;
        Box::pin(ready(Ok(())))
    }
}

impl Drop for RecorderSink {
    // A handler that never wrote anything still produced a 200.
    fn drop(&mut self) {
        self.commit(StatusCode::OK);
    }
}
