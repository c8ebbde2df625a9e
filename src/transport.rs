//! The hyper-facing response sink.
//!
//! hyper wants a finished `http::Response` returned from the service, while
//! handlers want to write headers, a status and body bytes in sequence. The
//! bridge is a oneshot for the response head and a bounded channel for the
//! body: the head is sent the moment the handler commits a status, and body
//! chunks follow through the channel for as long as the handler writes.
//!
//! ```text
//! handler task                         hyper connection task
//! ─────────────                        ─────────────────────
//! write_status(200) ── head ─────────► service future resolves
//! write(..)/flush() ── chunk ────────► ChannelBody::poll_frame
//! drop(sink)        ── tail, close ──► end of body
//! ```

use std::convert::Infallible;
use std::io;
use std::mem;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use hyper::body::{Body, Frame};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::sink::{Flushable, ResponseSink, SinkFuture};

/// Buffered bytes are pushed to the connection once they reach this size,
/// flush or no flush.
const FLUSH_THRESHOLD: usize = 8 * 1024;

/// Chunks in flight between a handler and its connection.
const CHANNEL_CAPACITY: usize = 16;

pub(crate) type HeadReceiver = oneshot::Receiver<http::Response<ChannelBody>>;

// ── ChannelBody ───────────────────────────────────────────────────────────────

/// Response body fed by a [`HyperSink`]. Ends when the sink is dropped.
pub(crate) struct ChannelBody {
    rx: mpsc::Receiver<Bytes>,
}

impl ChannelBody {
    /// A body that ends immediately.
    pub(crate) fn empty() -> Self {
        let (_, rx) = mpsc::channel(1);
        Self { rx }
    }
}

impl Body for ChannelBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        self.rx.poll_recv(cx).map(|chunk| chunk.map(|bytes| Ok(Frame::data(bytes))))
    }
}

// ── HyperSink ─────────────────────────────────────────────────────────────────

pub(crate) struct HyperSink {
    headers: HeaderMap,
    /// Present until the head is committed.
    head: Option<(oneshot::Sender<http::Response<ChannelBody>>, mpsc::Receiver<Bytes>)>,
    tx: mpsc::Sender<Bytes>,
    buf: BytesMut,
}

impl HyperSink {
    pub(crate) fn new() -> (Self, HeadReceiver) {
        let (head_tx, head_rx) = oneshot::channel();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let sink = Self {
            headers: HeaderMap::new(),
            head: Some((head_tx, rx)),
            tx,
            buf: BytesMut::new(),
        };
        (sink, head_rx)
    }

    fn commit(&mut self, status: StatusCode) {
        let Some((head, rx)) = self.head.take() else {
            return;
        };
        let mut res = http::Response::new(ChannelBody { rx });
        *res.status_mut() = status;
        *res.headers_mut() = mem::take(&mut self.headers);
        if head.send(res).is_err() {
            debug!(status = status.as_u16(), "peer gone before response head was sent");
        }
    }

    async fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = self.buf.split().freeze();
        self.tx.send(chunk).await.map_err(|_| disconnected())
    }
}

fn disconnected() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "peer disconnected")
}

impl ResponseSink for HyperSink {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_status(&mut self, status: StatusCode) {
        if status.is_informational() {
            // hyper cannot emit interim responses from a service; headers set
            // for the hint stay in the map and ride on the final response.
            trace!(status = status.as_u16(), "informational status folded into final response");
            return;
        }
        if self.head.is_none() {
            debug!(status = status.as_u16(), "superfluous write_status call");
            return;
        }
        self.commit(status);
    }

    fn write<'a>(&'a mut self, data: &'a [u8]) -> SinkFuture<'a> {
        Box::pin(async move {
            self.commit(StatusCode::OK);
            if self.tx.is_closed() {
                return Err(disconnected());
            }
            self.buf.extend_from_slice(data);
            if self.buf.len() >= FLUSH_THRESHOLD {
                self.send_buffered().await?;
            }
            Ok(())
        })
    }

    fn as_flushable(&mut self) -> Option<&mut dyn Flushable> {
        Some(self)
    }

    fn is_closed(&self) -> bool {
        self.head.is_none() && self.tx.is_closed()
    }
}

impl Flushable for HyperSink {
    fn flush(&mut self) -> SinkFuture<'_> {
        Box::pin(async move {
            self.commit(StatusCode::OK);
            self.send_buffered().await
        })
    }
}

impl Drop for HyperSink {
    fn drop(&mut self) {
        // Dropped during unwinding means the handler panicked.
        if std::thread::panicking() {
            self.commit(StatusCode::INTERNAL_SERVER_ERROR);
        } else {
            self.commit(StatusCode::OK);
        }

        if self.buf.is_empty() {
            return;
        }
        let tail = self.buf.split().freeze();
        if let Err(TrySendError::Full(tail)) = self.tx.try_send(tail) {
            // The channel closes once this last sender is gone, after the tail.
            if let Ok(rt) = tokio::runtime::Handle::try_current() {
                let tx = self.tx.clone();
                rt.spawn(async move {
                    let _ = tx.send(tail).await;
                });
            }
        }
    }
}
