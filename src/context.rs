//! The per-request handle.
//!
//! A [`Context`] is created once per request, before router-level
//! middleware runs, and is passed by value down the middleware chain into
//! the handler. Whoever holds it owns the request: there is no way to share
//! one between tasks, and nothing keeps it alive once the handler returns.
//!
//! It bundles three things:
//!
//! - the inbound [`Request`], read through the accessor methods on
//!   `Context` (`header_string`, `query_int`, `json_body`, ...);
//! - the outbound [`ResponseSink`], written through the send methods
//!   (`send_json`, `redirect`, ...) or handed to an SSE stream;
//! - the request's [`Attributes`].

use std::fmt;

use crate::attributes::{AttributeKey, Attributes};
use crate::error::Error;
use crate::request::Request;
use crate::sink::ResponseSink;

pub struct Context {
    pub(crate) request: Request,
    /// `None` once the sink has been handed to an event stream.
    pub(crate) sink: Option<Box<dyn ResponseSink>>,
    attributes: Attributes,
}

impl Context {
    pub fn new(request: Request, sink: Box<dyn ResponseSink>) -> Self {
        Self { request, sink: Some(sink), attributes: Attributes::default() }
    }

    /// The inbound request.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The inbound request, for middleware that rewrites it.
    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    // ── Attributes ────────────────────────────────────────────────────────────

    /// Returns the value bound to `key` by this context or any middleware
    /// that handed it down.
    pub fn get_attribute<T: Send + Sync + 'static>(&self, key: &AttributeKey<T>) -> Option<&T> {
        self.attributes.get(key)
    }

    /// Binds `key` to `value` for everything this context is handed to from
    /// now on. Snapshots taken earlier with [`attributes`](Self::attributes)
    /// keep their old view.
    pub fn set_attribute<T: Send + Sync + 'static>(&mut self, key: &AttributeKey<T>, value: T) {
        self.attributes.insert(key, value);
    }

    /// Builder form of [`set_attribute`](Self::set_attribute).
    pub fn with_attribute<T: Send + Sync + 'static>(mut self, key: &AttributeKey<T>, value: T) -> Self {
        self.set_attribute(key, value);
        self
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    // ── Sink plumbing ─────────────────────────────────────────────────────────

    /// Replaces the response sink with a wrapper around it.
    ///
    /// This is how middleware observes what inner handlers write, e.g. the
    /// request logger capturing the status code.
    pub fn map_sink<F>(&mut self, f: F)
    where
        F: FnOnce(Box<dyn ResponseSink>) -> Box<dyn ResponseSink>,
    {
        if let Some(sink) = self.sink.take() {
            self.sink = Some(f(sink));
        }
    }

    /// `true` once the peer is known to have gone away.
    pub fn is_disconnected(&self) -> bool {
        self.sink.as_ref().is_none_or(|sink| sink.is_closed())
    }

    pub(crate) fn sink_mut(&mut self) -> Result<&mut dyn ResponseSink, Error> {
        match self.sink.as_mut() {
            Some(sink) => Ok(sink.as_mut()),
            None => Err(Error::ResponseClosed),
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("method", self.request.method())
            .field("uri", self.request.uri())
            .field("attributes", &self.attributes)
            .field("streaming", &self.sink.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::Recorder;

    const TENANT: AttributeKey<String> = AttributeKey::new("tenant");

    fn ctx() -> Context {
        let req = http::Request::new(http_body_util::Empty::<bytes::Bytes>::new());
        Context::new(Request::new(req), Recorder::new().sink())
    }

    #[test]
    fn attributes_flow_to_later_holders() {
        let ctx = ctx().with_attribute(&TENANT, "acme".to_owned());
        assert_eq!(ctx.get_attribute(&TENANT).map(String::as_str), Some("acme"));
    }

    #[test]
    fn earlier_snapshot_keeps_its_view() {
        let mut ctx = ctx();
        ctx.set_attribute(&TENANT, "a".to_owned());
        let before = ctx.attributes().clone();
        ctx.set_attribute(&TENANT, "b".to_owned());

        assert_eq!(before.get(&TENANT).map(String::as_str), Some("a"));
        assert_eq!(ctx.get_attribute(&TENANT).map(String::as_str), Some("b"));
    }

    #[test]
    fn disconnected_sink_is_visible() {
        let req = http::Request::new(http_body_util::Empty::<bytes::Bytes>::new());
        let ctx = Context::new(Request::new(req), Recorder::disconnected().sink());
        assert!(ctx.is_disconnected());
    }
}
