//! Request IDs.

use http::HeaderValue;
use uuid::Uuid;

use super::{Middleware, before};
use crate::attributes::AttributeKey;

/// Header read from the request and echoed on the response.
pub const HEADER: &str = "x-request-id";

/// The request's id, for handlers and inner middleware.
pub const REQUEST_ID: AttributeKey<String> = AttributeKey::new("request_id");

/// Tags every request with an id.
///
/// An incoming `X-Request-Id` is kept as is; otherwise a fresh UUID v4 (32
/// hex digits, no dashes) is generated. The id is stored under
/// [`REQUEST_ID`] and sent back in the response's `X-Request-Id`.
pub fn request_id() -> Middleware {
    before(|ctx| {
        let id = match ctx.header_string(HEADER) {
            "" => Uuid::new_v4().simple().to_string(),
            existing => existing.to_owned(),
        };
        if let Ok(value) = HeaderValue::from_str(&id) {
            ctx.request_mut().headers_mut().insert(HEADER, value.clone());
            if let Ok(sink) = ctx.sink_mut() {
                sink.headers_mut().insert(HEADER, value);
            }
        }
        ctx.set_attribute(&REQUEST_ID, id);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::handler::Handler;
    use crate::middleware::compose;
    use crate::request::Request;
    use crate::sink::Recorder;

    async fn run(req: http::Request<http_body_util::Empty<bytes::Bytes>>) -> Recorder {
        let rec = Recorder::new();
        let handler = (|mut ctx: Context| async move {
            let id = ctx.get_attribute(&REQUEST_ID).cloned().unwrap_or_default();
            let _ = ctx.ss(&id).await;
        })
        .into_boxed_handler();
        compose(&[request_id()], handler)
            .call(Context::new(Request::new(req), rec.sink()))
            .await;
        rec
    }

    #[tokio::test]
    async fn keeps_incoming_id() {
        let req = http::Request::get("/")
            .header("X-Request-Id", "abc-123")
            .body(http_body_util::Empty::new())
            .unwrap();
        let rec = run(req).await;

        assert_eq!(rec.body_string(), "abc-123");
        assert_eq!(rec.header("x-request-id").as_deref(), Some("abc-123"));
    }

    #[tokio::test]
    async fn generates_missing_id() {
        let req = http::Request::get("/").body(http_body_util::Empty::new()).unwrap();
        let rec = run(req).await;

        let id = rec.body_string();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(rec.header("x-request-id"), Some(id));
    }
}
