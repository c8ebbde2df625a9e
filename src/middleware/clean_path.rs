//! Path normalisation before routing.

use http::Uri;
use http::uri::PathAndQuery;
use tracing::trace;

use super::{Middleware, before};

/// Rewrites the request path to its shortest equivalent before the router
/// sees it: `//` collapses, `.` segments vanish, `..` removes the segment
/// before it. `/users//1/../2/` is routed as `/users/2`.
///
/// The query string is kept. Register it as router-level middleware so the
/// route lookup uses the cleaned path.
pub fn clean_path() -> Middleware {
    before(|ctx| {
        let uri = ctx.request().uri();
        let cleaned = clean(uri.path());
        if cleaned == uri.path() {
            return;
        }
        let new = match uri.query() {
            Some(q) => format!("{cleaned}?{q}"),
            None => cleaned,
        };
        let Ok(pq) = PathAndQuery::try_from(new) else {
            return;
        };
        let mut parts = uri.clone().into_parts();
        parts.path_and_query = Some(pq);
        if let Ok(rewritten) = Uri::from_parts(parts) {
            trace!(from = ctx.request().uri().path(), to = rewritten.path(), "cleaned request path");
            ctx.request_mut().set_uri(rewritten);
        }
    })
}

/// Lexical path cleaning.
///
/// Rooted paths stay rooted and never climb above `/`; a trailing slash is
/// dropped. A relative path that cleans to nothing becomes `.`.
pub(crate) fn clean(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|&last| last != "..") {
                    segments.pop();
                } else if !rooted {
                    segments.push("..");
                }
            }
            s => segments.push(s),
        }
    }

    let joined = segments.join("/");
    if rooted {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_owned()
    } else {
        joined
    }
}
