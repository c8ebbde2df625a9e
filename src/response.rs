//! The [`Context`] response writer.
//!
//! Every `send_*` method is one complete response: headers, then the status
//! line, then the body. Calling two of them on the same request, or setting
//! headers after one, does not do what you want. The sink ignores the late
//! status and headers, but the second body is appended to the first. Keeping
//! to one response per request is the handler's job.
//!
//! A status of `0` means "the default": `200 OK` for the send methods,
//! `302 Found` for [`redirect`](Context::redirect), and
//! `500 Internal Server Error` for [`send_error_json`](Context::send_error_json).

use std::io;
use std::path::Path;

use http::header::{CONTENT_TYPE, LINK, LOCATION, SET_COOKIE, X_CONTENT_TYPE_OPTIONS};
use http::{HeaderName, HeaderValue, StatusCode};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{error, trace, warn};

use crate::context::Context;
use crate::cookie::Cookie;
use crate::error::Error;
use crate::middleware::clean_path::clean;

/// Body written by [`Context::send_json`] when the value cannot be encoded.
const JSON_ENCODE_FALLBACK: &str =
    r#"{"error":{"code":500,"message":"Internal Server Error. Could not encode JSON."}}"#;

const COPY_BUF_SIZE: usize = 8 * 1024;

fn status_or(code: u16, default: StatusCode) -> StatusCode {
    if code == 0 {
        return default;
    }
    StatusCode::from_u16(code).unwrap_or_else(|_| {
        warn!(code, "invalid status code, sending 500 instead");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

impl Context {
    // ── Headers & status ──────────────────────────────────────────────────────

    /// Appends a response header. Invalid names or values are dropped with a
    /// warning.
    pub fn write_header(&mut self, key: &str, value: &str) {
        let (Ok(name), Ok(value)) = (HeaderName::try_from(key), HeaderValue::try_from(value)) else {
            warn!(header = key, "dropping invalid response header");
            return;
        };
        match self.sink.as_mut() {
            Some(sink) => {
                sink.headers_mut().append(name, value);
            }
            None => trace!(header = key, "response closed, header dropped"),
        }
    }

    pub fn write_headers<'a, I>(&mut self, headers: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (key, value) in headers {
            self.write_header(key, value);
        }
    }

    /// Writes the status line. Call after every header is set.
    pub fn write_status(&mut self, code: u16) {
        let status = status_or(code, StatusCode::OK);
        match self.sink.as_mut() {
            Some(sink) => sink.write_status(status),
            None => trace!(code, "response closed, status dropped"),
        }
    }

    /// Adds a `Set-Cookie` header. Send a cookie with a negative
    /// [`max_age`](Cookie::max_age) to clear it.
    pub fn set_cookie(&mut self, cookie: &Cookie) {
        self.write_header(SET_COOKIE.as_str(), &cookie.to_string());
    }

    fn set_default_content_type(&mut self, value: &'static str) {
        if let Some(sink) = self.sink.as_mut() {
            sink.headers_mut()
                .entry(CONTENT_TYPE)
                .or_insert(HeaderValue::from_static(value));
        }
    }

    fn set_content_type(&mut self, value: &'static str) {
        if let Some(sink) = self.sink.as_mut() {
            sink.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(value));
        }
    }

    async fn send(&mut self, status: StatusCode, body: &[u8]) -> Result<(), Error> {
        let sink = self.sink_mut()?;
        sink.write_status(status);
        if !body.is_empty() {
            sink.write(body).await?;
        }
        Ok(())
    }

    // ── Bodies ────────────────────────────────────────────────────────────────

    pub async fn send_bytes(&mut self, data: &[u8], code: u16) -> Result<(), Error> {
        self.send(status_or(code, StatusCode::OK), data).await
    }

    /// Sends text. Sets `text/plain; charset=utf-8` unless a content type was
    /// already set.
    pub async fn send_string(&mut self, data: &str, code: u16) -> Result<(), Error> {
        self.set_default_content_type("text/plain; charset=utf-8");
        self.send(status_or(code, StatusCode::OK), data.as_bytes()).await
    }

    /// Sends `data` as `application/json`, followed by a newline.
    ///
    /// `None` sends the headers and status with an empty body. If encoding
    /// fails the status has already gone out, so a fixed JSON error object
    /// becomes the body and the encode error is returned.
    pub async fn send_json<T>(&mut self, data: Option<&T>, code: u16) -> Result<(), Error>
    where
        T: Serialize + ?Sized,
    {
        self.set_content_type("application/json");
        let sink = self.sink_mut()?;
        sink.write_status(status_or(code, StatusCode::OK));

        let Some(data) = data else {
            return Ok(());
        };
        match serde_json::to_vec(data) {
            Ok(mut body) => {
                body.push(b'\n');
                sink.write(&body).await?;
                Ok(())
            }
            Err(e) => {
                error!("could not encode JSON response: {e}");
                sink.write(JSON_ENCODE_FALLBACK.as_bytes()).await?;
                Err(Error::Json(e))
            }
        }
    }

    pub async fn send_html(&mut self, data: &str, code: u16) -> Result<(), Error> {
        self.set_content_type("text/html; charset=utf-8");
        self.send(status_or(code, StatusCode::OK), data.as_bytes()).await
    }

    /// `{"error":{"code":<code>,"message":<message>}}` with the same status.
    pub async fn send_error_json(&mut self, message: &str, code: u16) -> Result<(), Error> {
        let status = status_or(code, StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::json!({
            "error": {
                "code": status.as_u16(),
                "message": message,
            }
        });
        self.send_json(Some(&body), status.as_u16()).await
    }

    pub async fn no_content(&mut self) -> Result<(), Error> {
        self.send(StatusCode::NO_CONTENT, &[]).await
    }

    /// `404` with an `X-Error-Code: 404` header and no body.
    pub async fn not_found(&mut self) -> Result<(), Error> {
        self.write_header("x-error-code", "404");
        self.send(StatusCode::NOT_FOUND, &[]).await
    }

    /// Copies `stream` into the response.
    ///
    /// The stream is taken by value and dropped before this returns, whether
    /// the copy finished or failed part-way.
    pub async fn send_stream<R>(&mut self, mut stream: R, code: u16) -> Result<(), Error>
    where
        R: AsyncRead + Unpin + Send,
    {
        let sink = self.sink_mut()?;
        sink.write_status(status_or(code, StatusCode::OK));

        let mut buf = vec![0u8; COPY_BUF_SIZE];
        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            sink.write(&buf[..n]).await?;
        }
    }

    /// Serves a file from disk.
    ///
    /// A directory is served through its `index.html`. Missing files answer
    /// `404`, unreadable ones `403`, anything else `500`, each with a short
    /// plain-text body.
    pub async fn send_file(&mut self, path: impl AsRef<Path>) -> Result<(), Error> {
        let mut path = path.as_ref().to_path_buf();
        if tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_dir()) {
            path.push("index.html");
        }

        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) => return self.send_file_error(&path, e).await,
        };

        self.set_default_content_type(content_type_for(&path));
        self.send_stream(file, 0).await
    }

    async fn send_file_error(&mut self, path: &Path, e: io::Error) -> Result<(), Error> {
        let (status, message) = match e.kind() {
            io::ErrorKind::NotFound => (StatusCode::NOT_FOUND, "404 page not found"),
            io::ErrorKind::PermissionDenied => (StatusCode::FORBIDDEN, "403 Forbidden"),
            _ => {
                error!(path = %path.display(), "could not open file: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "500 Internal Server Error")
            }
        };
        self.plain_error(status, message).await
    }

    /// Plain-text error body with `nosniff` set.
    pub(crate) async fn plain_error(&mut self, status: StatusCode, message: &str) -> Result<(), Error> {
        self.set_content_type("text/plain; charset=utf-8");
        if let Some(sink) = self.sink.as_mut() {
            sink.headers_mut()
                .insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
        }
        self.send(status, format!("{message}\n").as_bytes()).await
    }

    // ── Redirects & hints ─────────────────────────────────────────────────────

    /// Redirects to `url`.
    ///
    /// A relative `url` is resolved against the current request path. Unless
    /// a content type was already set, GET and HEAD responses are marked as
    /// HTML and GET also gets a tiny body linking to the target.
    pub async fn redirect(&mut self, url: &str, code: u16) -> Result<(), Error> {
        let status = status_or(code, StatusCode::FOUND);
        let location = resolve_location(self.path(), url);
        let is_get = self.method() == "GET";
        let is_get_or_head = is_get || self.method() == "HEAD";

        let sink = self.sink_mut()?;
        let had_content_type = sink.headers_mut().contains_key(CONTENT_TYPE);
        match HeaderValue::try_from(location.as_str()) {
            Ok(value) => {
                sink.headers_mut().insert(LOCATION, value);
            }
            Err(_) => warn!(url, "redirect target is not a valid header value"),
        }

        if is_get_or_head && !had_content_type {
            sink.headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
        }
        if is_get && !had_content_type {
            let body = format!(
                "<a href=\"{}\">{}</a>.\n",
                html_escape(&location),
                status.canonical_reason().unwrap_or(""),
            );
            sink.write_status(status);
            sink.write(body.as_bytes()).await?;
            return Ok(());
        }

        sink.write_status(status);
        Ok(())
    }

    /// Early hint for a script: `Link: </path>; rel=preload; as=script`
    /// followed by `103 Early Hints`. Send the real response afterwards.
    pub fn write_early_hint_script(&mut self, path: &str) {
        self.write_early_hint(path, "script");
    }

    /// Early hint for a stylesheet. See
    /// [`write_early_hint_script`](Self::write_early_hint_script).
    pub fn write_early_hint_style(&mut self, path: &str) {
        self.write_early_hint(path, "style");
    }

    fn write_early_hint(&mut self, path: &str, kind: &str) {
        let link = format!("</{}>; rel=preload; as={kind}", path.trim_start_matches('/'));
        self.write_header(LINK.as_str(), &link);
        self.write_status(StatusCode::EARLY_HINTS.as_u16());
    }

    // ── Shortcuts ─────────────────────────────────────────────────────────────

    /// [`send_bytes`](Self::send_bytes) with the default status.
    pub async fn sb(&mut self, data: &[u8]) -> Result<(), Error> {
        self.send_bytes(data, 0).await
    }

    /// [`send_string`](Self::send_string) with the default status.
    pub async fn ss(&mut self, data: &str) -> Result<(), Error> {
        self.send_string(data, 0).await
    }

    /// [`send_json`](Self::send_json) with the default status.
    pub async fn sj<T: Serialize + ?Sized>(&mut self, data: &T) -> Result<(), Error> {
        self.send_json(Some(data), 0).await
    }
}

/// Makes a relative redirect target absolute against `current`, keeping any
/// query string and a trailing slash.
fn resolve_location(current: &str, url: &str) -> String {
    let has_scheme = url
        .split_once(':')
        .is_some_and(|(scheme, _)| !scheme.is_empty() && !scheme.contains('/'));
    if has_scheme || url.starts_with("//") {
        return url.to_owned();
    }

    let (path, query) = match url.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (url, None),
    };

    let mut path = if path.starts_with('/') {
        path.to_owned()
    } else {
        let dir = current.rfind('/').map_or("/", |i| &current[..=i]);
        format!("{dir}{path}")
    };

    let trailing = path.ends_with('/') && path.len() > 1;
    path = clean(&path);
    if trailing && !path.ends_with('/') {
        path.push('/');
    }

    match query {
        Some(q) => format!("{path}?{q}"),
        None => path,
    }
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css"          => "text/css; charset=utf-8",
        "js" | "mjs"   => "text/javascript; charset=utf-8",
        "json"         => "application/json",
        "txt"          => "text/plain; charset=utf-8",
        "csv"          => "text/csv; charset=utf-8",
        "xml"          => "text/xml; charset=utf-8",
        "svg"          => "image/svg+xml",
        "png"          => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif"          => "image/gif",
        "webp"         => "image/webp",
        "ico"          => "image/x-icon",
        "pdf"          => "application/pdf",
        "wasm"         => "application/wasm",
        "woff2"        => "font/woff2",
        _              => "application/octet-stream",
    }
}
