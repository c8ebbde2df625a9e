//! Cookies: reading the `Cookie` request header and building `Set-Cookie`.
//!
//! ```rust
//! use si::{Cookie, SameSite};
//!
//! let session = Cookie::new("session", "abc123")
//!     .path("/")
//!     .http_only(true)
//!     .secure(true)
//!     .same_site(SameSite::Lax)
//!     .max_age(3600);
//!
//! assert_eq!(
//!     session.to_string(),
//!     "session=abc123; Path=/; Max-Age=3600; HttpOnly; Secure; SameSite=Lax",
//! );
//! ```

use std::fmt;

/// `SameSite` attribute values.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "Strict",
            Self::Lax    => "Lax",
            Self::None   => "None",
        }
    }
}

/// A cookie to send with [`Context::set_cookie`](crate::Context::set_cookie).
#[derive(Clone, Debug)]
pub struct Cookie {
    name: String,
    value: String,
    path: Option<String>,
    domain: Option<String>,
    max_age: i64,
    http_only: bool,
    secure: bool,
    same_site: Option<SameSite>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: None,
            domain: None,
            max_age: 0,
            http_only: false,
            secure: false,
            same_site: None,
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Lifetime in seconds. `0` leaves the attribute out (a session cookie);
    /// any negative value tells the client to delete the cookie now.
    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = seconds;
        self
    }

    pub fn http_only(mut self, on: bool) -> Self {
        self.http_only = on;
        self
    }

    pub fn secure(mut self, on: bool) -> Self {
        self.secure = on;
        self
    }

    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn value(&self) -> &str { &self.value }
}

/// Serialises as a `Set-Cookie` header value.
impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value.contains([' ', ',']) {
            write!(f, "{}=\"{}\"", self.name, self.value)?;
        } else {
            write!(f, "{}={}", self.name, self.value)?;
        }
        if let Some(path) = &self.path {
            write!(f, "; Path={path}")?;
        }
        if let Some(domain) = &self.domain {
            write!(f, "; Domain={}", domain.trim_start_matches('.'))?;
        }
        match self.max_age {
            0 => {}
            n if n < 0 => f.write_str("; Max-Age=0")?,
            n => write!(f, "; Max-Age={n}")?,
        }
        if self.http_only {
            f.write_str("; HttpOnly")?;
        }
        if self.secure {
            f.write_str("; Secure")?;
        }
        if let Some(same_site) = self.same_site {
            write!(f, "; SameSite={}", same_site.as_str())?;
        }
        Ok(())
    }
}

/// Finds `name` in one `Cookie` request header value. Surrounding double
/// quotes are stripped from the value.
pub(crate) fn find<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| k.trim() == name)
        .map(|(_, v)| {
            let v = v.trim();
            v.strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(v)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_max_age_deletes() {
        let c = Cookie::new("session", "").max_age(-1);
        assert_eq!(c.to_string(), "session=; Max-Age=0");
    }

    #[test]
    fn values_with_spaces_are_quoted() {
        let c = Cookie::new("greeting", "hello world").domain(".example.com");
        assert_eq!(c.to_string(), "greeting=\"hello world\"; Domain=example.com");
    }

    #[test]
    fn find_in_header() {
        let header = "a=1; b=\"two\"; c=";
        assert_eq!(find(header, "a"), Some("1"));
        assert_eq!(find(header, "b"), Some("two"));
        assert_eq!(find(header, "c"), Some(""));
        assert_eq!(find(header, "d"), None);
    }
}
