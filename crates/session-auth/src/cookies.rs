//! Cookie port
//!
//! The session writes two lightweight flags (presence and registration) and
//! deletes the server-owned refresh cookie. `SharedCookieJar` puts all of them
//! in the same `reqwest` jar the HTTP client sends from, so a cookie the server
//! sets on login is what goes out on refresh and what logout removes.

use std::sync::Arc;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::Url;
use tracing::debug;

/// Domain and path a cookie is scoped to. `domain: None` means host-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieScope {
    pub domain: Option<String>,
    pub path: String,
}

impl Default for CookieScope {
    fn default() -> Self {
        Self {
            domain: None,
            path: "/".into(),
        }
    }
}

/// A cookie to write.
#[derive(Debug, Clone)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub scope: CookieScope,
    pub max_age_secs: Option<u64>,
}

impl SetCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            scope: CookieScope::default(),
            max_age_secs: None,
        }
    }

    pub fn max_age(mut self, secs: u64) -> Self {
        self.max_age_secs = Some(secs);
        self
    }

    pub fn scope(mut self, scope: CookieScope) -> Self {
        self.scope = scope;
        self
    }

    /// Render as a `Set-Cookie` header value.
    pub fn to_header_value(&self) -> String {
        let mut out = format!("{}={}; Path={}", self.name, self.value, self.scope.path);
        if let Some(domain) = &self.scope.domain {
            out.push_str(&format!("; Domain={domain}"));
        }
        if let Some(max_age) = self.max_age_secs {
            out.push_str(&format!("; Max-Age={max_age}"));
        }
        out.push_str("; SameSite=Lax");
        out
    }

    /// An already-expired cookie that deletes `name` within `scope`.
    fn expired(name: &str, scope: &CookieScope) -> Self {
        Self::new(name, "").scope(scope.clone()).max_age(0)
    }
}

/// Client-side cookie access.
pub trait CookieJar: Send + Sync {
    /// Current value of `name`, if any cookie of that name is visible.
    fn get(&self, name: &str) -> Option<String>;

    fn set(&self, cookie: &SetCookie);

    /// Delete `name` as scoped by `scope`. Unknown cookies are a no-op.
    fn remove(&self, name: &str, scope: &CookieScope);
}

/// `CookieJar` over a `reqwest` jar shared with the HTTP client.
#[derive(Debug, Clone)]
pub struct SharedCookieJar {
    jar: Arc<Jar>,
    origin: Url,
}

impl SharedCookieJar {
    pub fn new(jar: Arc<Jar>, origin: Url) -> Self {
        Self { jar, origin }
    }

    /// URL the jar is queried with for a given cookie path.
    fn url_for(&self, path: &str) -> Url {
        let mut url = self.origin.clone();
        url.set_path(path);
        url
    }
}

impl CookieJar for SharedCookieJar {
    fn get(&self, name: &str) -> Option<String> {
        // Query the deepest known path so cookies scoped below `/` are visible too.
        let url = self.url_for("/authentication/refresh");
        let header = self.jar.cookies(&url)?;
        let header = header.to_str().ok()?;
        parse_cookie_header(header)
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.to_string())
    }

    fn set(&self, cookie: &SetCookie) {
        let url = self.url_for(&cookie.scope.path);
        self.jar.add_cookie_str(&cookie.to_header_value(), &url);
    }

    fn remove(&self, name: &str, scope: &CookieScope) {
        let expired = SetCookie::expired(name, scope);
        let url = self.url_for(&scope.path);
        // A cookie whose Domain does not match the origin is rejected by the
        // jar, which is fine: nothing could have been stored under it either.
        self.jar.add_cookie_str(&expired.to_header_value(), &url);
        debug!(cookie = name, path = %scope.path, domain = ?scope.domain, "removed cookie");
    }
}

/// Every domain/path combination a cookie set by `host` may live under.
pub fn known_scopes(host: &str, paths: &[&str]) -> Vec<CookieScope> {
    let domains = [None, Some(host.to_string()), Some(format!(".{host}"))];
    domains
        .iter()
        .flat_map(|domain| {
            paths.iter().map(move |path| CookieScope {
                domain: domain.clone(),
                path: (*path).to_string(),
            })
        })
        .collect()
}

/// Split a `Cookie:` header value into `(name, value)` pairs.
///
/// Pairs without `=` are skipped; surrounding whitespace is trimmed.
pub fn parse_cookie_header(header: &str) -> impl Iterator<Item = (&str, &str)> {
    header.split(';').filter_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some((name, value.trim()))
    })
}
