//! Route guard
//!
//! Decides, per navigation, whether a path may be served or where to send the
//! user instead. It runs at the edge before any page renders, so it only sees
//! the two flag cookies the session writes. It never sees a token and does not
//! validate anything: the flags are a routing hint, the API is the authority.

use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::constants::{PRESENCE_COOKIE, REGISTERED_COOKIE, RETURN_TO_PARAM};
use crate::cookies::parse_cookie_header;
use crate::error::{Error, Result};

/// Route lists for the guard. Every field has a default so a config file only
/// needs the entries it changes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RouteGuardConfig {
    pub login_path: String,
    /// Landing page for signed-in users hitting a public page
    pub home_path: String,
    /// Public pages, matched exactly
    pub public_paths: Vec<String>,
    /// Public subtrees
    pub public_prefixes: Vec<String>,
    /// Never guarded (static assets, framework internals)
    pub passthrough_prefixes: Vec<String>,
    /// Onboarding page unregistered users are held on, if any
    pub completion_path: Option<String>,
}

impl Default for RouteGuardConfig {
    fn default() -> Self {
        Self {
            login_path: "/login".into(),
            home_path: "/dashboard".into(),
            public_paths: vec![
                "/".into(),
                "/login".into(),
                "/register".into(),
                "/forgot-password".into(),
            ],
            public_prefixes: vec!["/auth/".into()],
            passthrough_prefixes: vec![
                "/_next/".into(),
                "/static/".into(),
                "/favicon.ico".into(),
            ],
            completion_path: None,
        }
    }
}

impl RouteGuardConfig {
    /// Every configured path must be absolute.
    pub fn validate(&self) -> Result<()> {
        let singles = [&self.login_path, &self.home_path]
            .into_iter()
            .chain(self.completion_path.as_ref());
        let lists = self
            .public_paths
            .iter()
            .chain(&self.public_prefixes)
            .chain(&self.passthrough_prefixes);
        for path in singles.chain(lists) {
            if !path.starts_with('/') {
                return Err(Error::Config(format!(
                    "route '{path}' must start with '/'"
                )));
            }
        }
        Ok(())
    }
}

/// What the guard can see of the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthSignal {
    pub authenticated: bool,
    /// `None` when the registration marker is absent or unreadable
    pub registered: Option<bool>,
}

impl AuthSignal {
    /// Read the presence and registration flags from a `Cookie` header.
    pub fn from_cookie_header(header: &str) -> Self {
        let mut signal = Self::default();
        for (name, value) in parse_cookie_header(header) {
            match name {
                PRESENCE_COOKIE => signal.authenticated = value == "true",
                REGISTERED_COOKIE => {
                    signal.registered = match value {
                        "true" => Some(true),
                        "false" => Some(false),
                        _ => None,
                    }
                }
                _ => {}
            }
        }
        signal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectReason {
    /// Protected page without a session
    Login,
    /// Public page with a session
    Home,
    /// Signed in but onboarding unfinished
    Completion,
}

impl RedirectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedirectReason::Login => "login",
            RedirectReason::Home => "home",
            RedirectReason::Completion => "completion",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    Redirect {
        location: String,
        reason: RedirectReason,
    },
}

#[derive(Debug, Clone)]
pub struct RouteGuard {
    config: RouteGuardConfig,
}

impl RouteGuard {
    pub fn new(config: RouteGuardConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RouteGuardConfig {
        &self.config
    }

    /// Decide what to do with a navigation to `path` (plus optional raw query).
    pub fn decide(&self, path: &str, query: Option<&str>, signal: &AuthSignal) -> GuardDecision {
        if self.is_passthrough(path) {
            return GuardDecision::Allow;
        }

        let public = self.is_public(path);
        if !public && !signal.authenticated {
            let original = match query {
                Some(q) if !q.is_empty() => format!("{path}?{q}"),
                _ => path.to_string(),
            };
            let encoded: String = form_urlencoded::byte_serialize(original.as_bytes()).collect();
            return GuardDecision::Redirect {
                location: format!("{}?{RETURN_TO_PARAM}={encoded}", self.config.login_path),
                reason: RedirectReason::Login,
            };
        }

        if public && signal.authenticated && normalize(path) != "/" {
            return GuardDecision::Redirect {
                location: self.config.home_path.clone(),
                reason: RedirectReason::Home,
            };
        }

        if let Some(completion) = &self.config.completion_path {
            if !public
                && signal.registered == Some(false)
                && normalize(path) != normalize(completion)
            {
                return GuardDecision::Redirect {
                    location: completion.clone(),
                    reason: RedirectReason::Completion,
                };
            }
        }

        GuardDecision::Allow
    }

    pub fn is_public(&self, path: &str) -> bool {
        let path = normalize(path);
        self.config.public_paths.iter().any(|p| normalize(p) == path)
            || self
                .config
                .public_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()))
    }

    fn is_passthrough(&self, path: &str) -> bool {
        self.config
            .passthrough_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }
}

/// `/login/` and `/login` are the same page.
fn normalize(path: &str) -> &str {
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}
