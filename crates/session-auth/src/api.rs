//! Auth API boundary
//!
//! The session talks to the authentication server only through `AuthApi`, so
//! the transport can be swapped (`HttpAuthApi` in production, an in-memory
//! fake in tests). Wire types mirror the server's JSON.

use std::future::Future;
use std::pin::Pin;

use common::Secret;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Boxed future returned by `AuthApi` methods.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Body of `POST /authentication/login`.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: Secret<String>,
}

impl LoginRequest {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Secret::new(password.into()),
        }
    }
}

/// Access token grant. The server also returns its refresh credential here;
/// it is deliberately not deserialized since the cookie is the only copy the
/// client should hold.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Seconds until the access token expires (delta, not absolute)
    pub expires_in: u64,
}

/// Response of `POST /authentication/login`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: TokenResponse,
    pub user: UserProfile,
}

/// Identity of the signed-in user, cached locally for fast reloads.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Whether onboarding (profile completion) is done
    #[serde(default)]
    pub profile_completed: bool,
}

/// The authentication server as seen by the session.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn AuthApi>`).
pub trait AuthApi: Send + Sync {
    /// Exchange username/password for an access token and the user. The server
    /// sets the refresh cookie on success.
    fn login<'a>(&'a self, request: &'a LoginRequest) -> ApiFuture<'a, LoginResponse>;

    /// Exchange the refresh cookie for a new access token.
    fn refresh(&self) -> ApiFuture<'_, TokenResponse>;

    /// Revoke the refresh cookie server-side.
    fn logout(&self) -> ApiFuture<'_, ()>;

    /// Whether the account behind `email` completed onboarding.
    fn check_activation<'a>(&'a self, email: &'a str) -> ApiFuture<'a, bool>;

    fn fetch_profile<'a>(&'a self, access_token: &'a str) -> ApiFuture<'a, UserProfile>;
}
