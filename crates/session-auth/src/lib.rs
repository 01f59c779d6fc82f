//! Client-side session library for the condominium management app
//!
//! Holds the access token in memory, keeps it fresh through the server's
//! refresh cookie, caches the signed-in profile, and gives the edge a guard
//! that routes on two flag cookies. The token never touches disk or a cookie
//! the client can read.
//!
//! Session flow:
//! 1. `bootstrap()` wires the stack from a `SessionConfig`
//! 2. `Session::check_auth()` resolves the state on startup
//! 3. `Session::login()` stores the token, caches the profile, writes the flags
//! 4. `AuthorizedClient` attaches the token and refreshes once on a 401
//! 5. `TokenRefresher` makes sure concurrent 401s share one refresh call
//! 6. `Session::logout()` / `expire_session()` clear token and profile together

pub mod api;
pub mod bootstrap;
pub mod broadcast;
pub mod clock;
pub mod config;
pub mod constants;
pub mod cookies;
pub mod error;
pub mod guard;
pub mod http_api;
pub mod interceptor;
pub mod local_store;
pub mod profile;
pub mod refresh;
pub mod session;
pub mod store;

#[cfg(test)]
mod testing;

pub use api::{AuthApi, LoginRequest, LoginResponse, TokenResponse, UserProfile};
pub use bootstrap::{SessionRuntime, bootstrap};
pub use broadcast::{BroadcastMessage, TokenChannel};
pub use config::SessionConfig;
pub use cookies::{CookieJar, CookieScope, SetCookie, SharedCookieJar};
pub use error::{Error, Result};
pub use guard::{AuthSignal, GuardDecision, RedirectReason, RouteGuard, RouteGuardConfig};
pub use http_api::{HttpAuthApi, RetryPolicy};
pub use interceptor::AuthorizedClient;
pub use refresh::TokenRefresher;
pub use session::{Navigator, Session, SessionSettings, SessionState};
pub use store::TokenStore;
