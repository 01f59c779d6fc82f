//! Fixed endpoint paths, cookie names and storage keys
//!
//! Endpoint paths are relative to the configured API base URL. Cookie names are
//! shared with the edge guard, which reads them straight off the `Cookie` header.

/// Credential exchange: `{username, password}` → token + user
pub const LOGIN_PATH: &[&str] = &["authentication", "login"];

/// Cookie-authenticated refresh, no body
pub const REFRESH_PATH: &[&str] = &["authentication", "refresh"];

/// Cookie-authenticated logout (DELETE)
pub const LOGOUT_PATH: &[&str] = &["authentication", "logout"];

/// Activation check; the email is appended as a single path segment
pub const CHECK_ACTIVATION_PATH: &[&str] = &["users", "check-activation"];

/// Bearer-authenticated profile endpoint
pub const PROFILE_PATH: &[&str] = &["profile"];

/// Server-owned refresh credential cookie. Client code only ever deletes it.
pub const REFRESH_COOKIE: &str = "refresh_token";

/// Presence flag used as the routing authentication signal. Never holds a token.
pub const PRESENCE_COOKIE: &str = "is_authenticated";

/// Registration marker consumed by server-side routing decisions.
pub const REGISTERED_COOKIE: &str = "is_user_registered";

/// Max-age of the registration marker (24h)
pub const REGISTERED_COOKIE_MAX_AGE_SECS: u64 = 24 * 60 * 60;

/// Default max-age of the presence flag (7 days)
pub const PRESENCE_COOKIE_MAX_AGE_SECS: u64 = 7 * 24 * 60 * 60;

/// Paths the refresh cookie may have been scoped to by the server.
pub const REFRESH_COOKIE_PATHS: &[&str] = &["/", "/authentication", "/authentication/refresh"];

/// Local storage key for the cached user profile
pub const PROFILE_STORAGE_KEY: &str = "user_profile";

/// Query parameter carrying the return target on login redirects
pub const RETURN_TO_PARAM: &str = "redirect";
