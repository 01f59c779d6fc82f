//! Session context
//!
//! The authentication facade the UI talks to. It composes the token store, the
//! single-flight refresher and the cached profile into one state machine:
//!
//! ```text
//! Unknown ──check_auth──▶ Unauthenticated
//!    │                    Authenticated { registered }
//!    └──login──▶ Authenticated { registered } ──logout / expiry──▶ Unauthenticated
//! ```
//!
//! Tokens and the cached profile are always cleared together. Every status
//! change also rewrites the presence and registration cookies so the edge
//! guard can route without seeing the token.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::api::{AuthApi, LoginRequest, UserProfile};
use crate::constants::{
    PRESENCE_COOKIE, PRESENCE_COOKIE_MAX_AGE_SECS, REGISTERED_COOKIE,
    REGISTERED_COOKIE_MAX_AGE_SECS,
};
use crate::cookies::{CookieJar, CookieScope, SetCookie};
use crate::error::{Error, Result};
use crate::profile::ProfileCache;
use crate::refresh::TokenRefresher;
use crate::store::TokenStore;

/// Authentication status as seen by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Before the first `check_auth`
    Unknown,
    Unauthenticated,
    Authenticated { registered: bool },
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated { .. })
    }

    /// Status label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Unknown => "unknown",
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Authenticated { registered: true } => "registered",
            SessionState::Authenticated { registered: false } => "unregistered",
        }
    }
}

/// Where the UI should go next. Implemented by the routing layer.
pub trait Navigator: Send + Sync {
    fn navigate(&self, location: &str);
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub login_path: String,
    pub presence_max_age_secs: u64,
    pub registered_max_age_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            login_path: "/login".into(),
            presence_max_age_secs: PRESENCE_COOKIE_MAX_AGE_SECS,
            registered_max_age_secs: REGISTERED_COOKIE_MAX_AGE_SECS,
        }
    }
}

pub struct Session {
    api: Arc<dyn AuthApi>,
    tokens: Arc<TokenStore>,
    refresher: TokenRefresher,
    profiles: ProfileCache,
    cookies: Arc<dyn CookieJar>,
    navigator: Arc<dyn Navigator>,
    settings: SessionSettings,
    state: watch::Sender<SessionState>,
}

impl Session {
    pub fn new(
        api: Arc<dyn AuthApi>,
        tokens: Arc<TokenStore>,
        profiles: ProfileCache,
        cookies: Arc<dyn CookieJar>,
        navigator: Arc<dyn Navigator>,
        settings: SessionSettings,
    ) -> Self {
        let refresher = TokenRefresher::new(Arc::clone(&api), Arc::clone(&tokens));
        let (state, _) = watch::channel(SessionState::Unknown);
        Self {
            api,
            tokens,
            refresher,
            profiles,
            cookies,
            navigator,
            settings,
            state,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Observe state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// Token present and not expired.
    pub fn has_valid_token(&self) -> bool {
        !self.tokens.is_token_expired()
    }

    pub async fn profile(&self) -> Option<UserProfile> {
        self.profiles.load().await
    }

    /// Single-flight refresh shared with the HTTP interceptor. A failed
    /// refresh expires the session.
    pub async fn refresh_access_token(&self) -> Option<String> {
        let token = self.refresher.refresh_access_token().await;
        if token.is_none() {
            self.expire_session().await;
        }
        token
    }

    /// Resolve the session on startup.
    ///
    /// A cached profile makes the session optimistically authenticated at
    /// once. Without a usable token the cached profile is revalidated through
    /// a refresh; a failed refresh ends the session. Profile or activation
    /// errors keep the cached profile when there is one.
    #[instrument(skip_all)]
    pub async fn check_auth(&self) -> SessionState {
        let cached = self.profiles.load().await;
        if let Some(profile) = &cached {
            self.resume_cached(profile);
        }

        let token = if self.tokens.is_token_expired() {
            None
        } else {
            self.tokens.get_access_token()
        };

        let token = match (token, &cached) {
            (Some(token), _) => token,
            (None, None) => {
                debug!("no token and no cached profile");
                self.mark_unauthenticated();
                return self.state();
            }
            (None, Some(_)) => match self.refresher.refresh_access_token().await {
                Some(token) => token,
                None => {
                    info!("cached session could not be refreshed, signing out");
                    self.end_session().await;
                    return self.state();
                }
            },
        };

        match self.load_identity(&token).await {
            Ok(registered) => self.set_state(SessionState::Authenticated { registered }),
            Err(e @ Error::IdentityChanged { .. }) => {
                warn!(error = %e, "server identity differs from cached profile, signing out");
                self.end_session().await;
            }
            Err(e) => match &cached {
                Some(profile) => {
                    warn!(error = %e, "profile revalidation failed, using cached profile");
                    self.resume_cached(profile);
                }
                None => {
                    warn!(error = %e, "profile fetch failed, signing out");
                    self.end_session().await;
                }
            },
        }

        self.state()
    }

    /// Sign in. Returns whether the user finished onboarding; the caller picks
    /// the landing page from that.
    ///
    /// Waits for any in-flight refresh first. On failure nothing is stored.
    #[instrument(skip_all, fields(username = %username))]
    pub async fn login(&self, username: &str, password: &str) -> Result<bool> {
        self.refresher.settled().await;

        let request = LoginRequest::new(username, password);
        let response = match self.api.login(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "login failed");
                if self.state() == SessionState::Unknown {
                    self.set_state(SessionState::Unauthenticated);
                }
                return Err(e);
            }
        };

        if let Some(cached) = self.profiles.load().await {
            if cached.email != response.user.email {
                return Err(Error::IdentityChanged {
                    cached: cached.email,
                    incoming: response.user.email,
                });
            }
        }

        self.tokens
            .set_tokens(&response.token.access_token, response.token.expires_in);

        let mut profile = response.user;
        let registered = match self.api.check_activation(&profile.email).await {
            Ok(registered) => registered,
            Err(e) => {
                warn!(error = %e, "activation check failed, using login response flag");
                profile.profile_completed
            }
        };
        profile.profile_completed = registered;

        if let Err(e) = self.profiles.store(&profile).await {
            warn!(error = %e, "failed to cache profile");
        }
        self.write_flags(registered);
        self.set_state(SessionState::Authenticated { registered });
        info!(email = %profile.email, registered, "login succeeded");
        Ok(registered)
    }

    /// Sign out. Always completes locally, whatever the server says.
    #[instrument(skip_all)]
    pub async fn logout(&self) {
        self.refresher.settled().await;
        if let Err(e) = self.api.logout().await {
            warn!(error = %e, "server logout failed, clearing local session anyway");
        }
        // A refresh may have started while the server call was out.
        self.refresher.settled().await;
        self.end_session().await;
        self.navigator.navigate(&self.settings.login_path);
        info!("logged out");
    }

    /// Terminal refresh failure: clear everything and send the user to login.
    ///
    /// Only the first of several concurrent callers does the work.
    pub async fn expire_session(&self) {
        self.refresher.settled().await;
        if !self.claim_sign_out() {
            debug!("session already ended");
            return;
        }
        self.end_session().await;
        self.navigator
            .navigate(&format!("{}?session=expired", self.settings.login_path));
        info!("session expired");
    }

    /// Record that onboarding finished for the signed-in user.
    pub async fn mark_profile_completed(&self) -> Result<()> {
        let mut profile = self
            .profiles
            .load()
            .await
            .ok_or_else(|| Error::Unauthorized("no signed-in user".into()))?;
        profile.profile_completed = true;
        self.profiles.store(&profile).await?;
        self.write_flags(true);
        self.set_state(SessionState::Authenticated { registered: true });
        info!(email = %profile.email, "profile completed");
        Ok(())
    }

    /// Fetch the server profile, resolve registration and cache the result.
    async fn load_identity(&self, token: &str) -> Result<bool> {
        let mut profile = self.api.fetch_profile(token).await?;
        let registered = self.api.check_activation(&profile.email).await?;
        profile.profile_completed = registered;
        self.profiles.store(&profile).await?;
        self.write_flags(registered);
        Ok(registered)
    }

    /// Clear token and profile together, then drop to unauthenticated.
    async fn end_session(&self) {
        self.tokens.clear_tokens();
        if let Err(e) = self.profiles.clear().await {
            warn!(error = %e, "failed to clear cached profile");
        }
        self.mark_unauthenticated();
    }

    /// Move to unauthenticated unless already there. Returns whether this
    /// call made the change.
    fn claim_sign_out(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == SessionState::Unauthenticated {
                return false;
            }
            debug!(from = state.label(), "session state changed");
            *state = SessionState::Unauthenticated;
            true
        })
    }

    fn resume_cached(&self, profile: &UserProfile) {
        self.write_flags(profile.profile_completed);
        self.set_state(SessionState::Authenticated {
            registered: profile.profile_completed,
        });
    }

    fn mark_unauthenticated(&self) {
        let scope = CookieScope::default();
        self.cookies.remove(PRESENCE_COOKIE, &scope);
        self.cookies.remove(REGISTERED_COOKIE, &scope);
        self.set_state(SessionState::Unauthenticated);
    }

    fn write_flags(&self, registered: bool) {
        self.cookies.set(
            &SetCookie::new(PRESENCE_COOKIE, "true").max_age(self.settings.presence_max_age_secs),
        );
        self.cookies.set(
            &SetCookie::new(REGISTERED_COOKIE, registered.to_string())
                .max_age(self.settings.registered_max_age_secs),
        );
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = previous.label(), to = state.label(), "session state changed");
        }
    }
}
