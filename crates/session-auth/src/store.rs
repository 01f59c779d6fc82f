//! In-memory access token store
//!
//! Sole owner of the access token and its absolute expiry. Nothing here is
//! persisted: the token dies with the process, and the only durable credential
//! is the server's refresh cookie. Every mutation is published on the
//! `TokenChannel`; a listener task applies incoming messages unconditionally,
//! so all stores on one channel converge to the last message sent.
//!
//! None of these operations fail.

use std::sync::{Arc, Mutex, RwLock};

use common::Secret;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::broadcast::{BroadcastMessage, TokenChannel};
use crate::clock::Clock;
use crate::constants::{REFRESH_COOKIE, REFRESH_COOKIE_PATHS};
use crate::cookies::{CookieJar, known_scopes};

#[derive(Default)]
struct TokenState {
    token: Option<Secret<String>>,
    /// Absolute expiry in unix milliseconds
    expires_at: Option<u64>,
}

pub struct TokenStore {
    state: RwLock<TokenState>,
    clock: Arc<dyn Clock>,
    channel: TokenChannel,
    cookies: Arc<dyn CookieJar>,
    /// Host the refresh cookie was issued for, used to enumerate its scopes
    cookie_host: String,
    /// Subscribed at construction so nothing published before the listener
    /// starts is missed. Taken by `spawn_listener`.
    receiver: Mutex<Option<broadcast::Receiver<String>>>,
}

impl TokenStore {
    pub fn new(
        clock: Arc<dyn Clock>,
        channel: TokenChannel,
        cookies: Arc<dyn CookieJar>,
        cookie_host: impl Into<String>,
    ) -> Self {
        let receiver = channel.subscribe();
        Self {
            state: RwLock::new(TokenState::default()),
            clock,
            channel,
            cookies,
            cookie_host: cookie_host.into(),
            receiver: Mutex::new(Some(receiver)),
        }
    }

    pub fn get_access_token(&self) -> Option<String> {
        self.read(|s| s.token.as_ref().map(|t| t.expose().clone()))
    }

    /// Absolute expiry in unix milliseconds.
    pub fn expires_at(&self) -> Option<u64> {
        self.read(|s| s.expires_at)
    }

    /// True when there is no token or `now >= expiry`.
    pub fn is_token_expired(&self) -> bool {
        let now = self.clock.now_millis();
        self.read(|s| match (&s.token, s.expires_at) {
            (Some(_), Some(expires_at)) => now >= expires_at,
            _ => true,
        })
    }

    /// Store a freshly issued token and tell every other tab about it.
    pub fn set_tokens(&self, token: &str, expires_in_secs: u64) {
        let expires_at = self
            .clock
            .now_millis()
            .saturating_add(expires_in_secs.saturating_mul(1000));
        self.write(Some(token.to_string()), Some(expires_at));
        debug!(expires_at, "access token stored");
        self.channel.publish(&BroadcastMessage::TokenUpdate {
            token: Some(token.to_string()),
            expiration: Some(expires_at),
        });
    }

    /// Forget the token, delete the refresh cookie wherever it may have been
    /// scoped, and tell every other tab.
    pub fn clear_tokens(&self) {
        self.write(None, None);
        for scope in known_scopes(&self.cookie_host, REFRESH_COOKIE_PATHS) {
            self.cookies.remove(REFRESH_COOKIE, &scope);
        }
        debug!("access token cleared");
        self.channel.publish(&BroadcastMessage::TokenUpdate {
            token: None,
            expiration: None,
        });
    }

    /// Apply a raw payload received from the channel. Malformed payloads are
    /// ignored.
    pub fn apply_remote(&self, payload: &str) {
        if let Some(BroadcastMessage::TokenUpdate { token, expiration }) =
            BroadcastMessage::parse(payload)
        {
            self.write(token, expiration);
        }
    }

    /// Start applying messages from the channel. Returns `None` if the
    /// listener was already started.
    pub fn spawn_listener(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut receiver = self.receiver.lock().ok()?.take()?;
        let store = Arc::clone(self);
        Some(tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(payload) => store.apply_remote(&payload),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "token listener lagged, skipping to latest");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }))
    }

    fn read<T>(&self, f: impl FnOnce(&TokenState) -> T) -> T {
        match self.state.read() {
            Ok(state) => f(&state),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    fn write(&self, token: Option<String>, expires_at: Option<u64>) {
        let mut state = match self.state.write() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.token = token.map(Secret::new);
        state.expires_at = expires_at;
    }
}
