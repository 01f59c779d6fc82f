//! Test doubles shared by the unit test modules

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::api::{ApiFuture, AuthApi, LoginRequest, LoginResponse, TokenResponse, UserProfile};
use crate::broadcast::TokenChannel;
use crate::clock::SystemClock;
use crate::cookies::{CookieJar, CookieScope, SetCookie};
use crate::error::Error;
use crate::session::Navigator;
use crate::store::TokenStore;

#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    Succeed { token: String, expires_in: u64 },
    Rejected,
    NetworkError,
}

/// In-memory auth server. Accepts `alice` / `secret`.
pub struct FakeAuthApi {
    login_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    activation_calls: AtomicUsize,
    profile_calls: AtomicUsize,
    refresh_outcome: Mutex<RefreshOutcome>,
    refresh_delay: Mutex<Duration>,
    logout_fails: AtomicBool,
    /// `None` makes the activation check fail
    activation: Mutex<Option<bool>>,
    /// `None` makes the profile fetch fail
    profile: Mutex<Option<UserProfile>>,
}

pub fn alice() -> UserProfile {
    UserProfile {
        id: Some("u-alice".into()),
        name: "Alice".into(),
        email: "alice@condo.test".into(),
        roles: vec!["manager".into()],
        avatar: None,
        profile_completed: true,
    }
}

impl FakeAuthApi {
    pub fn new() -> Self {
        Self {
            login_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            activation_calls: AtomicUsize::new(0),
            profile_calls: AtomicUsize::new(0),
            refresh_outcome: Mutex::new(RefreshOutcome::Succeed {
                token: "at_refreshed".into(),
                expires_in: 300,
            }),
            refresh_delay: Mutex::new(Duration::ZERO),
            logout_fails: AtomicBool::new(false),
            activation: Mutex::new(Some(true)),
            profile: Mutex::new(Some(alice())),
        }
    }

    pub fn set_refresh_outcome(&self, outcome: RefreshOutcome) {
        *self.refresh_outcome.lock().unwrap() = outcome;
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = delay;
    }

    pub fn fail_logout(&self) {
        self.logout_fails.store(true, Ordering::SeqCst);
    }

    pub fn set_activation(&self, activation: Option<bool>) {
        *self.activation.lock().unwrap() = activation;
    }

    pub fn set_profile(&self, profile: Option<UserProfile>) {
        *self.profile.lock().unwrap() = profile;
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn activation_calls(&self) -> usize {
        self.activation_calls.load(Ordering::SeqCst)
    }

    pub fn profile_calls(&self) -> usize {
        self.profile_calls.load(Ordering::SeqCst)
    }
}

impl AuthApi for FakeAuthApi {
    fn login<'a>(&'a self, request: &'a LoginRequest) -> ApiFuture<'a, LoginResponse> {
        Box::pin(async move {
            self.login_calls.fetch_add(1, Ordering::SeqCst);
            if request.username != "alice" || request.password.expose() != "secret" {
                return Err(Error::InvalidCredentials(
                    "Invalid username or password".into(),
                ));
            }
            Ok(LoginResponse {
                token: TokenResponse {
                    access_token: "at_login".into(),
                    expires_in: 900,
                },
                user: alice(),
            })
        })
    }

    fn refresh(&self) -> ApiFuture<'_, TokenResponse> {
        Box::pin(async move {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.refresh_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let outcome = self.refresh_outcome.lock().unwrap().clone();
            match outcome {
                RefreshOutcome::Succeed { token, expires_in } => Ok(TokenResponse {
                    access_token: token,
                    expires_in,
                }),
                RefreshOutcome::Rejected => {
                    Err(Error::Unauthorized("refresh credential rejected (401)".into()))
                }
                RefreshOutcome::NetworkError => Err(Error::Http("connection reset".into())),
            }
        })
    }

    fn logout(&self) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            self.logout_calls.fetch_add(1, Ordering::SeqCst);
            if self.logout_fails.load(Ordering::SeqCst) {
                return Err(Error::Http("network unreachable".into()));
            }
            Ok(())
        })
    }

    fn check_activation<'a>(&'a self, _email: &'a str) -> ApiFuture<'a, bool> {
        Box::pin(async move {
            self.activation_calls.fetch_add(1, Ordering::SeqCst);
            let activation = *self.activation.lock().unwrap();
            activation.ok_or_else(|| Error::Http("activation service down".into()))
        })
    }

    fn fetch_profile<'a>(&'a self, _access_token: &'a str) -> ApiFuture<'a, UserProfile> {
        Box::pin(async move {
            self.profile_calls.fetch_add(1, Ordering::SeqCst);
            let profile = self.profile.lock().unwrap().clone();
            profile.ok_or_else(|| Error::Api {
                status: 500,
                body: "profile unavailable".into(),
            })
        })
    }
}

/// Cookie jar keyed by (name, path); domains are ignored.
#[derive(Default)]
pub struct MemoryCookies {
    cookies: Mutex<Vec<(String, String, String)>>,
    removals: AtomicUsize,
}

impl MemoryCookies {
    pub fn insert(&self, name: &str, path: &str, value: &str) {
        let mut cookies = self.cookies.lock().unwrap();
        cookies.retain(|(n, p, _)| !(n == name && p == path));
        cookies.push((name.into(), path.into(), value.into()));
    }

    pub fn removals(&self) -> usize {
        self.removals.load(Ordering::SeqCst)
    }
}

impl CookieJar for MemoryCookies {
    fn get(&self, name: &str) -> Option<String> {
        let cookies = self.cookies.lock().unwrap();
        cookies
            .iter()
            .find(|(n, _, _)| n == name)
            .map(|(_, _, v)| v.clone())
    }

    fn set(&self, cookie: &SetCookie) {
        self.insert(&cookie.name, &cookie.scope.path, &cookie.value);
    }

    fn remove(&self, name: &str, scope: &CookieScope) {
        self.removals.fetch_add(1, Ordering::SeqCst);
        let mut cookies = self.cookies.lock().unwrap();
        cookies.retain(|(n, p, _)| !(n == name && *p == scope.path));
    }
}

/// Navigator that records every location it was sent to.
#[derive(Default)]
pub struct RecordingNavigator {
    visits: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn visits(&self) -> Vec<String> {
        self.visits.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, location: &str) {
        self.visits.lock().unwrap().push(location.to_string());
    }
}

/// A token store on its own channel with the system clock.
pub fn test_store() -> Arc<TokenStore> {
    Arc::new(TokenStore::new(
        Arc::new(SystemClock),
        TokenChannel::new(),
        Arc::new(MemoryCookies::default()),
        "condo.test",
    ))
}
