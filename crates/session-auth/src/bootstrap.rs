//! Wiring
//!
//! Builds the whole session stack from a `SessionConfig`: one cookie jar shared
//! by the HTTP client and the cookie port, the auth API, the token store and
//! its channel listener, the profile cache, the session and the authorized
//! client. Must be called from within a tokio runtime.

use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use tokio::task::JoinHandle;
use tracing::info;

use crate::broadcast::TokenChannel;
use crate::clock::SystemClock;
use crate::config::SessionConfig;
use crate::cookies::{CookieJar, SharedCookieJar};
use crate::error::{Error, Result};
use crate::http_api::{HttpAuthApi, RetryPolicy};
use crate::interceptor::AuthorizedClient;
use crate::local_store::LocalStore;
use crate::profile::ProfileCache;
use crate::session::{Navigator, Session, SessionSettings};
use crate::store::TokenStore;

/// A ready session stack.
pub struct SessionRuntime {
    pub session: Arc<Session>,
    pub client: AuthorizedClient,
    pub cookies: Arc<dyn CookieJar>,
    /// Applies token updates from other holders of the same channel
    pub listener: Option<JoinHandle<()>>,
}

/// Assemble the session stack. Every store built on the same `channel`
/// converges on the same token.
pub async fn bootstrap(
    config: &SessionConfig,
    navigator: Arc<dyn Navigator>,
    channel: TokenChannel,
) -> Result<SessionRuntime> {
    let base_url = config.api_url()?;
    let host = base_url
        .host_str()
        .ok_or_else(|| Error::Config(format!("api.base_url {base_url} has no host")))?
        .to_string();

    let jar = Arc::new(Jar::default());
    let http = reqwest::Client::builder()
        .cookie_provider(Arc::clone(&jar))
        .timeout(Duration::from_secs(config.api.timeout_secs))
        .build()?;
    let cookies: Arc<dyn CookieJar> = Arc::new(SharedCookieJar::new(jar, base_url.clone()));

    let retry = RetryPolicy {
        max_attempts: config.api.max_attempts,
        delay: Duration::from_millis(config.api.retry_delay_ms),
    };
    let api = Arc::new(HttpAuthApi::new(http.clone(), base_url.clone(), retry));

    let tokens = Arc::new(TokenStore::new(
        Arc::new(SystemClock),
        channel,
        Arc::clone(&cookies),
        host,
    ));
    let listener = tokens.spawn_listener();

    let storage = match &config.storage.path {
        Some(path) => LocalStore::load(path.clone()).await?,
        None => LocalStore::in_memory(),
    };

    let settings = SessionSettings {
        login_path: config.routes.login_path.clone(),
        presence_max_age_secs: config.cookies.presence_max_age_secs,
        registered_max_age_secs: config.cookies.registered_max_age_secs,
    };
    let session = Arc::new(Session::new(
        api,
        tokens,
        ProfileCache::new(storage),
        Arc::clone(&cookies),
        navigator,
        settings,
    ));
    let client = AuthorizedClient::new(http, base_url.clone(), Arc::clone(&session))?;

    info!(api = %base_url, persistent = config.storage.path.is_some(), "session runtime ready");
    Ok(SessionRuntime {
        session,
        client,
        cookies,
        listener,
    })
}
