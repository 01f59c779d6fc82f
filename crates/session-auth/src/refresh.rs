//! Single-flight access token refresh
//!
//! Exchanges the refresh cookie for a new access token. However many callers
//! ask at once (the interceptor on a 401, the session on startup), only one
//! network call is made: the first caller starts a shared future and parks it
//! in the in-flight slot, later callers clone and await that same future, and
//! the future vacates the slot itself once it settles.
//!
//! Failure is not retried here beyond the transport's own transient budget.
//! Any failure clears the token store and yields `None`; the caller decides
//! what that means for the session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use crate::api::AuthApi;
use crate::store::TokenStore;

type RefreshFuture = Shared<BoxFuture<'static, Option<String>>>;

struct InFlight {
    id: u64,
    future: RefreshFuture,
}

pub struct TokenRefresher {
    api: Arc<dyn AuthApi>,
    store: Arc<TokenStore>,
    /// Never held across an await.
    in_flight: Arc<Mutex<Option<InFlight>>>,
    next_id: AtomicU64,
}

impl TokenRefresher {
    pub fn new(api: Arc<dyn AuthApi>, store: Arc<TokenStore>) -> Self {
        Self {
            api,
            store,
            in_flight: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
        }
    }

    /// Refresh the access token, joining a refresh already in flight.
    ///
    /// Every caller of the same in-flight window gets the same result.
    pub async fn refresh_access_token(&self) -> Option<String> {
        let future = self.join_or_start();
        future.await
    }

    /// Wait for the in-flight refresh, if any, to settle.
    pub async fn settled(&self) {
        let pending = lock(&self.in_flight)
            .as_ref()
            .map(|in_flight| in_flight.future.clone());
        if let Some(future) = pending {
            debug!("waiting for in-flight refresh to settle");
            future.await;
        }
    }

    pub fn is_refreshing(&self) -> bool {
        lock(&self.in_flight).is_some()
    }

    fn join_or_start(&self) -> RefreshFuture {
        let mut slot = lock(&self.in_flight);
        if let Some(in_flight) = slot.as_ref() {
            debug!(refresh_id = in_flight.id, "joining in-flight refresh");
            return in_flight.future.clone();
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let api = Arc::clone(&self.api);
        let store = Arc::clone(&self.store);
        let in_flight = Arc::clone(&self.in_flight);
        let future = async move {
            let result = exchange(api.as_ref(), &store).await;
            let mut slot = lock(&in_flight);
            if slot.as_ref().is_some_and(|f| f.id == id) {
                *slot = None;
            }
            result
        }
        .boxed()
        .shared();

        *slot = Some(InFlight {
            id,
            future: future.clone(),
        });
        future
    }
}

/// One refresh round trip, feeding the result into the store.
async fn exchange(api: &dyn AuthApi, store: &TokenStore) -> Option<String> {
    match api.refresh().await {
        Ok(token) => {
            store.set_tokens(&token.access_token, token.expires_in);
            metrics::counter!("session_token_refresh_total", "outcome" => "success").increment(1);
            info!(expires_in = token.expires_in, "access token refreshed");
            Some(token.access_token)
        }
        Err(e) => {
            metrics::counter!("session_token_refresh_total", "outcome" => "failure").increment(1);
            warn!(error = %e, "token refresh failed, clearing tokens");
            store.clear_tokens();
            None
        }
    }
}

fn lock(slot: &Mutex<Option<InFlight>>) -> MutexGuard<'_, Option<InFlight>> {
    match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
