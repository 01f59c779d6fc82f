//! HTTP transport for the auth API
//!
//! All calls go through one `reqwest::Client` whose cookie jar carries the
//! server's refresh cookie, so `refresh` and `logout` send no credentials of
//! their own. The client is built with a request timeout; login and refresh
//! additionally retry transient failures (connect errors, timeouts, 502-504)
//! a bounded number of times. That budget is separate from the interceptor's
//! single retry after a 401.

use std::future::Future;
use std::time::Duration;

use reqwest::{Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::api::{ApiFuture, AuthApi, LoginRequest, LoginResponse, TokenResponse, UserProfile};
use crate::constants::{
    CHECK_ACTIVATION_PATH, LOGIN_PATH, LOGOUT_PATH, PROFILE_PATH, REFRESH_PATH,
};
use crate::error::{Error, Result};

/// User-visible message for rejected credentials.
const INVALID_CREDENTIALS_MESSAGE: &str = "Invalid username or password";

/// Bounded retry for transient transport failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(250),
        }
    }
}

pub struct HttpAuthApi {
    client: reqwest::Client,
    base_url: Url,
    retry: RetryPolicy,
}

impl HttpAuthApi {
    /// `client` must have the shared cookie jar installed and a timeout set.
    pub fn new(client: reqwest::Client, base_url: Url, retry: RetryPolicy) -> Self {
        Self {
            client,
            base_url,
            retry,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Join path segments onto the base URL, escaping each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("base URL {} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!(operation, attempt, error = %e, "transient failure, retrying");
                    tokio::time::sleep(self.retry.delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn login_once(&self, request: &LoginRequest) -> Result<LoginResponse> {
        let response = self
            .client
            .post(self.endpoint(LOGIN_PATH)?)
            .json(request)
            .send()
            .await?;

        match response.status() {
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(Error::InvalidCredentials(INVALID_CREDENTIALS_MESSAGE.into()))
            }
            _ => json_body(success(response).await?).await,
        }
    }

    async fn refresh_once(&self) -> Result<TokenResponse> {
        let response = self.client.post(self.endpoint(REFRESH_PATH)?).send().await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::Unauthorized(format!(
                "refresh credential rejected ({status})"
            )));
        }
        json_body(success(response).await?).await
    }
}

impl AuthApi for HttpAuthApi {
    fn login<'a>(&'a self, request: &'a LoginRequest) -> ApiFuture<'a, LoginResponse> {
        Box::pin(async move {
            debug!(username = %request.username, "logging in");
            self.with_retry("login", || self.login_once(request)).await
        })
    }

    fn refresh(&self) -> ApiFuture<'_, TokenResponse> {
        Box::pin(async move { self.with_retry("refresh", || self.refresh_once()).await })
    }

    fn logout(&self) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            let response = self.client.delete(self.endpoint(LOGOUT_PATH)?).send().await?;
            success(response).await?;
            Ok(())
        })
    }

    fn check_activation<'a>(&'a self, email: &'a str) -> ApiFuture<'a, bool> {
        Box::pin(async move {
            let mut segments: Vec<&str> = CHECK_ACTIVATION_PATH.to_vec();
            segments.push(email);
            let response = self.client.get(self.endpoint(&segments)?).send().await?;
            json_body(success(response).await?).await
        })
    }

    fn fetch_profile<'a>(&'a self, access_token: &'a str) -> ApiFuture<'a, UserProfile> {
        Box::pin(async move {
            let response = self
                .client
                .get(self.endpoint(PROFILE_PATH)?)
                .bearer_auth(access_token)
                .send()
                .await?;
            if response.status() == StatusCode::UNAUTHORIZED {
                return Err(Error::Unauthorized("profile request rejected".into()));
            }
            json_body(success(response).await?).await
        })
    }
}

/// Pass 2xx responses through; turn anything else into `Error::Api`.
#[instrument(skip_all, fields(status = %response.status()))]
pub(crate) async fn success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<no body>"));
    Err(Error::Api {
        status: status.as_u16(),
        body,
    })
}

pub(crate) async fn json_body<T: DeserializeOwned>(response: Response) -> Result<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| Error::InvalidResponse(e.to_string()))
}
