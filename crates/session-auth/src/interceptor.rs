//! Authorized HTTP client
//!
//! Wraps application API calls: attaches the current access token, and on a
//! 401 runs the shared single-flight refresh and replays the request once with
//! the new token. When the refresh fails the session has already been expired
//! and the caller gets `Error::SessionExpired`.

use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Method, Request, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};
use crate::http_api::{json_body, success};
use crate::session::Session;

#[derive(Clone)]
pub struct AuthorizedClient {
    client: reqwest::Client,
    base_url: Url,
    session: Arc<Session>,
}

impl AuthorizedClient {
    pub fn new(client: reqwest::Client, base_url: Url, session: Arc<Session>) -> Result<Self> {
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "base URL {base_url} cannot carry a path"
            )));
        }
        Ok(Self {
            client,
            base_url,
            session,
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Start a request to `path`, relative to the API base URL. A query
    /// string after `?` is kept as is.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path, None),
        };
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(path.split('/').filter(|s| !s.is_empty()));
        }
        url.set_query(query);
        self.client.request(method, url)
    }

    /// Send a request built with `request`, refreshing and replaying once on
    /// a 401. Other statuses are returned as they are.
    #[instrument(skip_all)]
    pub async fn execute(&self, builder: RequestBuilder) -> Result<Response> {
        let mut request = builder.build()?;
        let replay = request.try_clone();
        let sent = self.session.tokens().get_access_token();
        if let Some(token) = &sent {
            set_bearer(&mut request, token)?;
        }
        let (method, url) = (request.method().clone(), request.url().clone());

        let response = self.client.execute(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(mut replay) = replay else {
            debug!(%method, %url, "401 on a streaming body, not replaying");
            return Err(Error::Unauthorized(format!("{method} {url} rejected")));
        };

        let token = match self.session.tokens().get_access_token() {
            // Another caller already refreshed while this request was out.
            Some(current) if sent.as_ref() != Some(&current) => current,
            _ => {
                debug!(%method, %url, "401, refreshing access token");
                let Some(token) = self.session.refresh_access_token().await else {
                    warn!(%method, %url, "refresh failed after 401, session expired");
                    return Err(Error::SessionExpired);
                };
                token
            }
        };

        set_bearer(&mut replay, &token)?;
        let response = self.client.execute(replay).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(%method, %url, "request still rejected after refresh");
            return Err(Error::Unauthorized(format!(
                "{method} {url} rejected after token refresh"
            )));
        }
        Ok(response)
    }

    /// GET `path` and decode a JSON body. Non-2xx becomes `Error::Api`.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.execute(self.request(Method::GET, path)).await?;
        json_body(success(response).await?).await
    }
}

fn set_bearer(request: &mut Request, token: &str) -> Result<()> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|_| Error::Unauthorized("access token is not a valid header value".into()))?;
    value.set_sensitive(true);
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}
