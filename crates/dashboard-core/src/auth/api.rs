use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use url::Url;

use super::{ApiError, UserProfile};

const USER_AGENT: &str = "dashboard/0.1.0";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote authentication service consumed by the session store.
pub trait AuthApi: Send + Sync + 'static {
    /// Resolve the profile that owns `token`.
    fn who_am_i(&self, token: &str) -> impl Future<Output = Result<UserProfile, ApiError>> + Send;

    /// Revoke `token` on the server.
    fn logout(&self, token: &str) -> impl Future<Output = Result<(), ApiError>> + Send;
}

/// HTTP implementation of [`AuthApi`] against the dashboard REST endpoints.
#[derive(Debug, Clone)]
pub struct HttpAuthApi {
    http: Client,
    me_url: Url,
    logout_url: Url,
}

impl HttpAuthApi {
    /// Build a client rooted at `base` (e.g. `https://admin.example.com/api`).
    pub fn new(base: &Url) -> Result<Self, ApiError> {
        let base = with_trailing_slash(base);
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            me_url: base.join("auth/me")?,
            logout_url: base.join("auth/logout")?,
        })
    }

    async fn check_status(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ApiError::Unauthorized(status));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { status, body });
        }
        Ok(response)
    }
}

impl AuthApi for HttpAuthApi {
    async fn who_am_i(&self, token: &str) -> Result<UserProfile, ApiError> {
        let response = self
            .http
            .get(self.me_url.clone())
            .bearer_auth(token)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let text = response.text().await?;
        let envelope: MeEnvelope = serde_json::from_str(&text)?;
        Ok(envelope.into_profile())
    }

    async fn logout(&self, token: &str) -> Result<(), ApiError> {
        let response = self
            .http
            .post(self.logout_url.clone())
            .bearer_auth(token)
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }
}

/// The endpoint answers either with the bare profile or wrapped as `{ "user": ... }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MeEnvelope {
    Wrapped { user: UserProfile },
    Bare(UserProfile),
}

impl MeEnvelope {
    fn into_profile(self) -> UserProfile {
        match self {
            MeEnvelope::Wrapped { user } => user,
            MeEnvelope::Bare(user) => user,
        }
    }
}

fn with_trailing_slash(base: &Url) -> Url {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base
}
