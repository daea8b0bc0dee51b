use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{ClientStorage, LoginError};

/// Storage key for the login started by [`LoginTrigger::begin`] and not yet completed.
pub const PENDING_LOGIN_KEY: &str = "dashboard.pending_login";

const STATE_LEN: usize = 32;
const DEFAULT_RETURN_PATH: &str = "/";

/// Builds redirects into the external OAuth login flow.
#[derive(Debug, Clone)]
pub struct LoginTrigger {
    login_url: Url,
}

/// Login affordance rendered by a guard: where the user goes back to after signing in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginPrompt {
    pub return_to: String,
    pub login_url: Url,
}

/// Phase one of the login protocol: the caller must navigate to `url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRedirect {
    pub url: Url,
    pub state: String,
    pub return_to: String,
}

/// Parameters the OAuth provider hands back to the callback route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginCallback {
    pub token: String,
    pub state: Option<String>,
}

impl LoginTrigger {
    pub fn new(login_url: Url) -> Self {
        Self { login_url }
    }

    /// Prompt pre-filled with `current_path` as the post-login destination.
    pub fn prompt(&self, current_path: &str) -> LoginPrompt {
        let return_to = sanitize_return_path(current_path);
        LoginPrompt {
            login_url: self.url_for(&return_to, None),
            return_to,
        }
    }

    /// Start a login that returns to `return_to`, with a fresh anti-forgery state.
    pub fn begin(&self, return_to: &str) -> LoginRedirect {
        let return_to = sanitize_return_path(return_to);
        let state = random_state(STATE_LEN);
        LoginRedirect {
            url: self.url_for(&return_to, Some(&state)),
            state,
            return_to,
        }
    }

    fn url_for(&self, return_to: &str, state: Option<&str>) -> Url {
        let mut url = self.login_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("redirect", return_to);
            if let Some(state) = state {
                pairs.append_pair("state", state);
            }
        }
        url
    }
}

impl LoginRedirect {
    /// Remember this login so the callback can be verified after the redirect.
    pub fn save<S: ClientStorage + ?Sized>(&self, storage: &S) -> Result<(), LoginError> {
        let payload = serde_json::to_string(self).map_err(super::StorageError::from)?;
        storage.set(PENDING_LOGIN_KEY, &payload)?;
        Ok(())
    }

    /// Load and forget the pending login, if one was saved.
    pub fn take<S: ClientStorage + ?Sized>(storage: &S) -> Result<Option<Self>, LoginError> {
        let Some(raw) = storage.get(PENDING_LOGIN_KEY)? else {
            return Ok(None);
        };
        storage.remove(PENDING_LOGIN_KEY)?;
        let pending = serde_json::from_str(&raw).map_err(super::StorageError::from)?;
        Ok(Some(pending))
    }
}

/// Extract the token from the callback URL, checking `state` when one is expected.
pub fn parse_callback(url: &Url, expected_state: Option<&str>) -> Result<LoginCallback, LoginError> {
    let mut token: Option<String> = None;
    let mut state: Option<String> = None;
    let mut error: Option<String> = None;

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "token" | "access_token" => token = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(err) = error {
        return Err(LoginError::AccessDenied(err));
    }
    let token = token
        .filter(|t| !t.trim().is_empty())
        .ok_or(LoginError::MissingToken)?;
    if let Some(expected) = expected_state {
        if state.as_deref() != Some(expected) {
            return Err(LoginError::StateMismatch);
        }
    }
    Ok(LoginCallback { token, state })
}

/// Only same-origin absolute paths are accepted as post-login destinations.
pub fn sanitize_return_path(path: &str) -> String {
    let path = path.trim();
    let same_origin = path.starts_with('/') && !path.starts_with("//") && !path.contains('\\');
    if same_origin {
        path.to_owned()
    } else {
        DEFAULT_RETURN_PATH.to_owned()
    }
}

fn random_state(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
