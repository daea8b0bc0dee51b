use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use reqwest::StatusCode;
use tokio::sync::Semaphore;

use super::{ApiError, AuthApi, UserProfile};

/// In-process auth service with scripted users and an optional gate that holds
/// `who_am_i` calls until released.
#[derive(Default)]
pub(crate) struct ScriptedApi {
    users: Mutex<HashMap<String, UserProfile>>,
    gate: Option<Semaphore>,
    offline: AtomicBool,
    logout_fails: AtomicBool,
    who_am_i_calls: AtomicUsize,
    logout_calls: AtomicUsize,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn with_user(self, token: &str, user: UserProfile) -> Self {
        self.users.lock().unwrap().insert(token.to_owned(), user);
        self
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_logout_fails(&self, fails: bool) {
        self.logout_fails.store(fails, Ordering::SeqCst);
    }

    pub fn who_am_i_calls(&self) -> usize {
        self.who_am_i_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }
}

fn unavailable() -> ApiError {
    ApiError::Status {
        status: StatusCode::SERVICE_UNAVAILABLE,
        body: "offline".into(),
    }
}

impl AuthApi for ScriptedApi {
    async fn who_am_i(&self, token: &str) -> Result<UserProfile, ApiError> {
        self.who_am_i_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        let user = self.users.lock().unwrap().get(token).cloned();
        user.ok_or(ApiError::Unauthorized(StatusCode::UNAUTHORIZED))
    }

    async fn logout(&self, _token: &str) -> Result<(), ApiError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        if self.logout_fails.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(())
    }
}

impl AuthApi for Arc<ScriptedApi> {
    async fn who_am_i(&self, token: &str) -> Result<UserProfile, ApiError> {
        (**self).who_am_i(token).await
    }

    async fn logout(&self, token: &str) -> Result<(), ApiError> {
        (**self).logout(token).await
    }
}
