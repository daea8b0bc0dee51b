use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use super::{
    AuthApi, ClientStorage, LoginPrompt, LoginTrigger, SessionSnapshot, SessionStatus,
    SessionStore,
};

/// What a guard renders in place of its protected subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardView<'a, F> {
    /// A session check is running.
    Loading,
    /// Render the protected children unchanged.
    Children,
    /// Render the caller-supplied fallback.
    Fallback(&'a F),
    /// Ask the user to sign in, returning to the current path afterwards.
    LoginPrompt(LoginPrompt),
    /// Render nothing.
    Nothing,
    /// Navigate away from the subtree.
    Redirect(String),
}

#[derive(Debug)]
enum Policy<F> {
    RequireAuth {
        fallback: Option<F>,
        prompt: Option<LoginTrigger>,
    },
    Optional,
    GuestOnly {
        redirect_to: String,
    },
}

/// Gates a UI subtree on the session status. Holds no session state of its own.
#[derive(Debug)]
pub struct AuthGuard<F = ()> {
    policy: Policy<F>,
    mounted: AtomicBool,
}

impl<F> AuthGuard<F> {
    /// Children render only for an authenticated session.
    pub fn required() -> Self {
        Self::with_policy(Policy::RequireAuth {
            fallback: None,
            prompt: None,
        })
    }

    /// Children always render once the check settles.
    pub fn optional() -> Self {
        Self::with_policy(Policy::Optional)
    }

    /// Children render only for visitors; signed-in users are sent to `redirect_to`.
    pub fn guest_only(redirect_to: impl Into<String>) -> Self {
        Self::with_policy(Policy::GuestOnly {
            redirect_to: redirect_to.into(),
        })
    }

    fn with_policy(policy: Policy<F>) -> Self {
        Self {
            policy,
            mounted: AtomicBool::new(false),
        }
    }

    /// Render `fallback` instead of the subtree when signed out. Ignored unless auth is required.
    pub fn with_fallback(mut self, fallback: F) -> Self {
        if let Policy::RequireAuth { fallback: slot, .. } = &mut self.policy {
            *slot = Some(fallback);
        }
        self
    }

    /// Offer a login prompt when signed out and no fallback is set.
    pub fn with_login_prompt(mut self, trigger: LoginTrigger) -> Self {
        if let Policy::RequireAuth { prompt, .. } = &mut self.policy {
            *prompt = Some(trigger);
        }
        self
    }

    /// Trigger the session check the first time the guard mounts.
    ///
    /// Later mounts, and mounts over an already authenticated session, only read the status.
    pub async fn mount<A, S>(&self, store: &SessionStore<A, S>) -> SessionStatus
    where
        A: AuthApi,
        S: ClientStorage,
    {
        if self.mounted.swap(true, Ordering::SeqCst) {
            return store.status();
        }
        if store.status() == SessionStatus::Authenticated {
            debug!("guard mounted over an authenticated session");
            return SessionStatus::Authenticated;
        }
        store.check_auth().await
    }

    pub fn view(&self, snapshot: &SessionSnapshot, current_path: &str) -> GuardView<'_, F> {
        if snapshot.status == SessionStatus::Checking {
            return GuardView::Loading;
        }
        let authenticated = snapshot.status == SessionStatus::Authenticated;

        match &self.policy {
            Policy::Optional => GuardView::Children,
            Policy::GuestOnly { redirect_to } => {
                if authenticated {
                    GuardView::Redirect(redirect_to.clone())
                } else {
                    GuardView::Children
                }
            }
            Policy::RequireAuth { .. } if authenticated => GuardView::Children,
            Policy::RequireAuth {
                fallback: Some(fallback),
                ..
            } => GuardView::Fallback(fallback),
            Policy::RequireAuth {
                prompt: Some(trigger),
                ..
            } => GuardView::LoginPrompt(trigger.prompt(current_path)),
            Policy::RequireAuth { .. } => GuardView::Nothing,
        }
    }
}
