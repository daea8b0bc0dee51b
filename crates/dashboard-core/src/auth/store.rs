use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use super::events::Observers;
use super::session::{Session, SessionEnvelope};
use super::storage::BestEffort;
use super::{
    Account, ApiError, AuthApi, ClientStorage, SessionError, SessionEvent, SessionNotification,
    SessionSnapshot, SessionStatus, SessionToken, StorageError, SubscriptionId, UserProfile,
};

/// Storage key holding the persisted session envelope.
pub const SESSION_STORAGE_KEY: &str = "dashboard.session";

type CheckFuture = Shared<BoxFuture<'static, SessionStatus>>;

/// Owns the client session and applies every transition to it.
///
/// Cloning yields another handle to the same session. Consumers read
/// [`snapshot`](Self::snapshot) or [`subscribe`](Self::subscribe) to transitions.
pub struct SessionStore<A, S> {
    inner: Arc<Inner<A, S>>,
}

impl<A, S> Clone for SessionStore<A, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<A, S> {
    api: A,
    storage: BestEffort<S>,
    state: Mutex<State>,
    observers: Observers,
}

struct State {
    session: Session,
    /// Bumped by every transition; a check only applies if the epoch it started in is current.
    epoch: u64,
    in_flight: Option<InFlight>,
}

struct InFlight {
    epoch: u64,
    future: CheckFuture,
}

enum CheckOutcome {
    NoSession,
    Valid { stored: Account, user: UserProfile },
    Failed { stored: Account, error: ApiError },
}

impl<A, S> SessionStore<A, S>
where
    A: AuthApi,
    S: ClientStorage,
{
    /// Create a signed-out store, restoring the remembered accounts from `storage`.
    pub fn new(api: A, storage: S) -> Self {
        let storage = BestEffort::new(storage);
        let mut session = Session::empty();
        if let Ok(Some(envelope)) = read_envelope(&storage) {
            session.accounts = envelope.accounts;
        }
        Self {
            inner: Arc::new(Inner {
                api,
                storage,
                state: Mutex::new(State {
                    session,
                    epoch: 0,
                    in_flight: None,
                }),
                observers: Observers::default(),
            }),
        }
    }

    /// Consistent copy of the current session.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.lock_state().session.snapshot()
    }

    /// Current position in the state machine.
    pub fn status(&self) -> SessionStatus {
        self.inner.lock_state().session.status
    }

    /// Credential of the active account, if any.
    pub fn token(&self) -> Option<SessionToken> {
        let state = self.inner.lock_state();
        state.session.active.as_ref().map(|a| a.token.clone())
    }

    /// Profiles of the remembered accounts, in the order they were first added.
    pub fn accounts(&self) -> Vec<UserProfile> {
        let state = self.inner.lock_state();
        state.session.accounts.iter().map(|a| a.user.clone()).collect()
    }

    /// Auth service the store validates tokens against.
    pub fn api(&self) -> &A {
        &self.inner.api
    }

    /// Register `callback` for every transition, called after the state lock is released.
    ///
    /// Transitions on one task arrive in the order they happened. Transitions racing on
    /// different threads may arrive out of order; `snapshot.revision` is the ordering key.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&SessionNotification) + Send + Sync + 'static,
    {
        self.inner.observers.subscribe(callback)
    }

    /// Stop delivering to `id`. Returns whether it was subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.observers.unsubscribe(id)
    }

    /// Validate the persisted token against the auth service.
    ///
    /// Calls made while a check is already running share its result instead of
    /// issuing another request. Failures end in `unauthenticated` with
    /// `last_error` set; they are never returned to the caller.
    pub async fn check_auth(&self) -> SessionStatus {
        let (future, started) = Inner::begin_check(&self.inner);
        if let Some(notification) = started {
            self.inner.observers.notify(&notification);
        }
        future.await
    }

    /// Second phase of the login redirect: adopt the token and profile the callback produced.
    pub fn complete_login(
        &self,
        token: impl Into<String>,
        user: UserProfile,
    ) -> Result<(), SessionError> {
        let token = SessionToken::new(token);
        let validation = if token.is_blank() {
            Err(SessionError::InvalidSession("token is empty".into()))
        } else {
            user.validate()
        };

        if let Err(err) = validation {
            warn!(error = %err, "login callback rejected");
            let snapshot = {
                let mut state = self.inner.lock_state();
                state.session.last_error = Some(err.to_string());
                state.session.revision += 1;
                state.session.snapshot()
            };
            self.inner.observers.notify(&SessionNotification {
                event: SessionEvent::LoginRejected,
                snapshot,
            });
            return Err(err);
        }

        info!(user_id = %user.id, "signed in");
        let snapshot = self.inner.transition(|session| {
            session.authenticate(Account::new(user, token));
        });
        self.inner.observers.notify(&SessionNotification {
            event: SessionEvent::Authenticated,
            snapshot,
        });
        Ok(())
    }

    /// Sign the active account out locally and, best effort, on the server.
    pub async fn perform_logout(&self) {
        // A check may still be resolving the stored account; that one is signed out too.
        let pending = self.inner.stored_if_inactive();
        let mut signed_out = None;
        let snapshot = self.inner.transition(|session| {
            signed_out = session.sign_out(true).or(pending);
            if let Some(account) = &signed_out {
                session.accounts.remove(&account.user.id);
            }
            session.last_error = None;
        });
        self.inner.observers.notify(&SessionNotification {
            event: SessionEvent::SignedOut,
            snapshot,
        });

        let Some(account) = signed_out else {
            debug!("logout without an active session");
            return;
        };
        info!(user_id = %account.user.id, "signed out");
        if let Err(err) = self.inner.api.logout(account.token.expose()).await {
            warn!(error = %err, "remote logout failed; local session already cleared");
        }
    }

    /// Make a remembered account the active session without re-authenticating.
    pub fn switch_account(&self, user_id: &str) -> Result<(), SessionError> {
        let account = {
            let state = self.inner.lock_state();
            state.session.accounts.get(user_id).cloned()
        }
        .ok_or_else(|| SessionError::AccountNotFound(user_id.to_owned()))?;

        debug!(user_id, "switching account");
        let snapshot = self.inner.transition(|session| session.authenticate(account));
        self.inner.observers.notify(&SessionNotification {
            event: SessionEvent::AccountSwitched,
            snapshot,
        });
        Ok(())
    }
}

impl<A, S> Inner<A, S>
where
    A: AuthApi,
    S: ClientStorage,
{
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a user-initiated transition, persist it, and return the resulting snapshot.
    fn transition(&self, apply: impl FnOnce(&mut Session)) -> SessionSnapshot {
        let mut state = self.lock_state();
        state.epoch += 1;
        apply(&mut state.session);
        state.session.revision += 1;
        self.persist_or_record(&mut state.session);
        state.session.snapshot()
    }

    /// Join the running check, or start one and report the `CheckStarted` notification.
    fn begin_check(this: &Arc<Self>) -> (CheckFuture, Option<SessionNotification>) {
        let mut state = this.lock_state();
        if state.session.status == SessionStatus::Checking {
            if let Some(in_flight) = &state.in_flight {
                debug!("joining in-flight session check");
                return (in_flight.future.clone(), None);
            }
        }

        state.epoch += 1;
        let epoch = state.epoch;
        state.session.status = SessionStatus::Checking;
        state.session.revision += 1;
        let future = Self::run_check(Arc::clone(this), epoch).boxed().shared();
        state.in_flight = Some(InFlight {
            epoch,
            future: future.clone(),
        });
        debug!(epoch, "session check started");
        let notification = SessionNotification {
            event: SessionEvent::CheckStarted,
            snapshot: state.session.snapshot(),
        };
        (future, Some(notification))
    }

    async fn run_check(this: Arc<Self>, epoch: u64) -> SessionStatus {
        let outcome = match this.stored_active() {
            None => CheckOutcome::NoSession,
            Some(stored) => match this.api.who_am_i(stored.token.expose()).await {
                Ok(user) => CheckOutcome::Valid { stored, user },
                Err(error) => CheckOutcome::Failed { stored, error },
            },
        };
        this.finish_check(epoch, outcome)
    }

    fn finish_check(&self, epoch: u64, outcome: CheckOutcome) -> SessionStatus {
        let notification = {
            let mut state = self.lock_state();
            if state.in_flight.as_ref().is_some_and(|f| f.epoch == epoch) {
                state.in_flight = None;
            }
            if state.epoch != epoch {
                debug!(epoch, current = state.epoch, "discarding stale session check");
                return state.session.status;
            }

            let session = &mut state.session;
            let (event, persist) = match outcome {
                CheckOutcome::NoSession => {
                    session.sign_out(false);
                    (SessionEvent::CheckFailed, false)
                }
                CheckOutcome::Valid { stored, user } => {
                    if stored.user.id != user.id {
                        session.accounts.remove(&stored.user.id);
                    }
                    info!(user_id = %user.id, "session restored");
                    session.authenticate(Account::new(user, stored.token));
                    (SessionEvent::Authenticated, true)
                }
                CheckOutcome::Failed { stored, error } => {
                    session.active = None;
                    session.status = SessionStatus::Unauthenticated;
                    session.last_error = Some(SessionError::from(&error).to_string());
                    let invalid = error.invalidates_session();
                    if invalid {
                        warn!(user_id = %stored.user.id, "stored session rejected; forgetting it");
                        session.accounts.remove(&stored.user.id);
                    } else {
                        warn!(error = %error, "session check failed; keeping stored session");
                    }
                    (SessionEvent::CheckFailed, invalid)
                }
            };
            session.revision += 1;
            if persist {
                self.persist_or_record(session);
            }
            SessionNotification {
                event,
                snapshot: session.snapshot(),
            }
        };

        let status = notification.snapshot.status;
        self.observers.notify(&notification);
        status
    }

    /// Active account as recorded in durable storage, or in memory when storage
    /// cannot be read or has missed a write.
    fn stored_active(&self) -> Option<Account> {
        if self.storage.is_degraded() {
            debug!("storage degraded; checking the in-memory session");
            return self.lock_state().session.active.clone();
        }
        match read_envelope(&self.storage) {
            Ok(envelope) => envelope.and_then(|e| e.active_account().cloned()),
            Err(_) => self.lock_state().session.active.clone(),
        }
    }

    fn stored_if_inactive(&self) -> Option<Account> {
        if self.lock_state().session.active.is_some() {
            return None;
        }
        read_envelope(&self.storage)
            .ok()
            .flatten()
            .and_then(|e| e.active_account().cloned())
    }

    /// Persist `session`; a failure is kept in `last_error` and the session stays in memory.
    fn persist_or_record(&self, session: &mut Session) {
        if let Err(err) = self.persist(&session.envelope()) {
            session.last_error = Some(SessionError::from(err).to_string());
        }
    }

    fn persist(&self, envelope: &SessionEnvelope) -> Result<(), StorageError> {
        if envelope.active.is_none() && envelope.accounts.is_empty() {
            return self.storage.clear(SESSION_STORAGE_KEY);
        }
        let payload = serde_json::to_string(envelope)?;
        self.storage.write(SESSION_STORAGE_KEY, &payload)
    }
}

fn read_envelope<S: ClientStorage>(
    storage: &BestEffort<S>,
) -> Result<Option<SessionEnvelope>, StorageError> {
    let Some(raw) = storage.read(SESSION_STORAGE_KEY)? else {
        return Ok(None);
    };
    match serde_json::from_str::<SessionEnvelope>(&raw) {
        Ok(envelope) if envelope.version == SessionEnvelope::VERSION => Ok(Some(envelope)),
        Ok(envelope) => {
            warn!(version = envelope.version, "ignoring session stored by another version");
            Ok(None)
        }
        Err(err) => {
            warn!(error = %err, "discarding corrupt stored session");
            storage.clear(SESSION_STORAGE_KEY)?;
            Ok(None)
        }
    }
}
