use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserProfile;

/// Where the session currently sits in the authentication state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Unauthenticated,
    Checking,
    Authenticated,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            SessionStatus::Unauthenticated => "unauthenticated",
            SessionStatus::Checking => "checking",
            SessionStatus::Authenticated => "authenticated",
        };
        write!(f, "{value}")
    }
}

/// Opaque credential issued by the login flow. Never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(***)")
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// A user together with the token that authenticates them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user: UserProfile,
    pub token: SessionToken,
    #[serde(default = "default_authenticated_at")]
    pub authenticated_at: DateTime<Utc>,
}

fn default_authenticated_at() -> DateTime<Utc> {
    Utc::now()
}

impl Account {
    pub fn new(user: UserProfile, token: SessionToken) -> Self {
        Self {
            user,
            token,
            authenticated_at: Utc::now(),
        }
    }
}

/// Remembered accounts, ordered by first sign-in and unique by user id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountList(Vec<Account>);

impl AccountList {
    /// Insert the account, replacing an existing entry for the same user in place.
    pub fn upsert(&mut self, account: Account) {
        match self.0.iter_mut().find(|a| a.user.id == account.user.id) {
            Some(existing) => *existing = account,
            None => self.0.push(account),
        }
    }

    pub fn remove(&mut self, user_id: &str) -> Option<Account> {
        let index = self.0.iter().position(|a| a.user.id == user_id)?;
        Some(self.0.remove(index))
    }

    pub fn get(&self, user_id: &str) -> Option<&Account> {
        self.0.iter().find(|a| a.user.id == user_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Account> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Account> for AccountList {
    fn from_iter<I: IntoIterator<Item = Account>>(iter: I) -> Self {
        let mut list = AccountList::default();
        for account in iter {
            list.upsert(account);
        }
        list
    }
}

/// In-memory session state owned by the store.
#[derive(Debug, Clone)]
pub(crate) struct Session {
    pub status: SessionStatus,
    pub active: Option<Account>,
    pub accounts: AccountList,
    pub last_error: Option<String>,
    pub revision: u64,
}

impl Session {
    pub fn empty() -> Self {
        Self {
            status: SessionStatus::Unauthenticated,
            active: None,
            accounts: AccountList::default(),
            last_error: None,
            revision: 0,
        }
    }

    pub fn authenticate(&mut self, account: Account) {
        self.accounts.upsert(account.clone());
        self.active = Some(account);
        self.status = SessionStatus::Authenticated;
        self.last_error = None;
    }

    /// Drop the active account, optionally forgetting it from the remembered list.
    pub fn sign_out(&mut self, forget: bool) -> Option<Account> {
        let active = self.active.take();
        if forget {
            if let Some(account) = &active {
                self.accounts.remove(&account.user.id);
            }
        }
        self.status = SessionStatus::Unauthenticated;
        active
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            user: self.active.as_ref().map(|a| a.user.clone()),
            accounts: self.accounts.iter().map(|a| a.user.clone()).collect(),
            last_error: self.last_error.clone(),
            revision: self.revision,
        }
    }

    pub fn envelope(&self) -> SessionEnvelope {
        SessionEnvelope {
            version: SessionEnvelope::VERSION,
            active: self.active.as_ref().map(|a| a.user.id.clone()),
            accounts: self.accounts.clone(),
        }
    }
}

/// Read-only view of the session handed to observers and renderers.
///
/// Carries no token; use [`SessionStore::token`](super::SessionStore::token) when a
/// credential is actually needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub user: Option<UserProfile>,
    pub accounts: Vec<UserProfile>,
    pub last_error: Option<String>,
    pub revision: u64,
}

impl SessionSnapshot {
    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Authenticated
    }

    /// The last transition failed and left the session signed out.
    pub fn is_error(&self) -> bool {
        self.status == SessionStatus::Unauthenticated && self.last_error.is_some()
    }
}

/// Persisted form of the session, stored as JSON under a fixed key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SessionEnvelope {
    pub version: u32,
    pub active: Option<String>,
    #[serde(default)]
    pub accounts: AccountList,
}

impl SessionEnvelope {
    pub const VERSION: u32 = 1;

    pub fn active_account(&self) -> Option<&Account> {
        self.active.as_deref().and_then(|id| self.accounts.get(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: &str, token: &str) -> Account {
        Account::new(UserProfile::new(id, format!("user-{id}")), SessionToken::new(token))
    }

    #[test]
    fn upsert_replaces_token_in_place() {
        let mut list = AccountList::default();
        list.upsert(account("u1", "a"));
        list.upsert(account("u2", "b"));
        list.upsert(account("u1", "c"));
        let ids: Vec<_> = list.iter().map(|a| a.user.id.as_str()).collect();
        assert_eq!(ids, ["u1", "u2"]);
        assert_eq!(list.get("u1").unwrap().token.expose(), "c");
    }

    #[test]
    fn token_is_redacted() {
        let token = SessionToken::new("secret-value");
        assert!(!format!("{token:?}").contains("secret"));
        assert!(!format!("{token}").contains("secret"));
        assert!(!format!("{:?}", account("u1", "secret-value")).contains("secret"));
    }

    #[test]
    fn sign_out_forgets_active_account() {
        let mut session = Session::empty();
        session.authenticate(account("u1", "a"));
        session.authenticate(account("u2", "b"));
        let removed = session.sign_out(true).unwrap();
        assert_eq!(removed.user.id, "u2");
        assert_eq!(session.status, SessionStatus::Unauthenticated);
        assert!(session.active.is_none());
        assert_eq!(session.accounts.len(), 1);
        assert!(session.accounts.get("u1").is_some());
    }

    #[test]
    fn envelope_resolves_active_account() {
        let mut session = Session::empty();
        session.authenticate(account("u1", "a"));
        let raw = serde_json::to_string(&session.envelope()).unwrap();
        let envelope: SessionEnvelope = serde_json::from_str(&raw).unwrap();
        assert_eq!(envelope.version, SessionEnvelope::VERSION);
        assert_eq!(envelope.active_account().unwrap().token.expose(), "a");
    }
}
