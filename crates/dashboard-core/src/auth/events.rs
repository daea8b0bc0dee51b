use std::sync::{Arc, Mutex, PoisonError};

use super::SessionSnapshot;

/// Transition that produced a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A session check started; status is now `checking`.
    CheckStarted,
    /// A check, completed login, or restored token produced an authenticated session.
    Authenticated,
    /// A check ended without a session (missing, rejected, or unreachable).
    CheckFailed,
    /// The active account signed out.
    SignedOut,
    /// Another remembered account became active.
    AccountSwitched,
    /// A login callback carried an unusable token or profile.
    LoginRejected,
}

/// Delivered to every subscriber after a transition has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionNotification {
    pub event: SessionEvent,
    pub snapshot: SessionSnapshot,
}

/// Handle returned by `subscribe`, needed to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&SessionNotification) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Observers {
    inner: Mutex<ObserverList>,
}

#[derive(Default)]
struct ObserverList {
    next_id: u64,
    entries: Vec<(SubscriptionId, Callback)>,
}

impl Observers {
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&SessionNotification) + Send + Sync + 'static,
    {
        let mut list = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let id = SubscriptionId(list.next_id);
        list.next_id += 1;
        list.entries.push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut list = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let before = list.entries.len();
        list.entries.retain(|(entry, _)| *entry != id);
        list.entries.len() != before
    }

    /// Call every subscriber in subscription order.
    ///
    /// The list is copied first so callbacks may change subscriptions or read the store.
    /// Runs outside the state lock; notifications racing across threads are ordered by
    /// `snapshot.revision`, not by arrival.
    pub fn notify(&self, notification: &SessionNotification) {
        let callbacks: Vec<Callback> = {
            let list = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            list.entries.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for callback in callbacks {
            callback(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SessionStatus;

    fn notification(event: SessionEvent) -> SessionNotification {
        SessionNotification {
            event,
            snapshot: SessionSnapshot {
                status: SessionStatus::Unauthenticated,
                user: None,
                accounts: vec![],
                last_error: None,
                revision: 1,
            },
        }
    }

    #[test]
    fn delivers_in_subscription_order() {
        let observers = Observers::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            observers.subscribe(move |n| seen.lock().unwrap().push((tag, n.event)));
        }
        observers.notify(&notification(SessionEvent::SignedOut));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("first", SessionEvent::SignedOut),
                ("second", SessionEvent::SignedOut)
            ]
        );
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let observers = Observers::default();
        let seen = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&seen);
        let id = observers.subscribe(move |_| *counter.lock().unwrap() += 1);
        observers.notify(&notification(SessionEvent::CheckStarted));
        assert!(observers.unsubscribe(id));
        assert!(!observers.unsubscribe(id));
        observers.notify(&notification(SessionEvent::CheckFailed));
        assert_eq!(*seen.lock().unwrap(), 1);
    }
}
