mod api;
mod error;
mod events;
mod guard;
mod login;
mod profile;
mod session;
mod storage;
mod store;
#[cfg(test)]
mod testing;

pub use api::{AuthApi, HttpAuthApi};
pub use error::{ApiError, LoginError, SessionError, StorageError};
pub use events::{SessionEvent, SessionNotification, SubscriptionId};
pub use guard::{AuthGuard, GuardView};
pub use login::{
    parse_callback, sanitize_return_path, LoginCallback, LoginPrompt, LoginRedirect, LoginTrigger,
    PENDING_LOGIN_KEY,
};
pub use profile::UserProfile;
pub use session::{Account, AccountList, SessionSnapshot, SessionStatus, SessionToken};
pub use storage::{ClientStorage, FileStorage, MemoryStorage};
pub use store::{SessionStore, SESSION_STORAGE_KEY};
