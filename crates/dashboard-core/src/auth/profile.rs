use serde::{Deserialize, Serialize};
use url::Url;

use super::SessionError;

const FALLBACK_AVATAR_SERVICE: &str = "https://ui-avatars.com/api/";

/// Profile of an authenticated dashboard user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    #[serde(default, alias = "name")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "avatarUrl")]
    pub avatar: Option<String>,
    #[serde(default, alias = "htmlUrl")]
    pub profile_url: Option<String>,
}

impl UserProfile {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            display_name: None,
            email: None,
            avatar: None,
            profile_url: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }

    /// Name to show in headers and menus, falling back through the other identity fields.
    pub fn display_name(&self) -> &str {
        non_blank(self.display_name.as_deref())
            .or_else(|| non_blank(Some(self.username.as_str())))
            .or_else(|| {
                non_blank(self.email.as_deref())
                    .and_then(|email| email.split('@').next())
                    .and_then(|local| non_blank(Some(local)))
            })
            .unwrap_or(self.id.as_str())
    }

    /// Avatar image URL for a square of `size` pixels.
    ///
    /// Absolute avatar references get a `size` query parameter; anything else
    /// falls back to a generated avatar keyed by the display name.
    pub fn avatar_url(&self, size: u32) -> String {
        let size = size.to_string();
        if let Some(mut url) = non_blank(self.avatar.as_deref()).and_then(|raw| Url::parse(raw).ok())
        {
            url.query_pairs_mut().append_pair("size", &size);
            return url.into();
        }

        let mut url = Url::parse(FALLBACK_AVATAR_SERVICE).expect("valid fallback avatar URL");
        url.query_pairs_mut()
            .append_pair("name", self.display_name())
            .append_pair("size", &size);
        url.into()
    }

    /// Reject records the session store must never hold.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.id.trim().is_empty() {
            return Err(SessionError::InvalidSession("user id is empty".into()));
        }
        if self.username.trim().is_empty() {
            return Err(SessionError::InvalidSession("username is empty".into()));
        }
        if let Some(email) = &self.email {
            if !email.contains('@') {
                return Err(SessionError::InvalidSession(format!(
                    "malformed email '{email}'"
                )));
            }
        }
        if let Some(profile_url) = &self.profile_url {
            Url::parse(profile_url).map_err(|err| {
                SessionError::InvalidSession(format!("malformed profile URL: {err}"))
            })?;
        }
        Ok(())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_fallbacks() {
        let mut user = UserProfile::new("u1", "ada").with_display_name("Ada Lovelace");
        assert_eq!(user.display_name(), "Ada Lovelace");

        user.display_name = Some("  ".into());
        assert_eq!(user.display_name(), "ada");

        user.username = String::new();
        user.email = Some("countess@example.com".into());
        assert_eq!(user.display_name(), "countess");

        user.email = None;
        assert_eq!(user.display_name(), "u1");
    }

    #[test]
    fn avatar_url_appends_size() {
        let user = UserProfile::new("u1", "ada").with_avatar("https://cdn.example.com/a.png");
        assert_eq!(
            user.avatar_url(64),
            "https://cdn.example.com/a.png?size=64"
        );
    }

    #[test]
    fn avatar_url_falls_back_to_generated() {
        let user = UserProfile::new("u1", "ada")
            .with_display_name("Ada Lovelace")
            .with_avatar("not a url");
        assert_eq!(
            user.avatar_url(32),
            "https://ui-avatars.com/api/?name=Ada+Lovelace&size=32"
        );
    }

    #[test]
    fn validate_rejects_malformed_records() {
        assert!(UserProfile::new("u1", "ada").validate().is_ok());
        assert!(UserProfile::new(" ", "ada").validate().is_err());
        assert!(UserProfile::new("u1", "").validate().is_err());
        assert!(UserProfile::new("u1", "ada")
            .with_email("nope")
            .validate()
            .is_err());
        let mut user = UserProfile::new("u1", "ada");
        user.profile_url = Some("::".into());
        assert!(user.validate().is_err());
    }

    #[test]
    fn deserializes_camel_case_payload() {
        let user: UserProfile = serde_json::from_value(serde_json::json!({
            "id": "u1",
            "username": "ada",
            "displayName": "Ada",
            "avatarUrl": "https://cdn.example.com/a.png",
        }))
        .unwrap();
        assert_eq!(user.display_name.as_deref(), Some("Ada"));
        assert_eq!(user.avatar.as_deref(), Some("https://cdn.example.com/a.png"));
        assert!(user.email.is_none());
    }
}
