use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The identity provider's account record for a signed-up user.
///
/// `app_metadata.provider` tells us how the account was created
/// ("email", "google", ...); `user_metadata` carries the profile hints
/// the provider supplied (full name, avatar).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub email: Option<String>,
    #[serde(default)]
    pub app_metadata: serde_json::Value,
    #[serde(default)]
    pub user_metadata: serde_json::Value,
    #[serde(default)]
    pub created_at: Option<chrono::DateTime<Utc>>,
    #[serde(default)]
    pub last_sign_in_at: Option<chrono::DateTime<Utc>>,
}

impl Identity {
    pub fn provider(&self) -> &str {
        self.app_metadata
            .get("provider")
            .and_then(|v| v.as_str())
            .unwrap_or("email")
    }

    pub fn is_oauth(&self) -> bool {
        self.provider() != "email"
    }

    /// Best-effort display name: provider metadata first, then the local
    /// part of the email address.
    pub fn display_name(&self) -> String {
        for key in ["full_name", "name"] {
            if let Some(name) = self.user_metadata.get(key).and_then(|v| v.as_str()) {
                if !name.trim().is_empty() {
                    return name.trim().to_string();
                }
            }
        }
        self.email
            .as_deref()
            .and_then(|e| e.split('@').next())
            .unwrap_or("Member")
            .to_string()
    }

    pub fn email_normalized(&self) -> Option<String> {
        self.email.as_deref().map(|e| e.trim().to_lowercase())
    }
}

/// A live authentication grant issued by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_in: i64,
    /// Unix timestamp of expiry; derived from `expires_in` when the
    /// provider omits it.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: Identity,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {
    /// Expired (or about to expire) sessions must be refreshed before
    /// their token is used. A 30 second margin absorbs clock skew.
    pub fn is_expired(&self) -> bool {
        let expires_at = self
            .expires_at
            .unwrap_or_else(|| Utc::now().timestamp() + self.expires_in);
        Utc::now().timestamp() + 30 >= expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuthProvider {
    Google,
}

impl std::fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OAuthProvider::Google => write!(f, "google"),
        }
    }
}

/// Kind of transition reported on the auth-change bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthChangeEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

impl AuthChangeEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SignedIn => "signed_in",
            Self::SignedOut => "signed_out",
            Self::TokenRefreshed => "token_refreshed",
            Self::UserUpdated => "user_updated",
            Self::PasswordRecovery => "password_recovery",
        }
    }
}

impl std::fmt::Display for AuthChangeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One transition on the auth-change bus. `session` is `None` exactly
/// when the transition leaves the client signed out.
#[derive(Debug, Clone)]
pub struct AuthChange {
    pub event: AuthChangeEvent,
    pub session: Option<Session>,
}
