// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Identity records issued by the auth backend.
//!
//! These are owned by the identity provider; the rest of the crate only
//! observes them as they move through auth events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Identity record as returned by the auth backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    /// When the email address was confirmed (None until confirmed)
    #[serde(default)]
    pub email_confirmed_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub last_sign_in_at: Option<String>,
}

/// Token bundle proving an authenticated identity.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Access token expiry (Unix timestamp, seconds)
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub expires_at: i64,
    pub user: AuthUser,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.expires_at, 0).unwrap_or_default()
    }

    /// True if the access token expires within `margin` of `now`.
    pub fn expires_within(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        now + margin >= self.expires_at()
    }
}

// Tokens stay out of logs.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

/// Kind of identity change reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEventKind {
    SignedIn,
    TokenRefreshed,
    SignedOut,
    UserUpdated,
    /// Any other provider notification, keyed by its wire name.
    Other(String),
}

impl AuthEventKind {
    pub fn as_str(&self) -> &str {
        match self {
            AuthEventKind::SignedIn => "SIGNED_IN",
            AuthEventKind::TokenRefreshed => "TOKEN_REFRESHED",
            AuthEventKind::SignedOut => "SIGNED_OUT",
            AuthEventKind::UserUpdated => "USER_UPDATED",
            AuthEventKind::Other(name) => name,
        }
    }
}

impl FromStr for AuthEventKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "SIGNED_IN" => AuthEventKind::SignedIn,
            "TOKEN_REFRESHED" => AuthEventKind::TokenRefreshed,
            "SIGNED_OUT" => AuthEventKind::SignedOut,
            "USER_UPDATED" => AuthEventKind::UserUpdated,
            other => AuthEventKind::Other(other.to_string()),
        })
    }
}

impl fmt::Display for AuthEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single identity-change notification.
#[derive(Debug, Clone)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub session: Option<Session>,
}

impl AuthEvent {
    pub fn new(kind: AuthEventKind, session: Option<Session>) -> Self {
        Self { kind, session }
    }

    pub fn signed_in(session: Session) -> Self {
        Self::new(AuthEventKind::SignedIn, Some(session))
    }

    pub fn token_refreshed(session: Session) -> Self {
        Self::new(AuthEventKind::TokenRefreshed, Some(session))
    }

    pub fn signed_out() -> Self {
        Self::new(AuthEventKind::SignedOut, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_expiring_at(expires_at: i64) -> Session {
        Session {
            access_token: "secret-access".to_string(),
            refresh_token: "secret-refresh".to_string(),
            token_type: "bearer".to_string(),
            expires_at,
            user: AuthUser {
                id: "u1".to_string(),
                email: Some("ann@x.com".to_string()),
                email_confirmed_at: None,
                created_at: None,
                last_sign_in_at: None,
            },
        }
    }

    #[test]
    fn test_event_kind_parses_known_and_unknown_names() {
        assert_eq!(
            "SIGNED_IN".parse::<AuthEventKind>().unwrap(),
            AuthEventKind::SignedIn
        );
        assert_eq!(
            "USER_UPDATED".parse::<AuthEventKind>().unwrap(),
            AuthEventKind::UserUpdated
        );
        let other = "PASSWORD_RECOVERY".parse::<AuthEventKind>().unwrap();
        assert_eq!(other, AuthEventKind::Other("PASSWORD_RECOVERY".to_string()));
        assert_eq!(other.to_string(), "PASSWORD_RECOVERY");
    }

    #[test]
    fn test_session_expiry_margin() {
        let now = Utc::now();
        let session = session_expiring_at(now.timestamp() + 30);

        assert!(session.expires_within(now, chrono::Duration::seconds(60)));
        assert!(!session.expires_within(now, chrono::Duration::seconds(10)));
    }

    #[test]
    fn test_session_debug_redacts_tokens() {
        let rendered = format!("{:?}", session_expiring_at(0));
        assert!(!rendered.contains("secret-access"));
        assert!(!rendered.contains("secret-refresh"));
        assert!(rendered.contains("ann@x.com"));
    }

    #[test]
    fn test_session_deserializes_backend_payload() {
        let json = r#"{
            "access_token": "a",
            "refresh_token": "r",
            "expires_at": 1700000000,
            "expires_in": 3600,
            "user": {"id": "u1", "email": "ann@x.com", "aud": "authenticated"}
        }"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert_eq!(session.user_id(), "u1");
        assert_eq!(session.token_type, "bearer");
        assert_eq!(session.user.email_confirmed_at, None);
    }
}
