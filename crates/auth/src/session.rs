//! Session identity and lifecycle state.

use serde::{Deserialize, Serialize};

use codegrade_core::{DomainError, DomainResult, UserId};

/// The authenticated identity of the current user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: UserId,
    pub name: String,
    pub email: String,
    /// Bearer token, when the server issued one (cookie sessions have none).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl core::fmt::Debug for Session {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("email", &self.email)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Where the client stands with respect to authentication.
///
/// `Anonymous` is the initial state. The only transitions are
/// `Anonymous -> Authenticated` (login, verify) and
/// `Authenticated -> Anonymous` (logout, failed verify).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Anonymous,
    Authenticated(Session),
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::Anonymous => None,
            SessionState::Authenticated(session) => Some(session),
        }
    }
}

/// Login credentials as sent to `POST /api/v1/login`.
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    /// Build credentials, rejecting empty fields before any request is made.
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> DomainResult<Self> {
        let email = email.into().trim().to_string();
        let password = password.into();
        if email.is_empty() {
            return Err(DomainError::validation("email is required"));
        }
        if password.is_empty() {
            return Err(DomainError::validation("password is required"));
        }
        Ok(Self { email, password })
    }
}

impl core::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_require_both_fields() {
        assert!(Credentials::new("", "secret").is_err());
        assert!(Credentials::new("a@example.com", "").is_err());

        let creds = Credentials::new("  a@example.com ", "secret").unwrap();
        assert_eq!(creds.email, "a@example.com");
    }

    #[test]
    fn debug_output_hides_secrets() {
        let creds = Credentials::new("a@example.com", "hunter2").unwrap();
        assert!(!format!("{creds:?}").contains("hunter2"));

        let session = Session {
            id: UserId::new(1),
            name: "Alice".into(),
            email: "a@example.com".into(),
            token: Some("tok-123".into()),
        };
        assert!(!format!("{session:?}").contains("tok-123"));
    }

    #[test]
    fn state_accessors() {
        assert!(!SessionState::default().is_authenticated());

        let state = SessionState::Authenticated(Session {
            id: UserId::new(2),
            name: "Bob".into(),
            email: "b@example.com".into(),
            token: None,
        });
        assert!(state.is_authenticated());
        assert_eq!(state.session().map(|s| s.id), Some(UserId::new(2)));
    }
}
