//! Authentication lifecycle of the current user.
//!
//! The session owns the `Anonymous -> Authenticated -> Anonymous` state
//! machine, persists the identity so a later process can re-establish it,
//! and invalidates the permission cache whenever the identity goes away.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;

use codegrade_auth::{Credentials, Session, SessionState};
use codegrade_core::UserId;

use crate::api::{ApiError, AuthApi};
use crate::permissions::PermissionCache;
use crate::store::{KeyValueStore, ScopedStore, StoreError};

/// Store scope holding the persisted identity.
pub const SESSION_SCOPE: &str = "session";
const USER_KEY: &str = "user";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("already logged in; log out first")]
    AlreadyAuthenticated,
    #[error("session store failure: {0}")]
    Store(#[from] StoreError),
}

impl SessionError {
    /// Server-reported error payload, if any.
    pub fn api_body(&self) -> Option<&crate::api::ApiErrorBody> {
        match self {
            SessionError::Api(err) => err.body(),
            _ => None,
        }
    }
}

pub struct SessionManager {
    api: Arc<dyn AuthApi>,
    permissions: PermissionCache,
    store: ScopedStore,
    state: watch::Sender<SessionState>,
}

impl SessionManager {
    pub fn new(
        api: Arc<dyn AuthApi>,
        permissions: PermissionCache,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Anonymous);
        Self {
            api,
            permissions,
            store: ScopedStore::new(store, SESSION_SCOPE),
            state,
        }
    }

    /// Log in with `credentials`.
    ///
    /// On failure the state is left untouched and the server's error is
    /// returned.
    pub async fn login(&self, credentials: &Credentials) -> Result<Session, SessionError> {
        if self.logged_in() {
            return Err(SessionError::AlreadyAuthenticated);
        }

        let payload = self.api.login(credentials).await.inspect_err(|err| {
            tracing::warn!(email = %credentials.email, error = %err, "login failed");
        })?;
        let session = payload.into_session(Some(credentials.email.as_str()));

        // Whatever is cached on disk may belong to someone else.
        if let Err(err) = self.permissions.clear_cache().await {
            tracing::warn!(error = %err, "failed to clear permission cache on login");
        }

        self.establish(session.clone()).await;
        tracing::info!(user_id = %session.id, "logged in");
        Ok(session)
    }

    /// Log out on the server, then unconditionally forget the session
    /// locally and drop cached permissions.
    ///
    /// A server failure is reported only after the local reset.
    pub async fn logout(&self) -> Result<(), SessionError> {
        let server = self.api.logout().await;
        if let Err(err) = &server {
            tracing::warn!(
                error = %err,
                "server-side logout failed; clearing local session anyway"
            );
        }

        let local = self.reset_to_anonymous().await;
        tracing::info!("logged out");

        server?;
        local
    }

    /// Re-establish the session from the stored token or cookie.
    ///
    /// On failure the session is reset to anonymous and the error returned;
    /// the caller decides where to send the user.
    pub async fn verify_login(&self) -> Result<Session, SessionError> {
        let stored = self.load_stored().await;
        let previous = self.current().or(stored);
        let token = previous.as_ref().and_then(|s| s.token.clone());

        self.api.set_access_token(token.clone());

        let payload = match self.api.current_user().await {
            Ok(payload) => payload,
            Err(err) => {
                tracing::info!(error = %err, "stored session no longer valid");
                if let Err(reset) = self.reset_to_anonymous().await {
                    tracing::warn!(error = %reset, "failed to fully reset session");
                }
                return Err(err.into());
            }
        };

        let fallback_email = previous
            .as_ref()
            .filter(|p| p.id == payload.id)
            .map(|p| p.email.clone());
        let mut session = payload.into_session(fallback_email.as_deref());
        if session.token.is_none() {
            session.token = token;
        }

        if previous.as_ref().is_some_and(|p| p.id != session.id) {
            tracing::info!(user_id = %session.id, "verified user differs from stored one");
            if let Err(err) = self.permissions.clear_cache().await {
                tracing::warn!(error = %err, "failed to clear permission cache");
            }
        }

        self.establish(session.clone()).await;
        tracing::info!(user_id = %session.id, "session verified");
        Ok(session)
    }

    pub fn logged_in(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn current(&self) -> Option<Session> {
        self.state.borrow().session().cloned()
    }

    pub fn id(&self) -> Option<UserId> {
        self.state.borrow().session().map(|s| s.id)
    }

    pub fn name(&self) -> Option<String> {
        self.state.borrow().session().map(|s| s.name.clone())
    }

    pub fn email(&self) -> Option<String> {
        self.state.borrow().session().map(|s| s.email.clone())
    }

    pub fn token(&self) -> Option<String> {
        self.state.borrow().session().and_then(|s| s.token.clone())
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn permissions(&self) -> &PermissionCache {
        &self.permissions
    }

    async fn establish(&self, session: Session) {
        self.api.set_access_token(session.token.clone());
        if let Err(err) = self.store.set_json(USER_KEY, &session).await {
            tracing::warn!(error = %err, "failed to persist session");
        }
        self.state.send_replace(SessionState::Authenticated(session));
    }

    /// Cached grants and the stored identity are gone before any subscriber
    /// sees `Anonymous`.
    async fn reset_to_anonymous(&self) -> Result<(), SessionError> {
        self.api.set_access_token(None);

        let cleared = self.permissions.clear_cache().await;
        let forgotten = self.store.remove(USER_KEY).await;
        self.state.send_replace(SessionState::Anonymous);

        cleared?;
        forgotten?;
        Ok(())
    }

    async fn load_stored(&self) -> Option<Session> {
        match self.store.get_json(USER_KEY).await {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(error = %err, "ignoring unreadable stored session");
                None
            }
        }
    }
}

impl core::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &*self.state.borrow())
            .finish()
    }
}
