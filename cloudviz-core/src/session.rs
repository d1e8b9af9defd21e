use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use cloudviz_model::AuthToken;

use crate::transport::TransportError;

/// Change notifications for the shared authentication state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn,
    LoggedOut,
    /// The backend rejected the token (401) or it expired locally.
    Invalidated,
}

/// Process-wide authentication state shared by every in-flight request.
///
/// Readers take a snapshot of the token per request. Writes go through the
/// transport (login, logout, 401 handling) and each write that changes the
/// state is broadcast to subscribers.
pub struct Session {
    token: RwLock<Option<AuthToken>>,
    events: broadcast::Sender<SessionEvent>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("authenticated", &self.token.read().is_some())
            .field("subscribers", &self.events.receiver_count())
            .finish()
    }
}

impl Session {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            token: RwLock::new(None),
            events,
        }
    }

    pub fn shared(capacity: usize) -> Arc<Self> {
        Arc::new(Self::new(capacity))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn token(&self) -> Option<AuthToken> {
        self.token.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token
            .read()
            .as_ref()
            .is_some_and(|token| !token.is_expired())
    }

    pub fn set_token(&self, token: AuthToken) {
        *self.token.write() = Some(token);
        let _ = self.events.send(SessionEvent::LoggedIn);
    }

    /// Token to attach to the next request. A missing token fails fast; an
    /// expired one is dropped and broadcast as an invalidation first.
    pub fn bearer(&self) -> Result<AuthToken, TransportError> {
        let snapshot = self.token.read().clone();
        match snapshot {
            Some(token) if !token.is_expired() => Ok(token),
            Some(_) => {
                tracing::info!("session token expired, invalidating");
                self.invalidate();
                Err(TransportError::SessionInvalid)
            }
            None => Err(TransportError::SessionInvalid),
        }
    }

    /// Drop the token after the backend refused it. Returns whether a token
    /// was actually removed; only then is `Invalidated` broadcast.
    pub fn invalidate(&self) -> bool {
        let removed = self.token.write().take().is_some();
        if removed {
            tracing::info!("session invalidated");
            let _ = self.events.send(SessionEvent::Invalidated);
        }
        removed
    }

    /// Local logout. Same bookkeeping as `invalidate` with a different event.
    pub fn clear(&self) -> bool {
        let removed = self.token.write().take().is_some();
        if removed {
            let _ = self.events.send(SessionEvent::LoggedOut);
        }
        removed
    }
}
