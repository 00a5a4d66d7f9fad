//! Per-session state held by the client.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{MutexGuard, watch};

use crate::api::UserProfile;

/// What the UI should render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    LoggedIn(UserProfile),
    LoggedOut,
}

/// The token pair a client currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTokens {
    pub access_token: String,
    pub refresh_token: String,
}

/// Tokens, the refresh gate, and a state channel for one signed-in user.
///
/// Construct one per session and hand it to [`super::SessionClient`] in an
/// `Arc`. Cloned receivers from [`SessionContext::subscribe`] see every
/// login and logout.
pub struct SessionContext {
    tokens: Mutex<Option<StoredTokens>>,
    refresh_gate: tokio::sync::Mutex<()>,
    state: watch::Sender<SessionState>,
    rotations: AtomicU64,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState::LoggedOut);
        Self {
            tokens: Mutex::new(None),
            refresh_gate: tokio::sync::Mutex::new(()),
            state,
            rotations: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn is_logged_in(&self) -> bool {
        matches!(*self.state.borrow(), SessionState::LoggedIn(_))
    }

    pub fn tokens(&self) -> Option<StoredTokens> {
        self.lock_tokens().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.lock_tokens().as_ref().map(|t| t.access_token.clone())
    }

    /// Number of successful refresh rotations performed through this context.
    pub fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::SeqCst)
    }

    /// Store a fresh session and publish the signed-in user.
    pub fn establish(&self, tokens: StoredTokens, user: UserProfile) {
        *self.lock_tokens() = Some(tokens);
        self.state.send_replace(SessionState::LoggedIn(user));
    }

    /// Drop every token and publish the signed-out state.
    pub fn clear(&self) {
        *self.lock_tokens() = None;
        self.state.send_replace(SessionState::LoggedOut);
    }

    pub(crate) fn record_rotation(&self, tokens: StoredTokens, user: UserProfile) {
        self.rotations.fetch_add(1, Ordering::SeqCst);
        self.establish(tokens, user);
    }

    /// Serializes refresh attempts. Hold the guard across the whole rotation.
    pub(crate) async fn refresh_gate(&self) -> MutexGuard<'_, ()> {
        self.refresh_gate.lock().await
    }

    fn lock_tokens(&self) -> std::sync::MutexGuard<'_, Option<StoredTokens>> {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> UserProfile {
        UserProfile {
            id: "u1".into(),
            name: "Ann".into(),
            email: "ann@x.com".into(),
            avatar: String::new(),
            is_email_verified: true,
        }
    }

    fn tokens(n: u32) -> StoredTokens {
        StoredTokens {
            access_token: format!("access-{}", n),
            refresh_token: format!("refresh-{}", n),
        }
    }

    #[test]
    fn test_starts_logged_out() {
        let ctx = SessionContext::new();
        assert_eq!(ctx.state(), SessionState::LoggedOut);
        assert!(ctx.tokens().is_none());
        assert_eq!(ctx.rotations(), 0);
    }

    #[tokio::test]
    async fn test_state_changes_are_published() {
        let ctx = SessionContext::new();
        let mut rx = ctx.subscribe();

        ctx.establish(tokens(1), profile());
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), SessionState::LoggedIn(profile()));
        assert_eq!(ctx.access_token().as_deref(), Some("access-1"));

        ctx.clear();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), SessionState::LoggedOut);
        assert!(ctx.access_token().is_none());
    }

    #[test]
    fn test_record_rotation_counts() {
        let ctx = SessionContext::new();
        ctx.establish(tokens(1), profile());
        ctx.record_rotation(tokens(2), profile());

        assert_eq!(ctx.rotations(), 1);
        assert_eq!(ctx.tokens(), Some(tokens(2)));
        assert!(ctx.is_logged_in());
    }
}
