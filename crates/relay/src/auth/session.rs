// In-memory bearer session store.
//
// Tokens are opaque random strings mapped to the identity that logged in
// and an absolute expiry. Entries are never mutated after insertion; a
// stale entry is dropped when a lookup finds it expired or when the
// periodic sweep runs.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use tokio::{sync::RwLock, task::JoinHandle};
use tracing::debug;

use super::AuthError;
use crate::{
    config::{DEFAULT_SESSION_TTL_SECS, MAX_SESSION_TTL_SECS},
    metrics,
};

pub const TOKEN_LENGTH: usize = 48;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub identity: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    ttl: chrono::Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_SESSION_TTL_SECS))
    }
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl.min(Duration::from_secs(MAX_SESSION_TTL_SECS)))
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_SESSION_TTL_SECS as i64));
        Self { sessions: Arc::new(RwLock::new(HashMap::new())), ttl }
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    /// Issues a fresh token for `identity`. Earlier tokens for the same
    /// identity stay valid until their own expiry.
    pub async fn issue(&self, identity: &str) -> String {
        self.issue_at(identity, Utc::now()).await
    }

    pub(crate) async fn issue_at(&self, identity: &str, issued_at: DateTime<Utc>) -> String {
        let token = generate_token();
        let expires_at =
            issued_at.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let session = Session { identity: identity.to_owned(), expires_at };
        self.sessions.write().await.insert(token.clone(), session);
        token
    }

    /// Resolves `token` to the identity it was issued for.
    pub async fn validate(&self, token: &str) -> Result<String, AuthError> {
        self.validate_at(token, Utc::now()).await
    }

    pub(crate) async fn validate_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        {
            let guard = self.sessions.read().await;
            match guard.get(token) {
                None => return Err(AuthError::UnknownToken),
                Some(session) if now < session.expires_at => return Ok(session.identity.clone()),
                Some(_) => {}
            }
        }

        let mut guard = self.sessions.write().await;
        if guard.get(token).is_some_and(|session| now >= session.expires_at) {
            guard.remove(token);
        }
        Err(AuthError::ExpiredToken)
    }

    /// Drops every session whose expiry is at or before `now`.
    pub async fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now()).await
    }

    pub(crate) async fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut guard = self.sessions.write().await;
        let before = guard.len();
        guard.retain(|_, session| now < session.expires_at);
        before - guard.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Runs [`SessionStore::purge_expired`] every `interval` until the
    /// returned task is aborted.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.reset();
            loop {
                ticker.tick().await;
                let purged = store.purge_expired().await;
                if purged > 0 {
                    metrics::add_sessions_swept(purged as u64);
                    debug!(purged, "swept expired sessions");
                }
            }
        })
    }
}

fn generate_token() -> String {
    OsRng.sample_iter(&Alphanumeric).take(TOKEN_LENGTH).map(char::from).collect()
}
