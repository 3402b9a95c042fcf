use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::Utc;
use shared::{domain::UserId, error::BotError};
use storage::{Storage, StoredSession};
use tokio::runtime::Handle;
use tracing::{info, warn};

/// Transient per-user state, keyed by user id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserSession {
    pub busy: bool,
    /// Seconds the last successful render took; `None` when unknown.
    pub last_elapsed: Option<f64>,
    pub last_command: Option<String>,
}

impl UserSession {
    fn from_stored(stored: StoredSession) -> Self {
        Self {
            busy: stored.busy,
            last_elapsed: stored.last_elapsed_secs,
            last_command: stored.last_command,
        }
    }

    fn to_stored(&self, user_id: UserId) -> StoredSession {
        StoredSession {
            user_id,
            busy: self.busy,
            last_elapsed_secs: self.last_elapsed,
            last_command: self.last_command.clone(),
            updated_at: Utc::now(),
        }
    }
}

/// Session state held in memory and written through to the session database
/// on every mutation.
#[derive(Clone)]
pub struct SessionStore {
    storage: Storage,
    sessions: Arc<Mutex<HashMap<UserId, UserSession>>>,
}

impl SessionStore {
    /// Loads every persisted session. Busy flags left behind by a previous
    /// process are cleared first: no render outlives its process.
    pub async fn load(storage: Storage) -> anyhow::Result<Self> {
        let stale = storage.clear_busy_flags().await?;
        if stale > 0 {
            warn!(stale, "cleared busy flags left by a previous run");
        }

        let sessions: HashMap<_, _> = storage
            .load_sessions()
            .await?
            .into_iter()
            .map(|stored| (stored.user_id, UserSession::from_stored(stored)))
            .collect();
        info!(sessions = sessions.len(), "loaded persisted sessions");

        Ok(Self {
            storage,
            sessions: Arc::new(Mutex::new(sessions)),
        })
    }

    pub fn snapshot(&self, user_id: UserId) -> UserSession {
        self.lock().get(&user_id).cloned().unwrap_or_default()
    }

    pub fn is_busy(&self, user_id: UserId) -> bool {
        self.lock().get(&user_id).is_some_and(|session| session.busy)
    }

    pub fn retry_target(&self, user_id: UserId) -> Option<String> {
        self.lock()
            .get(&user_id)
            .and_then(|session| session.last_command.clone())
    }

    /// Flips busy from false to true. Returns false, changing nothing, when
    /// the user is already busy.
    pub async fn try_set_busy(&self, user_id: UserId) -> Result<bool, BotError> {
        let acquired = self.update(user_id, |session| {
            if session.busy {
                false
            } else {
                session.busy = true;
                true
            }
        });
        if !acquired {
            return Ok(false);
        }

        if let Err(error) = self.flush(user_id).await {
            self.mark_idle(user_id);
            return Err(error);
        }
        Ok(true)
    }

    pub async fn set_idle(&self, user_id: UserId) -> Result<(), BotError> {
        self.mark_idle(user_id);
        self.flush(user_id).await
    }

    /// Scoped form of [`Self::try_set_busy`]: the busy flag is held for as
    /// long as the returned guard lives.
    pub async fn try_acquire(&self, user_id: UserId) -> Result<Option<BusyGuard>, BotError> {
        if !self.try_set_busy(user_id).await? {
            return Ok(None);
        }
        Ok(Some(BusyGuard {
            store: self.clone(),
            user_id,
            released: false,
        }))
    }

    pub async fn record_render_outcome(
        &self,
        user_id: UserId,
        elapsed: Duration,
        command: &str,
    ) -> Result<(), BotError> {
        self.update(user_id, |session| {
            session.last_elapsed = Some(elapsed.as_secs_f64());
            session.last_command = Some(command.to_string());
        });
        self.flush(user_id).await
    }

    pub async fn clear_elapsed(&self, user_id: UserId) -> Result<(), BotError> {
        self.update(user_id, |session| session.last_elapsed = None);
        self.flush(user_id).await
    }

    fn mark_idle(&self, user_id: UserId) {
        self.update(user_id, |session| session.busy = false);
    }

    fn update<T>(&self, user_id: UserId, f: impl FnOnce(&mut UserSession) -> T) -> T {
        let mut sessions = self.lock();
        f(sessions.entry(user_id).or_default())
    }

    // Writes the current in-memory state, so an out-of-order flush still
    // persists a state the session actually passed through.
    async fn flush(&self, user_id: UserId) -> Result<(), BotError> {
        let stored = self.snapshot(user_id).to_stored(user_id);
        self.storage
            .upsert_session(&stored)
            .await
            .map_err(BotError::internal)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UserId, UserSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds one user's busy flag. Dropping the guard without calling
/// [`BusyGuard::release`] still clears the flag in memory immediately and
/// persists it in the background.
pub struct BusyGuard {
    store: SessionStore,
    user_id: UserId,
    released: bool,
}

impl BusyGuard {
    pub async fn release(mut self) -> Result<(), BotError> {
        self.store.mark_idle(self.user_id);
        self.released = true;
        self.store.flush(self.user_id).await
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.store.mark_idle(self.user_id);

        let Ok(handle) = Handle::try_current() else {
            return;
        };
        let store = self.store.clone();
        let user_id = self.user_id;
        handle.spawn(async move {
            if let Err(error) = store.flush(user_id).await {
                warn!(%user_id, %error, "failed to persist released busy flag");
            }
        });
    }
}

#[cfg(test)]
#[path = "tests/sessions_tests.rs"]
mod tests;
