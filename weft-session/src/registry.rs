//! Live sessions by resumption token, with the expiry sweep.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::RegistryError;
use crate::lifecycle::LifecycleState;
use crate::session::{SessionHandle, SessionToken};
use crate::transport::Transport;

struct RegistryInner {
    sessions: Mutex<HashMap<SessionToken, SessionHandle>>,
    lifetime: Duration,
}

impl RegistryInner {
    /// Expire sessions disconnected for longer than the lifetime and drop
    /// finished ones. Runs under the same lock as `resume`.
    fn sweep(&self, now: Instant) -> Vec<SessionToken> {
        let mut sessions = self.sessions.lock();
        let mut expired = Vec::new();
        for (token, handle) in sessions.iter() {
            let Some(since) = handle.disconnected_since() else {
                continue;
            };
            if handle.state() == LifecycleState::Disconnected
                && now.saturating_duration_since(since) >= self.lifetime
                && handle.expire()
            {
                info!(session = %token.prefix(), "session expired");
                expired.push(token.clone());
            }
        }
        sessions.retain(|_, handle| !handle.state().is_terminal());
        expired
    }
}

/// Cloneable registry of live sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    /// `lifetime` is how long a disconnected session waits for its client.
    pub fn new(lifetime: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: Mutex::new(HashMap::new()),
                lifetime,
            }),
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.inner.lifetime
    }

    pub fn insert(&self, handle: SessionHandle) {
        self.inner
            .sessions
            .lock()
            .insert(handle.token().clone(), handle);
    }

    pub fn get(&self, token: &str) -> Option<SessionHandle> {
        self.inner
            .sessions
            .lock()
            .get(&SessionToken::from(token))
            .cloned()
    }

    /// Reattach `transport` to the session named by `token`.
    pub fn resume(
        &self,
        token: &str,
        transport: Arc<dyn Transport>,
    ) -> Result<SessionHandle, RegistryError> {
        let mut sessions = self.inner.sessions.lock();
        let token = SessionToken::from(token);
        let Some(handle) = sessions.get(&token).cloned() else {
            return Err(RegistryError::InvalidToken);
        };
        if handle.reattach(transport) {
            debug!(session = %token.prefix(), "session resumed");
            Ok(handle)
        } else {
            sessions.remove(&token);
            Err(RegistryError::InvalidToken)
        }
    }

    pub fn sweep(&self, now: Instant) -> Vec<SessionToken> {
        self.inner.sweep(now)
    }

    /// Sweep every `interval` until the registry is dropped.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    debug!("session registry gone; sweeper exiting");
                    return;
                };
                inner.sweep(Instant::now());
            }
        })
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.lock().is_empty()
    }

    pub fn sessions(&self) -> Vec<SessionHandle> {
        self.inner.sessions.lock().values().cloned().collect()
    }

    /// Number of sessions per lifecycle state, every state present.
    pub fn counts(&self) -> BTreeMap<LifecycleState, usize> {
        let mut counts: BTreeMap<_, _> = LifecycleState::ALL.iter().map(|s| (*s, 0)).collect();
        for handle in self.inner.sessions.lock().values() {
            *counts.entry(handle.state()).or_default() += 1;
        }
        counts
    }

    /// Close every session, e.g. on shutdown.
    pub fn close_all(&self) {
        for handle in self.sessions() {
            handle.close();
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .field("lifetime", &self.inner.lifetime)
            .finish()
    }
}
