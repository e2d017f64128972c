//! Fixed-size pool of rendering sessions.
//!
//! The pool is the single concurrency control point of the engine: a
//! collection worker cannot start until it holds a [`SessionLease`], so at most
//! `size()` collections are active at once.
//!
//! # Concurrency Model
//!
//! - Busy flags live behind one `Mutex`; `try_acquire` tests and sets a flag
//!   in a single critical section, so two callers can never hold the same session
//! - `acquire` polls `try_acquire` at a fixed interval until the timeout elapses
//! - A lease releases its session on drop; explicit [`SessionPool::release`] is
//!   idempotent
//! - Acquire/release never touch the rendering context itself

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::RenderSession;

/// A session shared between the pool and its current lease holder.
pub type SharedSession = Arc<dyn RenderSession>;

/// Errors raised by the session pool.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// No session became free within the caller's timeout.
    #[error(
        "no rendering session became available within {waited:?} (pool size {pool_size}); increase the pool size or look for stuck sessions"
    )]
    Exhausted {
        /// Number of sessions in the pool.
        pool_size: usize,
        /// How long the caller waited.
        waited: Duration,
    },

    /// A pool needs at least one session.
    #[error("session pool must contain at least one session")]
    Empty,
}

#[derive(Debug, Clone, Copy)]
struct SlotState {
    busy: bool,
    last_used: Instant,
}

/// Point-in-time view of one pooled session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    /// Stable session identifier (its position in the pool).
    pub id: usize,
    /// Whether a lease currently holds the session.
    pub busy: bool,
    /// When the session was last released (or created).
    pub last_used: Instant,
}

/// Fixed-size pool of exclusive-use sessions.
pub struct SessionPool {
    sessions: Vec<SharedSession>,
    slots: Mutex<Vec<SlotState>>,
    poll_interval: Duration,
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("size", &self.sessions.len())
            .field("busy", &self.busy_count())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl SessionPool {
    /// Creates a pool owning `sessions`.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Empty`] when `sessions` is empty.
    pub fn new(sessions: Vec<SharedSession>, poll_interval: Duration) -> Result<Self, PoolError> {
        if sessions.is_empty() {
            return Err(PoolError::Empty);
        }
        let now = Instant::now();
        let slots = vec![
            SlotState {
                busy: false,
                last_used: now,
            };
            sessions.len()
        ];
        debug!(size = sessions.len(), ?poll_interval, "creating session pool");
        Ok(Self {
            sessions,
            slots: Mutex::new(slots),
            poll_interval,
        })
    }

    /// Number of sessions in the pool.
    #[must_use]
    pub fn size(&self) -> usize {
        self.sessions.len()
    }

    /// Number of sessions currently leased.
    #[must_use]
    pub fn busy_count(&self) -> usize {
        self.lock_slots().iter().filter(|slot| slot.busy).count()
    }

    /// Snapshot of every session's bookkeeping.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        self.lock_slots()
            .iter()
            .enumerate()
            .map(|(id, slot)| SessionInfo {
                id,
                busy: slot.busy,
                last_used: slot.last_used,
            })
            .collect()
    }

    /// Leases a free session without waiting.
    ///
    /// The least recently used free session is preferred.
    #[must_use]
    pub fn try_acquire(self: &Arc<Self>) -> Option<SessionLease> {
        let id = {
            let mut slots = self.lock_slots();
            let (id, slot) = slots
                .iter_mut()
                .enumerate()
                .filter(|(_, slot)| !slot.busy)
                .min_by_key(|(_, slot)| slot.last_used)?;
            slot.busy = true;
            id
        };
        Some(SessionLease {
            id,
            session: Arc::clone(&self.sessions[id]),
            pool: Arc::clone(self),
            released: AtomicBool::new(false),
        })
    }

    /// Leases a free session, waiting up to `timeout` for one to be released.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Exhausted`] if no session frees up in time.
    #[instrument(level = "debug", skip(self), fields(pool_size = self.size()))]
    pub async fn acquire(self: &Arc<Self>, timeout: Duration) -> Result<SessionLease, PoolError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(lease) = self.try_acquire() {
                debug!(session_id = lease.id(), "session acquired");
                return Ok(lease);
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(?timeout, "session pool exhausted");
                return Err(PoolError::Exhausted {
                    pool_size: self.size(),
                    waited: timeout,
                });
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Returns a leased session to the pool.
    ///
    /// Safe to call more than once, and safe after the lease holder failed;
    /// only the first call for a lease has any effect.
    pub fn release(&self, lease: &SessionLease) {
        if lease.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.release_slot(lease.id);
    }

    /// Closes every session. Call once at shutdown, after all leases are gone.
    pub async fn close(&self) {
        let busy = self.busy_count();
        if busy > 0 {
            warn!(busy, "closing session pool with leased sessions");
        }
        for (id, session) in self.sessions.iter().enumerate() {
            if let Err(e) = session.close().await {
                warn!(session_id = id, error = %e, "failed to close session");
            }
        }
        info!(size = self.size(), "session pool closed");
    }

    fn release_slot(&self, id: usize) {
        let mut slots = self.lock_slots();
        if let Some(slot) = slots.get_mut(id) {
            slot.busy = false;
            slot.last_used = Instant::now();
        }
        debug!(session_id = id, "session released");
    }

    fn lock_slots(&self) -> MutexGuard<'_, Vec<SlotState>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive, non-owning handle on a pooled session.
///
/// Dropping the lease releases the session.
pub struct SessionLease {
    id: usize,
    session: SharedSession,
    pool: Arc<SessionPool>,
    released: AtomicBool,
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease")
            .field("id", &self.id)
            .field("released", &self.released.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl SessionLease {
    /// Identifier of the leased session.
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// The leased session.
    #[must_use]
    pub fn session(&self) -> &dyn RenderSession {
        self.session.as_ref()
    }

    /// Releases the session early; equivalent to dropping the lease.
    pub fn release(&self) {
        self.pool.release(self);
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.pool.release(self);
    }
}
