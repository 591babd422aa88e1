//! Bounded asynchronous connection pool.
//!
//! Connections are opened lazily through the factory up to the configured
//! maximum. Acquire hands out an idle connection when one exists, opens a
//! new one while under the limit, and otherwise queues the caller in FIFO
//! order. Release returns healthy connections to the idle set and discards
//! tainted ones.
//!
//! ## Concurrency
//!
//! All mutable pool state lives behind a single mutex; callers only ever
//! observe it through acquire/release. Handoff to a waiter travels through
//! a oneshot channel carrying the lease guard itself: if the waiter was
//! cancelled, the send fails (or the unclaimed guard is dropped) and the
//! guard's drop returns the connection to the pool, so a cancelled acquire
//! can never strand a connection it will never see.
//!
//! ## Invariant
//!
//! `idle + leased + opening <= max_size` at all times. A connection is
//! never simultaneously idle and leased.

use std::collections::{HashSet, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{Notify, oneshot};
use tracing::{debug, warn};

use crate::config::PoolConfig;
use crate::connection::{Connection, ConnectionError, ConnectionFactory};

/// Pool errors.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The configured acquire timeout elapsed before a connection became
    /// available.
    #[error("timed out waiting for a pooled connection")]
    Exhausted,
    /// The released connection is not leased from this pool.
    #[error("connection is not leased from this pool")]
    InvalidRelease,
    /// The pool is draining or drained.
    #[error("pool is closed")]
    Closed,
    /// Opening a new connection failed; reported to the waiting caller,
    /// never retried silently.
    #[error("failed to open a pooled connection: {0}")]
    Connect(#[from] ConnectionError),
}

/// What a queued waiter receives.
enum Handoff {
    /// A released connection, already leased to the waiter.
    Lease(PooledConn),
    /// Capacity freed up; re-plan (and possibly open a fresh connection).
    Retry,
}

/// A bounded pool of connections drawn from a factory.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    factory: ConnectionFactory,
    config: PoolConfig,
    state: Mutex<PoolState>,
    /// Signalled whenever a lease ends or an open slot frees; drain waits
    /// on this.
    released: Notify,
}

struct PoolState {
    idle: Vec<Connection>,
    leased: HashSet<u64>,
    /// Connections currently being opened; they count toward capacity.
    opening: usize,
    next_lease: u64,
    waiters: VecDeque<oneshot::Sender<Handoff>>,
    closed: bool,
}

impl PoolState {
    fn total(&self) -> usize {
        self.idle.len() + self.leased.len() + self.opening
    }

    fn new_lease(&mut self) -> u64 {
        let lease = self.next_lease;
        self.next_lease += 1;
        self.leased.insert(lease);
        lease
    }
}

impl Pool {
    /// Creates an empty pool; connections are opened lazily on demand.
    pub fn new(factory: ConnectionFactory, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                factory,
                config,
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    leased: HashSet::new(),
                    opening: 0,
                    next_lease: 0,
                    waiters: VecDeque::new(),
                    closed: false,
                }),
                released: Notify::new(),
            }),
        }
    }

    /// Number of idle connections.
    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Number of currently leased connections.
    pub fn leased_count(&self) -> usize {
        self.inner.state.lock().leased.len()
    }

    /// Acquires a leased connection, waiting if the pool is at capacity.
    ///
    /// With an `acquire_timeout` configured, waiting longer than the
    /// timeout fails with [`PoolError::Exhausted`]; without one, the wait
    /// is unbounded.
    pub async fn acquire(&self) -> Result<PooledConn, PoolError> {
        match self.inner.config.acquire_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.acquire_inner())
                .await
                .map_err(|_| PoolError::Exhausted)?,
            None => self.acquire_inner().await,
        }
    }

    async fn acquire_inner(&self) -> Result<PooledConn, PoolError> {
        loop {
            enum Plan {
                Ready(PooledConn),
                Open,
                Wait(oneshot::Receiver<Handoff>),
            }

            let plan = {
                let mut state = self.inner.state.lock();
                if state.closed {
                    return Err(PoolError::Closed);
                }
                if let Some(connection) = state.idle.pop() {
                    let lease = state.new_lease();
                    Plan::Ready(PooledConn::new(connection, lease, &self.inner))
                } else if state.total() < self.inner.config.max_size {
                    state.opening += 1;
                    Plan::Open
                } else {
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push_back(tx);
                    Plan::Wait(rx)
                }
            };

            match plan {
                Plan::Ready(lease) => return Ok(lease),
                Plan::Open => {
                    // The slot reservation must survive cancellation of
                    // this future while the connect is in flight
                    let mut slot = OpeningSlot {
                        inner: Arc::clone(&self.inner),
                        armed: true,
                    };
                    let connection = self.inner.factory.connect().await?;
                    let mut state = self.inner.state.lock();
                    state.opening -= 1;
                    slot.armed = false;
                    if state.closed {
                        drop(state);
                        drop(connection);
                        self.inner.released.notify_waiters();
                        return Err(PoolError::Closed);
                    }
                    let lease = state.new_lease();
                    drop(state);
                    return Ok(PooledConn::new(connection, lease, &self.inner));
                }
                Plan::Wait(rx) => match rx.await {
                    Ok(Handoff::Lease(lease)) => return Ok(lease),
                    Ok(Handoff::Retry) => continue,
                    // Sender dropped without sending: the pool drained
                    Err(_) => return Err(PoolError::Closed),
                },
            }
        }
    }

    /// Returns a leased connection to the pool.
    ///
    /// A tainted or closed connection is discarded rather than returned to
    /// the idle set. Releasing a lease that belongs to a different pool is
    /// a caller error; the lease is left to find its own way home through
    /// its guard.
    pub async fn release(&self, mut leased: PooledConn) -> Result<(), PoolError> {
        let owner = leased.pool.upgrade();
        if !owner.is_some_and(|owner| Arc::ptr_eq(&owner, &self.inner)) {
            return Err(PoolError::InvalidRelease);
        }

        let lease = leased.lease;
        let connection = leased
            .connection
            .take()
            .expect("lease already released");
        drop(leased); // disarmed

        let closed = {
            let mut state = self.inner.state.lock();
            state.leased.remove(&lease);
            state.closed
        };
        self.inner.released.notify_waiters();

        if connection.is_tainted() || connection.is_closed() || closed {
            debug!(pid = connection.process_id(), "discarding connection on release");
            let _ = connection.close().await;
            self.inner.slot_freed();
        } else {
            self.inner.hand_back(connection);
        }
        Ok(())
    }

    /// Drains the pool: refuses new acquires, fails queued waiters, waits
    /// for every lease to be returned, and closes all connections.
    /// Idempotent.
    pub async fn drain(&self) {
        let (idle, waiters) = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            (
                std::mem::take(&mut state.idle),
                std::mem::take(&mut state.waiters),
            )
        };
        // Dropping the senders fails pending acquires with Closed
        drop(waiters);

        for connection in idle {
            let _ = connection.close().await;
        }

        loop {
            let released = self.inner.released.notified();
            let busy = {
                let state = self.inner.state.lock();
                !state.leased.is_empty() || state.opening > 0
            };
            if !busy {
                break;
            }
            released.await;
        }
        debug!("pool drained");
    }
}

impl PoolInner {
    /// Hands a healthy connection to the oldest live waiter, or parks it
    /// in the idle set.
    fn hand_back(self: &Arc<Self>, mut connection: Connection) {
        loop {
            let waiter = {
                let mut state = self.state.lock();
                if state.closed {
                    // Drained while the connection was in flight
                    drop(state);
                    drop(connection);
                    self.released.notify_waiters();
                    return;
                }
                match state.waiters.pop_front() {
                    Some(waiter) => {
                        let lease = state.new_lease();
                        Some((waiter, lease))
                    }
                    None => {
                        state.idle.push(connection);
                        return;
                    }
                }
            };

            let (waiter, lease) = waiter.expect("waiter taken above");
            let guard = PooledConn::new(connection, lease, self);
            match waiter.send(Handoff::Lease(guard)) {
                Ok(()) => return,
                Err(Handoff::Lease(mut guard)) => {
                    // Waiter cancelled between queueing and handoff; reclaim
                    // the connection and try the next waiter
                    connection = guard
                        .connection
                        .take()
                        .expect("lease already released");
                    self.state.lock().leased.remove(&guard.lease);
                    self.released.notify_waiters();
                }
                Err(Handoff::Retry) => unreachable!("pool only sends leases here"),
            }
        }
    }

    /// Wakes one waiter after a capacity slot freed without a connection to
    /// hand over (discard or failed open); the waiter re-plans and may open
    /// a fresh connection itself.
    fn slot_freed(&self) {
        loop {
            let waiter = self.state.lock().waiters.pop_front();
            let Some(waiter) = waiter else { return };
            if waiter.send(Handoff::Retry).is_ok() {
                return;
            }
            // That waiter was cancelled; try the next
        }
    }

    /// Returns a dropped lease to the pool (guard-drop path).
    fn restore(self: &Arc<Self>, lease: u64, connection: Connection) {
        let closed = {
            let mut state = self.state.lock();
            state.leased.remove(&lease);
            state.closed
        };
        self.released.notify_waiters();

        if connection.is_tainted() || connection.is_closed() || closed {
            debug!(pid = connection.process_id(), "discarding dropped lease");
            drop(connection);
            self.slot_freed();
        } else {
            self.hand_back(connection);
        }
    }
}

/// Keeps the `opening` capacity reservation correct if an acquire future
/// is cancelled while its connect is in flight.
struct OpeningSlot {
    inner: Arc<PoolInner>,
    armed: bool,
}

impl Drop for OpeningSlot {
    fn drop(&mut self) {
        if self.armed {
            self.inner.state.lock().opening -= 1;
            self.inner.released.notify_waiters();
            self.inner.slot_freed();
        }
    }
}

/// A leased connection. Dereferences to [`Connection`].
///
/// Prefer returning it with [`Pool::release`]; dropping the guard also
/// returns the connection, which keeps cancelled acquires from leaking.
pub struct PooledConn {
    connection: Option<Connection>,
    lease: u64,
    pool: Weak<PoolInner>,
}

impl PooledConn {
    fn new(connection: Connection, lease: u64, pool: &Arc<PoolInner>) -> Self {
        Self {
            connection: Some(connection),
            lease,
            pool: Arc::downgrade(pool),
        }
    }
}

impl Deref for PooledConn {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.connection.as_ref().expect("lease already released")
    }
}

impl DerefMut for PooledConn {
    fn deref_mut(&mut self) -> &mut Connection {
        self.connection.as_mut().expect("lease already released")
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            match self.pool.upgrade() {
                Some(pool) => pool.restore(self.lease, connection),
                None => warn!("pool dropped before lease was returned"),
            }
        }
    }
}

impl std::fmt::Debug for PooledConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConn")
            .field("lease", &self.lease)
            .field("connection", &self.connection)
            .finish()
    }
}
