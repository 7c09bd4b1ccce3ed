//! The connection pool (§4.2): per-host idle/busy bookkeeping, dead-host
//! backoff, create-shift, and a background maintenance task. All mutation
//! of pool state is serialized on a single monitor (§5), held across the
//! connect calls `Connection` makes, exactly as specified.

use std::{
    collections::HashMap,
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
    sync::Arc,
    time::{Duration, Instant},
};

use memtext_core::{hash, rehash, BucketError, BucketVector, Error};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, warn};

use crate::{config::PoolConfig, conn::SocketConn};

/// An idle connection's bucket-eviction eligibility is batched: at most
/// `max(1, diff / POOL_MULTIPLIER)` entries are reclaimed per maintenance
/// pass, so a traffic dip doesn't tear down the whole pool at once.
const POOL_MULTIPLIER: usize = 4;

/// Error constructing a [`Pool`] from a [`PoolConfig`] — a configuration
/// problem, not a request-level failure, so it's kept separate from
/// [`memtext_core::Error`] (§7 scopes that to per-operation outcomes).
#[derive(Debug)]
pub enum PoolError {
    Bucket(BucketError),
}

impl From<BucketError> for PoolError {
    fn from(err: BucketError) -> Self {
        PoolError::Bucket(err)
    }
}

impl Display for PoolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            PoolError::Bucket(err) => write!(f, "bad pool configuration: {}", err),
        }
    }
}

impl StdError for PoolError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            PoolError::Bucket(err) => Some(err),
        }
    }
}

struct DeadHostRecord {
    first_failure: Instant,
    backoff: Duration,
}

struct PoolState {
    idle: HashMap<String, Vec<(SocketConn, Instant)>>,
    busy: HashMap<String, usize>,
    dead: HashMap<String, DeadHostRecord>,
    shift: HashMap<String, u32>,
    initialized: bool,
    stop_maint: bool,
}

/// Process-wide connection pool (§4.2). Construct with [`Pool::initialize`]
/// and share behind an `Arc`; `Client` (and tests) hold that `Arc` directly.
pub struct Pool {
    config: PoolConfig,
    bucket: BucketVector,
    state: Mutex<PoolState>,
    maint_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Pool {
    /// Build the bucket vector, open `init_conn` connections to every live
    /// server, and start the maintenance loop if `maint_sleep_ms != 0`.
    pub async fn initialize(config: PoolConfig) -> Result<Arc<Self>, PoolError> {
        let bucket = BucketVector::build(&config.servers, config.weights.as_deref())?;

        let state = PoolState {
            idle: HashMap::new(),
            busy: HashMap::new(),
            dead: HashMap::new(),
            shift: HashMap::new(),
            initialized: true,
            stop_maint: false,
        };

        let pool = Arc::new(Self {
            config,
            bucket,
            state: Mutex::new(state),
            maint_handle: Mutex::new(None),
        });

        for addr in pool.bucket.servers() {
            pool.open_initial(&addr).await;
        }

        if pool.config.maint_sleep_ms > 0 {
            let handle = pool.clone().spawn_maintenance();
            *pool.maint_handle.lock().await = Some(handle);
        }

        Ok(pool)
    }

    pub fn bucket(&self) -> &BucketVector {
        &self.bucket
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    async fn open_initial(&self, addr: &str) {
        let mut opened = Vec::with_capacity(self.config.init_conn);
        for _ in 0..self.config.init_conn {
            match SocketConn::open(addr, self.config.socket_timeout_ms, self.config.nagle).await {
                Ok(conn) => opened.push(conn),
                Err(_) => break,
            }
        }
        if opened.is_empty() {
            warn!(addr, "no connections could be opened at initialize");
            return;
        }
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let entry = state.idle.entry(addr.to_string()).or_default();
        for conn in opened {
            entry.push((conn, now));
        }
    }

    /// Acquire a connection to a specific server, bypassing hash dispatch
    /// and failover. Used by cluster-wide operations (`flush_all`, `stats`)
    /// and batch retrieval, which address servers directly (§4.4, §4.5).
    pub async fn acquire_addr(&self, addr: &str) -> Result<SocketConn, Error> {
        self.connection(addr).await.ok_or(Error::Unreachable)
    }

    /// Acquire a connection for `key`, hashed with the configured variant.
    pub async fn acquire(&self, key: &[u8]) -> Result<SocketConn, Error> {
        if self.bucket.is_empty() {
            return Err(Error::Unreachable);
        }
        let hv = hash(key, self.config.hash_variant);
        self.acquire_with_hash(hv).await
    }

    /// Acquire a connection using a caller-supplied hash, bypassing the
    /// key-hash step (§4.5).
    pub async fn acquire_with_hash(&self, hv: i64) -> Result<SocketConn, Error> {
        if self.bucket.is_empty() {
            return Err(Error::Unreachable);
        }
        if self.bucket.len() == 1 {
            let addr = self.bucket.server_for_hash(hv).to_string();
            return self.connection(&addr).await.ok_or(Error::Unreachable);
        }

        let mut hv = hv;
        for iteration in 0..self.bucket.len() {
            let addr = self.bucket.server_for_hash(hv).to_string();
            if let Some(conn) = self.connection(&addr).await {
                return Ok(conn);
            }
            if !self.config.failover {
                return Err(Error::Unreachable);
            }
            hv = rehash(hv, iteration);
        }
        Err(Error::Unreachable)
    }

    /// Resolve a live, busy connection to `addr`, or `None` (§4.2). Returns
    /// `None` immediately once the pool has been shut down, so no new
    /// connections are handed out after `ShutDown`. Holds the monitor for
    /// the full duration, including any connect attempts, matching the
    /// spec's locking discipline.
    async fn connection(&self, addr: &str) -> Option<SocketConn> {
        let mut state = self.state.lock().await;

        if !state.initialized {
            return None;
        }

        if let Some(dead) = state.dead.get(addr) {
            if dead.first_failure.elapsed() < dead.backoff {
                return None;
            }
        }

        if let Some(idle) = state.idle.get_mut(addr) {
            while let Some((conn, _)) = idle.pop() {
                if conn.probe().await {
                    *state.busy.entry(addr.to_string()).or_insert(0) += 1;
                    return Some(conn);
                }
                conn.hard_close().await;
            }
        }

        let shift = *state.shift.get(addr).unwrap_or(&0);
        let create = (1usize << shift).min(self.config.max_conn.max(1));
        let mut opened = Vec::with_capacity(create);
        for _ in 0..create {
            match SocketConn::open(addr, self.config.socket_timeout_ms, self.config.nagle).await {
                Ok(conn) => opened.push(conn),
                Err(_) => break,
            }
        }

        if opened.is_empty() {
            state
                .dead
                .entry(addr.to_string())
                .and_modify(|d| d.backoff *= 2)
                .or_insert(DeadHostRecord {
                    first_failure: Instant::now(),
                    backoff: Duration::from_millis(1000),
                });
            warn!(addr, "connect failed, host marked dead");
            return None;
        }

        state.dead.remove(addr);
        let next_shift = if (1usize << shift) >= self.config.max_conn.max(1) {
            shift
        } else {
            shift + 1
        };
        state.shift.insert(addr.to_string(), next_shift);

        let busy_conn = opened.pop().expect("opened is non-empty");
        let now = Instant::now();
        let idle_entry = state.idle.entry(addr.to_string()).or_default();
        for conn in opened {
            idle_entry.push((conn, now));
        }
        *state.busy.entry(addr.to_string()).or_insert(0) += 1;
        debug!(addr, "connection leased");
        Some(busy_conn)
    }

    /// Return a leased connection. If `add_to_avail` and the connection
    /// still probes live, it rejoins the idle set; otherwise it's
    /// destroyed (§4.2 CheckIn).
    pub async fn check_in(&self, addr: &str, conn: SocketConn, add_to_avail: bool) {
        let live = add_to_avail && conn.probe().await;

        let mut state = self.state.lock().await;
        if let Some(count) = state.busy.get_mut(addr) {
            *count = count.saturating_sub(1);
        }
        let keep = live && state.initialized;
        if keep {
            state
                .idle
                .entry(addr.to_string())
                .or_default()
                .push((conn, Instant::now()));
            return;
        }
        drop(state);
        conn.hard_close().await;
    }

    fn spawn_maintenance(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(self.config.maint_sleep_ms)).await;
                if self.state.lock().await.stop_maint {
                    break;
                }
                self.maintenance_pass().await;
            }
        })
    }

    async fn maintenance_pass(&self) {
        for addr in self.bucket.servers() {
            self.restore_min(&addr).await;
            self.evict_excess_idle(&addr).await;
        }
        let mut state = self.state.lock().await;
        for shift in state.shift.values_mut() {
            *shift = 0;
        }
    }

    async fn restore_min(&self, addr: &str) {
        let current = {
            let state = self.state.lock().await;
            if let Some(dead) = state.dead.get(addr) {
                if dead.first_failure.elapsed() < dead.backoff {
                    return;
                }
            }
            state.idle.get(addr).map(Vec::len).unwrap_or(0)
        };
        let needed = self.config.min_conn.saturating_sub(current);
        if needed == 0 {
            return;
        }

        let mut opened = Vec::with_capacity(needed);
        for _ in 0..needed {
            match SocketConn::open(addr, self.config.socket_timeout_ms, self.config.nagle).await {
                Ok(conn) => opened.push(conn),
                Err(_) => break,
            }
        }

        let mut state = self.state.lock().await;
        if opened.is_empty() {
            state
                .dead
                .entry(addr.to_string())
                .and_modify(|d| d.backoff *= 2)
                .or_insert(DeadHostRecord {
                    first_failure: Instant::now(),
                    backoff: Duration::from_millis(1000),
                });
            warn!(addr, "maintenance pass failed to restore minimum connections");
            return;
        }
        state.dead.remove(addr);
        let now = Instant::now();
        let entry = state.idle.entry(addr.to_string()).or_default();
        for conn in opened {
            entry.push((conn, now));
        }
    }

    async fn evict_excess_idle(&self, addr: &str) {
        let to_close = {
            let mut state = self.state.lock().await;
            let idle = match state.idle.get_mut(addr) {
                Some(idle) => idle,
                None => return,
            };
            if idle.len() <= self.config.max_conn {
                return;
            }
            let diff = idle.len() - self.config.max_conn;
            let budget = (diff / POOL_MULTIPLIER).max(1);
            let max_idle = Duration::from_millis(self.config.max_idle_ms);
            let now = Instant::now();

            let mut expired: Vec<usize> = idle
                .iter()
                .enumerate()
                .filter(|(_, (_, ts))| now.duration_since(*ts) > max_idle)
                .map(|(i, _)| i)
                .collect();
            expired.truncate(budget);

            let mut removed = Vec::with_capacity(expired.len());
            for &i in expired.iter().rev() {
                removed.push(idle.remove(i).0);
            }
            removed
        };
        for conn in to_close {
            conn.hard_close().await;
        }
    }

    /// Stop maintenance, close every idle connection, and clear all pool
    /// maps. Busy connections close themselves on their next `check_in`
    /// rather than being torn down out from under their caller.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.maint_handle.lock().await.take() {
            handle.abort();
        }

        let to_close = {
            let mut state = self.state.lock().await;
            state.stop_maint = true;
            state.initialized = false;
            let to_close: Vec<SocketConn> = state
                .idle
                .drain()
                .flat_map(|(_, conns)| conns.into_iter().map(|(conn, _)| conn))
                .collect();
            state.busy.clear();
            state.dead.clear();
            state.shift.clear();
            to_close
        };
        for conn in to_close {
            conn.hard_close().await;
        }
    }

    /// Snapshot of `(idle, busy)` counts for `addr`, for tests and metrics.
    #[cfg(test)]
    pub async fn counts(&self, addr: &str) -> (usize, usize) {
        let state = self.state.lock().await;
        let idle = state.idle.get(addr).map(Vec::len).unwrap_or(0);
        let busy = *state.busy.get(addr).unwrap_or(&0);
        (idle, busy)
    }
}
