use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::connection::{Connection, PooledConnection};

/// Pool period from §4.2: a single reaper timer sweeps every bucket once
/// per tick.
pub const REAPER_PERIOD: Duration = Duration::from_secs(30);

/// Connections to different destinations are never interchangeable, so the
/// LIFO stack is sharded by destination; the epoch counter and reaper
/// cadence described in the spec apply per shard.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

struct Bucket {
    idle: Vec<PooledConnection>,
    epoch: u64,
    reaped_below: u64,
}

impl Bucket {
    fn new() -> Self {
        Self { idle: Vec::new(), epoch: 0, reaped_below: 0 }
    }
}

struct Inner {
    buckets: HashMap<PoolKey, Bucket>,
}

/// A LIFO pool of idle connections with a 30-second epoch-based reaper.
///
/// `acquire` pops the most recently released connection (the warmest one);
/// `release` pushes a connection back tagged with the next epoch. The
/// reaper removes, each tick, every connection that was already idle at the
/// *previous* tick — so a connection must survive one full tick untouched
/// before it is eligible for removal on the next. That is what gives the
/// eventual-quiescence property: an idle pool drains to empty within two
/// tick intervals, while a steady one-call-at-a-time workload keeps
/// recycling its single connection before it ever goes stale.
pub struct ConnectionPool {
    inner: Arc<Mutex<Inner>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        let inner = Arc::new(Mutex::new(Inner { buckets: HashMap::new() }));
        spawn_reaper(Arc::downgrade(&inner));
        Self { inner }
    }

    pub fn acquire(&self, key: &PoolKey) -> Option<PooledConnection> {
        let mut guard = self.inner.lock().unwrap();
        let bucket = guard.buckets.get_mut(key)?;
        let mut conn = bucket.idle.pop()?;
        conn.is_reused = true;
        Some(conn)
    }

    /// Releases a connection back to its destination's bucket if it is
    /// still usable. Connections that were closed or asked not to be kept
    /// alive are dropped instead of pooled.
    pub fn release(&self, key: PoolKey, mut conn: PooledConnection) {
        if !conn.keep_alive || conn.is_closed {
            return;
        }
        let mut guard = self.inner.lock().unwrap();
        let bucket = guard.buckets.entry(key).or_insert_with(Bucket::new);
        bucket.epoch += 1;
        conn.epoch = bucket.epoch;
        bucket.idle.push(conn);
    }

    /// Current idle count across every destination; used for quiescence
    /// assertions in tests.
    pub fn idle_len(&self) -> usize {
        self.inner.lock().unwrap().buckets.values().map(|b| b.idle.len()).sum()
    }

    /// Runs one reaper sweep synchronously; exposed so tests can assert
    /// quiescence without waiting on the real 30-second timer.
    pub fn reap_tick(&self) {
        reap_once(&self.inner);
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

fn reap_once(inner: &Arc<Mutex<Inner>>) {
    let mut guard = inner.lock().unwrap();
    for bucket in guard.buckets.values_mut() {
        let threshold = bucket.reaped_below;
        bucket.idle.retain(|c| c.epoch > threshold);
        bucket.reaped_below = bucket.epoch;
    }
}

fn spawn_reaper(weak: Weak<Mutex<Inner>>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(REAPER_PERIOD);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                tracing::debug!("connection pool dropped, reaper exiting");
                return;
            };
            reap_once(&inner);
        }
    });
}

/// Tears down a connection that is no longer reusable (e.g. a reused
/// connection that surfaced EOF before the status line).
pub async fn discard(mut conn: Connection) {
    conn.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> PoolKey {
        PoolKey { host: "example.invalid".into(), port: 80, tls: false }
    }

    #[test]
    fn acquire_returns_none_on_empty_bucket() {
        use tokio::runtime::Builder;
        let rt = Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let pool = ConnectionPool::new();
            assert!(pool.acquire(&key()).is_none());
        });
    }

    #[test]
    fn acquire_pops_most_recently_released() {
        use tokio::runtime::Builder;
        let rt = Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let pool = ConnectionPool::new();
            let a = fake_pooled_connection().await;
            let b = fake_pooled_connection().await;
            pool.release(key(), a);
            pool.release(key(), b);
            let acquired = pool.acquire(&key()).unwrap();
            assert!(acquired.is_reused);
            assert_eq!(pool.idle_len(), 1);
        });
    }

    #[test]
    fn reaping_requires_surviving_a_full_tick() {
        use tokio::runtime::Builder;
        let rt = Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let pool = ConnectionPool::new();
            pool.release(key(), fake_pooled_connection().await);
            assert_eq!(pool.idle_len(), 1);
            pool.reap_tick();
            assert_eq!(pool.idle_len(), 1, "must survive one full tick first");
            pool.reap_tick();
            assert_eq!(pool.idle_len(), 0, "quiescent after two ticks");
        });
    }

    async fn fake_pooled_connection() -> PooledConnection {
        use tokio::net::{TcpListener, TcpStream};
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accepted, connected) =
            tokio::join!(listener.accept(), TcpStream::connect(addr));
        let _ = accepted.unwrap();
        PooledConnection::fresh(Connection::Plain(connected.unwrap()))
    }
}
