use std::{
    collections::{HashMap, VecDeque},
    io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    time::{self, Instant},
};

use super::{Channel, Conn, Connector, PoolConfig, PoolErr, Result};

/// Bookkeeping for one destination's channels.
///
/// The semaphore caps concurrent borrows at `max_active`; a waiter that
/// times out simply drops its queued acquire without consuming a permit, so
/// a cancelled wait never leaks a phantom borrow. The idle list keeps the
/// most recently used channel at the back, letting truly idle channels age
/// out at the front.
struct DestState<T> {
    dest: SocketAddr,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<Channel<T>>>,
    /// Open channels for this destination, idle and borrowed alike.
    open: AtomicU64,
    pool_closed: Arc<AtomicBool>,
    counters: Arc<PoolCounters>,
}

impl<T: Conn> DestState<T> {
    fn new(
        dest: SocketAddr,
        config: PoolConfig,
        pool_closed: Arc<AtomicBool>,
        counters: Arc<PoolCounters>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_active));
        Self {
            dest,
            config,
            permits,
            idle: Mutex::new(VecDeque::new()),
            open: AtomicU64::new(0),
            pool_closed,
            counters,
        }
    }

    fn pop_idle(&self) -> Option<Channel<T>> {
        self.idle.lock().pop_back()
    }

    fn push_idle(&self, mut channel: Channel<T>) {
        channel.deactivate();
        self.idle.lock().push_back(channel);
    }

    /// Takes a returned borrow back. Broken channels and returns after
    /// shutdown are closed instead of re-entering the idle set.
    fn release(&self, mut channel: Channel<T>) {
        if !channel.is_open() || self.pool_closed.load(Ordering::Acquire) {
            channel.close();
            self.open.fetch_sub(1, Ordering::Relaxed);
            debug!("closed channel on release: dest={}", self.dest);
            return;
        }

        self.push_idle(channel);
    }

    /// Drops a channel that failed its liveness check.
    fn discard(&self, mut channel: Channel<T>) {
        channel.close();
        self.open.fetch_sub(1, Ordering::Relaxed);
        warn!("discarded dead channel: dest={}", self.dest);
    }

    /// Closes channels idle beyond the configured threshold, oldest first,
    /// stopping while the open count would fall below `min_active`.
    fn evict_expired(&self) -> usize {
        let max_idle = self.config.max_idle_time();
        let min_active = self.config.min_active as u64;
        let mut idle = self.idle.lock();
        let mut evicted = 0;

        while self.open.load(Ordering::Relaxed) > min_active {
            let expired = idle
                .front()
                .is_some_and(|channel| channel.idle_for() > max_idle);
            if !expired {
                break;
            }

            idle.pop_front();
            self.open.fetch_sub(1, Ordering::Relaxed);
            self.counters.evicted.fetch_add(1, Ordering::Relaxed);
            evicted += 1;
        }

        if evicted > 0 {
            debug!(evicted = evicted; "reclaimed idle channels");
        }
        evicted
    }

    /// Closes every idle channel immediately. Used at shutdown.
    fn drain_idle(&self) {
        let mut idle = self.idle.lock();
        let drained = idle.len() as u64;
        idle.clear();
        self.open.fetch_sub(drained, Ordering::Relaxed);
    }
}

/// Lifetime counters kept for observability logging.
#[derive(Debug, Default)]
struct PoolCounters {
    created: AtomicU64,
    acquired: AtomicU64,
    evicted: AtomicU64,
}

/// Point-in-time view of a pool's bookkeeping.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    /// Open channels across all destinations, idle and borrowed.
    pub open: u64,
    /// Channels currently sitting in idle lists.
    pub idle: u64,
    /// Channels connected over the pool's lifetime.
    pub created: u64,
    /// Successful acquires over the pool's lifetime.
    pub acquired: u64,
    /// Channels reclaimed by idle eviction.
    pub evicted: u64,
}

/// A bounded, health-managed set of reusable channels keyed by destination.
///
/// Many logical senders multiplex over at most `max_active` connections per
/// destination; acquisition is timeout-bound and idle channels are
/// reclaimed. State is tracked per destination so traffic to one shard
/// never contends on another's locks.
pub struct ChannelPool<C: Connector> {
    config: PoolConfig,
    connector: C,
    dests: RwLock<HashMap<SocketAddr, Arc<DestState<C::Conn>>>>,
    closed: Arc<AtomicBool>,
    counters: Arc<PoolCounters>,
}

impl<C: Connector> std::fmt::Debug for ChannelPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelPool")
            .field("config", &self.config)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl<C: Connector> ChannelPool<C> {
    /// Creates a pool over `connector` with the given bounds.
    ///
    /// # Returns
    /// `PoolErr::InvalidConfig` if `max_active` is below `min_active`.
    pub fn new(config: PoolConfig, connector: C) -> Result<Self> {
        if config.max_active < config.min_active {
            return Err(PoolErr::InvalidConfig {
                max_active: config.max_active,
                min_active: config.min_active,
            });
        }

        Ok(Self {
            config,
            connector,
            dests: RwLock::new(HashMap::new()),
            closed: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(PoolCounters::default()),
        })
    }

    /// The bounds this pool was built with.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn dest_state(&self, dest: SocketAddr) -> Arc<DestState<C::Conn>> {
        if let Some(state) = self.dests.read().get(&dest) {
            return Arc::clone(state);
        }

        let mut dests = self.dests.write();
        let state = dests.entry(dest).or_insert_with(|| {
            Arc::new(DestState::new(
                dest,
                self.config.clone(),
                Arc::clone(&self.closed),
                Arc::clone(&self.counters),
            ))
        });
        Arc::clone(state)
    }

    /// Borrows a channel to `dest`, waiting at most `get_channel_timeout`.
    ///
    /// # Returns
    /// `PoolErr::Exhausted` if no channel became available in time and
    /// `PoolErr::Closed` once shutdown has begun.
    pub async fn acquire(&self, dest: SocketAddr) -> Result<PooledChannel<C::Conn>> {
        let deadline = Instant::now() + self.config.get_channel_timeout();
        self.acquire_until(dest, deadline).await
    }

    /// Borrows a channel to `dest`, waiting at most until `deadline`.
    ///
    /// The deadline covers the whole attempt: waiting for a free slot,
    /// discarding channels that fail their liveness check and connecting a
    /// replacement all draw from the same budget.
    pub async fn acquire_until(
        &self,
        dest: SocketAddr,
        deadline: Instant,
    ) -> Result<PooledChannel<C::Conn>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolErr::Closed);
        }

        let started = Instant::now();
        let state = self.dest_state(dest);

        let acquire = Arc::clone(&state.permits).acquire_owned();
        let permit = match time::timeout_at(deadline, acquire).await {
            Ok(Ok(permit)) => permit,
            // The semaphore is only ever closed by shutdown.
            Ok(Err(_)) => return Err(PoolErr::Closed),
            Err(_) => {
                return Err(PoolErr::Exhausted {
                    dest,
                    waited: started.elapsed(),
                });
            }
        };

        state.evict_expired();

        // Prefer the most recently used idle channel; dead ones are
        // discarded and the attempt continues against the same budget.
        while let Some(mut channel) = state.pop_idle() {
            if channel.is_open() {
                channel.activate();
                self.counters.acquired.fetch_add(1, Ordering::Relaxed);
                return Ok(PooledChannel::new(dest, channel, state, permit));
            }
            state.discard(channel);
        }

        let connect = self.connector.connect(dest);
        match time::timeout_at(deadline, connect).await {
            Ok(Ok(conn)) => {
                state.open.fetch_add(1, Ordering::Relaxed);
                self.counters.created.fetch_add(1, Ordering::Relaxed);
                self.counters.acquired.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "opened channel: dest={dest} open={}",
                    state.open.load(Ordering::Relaxed)
                );

                let mut channel = Channel::new(dest, conn);
                channel.activate();
                Ok(PooledChannel::new(dest, channel, state, permit))
            }
            Ok(Err(e)) => Err(PoolErr::Io(e)),
            Err(_) => Err(PoolErr::Exhausted {
                dest,
                waited: started.elapsed(),
            }),
        }
    }

    /// Eagerly connects channels to `dest` until `min_active` are open.
    ///
    /// # Returns
    /// The number of channels connected by this call.
    pub async fn warm_up(&self, dest: SocketAddr) -> Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolErr::Closed);
        }

        let state = self.dest_state(dest);
        let min_active = self.config.min_active as u64;
        let mut added = 0;

        loop {
            // Reserve the slot before connecting so concurrent warm-ups
            // cannot overshoot min_active together.
            let reserved = state
                .open
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |open| {
                    (open < min_active).then_some(open + 1)
                });
            if reserved.is_err() {
                break;
            }

            match self.connector.connect(dest).await {
                Ok(conn) => {
                    state.push_idle(Channel::new(dest, conn));
                    self.counters.created.fetch_add(1, Ordering::Relaxed);
                    added += 1;
                }
                Err(e) => {
                    state.open.fetch_sub(1, Ordering::Relaxed);
                    return Err(PoolErr::Io(e));
                }
            }
        }

        if added > 0 {
            debug!(warmed = added; "warmed up channels");
        }
        Ok(added)
    }

    /// Closes channels idle beyond `max_idle_time` across all destinations,
    /// never dropping a destination below `min_active` open channels.
    ///
    /// # Returns
    /// The number of channels reclaimed.
    pub fn evict_idle(&self) -> usize {
        let dests = self.dests.read();
        dests.values().map(|state| state.evict_expired()).sum()
    }

    /// Stops accepting acquires and closes idle channels. Outstanding
    /// borrows are closed as they come back.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);

        let dests = self.dests.read();
        for state in dests.values() {
            // Wakes queued waiters, which fail with `Closed`.
            state.permits.close();
            state.drain_idle();
        }

        info!("channel pool shut down");
    }

    /// Snapshot of the pool's bookkeeping.
    pub fn stats(&self) -> PoolStats {
        let dests = self.dests.read();
        let open = dests
            .values()
            .map(|state| state.open.load(Ordering::Relaxed))
            .sum();
        let idle = dests
            .values()
            .map(|state| state.idle.lock().len() as u64)
            .sum();

        PoolStats {
            open,
            idle,
            created: self.counters.created.load(Ordering::Relaxed),
            acquired: self.counters.acquired.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
        }
    }
}

/// A borrowed channel handle, valid between acquire and release.
///
/// Dropping the handle releases the channel: healthy channels rejoin the
/// idle set with a fresh use stamp, broken ones are closed. The semaphore
/// permit rides along so the borrow slot frees exactly when the handle
/// goes away.
pub struct PooledChannel<T: Conn> {
    dest: SocketAddr,
    channel: Option<Channel<T>>,
    state: Arc<DestState<T>>,
    _permit: OwnedSemaphorePermit,
}

impl<T: Conn> std::fmt::Debug for PooledChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledChannel")
            .field("dest", &self.dest)
            .field("has_channel", &self.channel.is_some())
            .finish()
    }
}

impl<T: Conn> PooledChannel<T> {
    fn new(
        dest: SocketAddr,
        channel: Channel<T>,
        state: Arc<DestState<T>>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            dest,
            channel: Some(channel),
            state,
            _permit: permit,
        }
    }

    /// The remote endpoint this borrow is connected to.
    pub fn destination(&self) -> SocketAddr {
        self.dest
    }

    /// Sends one encoded frame over the borrowed channel.
    ///
    /// A transport failure marks the channel closed, so releasing it will
    /// drop the connection rather than recycle it.
    pub async fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        match self.channel.as_mut() {
            Some(channel) => channel.send(frame).await,
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "channel already released",
            )),
        }
    }

    /// Marks the channel broken without a send, e.g. after an out-of-band
    /// transport error observed by the caller.
    pub fn mark_broken(&mut self) {
        if let Some(channel) = self.channel.as_mut() {
            channel.close();
        }
    }
}

impl<T: Conn> Drop for PooledChannel<T> {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            self.state.release(channel);
        }
        // The permit drops after the channel is back, freeing the slot for
        // the next waiter.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NoopConn;

    #[async_trait]
    impl Conn for NoopConn {
        async fn send(&mut self, _frame: &[u8]) -> io::Result<()> {
            Ok(())
        }

        fn is_open(&self) -> bool {
            true
        }
    }

    struct NoopConnector;

    #[async_trait]
    impl Connector for NoopConnector {
        type Conn = NoopConn;

        async fn connect(&self, _dest: SocketAddr) -> io::Result<NoopConn> {
            Ok(NoopConn)
        }
    }

    fn config(max_active: usize, min_active: usize) -> PoolConfig {
        PoolConfig {
            max_active,
            min_active,
            max_idle_time_ms: 60_000,
            get_channel_timeout_ms: 1_000,
        }
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        let err = ChannelPool::new(config(1, 4), NoopConnector).unwrap_err();
        assert!(matches!(
            err,
            PoolErr::InvalidConfig {
                max_active: 1,
                min_active: 4
            }
        ));
    }

    #[test]
    fn test_accepts_equal_bounds() {
        assert!(ChannelPool::new(config(4, 4), NoopConnector).is_ok());
    }

    #[tokio::test]
    async fn test_reuses_released_channel() {
        let pool = ChannelPool::new(config(4, 0), NoopConnector).unwrap();
        let dest: SocketAddr = "127.0.0.1:9000".parse().unwrap();

        let first = pool.acquire(dest).await.unwrap();
        drop(first);
        let _second = pool.acquire(dest).await.unwrap();

        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.acquired, 2);
        assert_eq!(stats.open, 1);
    }

    #[tokio::test]
    async fn test_acquire_after_shutdown_fails() {
        let pool = ChannelPool::new(config(4, 0), NoopConnector).unwrap();
        let dest: SocketAddr = "127.0.0.1:9001".parse().unwrap();

        pool.shutdown();
        assert!(matches!(pool.acquire(dest).await, Err(PoolErr::Closed)));
    }
}
