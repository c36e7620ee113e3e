use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::Notify,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

use super::{
    error::{FlushErr, Result},
    merge::{self, MergedUpdate},
    message::{OpLogMessage, UpdateKind},
    wire,
};
use crate::transport::{ChannelPool, Connector};

/// Pause between send retries within one flush attempt, so a flapping
/// destination does not burn the whole budget in a tight loop.
const RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Flush triggering bounds for a merge cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Bucket size that nudges the background flusher ahead of its timer.
    pub flush_threshold: usize,
    /// Period of the background flusher.
    pub flush_interval_ms: u64,
}

impl CacheConfig {
    /// Returns the background flusher period.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            flush_threshold: 64,
            flush_interval_ms: 100,
        }
    }
}

/// Merge key: same-matrix updates for one destination share a bucket only
/// when they also share an update kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BucketKey {
    matrix_id: u32,
    dest: SocketAddr,
    kind: UpdateKind,
}

/// Pending updates for one key.
///
/// `retired` is flipped under the pending lock when the bucket is removed
/// from the map, so a submitter holding a stale handle re-resolves instead
/// of writing into an orphan.
struct Bucket {
    pending: Mutex<VecDeque<OpLogMessage>>,
    retired: AtomicBool,
    flush_gate: tokio::sync::Mutex<()>,
}

impl Bucket {
    fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            retired: AtomicBool::new(false),
            flush_gate: tokio::sync::Mutex::new(()),
        }
    }
}

/// Coalesces pending update messages per (matrix, destination, kind) key
/// and drains the merged payloads through the channel pool.
///
/// Producers call [`submit`](Self::submit) from any number of tasks; it
/// never touches the network. Transmission happens on flush, either
/// explicit or driven by the background flusher.
pub struct MergeCache<C: Connector> {
    pool: Arc<ChannelPool<C>>,
    config: CacheConfig,
    buckets: Mutex<HashMap<BucketKey, Arc<Bucket>>>,
    dirty: Notify,
    closed: AtomicBool,
}

impl<C: Connector> MergeCache<C> {
    /// Creates a cache draining through `pool`.
    pub fn new(config: CacheConfig, pool: Arc<ChannelPool<C>>) -> Self {
        Self {
            pool,
            config,
            buckets: Mutex::new(HashMap::new()),
            dirty: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn bucket(&self, key: &BucketKey) -> Option<Arc<Bucket>> {
        self.buckets.lock().get(key).map(Arc::clone)
    }

    fn bucket_or_create(&self, key: BucketKey) -> Arc<Bucket> {
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key).or_insert_with(|| Arc::new(Bucket::new()));
        Arc::clone(bucket)
    }

    /// Enqueues `message` for its (matrix, destination, kind) bucket.
    ///
    /// Never blocks beyond bucket-lock contention; once the bucket crosses
    /// the flush threshold the background flusher is nudged.
    pub fn submit(&self, dest: SocketAddr, message: OpLogMessage) {
        let key = BucketKey {
            matrix_id: message.matrix_id(),
            dest,
            kind: message.payload().kind(),
        };

        loop {
            let bucket = self.bucket_or_create(key);
            let mut pending = bucket.pending.lock();
            if bucket.retired.load(Ordering::Relaxed) {
                // Lost the race against a concurrent retire; re-resolve.
                drop(pending);
                continue;
            }

            pending.push_back(message);
            let len = pending.len();
            drop(pending);

            if len >= self.config.flush_threshold {
                self.dirty.notify_one();
            }
            return;
        }
    }

    /// Number of messages waiting in one bucket.
    pub fn pending_len(&self, matrix_id: u32, dest: SocketAddr, kind: UpdateKind) -> usize {
        let key = BucketKey {
            matrix_id,
            dest,
            kind,
        };
        match self.bucket(&key) {
            Some(bucket) => bucket.pending.lock().len(),
            None => 0,
        }
    }

    /// Merges and transmits one bucket's pending messages.
    ///
    /// Flushes for the same key are serialized; different keys proceed
    /// independently. The pending set is drained atomically, so messages
    /// submitted while the send is in flight belong to the next flush.
    ///
    /// # Returns
    /// On failure the merged payload is requeued as a single synthetic
    /// pending message and the error is surfaced to the caller.
    pub async fn flush(&self, matrix_id: u32, dest: SocketAddr, kind: UpdateKind) -> Result<()> {
        let key = BucketKey {
            matrix_id,
            dest,
            kind,
        };
        let Some(bucket) = self.bucket(&key) else {
            return Ok(());
        };

        let _gate = bucket.flush_gate.lock().await;

        let drained: Vec<OpLogMessage> = {
            let mut pending = bucket.pending.lock();
            pending.drain(..).collect()
        };
        let Some(merged) = merge::merge(drained) else {
            return Ok(());
        };

        match self.transmit(dest, &merged).await {
            Ok(()) => {
                debug!(matrix_id = matrix_id, merged = merged.merged; "flushed bucket");
                self.retire_if_empty(&key, &bucket);
                Ok(())
            }
            Err(e) => {
                warn!(
                    "flush failed, merged update requeued: matrix_id={matrix_id} dest={dest} err={e}"
                );
                bucket.pending.lock().push_front(merged.into_message());
                Err(e)
            }
        }
    }

    /// Flushes every bucket with pending messages, concurrently across
    /// keys.
    ///
    /// # Returns
    /// The number of buckets whose flush failed and was requeued.
    pub async fn flush_all(&self) -> usize {
        let keys: Vec<BucketKey> = self.buckets.lock().keys().copied().collect();
        let flushes = keys
            .iter()
            .map(|key| self.flush(key.matrix_id, key.dest, key.kind));
        let results = futures::future::join_all(flushes).await;

        results.iter().filter(|outcome| outcome.is_err()).count()
    }

    /// Sends the encoded update, discarding broken channels and retrying
    /// against the remaining acquire budget.
    async fn transmit(&self, dest: SocketAddr, update: &MergedUpdate) -> Result<()> {
        let deadline = Instant::now() + self.pool.config().get_channel_timeout();
        let mut frame = Vec::new();
        wire::encode(update, &mut frame);

        loop {
            let mut channel = self.pool.acquire_until(dest, deadline).await?;
            match channel.send(&frame).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    // The channel marked itself closed; releasing it drops
                    // the connection instead of recycling it.
                    drop(channel);

                    if Instant::now() + RETRY_BACKOFF >= deadline {
                        return Err(FlushErr::SendFailed {
                            matrix_id: update.matrix_id,
                            source: e,
                        });
                    }
                    debug!("send failed, retrying: dest={dest} err={e}");
                    time::sleep(RETRY_BACKOFF).await;
                }
            }
        }
    }

    /// Removes the bucket if nothing arrived while its flush was in
    /// flight. Holds the map lock and then the pending lock so no
    /// submitter can slip a message into a removed bucket.
    fn retire_if_empty(&self, key: &BucketKey, bucket: &Arc<Bucket>) {
        let mut buckets = self.buckets.lock();
        let pending = bucket.pending.lock();
        if pending.is_empty() {
            bucket.retired.store(true, Ordering::Relaxed);
            buckets.remove(key);
        }
    }

    /// Flushes whatever is still buffered and stops the background
    /// flusher.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        // notify_one stores a permit, so the flusher sees the wake-up even
        // if it is mid-sweep rather than parked on the notify.
        self.dirty.notify_one();

        let failed = self.flush_all().await;
        if failed > 0 {
            warn!(failed = failed; "shutdown left unsent updates in cache");
        }
        info!("merge cache shut down");
    }

    /// Spawns the background flusher: a timer tick or a threshold nudge
    /// triggers a sweep over all buckets.
    pub fn spawn_flusher(self: Arc<Self>) -> JoinHandle<()> {
        let cache = self;

        tokio::spawn(async move {
            let mut tick = time::interval(cache.config.flush_interval());
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The interval's first tick completes immediately.
            tick.tick().await;

            loop {
                tokio::select! {
                    _ = tick.tick() => {}
                    _ = cache.dirty.notified() => {}
                }

                if cache.closed.load(Ordering::Acquire) {
                    break;
                }
                cache.flush_all().await;
            }
        })
    }
}
