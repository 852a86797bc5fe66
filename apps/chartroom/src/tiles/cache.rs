//! Decoded-tile cache with deduplicated, bounded-concurrency downloads.
//!
//! Every address is downloaded at most once at a time: the first miss marks
//! it in flight and queues a job, later misses only wait. Jobs are served in
//! submission order by a fixed number of workers. Ready tiles are kept up to
//! a count limit and evicted least recently used first.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::{Raster, TileAddress, TileError, TileFetcher};

pub const DEFAULT_CONCURRENCY: usize = 3;
pub const DEFAULT_CAPACITY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileCacheConfig {
    pub concurrency: usize,
    pub capacity: usize,
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone)]
pub enum TileLookup {
    Ready(Raster),
    /// A download is queued or running; ask again or use [`TileCache::fetch`].
    Pending,
}

impl TileLookup {
    pub fn ready(self) -> Option<Raster> {
        match self {
            TileLookup::Ready(raster) => Some(raster),
            TileLookup::Pending => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub ready: usize,
    pub in_flight: usize,
    pub downloads: u64,
    pub failures: u64,
    pub evictions: u64,
}

type Waiter = oneshot::Sender<Result<Raster, TileError>>;

struct Entry {
    raster: Raster,
    last_used: u64,
}

#[derive(Default)]
struct CacheState {
    ready: HashMap<TileAddress, Entry>,
    in_flight: HashMap<TileAddress, Vec<Waiter>>,
    clock: u64,
    downloads: u64,
    failures: u64,
    evictions: u64,
}

impl CacheState {
    fn touch(&mut self, address: &TileAddress) -> Option<Raster> {
        self.clock += 1;
        let clock = self.clock;
        self.ready.get_mut(address).map(|entry| {
            entry.last_used = clock;
            entry.raster.clone()
        })
    }

    fn insert(&mut self, address: TileAddress, raster: Raster, capacity: usize) {
        self.clock += 1;
        self.ready.insert(
            address,
            Entry {
                raster,
                last_used: self.clock,
            },
        );
        while self.ready.len() > capacity.max(1) {
            let Some(oldest) = self
                .ready
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(address, _)| address.clone())
            else {
                break;
            };
            self.ready.remove(&oldest);
            self.evictions += 1;
            trace!(target = "chartroom::tiles", tile = %oldest, "evicted");
        }
    }
}

struct Inner {
    state: Mutex<CacheState>,
    fetcher: Arc<dyn TileFetcher>,
    capacity: usize,
}

pub struct TileCache {
    inner: Arc<Inner>,
    jobs: mpsc::UnboundedSender<TileAddress>,
    workers: Vec<JoinHandle<()>>,
}

impl TileCache {
    /// Starts the download workers; must be called inside a tokio runtime.
    pub fn new(fetcher: Arc<dyn TileFetcher>, config: TileCacheConfig) -> Self {
        let inner = Arc::new(Inner {
            state: Mutex::new(CacheState::default()),
            fetcher,
            capacity: config.capacity.max(1),
        });
        let (jobs, queue) = mpsc::unbounded_channel();
        let queue = Arc::new(AsyncMutex::new(queue));
        let workers = (0..config.concurrency.max(1))
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    Arc::downgrade(&inner),
                    queue.clone(),
                ))
            })
            .collect();
        Self {
            inner,
            jobs,
            workers,
        }
    }

    /// Non-blocking lookup. A miss starts a download unless one is already
    /// running for `address`.
    pub fn get_tile(&self, address: &TileAddress) -> TileLookup {
        let mut state = self.inner.state.lock();
        if let Some(raster) = state.touch(address) {
            return TileLookup::Ready(raster);
        }
        if !state.in_flight.contains_key(address) {
            state.in_flight.insert(address.clone(), Vec::new());
            self.enqueue(&mut state, address);
        }
        TileLookup::Pending
    }

    /// Resolves with the tile once its download (shared with any other
    /// caller asking for the same address) completes.
    pub async fn fetch(&self, address: &TileAddress) -> Result<Raster, TileError> {
        let (waiter, reply) = oneshot::channel();
        {
            let mut state = self.inner.state.lock();
            if let Some(raster) = state.touch(address) {
                return Ok(raster);
            }
            match state.in_flight.get_mut(address) {
                Some(waiters) => waiters.push(waiter),
                None => {
                    state.in_flight.insert(address.clone(), vec![waiter]);
                    self.enqueue(&mut state, address);
                }
            }
        }
        reply.await.unwrap_or(Err(TileError::Abandoned))
    }

    pub fn contains(&self, address: &TileAddress) -> bool {
        self.inner.state.lock().ready.contains_key(address)
    }

    pub fn is_in_flight(&self, address: &TileAddress) -> bool {
        self.inner.state.lock().in_flight.contains_key(address)
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock();
        CacheStats {
            ready: state.ready.len(),
            in_flight: state.in_flight.len(),
            downloads: state.downloads,
            failures: state.failures,
            evictions: state.evictions,
        }
    }

    /// Drops every cached tile. Running downloads finish but are not stored,
    /// and their waiters see [`TileError::Abandoned`].
    pub fn release_all(&self) {
        let mut state = self.inner.state.lock();
        let released = state.ready.len();
        state.ready.clear();
        state.in_flight.clear();
        debug!(target = "chartroom::tiles", released, "tile cache released");
    }

    fn enqueue(&self, state: &mut CacheState, address: &TileAddress) {
        state.downloads += 1;
        if self.jobs.send(address.clone()).is_err() {
            state.in_flight.remove(address);
        }
    }
}

impl Drop for TileCache {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

/// Clears the in-flight marker for a download even if the worker is
/// cancelled or the fetcher panics mid-way.
struct InFlight<'a> {
    inner: &'a Inner,
    address: Option<TileAddress>,
}

impl InFlight<'_> {
    fn complete(mut self, result: Result<Raster, TileError>) {
        let Some(address) = self.address.take() else {
            return;
        };
        let waiters = {
            let mut state = self.inner.state.lock();
            let waiters = state.in_flight.remove(&address);
            match &result {
                Ok(raster) if waiters.is_some() => {
                    state.insert(address.clone(), raster.clone(), self.inner.capacity)
                }
                Ok(_) => {}
                Err(_) => state.failures += 1,
            }
            waiters.unwrap_or_default()
        };
        if let Err(err) = &result {
            warn!(target = "chartroom::tiles", tile = %address, error = %err, "tile download failed");
        }
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(address) = self.address.take() {
            self.inner.state.lock().in_flight.remove(&address);
        }
    }
}

async fn run_worker(
    worker: usize,
    inner: Weak<Inner>,
    queue: Arc<AsyncMutex<mpsc::UnboundedReceiver<TileAddress>>>,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(address) = next else {
            break;
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        trace!(target = "chartroom::tiles", worker, tile = %address, "download start");
        let guard = InFlight {
            inner: &inner,
            address: Some(address.clone()),
        };
        let result = download(inner.fetcher.as_ref(), &address).await;
        guard.complete(result);
    }
}

async fn download(fetcher: &dyn TileFetcher, address: &TileAddress) -> Result<Raster, TileError> {
    let bytes = fetcher.fetch(address).await?;
    decode(address, bytes).await
}

async fn decode(address: &TileAddress, bytes: Bytes) -> Result<Raster, TileError> {
    let decode_failed = |reason: String| TileError::Decode {
        address: address.to_string(),
        reason,
    };
    let decoded = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
        .await
        .map_err(|err| decode_failed(err.to_string()))?
        .map_err(|err| decode_failed(err.to_string()))?;
    Ok(Arc::new(decoded.to_rgba8()))
}
