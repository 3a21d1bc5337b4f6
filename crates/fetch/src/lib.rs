use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use catalog::{ContentId, IdentityTable};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use grid::TileIndex;
use tile_cache::LoadStateCache;

/// Uniform fetch failure. The core does not distinguish transport from
/// decoding errors; any failure takes the same self-healing path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    message: String,
}

impl FetchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "content fetch failed: {}", self.message)
    }
}

impl std::error::Error for FetchError {}

/// Blocking remote-content collaborator, invoked only from worker threads.
pub trait ContentFetcher<P>: Send + Sync {
    fn fetch(&self, id: ContentId, width: u32, height: u32) -> Result<P, FetchError>;
}

/// One load request for the key `(id, width)`. Carries the originating tile
/// index so the failure path can evict that tile's identity assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRequest {
    pub index: TileIndex,
    pub id: ContentId,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStartError {
    ZeroWorkers,
}

impl fmt::Display for FetchStartError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchStartError::ZeroWorkers => {
                write!(formatter, "fetch runtime needs at least one worker")
            }
        }
    }
}

impl std::error::Error for FetchStartError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDispatchError {
    Disconnected,
}

impl fmt::Display for FetchDispatchError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchDispatchError::Disconnected => {
                write!(formatter, "fetch request queue disconnected")
            }
        }
    }
}

impl std::error::Error for FetchDispatchError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRuntimeConfig {
    pub worker_count: usize,
}

impl Default for FetchRuntimeConfig {
    fn default() -> Self {
        Self { worker_count: 4 }
    }
}

#[derive(Debug, Clone)]
pub struct FetchRequestSender {
    sender: Sender<FetchRequest>,
}

impl FetchRequestSender {
    pub fn dispatch(&self, request: FetchRequest) -> Result<(), FetchDispatchError> {
        self.sender
            .send(request)
            .map_err(|_| FetchDispatchError::Disconnected)
    }
}

/// Pool of fetch worker threads. Workers pull requests off an unbounded
/// channel, call the fetch collaborator, and write the outcome straight
/// into the shared cache and identity table; nothing flows back to the
/// render thread, which observes the maps at the start of its next frame.
pub struct FetchRuntime {
    stop_requested: Arc<AtomicBool>,
    join_handles: Vec<std::thread::JoinHandle<()>>,
}

impl FetchRuntime {
    pub fn start<P, F>(
        config: FetchRuntimeConfig,
        fetcher: Arc<F>,
        cache: Arc<LoadStateCache<P>>,
        identities: Arc<IdentityTable>,
    ) -> Result<(Self, FetchRequestSender), FetchStartError>
    where
        P: Send + 'static,
        F: ContentFetcher<P> + ?Sized + 'static,
    {
        if config.worker_count == 0 {
            return Err(FetchStartError::ZeroWorkers);
        }

        let (sender, receiver) = crossbeam_channel::unbounded();
        let stop_requested = Arc::new(AtomicBool::new(false));

        let mut join_handles = Vec::with_capacity(config.worker_count);
        for worker_index in 0..config.worker_count {
            let stop_requested = Arc::clone(&stop_requested);
            let receiver: Receiver<FetchRequest> = receiver.clone();
            let fetcher = Arc::clone(&fetcher);
            let cache = Arc::clone(&cache);
            let identities = Arc::clone(&identities);
            let join_handle = std::thread::Builder::new()
                .name(format!("tile_fetch_{worker_index}"))
                .spawn(move || {
                    fetch_worker_loop(stop_requested, receiver, fetcher, cache, identities)
                })
                .expect("spawn fetch worker thread");
            join_handles.push(join_handle);
        }

        Ok((
            Self {
                stop_requested,
                join_handles,
            },
            FetchRequestSender { sender },
        ))
    }
}

impl Drop for FetchRuntime {
    fn drop(&mut self) {
        self.stop_requested.store(true, Ordering::Release);
        for join_handle in self.join_handles.drain(..) {
            join_handle.join().expect("join fetch worker thread");
        }
    }
}

fn fetch_worker_loop<P, F>(
    stop_requested: Arc<AtomicBool>,
    receiver: Receiver<FetchRequest>,
    fetcher: Arc<F>,
    cache: Arc<LoadStateCache<P>>,
    identities: Arc<IdentityTable>,
) where
    F: ContentFetcher<P> + ?Sized,
{
    const IDLE_RECV_TIMEOUT: Duration = Duration::from_millis(1);

    while !stop_requested.load(Ordering::Acquire) {
        let request = match receiver.recv_timeout(IDLE_RECV_TIMEOUT) {
            Ok(request) => request,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        match fetcher.fetch(request.id, request.width, request.height) {
            Ok(payload) => {
                log::trace!(
                    "fetched content {} at width {} for tile ({}, {})",
                    request.id,
                    request.width,
                    request.index.column,
                    request.index.row
                );
                cache.complete(request.id, request.width, payload);
            }
            Err(error) => {
                // Self-healing: drop the cache entry and the tile's identity
                // assignment so the next frame tries a different id instead
                // of retrying a possibly-permanently-missing one.
                log::warn!(
                    "fetch failed for content {} at width {}: {}",
                    request.id,
                    request.width,
                    error
                );
                cache.fail(request.id, request.width);
                identities.evict(request.index);
            }
        }
    }
}
