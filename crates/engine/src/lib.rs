use std::fmt;
use std::sync::Arc;

use catalog::{ContentId, IdentityTable, IdentityTableError, select_width};
use fetch::{
    ContentFetcher, FetchRequest, FetchRequestSender, FetchRuntime, FetchRuntimeConfig,
    FetchStartError,
};
use grid::{PixelOffset, PixelSize, TileIndex, placement_of, visible_range};
use tile_cache::LoadStateCache;
use view::{ViewportController, ViewportError, ViewportState};

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub base_tile_size: PixelSize,
    /// Multipliers applied to the base tile size to derive the supported
    /// load sizes, e.g. `0.1` loads thumbnails and `5.0` loads closeups.
    pub load_width_multipliers: Vec<f32>,
    /// Bound for random content id draws; the remote catalog's item count.
    pub catalog_size: u32,
    pub fetch_worker_count: usize,
    /// Purely cosmetic; the render collaborator may draw tile indices on
    /// top of content. No effect on engine state.
    pub show_debug_overlay: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_tile_size: PixelSize {
                width: 300.0,
                height: 300.0,
            },
            load_width_multipliers: vec![0.1, 1.0, 5.0],
            catalog_size: 1085,
            fetch_worker_count: 4,
            show_debug_overlay: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStartError {
    Viewport(ViewportError),
    Identity(IdentityTableError),
    Fetch(FetchStartError),
}

impl From<ViewportError> for EngineStartError {
    fn from(error: ViewportError) -> Self {
        EngineStartError::Viewport(error)
    }
}

impl From<IdentityTableError> for EngineStartError {
    fn from(error: IdentityTableError) -> Self {
        EngineStartError::Identity(error)
    }
}

impl From<FetchStartError> for EngineStartError {
    fn from(error: FetchStartError) -> Self {
        EngineStartError::Fetch(error)
    }
}

impl fmt::Display for EngineStartError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineStartError::Viewport(error) => write!(formatter, "viewport: {error}"),
            EngineStartError::Identity(error) => write!(formatter, "identity table: {error}"),
            EngineStartError::Fetch(error) => write!(formatter, "fetch runtime: {error}"),
        }
    }
}

impl std::error::Error for EngineStartError {}

/// One supported fetch dimension pair, derived from a width multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
struct LoadSizeTable {
    sizes: Vec<LoadSize>,
    widths: Vec<u32>,
}

impl LoadSizeTable {
    fn from_multipliers(base_tile_size: PixelSize, multipliers: &[f32]) -> Self {
        let mut sizes: Vec<LoadSize> = Vec::with_capacity(multipliers.len());
        for multiplier in multipliers {
            if !multiplier.is_finite() || *multiplier <= 0.0 {
                continue;
            }
            let size = LoadSize {
                width: (base_tile_size.width * multiplier).round().max(1.0) as u32,
                height: (base_tile_size.height * multiplier).round().max(1.0) as u32,
            };
            if !sizes.iter().any(|existing| existing.width == size.width) {
                sizes.push(size);
            }
        }
        sizes.sort_by_key(|size| size.width);
        let widths = sizes.iter().map(|size| size.width).collect();
        Self { sizes, widths }
    }

    fn widths(&self) -> &[u32] {
        &self.widths
    }

    fn height_for(&self, width: u32) -> Option<u32> {
        self.sizes
            .iter()
            .find(|size| size.width == width)
            .map(|size| size.height)
    }
}

/// What the render collaborator should paint into one tile this frame.
#[derive(Debug, Clone, PartialEq)]
pub enum TileContent<P> {
    /// Best currently-loaded payload and the width it was loaded at, which
    /// may differ from the desired width while a better fetch is in flight.
    Ready { payload: P, width: u32 },
    /// Nothing loaded yet; paint the placeholder.
    Pending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TilePlacement<P> {
    pub index: TileIndex,
    pub id: ContentId,
    pub offset: PixelOffset,
    pub size: PixelSize,
    pub content: TileContent<P>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    pub frame_sequence_id: u64,
    pub tile_count: usize,
    pub ready_count: usize,
    pub pending_count: usize,
    pub dispatched_count: usize,
}

impl FrameStats {
    pub fn has_activity(&self) -> bool {
        self.pending_count > 0 || self.dispatched_count > 0
    }
}

/// Per-frame reconciliation result handed to the render collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum FramePlan<P> {
    Place {
        placements: Vec<TilePlacement<P>>,
        stats: FrameStats,
    },
    /// The tile count measured by the layout pass disagrees with the range
    /// computed from current pan/zoom, so placing would tear; the caller
    /// retries next frame once geometry stabilizes.
    SkipUnstableGeometry {
        expected_tile_count: usize,
        measured_tile_count: usize,
    },
}

/// Owns the viewport, identity table, load-state cache, and fetch runtime,
/// and reconciles them once per frame: visible range -> identity -> desired
/// resolution -> cache lookup -> conditional fetch dispatch -> render
/// instruction. Never blocks on a fetch; placeholders fill the gaps.
pub struct GalleryEngine<P> {
    viewport: ViewportController,
    identities: Arc<IdentityTable>,
    cache: Arc<LoadStateCache<P>>,
    load_sizes: LoadSizeTable,
    fetch_sender: FetchRequestSender,
    show_debug_overlay: bool,
    next_frame_sequence_id: u64,
    _fetch_runtime: FetchRuntime,
}

impl<P> GalleryEngine<P>
where
    P: Clone + Send + 'static,
{
    pub fn start<F>(config: EngineConfig, fetcher: Arc<F>) -> Result<Self, EngineStartError>
    where
        F: ContentFetcher<P> + ?Sized + 'static,
    {
        let viewport = ViewportController::new(config.base_tile_size)?;
        let identities = Arc::new(IdentityTable::new(config.catalog_size)?);
        let cache = Arc::new(LoadStateCache::new());
        let load_sizes =
            LoadSizeTable::from_multipliers(config.base_tile_size, &config.load_width_multipliers);
        let (fetch_runtime, fetch_sender) = FetchRuntime::start(
            FetchRuntimeConfig {
                worker_count: config.fetch_worker_count,
            },
            fetcher,
            Arc::clone(&cache),
            Arc::clone(&identities),
        )?;

        Ok(Self {
            viewport,
            identities,
            cache,
            load_sizes,
            fetch_sender,
            show_debug_overlay: config.show_debug_overlay,
            next_frame_sequence_id: 0,
            _fetch_runtime: fetch_runtime,
        })
    }

    pub fn viewport_state(&self) -> ViewportState {
        self.viewport.state()
    }

    pub fn show_debug_overlay(&self) -> bool {
        self.show_debug_overlay
    }

    pub fn pointer_pressed(&mut self) {
        self.viewport.pointer_pressed();
    }

    pub fn pointer_moved(&mut self, position: PixelOffset) -> Result<(), ViewportError> {
        self.viewport.pointer_moved(position)
    }

    pub fn pointer_released(&mut self) {
        self.viewport.pointer_released();
    }

    pub fn scrolled(&mut self, scroll_delta: f32) -> Result<bool, ViewportError> {
        self.viewport.scrolled(scroll_delta)
    }

    /// Runs one frame of reconciliation. `measured_tile_count` is the tile
    /// count the render collaborator laid out last pass; `None` on the
    /// first frame, before any layout has happened.
    pub fn compose_frame(
        &mut self,
        viewport_size: PixelSize,
        measured_tile_count: Option<usize>,
    ) -> FramePlan<P> {
        let state = self.viewport.state();
        let tile_size = state.tile_size();
        let pan_offset = state.pan_offset();
        let range = visible_range(viewport_size, pan_offset, tile_size);
        let expected_tile_count = range.tile_count();

        if let Some(measured) = measured_tile_count
            && measured != expected_tile_count
        {
            log::debug!(
                "skipping placement: measured {} tiles, expected {}",
                measured,
                expected_tile_count
            );
            return FramePlan::SkipUnstableGeometry {
                expected_tile_count,
                measured_tile_count: measured,
            };
        }

        let desired = self.desired_load_size(tile_size);
        let mut placements = Vec::with_capacity(expected_tile_count);
        let mut ready_count = 0;
        let mut pending_count = 0;
        let mut dispatched_count = 0;

        for index in range.iter() {
            let id = self.identities.resolve(index);

            if self.cache.ensure_requested(id, desired.width) {
                dispatched_count += 1;
                if let Err(error) = self.fetch_sender.dispatch(FetchRequest {
                    index,
                    id,
                    width: desired.width,
                    height: desired.height,
                }) {
                    // Runtime is gone; roll the pending entry back so a
                    // later frame can request the key again.
                    log::warn!("fetch dispatch failed for content {id}: {error}");
                    self.cache.fail(id, desired.width);
                    dispatched_count -= 1;
                }
            }

            let content = match self.cache.best_available(id, desired.width) {
                Some((width, payload)) => {
                    ready_count += 1;
                    TileContent::Ready { payload, width }
                }
                None => {
                    pending_count += 1;
                    TileContent::Pending
                }
            };

            placements.push(TilePlacement {
                index,
                id,
                offset: placement_of(index, range.top_left, tile_size, pan_offset),
                size: tile_size,
                content,
            });
        }

        let stats = FrameStats {
            frame_sequence_id: self.next_frame_sequence_id,
            tile_count: expected_tile_count,
            ready_count,
            pending_count,
            dispatched_count,
        };
        self.next_frame_sequence_id = self
            .next_frame_sequence_id
            .checked_add(1)
            .expect("frame sequence id overflow");

        FramePlan::Place { placements, stats }
    }

    /// Desired fetch dimensions for the current tile pixel size. With no
    /// supported load sizes configured, falls back to a request sized like
    /// the base tile.
    fn desired_load_size(&self, tile_size: PixelSize) -> LoadSize {
        let desired_width = tile_size.width.ceil().max(1.0) as u32;
        match select_width(desired_width, self.load_sizes.widths()) {
            Some(width) => LoadSize {
                width,
                height: self
                    .load_sizes
                    .height_for(width)
                    .expect("selected width missing from load size table"),
            },
            None => {
                let base = self.viewport.state().base_tile_size();
                LoadSize {
                    width: base.width.ceil().max(1.0) as u32,
                    height: base.height.ceil().max(1.0) as u32,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    use fetch::FetchError;

    use super::*;

    const VIEWPORT: PixelSize = PixelSize {
        width: 1280.0,
        height: 720.0,
    };

    #[derive(Default)]
    struct CountingFetcher {
        requests: Mutex<Vec<(ContentId, u32, u32)>>,
        fail_all: bool,
        // While set, workers block so a test can observe the pending state.
        hold: std::sync::atomic::AtomicBool,
    }

    impl CountingFetcher {
        fn held() -> Self {
            Self {
                hold: std::sync::atomic::AtomicBool::new(true),
                ..Self::default()
            }
        }

        fn release(&self) {
            self.hold.store(false, std::sync::atomic::Ordering::Release);
        }
    }

    impl ContentFetcher<String> for CountingFetcher {
        fn fetch(&self, id: ContentId, width: u32, height: u32) -> Result<String, FetchError> {
            while self.hold.load(std::sync::atomic::Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(1));
            }
            self.requests
                .lock()
                .expect("requests lock")
                .push((id, width, height));
            if self.fail_all {
                return Err(FetchError::new("scripted failure"));
            }
            Ok(format!("content-{id}-{width}"))
        }
    }

    fn engine_with(config: EngineConfig, fetcher: Arc<CountingFetcher>) -> GalleryEngine<String> {
        GalleryEngine::start(config, fetcher).expect("start gallery engine")
    }

    fn place(plan: FramePlan<String>) -> (Vec<TilePlacement<String>>, FrameStats) {
        match plan {
            FramePlan::Place { placements, stats } => (placements, stats),
            FramePlan::SkipUnstableGeometry { .. } => panic!("expected a placement frame"),
        }
    }

    fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        condition()
    }

    #[test]
    fn first_frame_is_all_pending_and_dispatches_one_fetch_per_key() {
        let fetcher = Arc::new(CountingFetcher::held());
        let mut engine = engine_with(EngineConfig::default(), Arc::clone(&fetcher));

        let (placements, stats) = place(engine.compose_frame(VIEWPORT, None));
        fetcher.release();
        assert_eq!(placements.len(), 24);
        assert_eq!(stats.tile_count, 24);
        assert_eq!(stats.ready_count, 0);
        assert_eq!(stats.pending_count, 24);
        assert!(stats.has_activity());
        assert!(
            placements
                .iter()
                .all(|placement| placement.content == TileContent::Pending)
        );

        // Distinct ids each dispatch once; tiles that drew the same id share
        // one in-flight fetch.
        let distinct_ids: HashSet<ContentId> =
            placements.iter().map(|placement| placement.id).collect();
        assert_eq!(stats.dispatched_count, distinct_ids.len());
    }

    #[test]
    fn tiles_become_ready_once_the_fetch_completes() {
        let fetcher = Arc::new(CountingFetcher::held());
        let mut engine = engine_with(EngineConfig::default(), Arc::clone(&fetcher));

        let (_, first_stats) = place(engine.compose_frame(VIEWPORT, None));
        assert_eq!(first_stats.ready_count, 0);
        fetcher.release();

        let expected = first_stats.tile_count;
        assert!(wait_until(Duration::from_secs(2), || {
            let (_, stats) = place(engine.compose_frame(VIEWPORT, Some(expected)));
            stats.ready_count == stats.tile_count
        }));

        let (placements, stats) = place(engine.compose_frame(VIEWPORT, Some(expected)));
        assert_eq!(stats.pending_count, 0);
        assert_eq!(stats.dispatched_count, 0);
        for placement in &placements {
            match &placement.content {
                TileContent::Ready { payload, width } => {
                    assert_eq!(*width, 300);
                    assert_eq!(payload, &format!("content-{}-300", placement.id));
                }
                TileContent::Pending => panic!("tile still pending after completion"),
            }
        }
    }

    #[test]
    fn repeated_frames_never_duplicate_in_flight_fetches() {
        let fetcher = Arc::new(CountingFetcher::default());
        let mut engine = engine_with(EngineConfig::default(), Arc::clone(&fetcher));

        let (placements, _) = place(engine.compose_frame(VIEWPORT, None));
        let expected = placements.len();
        for _ in 0..10 {
            let (_, stats) = place(engine.compose_frame(VIEWPORT, Some(expected)));
            assert_eq!(stats.dispatched_count, 0);
        }
    }

    #[test]
    fn geometry_mismatch_skips_placement_for_the_frame() {
        let fetcher = Arc::new(CountingFetcher::default());
        let mut engine = engine_with(EngineConfig::default(), Arc::clone(&fetcher));

        let plan = engine.compose_frame(VIEWPORT, Some(4));
        assert_eq!(
            plan,
            FramePlan::SkipUnstableGeometry {
                expected_tile_count: 24,
                measured_tile_count: 4,
            }
        );

        // Once the measured count catches up, placement resumes.
        let (placements, _) = place(engine.compose_frame(VIEWPORT, Some(24)));
        assert_eq!(placements.len(), 24);
    }

    #[test]
    fn desired_width_follows_zoomed_tile_size() {
        let fetcher = Arc::new(CountingFetcher::default());
        let mut engine = engine_with(EngineConfig::default(), Arc::clone(&fetcher));

        // Zoom out: four halvings shrink tiles to 18.75px, under the 30px
        // thumbnail width.
        for _ in 0..4 {
            engine.scrolled(5.0).expect("scroll to zoom out");
        }
        assert!(engine.viewport_state().tile_size().width < 30.0);

        let (_, stats) = place(engine.compose_frame(VIEWPORT, None));
        assert!(stats.dispatched_count > 0);
        assert!(wait_until(Duration::from_secs(2), || {
            !fetcher.requests.lock().expect("requests lock").is_empty()
        }));
        let requests = fetcher.requests.lock().expect("requests lock");
        assert!(
            requests
                .iter()
                .all(|(_, width, height)| *width == 30 && *height == 30)
        );
    }

    #[test]
    fn empty_load_size_table_falls_back_to_base_tile_request() {
        let fetcher = Arc::new(CountingFetcher::default());
        let config = EngineConfig {
            load_width_multipliers: Vec::new(),
            ..EngineConfig::default()
        };
        let mut engine = engine_with(config, Arc::clone(&fetcher));

        let (_, stats) = place(engine.compose_frame(VIEWPORT, None));
        assert!(stats.dispatched_count > 0);
        assert!(wait_until(Duration::from_secs(2), || {
            !fetcher.requests.lock().expect("requests lock").is_empty()
        }));
        let requests = fetcher.requests.lock().expect("requests lock");
        assert!(
            requests
                .iter()
                .all(|(_, width, height)| *width == 300 && *height == 300)
        );
    }

    #[test]
    fn failed_fetches_reassign_tile_identities_for_the_next_frame() {
        let fetcher = Arc::new(CountingFetcher {
            fail_all: true,
            ..CountingFetcher::default()
        });
        let config = EngineConfig {
            catalog_size: 1_000_000,
            ..EngineConfig::default()
        };
        let mut engine = engine_with(config, Arc::clone(&fetcher));

        let (first_placements, first_stats) = place(engine.compose_frame(VIEWPORT, None));
        let first_ids: Vec<ContentId> = first_placements
            .iter()
            .map(|placement| placement.id)
            .collect();

        // Wait for every dispatched fetch to fail and evict.
        let dispatched = first_stats.dispatched_count;
        assert!(wait_until(Duration::from_secs(2), || {
            fetcher.requests.lock().expect("requests lock").len() >= dispatched
        }));
        assert!(wait_until(Duration::from_secs(2), || {
            let (placements, _) =
                place(engine.compose_frame(VIEWPORT, Some(first_stats.tile_count)));
            let ids: Vec<ContentId> = placements.iter().map(|placement| placement.id).collect();
            ids != first_ids
        }));
    }

    #[test]
    fn pan_drag_shifts_the_visible_range() {
        let fetcher = Arc::new(CountingFetcher::default());
        let mut engine = engine_with(EngineConfig::default(), Arc::clone(&fetcher));

        let (before, _) = place(engine.compose_frame(VIEWPORT, None));
        assert_eq!(before[0].index, TileIndex { column: 0, row: 0 });

        engine
            .pointer_moved(PixelOffset { x: 600.0, y: 400.0 })
            .expect("move");
        engine.pointer_pressed();
        engine
            .pointer_moved(PixelOffset { x: 0.0, y: 400.0 })
            .expect("drag");
        engine.pointer_released();

        // Panned right by 600px = two full tiles.
        let (after, _) = place(engine.compose_frame(VIEWPORT, Some(before.len())));
        assert_eq!(after[0].index, TileIndex { column: 2, row: 0 });
    }
}
