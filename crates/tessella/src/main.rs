use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use engine::{EngineConfig, FramePlan, GalleryEngine, TileContent};
use fetch::{ContentFetcher, FetchError};
use grid::{PixelOffset, PixelSize};
use image::{Rgba, RgbaImage};

const VIEWPORT_WIDTH: f32 = 1280.0;
const VIEWPORT_HEIGHT: f32 = 720.0;
const FRAME_INTERVAL: Duration = Duration::from_millis(16);
const SYNTHETIC_FETCH_LATENCY: Duration = Duration::from_millis(5);
const DRAG_PIXELS_PER_FRAME: f32 = 24.0;
const ZOOM_SCROLL_PERIOD: u64 = 40;

#[derive(Parser)]
#[command(author, version, about = "Headless infinite-gallery engine demo")]
struct Arguments {
    /// Base tile edge length in pixels.
    #[arg(long, default_value_t = 300.0)]
    tile_size: f32,
    /// Load size multipliers applied to the base tile size.
    #[arg(long, value_delimiter = ',', default_value = "0.1,1.0,5.0")]
    load_multipliers: Vec<f32>,
    /// Content catalog size; ids are drawn from `[0, catalog_size)`.
    #[arg(long, default_value_t = 1085)]
    catalog_size: u32,
    /// Every n-th content id fails to fetch, exercising the self-healing
    /// eviction path. Zero disables the gaps.
    #[arg(long, default_value_t = 13)]
    gap_modulus: u32,
    /// Fetch worker thread count.
    #[arg(long, default_value_t = 4)]
    fetch_workers: usize,
    /// Number of simulated frames to run.
    #[arg(long, default_value_t = 120)]
    frames: u64,
    /// Print per-tile placements alongside the frame stats.
    #[arg(long)]
    debug_overlay: bool,
}

/// Stand-in for the remote image service: serves a solid-color image of the
/// requested dimensions, with deliberate gaps in the catalog.
struct SyntheticFetcher {
    gap_modulus: u32,
}

impl ContentFetcher<Arc<RgbaImage>> for SyntheticFetcher {
    fn fetch(&self, id: u32, width: u32, height: u32) -> Result<Arc<RgbaImage>, FetchError> {
        std::thread::sleep(SYNTHETIC_FETCH_LATENCY);
        if self.gap_modulus != 0 && id % self.gap_modulus == 0 {
            return Err(FetchError::new(format!("no content for id {id}")));
        }
        let color = color_for(id);
        Ok(Arc::new(RgbaImage::from_pixel(width, height, color)))
    }
}

fn color_for(id: u32) -> Rgba<u8> {
    let mixed = id.wrapping_mul(0x9E37_79B9);
    Rgba([
        (mixed >> 24) as u8,
        (mixed >> 16) as u8,
        (mixed >> 8) as u8,
        0xFF,
    ])
}

fn main() -> Result<()> {
    env_logger::init();
    let arguments = Arguments::parse();

    let config = EngineConfig {
        base_tile_size: PixelSize {
            width: arguments.tile_size,
            height: arguments.tile_size,
        },
        load_width_multipliers: arguments.load_multipliers.clone(),
        catalog_size: arguments.catalog_size,
        fetch_worker_count: arguments.fetch_workers,
        show_debug_overlay: arguments.debug_overlay,
    };
    let fetcher = Arc::new(SyntheticFetcher {
        gap_modulus: arguments.gap_modulus,
    });
    let mut gallery =
        GalleryEngine::start(config, fetcher).context("start gallery engine")?;

    let viewport_size = PixelSize {
        width: VIEWPORT_WIDTH,
        height: VIEWPORT_HEIGHT,
    };
    let mut measured_tile_count = None;

    gallery
        .pointer_moved(PixelOffset {
            x: VIEWPORT_WIDTH * 0.5,
            y: VIEWPORT_HEIGHT * 0.5,
        })
        .context("position pointer")?;

    for frame in 0..arguments.frames {
        drive_scripted_input(&mut gallery, frame).context("drive scripted input")?;

        match gallery.compose_frame(viewport_size, measured_tile_count) {
            FramePlan::Place { placements, stats } => {
                measured_tile_count = Some(placements.len());
                if stats.has_activity() {
                    println!(
                        "[engine] frame={} tiles={} ready={} pending={} dispatched={}",
                        stats.frame_sequence_id,
                        stats.tile_count,
                        stats.ready_count,
                        stats.pending_count,
                        stats.dispatched_count,
                    );
                }
                if gallery.show_debug_overlay() {
                    for placement in &placements {
                        let state = match &placement.content {
                            TileContent::Ready { width, .. } => format!("ready@{width}"),
                            TileContent::Pending => "pending".to_owned(),
                        };
                        println!(
                            "[tile] index=({}, {}) id={} offset=({:.1}, {:.1}) {}",
                            placement.index.column,
                            placement.index.row,
                            placement.id,
                            placement.offset.x,
                            placement.offset.y,
                            state,
                        );
                    }
                }
            }
            FramePlan::SkipUnstableGeometry {
                expected_tile_count,
                measured_tile_count: measured,
            } => {
                println!(
                    "[engine] frame skipped: measured={measured} expected={expected_tile_count}"
                );
                // The layout pass recomposes to the new count before the
                // next frame.
                measured_tile_count = Some(expected_tile_count);
            }
        }

        std::thread::sleep(FRAME_INTERVAL);
    }

    let state = gallery.viewport_state();
    println!(
        "[engine] done: zoom={:.3} pan=({:.1}, {:.1}) tile={:.1}x{:.1}",
        state.zoom(),
        state.pan_offset().x,
        state.pan_offset().y,
        state.tile_size().width,
        state.tile_size().height,
    );
    Ok(())
}

/// Scripted pan/zoom gesture: a long drag to the lower right with a zoom
/// pulse every [`ZOOM_SCROLL_PERIOD`] frames, alternating in and out.
fn drive_scripted_input(gallery: &mut GalleryEngine<Arc<RgbaImage>>, frame: u64) -> Result<()> {
    if frame == 0 {
        gallery.pointer_pressed();
    }

    let pointer = gallery_pointer_for(frame);
    gallery.pointer_moved(pointer)?;

    if frame != 0 && frame % ZOOM_SCROLL_PERIOD == 0 {
        let scroll_delta = if (frame / ZOOM_SCROLL_PERIOD) % 2 == 1 {
            -2.0
        } else {
            2.0
        };
        let applied = gallery.scrolled(scroll_delta)?;
        log::debug!("frame {frame}: scroll {scroll_delta} applied={applied}");
    }
    Ok(())
}

fn gallery_pointer_for(frame: u64) -> PixelOffset {
    let progress = frame as f32 * DRAG_PIXELS_PER_FRAME;
    PixelOffset {
        x: (VIEWPORT_WIDTH * 0.5 - progress).rem_euclid(VIEWPORT_WIDTH),
        y: (VIEWPORT_HEIGHT * 0.5 - progress * 0.4).rem_euclid(VIEWPORT_HEIGHT),
    }
}
