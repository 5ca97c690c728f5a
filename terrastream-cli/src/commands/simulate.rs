//! Simulate command - run a headless streaming session.
//!
//! Each frame selects the terrain tiles around a camera that drifts eastward,
//! drapes imagery from the configured URL template over them, ticks the
//! request scheduler and trims the tile cache. A summary is printed once the
//! last frame has run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Args;
use serde::Serialize;
use tracing::{debug, info, warn};

use terrastream::config::StreamingConfig;
use terrastream::imagery::{
    ErrorReporter, HeightmapErrorModel, ImageryLayer, ImageryLoader, ImageryReleaser, ImageryState,
    TileOverlay, TileOverlayMapper, UrlTemplateProvider,
};
use terrastream::quadtree::{NodeId, ReplacementQueue, TileKey, TileLoadState, TilePayload, TileTree};
use terrastream::request::{RequestScheduler, RequestStatistics};
use terrastream::tiling::{
    negative_pi_to_pi, Cartographic, GeographicTilingScheme, TilingScheme, MAXIMUM_LEVEL,
};
use terrastream::transport::ReqwestTransport;

use crate::error::CliError;

/// Arguments for the simulate command.
#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Camera longitude in degrees
    #[arg(long, default_value_t = 8.68, allow_negative_numbers = true)]
    pub lon: f64,

    /// Camera latitude in degrees
    #[arg(long, default_value_t = 50.11, allow_negative_numbers = true)]
    pub lat: f64,

    /// Terrain level to stream
    #[arg(
        long,
        default_value_t = 6,
        value_parser = clap::value_parser!(u32).range(0..=i64::from(MAXIMUM_LEVEL))
    )]
    pub level: u32,

    /// Tiles selected around the camera in each direction
    #[arg(long, default_value_t = 1)]
    pub radius: u32,

    /// Eastward camera drift per frame, in degrees
    #[arg(long, default_value_t = 0.25, allow_negative_numbers = true)]
    pub drift: f64,

    /// Number of frames to run
    #[arg(long, default_value_t = 240)]
    pub frames: u32,

    /// Frame period in milliseconds
    #[arg(long, default_value_t = 16)]
    pub frame_ms: u64,

    /// Imagery URL template, overriding the configuration
    #[arg(long)]
    pub url: Option<String>,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

/// Run the simulate command.
pub fn run(args: SimulateArgs, mut config: StreamingConfig) -> Result<(), CliError> {
    if let Some(url) = &args.url {
        config.imagery.url_template = url.clone();
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::Session(format!("Failed to start runtime: {}", e)))?;

    let report = runtime.block_on(simulate(&args, &config))?;
    print_report(&report, args.json)
}

// =============================================================================
// Session
// =============================================================================

/// Terrain payload: the imagery draped over one tile.
struct SurfaceTile {
    overlays: Vec<TileOverlay>,
    releaser: ImageryReleaser,
}

impl TilePayload for SurfaceTile {
    fn free_resources(&mut self) {
        self.releaser
            .release_all(self.overlays.drain(..).flat_map(TileOverlay::into_handles));
    }
}

/// A tile selected for the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Selection {
    key: TileKey,
    /// Chebyshev distance from the camera's tile.
    distance: u32,
}

/// Summary of a finished session.
#[derive(Debug, Default, Serialize)]
struct SessionReport {
    frames: u32,
    elapsed_ms: u64,
    tiles_selected: usize,
    tiles_done: usize,
    tiles_evicted: usize,
    resident_tiles: usize,
    terrain_nodes: usize,
    imagery_cached: usize,
    imagery_ready: usize,
    imagery_failed: usize,
    imagery_errors: u64,
    requests: RequestStatistics,
}

struct Session {
    tree: TileTree<SurfaceTile>,
    queue: ReplacementQueue,
    layer: ImageryLayer,
    mapper: TileOverlayMapper,
    scheduler: RequestScheduler,
    tile_cache_size: usize,
}

impl Session {
    /// Must be called from within the tokio runtime.
    fn new(config: &StreamingConfig, errors: Arc<AtomicU64>) -> Result<Self, CliError> {
        let terrain_scheme: Arc<dyn TilingScheme> = Arc::new(GeographicTilingScheme::default());
        let provider = UrlTemplateProvider::from_config(&config.imagery)?;

        let mut error_reporter = ErrorReporter::new(config.imagery.retry_limit);
        error_reporter.error_event_mut().add_listener(move |record| {
            errors.fetch_add(1, Ordering::Relaxed);
            warn!(
                tile = %record.key(),
                times_retried = record.times_retried.unwrap_or(0),
                "{}",
                record
            );
            record.retry = true;
        });

        let layer = ImageryLayer::new(Arc::new(provider))
            .with_base_layer(true)
            .with_error_reporter(error_reporter);
        let transport = Arc::new(ReqwestTransport::new()?);

        Ok(Self {
            tree: TileTree::new(Arc::clone(&terrain_scheme)),
            queue: ReplacementQueue::new(),
            layer,
            mapper: TileOverlayMapper::new(Arc::new(HeightmapErrorModel::new(terrain_scheme.as_ref()))),
            scheduler: RequestScheduler::from_current(&config.scheduler, transport)?,
            tile_cache_size: config.tiles.tile_cache_size,
        })
    }

    /// Runs one frame. Returns the number of finished and evicted tiles.
    fn frame(&mut self, selection: &[Selection]) -> (usize, usize) {
        self.queue.mark_frame_start();

        let mut done = 0;
        for selected in selection {
            let Some(path) = path_to(&mut self.tree, selected.key) else {
                continue;
            };
            // Ancestors first, so a tile is never older than its parent
            for &id in &path {
                self.queue.mark_used(id);
            }
            let Some(&id) = path.last() else {
                continue;
            };
            let rectangle = self.tree.rectangle(id);

            if self.tree.payload(id).is_none() {
                let overlays = self.mapper.create_overlays(&mut self.layer, selected.key, &rectangle);
                let releaser = self.layer.cache().releaser();
                self.tree.set_payload(id, SurfaceTile { overlays, releaser });
                self.tree.set_state(id, TileLoadState::Loading);
            }

            let Some(tile) = self.tree.payload_mut(id) else {
                continue;
            };
            let mut loader = ImageryLoader::new(&mut self.layer, &mut self.scheduler)
                .with_priority(f64::from(selected.distance));
            if loader.process_overlays(&mut tile.overlays, &rectangle, false) {
                self.tree.set_state(id, TileLoadState::Done);
                done += 1;
            }
        }

        self.scheduler.tick();
        let evicted = self.queue.trim(&mut self.tree, self.tile_cache_size).len();
        self.layer.cache_mut().process_releases();

        (done, evicted)
    }

    fn fill_report(&self, report: &mut SessionReport) {
        report.resident_tiles = self.queue.len();
        report.terrain_nodes = self.tree.len();
        report.imagery_cached = self.layer.cache().len();
        for (_, imagery) in self.layer.cache().iter() {
            match imagery.state() {
                ImageryState::Ready => report.imagery_ready += 1,
                state if state.is_terminal() => report.imagery_failed += 1,
                _ => {}
            }
        }
        report.requests = self.scheduler.statistics();
    }
}

async fn simulate(args: &SimulateArgs, config: &StreamingConfig) -> Result<SessionReport, CliError> {
    let errors = Arc::new(AtomicU64::new(0));
    let mut session = Session::new(config, Arc::clone(&errors))?;

    info!(
        url_template = %config.imagery.url_template,
        level = args.level,
        radius = args.radius,
        frames = args.frames,
        "Starting simulation"
    );

    let mut interval = tokio::time::interval(Duration::from_millis(args.frame_ms.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let started = Instant::now();
    let mut report = SessionReport::default();

    for frame in 0..args.frames {
        interval.tick().await;

        let longitude = negative_pi_to_pi((args.lon + args.drift * f64::from(frame)).to_radians());
        let camera = Cartographic::new(longitude, args.lat.to_radians());
        let selection = select_tiles(session.tree.tiling_scheme().as_ref(), camera, args.level, args.radius);

        let (done, evicted) = session.frame(&selection);
        report.tiles_selected = selection.len();
        report.tiles_done = done;
        report.tiles_evicted += evicted;

        debug!(frame, selected = selection.len(), done, evicted, "Frame complete");
    }

    report.frames = args.frames;
    report.elapsed_ms = started.elapsed().as_millis() as u64;
    report.imagery_errors = errors.load(Ordering::Relaxed);
    session.fill_report(&mut report);

    info!(
        tiles_done = report.tiles_done,
        tiles_evicted = report.tiles_evicted,
        imagery_ready = report.imagery_ready,
        "Simulation finished"
    );
    Ok(report)
}

// =============================================================================
// Tile selection
// =============================================================================

/// Tiles at `level` within `radius` of the camera's tile, nearest first.
///
/// Columns wrap across the antimeridian; rows beyond the poles are skipped.
fn select_tiles(scheme: &dyn TilingScheme, camera: Cartographic, level: u32, radius: u32) -> Vec<Selection> {
    let Some(center) = scheme.position_to_tile_xy(camera, level) else {
        return Vec::new();
    };

    let columns = i64::from(scheme.number_of_x_tiles_at_level(level));
    let rows = i64::from(scheme.number_of_y_tiles_at_level(level));
    let radius = i64::from(radius);

    let mut selection: Vec<Selection> = Vec::new();
    for dy in -radius..=radius {
        let y = i64::from(center.y) + dy;
        if y < 0 || y >= rows {
            continue;
        }
        for dx in -radius..=radius {
            let x = (i64::from(center.x) + dx).rem_euclid(columns);
            let key = TileKey::new(x as u32, y as u32, level);
            if selection.iter().any(|selected| selected.key == key) {
                continue;
            }
            selection.push(Selection {
                key,
                distance: dx.unsigned_abs().max(dy.unsigned_abs()) as u32,
            });
        }
    }

    selection.sort_by_key(|selected| selected.distance);
    selection
}

/// Nodes from the root down to `key`, creating them as needed.
fn path_to<P: TilePayload>(tree: &mut TileTree<P>, key: TileKey) -> Option<Vec<NodeId>> {
    let columns = tree.tiling_scheme().number_of_x_tiles_at_level(0);
    let root_index = ((key.y >> key.level) * columns + (key.x >> key.level)) as usize;
    let mut id = *tree.create_root_tiles().get(root_index)?;

    let mut path = Vec::with_capacity(key.level as usize + 1);
    path.push(id);
    for depth in (0..key.level).rev() {
        let quadrant = ((key.y >> depth) & 1) * 2 + ((key.x >> depth) & 1);
        id = tree.children(id)[quadrant as usize];
        path.push(id);
    }
    Some(path)
}

// =============================================================================
// Output
// =============================================================================

fn print_report(report: &SessionReport, json: bool) -> Result<(), CliError> {
    if json {
        let rendered = serde_json::to_string_pretty(report).map_err(|e| CliError::Output(e.to_string()))?;
        println!("{}", rendered);
        return Ok(());
    }

    let requests = &report.requests;
    println!("Simulation Summary");
    println!("==================");
    println!();
    println!("  Frames:           {} in {} ms", report.frames, report.elapsed_ms);
    println!(
        "  Terrain:          {}/{} tiles done, {} resident, {} evicted, {} nodes",
        report.tiles_done, report.tiles_selected, report.resident_tiles, report.tiles_evicted, report.terrain_nodes
    );
    println!(
        "  Imagery:          {} cached, {} ready, {} failed, {} errors reported",
        report.imagery_cached, report.imagery_ready, report.imagery_failed, report.imagery_errors
    );
    println!(
        "  Requests:         {} attempted, {} started, {} received, {} failed",
        requests.attempted, requests.active_ever, requests.received, requests.failed
    );
    println!(
        "  Cancelled:        {} ({} while in flight)",
        requests.cancelled, requests.cancelled_active
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: SimulateArgs,
    }

    fn scheme() -> GeographicTilingScheme {
        GeographicTilingScheme::default()
    }

    #[test]
    fn test_level_argument_bounded() {
        let parsed = Harness::try_parse_from(["simulate", "--level", "30"]).unwrap();
        assert_eq!(parsed.args.level, MAXIMUM_LEVEL);
        assert_eq!(Harness::try_parse_from(["simulate"]).unwrap().args.level, 6);

        assert!(Harness::try_parse_from(["simulate", "--level", "31"]).is_err());
        assert!(Harness::try_parse_from(["simulate", "--level", "64"]).is_err());
    }

    #[test]
    fn test_select_tiles_nearest_first() {
        let camera = Cartographic::from_degrees(10.0, 10.0);
        let selection = select_tiles(&scheme(), camera, 3, 1);

        assert_eq!(selection.len(), 9);
        assert_eq!(selection[0].distance, 0);
        assert!(selection[1..].iter().all(|selected| selected.distance == 1));

        let center = scheme().position_to_tile_xy(camera, 3).unwrap();
        assert_eq!(selection[0].key, TileKey::new(center.x, center.y, 3));
    }

    #[test]
    fn test_select_tiles_wraps_antimeridian() {
        let camera = Cartographic::from_degrees(179.9, 10.0);
        let selection = select_tiles(&scheme(), camera, 2, 1);
        let columns = scheme().number_of_x_tiles_at_level(2);

        assert!(selection.iter().any(|selected| selected.key.x == 0));
        assert!(selection.iter().any(|selected| selected.key.x == columns - 1));
    }

    #[test]
    fn test_select_tiles_skips_rows_past_pole() {
        let camera = Cartographic::from_degrees(0.0, 89.0);
        let selection = select_tiles(&scheme(), camera, 2, 1);

        // The northern row is missing
        assert_eq!(selection.len(), 6);
        assert!(selection.iter().all(|selected| selected.key.y <= 1));
    }

    #[test]
    fn test_select_tiles_small_level_has_no_duplicates() {
        let selection = select_tiles(&scheme(), Cartographic::from_degrees(0.0, 0.0), 0, 2);
        assert_eq!(selection.len(), 2);
    }

    #[test]
    fn test_path_to_builds_path() {
        let mut tree: TileTree<()> = TileTree::new(Arc::new(scheme()));
        let key = TileKey::new(5, 2, 3);

        let path = path_to(&mut tree, key).unwrap();
        assert_eq!(path.len(), 4);
        assert_eq!(tree.key(path[0]), TileKey::new(0, 0, 0));
        assert_eq!(tree.key(path[3]), key);
        assert_eq!(tree.find(key), Some(path[3]));
        assert_eq!(path_to(&mut tree, key), Some(path));

        // Two roots, three levels of four children
        assert_eq!(tree.len(), 2 + 4 * 3);
    }

    #[test]
    fn test_moving_selection_keeps_tree_bounded() {
        let mut tree: TileTree<()> = TileTree::new(Arc::new(scheme()));
        let mut queue = ReplacementQueue::new();

        for frame in 0..64u32 {
            queue.mark_frame_start();
            let camera = Cartographic::from_degrees(-179.0 + 5.6 * f64::from(frame), 10.0);
            for selected in select_tiles(&scheme(), camera, 5, 1) {
                for id in path_to(&mut tree, selected.key).unwrap() {
                    queue.mark_used(id);
                }
            }
            queue.trim(&mut tree, 40);
        }

        // One frame of paths is at most 9 leaves with 5 ancestors each, plus
        // the siblings created along the way
        assert!(tree.len() < 2 + 4 * 5 * 9, "live nodes {}", tree.len());
        assert!(tree.capacity() < 2 * (2 + 4 * 5 * 9), "slots {}", tree.capacity());
    }
}
