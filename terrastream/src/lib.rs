//! Terrastream - tile streaming for virtual-globe viewers
//!
//! This library provides the streaming core of a globe renderer: a quadtree
//! of terrain tiles with LRU residency, imagery layers draped over the
//! terrain, and a frame-driven scheduler that bounds how many tile requests
//! are in flight.
//!
//! # Modules
//!
//! - [`tiling`]: tiling schemes and geodetic rectangles
//! - [`quadtree`]: the terrain tile tree and its replacement queue
//! - [`request`]: request scheduling, priority heap and retries
//! - [`imagery`]: imagery providers, cache, overlays and loading
//! - [`transport`]: HTTP transport behind the scheduler
//! - [`config`], [`logging`]: configuration and log setup
//!
//! # Frame loop
//!
//! ```ignore
//! loop {
//!     queue.mark_frame_start();
//!     // select tiles, mark them used, create overlays, process imagery
//!     scheduler.tick();
//!     queue.trim(&mut tree, config.tiles.tile_cache_size);
//!     layer.cache_mut().process_releases();
//! }
//! ```

pub mod config;
pub mod event;
pub mod imagery;
pub mod logging;
pub mod quadtree;
pub mod request;
pub mod tiling;
pub mod transport;

pub use config::StreamingConfig;
pub use quadtree::{NodeId, ReplacementQueue, TileKey, TileTree};
pub use request::{FetchRequest, RequestScheduler};
