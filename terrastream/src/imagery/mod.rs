//! Imagery draped over terrain tiles.
//!
//! Each [`ImageryLayer`] pairs an [`ImageryProvider`] with a reference-counted
//! [`ImageryCache`]. For every terrain tile, the [`TileOverlayMapper`] works
//! out which imagery tiles cover it, and the [`ImageryLoader`] moves those
//! tiles through their [`ImageryState`]s using the shared request scheduler.
//!
//! # Architecture
//!
//! ```text
//! terrain tile ──► TileOverlayMapper ──► TileOverlay ──► ImageryHandle
//!                                            │                 │
//!                                            ▼                 ▼
//!                                      ImageryLoader ──► ImageryCache ──► Imagery
//!                                            │
//!                                            ▼
//!                                     RequestScheduler
//! ```
//!
//! Failures go through the layer's [`ErrorReporter`], whose listeners may ask
//! for a bounded number of retries.

mod cache;
mod discard;
mod entry;
mod error;
mod layer;
mod loader;
mod overlay;
mod provider;

pub use cache::{ImageryCache, ImageryHandle, ImageryReleaser};
pub use discard::{DiscardMissingTilePolicy, NeverDiscard, TileDiscardPolicy};
pub use entry::{Imagery, ImageryState};
pub use error::{ErrorReporter, ImageryError, TileProviderError};
pub use layer::ImageryLayer;
pub use loader::ImageryLoader;
pub use overlay::{
    estimated_level_zero_error, imagery_level, texture_translation_and_scale, GeometricErrorModel,
    HeightmapErrorModel, TextureRectangle, TextureTransform, TileOverlay, TileOverlayMapper,
    DEFAULT_HEIGHTMAP_WIDTH,
};
pub use provider::{ImageryProvider, UrlTemplateProvider, DEFAULT_TILE_SIZE};
