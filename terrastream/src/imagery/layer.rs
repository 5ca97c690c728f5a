//! Imagery layers.

use std::sync::Arc;

use super::cache::{ImageryCache, ImageryHandle};
use super::error::ErrorReporter;
use super::provider::ImageryProvider;
use crate::quadtree::TileKey;
use crate::tiling::Rectangle;

/// One imagery source draped over the terrain.
///
/// A layer owns the cache of its imagery tiles and the error reporter for
/// their failures. The base layer is stretched to cover every terrain tile,
/// even outside its own extent.
#[derive(Debug)]
pub struct ImageryLayer {
    provider: Arc<dyn ImageryProvider>,
    rectangle: Rectangle,
    is_base_layer: bool,
    minimum_terrain_level: Option<u32>,
    maximum_terrain_level: Option<u32>,
    cache: ImageryCache,
    error_reporter: ErrorReporter,
}

impl ImageryLayer {
    pub fn new(provider: Arc<dyn ImageryProvider>) -> Self {
        Self {
            provider,
            rectangle: Rectangle::MAX_VALUE,
            is_base_layer: false,
            minimum_terrain_level: None,
            maximum_terrain_level: None,
            cache: ImageryCache::new(),
            error_reporter: ErrorReporter::default(),
        }
    }

    /// Clip the layer to `rectangle` in addition to the provider's extent.
    pub fn with_rectangle(mut self, rectangle: Rectangle) -> Self {
        self.rectangle = rectangle;
        self
    }

    pub fn with_base_layer(mut self, is_base_layer: bool) -> Self {
        self.is_base_layer = is_base_layer;
        self
    }

    /// Only drape the layer over terrain tiles within these levels.
    pub fn with_terrain_levels(mut self, minimum: Option<u32>, maximum: Option<u32>) -> Self {
        self.minimum_terrain_level = minimum;
        self.maximum_terrain_level = maximum;
        self
    }

    pub fn with_error_reporter(mut self, error_reporter: ErrorReporter) -> Self {
        self.error_reporter = error_reporter;
        self
    }

    pub fn provider(&self) -> &Arc<dyn ImageryProvider> {
        &self.provider
    }

    pub fn rectangle(&self) -> &Rectangle {
        &self.rectangle
    }

    pub fn is_base_layer(&self) -> bool {
        self.is_base_layer
    }

    /// Whether terrain tiles at `level` get imagery from this layer.
    pub fn covers_terrain_level(&self, level: u32) -> bool {
        self.minimum_terrain_level.map_or(true, |minimum| level >= minimum)
            && self.maximum_terrain_level.map_or(true, |maximum| level <= maximum)
    }

    pub fn cache(&self) -> &ImageryCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut ImageryCache {
        &mut self.cache
    }

    pub fn error_reporter(&self) -> &ErrorReporter {
        &self.error_reporter
    }

    pub fn error_reporter_mut(&mut self) -> &mut ErrorReporter {
        &mut self.error_reporter
    }

    /// Takes a reference on the imagery tile at `key`, creating it if needed.
    pub fn imagery_from_cache(&mut self, key: TileKey) -> ImageryHandle {
        self.cache.get_or_create(key, self.provider.tiling_scheme().as_ref())
    }

    pub(crate) fn parts_mut(&mut self) -> (&Arc<dyn ImageryProvider>, &mut ImageryCache, &mut ErrorReporter) {
        (&self.provider, &mut self.cache, &mut self.error_reporter)
    }
}
