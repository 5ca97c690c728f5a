//! Mapping imagery tiles onto terrain tiles.
//!
//! Terrain and imagery use independent tiling schemes, so a terrain tile is
//! usually covered by several imagery tiles, each occupying part of the
//! terrain tile's texture space. [`TileOverlayMapper::create_overlays`]
//! computes those parts:
//!
//! 1. Skip terrain levels outside the layer's terrain level window
//! 2. Intersect the terrain tile with the layer and provider extents; the
//!    base layer is clamped onto its nearest edge instead of being dropped
//! 3. Pick the imagery level whose texel spacing matches the terrain tile's
//!    geometric error
//! 4. Find the imagery tiles covering the intersection, ignoring slivers
//!    thinner than 1/512 of the terrain tile
//! 5. Compute each imagery tile's texture rectangle inside the terrain tile
//!
//! Every overlay holds references on cached imagery; hand the overlays back
//! through [`TileOverlayMapper::release_overlays`] (or an
//! [`ImageryReleaser`](super::ImageryReleaser)) when the terrain tile is
//! freed.

use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::cache::ImageryHandle;
use super::layer::ImageryLayer;
use super::provider::ImageryProvider;
use crate::quadtree::TileKey;
use crate::tiling::{Projection, Rectangle, TilingScheme, MAXIMUM_LATITUDE};

/// Terrain texels spanned by a heightmap tile.
pub const DEFAULT_HEIGHTMAP_WIDTH: u32 = 65;

/// Fraction of the terrain tile below which an imagery row or column is
/// treated as a sliver.
const SLIVER_FRACTION: f64 = 1.0 / 512.0;

// =============================================================================
// Geometric error
// =============================================================================

/// Source of the terrain's maximum geometric error per level, in meters.
pub trait GeometricErrorModel: Send + Sync {
    fn level_maximum_geometric_error(&self, level: u32) -> f64;
}

/// Error estimate for regular heightmap terrain.
///
/// Level zero's error is the spacing between heightmap samples at the
/// equator; each further level halves it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeightmapErrorModel {
    level_zero_error: f64,
}

impl HeightmapErrorModel {
    pub fn new(terrain_scheme: &dyn TilingScheme) -> Self {
        Self::with_heightmap_width(terrain_scheme, DEFAULT_HEIGHTMAP_WIDTH)
    }

    pub fn with_heightmap_width(terrain_scheme: &dyn TilingScheme, width: u32) -> Self {
        Self {
            level_zero_error: estimated_level_zero_error(
                terrain_scheme.ellipsoid_maximum_radius(),
                width,
                terrain_scheme.number_of_x_tiles_at_level(0),
            ),
        }
    }

    pub fn level_zero_error(&self) -> f64 {
        self.level_zero_error
    }
}

impl GeometricErrorModel for HeightmapErrorModel {
    fn level_maximum_geometric_error(&self, level: u32) -> f64 {
        self.level_zero_error / 2f64.powi(level as i32)
    }
}

/// Level-zero geometric error of a heightmap with `width` samples per tile.
pub fn estimated_level_zero_error(radius: f64, width: u32, tiles_at_level_zero: u32) -> f64 {
    radius * 2.0 * PI * 0.25 / (width as f64 * tiles_at_level_zero as f64)
}

// =============================================================================
// Overlays
// =============================================================================

/// Part of a terrain tile's texture space covered by one imagery tile.
///
/// Coordinates are in `[0, 1]`, with `v` growing northward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureRectangle {
    pub min_u: f64,
    pub min_v: f64,
    pub max_u: f64,
    pub max_v: f64,
}

/// Maps terrain texture coordinates into an imagery tile's texture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureTransform {
    pub translation_x: f64,
    pub translation_y: f64,
    pub scale_x: f64,
    pub scale_y: f64,
}

/// Imagery attached to a terrain tile.
///
/// `loading` is the imagery tile the overlay wants; until it is ready,
/// `ready` holds the nearest ready ancestor (if any) to draw instead.
#[derive(Debug, PartialEq)]
pub struct TileOverlay {
    pub(crate) loading: Option<ImageryHandle>,
    pub(crate) ready: Option<ImageryHandle>,
    pub(crate) texture_rectangle: TextureRectangle,
    pub(crate) mercator_native: bool,
    pub(crate) transform: Option<TextureTransform>,
}

impl TileOverlay {
    pub(crate) fn new(imagery: ImageryHandle, texture_rectangle: TextureRectangle, mercator_native: bool) -> Self {
        Self {
            loading: Some(imagery),
            ready: None,
            texture_rectangle,
            mercator_native,
            transform: None,
        }
    }

    pub fn loading_imagery(&self) -> Option<ImageryHandle> {
        self.loading
    }

    pub fn ready_imagery(&self) -> Option<ImageryHandle> {
        self.ready
    }

    pub fn texture_rectangle(&self) -> &TextureRectangle {
        &self.texture_rectangle
    }

    /// Whether texture coordinates are computed in Web Mercator space.
    pub fn is_mercator_native(&self) -> bool {
        self.mercator_native
    }

    /// Transform into the ready imagery's texture.
    pub fn transform(&self) -> Option<&TextureTransform> {
        self.transform.as_ref()
    }

    /// The imagery this overlay holds references on.
    pub fn into_handles(self) -> impl Iterator<Item = ImageryHandle> {
        self.loading.into_iter().chain(self.ready)
    }
}

/// Computes overlays for terrain tiles.
pub struct TileOverlayMapper {
    error_model: Arc<dyn GeometricErrorModel>,
}

impl TileOverlayMapper {
    pub fn new(error_model: Arc<dyn GeometricErrorModel>) -> Self {
        Self { error_model }
    }

    /// Creates the overlays of `layer` for the terrain tile `key` covering
    /// `tile_rectangle`.
    ///
    /// Each overlay takes a reference on its imagery. Returns no overlays when
    /// the layer does not apply to the tile.
    pub fn create_overlays(
        &self,
        layer: &mut ImageryLayer,
        key: TileKey,
        tile_rectangle: &Rectangle,
    ) -> Vec<TileOverlay> {
        if !layer.covers_terrain_level(key.level) {
            return Vec::new();
        }

        let provider = Arc::clone(layer.provider());
        let scheme = Arc::clone(provider.tiling_scheme());
        let is_base_layer = layer.is_base_layer();

        let use_web_mercator = scheme.projection() == Projection::WebMercator
            && tile_rectangle.north < MAXIMUM_LATITUDE
            && tile_rectangle.south > -MAXIMUM_LATITUDE;

        let Some(mut imagery_bounds) = provider.rectangle().intersection(layer.rectangle()) else {
            return Vec::new();
        };

        let rectangle = match tile_rectangle.intersection(&imagery_bounds) {
            Some(rectangle) => rectangle,
            None if is_base_layer => clamp_to_bounds(tile_rectangle, &imagery_bounds),
            None => return Vec::new(),
        };

        let latitude_closest_to_equator = if rectangle.south > 0.0 {
            rectangle.south
        } else if rectangle.north < 0.0 {
            rectangle.north
        } else {
            0.0
        };

        let target_error = self.error_model.level_maximum_geometric_error(key.level);
        let level = imagery_level(provider.as_ref(), target_error, latitude_closest_to_equator);

        let (Some(mut northwest), Some(mut southeast)) = (
            scheme.position_to_tile_xy(rectangle.northwest(), level),
            scheme.position_to_tile_xy(rectangle.southeast(), level),
        ) else {
            debug!(tile = %key, level, "Imagery rectangle outside tiling scheme");
            return Vec::new();
        };

        // Drop edge rows and columns that would only add a sliver
        let mut very_close_x = tile_rectangle.width() * SLIVER_FRACTION;
        let mut very_close_y = tile_rectangle.height() * SLIVER_FRACTION;

        let northwest_rectangle = scheme.tile_xy_to_rectangle(northwest.x, northwest.y, level);
        if (northwest_rectangle.south - tile_rectangle.north).abs() < very_close_y
            && northwest.y < southeast.y
        {
            northwest.y += 1;
        }
        if (northwest_rectangle.east - tile_rectangle.west).abs() < very_close_x
            && northwest.x < southeast.x
        {
            northwest.x += 1;
        }

        let southeast_rectangle = scheme.tile_xy_to_rectangle(southeast.x, southeast.y, level);
        if (southeast_rectangle.north - tile_rectangle.south).abs() < very_close_y
            && southeast.y > northwest.y
        {
            southeast.y -= 1;
        }
        if (southeast_rectangle.west - tile_rectangle.east).abs() < very_close_x
            && southeast.x > northwest.x
        {
            southeast.x -= 1;
        }

        // Texture coordinates are computed in the imagery scheme's space
        let mut terrain = *tile_rectangle;
        let first = scheme.tile_xy_to_rectangle(northwest.x, northwest.y, level);
        let mut clipped = first.intersection(&imagery_bounds).unwrap_or(first);

        if use_web_mercator {
            terrain = scheme.rectangle_to_native_rectangle(&terrain);
            clipped = scheme.rectangle_to_native_rectangle(&clipped);
            imagery_bounds = scheme.rectangle_to_native_rectangle(&imagery_bounds);
            very_close_x = terrain.width() * SLIVER_FRACTION;
            very_close_y = terrain.height() * SLIVER_FRACTION;
        }

        let tile_rectangle_at = |x: u32, y: u32| {
            if use_web_mercator {
                scheme.tile_xy_to_native_rectangle(x, y, level)
            } else {
                scheme.tile_xy_to_rectangle(x, y, level)
            }
        };

        let mut max_u = 0.0;
        let mut min_v = 1.0;

        // The first imagery column or row may start inside the terrain tile
        if !is_base_layer && (clipped.west - terrain.west).abs() >= very_close_x {
            max_u = ((clipped.west - terrain.west) / terrain.width()).min(1.0);
        }
        if !is_base_layer && (clipped.north - terrain.north).abs() >= very_close_y {
            min_v = ((clipped.north - terrain.south) / terrain.height()).max(0.0);
        }
        let initial_min_v = min_v;

        let mut overlays = Vec::new();
        for x in northwest.x..=southeast.x {
            let min_u = max_u;

            let column = tile_rectangle_at(x, northwest.y).simple_intersection(&imagery_bounds);
            let Some(column) = column else {
                continue;
            };
            max_u = ((column.east - terrain.west) / terrain.width()).min(1.0);
            if x == southeast.x && (is_base_layer || (column.east - terrain.east).abs() < very_close_x) {
                max_u = 1.0;
            }

            min_v = initial_min_v;
            for y in northwest.y..=southeast.y {
                let max_v = min_v;

                let cell = tile_rectangle_at(x, y).simple_intersection(&imagery_bounds);
                let Some(cell) = cell else {
                    continue;
                };
                min_v = ((cell.south - terrain.south) / terrain.height()).max(0.0);
                if y == southeast.y && (is_base_layer || (cell.south - terrain.south).abs() < very_close_y) {
                    min_v = 0.0;
                }

                let imagery = layer.imagery_from_cache(TileKey::new(x, y, level));
                overlays.push(TileOverlay::new(
                    imagery,
                    TextureRectangle {
                        min_u,
                        min_v,
                        max_u,
                        max_v,
                    },
                    use_web_mercator,
                ));
            }
        }

        debug!(
            tile = %key,
            imagery_level = level,
            overlays = overlays.len(),
            "Overlays created"
        );
        overlays
    }

    /// Releases the imagery references held by `overlays`.
    pub fn release_overlays(layer: &mut ImageryLayer, overlays: impl IntoIterator<Item = TileOverlay>) {
        let cache = layer.cache_mut();
        for handle in overlays.into_iter().flat_map(TileOverlay::into_handles) {
            cache.release(handle);
        }
    }
}

impl fmt::Debug for TileOverlayMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileOverlayMapper").finish_non_exhaustive()
    }
}

/// Imagery level whose texel spacing best matches `target_error`, clamped
/// to the provider's levels.
pub fn imagery_level(provider: &dyn ImageryProvider, target_error: f64, latitude: f64) -> u32 {
    let scheme = provider.tiling_scheme();
    let latitude_factor = match scheme.projection() {
        Projection::Geographic => 1.0,
        Projection::WebMercator => latitude.cos(),
    };

    let level_zero_spacing = scheme.ellipsoid_maximum_radius() * scheme.rectangle().width() * latitude_factor
        / (provider.tile_width() as f64 * scheme.number_of_x_tiles_at_level(0) as f64);

    let level = (level_zero_spacing / target_error).log2().round();
    let level = if level.is_nan() || level <= 0.0 { 0 } else { level as u32 };

    level.min(provider.maximum_level()).max(provider.minimum_level())
}

/// Texture transform for drawing `imagery_rectangle` on `terrain_rectangle`.
///
/// With `mercator_native` set, both rectangles are compared in the imagery
/// scheme's native (Web Mercator) coordinates.
pub fn texture_translation_and_scale(
    scheme: &dyn TilingScheme,
    terrain_rectangle: &Rectangle,
    imagery_rectangle: &Rectangle,
    mercator_native: bool,
) -> TextureTransform {
    let (terrain, imagery) = if mercator_native {
        (
            scheme.rectangle_to_native_rectangle(terrain_rectangle),
            scheme.rectangle_to_native_rectangle(imagery_rectangle),
        )
    } else {
        (*terrain_rectangle, *imagery_rectangle)
    };

    let terrain_width = terrain.width();
    let terrain_height = terrain.height();
    let scale_x = terrain_width / imagery.width();
    let scale_y = terrain_height / imagery.height();

    TextureTransform {
        translation_x: scale_x * (terrain.west - imagery.west) / terrain_width,
        translation_y: scale_y * (terrain.south - imagery.south) / terrain_height,
        scale_x,
        scale_y,
    }
}

/// Collapses the tile rectangle onto the nearest edges of `bounds`.
fn clamp_to_bounds(tile: &Rectangle, bounds: &Rectangle) -> Rectangle {
    let (south, north) = if tile.south >= bounds.north {
        (bounds.north, bounds.north)
    } else if tile.north <= bounds.south {
        (bounds.south, bounds.south)
    } else {
        (tile.south.max(bounds.south), tile.north.min(bounds.north))
    };

    let (west, east) = if tile.west >= bounds.east {
        (bounds.east, bounds.east)
    } else if tile.east <= bounds.west {
        (bounds.west, bounds.west)
    } else {
        (tile.west.max(bounds.west), tile.east.min(bounds.east))
    };

    Rectangle::new(west, south, east, north)
}
