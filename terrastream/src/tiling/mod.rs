//! Tiling schemes.
//!
//! A tiling scheme maps `(x, y, level)` tile indices onto geodetic rectangles
//! and back. Tile `(0, 0)` sits at the scheme's northwest corner; `x` grows
//! eastward, `y` grows southward, and every level doubles the tile count in
//! both directions.
//!
//! Two schemes are provided:
//!
//! - [`GeographicTilingScheme`]: equirectangular, two root tiles by default
//! - [`WebMercatorTilingScheme`]: the common slippy-map pyramid, one root tile

mod geographic;
mod rectangle;
mod web_mercator;

pub use geographic::GeographicTilingScheme;
pub use rectangle::{negative_pi_to_pi, zero_to_two_pi, Cartographic, Rectangle, EPSILON14, TWO_PI};
pub use web_mercator::{
    geodetic_latitude_to_mercator_angle, mercator_angle_to_geodetic_latitude,
    WebMercatorTilingScheme, MAXIMUM_LATITUDE,
};

use std::fmt;

/// Semi-major axis of the WGS84 ellipsoid in meters.
pub const WGS84_MAXIMUM_RADIUS: f64 = 6_378_137.0;

/// Deepest level whose tile counts fit in a `u32` for a two-tile root.
pub const MAXIMUM_LEVEL: u32 = 30;

/// `level_zero << level`, saturating at `u32::MAX` instead of overflowing.
pub(crate) fn tiles_at_level(level_zero: u32, level: u32) -> u32 {
    1u32.checked_shl(level)
        .map_or(u32::MAX, |scale| level_zero.saturating_mul(scale))
}

/// Projection used by a tiling scheme's native coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// Native units are degrees of longitude/latitude.
    Geographic,
    /// Native units are Web Mercator meters.
    WebMercator,
}

/// Index of a tile within one level of a tiling scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileXY {
    pub x: u32,
    pub y: u32,
}

impl TileXY {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for TileXY {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Mapping between tile indices and geodetic rectangles.
pub trait TilingScheme: Send + Sync + fmt::Debug {
    /// Geodetic extent covered by the scheme.
    fn rectangle(&self) -> Rectangle;

    /// Projection of the scheme's native coordinates.
    fn projection(&self) -> Projection;

    /// Largest radius of the ellipsoid the scheme is defined on.
    fn ellipsoid_maximum_radius(&self) -> f64 {
        WGS84_MAXIMUM_RADIUS
    }

    fn number_of_x_tiles_at_level(&self, level: u32) -> u32;

    fn number_of_y_tiles_at_level(&self, level: u32) -> u32;

    /// Convert a geodetic rectangle to native (projected) units.
    fn rectangle_to_native_rectangle(&self, rectangle: &Rectangle) -> Rectangle;

    /// Native (projected) rectangle of a tile.
    fn tile_xy_to_native_rectangle(&self, x: u32, y: u32, level: u32) -> Rectangle;

    /// Geodetic rectangle of a tile.
    fn tile_xy_to_rectangle(&self, x: u32, y: u32, level: u32) -> Rectangle;

    /// Tile containing the given position, or `None` if the position lies
    /// outside the scheme's rectangle.
    fn position_to_tile_xy(&self, position: Cartographic, level: u32) -> Option<TileXY>;
}
