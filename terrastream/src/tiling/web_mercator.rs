//! Web Mercator tiling scheme.
//!
//! Native coordinates are Web Mercator meters on a sphere with the ellipsoid's
//! maximum radius. Latitudes beyond [`MAXIMUM_LATITUDE`] are clamped before
//! projection.

use std::f64::consts::{FRAC_PI_2, PI};

use super::{
    tiles_at_level, Cartographic, Projection, Rectangle, TileXY, TilingScheme, WGS84_MAXIMUM_RADIUS,
};

/// Largest latitude (radians) representable in Web Mercator, about 85.0511°.
pub const MAXIMUM_LATITUDE: f64 = 1.484_422_229_745_332_2;

/// Convert a geodetic latitude to a Mercator angle in `[-pi, pi]`.
#[inline]
pub fn geodetic_latitude_to_mercator_angle(latitude: f64) -> f64 {
    let latitude = latitude.clamp(-MAXIMUM_LATITUDE, MAXIMUM_LATITUDE);
    let sin_latitude = latitude.sin();
    0.5 * ((1.0 + sin_latitude) / (1.0 - sin_latitude)).ln()
}

/// Convert a Mercator angle back to a geodetic latitude.
#[inline]
pub fn mercator_angle_to_geodetic_latitude(angle: f64) -> f64 {
    FRAC_PI_2 - 2.0 * (-angle).exp().atan()
}

/// Slippy-map style tiling scheme: a single root tile covering the square
/// Web Mercator world.
#[derive(Debug, Clone)]
pub struct WebMercatorTilingScheme {
    radius: f64,
    level_zero_tiles_x: u32,
    level_zero_tiles_y: u32,
}

impl Default for WebMercatorTilingScheme {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

impl WebMercatorTilingScheme {
    pub fn new(level_zero_tiles_x: u32, level_zero_tiles_y: u32) -> Self {
        Self {
            radius: WGS84_MAXIMUM_RADIUS,
            level_zero_tiles_x: level_zero_tiles_x.max(1),
            level_zero_tiles_y: level_zero_tiles_y.max(1),
        }
    }

    /// Project a geodetic position to Web Mercator meters `(x, y)`.
    pub fn project(&self, position: Cartographic) -> (f64, f64) {
        (
            position.longitude * self.radius,
            geodetic_latitude_to_mercator_angle(position.latitude) * self.radius,
        )
    }

    /// Inverse of [`project`](Self::project).
    pub fn unproject(&self, x: f64, y: f64) -> Cartographic {
        Cartographic::new(
            x / self.radius,
            mercator_angle_to_geodetic_latitude(y / self.radius),
        )
    }

    /// Native extent of the scheme: `(west, south, east, north)` in meters.
    fn native_extent(&self) -> Rectangle {
        let half = self.radius * PI;
        Rectangle::new(-half, -half, half, half)
    }
}

impl TilingScheme for WebMercatorTilingScheme {
    fn rectangle(&self) -> Rectangle {
        Rectangle::new(-PI, -MAXIMUM_LATITUDE, PI, MAXIMUM_LATITUDE)
    }

    fn projection(&self) -> Projection {
        Projection::WebMercator
    }

    fn ellipsoid_maximum_radius(&self) -> f64 {
        self.radius
    }

    fn number_of_x_tiles_at_level(&self, level: u32) -> u32 {
        tiles_at_level(self.level_zero_tiles_x, level)
    }

    fn number_of_y_tiles_at_level(&self, level: u32) -> u32 {
        tiles_at_level(self.level_zero_tiles_y, level)
    }

    fn rectangle_to_native_rectangle(&self, rectangle: &Rectangle) -> Rectangle {
        let (west, south) = self.project(Cartographic::new(rectangle.west, rectangle.south));
        let (east, north) = self.project(Cartographic::new(rectangle.east, rectangle.north));
        Rectangle::new(west, south, east, north)
    }

    fn tile_xy_to_native_rectangle(&self, x: u32, y: u32, level: u32) -> Rectangle {
        let extent = self.native_extent();
        let x_tiles = self.number_of_x_tiles_at_level(level) as f64;
        let y_tiles = self.number_of_y_tiles_at_level(level) as f64;

        let tile_width = (extent.east - extent.west) / x_tiles;
        let west = extent.west + x as f64 * tile_width;
        let east = extent.west + (x + 1) as f64 * tile_width;

        let tile_height = (extent.north - extent.south) / y_tiles;
        let north = extent.north - y as f64 * tile_height;
        let south = extent.north - (y + 1) as f64 * tile_height;

        Rectangle::new(west, south, east, north)
    }

    fn tile_xy_to_rectangle(&self, x: u32, y: u32, level: u32) -> Rectangle {
        let native = self.tile_xy_to_native_rectangle(x, y, level);
        let southwest = self.unproject(native.west, native.south);
        let northeast = self.unproject(native.east, native.north);
        Rectangle::new(
            southwest.longitude,
            southwest.latitude,
            northeast.longitude,
            northeast.latitude,
        )
    }

    fn position_to_tile_xy(&self, position: Cartographic, level: u32) -> Option<TileXY> {
        if !self.rectangle().contains(position) {
            return None;
        }

        let extent = self.native_extent();
        let x_tiles = self.number_of_x_tiles_at_level(level);
        let y_tiles = self.number_of_y_tiles_at_level(level);

        let tile_width = (extent.east - extent.west) / x_tiles as f64;
        let tile_height = (extent.north - extent.south) / y_tiles as f64;

        let (px, py) = self.project(position);
        let x = (((px - extent.west) / tile_width) as u32).min(x_tiles.saturating_sub(1));
        let y = (((extent.north - py) / tile_height) as u32).min(y_tiles.saturating_sub(1));

        Some(TileXY::new(x, y))
    }
}
