//! Equirectangular tiling scheme.

use super::{tiles_at_level, Cartographic, Projection, Rectangle, TileXY, TilingScheme, TWO_PI};

/// Tiling scheme where longitude and latitude map linearly onto tile indices.
///
/// By default the whole globe is split into two square root tiles (western
/// and eastern hemisphere).
#[derive(Debug, Clone)]
pub struct GeographicTilingScheme {
    rectangle: Rectangle,
    level_zero_tiles_x: u32,
    level_zero_tiles_y: u32,
}

impl Default for GeographicTilingScheme {
    fn default() -> Self {
        Self::new(Rectangle::MAX_VALUE, 2, 1)
    }
}

impl GeographicTilingScheme {
    /// Create a scheme over `rectangle` with the given root tile grid.
    pub fn new(rectangle: Rectangle, level_zero_tiles_x: u32, level_zero_tiles_y: u32) -> Self {
        Self {
            rectangle,
            level_zero_tiles_x: level_zero_tiles_x.max(1),
            level_zero_tiles_y: level_zero_tiles_y.max(1),
        }
    }
}

impl TilingScheme for GeographicTilingScheme {
    fn rectangle(&self) -> Rectangle {
        self.rectangle
    }

    fn projection(&self) -> Projection {
        Projection::Geographic
    }

    fn number_of_x_tiles_at_level(&self, level: u32) -> u32 {
        tiles_at_level(self.level_zero_tiles_x, level)
    }

    fn number_of_y_tiles_at_level(&self, level: u32) -> u32 {
        tiles_at_level(self.level_zero_tiles_y, level)
    }

    fn rectangle_to_native_rectangle(&self, rectangle: &Rectangle) -> Rectangle {
        Rectangle::new(
            rectangle.west.to_degrees(),
            rectangle.south.to_degrees(),
            rectangle.east.to_degrees(),
            rectangle.north.to_degrees(),
        )
    }

    fn tile_xy_to_native_rectangle(&self, x: u32, y: u32, level: u32) -> Rectangle {
        let rectangle = self.tile_xy_to_rectangle(x, y, level);
        self.rectangle_to_native_rectangle(&rectangle)
    }

    fn tile_xy_to_rectangle(&self, x: u32, y: u32, level: u32) -> Rectangle {
        let x_tiles = self.number_of_x_tiles_at_level(level) as f64;
        let y_tiles = self.number_of_y_tiles_at_level(level) as f64;

        let tile_width = self.rectangle.width() / x_tiles;
        let west = x as f64 * tile_width + self.rectangle.west;
        let east = (x + 1) as f64 * tile_width + self.rectangle.west;

        let tile_height = self.rectangle.height() / y_tiles;
        let north = self.rectangle.north - y as f64 * tile_height;
        let south = self.rectangle.north - (y + 1) as f64 * tile_height;

        Rectangle::new(west, south, east, north)
    }

    fn position_to_tile_xy(&self, position: Cartographic, level: u32) -> Option<TileXY> {
        if !self.rectangle.contains(position) {
            return None;
        }

        let x_tiles = self.number_of_x_tiles_at_level(level);
        let y_tiles = self.number_of_y_tiles_at_level(level);

        let tile_width = self.rectangle.width() / x_tiles as f64;
        let tile_height = self.rectangle.height() / y_tiles as f64;

        let mut longitude = position.longitude;
        if self.rectangle.east < self.rectangle.west {
            longitude += TWO_PI;
        }

        let x = ((longitude - self.rectangle.west) / tile_width) as u32;
        let y = ((self.rectangle.north - position.latitude) / tile_height) as u32;
        let x = x.min(x_tiles.saturating_sub(1));
        let y = y.min(y_tiles.saturating_sub(1));

        Some(TileXY::new(x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiling::MAXIMUM_LEVEL;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn test_tile_counts() {
        let scheme = GeographicTilingScheme::default();
        assert_eq!(scheme.number_of_x_tiles_at_level(0), 2);
        assert_eq!(scheme.number_of_y_tiles_at_level(0), 1);
        assert_eq!(scheme.number_of_x_tiles_at_level(3), 16);
        assert_eq!(scheme.number_of_y_tiles_at_level(3), 8);
    }

    #[test]
    fn test_tile_counts_saturate_past_maximum_level() {
        let scheme = GeographicTilingScheme::default();
        assert_eq!(scheme.number_of_x_tiles_at_level(MAXIMUM_LEVEL), 2 << MAXIMUM_LEVEL);
        assert_eq!(scheme.number_of_x_tiles_at_level(31), u32::MAX);
        assert_eq!(scheme.number_of_y_tiles_at_level(31), 1 << 31);
        assert_eq!(scheme.number_of_x_tiles_at_level(40), u32::MAX);
        assert_eq!(scheme.number_of_y_tiles_at_level(64), u32::MAX);

        let tile = scheme
            .position_to_tile_xy(Cartographic::from_degrees(179.9, -89.9), 40)
            .unwrap();
        assert!(tile.x < u32::MAX && tile.y < u32::MAX);
    }

    #[test]
    fn test_root_tile_rectangles() {
        let scheme = GeographicTilingScheme::default();
        let west = scheme.tile_xy_to_rectangle(0, 0, 0);
        assert_eq!(west, Rectangle::new(-PI, -FRAC_PI_2, 0.0, FRAC_PI_2));

        let east = scheme.tile_xy_to_rectangle(1, 0, 0);
        assert_eq!(east, Rectangle::new(0.0, -FRAC_PI_2, PI, FRAC_PI_2));
    }

    #[test]
    fn test_position_to_tile_xy() {
        let scheme = GeographicTilingScheme::default();
        let tile = scheme
            .position_to_tile_xy(Cartographic::from_degrees(-45.0, 45.0), 1)
            .unwrap();
        assert_eq!(tile, TileXY::new(1, 0));

        let tile = scheme
            .position_to_tile_xy(Cartographic::from_degrees(135.0, -45.0), 1)
            .unwrap();
        assert_eq!(tile, TileXY::new(3, 1));
    }

    #[test]
    fn test_position_on_southeast_edge_clamps() {
        let scheme = GeographicTilingScheme::default();
        let tile = scheme
            .position_to_tile_xy(Cartographic::new(PI, -FRAC_PI_2), 2)
            .unwrap();
        assert_eq!(tile, TileXY::new(7, 3));
    }

    #[test]
    fn test_position_outside_rectangle() {
        let scheme = GeographicTilingScheme::new(Rectangle::from_degrees(0.0, 0.0, 10.0, 10.0), 1, 1);
        assert!(scheme
            .position_to_tile_xy(Cartographic::from_degrees(20.0, 5.0), 0)
            .is_none());
    }

    #[test]
    fn test_native_rectangle_is_degrees() {
        let scheme = GeographicTilingScheme::default();
        let native = scheme.tile_xy_to_native_rectangle(0, 0, 0);
        assert!((native.west + 180.0).abs() < 1e-9);
        assert!((native.north - 90.0).abs() < 1e-9);
    }
}
