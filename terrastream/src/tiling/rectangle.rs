//! Geodetic rectangles and positions.
//!
//! All angles are radians. A rectangle whose `east` is less than its `west`
//! crosses the antimeridian. Native rectangles (see
//! [`TilingScheme::rectangle_to_native_rectangle`](super::TilingScheme::rectangle_to_native_rectangle))
//! reuse the same type with projected units.

use std::f64::consts::{FRAC_PI_2, PI};

/// Two times pi.
pub const TWO_PI: f64 = 2.0 * PI;

/// Tolerance used when comparing longitudes against rectangle edges.
pub const EPSILON14: f64 = 1e-14;

/// A geodetic position (longitude, latitude) in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Cartographic {
    pub longitude: f64,
    pub latitude: f64,
}

impl Cartographic {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }

    /// Create a position from degrees.
    pub fn from_degrees(longitude: f64, latitude: f64) -> Self {
        Self::new(longitude.to_radians(), latitude.to_radians())
    }
}

/// A rectangle bounded by west/south/east/north edges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rectangle {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Rectangle {
    /// The largest possible geodetic rectangle.
    pub const MAX_VALUE: Rectangle = Rectangle {
        west: -PI,
        south: -FRAC_PI_2,
        east: PI,
        north: FRAC_PI_2,
    };

    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Create a rectangle from edges in degrees.
    pub fn from_degrees(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self::new(
            west.to_radians(),
            south.to_radians(),
            east.to_radians(),
            north.to_radians(),
        )
    }

    /// East-west extent, accounting for antimeridian crossing.
    pub fn width(&self) -> f64 {
        if self.east < self.west {
            self.east + TWO_PI - self.west
        } else {
            self.east - self.west
        }
    }

    /// North-south extent.
    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    pub fn northwest(&self) -> Cartographic {
        Cartographic::new(self.west, self.north)
    }

    pub fn southeast(&self) -> Cartographic {
        Cartographic::new(self.east, self.south)
    }

    /// Returns true if the position lies inside or on the edge of the rectangle.
    pub fn contains(&self, position: Cartographic) -> bool {
        let mut longitude = position.longitude;
        let latitude = position.latitude;
        let west = self.west;
        let mut east = self.east;

        if east < west {
            east += TWO_PI;
            if longitude < 0.0 {
                longitude += TWO_PI;
            }
        }

        (longitude > west || (longitude - west).abs() <= EPSILON14)
            && (longitude < east || (longitude - east).abs() <= EPSILON14)
            && latitude >= self.south
            && latitude <= self.north
    }

    /// Intersection that understands antimeridian-crossing rectangles.
    ///
    /// Returns `None` when the rectangles do not overlap.
    pub fn intersection(&self, other: &Rectangle) -> Option<Rectangle> {
        let mut rectangle_east = self.east;
        let mut rectangle_west = self.west;
        let mut other_east = other.east;
        let mut other_west = other.west;

        if rectangle_east < rectangle_west && other_east > 0.0 {
            rectangle_east += TWO_PI;
        } else if other_east < other_west && rectangle_east > 0.0 {
            other_east += TWO_PI;
        }

        if rectangle_east < rectangle_west && other_west < 0.0 {
            other_west += TWO_PI;
        } else if other_east < other_west && rectangle_west < 0.0 {
            rectangle_west += TWO_PI;
        }

        let west = negative_pi_to_pi(rectangle_west.max(other_west));
        let east = negative_pi_to_pi(rectangle_east.min(other_east));

        if (self.west < self.east || other.west < other.east) && east <= west {
            return None;
        }

        let south = self.south.max(other.south);
        let north = self.north.min(other.north);

        if south >= north {
            return None;
        }

        Some(Rectangle::new(west, south, east, north))
    }

    /// Plain min/max intersection with no antimeridian handling.
    ///
    /// Used for projected (native) rectangles and tiles that never wrap.
    pub fn simple_intersection(&self, other: &Rectangle) -> Option<Rectangle> {
        let west = self.west.max(other.west);
        let south = self.south.max(other.south);
        let east = self.east.min(other.east);
        let north = self.north.min(other.north);

        if west >= east || south >= north {
            return None;
        }

        Some(Rectangle::new(west, south, east, north))
    }
}

/// Normalize an angle into `[-pi, pi]`.
pub fn negative_pi_to_pi(angle: f64) -> f64 {
    if (-PI..=PI).contains(&angle) {
        return angle;
    }
    zero_to_two_pi(angle + PI) - PI
}

/// Normalize an angle into `[0, 2pi]`.
pub fn zero_to_two_pi(angle: f64) -> f64 {
    if (0.0..=TWO_PI).contains(&angle) {
        return angle;
    }
    let modulo = angle.rem_euclid(TWO_PI);
    if modulo.abs() < EPSILON14 && angle.abs() > EPSILON14 {
        return TWO_PI;
    }
    modulo
}
