//! Policies for rejecting downloaded imagery.
//!
//! Some servers answer requests for tiles they do not have with a placeholder
//! image ("no imagery available") instead of an error. A discard policy spots
//! those so the tile is marked invalid and its parent is shown instead.

use std::fmt;

use image::{Rgba, RgbaImage};

use super::error::ImageryError;

/// Decides whether a decoded tile should be thrown away.
pub trait TileDiscardPolicy: Send + Sync + fmt::Debug {
    /// False while the policy is still being prepared; tiles wait meanwhile.
    fn is_ready(&self) -> bool {
        true
    }

    fn should_discard(&self, image: &RgbaImage) -> bool;
}

/// Keeps every tile.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverDiscard;

impl TileDiscardPolicy for NeverDiscard {
    fn should_discard(&self, _image: &RgbaImage) -> bool {
        false
    }
}

/// Discards tiles that match a known "missing tile" image.
///
/// Only the pixels at the configured sample positions are compared. A tile
/// whose size differs from the missing image is always kept.
#[derive(Debug, Clone)]
pub struct DiscardMissingTilePolicy {
    width: u32,
    height: u32,
    samples: Vec<((u32, u32), Rgba<u8>)>,
    disable_if_transparent: bool,
}

impl DiscardMissingTilePolicy {
    /// Build a policy from the missing-tile image and the pixel positions to
    /// compare.
    ///
    /// Positions outside the image are ignored.
    pub fn new(missing_tile: &RgbaImage, pixels_to_check: &[(u32, u32)]) -> Self {
        let samples = pixels_to_check
            .iter()
            .filter(|(x, y)| *x < missing_tile.width() && *y < missing_tile.height())
            .map(|&(x, y)| ((x, y), *missing_tile.get_pixel(x, y)))
            .collect();

        Self {
            width: missing_tile.width(),
            height: missing_tile.height(),
            samples,
            disable_if_transparent: false,
        }
    }

    /// Decode the missing-tile image from encoded bytes (PNG, JPEG, ...).
    pub fn from_encoded(bytes: &[u8], pixels_to_check: &[(u32, u32)]) -> Result<Self, ImageryError> {
        let missing_tile = image::load_from_memory(bytes)?.to_rgba8();
        Ok(Self::new(&missing_tile, pixels_to_check))
    }

    /// When set, a missing-tile image whose samples are all fully
    /// transparent disables the check entirely.
    pub fn with_disable_if_transparent(mut self, disable: bool) -> Self {
        self.disable_if_transparent = disable;
        self
    }

    fn is_disabled(&self) -> bool {
        self.samples.is_empty()
            || (self.disable_if_transparent && self.samples.iter().all(|(_, pixel)| pixel[3] == 0))
    }
}

impl TileDiscardPolicy for DiscardMissingTilePolicy {
    fn should_discard(&self, image: &RgbaImage) -> bool {
        if self.is_disabled() {
            return false;
        }
        if image.width() != self.width || image.height() != self.height {
            return false;
        }

        self.samples
            .iter()
            .all(|&((x, y), expected)| *image.get_pixel(x, y) == expected)
    }
}
