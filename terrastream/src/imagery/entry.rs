//! Cached imagery tiles.

use std::fmt;

use bytes::Bytes;
use image::RgbaImage;

use super::cache::ImageryHandle;
use super::error::TileProviderError;
use crate::quadtree::TileKey;
use crate::request::RequestHandle;
use crate::tiling::Rectangle;

/// Loading state of an imagery tile.
///
/// ```text
/// Unloaded ──► Transitioning ──► Received ──► TextureLoaded ──► Ready
///                   │                │
///                   ▼                ▼
///                 Failed          Invalid
/// ```
///
/// `Failed` and `Invalid` are terminal until a retry resets the tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageryState {
    #[default]
    Unloaded,
    /// A request is in flight.
    Transitioning,
    /// Raw bytes arrived and wait to be decoded.
    Received,
    /// Decoded into an image.
    TextureLoaded,
    Ready,
    /// The download failed.
    Failed,
    /// The content was rejected by the provider's discard policy.
    Invalid,
}

impl ImageryState {
    /// Failed or Invalid.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ImageryState::Failed | ImageryState::Invalid)
    }
}

impl fmt::Display for ImageryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImageryState::Unloaded => "unloaded",
            ImageryState::Transitioning => "transitioning",
            ImageryState::Received => "received",
            ImageryState::TextureLoaded => "texture-loaded",
            ImageryState::Ready => "ready",
            ImageryState::Failed => "failed",
            ImageryState::Invalid => "invalid",
        };
        f.write_str(name)
    }
}

/// One imagery tile, shared by every terrain tile it overlaps.
///
/// Entries live in an [`ImageryCache`](super::ImageryCache) and hold a
/// reference on their parent tile, which serves as a fallback while this one
/// loads.
#[derive(Debug)]
pub struct Imagery {
    pub(crate) key: TileKey,
    pub(crate) rectangle: Rectangle,
    pub(crate) state: ImageryState,
    pub(crate) reference_count: usize,
    pub(crate) parent: Option<ImageryHandle>,
    pub(crate) payload: Option<Bytes>,
    pub(crate) image: Option<RgbaImage>,
    pub(crate) request: Option<RequestHandle>,
    pub(crate) error: Option<TileProviderError>,
}

impl Imagery {
    pub(crate) fn new(key: TileKey, rectangle: Rectangle, parent: Option<ImageryHandle>) -> Self {
        Self {
            key,
            rectangle,
            state: ImageryState::Unloaded,
            reference_count: 0,
            parent,
            payload: None,
            image: None,
            request: None,
            error: None,
        }
    }

    pub fn key(&self) -> TileKey {
        self.key
    }

    /// Geodetic extent of the tile.
    pub fn rectangle(&self) -> &Rectangle {
        &self.rectangle
    }

    pub fn state(&self) -> ImageryState {
        self.state
    }

    pub fn reference_count(&self) -> usize {
        self.reference_count
    }

    pub fn parent(&self) -> Option<ImageryHandle> {
        self.parent
    }

    /// Raw response body, kept until the tile is decoded.
    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    pub fn image(&self) -> Option<&RgbaImage> {
        self.image.as_ref()
    }

    /// The tile's current failure record, if it has failed before.
    pub fn error(&self) -> Option<&TileProviderError> {
        self.error.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.state == ImageryState::Ready
    }

    /// Cancels any in-flight request and drops loaded data.
    pub(crate) fn free_resources(&mut self) {
        if let Some(request) = self.request.take() {
            request.cancel();
        }
        self.payload = None;
        self.image = None;
    }
}
