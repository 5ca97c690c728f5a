//! Imagery providers.
//!
//! A provider describes where imagery comes from: its tiling scheme, the
//! levels and extent it covers, and the URL of each tile.

use std::fmt;
use std::sync::Arc;

use regex::{Captures, Regex};

use super::discard::TileDiscardPolicy;
use super::error::ImageryError;
use crate::config::{ImageryConfig, DEFAULT_IMAGERY_MAXIMUM_LEVEL};
use crate::quadtree::TileKey;
use crate::tiling::{Rectangle, TilingScheme, WebMercatorTilingScheme, MAXIMUM_LEVEL};

/// Default tile edge length in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Source of imagery tiles.
pub trait ImageryProvider: Send + Sync + fmt::Debug {
    fn tiling_scheme(&self) -> &Arc<dyn TilingScheme>;

    /// Extent covered by the provider. Defaults to the tiling scheme's extent.
    fn rectangle(&self) -> Rectangle {
        self.tiling_scheme().rectangle()
    }

    fn minimum_level(&self) -> u32 {
        0
    }

    fn maximum_level(&self) -> u32;

    fn tile_width(&self) -> u32 {
        DEFAULT_TILE_SIZE
    }

    fn tile_height(&self) -> u32 {
        DEFAULT_TILE_SIZE
    }

    fn tile_url(&self, key: TileKey) -> String;

    fn tile_discard_policy(&self) -> Option<&dyn TileDiscardPolicy> {
        None
    }
}

const PLACEHOLDER_PATTERN: &str = r"\{(x|y|z|s|reverseX|reverseY|reverseZ)\}";

/// Provider that builds tile URLs from a template.
///
/// Supported placeholders:
///
/// | Placeholder  | Value                                         |
/// |--------------|-----------------------------------------------|
/// | `{x}`, `{y}` | tile column and row, counted from the NW      |
/// | `{z}`        | level                                         |
/// | `{s}`        | one of the subdomains, chosen per tile        |
/// | `{reverseX}` | column counted from the east                  |
/// | `{reverseY}` | row counted from the south (TMS)              |
/// | `{reverseZ}` | `maximum_level - level`                       |
pub struct UrlTemplateProvider {
    template: String,
    pattern: Regex,
    subdomains: Vec<String>,
    tiling_scheme: Arc<dyn TilingScheme>,
    rectangle: Option<Rectangle>,
    minimum_level: u32,
    maximum_level: u32,
    tile_width: u32,
    tile_height: u32,
    discard_policy: Option<Box<dyn TileDiscardPolicy>>,
}

impl UrlTemplateProvider {
    /// Create a Web Mercator provider for `template`.
    ///
    /// # Errors
    ///
    /// Returns [`ImageryError::InvalidTemplate`] if the template lacks the
    /// `{x}` or `{y}` placeholder.
    pub fn new(template: impl Into<String>) -> Result<Self, ImageryError> {
        let template = template.into();
        for required in ["{x}", "{y}"] {
            if !template.contains(required) {
                return Err(ImageryError::InvalidTemplate {
                    reason: format!("missing {} placeholder", required),
                    template,
                });
            }
        }

        Ok(Self {
            template,
            pattern: Regex::new(PLACEHOLDER_PATTERN)?,
            subdomains: Vec::new(),
            tiling_scheme: Arc::new(WebMercatorTilingScheme::default()),
            rectangle: None,
            minimum_level: 0,
            maximum_level: DEFAULT_IMAGERY_MAXIMUM_LEVEL,
            tile_width: DEFAULT_TILE_SIZE,
            tile_height: DEFAULT_TILE_SIZE,
            discard_policy: None,
        })
    }

    /// Create a provider from the `[imagery]` configuration section.
    pub fn from_config(config: &ImageryConfig) -> Result<Self, ImageryError> {
        Ok(Self::new(config.url_template.clone())?
            .with_subdomains(config.subdomains.clone())
            .with_levels(config.minimum_level, config.maximum_level))
    }

    pub fn with_subdomains(mut self, subdomains: Vec<String>) -> Self {
        self.subdomains = subdomains;
        self
    }

    pub fn with_tiling_scheme(mut self, tiling_scheme: Arc<dyn TilingScheme>) -> Self {
        self.tiling_scheme = tiling_scheme;
        self
    }

    /// Restrict the provider to part of its tiling scheme.
    pub fn with_rectangle(mut self, rectangle: Rectangle) -> Self {
        self.rectangle = Some(rectangle);
        self
    }

    /// Levels are clamped to [`MAXIMUM_LEVEL`]; `maximum_level` never falls
    /// below `minimum_level`.
    pub fn with_levels(mut self, minimum_level: u32, maximum_level: u32) -> Self {
        self.minimum_level = minimum_level.min(MAXIMUM_LEVEL);
        self.maximum_level = maximum_level.clamp(self.minimum_level, MAXIMUM_LEVEL);
        self
    }

    pub fn with_tile_size(mut self, width: u32, height: u32) -> Self {
        self.tile_width = width;
        self.tile_height = height;
        self
    }

    pub fn with_discard_policy(mut self, policy: Box<dyn TileDiscardPolicy>) -> Self {
        self.discard_policy = Some(policy);
        self
    }

    pub fn template(&self) -> &str {
        &self.template
    }
}

impl ImageryProvider for UrlTemplateProvider {
    fn tiling_scheme(&self) -> &Arc<dyn TilingScheme> {
        &self.tiling_scheme
    }

    fn rectangle(&self) -> Rectangle {
        self.rectangle.unwrap_or_else(|| self.tiling_scheme.rectangle())
    }

    fn minimum_level(&self) -> u32 {
        self.minimum_level
    }

    fn maximum_level(&self) -> u32 {
        self.maximum_level
    }

    fn tile_width(&self) -> u32 {
        self.tile_width
    }

    fn tile_height(&self) -> u32 {
        self.tile_height
    }

    fn tile_url(&self, key: TileKey) -> String {
        let TileKey { x, y, level } = key;
        self.pattern
            .replace_all(&self.template, |caps: &Captures| match &caps[1] {
                "x" => x.to_string(),
                "y" => y.to_string(),
                "z" => level.to_string(),
                "s" => {
                    if self.subdomains.is_empty() {
                        String::new()
                    } else {
                        let index = (x as usize + y as usize + level as usize) % self.subdomains.len();
                        self.subdomains[index].clone()
                    }
                }
                "reverseX" => {
                    let columns = self.tiling_scheme.number_of_x_tiles_at_level(level);
                    columns.saturating_sub(x + 1).to_string()
                }
                "reverseY" => {
                    let rows = self.tiling_scheme.number_of_y_tiles_at_level(level);
                    rows.saturating_sub(y + 1).to_string()
                }
                "reverseZ" => self.maximum_level.saturating_sub(level).to_string(),
                other => other.to_string(),
            })
            .into_owned()
    }

    fn tile_discard_policy(&self) -> Option<&dyn TileDiscardPolicy> {
        self.discard_policy.as_deref()
    }
}

impl fmt::Debug for UrlTemplateProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlTemplateProvider")
            .field("template", &self.template)
            .field("subdomains", &self.subdomains)
            .field("tiling_scheme", &self.tiling_scheme)
            .field("minimum_level", &self.minimum_level)
            .field("maximum_level", &self.maximum_level)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imagery::NeverDiscard;
    use crate::tiling::GeographicTilingScheme;

    #[test]
    fn test_substitutes_placeholders() {
        let provider = UrlTemplateProvider::new("https://tiles.example.com/{z}/{x}/{y}.png").unwrap();
        assert_eq!(
            provider.tile_url(TileKey::new(5, 9, 4)),
            "https://tiles.example.com/4/5/9.png"
        );
    }

    #[test]
    fn test_reverse_placeholders() {
        let provider = UrlTemplateProvider::new("{reverseX}/{x}/{reverseY}/{y}/{reverseZ}")
            .unwrap()
            .with_levels(0, 10);
        // Level 2 of a single-root scheme has 4x4 tiles
        assert_eq!(provider.tile_url(TileKey::new(1, 0, 2)), "2/1/3/0/8");
    }

    #[test]
    fn test_subdomains_rotate() {
        let provider = UrlTemplateProvider::new("https://{s}.tile.example.com/{z}/{x}/{y}.png")
            .unwrap()
            .with_subdomains(vec!["a".into(), "b".into(), "c".into()]);

        assert!(provider.tile_url(TileKey::new(0, 0, 0)).starts_with("https://a."));
        assert!(provider.tile_url(TileKey::new(1, 0, 0)).starts_with("https://b."));
        assert!(provider.tile_url(TileKey::new(1, 1, 0)).starts_with("https://c."));
        assert!(provider.tile_url(TileKey::new(1, 1, 1)).starts_with("https://a."));
    }

    #[test]
    fn test_rejects_template_without_coordinates() {
        let err = UrlTemplateProvider::new("https://tiles.example.com/{z}.png").unwrap_err();
        assert!(matches!(err, ImageryError::InvalidTemplate { .. }));
        assert!(err.to_string().contains("{x}"));
    }

    #[test]
    fn test_from_config() {
        let config = ImageryConfig::default();
        let provider = UrlTemplateProvider::from_config(&config).unwrap();
        assert_eq!(provider.maximum_level(), config.maximum_level);
        assert_eq!(provider.template(), config.url_template);
        assert!(provider.tile_discard_policy().is_none());
    }

    #[test]
    fn test_levels_clamped() {
        let provider = UrlTemplateProvider::new("https://tiles.example.com/{z}/{x}/{y}.png")
            .unwrap()
            .with_levels(4, 40);
        assert_eq!(provider.minimum_level(), 4);
        assert_eq!(provider.maximum_level(), MAXIMUM_LEVEL);

        let provider = UrlTemplateProvider::new("https://tiles.example.com/{z}/{x}/{y}.png")
            .unwrap()
            .with_levels(12, 3);
        assert_eq!(provider.maximum_level(), 12);
    }

    #[test]
    fn test_rectangle_defaults_to_tiling_scheme() {
        let scheme: Arc<dyn TilingScheme> = Arc::new(GeographicTilingScheme::default());
        let provider = UrlTemplateProvider::new("{x}/{y}")
            .unwrap()
            .with_tiling_scheme(Arc::clone(&scheme));
        assert_eq!(provider.rectangle(), scheme.rectangle());

        let north = Rectangle::new(-1.0, 0.0, 1.0, 1.0);
        let provider = provider
            .with_rectangle(north)
            .with_discard_policy(Box::new(NeverDiscard));
        assert_eq!(provider.rectangle(), north);
        assert!(provider.tile_discard_policy().is_some());
    }
}
