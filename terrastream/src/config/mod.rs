//! Configuration for the streaming core.
//!
//! Each concern gets its own struct with documented defaults:
//!
//! - [`SchedulerConfig`]: request admission limits
//! - [`TileCacheConfig`]: how many terrain tiles stay resident
//! - [`ImageryConfig`]: imagery source and error retry budget
//! - [`LoggingConfig`]: log filter and optional log file
//!
//! [`StreamingConfig`] groups them and can be loaded from an INI file
//! (`~/.terrastream/config.ini` by default).
//!
//! # Example
//!
//! ```
//! use terrastream::config::{SchedulerConfig, StreamingConfig};
//!
//! let scheduler = SchedulerConfig::default()
//!     .with_maximum_requests(32)
//!     .with_server_limit("tile.openstreetmap.org:443", 2);
//!
//! let config = StreamingConfig::default().with_scheduler(scheduler);
//! assert_eq!(config.scheduler.maximum_requests, 32);
//! ```

mod file;
mod parser;
mod writer;

pub use file::{config_directory, config_file_path, ConfigFileError};

pub use crate::logging::LoggingConfig;

use std::collections::HashMap;

use serde::Serialize;

// =============================================================================
// Defaults
// =============================================================================

/// Default global cap on in-flight requests.
pub const DEFAULT_MAXIMUM_REQUESTS: usize = 50;

/// Default cap on in-flight requests per server.
pub const DEFAULT_MAXIMUM_REQUESTS_PER_SERVER: usize = 6;

/// Default capacity of the request priority heap.
pub const DEFAULT_PRIORITY_HEAP_LENGTH: usize = 20;

/// Default number of terrain tiles kept resident.
pub const DEFAULT_TILE_CACHE_SIZE: usize = 100;

/// Default number of times a failed imagery tile is retried.
pub const DEFAULT_IMAGERY_RETRY_LIMIT: u32 = 3;

/// Default imagery URL template.
pub const DEFAULT_URL_TEMPLATE: &str = "https://tile.openstreetmap.org/{z}/{x}/{y}.png";

/// Default deepest imagery level.
pub const DEFAULT_IMAGERY_MAXIMUM_LEVEL: u32 = 19;

// =============================================================================
// Sections
// =============================================================================

/// Request admission limits.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerConfig {
    pub maximum_requests: usize,
    pub maximum_requests_per_server: usize,
    /// Per-server overrides keyed by `host:port`.
    pub requests_by_server: HashMap<String, usize>,
    pub priority_heap_length: usize,
    /// When false, every request starts immediately.
    pub throttle_requests: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            maximum_requests: DEFAULT_MAXIMUM_REQUESTS,
            maximum_requests_per_server: DEFAULT_MAXIMUM_REQUESTS_PER_SERVER,
            requests_by_server: HashMap::new(),
            priority_heap_length: DEFAULT_PRIORITY_HEAP_LENGTH,
            throttle_requests: true,
        }
    }
}

impl SchedulerConfig {
    pub fn with_maximum_requests(mut self, maximum_requests: usize) -> Self {
        self.maximum_requests = maximum_requests;
        self
    }

    pub fn with_maximum_requests_per_server(mut self, maximum: usize) -> Self {
        self.maximum_requests_per_server = maximum;
        self
    }

    pub fn with_server_limit(mut self, server_key: impl Into<String>, limit: usize) -> Self {
        self.requests_by_server.insert(server_key.into(), limit);
        self
    }

    pub fn with_priority_heap_length(mut self, length: usize) -> Self {
        self.priority_heap_length = length;
        self
    }

    pub fn with_throttle_requests(mut self, throttle: bool) -> Self {
        self.throttle_requests = throttle;
        self
    }
}

/// Terrain tile residency.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileCacheConfig {
    /// Tiles kept after trimming, not counting tiles used this frame.
    pub tile_cache_size: usize,
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            tile_cache_size: DEFAULT_TILE_CACHE_SIZE,
        }
    }
}

/// Imagery source and error handling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageryConfig {
    /// URL template with `{x}`, `{y}`, `{z}`, `{reverseY}` and `{s}` placeholders.
    pub url_template: String,
    /// Values substituted for `{s}`.
    pub subdomains: Vec<String>,
    pub minimum_level: u32,
    pub maximum_level: u32,
    /// How many times the error reporter retries a failing tile.
    pub retry_limit: u32,
}

impl Default for ImageryConfig {
    fn default() -> Self {
        Self {
            url_template: DEFAULT_URL_TEMPLATE.to_string(),
            subdomains: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            minimum_level: 0,
            maximum_level: DEFAULT_IMAGERY_MAXIMUM_LEVEL,
            retry_limit: DEFAULT_IMAGERY_RETRY_LIMIT,
        }
    }
}

impl ImageryConfig {
    pub fn with_url_template(mut self, url_template: impl Into<String>) -> Self {
        self.url_template = url_template.into();
        self
    }

    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }
}

/// All configuration for a streaming session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamingConfig {
    pub scheduler: SchedulerConfig,
    pub tiles: TileCacheConfig,
    pub imagery: ImageryConfig,
    pub logging: LoggingConfig,
}

impl StreamingConfig {
    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_tiles(mut self, tiles: TileCacheConfig) -> Self {
        self.tiles = tiles;
        self
    }

    pub fn with_imagery(mut self, imagery: ImageryConfig) -> Self {
        self.imagery = imagery;
        self
    }

    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StreamingConfig::default();
        assert_eq!(config.scheduler.maximum_requests, 50);
        assert_eq!(config.scheduler.maximum_requests_per_server, 6);
        assert_eq!(config.scheduler.priority_heap_length, 20);
        assert!(config.scheduler.throttle_requests);
        assert!(config.scheduler.requests_by_server.is_empty());
        assert_eq!(config.tiles.tile_cache_size, 100);
        assert_eq!(config.imagery.retry_limit, 3);
    }

    #[test]
    fn test_builders() {
        let scheduler = SchedulerConfig::default()
            .with_maximum_requests(8)
            .with_maximum_requests_per_server(2)
            .with_priority_heap_length(4)
            .with_throttle_requests(false)
            .with_server_limit("example.com:443", 1);

        assert_eq!(scheduler.maximum_requests, 8);
        assert_eq!(scheduler.maximum_requests_per_server, 2);
        assert_eq!(scheduler.priority_heap_length, 4);
        assert!(!scheduler.throttle_requests);
        assert_eq!(scheduler.requests_by_server.get("example.com:443"), Some(&1));
    }
}
