//! Imagery errors and tile failure reporting.

use std::fmt;

use thiserror::Error;
use tracing::warn;

use crate::config::DEFAULT_IMAGERY_RETRY_LIMIT;
use crate::event::Event;
use crate::quadtree::TileKey;

/// Errors raised while setting up imagery sources.
#[derive(Debug, Error)]
pub enum ImageryError {
    #[error("Invalid URL template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("Invalid URL template pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Failure record for one imagery tile.
///
/// The same record is updated on every failure of the tile, so listeners can
/// see how often it has been retried.
#[derive(Debug, Clone, PartialEq)]
pub struct TileProviderError {
    pub message: String,
    pub x: u32,
    pub y: u32,
    pub level: u32,
    /// Retries so far; `None` once the tile has loaded successfully.
    pub times_retried: Option<u32>,
    /// Set by a listener to ask for another attempt.
    pub retry: bool,
    /// Description of the underlying error, if any.
    pub error: Option<String>,
}

impl TileProviderError {
    /// True while the tile has an unresolved failure.
    pub fn is_failing(&self) -> bool {
        self.times_retried.is_some()
    }

    pub fn key(&self) -> TileKey {
        TileKey::new(self.x, self.y, self.level)
    }
}

impl fmt::Display for TileProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(error) = &self.error {
            write!(f, " ({})", error)?;
        }
        Ok(())
    }
}

/// Routes tile failures to listeners and decides whether to retry.
///
/// Listeners registered on [`error_event_mut`](Self::error_event_mut) see
/// every failure and may set [`TileProviderError::retry`]. Without
/// listeners, failures are logged instead and never retried.
#[derive(Debug)]
pub struct ErrorReporter {
    error_event: Event<TileProviderError>,
    retry_limit: u32,
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new(DEFAULT_IMAGERY_RETRY_LIMIT)
    }
}

impl ErrorReporter {
    pub fn new(retry_limit: u32) -> Self {
        Self {
            error_event: Event::new(),
            retry_limit,
        }
    }

    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    pub fn set_retry_limit(&mut self, retry_limit: u32) {
        self.retry_limit = retry_limit;
    }

    pub fn error_event(&self) -> &Event<TileProviderError> {
        &self.error_event
    }

    pub fn error_event_mut(&mut self) -> &mut Event<TileProviderError> {
        &mut self.error_event
    }

    /// Reports a failure of the tile at `key`.
    ///
    /// `previous` is the record from the tile's last failure, if any. The
    /// returned record should be kept with the tile and passed back on the
    /// next failure. `retry` runs when a listener sets `retry` and the tile
    /// has been retried fewer than `retry_limit` times.
    pub fn report(
        &mut self,
        previous: Option<TileProviderError>,
        message: impl Into<String>,
        key: TileKey,
        retry: Option<&mut dyn FnMut()>,
        error: Option<&dyn std::error::Error>,
    ) -> TileProviderError {
        let message = message.into();
        let error = error.map(|e| e.to_string());

        let mut record = match previous {
            Some(mut record) => {
                record.message = message;
                record.error = error;
                record.retry = false;
                record.times_retried = Some(record.times_retried.map_or(0, |n| n + 1));
                record
            }
            None => TileProviderError {
                message,
                x: key.x,
                y: key.y,
                level: key.level,
                times_retried: Some(0),
                retry: false,
                error,
            },
        };

        if self.error_event.listener_count() > 0 {
            self.error_event.raise(&mut record);
        } else {
            warn!(
                tile = %key,
                times_retried = record.times_retried.unwrap_or(0),
                error = record.error.as_deref().unwrap_or(""),
                "{}",
                record.message
            );
        }

        let times_retried = record.times_retried.unwrap_or(0);
        if record.retry && times_retried < self.retry_limit {
            if let Some(retry) = retry {
                retry();
            }
        }

        record
    }

    /// Marks a previously failing tile as loaded.
    pub fn report_success(previous: Option<&mut TileProviderError>) {
        if let Some(record) = previous {
            record.times_retried = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn key() -> TileKey {
        TileKey::new(4, 2, 3)
    }

    #[test]
    fn test_first_report_creates_record() {
        let mut reporter = ErrorReporter::new(3);
        let record = reporter.report(None, "boom", key(), None, None);

        assert_eq!(record.times_retried, Some(0));
        assert_eq!((record.x, record.y, record.level), (4, 2, 3));
        assert!(!record.retry);
        assert!(record.is_failing());
    }

    #[test]
    fn test_repeated_report_increments() {
        let mut reporter = ErrorReporter::new(3);
        let record = reporter.report(None, "first", key(), None, None);
        let record = reporter.report(Some(record), "second", key(), None, None);

        assert_eq!(record.times_retried, Some(1));
        assert_eq!(record.message, "second");
    }

    #[test]
    fn test_no_listener_never_retries() {
        let mut reporter = ErrorReporter::new(3);
        let mut retried = 0;
        let mut retry = || retried += 1;
        reporter.report(None, "boom", key(), Some(&mut retry), None);
        assert_eq!(retried, 0);
    }

    #[test]
    fn test_listener_requests_retry_until_limit() {
        let mut reporter = ErrorReporter::new(2);
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        reporter.error_event_mut().add_listener(move |record| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
            record.retry = true;
        });

        let mut retried = 0;
        let mut record = None;
        for _ in 0..5 {
            let mut retry = || retried += 1;
            record = Some(reporter.report(record, "boom", key(), Some(&mut retry), None));
        }

        assert_eq!(seen.load(Ordering::SeqCst), 5);
        assert_eq!(retried, 2);
        assert_eq!(record.and_then(|r| r.times_retried), Some(4));
    }

    #[test]
    fn test_report_success_resets() {
        let mut reporter = ErrorReporter::new(3);
        let mut record = reporter.report(None, "boom", key(), None, None);
        ErrorReporter::report_success(Some(&mut record));
        assert!(!record.is_failing());

        // Counting restarts after a success
        let record = reporter.report(Some(record), "again", key(), None, None);
        assert_eq!(record.times_retried, Some(0));
    }

    #[test]
    fn test_error_description_kept() {
        let mut reporter = ErrorReporter::new(0);
        let error = TransportError::status(404, "Not Found");
        let record = reporter.report(None, "Failed", key(), None, Some(&error));
        assert_eq!(record.error.as_deref(), Some("HTTP 404: Not Found"));
        assert_eq!(record.to_string(), "Failed (HTTP 404: Not Found)");
    }
}
