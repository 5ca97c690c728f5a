//! CLI error type.

use std::fmt;

use terrastream::config::ConfigFileError;
use terrastream::imagery::ImageryError;
use terrastream::request::SchedulerError;
use terrastream::transport::TransportError;

/// Errors surfaced to the user by CLI commands.
#[derive(Debug)]
pub enum CliError {
    /// Configuration could not be loaded, validated or written.
    Config(String),
    /// Logging could not be initialized.
    Logging(String),
    /// The imagery source is unusable.
    Imagery(ImageryError),
    /// The session could not be set up or run.
    Session(String),
    /// Output could not be produced.
    Output(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Logging(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Imagery(e) => write!(f, "Imagery error: {}", e),
            CliError::Session(msg) => write!(f, "Streaming session failed: {}", msg),
            CliError::Output(msg) => write!(f, "Failed to write output: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Imagery(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<ImageryError> for CliError {
    fn from(e: ImageryError) -> Self {
        CliError::Imagery(e)
    }
}

impl From<SchedulerError> for CliError {
    fn from(e: SchedulerError) -> Self {
        CliError::Session(e.to_string())
    }
}

impl From<TransportError> for CliError {
    fn from(e: TransportError) -> Self {
        CliError::Session(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let error = CliError::Config("bad value".to_string());
        assert_eq!(error.to_string(), "Configuration error: bad value");

        let error: CliError = TransportError::network("no route").into();
        assert_eq!(error.to_string(), "Streaming session failed: no route");
    }

    #[test]
    fn test_config_file_error_converts() {
        let error: CliError = ConfigFileError::WriteError("disk full".to_string()).into();
        assert!(matches!(error, CliError::Config(ref msg) if msg.contains("disk full")));
    }
}
