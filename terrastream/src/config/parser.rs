//! INI parsing logic for converting `Ini` → `StreamingConfig`.
//!
//! This is the single place where INI key names are mapped to struct fields.

use std::path::PathBuf;
use std::str::FromStr;

use ini::Ini;

use super::file::ConfigFileError;
use super::StreamingConfig;
use crate::tiling::MAXIMUM_LEVEL;

/// Parse an `Ini` object into a `StreamingConfig`.
///
/// Starts from `StreamingConfig::default()` and overlays any values found in
/// the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<StreamingConfig, ConfigFileError> {
    let mut config = StreamingConfig::default();

    // [scheduler] section
    if let Some(section) = ini.section(Some("scheduler")) {
        if let Some(v) = section.get("maximum_requests") {
            config.scheduler.maximum_requests =
                parse_number(v, "scheduler", "maximum_requests", "must be a non-negative integer")?;
        }
        if let Some(v) = section.get("maximum_requests_per_server") {
            config.scheduler.maximum_requests_per_server = parse_number(
                v,
                "scheduler",
                "maximum_requests_per_server",
                "must be a non-negative integer",
            )?;
        }
        if let Some(v) = section.get("priority_heap_length") {
            config.scheduler.priority_heap_length = parse_number(
                v,
                "scheduler",
                "priority_heap_length",
                "must be a non-negative integer",
            )?;
        }
        if let Some(v) = section.get("throttle_requests") {
            config.scheduler.throttle_requests = parse_bool(v, "scheduler", "throttle_requests")?;
        }
    }

    // [servers] section: `limit = host:port n`, repeatable
    if let Some(section) = ini.section(Some("servers")) {
        for v in section.get_all("limit") {
            let (server, limit) = parse_server_limit(v)?;
            config.scheduler.requests_by_server.insert(server, limit);
        }
    }

    // [tiles] section
    if let Some(section) = ini.section(Some("tiles")) {
        if let Some(v) = section.get("cache_size") {
            config.tiles.tile_cache_size =
                parse_number(v, "tiles", "cache_size", "must be a non-negative integer")?;
        }
    }

    // [imagery] section
    if let Some(section) = ini.section(Some("imagery")) {
        if let Some(v) = section.get("url_template") {
            let v = v.trim();
            if !v.contains("{x}") || !v.contains("{y}") {
                return Err(ConfigFileError::InvalidValue {
                    section: "imagery".to_string(),
                    key: "url_template".to_string(),
                    value: v.to_string(),
                    reason: "must contain {x} and {y} placeholders".to_string(),
                });
            }
            config.imagery.url_template = v.to_string();
        }
        if let Some(v) = section.get("subdomains") {
            config.imagery.subdomains = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = section.get("minimum_level") {
            config.imagery.minimum_level =
                parse_number(v, "imagery", "minimum_level", "must be a non-negative integer")?;
        }
        if let Some(v) = section.get("maximum_level") {
            config.imagery.maximum_level =
                parse_number(v, "imagery", "maximum_level", "must be a non-negative integer")?;
        }
        if config.imagery.minimum_level > config.imagery.maximum_level {
            return Err(ConfigFileError::InvalidValue {
                section: "imagery".to_string(),
                key: "minimum_level".to_string(),
                value: config.imagery.minimum_level.to_string(),
                reason: "must not exceed maximum_level".to_string(),
            });
        }
        if config.imagery.maximum_level > MAXIMUM_LEVEL {
            return Err(ConfigFileError::InvalidValue {
                section: "imagery".to_string(),
                key: "maximum_level".to_string(),
                value: config.imagery.maximum_level.to_string(),
                reason: format!("must be at most {}", MAXIMUM_LEVEL),
            });
        }
        if let Some(v) = section.get("retry_limit") {
            config.imagery.retry_limit =
                parse_number(v, "imagery", "retry_limit", "must be a non-negative integer")?;
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("filter") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.filter = v.to_string();
            }
        }
        if let Some(v) = section.get("file") {
            let v = v.trim();
            config.logging.file = if v.is_empty() {
                None
            } else {
                Some(expand_tilde(v))
            };
        }
    }

    Ok(config)
}

fn parse_number<T: FromStr>(
    value: &str,
    section: &str,
    key: &str,
    reason: &str,
) -> Result<T, ConfigFileError> {
    value.trim().parse().map_err(|_| ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

fn parse_bool(value: &str, section: &str, key: &str) -> Result<bool, ConfigFileError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(ConfigFileError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason: "must be true or false".to_string(),
        }),
    }
}

/// Parses `host:port n` into a normalized server key and limit.
fn parse_server_limit(value: &str) -> Result<(String, usize), ConfigFileError> {
    let invalid = |reason: &str| ConfigFileError::InvalidValue {
        section: "servers".to_string(),
        key: "limit".to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let mut parts = value.split_whitespace();
    let (Some(server), Some(limit), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid("expected '<host>:<port> <limit>'"));
    };

    let Some((host, port)) = server.rsplit_once(':') else {
        return Err(invalid("server must be written as host:port"));
    };
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(invalid("server must be written as host:port"));
    }
    let limit = limit
        .parse()
        .map_err(|_| invalid("limit must be a non-negative integer"))?;

    Ok((format!("{}:{}", host.to_ascii_lowercase(), port), limit))
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn load(content: &str) -> Result<StreamingConfig, ConfigFileError> {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.ini");
        std::fs::write(&config_path, content).unwrap();
        StreamingConfig::load_from(&config_path)
    }

    #[test]
    fn test_overlays_values_on_defaults() {
        let config = load(
            r#"
[scheduler]
maximum_requests = 16
throttle_requests = false

[tiles]
cache_size = 250
"#,
        )
        .unwrap();

        assert_eq!(config.scheduler.maximum_requests, 16);
        assert!(!config.scheduler.throttle_requests);
        assert_eq!(config.scheduler.maximum_requests_per_server, 6);
        assert_eq!(config.tiles.tile_cache_size, 250);
        assert_eq!(config.imagery.retry_limit, 3);
    }

    #[test]
    fn test_server_overrides() {
        let config = load(
            r#"
[servers]
limit = Tile.OpenStreetMap.org:443 2
limit = localhost:8080 12
"#,
        )
        .unwrap();

        let overrides = &config.scheduler.requests_by_server;
        assert_eq!(overrides.get("tile.openstreetmap.org:443"), Some(&2));
        assert_eq!(overrides.get("localhost:8080"), Some(&12));
    }

    #[test]
    fn test_invalid_server_override() {
        let err = load(
            r#"
[servers]
limit = example.com 4
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("host:port"));
    }

    #[test]
    fn test_invalid_number() {
        let err = load(
            r#"
[scheduler]
maximum_requests = lots
"#,
        )
        .unwrap_err();

        match err {
            ConfigFileError::InvalidValue {
                section, key, value, ..
            } => {
                assert_eq!(section, "scheduler");
                assert_eq!(key, "maximum_requests");
                assert_eq!(value, "lots");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_invalid_bool() {
        let err = load(
            r#"
[scheduler]
throttle_requests = maybe
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("true or false"));
    }

    #[test]
    fn test_url_template_requires_placeholders() {
        let err = load(
            r#"
[imagery]
url_template = https://example.com/tile.png
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("placeholders"));
    }

    #[test]
    fn test_imagery_levels_validated() {
        let err = load(
            r#"
[imagery]
minimum_level = 10
maximum_level = 5
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("maximum_level"));
    }

    #[test]
    fn test_imagery_maximum_level_bounded() {
        let config = load("[imagery]\nmaximum_level = 30\n").unwrap();
        assert_eq!(config.imagery.maximum_level, MAXIMUM_LEVEL);

        let err = load("[imagery]\nmaximum_level = 31\n").unwrap_err();
        assert!(err.to_string().contains("maximum_level"));
        assert!(err.to_string().contains("at most 30"));
    }

    #[test]
    fn test_logging_section() {
        let config = load(
            r#"
[logging]
filter = terrastream=debug
file = /tmp/terrastream.log
"#,
        )
        .unwrap();
        assert_eq!(config.logging.filter, "terrastream=debug");
        assert_eq!(config.logging.file, Some(PathBuf::from("/tmp/terrastream.log")));
    }
}
