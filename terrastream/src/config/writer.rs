//! INI serialization logic for converting `StreamingConfig` → INI string.

use super::StreamingConfig;

/// Convert a `StreamingConfig` to a commented INI string for saving.
pub(super) fn to_config_string(config: &StreamingConfig) -> String {
    let mut servers: Vec<(&String, &usize)> = config.scheduler.requests_by_server.iter().collect();
    servers.sort();
    let server_lines: String = servers
        .iter()
        .map(|(server, limit)| format!("limit = {} {}\n", server, limit))
        .collect();

    let log_file = config
        .logging
        .file
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();

    format!(
        r#"[scheduler]
; Maximum number of requests in flight across all servers
maximum_requests = {}
; Maximum number of requests in flight to a single server
maximum_requests_per_server = {}
; Number of queued requests kept in priority order; less urgent ones are cancelled
priority_heap_length = {}
; When false, requests skip the queue and start immediately
throttle_requests = {}

[servers]
; Per-server overrides, one line per server: limit = <host>:<port> <limit>
{}
[tiles]
; Terrain tiles kept resident between frames
cache_size = {}

[imagery]
; Placeholders: {{x}} {{y}} {{z}} {{reverseY}} {{s}}
url_template = {}
; Comma-separated values for {{s}}
subdomains = {}
minimum_level = {}
maximum_level = {}
; Retries for a failing imagery tile
retry_limit = {}

[logging]
; Filter directive, overridden by RUST_LOG
filter = {}
; Optional log file (empty = stdout only)
file = {}
"#,
        config.scheduler.maximum_requests,
        config.scheduler.maximum_requests_per_server,
        config.scheduler.priority_heap_length,
        config.scheduler.throttle_requests,
        server_lines,
        config.tiles.tile_cache_size,
        config.imagery.url_template,
        config.imagery.subdomains.join(","),
        config.imagery.minimum_level,
        config.imagery.maximum_level,
        config.imagery.retry_limit,
        config.logging.filter,
        log_file,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;

    #[test]
    fn test_servers_are_sorted() {
        let config = StreamingConfig::default().with_scheduler(
            SchedulerConfig::default()
                .with_server_limit("b.example.com:443", 2)
                .with_server_limit("a.example.com:80", 4),
        );
        let text = to_config_string(&config);

        let a = text.find("limit = a.example.com:80 4").unwrap();
        let b = text.find("limit = b.example.com:443 2").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_contains_every_section() {
        let text = to_config_string(&StreamingConfig::default());
        for section in ["[scheduler]", "[servers]", "[tiles]", "[imagery]", "[logging]"] {
            assert!(text.contains(section), "missing {}", section);
        }
        assert!(text.contains("maximum_requests = 50"));
    }
}
