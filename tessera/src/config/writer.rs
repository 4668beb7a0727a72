//! Serialization of [`ConfigFile`] to commented INI text.

use std::fmt::Write;

use super::settings::{ConfigFile, LayerSettings};
use super::size::format_size;

pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let mut out = format!(
        r#"# Tessera configuration
# Values left out fall back to their defaults.

[cache]
# Maximum number of tiles kept in memory (0 = unlimited)
max_tiles = {max_tiles}
# Maximum decoded bytes kept in memory, e.g. 256MB (0 = unlimited)
max_bytes = {max_bytes}
# Seconds before a failed tile is fetched again; doubles per failure
retry_cooldown_secs = {retry_cooldown}
# Ceiling for the doubling cool-down
retry_backoff_max_secs = {retry_backoff_max}
# Keep raw tile bytes on disk between runs
disk_enabled = {disk_enabled}
disk_directory = {disk_directory}

[fetch]
# Simultaneous HTTP requests
max_concurrent = {max_concurrent}
# Per-request timeout in seconds
timeout_secs = {timeout}
user_agent = {user_agent}

[view]
# Surface size in pixels
width = {width}
height = {height}
# Zoom level (0-23)
zoom = {zoom}
# Center in degrees
lat = {lat}
lon = {lon}
"#,
        max_tiles = config.cache.max_tiles,
        max_bytes = format_size(config.cache.max_bytes),
        retry_cooldown = config.cache.retry_cooldown_secs,
        retry_backoff_max = config.cache.retry_backoff_max_secs,
        disk_enabled = config.cache.disk_enabled,
        disk_directory = config.cache.disk_directory.display(),
        max_concurrent = config.fetch.max_concurrent,
        timeout = config.fetch.timeout_secs,
        user_agent = config.fetch.user_agent,
        width = config.view.width,
        height = config.view.height,
        zoom = config.view.zoom,
        lat = config.view.lat,
        lon = config.view.lon,
    );

    out.push_str(
        r#"
# Layers are drawn in file order, bottom first.
# url:         template with {z} {x} {y} {-y} {quadkey} {s} and credential tokens
# content:     raster or vector
# subdomains:  comma-separated values for {s}
# credentials: comma-separated tokens filled from this section or from
#              TESSERA_<NAME> environment variables
"#,
    );
    for layer in &config.layers {
        write_layer(&mut out, layer);
    }
    out
}

fn write_layer(out: &mut String, layer: &LayerSettings) {
    // Writing to a String cannot fail.
    let _ = writeln!(out, "\n[{}]", layer.section_name());
    let _ = writeln!(out, "url = {}", layer.url);
    let _ = writeln!(out, "content = {}", layer.content);
    if !layer.subdomains.is_empty() {
        let _ = writeln!(out, "subdomains = {}", layer.subdomains.join(","));
    }
    if !layer.credentials.is_empty() {
        let _ = writeln!(out, "credentials = {}", layer.credentials.join(","));
    }
    let _ = writeln!(out, "min_zoom = {}", layer.min_zoom);
    let _ = writeln!(out, "max_zoom = {}", layer.max_zoom);
    for (name, value) in &layer.credential_values {
        let _ = writeln!(out, "{} = {}", name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse_ini;
    use super::*;
    use crate::config::LayerSettings;
    use crate::provider::ContentType;
    use ini::Ini;
    use std::path::PathBuf;

    #[test]
    fn test_default_config_round_trips() {
        let config = ConfigFile::default();
        let text = to_config_string(&config);
        let parsed = parse_ini(&Ini::load_from_str(&text).unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_customized_config_round_trips() {
        let mut config = ConfigFile::default();
        config.cache.max_tiles = 0;
        config.cache.max_bytes = 3 * 1024 * 1024;
        config.cache.disk_enabled = false;
        config.cache.disk_directory = PathBuf::from("/var/cache/tessera");
        config.fetch.user_agent = "my-renderer/2.0 (+https://example.test)".to_string();
        config.view.lat = -33.8688;
        config.view.lon = 151.2093;
        config.view.zoom = 17;

        let mut roads = LayerSettings::new("roads", "https://{s}.v.test/{z}/{x}/{y}.pbf?k={key}");
        roads.content = ContentType::Vector;
        roads.subdomains = vec!["a".to_string(), "b".to_string()];
        roads.credentials = vec!["key".to_string()];
        roads
            .credential_values
            .insert("key".to_string(), "s3cret".to_string());
        roads.min_zoom = 4;
        roads.max_zoom = 15;
        config.layers.push(roads);

        let text = to_config_string(&config);
        assert!(text.contains("max_bytes = 3MB"));
        assert!(text.contains("[layer.roads]"));

        let parsed = parse_ini(&Ini::load_from_str(&text).unwrap()).unwrap();
        assert_eq!(parsed, config);
    }
}
