//! INI parsing into [`ConfigFile`].
//!
//! Every section and key is optional; values that are present overlay the
//! defaults. A value that does not parse or is out of range fails the whole
//! load with [`ConfigFileError::InvalidValue`].

use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;

use ini::{Ini, Properties};
use tracing::warn;

use super::settings::{ConfigFile, LayerSettings};
use super::size::parse_size;
use super::{ConfigFileError, LAYER_SECTION_PREFIX};
use crate::coord::MAX_ZOOM;
use crate::provider::{ContentType, UrlTemplate};

/// Keys a `[layer.<id>]` section understands besides credential values.
const LAYER_KEYS: [&str; 6] = [
    "url",
    "content",
    "subdomains",
    "credentials",
    "min_zoom",
    "max_zoom",
];

pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [cache]
    if let Some(section) = ini.section(Some("cache")) {
        let cache = &mut config.cache;
        if let Some(v) = section.get("max_tiles") {
            cache.max_tiles = parse_number(
                "cache",
                "max_tiles",
                v,
                "must be a whole number (0 = unlimited)",
            )?;
        }
        if let Some(v) = section.get("max_bytes") {
            cache.max_bytes =
                parse_size(v).map_err(|e| invalid("cache", "max_bytes", v, &e.to_string()))?;
        }
        if let Some(v) = section.get("retry_cooldown_secs") {
            cache.retry_cooldown_secs = parse_number(
                "cache",
                "retry_cooldown_secs",
                v,
                "must be a whole number of seconds",
            )?;
        }
        if let Some(v) = section.get("retry_backoff_max_secs") {
            cache.retry_backoff_max_secs = parse_number(
                "cache",
                "retry_backoff_max_secs",
                v,
                "must be a whole number of seconds",
            )?;
        }
        if let Some(v) = section.get("disk_enabled") {
            cache.disk_enabled = parse_bool(v)
                .ok_or_else(|| invalid("cache", "disk_enabled", v, "must be true or false"))?;
        }
        if let Some(v) = section.get("disk_directory") {
            let v = v.trim();
            if v.is_empty() {
                return Err(invalid("cache", "disk_directory", v, "must not be empty"));
            }
            cache.disk_directory = expand_tilde(v);
        }
    }

    // [fetch]
    if let Some(section) = ini.section(Some("fetch")) {
        let fetch = &mut config.fetch;
        if let Some(v) = section.get("max_concurrent") {
            fetch.max_concurrent =
                parse_number("fetch", "max_concurrent", v, "must be a positive whole number")?;
            if fetch.max_concurrent == 0 {
                return Err(invalid("fetch", "max_concurrent", v, "must be at least 1"));
            }
        }
        if let Some(v) = section.get("timeout_secs") {
            fetch.timeout_secs = parse_number(
                "fetch",
                "timeout_secs",
                v,
                "must be a positive whole number of seconds",
            )?;
            if fetch.timeout_secs == 0 {
                return Err(invalid("fetch", "timeout_secs", v, "must be at least 1"));
            }
        }
        if let Some(v) = section.get("user_agent") {
            let v = v.trim();
            if v.is_empty() {
                return Err(invalid("fetch", "user_agent", v, "must not be empty"));
            }
            fetch.user_agent = v.to_string();
        }
    }

    // [view]
    if let Some(section) = ini.section(Some("view")) {
        let view = &mut config.view;
        if let Some(v) = section.get("width") {
            view.width =
                parse_number("view", "width", v, "must be a positive number of pixels")?;
            if view.width == 0 {
                return Err(invalid("view", "width", v, "must be at least 1"));
            }
        }
        if let Some(v) = section.get("height") {
            view.height =
                parse_number("view", "height", v, "must be a positive number of pixels")?;
            if view.height == 0 {
                return Err(invalid("view", "height", v, "must be at least 1"));
            }
        }
        if let Some(v) = section.get("zoom") {
            view.zoom = parse_zoom("view", "zoom", v)?;
        }
        if let Some(v) = section.get("lat") {
            view.lat = parse_degrees("view", "lat", v, 90.0)?;
        }
        if let Some(v) = section.get("lon") {
            view.lon = parse_degrees("view", "lon", v, 180.0)?;
        }
    }

    // [layer.<id>]
    let mut layers = Vec::new();
    let mut seen = HashSet::new();
    for (name, properties) in ini.iter() {
        let Some(name) = name else { continue };
        let Some(id) = name.strip_prefix(LAYER_SECTION_PREFIX) else {
            continue;
        };
        let id = id.trim();
        if id.is_empty() {
            return Err(invalid(name, "id", id, "layer sections are named [layer.<id>]"));
        }
        if !seen.insert(id.to_string()) {
            return Err(invalid(name, "id", id, "layer is defined more than once"));
        }
        layers.push(parse_layer(name, id, properties)?);
    }
    if !layers.is_empty() {
        config.layers = layers;
    }

    Ok(config)
}

fn parse_layer(
    section: &str,
    id: &str,
    properties: &Properties,
) -> Result<LayerSettings, ConfigFileError> {
    let url = properties
        .get("url")
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| invalid(section, "url", "", "every layer needs a URL template"))?;
    UrlTemplate::parse(url).map_err(|e| invalid(section, "url", url, &e.to_string()))?;

    let mut layer = LayerSettings::new(id, url);
    if let Some(v) = properties.get("content") {
        layer.content = ContentType::parse(v)
            .ok_or_else(|| invalid(section, "content", v, "must be 'raster' or 'vector'"))?;
    }
    if let Some(v) = properties.get("subdomains") {
        layer.subdomains = split_list(v);
    }
    if let Some(v) = properties.get("credentials") {
        layer.credentials = split_list(v);
    }
    if let Some(v) = properties.get("min_zoom") {
        layer.min_zoom = parse_zoom(section, "min_zoom", v)?;
    }
    if let Some(v) = properties.get("max_zoom") {
        layer.max_zoom = parse_zoom(section, "max_zoom", v)?;
    }
    if layer.min_zoom > layer.max_zoom {
        return Err(invalid(
            section,
            "max_zoom",
            &layer.max_zoom.to_string(),
            "must not be below min_zoom",
        ));
    }

    for (key, value) in properties.iter() {
        if LAYER_KEYS.contains(&key) {
            continue;
        }
        if layer.credentials.iter().any(|name| name == key) {
            layer
                .credential_values
                .insert(key.to_string(), value.trim().to_string());
        } else {
            warn!(section, key, "Ignoring unknown layer key");
        }
    }

    Ok(layer)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_number<T: FromStr>(
    section: &str,
    key: &str,
    value: &str,
    reason: &str,
) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, reason))
}

fn parse_zoom(section: &str, key: &str, value: &str) -> Result<u8, ConfigFileError> {
    let reason = format!("must be a zoom level between 0 and {}", MAX_ZOOM);
    let zoom: u8 = parse_number(section, key, value, &reason)?;
    if zoom > MAX_ZOOM {
        return Err(invalid(section, key, value, &reason));
    }
    Ok(zoom)
}

fn parse_degrees(
    section: &str,
    key: &str,
    value: &str,
    limit: f64,
) -> Result<f64, ConfigFileError> {
    let reason = format!("must be degrees between -{limit} and {limit}");
    let degrees: f64 = parse_number(section, key, value, &reason)?;
    if !degrees.is_finite() || degrees.abs() > limit {
        return Err(invalid(section, key, value, &reason));
    }
    Ok(degrees)
}

/// Accepts true/false, yes/no, on/off and 1/0, case-insensitive.
pub(super) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Comma-separated list with blanks dropped.
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Expand a leading `~/` to the home directory.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
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
    use crate::config::DEFAULT_LAYER_ID;

    fn parse(text: &str) -> Result<ConfigFile, ConfigFileError> {
        parse_ini(&Ini::load_from_str(text).unwrap())
    }

    fn invalid_key(result: Result<ConfigFile, ConfigFileError>) -> (String, String) {
        match result {
            Err(ConfigFileError::InvalidValue { section, key, .. }) => (section, key),
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        assert_eq!(parse("").unwrap(), ConfigFile::default());
    }

    #[test]
    fn test_sections_overlay_defaults() {
        let config = parse(
            r#"
[cache]
max_tiles = 64
max_bytes = 32MB
disk_enabled = no

[fetch]
max_concurrent = 2

[view]
zoom = 12
lat = 48.85
lon = 2.35
"#,
        )
        .unwrap();

        assert_eq!(config.cache.max_tiles, 64);
        assert_eq!(config.cache.max_bytes, 32 * 1024 * 1024);
        assert!(!config.cache.disk_enabled);
        assert_eq!(config.fetch.max_concurrent, 2);
        assert_eq!(config.fetch.timeout_secs, ConfigFile::default().fetch.timeout_secs);
        assert_eq!(config.view.zoom, 12);
        assert_eq!(config.view.lat, 48.85);
        assert_eq!(config.view.width, ConfigFile::default().view.width);
        assert_eq!(config.layers[0].id, DEFAULT_LAYER_ID);
    }

    #[test]
    fn test_layer_sections_replace_default_layer() {
        let config = parse(
            r#"
[layer.base]
url = https://{s}.tiles.test/{z}/{x}/{y}.png
subdomains = a, b ,c

[layer.roads]
url = https://v.test/{z}/{x}/{y}.mvt?token={token}
content = vector
credentials = token
token = abc123
max_zoom = 14
stray = 1
"#,
        )
        .unwrap();

        assert_eq!(config.layer_ids(), vec!["base".to_string(), "roads".to_string()]);
        let base = config.layer("base").unwrap();
        assert_eq!(base.subdomains, vec!["a", "b", "c"]);
        assert_eq!(base.content, ContentType::Raster);

        let roads = config.layer("roads").unwrap();
        assert_eq!(roads.content, ContentType::Vector);
        assert_eq!(roads.credentials, vec!["token"]);
        assert_eq!(roads.credential_values.get("token").map(String::as_str), Some("abc123"));
        assert!(!roads.credential_values.contains_key("stray"));
        assert_eq!((roads.min_zoom, roads.max_zoom), (0, 14));
    }

    #[test]
    fn test_invalid_values_name_their_key() {
        let cases = [
            ("[cache]\nmax_tiles = lots", "cache", "max_tiles"),
            ("[cache]\nmax_bytes = 2TB", "cache", "max_bytes"),
            ("[cache]\ndisk_enabled = maybe", "cache", "disk_enabled"),
            ("[fetch]\nmax_concurrent = 0", "fetch", "max_concurrent"),
            ("[view]\nzoom = 24", "view", "zoom"),
            ("[view]\nlat = 91", "view", "lat"),
            ("[view]\nwidth = 0", "view", "width"),
            ("[layer.a]\ncontent = raster", "layer.a", "url"),
            ("[layer.a]\nurl = https://x.test/{z", "layer.a", "url"),
            ("[layer.a]\nurl = https://x.test/{z}\ncontent = svg", "layer.a", "content"),
            (
                "[layer.a]\nurl = https://x.test/{z}\nmin_zoom = 10\nmax_zoom = 5",
                "layer.a",
                "max_zoom",
            ),
        ];
        for (text, section, key) in cases {
            assert_eq!(
                invalid_key(parse(text)),
                (section.to_string(), key.to_string()),
                "{text}"
            );
        }
    }

    #[test]
    fn test_parse_bool_variants() {
        assert_eq!(parse_bool(" YES "), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/tiles"), home.join("tiles"));
        }
    }
}
