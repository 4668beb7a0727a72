//! Typed settings, one struct per INI section.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::{
    CacheConfig, DEFAULT_MAX_BYTES, DEFAULT_MAX_TILES, DEFAULT_RETRY_BACKOFF_MAX,
    DEFAULT_RETRY_COOLDOWN,
};
use crate::coord::{GeoPoint, MAX_ZOOM};
use crate::fetch::{FetchConfig, DEFAULT_MAX_CONCURRENT_FETCHES};
use crate::provider::{
    ContentType, LayerSource, StaticProviders, DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT,
};
use crate::view::ViewState;

use super::ConfigFileError;

/// Id of the layer written into a fresh config file.
pub const DEFAULT_LAYER_ID: &str = "osm";

/// URL template of the default layer.
pub const DEFAULT_LAYER_URL: &str = "https://tile.openstreetmap.org/{z}/{x}/{y}.png";

pub const DEFAULT_VIEW_WIDTH: u32 = 1024;
pub const DEFAULT_VIEW_HEIGHT: u32 = 768;
pub const DEFAULT_VIEW_ZOOM: u8 = 3;

/// Whole config file.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    pub cache: CacheSettings,
    pub fetch: FetchSettings,
    pub view: ViewSettings,
    /// Layers in file order, bottom first.
    pub layers: Vec<LayerSettings>,
}

/// `[cache]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub max_tiles: usize,
    pub max_bytes: usize,
    pub retry_cooldown_secs: u64,
    pub retry_backoff_max_secs: u64,
    pub disk_enabled: bool,
    pub disk_directory: PathBuf,
}

/// `[fetch]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSettings {
    pub max_concurrent: usize,
    pub timeout_secs: u64,
    pub user_agent: String,
}

/// `[view]`
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSettings {
    pub width: u32,
    pub height: u32,
    pub zoom: u8,
    pub lat: f64,
    pub lon: f64,
}

/// `[layer.<id>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSettings {
    pub id: String,
    pub url: String,
    pub content: ContentType,
    pub subdomains: Vec<String>,
    /// Template tokens filled from credentials.
    pub credentials: Vec<String>,
    /// Credential values given in the file. Missing ones fall back to the
    /// environment.
    pub credential_values: BTreeMap<String, String>,
    pub min_zoom: u8,
    pub max_zoom: u8,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            cache: CacheSettings::default(),
            fetch: FetchSettings::default(),
            view: ViewSettings::default(),
            layers: vec![LayerSettings::new(DEFAULT_LAYER_ID, DEFAULT_LAYER_URL)],
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_tiles: DEFAULT_MAX_TILES,
            max_bytes: DEFAULT_MAX_BYTES,
            retry_cooldown_secs: DEFAULT_RETRY_COOLDOWN.as_secs(),
            retry_backoff_max_secs: DEFAULT_RETRY_BACKOFF_MAX.as_secs(),
            disk_enabled: true,
            disk_directory: default_disk_directory(),
        }
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT_FETCHES,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            width: DEFAULT_VIEW_WIDTH,
            height: DEFAULT_VIEW_HEIGHT,
            zoom: DEFAULT_VIEW_ZOOM,
            lat: 0.0,
            lon: 0.0,
        }
    }
}

impl LayerSettings {
    /// Raster layer covering every zoom level.
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            content: ContentType::Raster,
            subdomains: Vec::new(),
            credentials: Vec::new(),
            credential_values: BTreeMap::new(),
            min_zoom: 0,
            max_zoom: MAX_ZOOM,
        }
    }

    /// Section name in the INI file.
    pub fn section_name(&self) -> String {
        format!("{}{}", super::LAYER_SECTION_PREFIX, self.id)
    }

    /// Build the provider-side layer source.
    pub fn to_source(&self) -> Result<LayerSource, ConfigFileError> {
        let source = LayerSource::new(self.id.clone(), &self.url, self.content).map_err(|e| {
            ConfigFileError::InvalidValue {
                section: self.section_name(),
                key: "url".to_string(),
                value: self.url.clone(),
                reason: e.to_string(),
            }
        })?;
        Ok(source
            .with_subdomains(self.subdomains.iter().cloned())
            .with_credentials(self.credentials.iter().cloned())
            .with_zoom_range(self.min_zoom, self.max_zoom))
    }
}

impl ConfigFile {
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::default()
            .with_max_tiles(self.cache.max_tiles)
            .with_max_bytes(self.cache.max_bytes)
            .with_retry(
                Duration::from_secs(self.cache.retry_cooldown_secs),
                Duration::from_secs(self.cache.retry_backoff_max_secs),
            )
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig::default()
            .with_max_concurrent(self.fetch.max_concurrent)
            .with_timeout(Duration::from_secs(self.fetch.timeout_secs))
            .with_user_agent(self.fetch.user_agent.clone())
    }

    /// Provider registry holding every configured layer and the credential
    /// values written in the file.
    pub fn providers(&self) -> Result<StaticProviders, ConfigFileError> {
        let mut providers = StaticProviders::new();
        for layer in &self.layers {
            providers.insert_layer(layer.to_source()?);
            for (name, value) in &layer.credential_values {
                providers.insert_credential(layer.id.clone(), name.clone(), value.clone());
            }
        }
        Ok(providers)
    }

    /// Initial view from `[view]`.
    pub fn view_state(&self) -> ViewState {
        ViewState::from_geo(
            GeoPoint::new(self.view.lon, self.view.lat),
            self.view.zoom,
            self.view.width,
            self.view.height,
        )
    }

    pub fn layer_ids(&self) -> Vec<String> {
        self.layers.iter().map(|l| l.id.clone()).collect()
    }

    pub fn layer(&self, id: &str) -> Option<&LayerSettings> {
        self.layers.iter().find(|l| l.id == id)
    }
}

/// Platform cache directory plus `tessera/tiles`.
pub fn default_disk_directory() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tessera")
        .join("tiles")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderRegistry;
    use crate::tile::TileKey;

    #[test]
    fn test_defaults_have_one_raster_layer() {
        let config = ConfigFile::default();
        assert_eq!(config.layer_ids(), vec![DEFAULT_LAYER_ID.to_string()]);
        assert_eq!(config.cache_config(), CacheConfig::default());
        assert_eq!(config.fetch_config(), FetchConfig::default());
        assert_eq!(config.view_state().zoom(), DEFAULT_VIEW_ZOOM);
    }

    #[test]
    fn test_providers_carry_layers_and_credentials() {
        let mut layer = LayerSettings::new("sat", "https://s.test/{z}/{x}/{y}?k={key}");
        layer.credentials = vec!["key".to_string()];
        layer
            .credential_values
            .insert("key".to_string(), "secret".to_string());
        layer.max_zoom = 12;
        let config = ConfigFile {
            layers: vec![layer],
            ..Default::default()
        };

        let providers = config.providers().unwrap();
        assert_eq!(providers.len(), 1);
        let source = providers.layer("sat").unwrap();
        assert_eq!(source.max_zoom(), 12);
        assert_eq!(
            providers.credential("sat", "key").unwrap(),
            "secret".to_string()
        );
        let url = source
            .tile_url(&TileKey::new(1, 2, 3, "sat"), None, &providers)
            .unwrap();
        assert_eq!(url, "https://s.test/3/1/2?k=secret");
    }

    #[test]
    fn test_bad_template_is_invalid_value() {
        let config = ConfigFile {
            layers: vec![LayerSettings::new("broken", "https://x.test/{z}/{x")],
            ..Default::default()
        };
        match config.providers() {
            Err(ConfigFileError::InvalidValue { section, key, .. }) => {
                assert_eq!(section, "layer.broken");
                assert_eq!(key, "url");
            }
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }
}
