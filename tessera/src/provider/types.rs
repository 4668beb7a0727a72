//! Provider types and traits

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::template::{TokenResolver, UrlTemplate};
use crate::coord::MAX_ZOOM;
use crate::tile::TileKey;

/// Environment variable prefix for credential fallback.
pub const CREDENTIAL_ENV_PREFIX: &str = "TESSERA_";

/// Errors that can occur during provider operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Server answered with a non-success status
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// A credential named by the layer has no value
    #[error("Missing credential '{name}' for layer '{layer}'")]
    MissingCredential { layer: String, name: String },

    /// No layer registered under this id
    #[error("Unknown layer: {0}")]
    UnknownLayer(String),

    /// URL template could not be parsed
    #[error("Invalid URL template: {0}")]
    InvalidTemplate(String),
}

impl ProviderError {
    /// Whether the failure comes from configuration rather than transport.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ProviderError::MissingCredential { .. }
                | ProviderError::UnknownLayer(_)
                | ProviderError::InvalidTemplate(_)
        )
    }
}

/// What a layer's tiles decode to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    /// PNG, JPEG, WebP or any other format the image decoder knows.
    Raster,
    /// Mapbox Vector Tile protobuf, optionally compressed.
    Vector,
}

impl ContentType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "raster" | "image" => Some(ContentType::Raster),
            "vector" | "mvt" | "pbf" => Some(ContentType::Vector),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Raster => "raster",
            ContentType::Vector => "vector",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tile source: URL template, content type and the credentials its
/// template refers to.
#[derive(Debug, Clone)]
pub struct LayerSource {
    id: String,
    template: UrlTemplate,
    content: ContentType,
    subdomains: Vec<String>,
    credentials: Vec<String>,
    min_zoom: u8,
    max_zoom: u8,
}

impl LayerSource {
    /// Create a layer from a URL template such as
    /// `https://{s}.tile.example.org/{z}/{x}/{y}.png`.
    pub fn new(
        id: impl Into<String>,
        template: &str,
        content: ContentType,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            id: id.into(),
            template: UrlTemplate::parse(template)?,
            content,
            subdomains: Vec::new(),
            credentials: Vec::new(),
            min_zoom: 0,
            max_zoom: MAX_ZOOM,
        })
    }

    /// Subdomains substituted for `{s}`.
    pub fn with_subdomains<I, S>(mut self, subdomains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subdomains = subdomains.into_iter().map(Into::into).collect();
        self
    }

    /// Template tokens that must be filled from credentials.
    pub fn with_credentials<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.credentials = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_zoom_range(mut self, min_zoom: u8, max_zoom: u8) -> Self {
        self.min_zoom = min_zoom.min(MAX_ZOOM);
        self.max_zoom = max_zoom.clamp(self.min_zoom, MAX_ZOOM);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn template(&self) -> &UrlTemplate {
        &self.template
    }

    pub fn content(&self) -> ContentType {
        self.content
    }

    pub fn subdomains(&self) -> &[String] {
        &self.subdomains
    }

    pub fn credentials(&self) -> &[String] {
        &self.credentials
    }

    pub fn min_zoom(&self) -> u8 {
        self.min_zoom
    }

    pub fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    pub fn supports_zoom(&self, zoom: u8) -> bool {
        zoom >= self.min_zoom && zoom <= self.max_zoom
    }

    /// Build the request URL for a tile.
    ///
    /// Each `{token}` is looked up in order: the caller's resolver, the
    /// built-in tile tokens, then the registry for tokens listed as
    /// credentials. Anything else is left in place literally.
    pub fn tile_url(
        &self,
        key: &TileKey,
        resolver: Option<&dyn TokenResolver>,
        registry: &dyn ProviderRegistry,
    ) -> Result<String, ProviderError> {
        self.template.try_expand(|token| {
            if let Some(value) = resolver.and_then(|r| r.resolve(token, key)) {
                return Ok(Some(value));
            }
            if let Some(value) = builtin_token(token, key, &self.subdomains) {
                return Ok(Some(value));
            }
            if self.credentials.iter().any(|c| c == token) {
                return registry.credential(&self.id, token).map(Some);
            }
            Ok(None)
        })
    }
}

/// Value of a built-in tile token, if `token` names one.
pub fn builtin_token(token: &str, key: &TileKey, subdomains: &[String]) -> Option<String> {
    match token {
        "z" | "zoom" => Some(key.zoom().to_string()),
        "x" => Some(key.x().to_string()),
        "y" => Some(key.y().to_string()),
        "-y" => Some(key.tms_y().to_string()),
        "quadkey" | "q" => Some(key.quadkey()),
        "s" if !subdomains.is_empty() => {
            let index = (key.x() as usize + key.y() as usize) % subdomains.len();
            Some(subdomains[index].clone())
        }
        _ => None,
    }
}

/// Source of layer definitions and credentials.
pub trait ProviderRegistry: Send + Sync {
    /// Layer registered under `id`.
    fn layer(&self, id: &str) -> Option<Arc<LayerSource>>;

    /// Credential value `name` for `layer`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::MissingCredential`] when no value is known.
    fn credential(&self, layer: &str, name: &str) -> Result<String, ProviderError>;

    /// Ids of all registered layers.
    fn layer_ids(&self) -> Vec<String>;
}

/// In-memory registry, typically built from the config file.
///
/// Credentials not set explicitly are looked up in the environment as
/// `TESSERA_<NAME>` (upper-cased, non-alphanumerics replaced by `_`).
#[derive(Debug, Clone, Default)]
pub struct StaticProviders {
    layers: HashMap<String, Arc<LayerSource>>,
    credentials: HashMap<(String, String), String>,
    env_fallback: bool,
}

impl StaticProviders {
    pub fn new() -> Self {
        Self {
            env_fallback: true,
            ..Default::default()
        }
    }

    pub fn with_layer(mut self, layer: LayerSource) -> Self {
        self.insert_layer(layer);
        self
    }

    pub fn with_credential(
        mut self,
        layer: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.insert_credential(layer, name, value);
        self
    }

    /// Disable the environment variable fallback.
    pub fn without_env_fallback(mut self) -> Self {
        self.env_fallback = false;
        self
    }

    pub fn insert_layer(&mut self, layer: LayerSource) {
        self.layers.insert(layer.id().to_string(), Arc::new(layer));
    }

    pub fn insert_credential(
        &mut self,
        layer: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.credentials
            .insert((layer.into(), name.into()), value.into());
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Environment variable consulted for credential `name`.
pub fn credential_env_var(name: &str) -> String {
    let suffix: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}{}", CREDENTIAL_ENV_PREFIX, suffix)
}

impl ProviderRegistry for StaticProviders {
    fn layer(&self, id: &str) -> Option<Arc<LayerSource>> {
        self.layers.get(id).cloned()
    }

    fn credential(&self, layer: &str, name: &str) -> Result<String, ProviderError> {
        if let Some(value) = self
            .credentials
            .get(&(layer.to_string(), name.to_string()))
        {
            return Ok(value.clone());
        }
        if self.env_fallback {
            if let Ok(value) = std::env::var(credential_env_var(name)) {
                if !value.is_empty() {
                    return Ok(value);
                }
            }
        }
        Err(ProviderError::MissingCredential {
            layer: layer.to_string(),
            name: name.to_string(),
        })
    }

    fn layer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.layers.keys().cloned().collect();
        ids.sort();
        ids
    }
}
