//! Tile provider configuration and HTTP access
//!
//! A provider is described by a [`LayerSource`]: a URL template, the content
//! type its tiles decode to, and the credentials its template needs. The
//! [`ProviderRegistry`] collaborator hands out layers and credentials; the
//! [`AsyncHttpClient`] turns a URL into bytes.
//!
//! ```
//! use tessera::provider::{ContentType, LayerSource, ProviderRegistry, StaticProviders};
//! use tessera::tile::TileKey;
//!
//! let registry = StaticProviders::new().with_layer(
//!     LayerSource::new("osm", "https://tile.example.org/{z}/{x}/{y}.png", ContentType::Raster)
//!         .unwrap(),
//! );
//! let layer = registry.layer("osm").unwrap();
//! let url = layer.tile_url(&TileKey::new(3, 5, 7, "osm"), None, &registry).unwrap();
//! assert_eq!(url, "https://tile.example.org/7/3/5.png");
//! ```

mod http;
mod template;
mod types;

pub use http::{AsyncHttpClient, AsyncReqwestClient, DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT};
pub use template::{TokenResolver, UrlTemplate};
pub use types::{
    builtin_token, credential_env_var, ContentType, LayerSource, ProviderError,
    ProviderRegistry, StaticProviders, CREDENTIAL_ENV_PREFIX,
};

#[cfg(test)]
pub use http::tests::MockAsyncHttpClient;
