//! User configuration stored as an INI file.
//!
//! ```text
//! ~/.tessera/config.ini
//!   [cache]          limits, retry cool-down, disk store
//!   [fetch]          concurrency, timeout, user agent
//!   [view]           initial surface size, zoom and center
//!   [layer.<id>]     one section per tile layer, bottom first
//! ```
//!
//! [`ConfigFile`] converts into the engine's own types with
//! [`ConfigFile::cache_config`], [`ConfigFile::fetch_config`],
//! [`ConfigFile::providers`] and [`ConfigFile::view_state`].

mod file;
mod parser;
mod settings;
mod size;
mod writer;

pub use file::{config_directory, config_file_path, ConfigFileError, CONFIG_DIR_NAME};
pub use settings::{
    default_disk_directory, CacheSettings, ConfigFile, FetchSettings, LayerSettings,
    ViewSettings, DEFAULT_LAYER_ID, DEFAULT_LAYER_URL, DEFAULT_VIEW_HEIGHT, DEFAULT_VIEW_WIDTH,
    DEFAULT_VIEW_ZOOM,
};
pub use size::{format_size, parse_size, Size, SizeParseError};

/// Section name prefix of layer sections.
pub const LAYER_SECTION_PREFIX: &str = "layer.";
