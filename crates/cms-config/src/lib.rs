//! Cache entries and the three-tier configuration model for cmake-sync.
//!
//! - [`ConfigEntry`]: one typed `KEY:TYPE=VALUE` cache setting
//! - [`parse_cache`] / [`entries_from_cache_file`]: `CMakeCache.txt` reading
//! - [`entries_from_arguments`]: `-D`/`-U` command-line parsing
//! - [`ConfigModel`]: kit, initial and current tiers with pending user edits
//!
//! # Example
//!
//! ```
//! use cms_config::{ConfigModel, parse_cache};
//!
//! let cache = "//Enable tests\nBUILD_TESTING:BOOL=ON\n";
//! let mut model = ConfigModel::new();
//! model.set_from_tool(parse_cache(cache));
//! model.toggle_unset("BUILD_TESTING").unwrap();
//! assert_eq!(model.unset_arguments(), ["-UBUILD_TESTING"]);
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod cache_file;
pub mod entry;
pub mod error;
pub mod model;

pub use cache_file::{
    CACHE_FILE_NAME, ParsedArguments, entries_from_arguments, entries_from_cache_file,
    parse_cache, value_of,
};
pub use entry::{ConfigEntry, ConfigType, split_value, to_bool};
pub use error::EntryError;
pub use model::{ConfigModel, ModelEntry, Scope, Tier};
