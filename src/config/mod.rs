//! Configuration loading and merging with CLI arguments.
mod apply;
mod loader;
mod parse;
pub mod types;

#[cfg(test)]
mod tests;

pub use apply::resolve_settings;
pub use loader::{DEFAULT_CONFIG_FILES, load_config};
pub use types::{ConfigFile, DurationValue, RunSettings};

#[cfg(test)]
pub(crate) use loader::load_config_file;
pub(crate) use parse::{parse_duration_value, parse_rate_value};
