pub mod parse;
pub mod types;

use std::path::{Path, PathBuf};

pub use parse::{load_config, ConfigError};
pub use types::Config;

/// Resolves the config file path from the explicit argument or the default
/// `config.json` in the working directory.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    let default = PathBuf::from("config.json");
    if default.exists() {
        return Some(default);
    }

    None
}
