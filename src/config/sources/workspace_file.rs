//! Workspace config file source: .lode/config.toml and .lode/config.local.toml

use crate::config::LODE_DIR;
use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::File;
use std::path::Path;

/// Shared, committed settings
pub const WORKSPACE_CONFIG: &str = "config.toml";
/// Per-machine settings, not meant to be shared
pub const LOCAL_CONFIG: &str = "config.local.toml";

/// Add workspace config files to builder.
/// Precedence: .lode/config.toml (base) then .lode/config.local.toml.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
    workspace_root: &Path,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let config_dir = workspace_root.join(LODE_DIR);
    let mut builder = builder;

    for name in [WORKSPACE_CONFIG, LOCAL_CONFIG] {
        let path = config_dir.join(name);
        if path.exists() {
            builder = builder.add_source(File::from(path).required(false));
        }
    }

    Ok(builder)
}
