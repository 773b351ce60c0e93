//! Public facade for loading configuration.

use crate::config::merge::merge_policy;
use crate::config::sources::{global_file, workspace_file};
use crate::config::LodeConfig;
use config::ConfigError;
use config::File;
use std::path::Path;
use tracing::debug;

/// Loads configuration from files and environment
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace
    ///
    /// Precedence, lowest first: defaults, global file, `.lode/config.toml`,
    /// `.lode/config.local.toml`, `LODE__*` environment variables.
    pub fn load(workspace_root: &Path) -> Result<LodeConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = merge_policy::add_environment(builder);
        let config: LodeConfig = builder.build()?.try_deserialize()?;
        debug!(workspace = %workspace_root.display(), "Configuration loaded");
        Ok(config)
    }

    /// Load from a single file on top of the defaults, ignoring every other source
    pub fn load_from_file(path: &Path) -> Result<LodeConfig, ConfigError> {
        merge_policy::builder_with_defaults()?
            .add_source(File::from(path).required(true))
            .build()?
            .try_deserialize()
    }
}
