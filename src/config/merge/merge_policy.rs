//! Merge rules: defaults, override order, conflict handling.
//!
//! Later sources override earlier ones key by key; tables merge, arrays and
//! scalars are replaced wholesale.

use config::builder::DefaultState;
use config::Config;
use config::ConfigBuilder;
use config::ConfigError;
use config::Environment;

/// Environment prefix: `LODE__CORE__JOBS=8` sets `core.jobs`
pub const ENV_PREFIX: &str = "LODE";

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("core.hash_algorithm", "blake3")?
        .set_default("core.jobs", 4)?
        .set_default("transfer.retries", 3)?
        .set_default("transfer.retry_delay_ms", 200)
}

/// Environment overrides, applied last
pub fn add_environment(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true),
    )
}
