mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{
    LoggingSettings, ProcessorSettings, ServerSettings, Settings, StorageSettings, TopicSettings,
    TransportSettings,
};

/// Environment variables are read as `METERBUS_<SECTION>__<KEY>`,
/// e.g. `METERBUS_TRANSPORT__URL`.
pub const ENV_PREFIX: &str = "METERBUS";

/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
/// Returns a `Settings` struct covering every section
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge(Settings::default()))
}
