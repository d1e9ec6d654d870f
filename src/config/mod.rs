mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{
    ConsumerSettings, LoggingSettings, RabbitMqSettings, RetrySettings, ServerSettings, Settings,
    ShutdownSettings, SinkSettings,
};

/// Loads `config/default` (if present), then environment variables.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

/// Loads settings from `path` and the environment, merged over defaults.
///
/// A `.env` file in the working directory is read first. Environment keys use
/// `__` between section and field, e.g. `RABBITMQ__URL` or `SERVER__PORT`.
/// The flat names `RABBITMQ_URL` and `PORT` are honoured too, unless the
/// sectioned key is also set.
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    dotenvy::dotenv().ok();

    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::default()
                .separator("__")
                .try_parsing(true),
        )
        .set_override_option("rabbitmq.url", flat_env("RABBITMQ_URL", "RABBITMQ__URL"))?
        .set_override_option("server.port", flat_env("PORT", "SERVER__PORT"))?;

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge(Settings::default()))
}

fn flat_env(name: &str, sectioned: &str) -> Option<String> {
    if std::env::var_os(sectioned).is_some() {
        return None;
    }
    std::env::var(name).ok()
}

#[cfg(test)]
mod tests;
