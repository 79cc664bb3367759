use crate::config::AppConfig;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from the TOML file with `QBOT_` environment variables on top.
    ///
    /// Missing files are skipped; every field has a default.
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source cannot be parsed.
    pub fn load(path: &str) -> Result<AppConfig> {
        let config: AppConfig = Self::base(path).extract()?;
        Ok(config)
    }

    /// Loads configuration with a profile overlay (`Config.<profile>.toml` next to `path`).
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source cannot be parsed.
    pub fn load_with_profile(path: &str, profile: &str) -> Result<AppConfig> {
        let profile_path = match path.rsplit_once('.') {
            Some((stem, ext)) => format!("{stem}.{profile}.{ext}"),
            None => format!("{path}.{profile}"),
        };

        let config: AppConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Toml::file(profile_path))
            .merge(Env::prefixed("QBOT_").split("__"))
            .extract()?;

        Ok(config)
    }

    fn base(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("QBOT_").split("__"))
    }
}
