use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::control::ControlConfig;
use crate::mqtt::MqttConfig;

const CONFIG_DIR: &str = ".config/relaypanel";
const CONFIG_FILE: &str = "config.toml";

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub control: ControlConfig,
}

impl AppConfig {
    pub fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    /// Loads `path`, falling back to defaults when the file does not exist.
    pub async fn load(path: &Path) -> Result<Self> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?;

        let config = if exists {
            let content = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
            let config: AppConfig = toml::from_str(&content)
                .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!("Config file {} does not exist, using defaults", path.display());
            AppConfig::default()
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.control
            .validate()
            .map_err(|e| eyre!("Invalid control config: {}", e))?;
        self.mqtt
            .server
            .resolve()
            .map_err(|e| eyre!("Invalid mqtt config: {}", e))?;
        self.mqtt
            .qos()
            .map_err(|e| eyre!("Invalid mqtt config: {}", e))?;
        Ok(())
    }

    /// Writes the default config. Refuses to overwrite unless `force`.
    pub async fn write_default(path: &Path, force: bool) -> Result<()> {
        if !force
            && tokio::fs::try_exists(path)
                .await
                .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
        {
            return Err(eyre!(
                "Config file {} already exists, use --force to overwrite",
                path.display()
            ));
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }

        let content = toml::to_string_pretty(&AppConfig::default())
            .map_err(|e| eyre!("Failed to serialize config: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write config file: {}", e))?;

        info!("Default config written to {}", path.display());
        Ok(())
    }
}
