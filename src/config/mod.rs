use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

use crate::service::GenerationOptions;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Processing service settings
    pub service: ServiceConfig,

    /// Application settings
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Endpoint of the processing service
    pub endpoint: String,

    /// Optional bearer token sent with each request
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Owner id attached to created records
    pub owner_id: String,

    /// Directory media files are stored under (temp dir if unset)
    pub media_dir: Option<PathBuf>,

    /// Clips generated per batch item
    pub clip_count: usize,

    /// Generation toggles used when no CLI flag is given
    pub default_options: GenerationOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                endpoint: "http://localhost:8787/process".to_string(),
                api_key: None,
            },
            app: AppConfig {
                owner_id: "local".to_string(),
                media_dir: None,
                clip_count: 3,
                default_options: GenerationOptions::all(),
            },
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = fs_err::read_to_string(&config_path)
                .context("Failed to read config file")?;

            let config: Config = serde_yaml::from_str(&content)
                .context("Failed to parse config file")?;

            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save().await?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(&config_path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("clipscribe").join("config.yaml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.endpoint()?;

        if self.app.clip_count == 0 {
            anyhow::bail!("clip_count must be at least 1");
        }

        Ok(())
    }

    /// Parsed service endpoint
    pub fn endpoint(&self) -> Result<Url> {
        let url = Url::parse(&self.service.endpoint)
            .with_context(|| format!("Invalid service endpoint: {}", self.service.endpoint))?;

        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("Service endpoint must use HTTP or HTTPS");
        }

        Ok(url)
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Service Endpoint: {}", self.service.endpoint);
        println!(
            "  API Key: {}",
            if self.service.api_key.is_some() { "set" } else { "not set" }
        );
        println!("  Owner: {}", self.app.owner_id);
        if let Some(dir) = &self.app.media_dir {
            println!("  Media Dir: {}", dir.display());
        }
        println!("  Clips per Item: {}", self.app.clip_count);
    }
}
