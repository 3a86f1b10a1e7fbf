use crate::types::Config;
use anyhow::{Context, Result};
use std::fs;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("reading config file {}", path))?;
        let mut config: Config = serde_yaml::from_str(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment wins over the file for deployment-specific endpoints.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("PRESENCE_API_URL") {
            self.analysis.server_url = url;
        }
    }
}
