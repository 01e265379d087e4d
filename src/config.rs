use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::info;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Connection settings for one chat account
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ClientConfig {
    pub server: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl ClientConfig {
    pub fn new(server: &str, user_id: &str, token: &str) -> Self {
        ClientConfig {
            server: server.trim_end_matches('/').to_string(),
            user_id: user_id.to_string(),
            token: (!token.is_empty()).then(|| BASE64.encode(token)),
        }
    }

    pub fn get_token(&self) -> Option<String> {
        self.token.as_ref().map(|encoded| {
            String::from_utf8(BASE64.decode(encoded).unwrap_or_default()).unwrap_or_default()
        })
    }

    /// Base URL of the REST API
    pub fn api_base(&self) -> String {
        format!("{}/api", self.server.trim_end_matches('/'))
    }
}

static CONFIG_PATH_OVERRIDE: OnceCell<PathBuf> = OnceCell::new();

pub fn set_config_path_override(path: PathBuf) {
    let _ = CONFIG_PATH_OVERRIDE.set(path);
}

pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow!("Could not determine config directory"))?
        .join("chatterline");

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

fn get_config_path() -> Result<PathBuf> {
    if let Some(path) = CONFIG_PATH_OVERRIDE.get() {
        return Ok(path.clone());
    }
    Ok(get_config_dir()?.join("config.json"))
}

pub fn save_config(config: &ClientConfig) -> Result<()> {
    save_config_to(&get_config_path()?, config)
}

pub fn load_config() -> Result<Option<ClientConfig>> {
    load_config_from(&get_config_path()?)
}

fn save_config_to(path: &Path, config: &ClientConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, config)?;

    info!("Configuration saved for {} to {}", config.user_id, path.display());
    Ok(())
}

fn load_config_from(path: &Path) -> Result<Option<ClientConfig>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path)?;
    let config: ClientConfig = serde_json::from_str(&contents)?;
    info!("Loaded configuration for {} from {}", config.user_id, path.display());

    Ok(Some(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_encoded_at_rest() {
        let config = ClientConfig::new("http://localhost:5001/", "u1", "secret-jwt");
        assert_eq!(config.server, "http://localhost:5001");
        assert_ne!(config.token.as_deref(), Some("secret-jwt"));
        assert_eq!(config.get_token().as_deref(), Some("secret-jwt"));
        assert_eq!(config.api_base(), "http://localhost:5001/api");
    }

    #[test]
    fn test_empty_token_is_omitted() {
        let config = ClientConfig::new("http://localhost:5001", "u1", "");
        assert_eq!(config.get_token(), None);
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("token"));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        assert!(load_config_from(&path).unwrap().is_none());

        let config = ClientConfig::new("https://chat.example.com", "6650f1", "jwt");
        save_config_to(&path, &config).unwrap();

        let loaded = load_config_from(&path).unwrap().unwrap();
        assert_eq!(loaded.server, "https://chat.example.com");
        assert_eq!(loaded.user_id, "6650f1");
        assert_eq!(loaded.get_token().as_deref(), Some("jwt"));
    }

    #[test]
    fn test_corrupt_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        assert!(load_config_from(&path).is_err());
    }
}
