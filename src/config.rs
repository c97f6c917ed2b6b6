use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Result, anyhow};

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_GENERATE_URL: &str = "https://abhinavdread-qwen-1-5b-q4-k-m.hf.space/generate";
pub const DEFAULT_EMBED_URL: &str = "https://abhinavdread-bge-en-ft-optimised.hf.space/embed";

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Config {
    pub server_url: Option<String>,
    pub generate_url: Option<String>,
    pub embed_url: Option<String>,
    pub markdown: Option<bool>,
    pub log_file: Option<PathBuf>,
    pub upload_timeout_secs: Option<u64>,
}

impl Config {
    pub fn new() -> Self {
        Self {
            server_url: Some(DEFAULT_SERVER_URL.to_string()),
            ..Self::default()
        }
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(path, config_content)?;
        Ok(())
    }

    /// Backend base URL: env var first, then config, then the local default.
    pub fn server_url(&self) -> String {
        std::env::var("DOCQA_SERVER_URL").ok()
            .or_else(|| self.server_url.clone())
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string())
    }

    pub fn generate_url(&self) -> String {
        std::env::var("DOCQA_GENERATE_URL").ok()
            .or_else(|| self.generate_url.clone())
            .unwrap_or_else(|| DEFAULT_GENERATE_URL.to_string())
    }

    pub fn embed_url(&self) -> String {
        std::env::var("DOCQA_EMBED_URL").ok()
            .or_else(|| self.embed_url.clone())
            .unwrap_or_else(|| DEFAULT_EMBED_URL.to_string())
    }

    pub fn markdown_enabled(&self) -> bool {
        self.markdown.unwrap_or(true)
    }

    /// How long an ingestion request may run before it is abandoned.
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs.unwrap_or(600))
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        self.log_file.clone()
            .or_else(|| dirs::cache_dir().map(|p| p.join("docqa").join("docqa.log")))
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("docqa").join("config.json"))
    }
}
