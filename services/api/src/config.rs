use secrecy::SecretString;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openai_api_key: SecretString,
    pub openai_api_base: String,
    pub chat_model: String,
    /// Speech synthesis is reported unavailable without it.
    pub elevenlabs_api_key: Option<SecretString>,
    pub expected_language: String,
    pub max_messages: usize,
    pub log_level: Level,
    pub prompts_path: PathBuf,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let openai_api_base = std::env::var("OPENAI_API_BASE")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

        let chat_model =
            std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let elevenlabs_api_key = std::env::var("ELEVENLABS_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from);

        let expected_language = std::env::var("EXPECTED_LANGUAGE")
            .map(|lang| lang.trim().to_lowercase())
            .unwrap_or_else(|_| "fr".to_string());

        let max_messages_str = std::env::var("MAX_MESSAGES").unwrap_or_else(|_| "100".to_string());
        let max_messages = max_messages_str
            .parse::<usize>()
            .ok()
            .filter(|max| *max > 0)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "MAX_MESSAGES".to_string(),
                    format!("'{}' is not a positive integer", max_messages_str),
                )
            })?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let prompts_path = std::env::var("PROMPTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./prompts"));

        Ok(Self {
            bind_address,
            openai_api_key,
            openai_api_base,
            chat_model,
            elevenlabs_api_key,
            expected_language,
            max_messages,
            log_level,
            prompts_path,
        })
    }
}
