//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use dictanote_core::pipeline::PipelinePolicy;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub cors_origin: String,
    pub openai_api_key: Option<String>,
    pub stt_model: String,
    pub primary_model: String,
    pub fallback_model: String,
    /// When set, the primary backend is this HTTP annotation service.
    pub primary_generation_url: Option<String>,
    pub generation_api_token: Option<String>,
    pub pipeline_version: String,
    /// Application salt for key derivation; `None` uses the built-in one.
    pub key_salt: Option<String>,
    pub transcription_timeout: Duration,
    pub primary_timeout: Duration,
    pub fallback_timeout: Duration,
    pub primary_max_attempts: u32,
    pub max_audio_bytes: usize,
    pub draft_ttl: Duration,
    pub audio_sample_rate: u32,
}

// Secrets stay out of logs.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("log_level", &self.log_level)
            .field("cors_origin", &self.cors_origin)
            .field("stt_model", &self.stt_model)
            .field("primary_model", &self.primary_model)
            .field("fallback_model", &self.fallback_model)
            .field("primary_generation_url", &self.primary_generation_url)
            .field("pipeline_version", &self.pipeline_version)
            .field("transcription_timeout", &self.transcription_timeout)
            .field("primary_timeout", &self.primary_timeout)
            .field("fallback_timeout", &self.fallback_timeout)
            .field("primary_max_attempts", &self.primary_max_attempts)
            .field("max_audio_bytes", &self.max_audio_bytes)
            .field("draft_ttl", &self.draft_ttl)
            .field("audio_sample_rate", &self.audio_sample_rate)
            .finish_non_exhaustive()
    }
}

/// Reads `name`, falling back to `default` when unset, and parses it.
fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

fn string_var(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address = parse_var("BIND_ADDRESS", SocketAddr::from(([0, 0, 0, 0], 3000)))?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = string_var("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let cors_origin = string_var("CORS_ORIGIN", "http://localhost:3000");

        // --- Load Collaborator Settings ---
        let openai_api_key = optional_var("OPENAI_API_KEY");
        let stt_model = string_var("STT_MODEL", "whisper-1");
        let primary_model = string_var("PRIMARY_MODEL", "gpt-4o");
        let fallback_model = string_var("FALLBACK_MODEL", "gpt-4o-mini");
        let primary_generation_url = optional_var("PRIMARY_GENERATION_URL");
        let generation_api_token = optional_var("GENERATION_API_TOKEN");

        // --- Load Pipeline Settings ---
        let pipeline_version = string_var("PIPELINE_VERSION", "v1");
        let key_salt = optional_var("KEY_SALT");

        let transcription_timeout =
            Duration::from_secs(parse_var("TRANSCRIPTION_TIMEOUT_SECS", 90u64)?);
        let primary_timeout = Duration::from_secs(parse_var("PRIMARY_TIMEOUT_SECS", 25u64)?);
        let fallback_timeout = Duration::from_secs(parse_var("FALLBACK_TIMEOUT_SECS", 10u64)?);
        let primary_max_attempts = parse_var("PRIMARY_MAX_ATTEMPTS", 2u32)?;
        if primary_max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "PRIMARY_MAX_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let max_audio_bytes = parse_var("MAX_AUDIO_BYTES", 25 * 1024 * 1024usize)?;
        let draft_ttl_hours = parse_var("DRAFT_TTL_HOURS", 24u64)?;
        let draft_ttl = draft_ttl_hours
            .checked_mul(60 * 60)
            .map(Duration::from_secs)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "DRAFT_TTL_HOURS".to_string(),
                    format!("{} hours is out of range", draft_ttl_hours),
                )
            })?;
        let audio_sample_rate = parse_var("AUDIO_SAMPLE_RATE", 48_000u32)?;

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            cors_origin,
            openai_api_key,
            stt_model,
            primary_model,
            fallback_model,
            primary_generation_url,
            generation_api_token,
            pipeline_version,
            key_salt,
            transcription_timeout,
            primary_timeout,
            fallback_timeout,
            primary_max_attempts,
            max_audio_bytes,
            draft_ttl,
            audio_sample_rate,
        })
    }

    /// The orchestrator policy these settings describe.
    pub fn pipeline_policy(&self) -> PipelinePolicy {
        PipelinePolicy {
            transcription_timeout: self.transcription_timeout,
            primary_timeout: self.primary_timeout,
            fallback_timeout: self.fallback_timeout,
            primary_max_attempts: self.primary_max_attempts,
            max_audio_bytes: self.max_audio_bytes,
            ..PipelinePolicy::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-wide.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "BIND_ADDRESS",
        "DATABASE_URL",
        "RUST_LOG",
        "PRIMARY_GENERATION_URL",
        "PRIMARY_TIMEOUT_SECS",
        "PRIMARY_MAX_ATTEMPTS",
        "DRAFT_TTL_HOURS",
        "MAX_AUDIO_BYTES",
    ];

    fn reset() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn defaults_apply_when_only_database_is_set() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        reset();
        std::env::set_var("DATABASE_URL", "postgres://localhost/dictanote");

        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address.port(), 3000);
        assert_eq!(config.log_level, Level::INFO);
        assert!(config.primary_generation_url.is_none());
        assert_eq!(config.draft_ttl, Duration::from_secs(24 * 3600));

        let policy = config.pipeline_policy();
        assert_eq!(policy.transcription_timeout, Duration::from_secs(90));
        assert_eq!(policy.primary_timeout, Duration::from_secs(25));
        assert_eq!(policy.fallback_timeout, Duration::from_secs(10));
        assert_eq!(policy.primary_max_attempts, 2);
        assert_eq!(policy.max_audio_bytes, 26_214_400);
        reset();
    }

    #[test]
    fn missing_database_url_is_reported() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        reset();
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::MissingVar(var)) if var == "DATABASE_URL"
        ));
    }

    #[test]
    fn invalid_numbers_are_reported() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        reset();
        std::env::set_var("DATABASE_URL", "postgres://localhost/dictanote");
        std::env::set_var("PRIMARY_TIMEOUT_SECS", "soon");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InvalidValue(var, _)) if var == "PRIMARY_TIMEOUT_SECS"
        ));

        std::env::set_var("PRIMARY_TIMEOUT_SECS", "25");
        std::env::set_var("PRIMARY_MAX_ATTEMPTS", "0");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InvalidValue(var, _)) if var == "PRIMARY_MAX_ATTEMPTS"
        ));

        std::env::set_var("PRIMARY_MAX_ATTEMPTS", "2");
        std::env::set_var("DRAFT_TTL_HOURS", u64::MAX.to_string());
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InvalidValue(var, _)) if var == "DRAFT_TTL_HOURS"
        ));
        reset();
    }

    #[test]
    fn overrides_are_honoured() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        reset();
        std::env::set_var("DATABASE_URL", "postgres://localhost/dictanote");
        std::env::set_var("BIND_ADDRESS", "127.0.0.1:8080");
        std::env::set_var("PRIMARY_GENERATION_URL", "https://annotate.internal/v1");
        std::env::set_var("DRAFT_TTL_HOURS", "2");

        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address.port(), 8080);
        assert_eq!(
            config.primary_generation_url.as_deref(),
            Some("https://annotate.internal/v1")
        );
        assert_eq!(config.draft_ttl, Duration::from_secs(2 * 3600));
        reset();
    }
}
