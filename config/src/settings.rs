//! Typed view over the environment variables skein understands.

use std::str::FromStr;

use thiserror::Error;

/// A variable whose value could not be used.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid value for {key}: {value:?} ({reason})")]
pub struct SettingsError {
    pub key: String,
    pub value: String,
    pub reason: String,
}

/// Message store connection settings (`DB_*`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbSettings {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
}

/// Log output format (`LOG_FORMAT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {} (use text or json)", s)),
        }
    }
}

/// All runtime settings, read once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub db: DbSettings,
    /// Model name handed to the LLM adapter factory.
    pub model_name: String,
    /// Provider project/location hints; unused by the bundled adapters but
    /// accepted so provider-specific deployments can read them.
    pub llm_project: Option<String>,
    pub llm_location: Option<String>,
    pub max_iterations: u32,
    pub enable_tracing: bool,
    pub log_level: String,
    pub log_format: LogFormat,
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed_var<T>(key: &str, default: T) -> Result<T, SettingsError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw.parse::<T>().map_err(|e| SettingsError {
            key: key.to_string(),
            value: raw,
            reason: e.to_string(),
        }),
    }
}

fn bool_var(key: &str, default: bool) -> Result<bool, SettingsError> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(SettingsError {
                key: key.to_string(),
                value: raw,
                reason: "expected a boolean (true/false)".into(),
            }),
        },
    }
}

impl Settings {
    /// Reads every setting from the environment, with defaults for the local
    /// development setup. Fails on the first unparsable value.
    pub fn from_env() -> Result<Self, SettingsError> {
        Ok(Self {
            db: DbSettings {
                host: var_or("DB_HOST", "localhost"),
                port: parsed_var("DB_PORT", 5432)?,
                name: var_or("DB_NAME", "message_store"),
                user: var_or("DB_USER", "message_store"),
                password: var_or("DB_PASSWORD", ""),
            },
            model_name: var_or("MODEL_NAME", "gpt-4o-mini"),
            llm_project: std::env::var("LLM_PROJECT").ok(),
            llm_location: std::env::var("LLM_LOCATION").ok(),
            max_iterations: parsed_var("MAX_ITERATIONS", 100)?,
            enable_tracing: bool_var("ENABLE_TRACING", false)?,
            log_level: var_or("LOG_LEVEL", "info"),
            log_format: parsed_var("LOG_FORMAT", LogFormat::Text)?,
        })
    }
}
