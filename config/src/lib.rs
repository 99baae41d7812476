//! Environment configuration: load project `.env` into the process
//! environment (existing env always wins), then read typed [`Settings`].
//!
//! All configuration is environment-variable shaped; `.env` is a convenience
//! for development. Invalid values are fatal at startup, before any
//! processing begins.

mod dotenv;
mod settings;

use std::path::Path;

use thiserror::Error;

pub use settings::{DbSettings, LogFormat, Settings, SettingsError};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
}

/// Loads the project `.env` (current directory, or `override_dir` if given)
/// and sets each key that is **not** already present in the process
/// environment. A missing `.env` is fine.
pub fn load_and_apply(override_dir: Option<&Path>) -> Result<(), LoadError> {
    let dotenv_map = dotenv::load_env_map(override_dir).map_err(LoadError::DotenvRead)?;
    for (key, value) in dotenv_map {
        if std::env::var(&key).is_err() {
            std::env::set_var(&key, value);
        }
    }
    Ok(())
}
