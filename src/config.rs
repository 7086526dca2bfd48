// src/config.rs

//! Configuration loading utilities.
//!
//! A storage directory holds `config.toml` (pipeline settings) and
//! `sources.toml` (the source registry). Both are optional: missing files
//! fall back to built-in defaults, malformed files are errors.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::error::{AppError, Result};
use crate::models::Config;
use crate::services::{SourceFile, SourceRegistry};

pub const CONFIG_FILE: &str = "config.toml";
pub const SOURCES_FILE: &str = "sources.toml";

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file does not exist.
pub fn load_config(path: &Path) -> Result<Config> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            log::warn!("No config at {path:?}, using default configuration");
            Ok(Config::default())
        }
        Err(e) => Err(AppError::Io(e)),
    }
}

/// Load the source registry from a TOML file of `[[sources]]` tables.
///
/// Falls back to the built-in registry if the file does not exist. Read
/// failures, duplicate ids and malformed source definitions are errors.
pub fn load_sources(path: &Path) -> Result<SourceRegistry> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            log::warn!("No sources at {path:?}, using built-in registry");
            return Ok(SourceRegistry::with_defaults());
        }
        Err(e) => return Err(AppError::Io(e)),
    };
    let file: SourceFile = toml::from_str(&content)?;
    if file.sources.is_empty() {
        return Err(AppError::config(format!("{path:?} defines no sources")));
    }
    SourceRegistry::new(file.sources)
}

/// Load and validate both config and sources from a storage directory.
pub fn load_all(dir: &Path) -> Result<(Config, SourceRegistry)> {
    let config = load_config(&dir.join(CONFIG_FILE))?;
    config
        .validate()
        .map_err(|e| AppError::config(format!("Invalid config: {e}")))?;

    let registry = load_sources(&dir.join(SOURCES_FILE))?;
    log::debug!("Loaded {} sources from {:?}", registry.len(), dir);
    Ok((config, registry))
}
