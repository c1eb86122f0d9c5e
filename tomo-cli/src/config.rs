//! Engine configuration: TOML file first, command-line flags on top.

use std::path::Path;

use tomo_engine::EngineConfig;
use tracing::debug;

use crate::cli::Args;
use crate::error::{AppError, Result};

pub fn load(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let text = std::fs::read_to_string(path).map_err(|source| AppError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    let config = toml::from_str(&text).map_err(|source| AppError::ConfigParse {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "Loaded configuration");
    Ok(config)
}

pub fn apply_overrides(config: &mut EngineConfig, args: &Args) -> Result<()> {
    if let Some(value) = args.initial_buffer {
        config.initial_buffer_seconds = value;
    }
    if let Some(value) = args.min_playout_buffer {
        config.min_playout_buffer_seconds = value;
    }
    if let Some(value) = args.min_playout_restart {
        config.min_playout_restart_seconds = value;
    }
    if let Some(value) = args.max_retries {
        config.max_retries = value;
    }
    if args.range_start.is_some() {
        config.range_start = args.range_start;
    }
    if args.strict_tls {
        config.accept_invalid_certs = false;
    }
    for header in &args.headers {
        let (name, value) = parse_header(header)?;
        config.headers.insert(name.to_owned(), value.to_owned());
    }
    Ok(())
}

fn parse_header(raw: &str) -> Result<(&str, &str)> {
    match raw.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim(), value.trim())),
        _ => Err(AppError::InvalidArgument(format!(
            "header `{raw}` is not in `Name: Value` form"
        ))),
    }
}
