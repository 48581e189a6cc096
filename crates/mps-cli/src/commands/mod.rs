//! Command handler modules for mps-cli.
//!
//! Shared helpers used by multiple command paths live here.

pub mod automap;

use anyhow::{Context, Result};
use mps_config::{LoadedConfig, SyncSettings};
use std::fs;

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Load layered YAML and its typed view.
pub fn load_settings(paths: &[String]) -> Result<(LoadedConfig, SyncSettings)> {
    let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    let loaded = mps_config::load_layered_yaml(&path_refs)?;
    let settings = loaded.settings()?;
    Ok((loaded, settings))
}

/// Read a file as bytes, dropping a UTF-8 BOM (Windows editors add one).
pub fn read_body(path: &str) -> Result<Vec<u8>> {
    let bytes = fs::read(path).with_context(|| format!("read body file failed: {}", path))?;
    Ok(bytes
        .strip_prefix(&[0xEF, 0xBB, 0xBF])
        .map(<[u8]>::to_vec)
        .unwrap_or(bytes))
}
