//! CLI configuration utilities

use anyhow::{Context, Result};
use codelab_session::PipelineConfig;
use std::path::{Path, PathBuf};

/// Load pipeline configuration from the given file or the user config dir
///
/// The session cache stays off unless `session_cache` is configured.
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let path = path.map(Path::to_path_buf).or_else(default_config_path);
    PipelineConfig::load(path.as_deref()).context("loading configuration")
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("codelab").join("config.toml"))
}
