//! Resolve the effective configuration: file, environment, then flags

use anyhow::{Context, Result};
use conductor_config::{ConfigLoader, ObserveConfig};

use crate::cli::Cli;

pub fn load(cli: &Cli) -> Result<ObserveConfig> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_file(path);
    }
    let mut config = loader.load().context("failed to load configuration")?;
    apply_flags(&mut config, cli);
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn apply_flags(config: &mut ObserveConfig, cli: &Cli) {
    if let Some(dir) = &cli.log_dir {
        config.root_dir = dir.clone();
    }
    if let Some(color) = cli.color {
        config.output.color = color.into();
    }
}
