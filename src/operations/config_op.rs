use super::op_helper::{prepare_stream, render_plan};
use crate::app_config::AppConfig;
use anyhow::{Context, Result};

pub fn handle_dump_config_cli(config: &AppConfig) -> Result<()> {
    let yaml = config.to_yaml().context("Failed to render configuration")?;
    print!("{}", yaml);
    Ok(())
}

pub async fn handle_print_pipeline_cli(config: &AppConfig) -> Result<()> {
    let prepared = prepare_stream(config, false).await?;
    print!("{}", render_plan(&prepared));
    Ok(())
}
