use anyhow::{Context, Result};
use sessionhub_runtime_config::{RuntimeConfig, config_path};

/// Print the effective configuration (defaults filled in).
pub fn run(config: &RuntimeConfig, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }
    if let Ok(path) = config_path() {
        let state = if path.exists() { "" } else { " (not found, using defaults)" };
        println!("# {}{}", path.display(), state);
    }
    print!("{}", render(config)?);
    Ok(())
}

fn render(config: &RuntimeConfig) -> Result<String> {
    toml::to_string_pretty(config).context("serialize config")
}
