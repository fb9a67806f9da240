//! Config command handlers

use anyhow::{bail, Context, Result};

use outpost_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(output: &Output) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => output.json(&config),
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  data_dir:          {}", config.data_dir.display());
            println!(
                "  api_url:           {}",
                config.api_url.as_deref().unwrap_or("(not set)")
            );
            println!(
                "  realtime_url:      {}",
                config.realtime_url.as_deref().unwrap_or("(not set)")
            );
            println!("  groups:            {}", config.groups.join(", "));
            println!("  max_retries:       {}", config.max_retries);
            println!("  debounce_ms:       {}", config.debounce_ms);
            println!("  probe_interval_secs: {}", config.probe_interval_secs);
            println!("  match_window_secs: {}", config.match_window_secs);
            println!();
            println!("Config file: {}", Config::config_file_path().display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(key: String, value: String, output: &Output) -> Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;
    apply(&mut config, &key, &value)?;
    config.save().context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));
    Ok(())
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.to_string())
    }
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "data_dir" => config.data_dir = value.into(),
        "api_url" => config.api_url = optional(value),
        "realtime_url" => config.realtime_url = optional(value),
        "groups" => {
            config.groups = value
                .split(',')
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(String::from)
                .collect();
        }
        "max_retries" => {
            config.max_retries = value
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .context("Invalid value for max_retries. Use a whole number above 0.")?;
        }
        "debounce_ms" => {
            config.debounce_ms = value
                .parse()
                .context("Invalid value for debounce_ms. Use milliseconds.")?;
        }
        "probe_interval_secs" => {
            config.probe_interval_secs = value
                .parse()
                .context("Invalid value for probe_interval_secs. Use seconds.")?;
        }
        "match_window_secs" => {
            config.match_window_secs = value
                .parse()
                .context("Invalid value for match_window_secs. Use seconds.")?;
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: data_dir, api_url, realtime_url, groups, max_retries, \
                 debounce_ms, probe_interval_secs, match_window_secs",
                key
            );
        }
    }
    Ok(())
}
