use crate::settings::{SearchSettings, Settings};
use anyhow::{Result, bail};

/// Validate the configuration values
pub fn validate_settings(settings: &Settings) -> Result<()> {
    // Validate log level
    let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_log_levels.contains(&settings.log_level.to_lowercase().as_str()) {
        bail!(
            "Invalid log level '{}'. Valid options are: {:?}",
            settings.log_level,
            valid_log_levels
        );
    }

    if settings.origin_site.is_empty() {
        bail!("Origin site cannot be empty");
    }

    if settings.filename_filters.is_empty() {
        bail!("At least one filename filter is required");
    }
    if settings.filename_filters.iter().any(|f| f.trim().is_empty()) {
        bail!("Filename filters cannot be blank");
    }

    validate_search("Search", &settings.search)?;
    validate_search("Failures search", &settings.failures.search)?;

    // Validate geo directory
    validate_url("Geo", &settings.geo.url)?;
    if settings.geo.max_attempts == 0 {
        bail!("Geo max_attempts must be greater than 0");
    }

    // Validate reports
    if settings.events.lookback_days == 0
        || settings.aggregate.lookback_days == 0
        || settings.failures.lookback_days == 0
    {
        bail!("Report lookback_days must be greater than 0");
    }

    if settings.events.page_size == 0
        || settings.aggregate.page_size == 0
        || settings.failures.page_size == 0
    {
        bail!("Report page_size must be greater than 0");
    }

    Ok(())
}

fn validate_search(label: &str, search: &SearchSettings) -> Result<()> {
    validate_url(label, &search.url)?;

    if search.index.is_empty() {
        bail!("{label} index cannot be empty");
    }

    if search.timeout_secs == 0 {
        bail!("{label} timeout_secs must be greater than 0");
    }

    if search.username.is_some() != search.password.is_some() {
        bail!("{label} username and password must be set together");
    }

    Ok(())
}

fn validate_url(label: &str, url: &str) -> Result<()> {
    if url.is_empty() {
        bail!("{label} URL cannot be empty");
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        bail!("{label} URL must start with http:// or https://");
    }

    Ok(())
}
