pub mod validation;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File};
use ncar_search::{Credentials, OpenSearchClient};
use serde::{Deserialize, Deserializer, Serialize};
use std::{fmt, path::Path, path::PathBuf, time::Duration};
use validation::validate_settings;

/// Main settings for the access-log reports.
///
/// Every field has a default, so the binary runs without a config file.
/// Environment variables override file values, e.g. `NCAR__SEARCH__URL` or
/// `NCAR__EVENTS__OUTPUT_DIR`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Log level when `RUST_LOG` is not set ("trace" .. "error")
    pub log_level: String,
    /// Site name of the authoritative origin; everything else is a cache
    pub origin_site: String,
    /// Substrings matched against `filename` with `*<filter>*` wildcards
    pub filename_filters: Vec<String>,
    /// Access-log cluster
    pub search: SearchSettings,
    /// Server geolocation directory
    pub geo: GeoSettings,
    pub events: EventSettings,
    pub aggregate: AggregateSettings,
    pub failures: FailureSettings,
}

/// Connection to a search cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub url: String,
    /// Index pattern, e.g. `xrd-stash*`
    pub index: String,
    pub timeout_secs: u64,
    /// Basic auth; both must be set to take effect
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoSettings {
    pub url: String,
    pub timeout_secs: u64,
    /// Total attempts, including the first request
    pub max_attempts: usize,
    pub retry_delay_ms: u64,
}

/// Per-event report of cache traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSettings {
    pub output_dir: PathBuf,
    pub lookback_days: u32,
    pub page_size: usize,
    /// Scroll keep-alive (e.g. "2m"); an empty value issues a single search
    /// capped at `page_size`
    #[serde(deserialize_with = "keep_alive")]
    pub scroll: Option<String>,
    /// Leave origin traffic to the aggregate report
    pub exclude_origin: bool,
    /// Also write `<date>.log` next to `latest.log`
    pub dated_file: bool,
    /// Also write `<date>-cache.log` and `<date>-origin.log`
    pub split_by_server_type: bool,
}

/// Five-minute origin traffic buckets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateSettings {
    pub output_dir: PathBuf,
    pub lookback_days: u32,
    /// Buckets per composite page
    pub page_size: usize,
    pub dated_file: bool,
}

/// OSPool transfer failures, served by a separate cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureSettings {
    /// Omitted keys fall back to the transfer cluster, not to `[search]`
    #[serde(deserialize_with = "transfer_search")]
    pub search: SearchSettings,
    pub output_dir: PathBuf,
    pub lookback_days: u32,
    pub page_size: usize,
    #[serde(deserialize_with = "keep_alive")]
    pub scroll: Option<String>,
    pub dated_file: bool,
}

impl Settings {
    /// Load settings from an optional TOML file, then environment variables.
    pub fn new<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        // NOTE: It's ok if this fails (file might not exist)
        let _ = dotenvy::dotenv();

        let mut builder = ConfigBuilder::builder();
        if let Some(file) = path {
            builder = builder.add_source(File::with_name(&file.as_ref().to_string_lossy()));
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix("NCAR")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("filename_filters")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        validate_settings(&settings)?;

        Ok(settings)
    }
}

/// A blank keep-alive turns scrolling off.
fn keep_alive<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.trim().is_empty()))
}

/// `[search]` keys given for the transfer cluster.
#[derive(Deserialize)]
struct SearchOverrides {
    url: Option<String>,
    index: Option<String>,
    timeout_secs: Option<u64>,
    username: Option<String>,
    password: Option<String>,
}

fn transfer_search<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SearchSettings, D::Error> {
    let overrides = SearchOverrides::deserialize(deserializer)?;
    let defaults = SearchSettings::transfer();
    Ok(SearchSettings {
        url: overrides.url.unwrap_or(defaults.url),
        index: overrides.index.unwrap_or(defaults.index),
        timeout_secs: overrides.timeout_secs.unwrap_or(defaults.timeout_secs),
        username: overrides.username.or(defaults.username),
        password: overrides.password.or(defaults.password),
    })
}

impl SearchSettings {
    /// The OSPool transfer-history cluster.
    pub fn transfer() -> Self {
        Self {
            url: "https://elastic.osg.chtc.io/q".to_string(),
            index: "adstash-ospool-transfer*".to_string(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }

    pub fn client(&self) -> Result<OpenSearchClient> {
        OpenSearchClient::new(&self.url, self.timeout(), self.credentials())
            .with_context(|| format!("Failed to create search client for {}", self.url))
    }
}

impl GeoSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            origin_site: "NCAR_OSDF_ORIGIN".to_string(),
            filename_filters: ["ncar", "ncar-rda", "ncar-rda-test", "ncar-cesm2-lens"]
                .map(String::from)
                .to_vec(),
            search: SearchSettings::default(),
            geo: GeoSettings::default(),
            events: EventSettings::default(),
            aggregate: AggregateSettings::default(),
            failures: FailureSettings::default(),
        }
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            url: "https://gracc.opensciencegrid.org/q".to_string(),
            index: "xrd-stash*".to_string(),
            timeout_secs: 300,
            username: None,
            password: None,
        }
    }
}

impl Default for GeoSettings {
    fn default() -> Self {
        Self {
            url: "https://osdf-director.osg-htc.org/api/v1.0/director_ui/servers".to_string(),
            timeout_secs: 60,
            max_attempts: 3,
            retry_delay_ms: 5_000,
        }
    }
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("ncar-access-log"),
            lookback_days: 1,
            page_size: 10_000,
            scroll: Some("2m".to_string()),
            exclude_origin: true,
            dated_file: true,
            split_by_server_type: false,
        }
    }
}

impl Default for AggregateSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("ncar-origin-log"),
            lookback_days: 1,
            page_size: 1_000,
            dated_file: true,
        }
    }
}

impl Default for FailureSettings {
    fn default() -> Self {
        Self {
            search: SearchSettings::transfer(),
            output_dir: PathBuf::from("transfer-failures"),
            lookback_days: 2,
            page_size: 1_000,
            scroll: Some("2m".to_string()),
            dated_file: false,
        }
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Settings {{\n\
             \tLog Level: {}\n\
             \tOrigin Site: {}\n\
             \tFilename Filters: {:?}\n\
             \tSearch URL: {} ({})\n\
             \tGeo URL: {}\n\
             \tEvents Dir: {}\n\
             \tAggregate Dir: {}\n\
             \tFailures URL: {} ({})\n\
             \tFailures Dir: {}\n\
             }}",
            self.log_level,
            self.origin_site,
            self.filename_filters,
            self.search.url,
            self.search.index,
            self.geo.url,
            self.events.output_dir.display(),
            self.aggregate.output_dir.display(),
            self.failures.search.url,
            self.failures.search.index,
            self.failures.output_dir.display(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        validate_settings(&settings).unwrap();
        assert_eq!(settings.geo.max_attempts, 3);
        assert_eq!(settings.search.timeout(), Duration::from_secs(300));
        assert!(settings.search.credentials().is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
origin_site = "TEST_ORIGIN"

[events]
split_by_server_type = true
output_dir = "out/events"

[search]
username = "reader"
password = "secret"
"#
        )
        .unwrap();

        let settings = Settings::new(Some(file.path())).unwrap();
        assert_eq!(settings.origin_site, "TEST_ORIGIN");
        assert!(settings.events.split_by_server_type);
        assert_eq!(settings.events.output_dir, PathBuf::from("out/events"));
        assert_eq!(settings.events.page_size, 10_000);
        assert_eq!(settings.search.index, "xrd-stash*");
        let creds = settings.search.credentials().unwrap();
        assert_eq!(creds.username, "reader");
        assert_eq!(creds.password, "secret");
    }

    #[test]
    fn test_blank_scroll_disables_scrolling() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[events]\nscroll = \"\"\n\n[failures]\nscroll = \"5m\"").unwrap();

        let settings = Settings::new(Some(file.path())).unwrap();
        assert_eq!(settings.events.scroll, None);
        assert_eq!(settings.failures.scroll.as_deref(), Some("5m"));
    }

    #[test]
    fn test_partial_failures_search_keeps_transfer_cluster() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[failures.search]\nusername = \"u\"\npassword = \"p\"").unwrap();

        let settings = Settings::new(Some(file.path())).unwrap();
        let search = &settings.failures.search;
        assert_eq!(search.url, "https://elastic.osg.chtc.io/q");
        assert_eq!(search.index, "adstash-ospool-transfer*");
        assert_eq!(search.timeout_secs, 300);
        assert_eq!(search.credentials().unwrap().username, "u");
        assert_eq!(settings.search.url, "https://gracc.opensciencegrid.org/q");
    }

    #[test]
    fn test_environment_overrides() {
        // Keys not asserted by the other tests that load settings.
        unsafe {
            std::env::set_var("NCAR__FILENAME_FILTERS", "ncar,ncar-rda");
            std::env::set_var("NCAR__AGGREGATE__PAGE_SIZE", "250");
        }

        let settings = Settings::new(None::<&Path>);

        unsafe {
            std::env::remove_var("NCAR__FILENAME_FILTERS");
            std::env::remove_var("NCAR__AGGREGATE__PAGE_SIZE");
        }

        let settings = settings.unwrap();
        assert_eq!(settings.filename_filters, ["ncar", "ncar-rda"]);
        assert_eq!(settings.aggregate.page_size, 250);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[search]\nurl = \"gracc.opensciencegrid.org\"").unwrap();
        assert!(Settings::new(Some(file.path())).is_err());
    }
}
