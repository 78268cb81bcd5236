use crate::geo::{GeoPoint, ServerGeoTable};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;

/// Placeholder written for any field the source document lacks.
pub const NOT_AVAILABLE: &str = "N/A";

/// Operation time written when the source document has none.
pub const NO_OPERATION_TIME: &str = "-1";

/// App-info substrings identifying Pelican or Python clients.
const KNOWN_CLIENTS: [&str; 2] = ["xrdcl-pelican", "python"];

/// Accept any JSON scalar as text; `null` counts as absent.
pub(crate) fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// `_source` of an access event as stored in the index.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawHit {
    #[serde(rename = "@timestamp", deserialize_with = "lenient_text")]
    pub timestamp: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub filename: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub site: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub host: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub server: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub read: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub write: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub operation_time: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub appinfo: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerType {
    Origin,
    Cache,
    Unknown,
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Origin => write!(f, "origin"),
            Self::Cache => write!(f, "cache"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Textual cleanup of a host field.
///
/// Strips one leading `[`, one trailing `]` and then one leading `::`, each
/// independently, so `[::ffff:1.2.3.4]` becomes `ffff:1.2.3.4`. This is not
/// an address parser: a lone `[` or `]` is stripped even if its partner is
/// missing. Absent input, or input that is empty after stripping, yields
/// [`NOT_AVAILABLE`].
pub fn ipv_cleanup(host: Option<&str>) -> String {
    let Some(host) = host else {
        return NOT_AVAILABLE.to_string();
    };

    let host = host.strip_prefix('[').unwrap_or(host);
    let host = host.strip_suffix(']').unwrap_or(host);
    let host = host.strip_prefix("::").unwrap_or(host);

    if host.is_empty() {
        NOT_AVAILABLE.to_string()
    } else {
        host.to_string()
    }
}

pub fn determine_server_type(site: Option<&str>, origin_site: &str) -> ServerType {
    match site {
        None | Some("") | Some(NOT_AVAILABLE) => ServerType::Unknown,
        Some(site) if site == origin_site => ServerType::Origin,
        Some(_) => ServerType::Cache,
    }
}

pub fn is_pelican_or_python(app_info: &str) -> bool {
    KNOWN_CLIENTS.iter().any(|client| app_info.contains(client))
}

/// A normalized access event, rendered as one report line by `Display`.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp: String,
    pub object_name: String,
    pub site: String,
    pub host: String,
    pub server: String,
    pub server_type: ServerType,
    pub location: GeoPoint,
    pub app_info: String,
    pub pelican_client: bool,
    pub read: String,
    pub write: String,
    pub operation_time: String,
}

impl LogRecord {
    /// Never fails: absent fields fall back to [`NOT_AVAILABLE`], unknown
    /// servers to `(0, 0)`.
    pub fn normalize(raw: RawHit, origin_site: &str, geo: &ServerGeoTable) -> Self {
        let server_type = determine_server_type(raw.site.as_deref(), origin_site);
        let location = raw
            .site
            .as_deref()
            .or(raw.server.as_deref())
            .map(|name| geo.lookup(name))
            .unwrap_or_default();
        let app_info = raw.appinfo.unwrap_or_else(|| NOT_AVAILABLE.to_string());

        Self {
            timestamp: or_not_available(raw.timestamp),
            object_name: or_not_available(raw.filename),
            site: or_not_available(raw.site),
            host: ipv_cleanup(raw.host.as_deref()),
            server: or_not_available(raw.server),
            server_type,
            location,
            pelican_client: is_pelican_or_python(&app_info),
            app_info,
            read: or_not_available(raw.read),
            write: or_not_available(raw.write),
            operation_time: raw
                .operation_time
                .unwrap_or_else(|| NO_OPERATION_TIME.to_string()),
        }
    }
}

fn or_not_available(value: Option<String>) -> String {
    value.unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] [Objectname:{}] [Site:{}] [Host:{}] [Server:{}] [ServerType:{}] \
             [Latitude:{}] [Longitude:{}] [AppInfo:{}] [PelicanClient:{}] \
             [Read:{}] [Write:{}] [OpTime:{}s]",
            self.timestamp,
            self.object_name,
            self.site,
            self.host,
            self.server,
            self.server_type,
            self.location.latitude,
            self.location.longitude,
            self.app_info,
            if self.pelican_client { "True" } else { "False" },
            self.read,
            self.write,
            self.operation_time,
        )
    }
}
