use async_trait::async_trait;
use backon::{ConstantBuilder, Retryable};
use mockall::automock;
use serde::Deserialize;
use std::{collections::HashMap, time::Duration};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("geo directory request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("geo directory returned status {0}")]
    Status(u16),
}

/// One entry of the server directory listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerLocation {
    pub name: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

#[automock]
#[async_trait]
pub trait GeoDirectory {
    async fn fetch_servers(&self) -> Result<Vec<ServerLocation>, GeoError>;
}

pub struct HttpGeoDirectory {
    http: reqwest::Client,
    url: String,
}

impl HttpGeoDirectory {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, GeoError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl GeoDirectory for HttpGeoDirectory {
    async fn fetch_servers(&self) -> Result<Vec<ServerLocation>, GeoError> {
        let response = self.http.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GeoError::Status(status.as_u16()));
        }
        Ok(response.json().await?)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Server or site name to coordinates. Misses resolve to `(0, 0)`.
#[derive(Debug, Clone, Default)]
pub struct ServerGeoTable {
    entries: HashMap<String, GeoPoint>,
}

impl ServerGeoTable {
    /// Entries without both coordinates are dropped.
    pub fn from_locations(locations: Vec<ServerLocation>) -> Self {
        locations
            .into_iter()
            .filter_map(|location| match (location.latitude, location.longitude) {
                (Some(latitude), Some(longitude)) => {
                    Some((location.name, GeoPoint::new(latitude, longitude)))
                }
                _ => None,
            })
            .collect()
    }

    pub fn lookup(&self, name: &str) -> GeoPoint {
        self.entries.get(name).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, GeoPoint)> for ServerGeoTable {
    fn from_iter<I: IntoIterator<Item = (String, GeoPoint)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Fetch the directory with up to `max_attempts` tries spaced by `delay`.
/// Exhausted retries degrade to an empty table rather than an error.
pub async fn load_server_geo<D: GeoDirectory + ?Sized>(
    directory: &D,
    max_attempts: usize,
    delay: Duration,
) -> ServerGeoTable {
    let backoff = ConstantBuilder::default()
        .with_delay(delay)
        .with_max_times(max_attempts.saturating_sub(1));

    let fetched = (|| async { directory.fetch_servers().await })
        .retry(backoff)
        .notify(|err: &GeoError, dur: Duration| {
            warn!("geo directory fetch failed, retrying in {:?}: {}", dur, err);
        })
        .await;

    match fetched {
        Ok(locations) => {
            let table = ServerGeoTable::from_locations(locations);
            info!(servers = table.len(), "loaded server locations");
            table
        }
        Err(err) => {
            warn!(
                error = %err,
                attempts = max_attempts,
                "geo directory unavailable, using default coordinates"
            );
            ServerGeoTable::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(name: &str, latitude: Option<f64>, longitude: Option<f64>) -> ServerLocation {
        ServerLocation {
            name: name.to_string(),
            latitude,
            longitude,
        }
    }

    #[tokio::test]
    async fn test_load_server_geo() {
        let mut directory = MockGeoDirectory::new();
        directory.expect_fetch_servers().times(1).returning(|| {
            Ok(vec![
                location("NCAR_OSDF_ORIGIN", Some(39.97), Some(-105.27)),
                location("NO_COORDS", None, Some(1.0)),
            ])
        });

        let table = load_server_geo(&directory, 3, Duration::ZERO).await;
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup("NCAR_OSDF_ORIGIN"), GeoPoint::new(39.97, -105.27));
        assert_eq!(table.lookup("NO_COORDS"), GeoPoint::default());
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let mut directory = MockGeoDirectory::new();
        let mut seq = mockall::Sequence::new();
        directory
            .expect_fetch_servers()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|| Err(GeoError::Status(503)));
        directory
            .expect_fetch_servers()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(vec![location("A", Some(1.0), Some(2.0))]));

        let table = load_server_geo(&directory, 3, Duration::from_millis(1)).await;
        assert_eq!(table.lookup("A"), GeoPoint::new(1.0, 2.0));
    }

    #[tokio::test]
    async fn test_gives_up_after_three_attempts() {
        let mut directory = MockGeoDirectory::new();
        directory
            .expect_fetch_servers()
            .times(3)
            .returning(|| Err(GeoError::Status(502)));

        let table = load_server_geo(&directory, 3, Duration::from_millis(1)).await;
        assert!(table.is_empty());
        assert_eq!(table.lookup("anything"), GeoPoint::default());
    }

    #[test]
    fn test_decode_directory_listing() {
        let locations: Vec<ServerLocation> = serde_json::from_str(
            r#"[{"name": "SDSC_CACHE", "latitude": 32.88, "longitude": -117.24, "type": "Cache"},
                {"name": "NEW_SERVER"}]"#,
        )
        .unwrap();
        let table = ServerGeoTable::from_locations(locations);
        assert_eq!(table.lookup("SDSC_CACHE"), GeoPoint::new(32.88, -117.24));
        assert_eq!(table.len(), 1);
    }
}
