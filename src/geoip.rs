//! Address geolocation with a random fallback
//!
//! Lookups go through an ordered list of sources (an offline MaxMind
//! GeoLite2 database, then an ipinfo-style HTTP service). Each source gets a
//! bounded timeout. When every source fails the address is placed somewhere
//! random so callers always get a usable [`Location`].

use async_trait::async_trait;
use cached::{Cached, TimedSizedCache};
use maxminddb::{geoip2, MaxMindDBError, Reader};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::GeoConfig;
use crate::events::Location;

/// Countries used when a location has to be made up
pub const FALLBACK_COUNTRIES: &[&str] = &["US", "CN", "RU", "DE", "FR", "GB", "BR", "IN", "JP", "KR"];

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("address {0} is not publicly routable")]
    NonPublic(IpAddr),
    #[error("no record for {0}")]
    NotFound(String),
    #[error("record has no coordinates")]
    MissingCoordinates,
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("database error: {0}")]
    Database(#[from] MaxMindDBError),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("lookup timed out after {0:?}")]
    Timeout(Duration),
}

/// A single place to ask where an address is
#[async_trait]
pub trait GeoLookup: Send + Sync {
    fn name(&self) -> &'static str;

    async fn lookup(&self, ip: &str) -> Result<Location, GeoError>;
}

/// Random location in valid coordinate bounds, city and region marked unknown
pub fn random_location() -> Location {
    let mut rng = rand::thread_rng();
    let country = FALLBACK_COUNTRIES.choose(&mut rng).copied().unwrap_or("US");
    Location {
        latitude: rng.gen_range(-90.0..=90.0),
        longitude: rng.gen_range(-180.0..=180.0),
        country: country.to_string(),
        city: Location::UNKNOWN.to_string(),
        region: Location::UNKNOWN.to_string(),
    }
}

/// Resolves addresses through the configured sources, never failing
pub struct GeoResolver {
    sources: Vec<Arc<dyn GeoLookup>>,
    timeout: Duration,
    cache: Mutex<TimedSizedCache<String, Location>>,
}

impl GeoResolver {
    pub fn new(sources: Vec<Arc<dyn GeoLookup>>, config: &GeoConfig) -> Self {
        Self {
            sources,
            timeout: config.timeout(),
            cache: Mutex::new(TimedSizedCache::with_size_and_lifespan(
                config.cache_size.max(1),
                config.cache_ttl_secs,
            )),
        }
    }

    /// Build the source chain from configuration. Missing or broken sources are skipped.
    pub fn from_config(config: &GeoConfig) -> Self {
        let mut sources: Vec<Arc<dyn GeoLookup>> = Vec::new();

        if let Some(path) = &config.database {
            if let Some(db) = MaxMindLookup::open(path) {
                sources.push(Arc::new(db));
            }
        }

        if let Some(endpoint) = &config.endpoint {
            match IpInfoLookup::new(endpoint, config.api_key.clone(), config.timeout()) {
                Ok(api) => {
                    info!("Geo lookup service enabled: {}", endpoint);
                    sources.push(Arc::new(api));
                }
                Err(e) => warn!("Failed to build geo lookup client: {}", e),
            }
        }

        if sources.is_empty() {
            info!("No geolocation sources configured, using random locations");
        }

        Self::new(sources, config)
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Look up `ip`, falling back to [`random_location`] on any failure
    pub async fn resolve(&self, ip: &str) -> Location {
        if let Some(hit) = self.cache.lock().await.cache_get(&ip.to_string()) {
            return hit.clone();
        }

        for source in &self.sources {
            let outcome = match tokio::time::timeout(self.timeout, source.lookup(ip)).await {
                Ok(result) => result,
                Err(_) => Err(GeoError::Timeout(self.timeout)),
            };

            match outcome {
                Ok(location) if location.has_valid_coordinates() => {
                    self.cache.lock().await.cache_set(ip.to_string(), location.clone());
                    return location;
                }
                Ok(_) => debug!("{} returned out-of-range coordinates for {}", source.name(), ip),
                Err(e) => debug!("{} lookup for {} failed: {}", source.name(), ip, e),
            }
        }

        random_location()
    }
}

/// Offline lookups against a MaxMind GeoLite2-City database
pub struct MaxMindLookup {
    reader: Reader<Vec<u8>>,
}

impl MaxMindLookup {
    /// Load the database if it exists, logging why when it can't be used
    pub fn open(database_path: &str) -> Option<Self> {
        let path = Path::new(database_path);

        if !path.exists() {
            warn!("GeoIP database not found at: {}", database_path);
            warn!("Download GeoLite2-City.mmdb from MaxMind and place it at: {}", database_path);
            return None;
        }

        match Reader::open_readfile(path) {
            Ok(reader) => {
                info!("GeoIP database loaded: {}", database_path);
                Some(Self { reader })
            }
            Err(e) => {
                warn!("Failed to load GeoIP database: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl GeoLookup for MaxMindLookup {
    fn name(&self) -> &'static str {
        "maxmind"
    }

    async fn lookup(&self, ip: &str) -> Result<Location, GeoError> {
        let ip_addr: IpAddr = ip.parse().map_err(|_| GeoError::InvalidAddress(ip.to_string()))?;

        if is_private_ip(&ip_addr) {
            return Err(GeoError::NonPublic(ip_addr));
        }

        let city: geoip2::City = self.reader.lookup(ip_addr)?;

        let location = city.location.as_ref().ok_or(GeoError::MissingCoordinates)?;
        let latitude = location.latitude.ok_or(GeoError::MissingCoordinates)?;
        let longitude = location.longitude.ok_or(GeoError::MissingCoordinates)?;

        let country = city
            .country
            .as_ref()
            .and_then(|c| c.iso_code)
            .unwrap_or("XX")
            .to_string();
        let city_name = city
            .city
            .as_ref()
            .and_then(|c| c.names.as_ref())
            .and_then(|names| names.get("en").copied())
            .unwrap_or(Location::UNKNOWN)
            .to_string();
        let region = city
            .subdivisions
            .as_ref()
            .and_then(|subs| subs.first())
            .and_then(|s| s.names.as_ref())
            .and_then(|names| names.get("en").copied())
            .unwrap_or(Location::UNKNOWN)
            .to_string();

        Ok(Location {
            latitude,
            longitude,
            country,
            city: city_name,
            region,
        })
    }
}

/// Check if an IP address is private/local
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_private()
            || ipv4.is_loopback()
            || ipv4.is_link_local()
            || ipv4.is_broadcast()
            || ipv4.is_documentation()
            || ipv4.is_unspecified()
        }
        IpAddr::V6(ipv6) => {
            ipv6.is_loopback()
            || ipv6.is_unspecified()
        }
    }
}

/// HTTP lookups against an ipinfo-compatible service
pub struct IpInfoLookup {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

/// Fields we read from an ipinfo response
#[derive(Debug, Deserialize)]
struct IpInfoResponse {
    loc: Option<String>,
    country: Option<String>,
    city: Option<String>,
    region: Option<String>,
}

impl IpInfoLookup {
    pub fn new(endpoint: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, GeoError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }
}

#[async_trait]
impl GeoLookup for IpInfoLookup {
    fn name(&self) -> &'static str {
        "ipinfo"
    }

    async fn lookup(&self, ip: &str) -> Result<Location, GeoError> {
        let mut request = self.client.get(format!("{}/{}", self.endpoint, ip));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let body: IpInfoResponse = request.send().await?.error_for_status()?.json().await?;
        parse_ipinfo(body)
    }
}

fn parse_ipinfo(body: IpInfoResponse) -> Result<Location, GeoError> {
    let loc = body.loc.ok_or(GeoError::MissingCoordinates)?;
    let (lat, lon) = loc
        .split_once(',')
        .ok_or_else(|| GeoError::Malformed(format!("loc '{}'", loc)))?;
    let latitude: f64 = lat
        .trim()
        .parse()
        .map_err(|_| GeoError::Malformed(format!("latitude '{}'", lat)))?;
    let longitude: f64 = lon
        .trim()
        .parse()
        .map_err(|_| GeoError::Malformed(format!("longitude '{}'", lon)))?;

    let location = Location {
        latitude,
        longitude,
        country: body.country.ok_or_else(|| GeoError::NotFound("country".to_string()))?,
        city: body.city.unwrap_or_else(|| Location::UNKNOWN.to_string()),
        region: body.region.unwrap_or_else(|| Location::UNKNOWN.to_string()),
    };

    if !location.has_valid_coordinates() {
        return Err(GeoError::Malformed(format!("coordinates out of range: {}", loc)));
    }
    Ok(location)
}
