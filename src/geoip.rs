//! GeoIP enrichment
//!
//! Country names for IP addresses using a MaxMind GeoLite2/GeoIP2 country
//! database. Lookups never fail: anything without a country name resolves
//! to [`UNRECOGNIZED`]. Results are cached for a bounded time.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use maxminddb::{geoip2, Reader};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Country name reported when a lookup has no answer
pub const UNRECOGNIZED: &str = "Unrecognized";

/// Errors that can occur during GeoIP operations
#[derive(Error, Debug)]
pub enum GeoIpError {
    #[error("Failed to open GeoIP database: {0}")]
    DatabaseOpen(#[from] maxminddb::MaxMindDBError),

    #[error("Database file not found: {0}")]
    NotFound(String),
}

/// Resolves an IP address to a country name
pub trait CountryLookup: Send + Sync {
    fn country_for_ip(&self, ip: IpAddr) -> String;
}

/// GeoIP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoIpConfig {
    /// Path to a `GeoLite2-Country.mmdb` file; no database means every
    /// address is unrecognized
    pub database: Option<PathBuf>,

    /// Maximum cached addresses
    pub cache_size: usize,

    /// Cache entry lifetime (seconds)
    pub cache_ttl: u64,
}

impl Default for GeoIpConfig {
    fn default() -> Self {
        Self {
            database: None,
            cache_size: 1000,
            cache_ttl: 3600,
        }
    }
}

struct CacheEntry {
    country: String,
    inserted: Instant,
}

/// MaxMind-backed country resolver with a TTL cache
pub struct GeoIpResolver {
    reader: Option<Reader<Vec<u8>>>,
    cache: Mutex<HashMap<IpAddr, CacheEntry>>,
    cache_size: usize,
    cache_ttl: Duration,
}

impl Default for GeoIpResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl GeoIpResolver {
    /// Resolver without a database
    pub fn new() -> Self {
        let defaults = GeoIpConfig::default();
        Self {
            reader: None,
            cache: Mutex::new(HashMap::new()),
            cache_size: defaults.cache_size,
            cache_ttl: Duration::from_secs(defaults.cache_ttl),
        }
    }

    pub fn from_config(config: &GeoIpConfig) -> Result<Self, GeoIpError> {
        let mut resolver = Self {
            cache_size: config.cache_size.max(1),
            cache_ttl: Duration::from_secs(config.cache_ttl),
            ..Self::new()
        };
        if let Some(path) = &config.database {
            resolver = resolver.load_database(path)?;
        }
        Ok(resolver)
    }

    /// Load a MaxMind GeoIP2 country database
    pub fn load_database<P: AsRef<Path>>(mut self, path: P) -> Result<Self, GeoIpError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(GeoIpError::NotFound(path.display().to_string()));
        }

        let reader = Reader::open_readfile(path)?;
        info!("Loaded GeoIP database {}", path.display());
        self.reader = Some(reader);
        self.cache.lock().clear();
        Ok(self)
    }

    pub fn has_database(&self) -> bool {
        self.reader.is_some()
    }

    /// Uncached English country name lookup
    pub fn lookup_name(&self, ip: IpAddr) -> Option<String> {
        let reader = self.reader.as_ref()?;

        let result: Result<geoip2::Country, _> = reader.lookup(ip);
        let country = match result {
            Ok(country) => country,
            Err(e) => {
                debug!("GeoIP lookup for {} failed: {}", ip, e);
                return None;
            }
        };

        country
            .country?
            .names?
            .get("en")
            .map(|s| s.to_string())
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.lock().len()
    }
}

impl CountryLookup for GeoIpResolver {
    fn country_for_ip(&self, ip: IpAddr) -> String {
        let now = Instant::now();
        {
            let cache = self.cache.lock();
            if let Some(entry) = cache.get(&ip) {
                if now.duration_since(entry.inserted) < self.cache_ttl {
                    return entry.country.clone();
                }
            }
        }

        let country = self.lookup_name(ip).unwrap_or_else(|| UNRECOGNIZED.to_string());

        let mut cache = self.cache.lock();
        if cache.len() >= self.cache_size && !cache.contains_key(&ip) {
            cache.retain(|_, e| now.duration_since(e.inserted) < self.cache_ttl);
            if cache.len() >= self.cache_size {
                let oldest = cache
                    .iter()
                    .min_by_key(|(_, e)| e.inserted)
                    .map(|(ip, _)| *ip);
                if let Some(oldest) = oldest {
                    cache.remove(&oldest);
                }
            }
        }
        cache.insert(ip, CacheEntry {
            country: country.clone(),
            inserted: now,
        });
        country
    }
}

/// Fixed address-to-country map; unknown addresses are unrecognized
#[derive(Debug, Clone, Default)]
pub struct StaticCountries {
    countries: HashMap<IpAddr, String>,
}

impl StaticCountries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, ip: IpAddr, country: &str) -> Self {
        self.countries.insert(ip, country.to_string());
        self
    }
}

impl CountryLookup for StaticCountries {
    fn country_for_ip(&self, ip: IpAddr) -> String {
        self.countries
            .get(&ip)
            .cloned()
            .unwrap_or_else(|| UNRECOGNIZED.to_string())
    }
}
