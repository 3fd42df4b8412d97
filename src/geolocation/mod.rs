//! Source-IP geolocation using the MaxMind GeoLite2 database
//!
//! Events carry the source address reported by the cloud provider; resolving
//! it to coordinates lets the impossible-source-travel rule reason about
//! velocity between consecutive sightings of an identity. The GeoLite2-City
//! database must be downloaded separately from MaxMind (free with
//! registration).

use maxminddb::{geoip2, Reader};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Geographic coordinates resolved from a source IP
#[derive(Debug, Clone, Copy)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
}

/// Resolver seam for source-IP coordinates
///
/// The engine's travel rule only needs coordinates, so tests can substitute
/// a fixed table instead of shipping an mmdb file.
pub trait GeoResolver: Send + Sync {
    /// Resolve an IP to coordinates, or None if it cannot be located
    fn resolve(&self, ip: &IpAddr) -> Option<GeoLocation>;
}

/// Errors that can occur during geolocation lookups
#[derive(Error, Debug)]
pub enum GeoError {
    #[error("Failed to open database: {0}")]
    DatabaseOpen(#[from] maxminddb::MaxMindDBError),

    #[error("IP address not found in database")]
    NotFound,

    #[error("Location data missing for IP address")]
    NoLocation,

    #[error("Database file not found: {0}")]
    FileNotFound(String),
}

/// GeoIP lookup service backed by a MaxMind GeoLite2-City database
///
/// # Example
///
/// ```ignore
/// use cloudguard::geolocation::{GeoIpService, GeoResolver};
/// use std::net::IpAddr;
/// use std::str::FromStr;
///
/// let service = GeoIpService::new("GeoLite2-City.mmdb")?;
/// let ip = IpAddr::from_str("8.8.8.8").unwrap();
/// if let Some(location) = service.resolve(&ip) {
///     println!("Location: {}, {}", location.latitude, location.longitude);
/// }
/// ```
pub struct GeoIpService {
    reader: Arc<Reader<Vec<u8>>>,
}

impl GeoIpService {
    /// Open a GeoLite2-City.mmdb database file
    ///
    /// # Errors
    ///
    /// Returns an error if the database file is missing or invalid.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, GeoError> {
        let path = db_path.as_ref();
        if !path.exists() {
            return Err(GeoError::FileNotFound(path.display().to_string()));
        }

        let reader = Reader::open_readfile(path)?;
        Ok(GeoIpService {
            reader: Arc::new(reader),
        })
    }

    /// Look up the geographic location of an IP address
    pub fn lookup(&self, ip: &IpAddr) -> Result<GeoLocation, GeoError> {
        let city: geoip2::City = self.reader.lookup(*ip).map_err(|e| match e {
            maxminddb::MaxMindDBError::AddressNotFoundError(_) => GeoError::NotFound,
            other => GeoError::DatabaseOpen(other),
        })?;

        let location = city.location.ok_or(GeoError::NoLocation)?;
        let latitude = location.latitude.ok_or(GeoError::NoLocation)?;
        let longitude = location.longitude.ok_or(GeoError::NoLocation)?;

        Ok(GeoLocation {
            latitude,
            longitude,
        })
    }
}

impl GeoResolver for GeoIpService {
    fn resolve(&self, ip: &IpAddr) -> Option<GeoLocation> {
        self.lookup(ip).ok()
    }
}

impl Clone for GeoIpService {
    fn clone(&self) -> Self {
        GeoIpService {
            reader: Arc::clone(&self.reader),
        }
    }
}

/// Great-circle distance between two points via the Haversine formula,
/// in kilometers
pub fn haversine_distance(loc1: GeoLocation, loc2: GeoLocation) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;

    let lat1_rad = loc1.latitude.to_radians();
    let lat2_rad = loc2.latitude.to_radians();
    let delta_lat = (loc2.latitude - loc1.latitude).to_radians();
    let delta_lon = (loc2.longitude - loc1.longitude).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::str::FromStr;

    #[test]
    fn test_file_not_found() {
        let result = GeoIpService::new("nonexistent.mmdb");
        assert!(matches!(result, Err(GeoError::FileNotFound(_))));
    }

    #[test]
    fn test_haversine_distance() {
        // New York to Los Angeles: ~3944 km
        let nyc = GeoLocation { latitude: 40.7128, longitude: -74.0060 };
        let la = GeoLocation { latitude: 34.0522, longitude: -118.2437 };
        let distance = haversine_distance(nyc, la);
        assert!((distance - 3944.0).abs() < 50.0, "NYC to LA should be ~3944 km, got {}", distance);
    }

    #[test]
    fn test_haversine_zero_distance() {
        let point = GeoLocation { latitude: 51.5074, longitude: -0.1278 };
        assert!(haversine_distance(point, point) < 0.001);
    }

    /// Table-backed resolver used across the engine tests
    pub struct StaticResolver {
        table: HashMap<IpAddr, GeoLocation>,
    }

    impl StaticResolver {
        pub fn new(entries: &[(&str, f64, f64)]) -> Self {
            let table = entries
                .iter()
                .map(|(ip, lat, lon)| {
                    (
                        IpAddr::from_str(ip).unwrap(),
                        GeoLocation { latitude: *lat, longitude: *lon },
                    )
                })
                .collect();
            StaticResolver { table }
        }
    }

    impl GeoResolver for StaticResolver {
        fn resolve(&self, ip: &IpAddr) -> Option<GeoLocation> {
            self.table.get(ip).copied()
        }
    }

    #[test]
    fn test_static_resolver() {
        let resolver = StaticResolver::new(&[("8.8.8.8", 37.4, -122.0)]);
        let hit = resolver.resolve(&IpAddr::from_str("8.8.8.8").unwrap());
        assert!(hit.is_some());
        assert!(resolver.resolve(&IpAddr::from_str("1.1.1.1").unwrap()).is_none());
    }
}
