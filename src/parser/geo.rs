use crate::parser::record::{Isp, Location};
use maxminddb::{geoip2, Reader};
use std::net::IpAddr;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("failed to open geoip database: {0}")]
    Open(#[from] maxminddb::MaxMindDBError),
}

/// Geographic and provider data for one client address. Fields the database
/// cannot answer fall back to `unknown` names, empty codes, and `0,0`
/// coordinates, so a lookup never rejects a record.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoInfo {
    pub city: String,
    pub country: Location,
    pub continent: Location,
    pub isp: Isp,
    pub coordinates: String,
}

impl Default for GeoInfo {
    fn default() -> Self {
        Self {
            city: "unknown".to_string(),
            country: Location {
                iso_code: String::new(),
                name: "unknown".to_string(),
            },
            continent: Location {
                iso_code: String::new(),
                name: "unknown".to_string(),
            },
            isp: Isp::default(),
            coordinates: "0,0".to_string(),
        }
    }
}

/// Interface the parser consumes for address enrichment.
pub trait GeoLookup: Send + Sync {
    fn lookup(&self, ip: &str) -> GeoInfo;
}

/// City and ISP lookups over a MaxMind database file.
pub struct GeoResolver {
    reader: Reader<Vec<u8>>,
}

impl GeoResolver {
    /// Open the database file. A missing or corrupt database is fatal at
    /// startup; lookups afterwards are infallible.
    pub fn open(path: &Path) -> Result<Self, GeoError> {
        Ok(Self {
            reader: Reader::open_readfile(path)?,
        })
    }
}

impl GeoLookup for GeoResolver {
    fn lookup(&self, ip: &str) -> GeoInfo {
        let Ok(addr) = ip.parse::<IpAddr>() else {
            return GeoInfo::default();
        };

        let mut info = GeoInfo::default();

        if let Ok(city) = self.reader.lookup::<geoip2::City>(addr) {
            if let Some(name) = city
                .city
                .as_ref()
                .and_then(|c| c.names.as_ref())
                .and_then(|names| names.get("en"))
            {
                info.city = (*name).to_string();
            }
            if let Some(country) = city.country.as_ref() {
                info.country.iso_code = country.iso_code.unwrap_or_default().to_string();
                if let Some(name) = country.names.as_ref().and_then(|names| names.get("en")) {
                    info.country.name = (*name).to_string();
                }
            }
            if let Some(continent) = city.continent.as_ref() {
                info.continent.iso_code = continent.code.unwrap_or_default().to_string();
                if let Some(name) = continent.names.as_ref().and_then(|names| names.get("en")) {
                    info.continent.name = (*name).to_string();
                }
            }
            if let Some(location) = city.location.as_ref() {
                info.coordinates = format!(
                    "{},{}",
                    location.latitude.unwrap_or_default(),
                    location.longitude.unwrap_or_default()
                );
            }
        }

        if let Ok(isp) = self.reader.lookup::<geoip2::Isp>(addr) {
            info.isp.name = isp.isp.unwrap_or_default().to_string();
            info.isp.organization = isp.organization.unwrap_or_default().to_string();
        }

        info
    }
}
