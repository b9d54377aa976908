//! GPS metadata and reverse geocoding for conclusion records.
//!
//! Geocoding only enriches records. A resolver failure leaves the region
//! empty and never changes a verdict.

use anyhow::{anyhow, Context, Result};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GpsPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GpsPoint {
    /// Parses the report's `"lat lon"` form (whitespace separated).
    pub fn parse(value: &str) -> Result<Self> {
        let mut parts = value.split_whitespace();
        let (Some(lat), Some(lon), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(anyhow!("gps info must be \"<lat> <lon>\", got {:?}", value));
        };
        let lat: f64 = lat
            .parse()
            .with_context(|| format!("invalid latitude {:?}", lat))?;
        let lon: f64 = lon
            .parse()
            .with_context(|| format!("invalid longitude {:?}", lon))?;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(anyhow!("gps point {} {} out of range", lat, lon));
        }
        Ok(Self { lat, lon })
    }
}

impl std::fmt::Display for GpsPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.lat, self.lon)
    }
}

/// Reverse geocoder: coordinates to a human-readable address.
pub trait GeoResolver: Send {
    fn name(&self) -> &'static str;

    fn resolve(&mut self, point: GpsPoint) -> Result<String>;
}

/// Returns the same address for every point.
pub struct StaticGeoResolver {
    address: String,
}

impl StaticGeoResolver {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl GeoResolver for StaticGeoResolver {
    fn name(&self) -> &'static str {
        "static"
    }

    fn resolve(&mut self, _point: GpsPoint) -> Result<String> {
        Ok(self.address.clone())
    }
}

#[cfg(feature = "geocode-vworld")]
pub use vworld::VworldGeoResolver;

#[cfg(feature = "geocode-vworld")]
mod vworld {
    use anyhow::{anyhow, Context, Result};

    use super::{GeoResolver, GpsPoint};

    const VWORLD_ADDRESS_URL: &str = "https://api.vworld.kr/req/address";

    /// VWorld parcel-address lookup.
    pub struct VworldGeoResolver {
        api_key: String,
    }

    impl VworldGeoResolver {
        pub fn new(api_key: impl Into<String>) -> Self {
            Self {
                api_key: api_key.into(),
            }
        }
    }

    impl GeoResolver for VworldGeoResolver {
        fn name(&self) -> &'static str {
            "vworld"
        }

        fn resolve(&mut self, point: GpsPoint) -> Result<String> {
            let body = ureq::get(VWORLD_ADDRESS_URL)
                .query("service", "address")
                .query("request", "getAddress")
                .query("version", "2.0")
                .query("crs", "epsg:4326")
                .query("point", &format!("{},{}", point.lon, point.lat))
                .query("format", "json")
                .query("type", "parcel")
                .query("key", &self.api_key)
                .call()
                .context("vworld address request")?
                .into_string()
                .context("read vworld response")?;
            parse_address(&body)
        }
    }

    pub(super) fn parse_address(body: &str) -> Result<String> {
        let value: serde_json::Value =
            serde_json::from_str(body).context("invalid vworld response")?;
        let response = &value["response"];
        if response["status"] != "OK" {
            return Err(anyhow!(
                "vworld lookup failed with status {}",
                response["status"]
            ));
        }
        response["result"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("vworld response has no address text"))
    }
}
