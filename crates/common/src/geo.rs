//! Capture geolocation
//!
//! The mobile client sends location as a comma-separated "lng,lat" string.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// A WGS84 point, longitude first (matches the client wire format)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64) -> Result<Self> {
        if !(-180.0..=180.0).contains(&longitude) || !longitude.is_finite() {
            return Err(Error::Validation(format!(
                "longitude {} out of range [-180, 180]",
                longitude
            )));
        }
        if !(-90.0..=90.0).contains(&latitude) || !latitude.is_finite() {
            return Err(Error::Validation(format!(
                "latitude {} out of range [-90, 90]",
                latitude
            )));
        }
        Ok(Self {
            longitude,
            latitude,
        })
    }

    /// Parse the client's "lng,lat" form
    pub fn parse(location: &str) -> Result<Self> {
        let parts: Vec<&str> = location.split(',').map(str::trim).collect();
        if parts.len() != 2 {
            return Err(Error::Validation(format!(
                "location must be \"lng,lat\", got {:?}",
                location
            )));
        }

        let longitude: f64 = parts[0]
            .parse()
            .map_err(|_| Error::Validation(format!("invalid longitude: {:?}", parts[0])))?;
        let latitude: f64 = parts[1]
            .parse()
            .map_err(|_| Error::Validation(format!("invalid latitude: {:?}", parts[1])))?;

        Self::new(longitude, latitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_location() {
        let point = GeoPoint::parse("75.8577,22.7196").unwrap();
        assert_eq!(point.longitude, 75.8577);
        assert_eq!(point.latitude, 22.7196);
    }

    #[test]
    fn test_parse_with_whitespace() {
        let point = GeoPoint::parse(" 75.8577 , 22.7196 ").unwrap();
        assert_eq!(point.longitude, 75.8577);
    }

    #[test]
    fn test_longitude_out_of_range() {
        let err = GeoPoint::parse("200,22").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_latitude_out_of_range() {
        assert!(GeoPoint::parse("75,-91").is_err());
    }

    #[test]
    fn test_wrong_component_count() {
        assert!(GeoPoint::parse("75.8577").is_err());
        assert!(GeoPoint::parse("75,22,13").is_err());
        assert!(GeoPoint::parse("").is_err());
    }

    #[test]
    fn test_non_numeric_components() {
        assert!(GeoPoint::parse("abc,22").is_err());
        assert!(GeoPoint::parse("75,def").is_err());
    }
}
