//! Map/geocoding provider client (AMap web service API).

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use super::{ExternalDependencyError, ExternalGateway};
use crate::valuation::Coordinate;

/// A point of interest returned by a place-around lookup.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Poi {
    #[serde(default)]
    pub name: String,
    /// Distance from the query location in metres, as sent by the provider.
    #[serde(default)]
    pub distance: String,
}

impl Poi {
    pub fn distance_meters(&self) -> Option<f64> {
        self.distance.trim().parse::<f64>().ok().filter(|d| d.is_finite() && *d >= 0.0)
    }
}

/// Parameters of a place-around lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceQuery {
    pub location: Coordinate,
    pub keywords: Option<String>,
    pub types: Option<String>,
    pub radius_m: Option<u32>,
}

impl PlaceQuery {
    pub fn keywords(location: Coordinate, keywords: impl Into<String>) -> Self {
        Self {
            location,
            keywords: Some(keywords.into()),
            types: None,
            radius_m: None,
        }
    }

    pub fn types(location: Coordinate, types: impl Into<String>, radius_m: u32) -> Self {
        Self {
            location,
            keywords: None,
            types: Some(types.into()),
            radius_m: Some(radius_m),
        }
    }
}

/// Geocoding and points-of-interest lookups.
#[async_trait::async_trait]
pub trait GeoProvider: Send + Sync {
    async fn place_around(&self, query: PlaceQuery) -> Result<Vec<Poi>, ExternalDependencyError>;

    /// Formatted street address of a coordinate.
    async fn reverse_geocode(&self, location: Coordinate) -> Result<String, ExternalDependencyError>;
}

#[derive(Debug, Deserialize)]
struct PlaceAroundResponse {
    status: String,
    #[serde(default)]
    info: String,
    #[serde(default)]
    pois: Vec<Poi>,
}

#[derive(Debug, Deserialize)]
struct RegeoResponse {
    status: String,
    #[serde(default)]
    info: String,
    regeocode: Option<Regeocode>,
}

#[derive(Debug, Deserialize)]
struct Regeocode {
    // The provider sends `[]` instead of a string when no address is known.
    #[serde(default)]
    formatted_address: Value,
}

/// AMap web service client.
#[derive(Debug, Clone)]
pub struct AmapClient {
    gateway: ExternalGateway,
    base_url: String,
    key: String,
    timeout: Duration,
}

impl AmapClient {
    pub fn new(
        gateway: ExternalGateway,
        base_url: impl Into<String>,
        key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key: key.into(),
            timeout,
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.gateway
            .client()
            .get(format!("{}{}", self.base_url, path))
            .query(&[("key", self.key.as_str())])
    }
}

/// Providers report logical failures in-band with `status != "1"`.
fn ensure_ok(operation: &str, status: &str, info: &str) -> Result<(), ExternalDependencyError> {
    if status == "1" {
        Ok(())
    } else if info.is_empty() {
        Err(ExternalDependencyError::rejected(operation, "request error"))
    } else {
        Err(ExternalDependencyError::rejected(operation, info))
    }
}

#[async_trait::async_trait]
impl GeoProvider for AmapClient {
    async fn place_around(&self, query: PlaceQuery) -> Result<Vec<Poi>, ExternalDependencyError> {
        const OPERATION: &str = "amap.place_around";

        let mut params: Vec<(&str, String)> = vec![("location", query.location.to_string())];
        if let Some(keywords) = query.keywords {
            params.push(("keywords", keywords));
        }
        if let Some(types) = query.types {
            params.push(("types", types));
        }
        if let Some(radius) = query.radius_m {
            params.push(("radius", radius.to_string()));
        }

        let request = self.get("/v3/place/around").query(&params);
        let response: PlaceAroundResponse =
            self.gateway.call(OPERATION, request, self.timeout).await?;
        ensure_ok(OPERATION, &response.status, &response.info)?;
        Ok(response.pois)
    }

    async fn reverse_geocode(&self, location: Coordinate) -> Result<String, ExternalDependencyError> {
        const OPERATION: &str = "amap.regeo";

        let request = self
            .get("/v3/geocode/regeo")
            .query(&[("location", location.to_string())]);
        let response: RegeoResponse = self.gateway.call(OPERATION, request, self.timeout).await?;
        ensure_ok(OPERATION, &response.status, &response.info)?;

        let regeocode = response
            .regeocode
            .ok_or_else(|| ExternalDependencyError::payload(OPERATION, "missing regeocode"))?;
        Ok(regeocode
            .formatted_address
            .as_str()
            .unwrap_or_default()
            .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::DependencyFailure;

    #[test]
    fn poi_distance_parses_metre_strings() {
        let poi = Poi {
            name: "Stop".into(),
            distance: "235".into(),
        };
        assert_eq!(poi.distance_meters(), Some(235.0));

        let broken = Poi {
            name: "Stop".into(),
            distance: "n/a".into(),
        };
        assert_eq!(broken.distance_meters(), None);
    }

    #[test]
    fn non_one_status_is_a_rejection_carrying_info() {
        let err = ensure_ok("amap.regeo", "0", "INVALID_USER_KEY").unwrap_err();
        assert_eq!(
            err.cause,
            DependencyFailure::Rejected("INVALID_USER_KEY".into())
        );
        assert!(ensure_ok("amap.regeo", "1", "OK").is_ok());
    }

    #[test]
    fn regeo_payload_tolerates_array_address() {
        let payload: RegeoResponse = serde_json::from_str(
            r#"{"status":"1","info":"OK","regeocode":{"formatted_address":[]}}"#,
        )
        .unwrap();
        let address = payload.regeocode.unwrap().formatted_address;
        assert_eq!(address.as_str().unwrap_or_default(), "");
    }

    #[test]
    fn place_around_payload_decodes_pois() {
        let payload: PlaceAroundResponse = serde_json::from_str(
            r#"{"status":"1","info":"OK","pois":[{"name":"West Lake Stop","distance":"120","id":"B0"}]}"#,
        )
        .unwrap();
        assert_eq!(payload.pois.len(), 1);
        assert_eq!(payload.pois[0].distance_meters(), Some(120.0));
    }
}
