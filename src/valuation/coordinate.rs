use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

/// `<lng>,<lat>` with optional sign and fraction, nothing else.
static LOCATION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(-?\d+(?:\.\d+)?),(-?\d+(?:\.\d+)?)$")
        .expect("Failed to compile location regex")
});

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoordinateError {
    #[error("parameter is empty")]
    Empty,

    #[error("malformed location '{0}', expected <lng>,<lat>")]
    Malformed(String),

    #[error("longitude/latitude out of range")]
    OutOfRange,
}

/// A WGS-84 style longitude/latitude pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub lng: f64,
    pub lat: f64,
}

impl Coordinate {
    pub fn new(lng: f64, lat: f64) -> Result<Self, CoordinateError> {
        if !lng.is_finite()
            || !lat.is_finite()
            || !(-180.0..=180.0).contains(&lng)
            || !(-90.0..=90.0).contains(&lat)
        {
            return Err(CoordinateError::OutOfRange);
        }
        Ok(Self { lng, lat })
    }

    /// Parse the `location` query parameter.
    pub fn parse(raw: &str) -> Result<Self, CoordinateError> {
        if raw.is_empty() {
            return Err(CoordinateError::Empty);
        }
        let captures = LOCATION_PATTERN
            .captures(raw)
            .ok_or_else(|| CoordinateError::Malformed(raw.to_string()))?;

        let parse = |index: usize| -> Result<f64, CoordinateError> {
            captures
                .get(index)
                .and_then(|m| m.as_str().parse::<f64>().ok())
                .ok_or_else(|| CoordinateError::Malformed(raw.to_string()))
        };
        Self::new(parse(1)?, parse(2)?)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.lng, self.lat)
    }
}
