//! Shop site valuation pipeline.
//!
//! A [`ValuationRecord`] merges real lookups from the map provider (address,
//! nearest transit, optionally nearby services) with synthetic placeholders
//! for fields that have no data source yet. Any downstream failure fails the
//! whole assessment; a record is never returned with silently defaulted
//! real-data fields.

pub mod coordinate;

use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

pub use coordinate::{Coordinate, CoordinateError};

use crate::gateway::{
    ChatPrompt, CompletionProvider, CompletionStream, ExternalDependencyError, GeoProvider,
    PlaceQuery, Poi,
};

// Provider keyword searches for transit stops (bus stop, metro station).
const BUS_STOP_KEYWORDS: &str = "公交站";
const METRO_STATION_KEYWORDS: &str = "地铁站";

const FOOT_TRAFFIC_LEVELS: [u32; 3] = [1, 10, 100];

const NEARBY_PEOPLE_PROFILES: [&str; 12] = [
    "Morning commuters: office workers aged 25-38 leaving metro and bus stops between 7:30 and 9:30; want premium coffee, portable breakfast and sub-30-second checkout.",
    "Parents with young children: aged 28-35 with kids aged 3-8, present during 15:00-17:00 school pickup; want healthy snacks, children's classes and baby goods.",
    "Late-night students: aged 18-24, active 20:00-01:00 with 1500-2500 monthly spend; want cheap late-night food, milk tea and board games or e-sports.",
    "Early-rising seniors: aged 55-70, gather in parks and squares 6:00-8:00; want affordable breakfast, wellness tea and health checks.",
    "Short-stay tourists: aged 20-45, concentrated on weekends and holidays with low price sensitivity; want souvenirs, photo spots and quick meals.",
    "Night-shift medical and security staff: on duty 22:00-6:00 near hospitals and industrial parks; want hot boxed meals, energy drinks and a place to rest.",
    "Premium car owners and designated drivers: aged 30-50, around dining streets 21:00-02:00; want sobering drinks, a waiting area and fast charging.",
    "New pet owners: aged 25-35, single or couples, walking dogs 19:00-21:00; want pet treats, grooming and social photo spots.",
    "Event crowds: aged 18-45, bursts 2-3 hours around exhibitions and concerts; want fast food, fan merchandise and power bank rental.",
    "Industrial park workers: aged 20-40 on rotating shifts, meals at 11:30-13:00 and 17:30-19:00; want meals under 15 yuan, large portions and instant payment.",
    "Expatriate residents: aged 25-45 near international schools and serviced apartments; want international food, imported groceries and bilingual service.",
    "Nightlife crowd: aged 22-35, Friday to Sunday 22:00-03:00 around bar streets; want signature cocktails, photogenic lighting and late-night dining.",
];

const ANALYST_SYSTEM_PROMPT: &str = "You are a commercial real-estate analyst who evaluates retail shop sites. \
Write a structured Markdown report with sections for market environment, foot traffic and accessibility, \
competition, risks, and recommendations. State clearly which figures are estimates.";

/// Nearby service categories and their provider POI type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceCategory {
    OfficeBuilding,
    School,
    Hospital,
    ShoppingMall,
    Residential,
    Park,
    Parking,
}

impl ServiceCategory {
    pub const ALL: [ServiceCategory; 7] = [
        ServiceCategory::OfficeBuilding,
        ServiceCategory::School,
        ServiceCategory::Hospital,
        ServiceCategory::ShoppingMall,
        ServiceCategory::Residential,
        ServiceCategory::Park,
        ServiceCategory::Parking,
    ];

    /// Wire code reported in `nearbyServices`.
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn poi_type(self) -> &'static str {
        match self {
            ServiceCategory::OfficeBuilding => "120201",
            ServiceCategory::School => "141200",
            ServiceCategory::Hospital => "090100",
            ServiceCategory::ShoppingMall => "060101",
            ServiceCategory::Residential => "120300",
            ServiceCategory::Park => "110100",
            ServiceCategory::Parking => "150900",
        }
    }
}

/// Assessment of a candidate shop location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuationRecord {
    pub address: String,
    pub foot_traffic: u32,
    /// Monthly rent estimate.
    pub rent: u32,
    pub nearby_people_desc: String,
    /// Metres to the nearest bus stop or metro station, 0 when none was found.
    pub traffic_distance: u32,
    /// Metres to the nearest commercial zone.
    pub commercial_zone_distance: u32,
    pub nearby_services: Vec<u8>,
    pub score: u8,
}

/// Knobs for record assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct ValuationOptions {
    /// Resolve nearby services with real lookups instead of placeholders.
    pub lookup_nearby_services: bool,
    pub nearby_radius_m: u32,
}

impl Default for ValuationOptions {
    fn default() -> Self {
        Self {
            lookup_nearby_services: false,
            nearby_radius_m: 1000,
        }
    }
}

/// Values with no real data source yet.
#[derive(Debug, Clone)]
struct Placeholders {
    foot_traffic: u32,
    rent: u32,
    nearby_people_desc: String,
    commercial_zone_distance: u32,
    score: u8,
    nearby_services: Vec<u8>,
}

pub struct ValuationService {
    geo: Arc<dyn GeoProvider>,
    llm: Arc<dyn CompletionProvider>,
    options: ValuationOptions,
    rng: Mutex<StdRng>,
}

impl ValuationService {
    pub fn new(
        geo: Arc<dyn GeoProvider>,
        llm: Arc<dyn CompletionProvider>,
        options: ValuationOptions,
    ) -> Self {
        Self {
            geo,
            llm,
            options,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic placeholders, for tests.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    fn placeholders(&self) -> Placeholders {
        let mut rng = self.rng.lock();
        let nearby_services = ServiceCategory::ALL
            .iter()
            .filter(|_| rng.gen_bool(0.5))
            .map(|category| category.code())
            .collect();
        Placeholders {
            foot_traffic: *FOOT_TRAFFIC_LEVELS.choose(&mut *rng).unwrap_or(&1),
            rent: rng.gen_range(1000..=20000),
            nearby_people_desc: NEARBY_PEOPLE_PROFILES
                .choose(&mut *rng)
                .copied()
                .unwrap_or_default()
                .to_string(),
            commercial_zone_distance: rng.gen_range(10..=2000),
            score: rng.gen_range(1..=10),
            nearby_services,
        }
    }

    /// Assemble the valuation record for a location.
    pub async fn assess(&self, location: Coordinate) -> Result<ValuationRecord, ExternalDependencyError> {
        let placeholders = self.placeholders();

        let (bus, metro, address) = tokio::try_join!(
            self.geo
                .place_around(PlaceQuery::keywords(location, BUS_STOP_KEYWORDS)),
            self.geo
                .place_around(PlaceQuery::keywords(location, METRO_STATION_KEYWORDS)),
            self.geo.reverse_geocode(location),
        )?;

        let traffic_distance = nearest_distance("amap.place_around", bus.iter().chain(metro.iter()))?
            .map(|d| d.round() as u32)
            .unwrap_or(0);

        let nearby_services = if self.options.lookup_nearby_services {
            self.lookup_nearby_services(location).await?
        } else {
            placeholders.nearby_services
        };

        tracing::debug!(%location, traffic_distance, "valuation record assembled");
        Ok(ValuationRecord {
            address,
            foot_traffic: placeholders.foot_traffic,
            rent: placeholders.rent,
            nearby_people_desc: placeholders.nearby_people_desc,
            traffic_distance,
            commercial_zone_distance: placeholders.commercial_zone_distance,
            nearby_services,
            score: placeholders.score,
        })
    }

    async fn lookup_nearby_services(
        &self,
        location: Coordinate,
    ) -> Result<Vec<u8>, ExternalDependencyError> {
        let radius = self.options.nearby_radius_m;
        let lookups = ServiceCategory::ALL.into_iter().map(|category| async move {
            let pois = self
                .geo
                .place_around(PlaceQuery::types(location, category.poi_type(), radius))
                .await?;
            let nearest = nearest_distance("amap.place_around", pois.iter())?;
            Ok::<_, ExternalDependencyError>(
                nearest
                    .filter(|d| *d < f64::from(radius))
                    .map(|_| category.code()),
            )
        });
        let found = futures::future::try_join_all(lookups).await?;
        Ok(found.into_iter().flatten().collect())
    }

    fn narrative_prompt(location: Coordinate, address: &str) -> ChatPrompt {
        let place = if address.is_empty() {
            format!("coordinates {location}")
        } else {
            format!("{address} (coordinates {location})")
        };
        ChatPrompt {
            system: ANALYST_SYSTEM_PROMPT.to_string(),
            user: format!(
                "Evaluate a convenience-retail shop site at {place}. \
                 Cover the surrounding consumer groups, competition, foot traffic, \
                 rent pressure, risks and a final recommendation."
            ),
        }
    }

    /// Narrative report: one reverse geocode composed with one completion.
    pub async fn narrative(&self, location: Coordinate) -> Result<String, ExternalDependencyError> {
        let address = self.geo.reverse_geocode(location).await?;
        self.llm
            .complete(&Self::narrative_prompt(location, &address))
            .await
    }

    /// Streaming variant of [`ValuationService::narrative`].
    pub async fn narrative_stream(
        &self,
        location: Coordinate,
    ) -> Result<CompletionStream, ExternalDependencyError> {
        let address = self.geo.reverse_geocode(location).await?;
        self.llm
            .stream(&Self::narrative_prompt(location, &address))
            .await
    }
}

/// Smallest POI distance; a distance that does not parse is a payload error.
fn nearest_distance<'a>(
    operation: &str,
    pois: impl Iterator<Item = &'a Poi>,
) -> Result<Option<f64>, ExternalDependencyError> {
    let mut nearest: Option<f64> = None;
    for poi in pois {
        let distance = poi.distance_meters().ok_or_else(|| {
            ExternalDependencyError::payload(
                operation,
                format!("unparseable distance '{}' for '{}'", poi.distance, poi.name),
            )
        })?;
        nearest = Some(nearest.map_or(distance, |current| current.min(distance)));
    }
    Ok(nearest)
}
