// Great-circle distances and zone-priced freight cost matrices
//
// A [`CostMatrix`] holds one row per resolved facility and one column per
// destination. Destinations that cannot be located are priced at a fixed
// fallback distance; facilities that cannot be located are dropped.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Mean Earth radius in statute miles
pub const EARTH_RADIUS_MILES: f64 = 3959.0;

/// Cost used for facility/destination pairs that have no computed cost
pub const SENTINEL_COST: f64 = 999_999.0;

/// Geographic coordinates in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Haversine distance between two points in miles
pub fn haversine_miles(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_MILES * h.sqrt().min(1.0).asin()
}

/// Resolves a location name (city, site code) to coordinates
pub trait LocationLookup: Send + Sync {
    fn locate(&self, name: &str) -> Option<GeoPoint>;
}

/// Distance-banded multiplier applied to the base rate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneBand {
    /// Inclusive upper distance of the band in miles
    pub up_to_miles: f64,
    pub multiplier: f64,
}

/// Freight pricing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreightRates {
    pub base_rate_per_mile: f64,
    pub fuel_surcharge_per_mile: f64,
    /// Distance assumed for destinations without coordinates
    pub fallback_distance_miles: f64,
    /// Bands in ascending distance order
    pub zones: Vec<ZoneBand>,
    /// Multiplier beyond the last band
    pub beyond_multiplier: f64,
}

impl Default for FreightRates {
    fn default() -> Self {
        Self {
            base_rate_per_mile: 2.5,
            fuel_surcharge_per_mile: 0.15,
            fallback_distance_miles: 500.0,
            zones: vec![
                ZoneBand { up_to_miles: 150.0, multiplier: 0.85 },
                ZoneBand { up_to_miles: 300.0, multiplier: 0.95 },
                ZoneBand { up_to_miles: 600.0, multiplier: 1.10 },
            ],
            beyond_multiplier: 1.25,
        }
    }
}

impl FreightRates {
    pub fn zone_multiplier(&self, distance_miles: f64) -> f64 {
        self.zones
            .iter()
            .find(|band| distance_miles <= band.up_to_miles)
            .map(|band| band.multiplier)
            .unwrap_or(self.beyond_multiplier)
    }

    /// Cost per unit shipped over `distance_miles`
    pub fn unit_cost(&self, distance_miles: f64) -> f64 {
        distance_miles * self.base_rate_per_mile * self.zone_multiplier(distance_miles)
            + distance_miles * self.fuel_surcharge_per_mile
    }
}

/// Errors raised while building a cost matrix
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeoError {
    #[error("none of the {0} candidate facilities could be located")]
    NoFacilities(usize),

    #[error("no destinations given")]
    NoDestinations,
}

/// Dense facility × destination cost and distance matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostMatrix {
    pub facilities: Vec<String>,
    pub destinations: Vec<String>,
    /// `costs[i][j]`: currency per unit from facility i to destination j
    pub costs: Vec<Vec<f64>>,
    /// `distances[i][j]`: miles from facility i to destination j
    pub distances: Vec<Vec<f64>>,
}

impl CostMatrix {
    /// Assemble a matrix from possibly ragged rows. Missing cells (and
    /// missing rows) are filled with [`SENTINEL_COST`] so that a solver never
    /// prefers an unmapped pair.
    pub fn from_rows(
        facilities: Vec<String>,
        destinations: Vec<String>,
        mut costs: Vec<Vec<f64>>,
        mut distances: Vec<Vec<f64>>,
    ) -> Self {
        let width = destinations.len();
        costs.resize(facilities.len(), Vec::new());
        distances.resize(facilities.len(), Vec::new());
        for (i, row) in costs.iter_mut().enumerate() {
            if row.len() < width {
                debug!(
                    facility = %facilities[i],
                    missing = width - row.len(),
                    "padding cost row with sentinel cost"
                );
            }
            row.resize(width, SENTINEL_COST);
            row.truncate(width);
        }
        for row in distances.iter_mut() {
            row.resize(width, SENTINEL_COST);
            row.truncate(width);
        }
        Self {
            facilities,
            destinations,
            costs,
            distances,
        }
    }

    pub fn num_facilities(&self) -> usize {
        self.facilities.len()
    }

    pub fn num_destinations(&self) -> usize {
        self.destinations.len()
    }

    pub fn cost(&self, facility: usize, destination: usize) -> f64 {
        self.costs[facility][destination]
    }

    pub fn distance(&self, facility: usize, destination: usize) -> f64 {
        self.distances[facility][destination]
    }

    pub fn facility_index(&self, name: &str) -> Option<usize> {
        self.facilities.iter().position(|f| f == name)
    }
}

/// Builds cost matrices from location names
pub struct CostMatrixBuilder<'a> {
    lookup: &'a dyn LocationLookup,
    rates: FreightRates,
}

impl<'a> CostMatrixBuilder<'a> {
    pub fn new(lookup: &'a dyn LocationLookup, rates: FreightRates) -> Self {
        Self { lookup, rates }
    }

    pub fn build(
        &self,
        facilities: &[String],
        destinations: &[String],
    ) -> Result<CostMatrix, GeoError> {
        if destinations.is_empty() {
            return Err(GeoError::NoDestinations);
        }

        let mut located = Vec::with_capacity(facilities.len());
        for facility in facilities {
            match self.lookup.locate(facility) {
                Some(point) => located.push((facility.clone(), point)),
                None => warn!(facility = %facility, "facility could not be located, dropping it"),
            }
        }
        if located.is_empty() {
            return Err(GeoError::NoFacilities(facilities.len()));
        }

        let destination_points: Vec<Option<GeoPoint>> = destinations
            .iter()
            .map(|name| {
                let point = self.lookup.locate(name);
                if point.is_none() {
                    warn!(
                        destination = %name,
                        fallback_miles = self.rates.fallback_distance_miles,
                        "destination could not be located, using fallback distance"
                    );
                }
                point
            })
            .collect();

        let mut costs = Vec::with_capacity(located.len());
        let mut distances = Vec::with_capacity(located.len());
        for (_, origin) in &located {
            let row_distances: Vec<f64> = destination_points
                .iter()
                .map(|dest| match dest {
                    Some(point) => haversine_miles(*origin, *point),
                    None => self.rates.fallback_distance_miles,
                })
                .collect();
            costs.push(row_distances.iter().map(|d| self.rates.unit_cost(*d)).collect());
            distances.push(row_distances);
        }

        Ok(CostMatrix::from_rows(
            located.into_iter().map(|(name, _)| name).collect(),
            destinations.to_vec(),
            costs,
            distances,
        ))
    }
}
