//! Player search descriptions.
//!
//! A [`SearchSpec`] says how to find players: near a location fix or by a
//! free-text name. It flattens to a [`SearchParams`] map so the same search can
//! be re-issued after a restart.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::account::Account;

/// Key holding the search discriminant.
pub const SEARCH_TYPE_KEY: &str = "search_type";
/// Key holding the latitude of a location search.
pub const LATITUDE_KEY: &str = "latitude";
/// Key holding the longitude of a location search.
pub const LONGITUDE_KEY: &str = "longitude";
/// Key holding the query of a name search.
pub const QUERY_KEY: &str = "query";

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Flat key-value form of a search.
pub type SearchParams = BTreeMap<String, String>;

/// A single location fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Write this fix into `params`.
    pub fn write_to(&self, params: &mut SearchParams) {
        params.insert(LATITUDE_KEY.to_string(), self.latitude.to_string());
        params.insert(LONGITUDE_KEY.to_string(), self.longitude.to_string());
    }

    /// Great-circle distance to `other` in meters.
    pub fn distance_m(&self, other: &Coordinates) -> f64 {
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let d_lat = lat2 - lat1;
        let d_lon = (other.longitude - self.longitude).to_radians();
        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }

    /// Read a fix back from `params`. Missing or malformed values yield `None`.
    pub fn read_from(params: &SearchParams) -> Option<Self> {
        let latitude = params.get(LATITUDE_KEY)?.parse().ok()?;
        let longitude = params.get(LONGITUDE_KEY)?.parse().ok()?;
        Some(Self::new(latitude, longitude))
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.latitude, self.longitude)
    }
}

/// Search variant discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum SearchKind {
    Location = 0,
    Name = 1,
}

impl SearchKind {
    pub fn from_discriminant(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Location),
            1 => Some(Self::Name),
            _ => None,
        }
    }

    pub fn discriminant(self) -> i32 {
        self as i32
    }
}

/// How to look for players.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchSpec {
    /// Players near a location fix. The fix may not be known yet.
    Location { coordinates: Option<Coordinates> },

    /// Players whose name matches a query.
    Name { query: String },
}

impl Default for SearchSpec {
    fn default() -> Self {
        Self::Location { coordinates: None }
    }
}

impl SearchSpec {
    /// Location search around an optional fix.
    pub fn location(coordinates: Option<Coordinates>) -> Self {
        Self::Location { coordinates }
    }

    /// Name search. Returns `None` for an empty query.
    pub fn name(query: impl Into<String>) -> Option<Self> {
        let query = query.into();
        if query.trim().is_empty() {
            return None;
        }
        Some(Self::Name { query })
    }

    pub fn kind(&self) -> SearchKind {
        match self {
            Self::Location { .. } => SearchKind::Location,
            Self::Name { .. } => SearchKind::Name,
        }
    }

    pub fn discriminant(&self) -> i32 {
        self.kind().discriminant()
    }

    pub fn coordinates(&self) -> Option<Coordinates> {
        match self {
            Self::Location { coordinates } => *coordinates,
            Self::Name { .. } => None,
        }
    }

    pub fn query(&self) -> Option<&str> {
        match self {
            Self::Name { query } => Some(query),
            Self::Location { .. } => None,
        }
    }

    /// Whether the search has everything it needs to run.
    ///
    /// A location search without a fix cannot be answered; searchers report
    /// [`SearchError::NoLocation`] for it.
    pub fn ready(&self) -> bool {
        match self {
            Self::Location { coordinates } => coordinates.is_some(),
            Self::Name { .. } => true,
        }
    }

    /// Replace the fix of a location search in place.
    ///
    /// Returns `true` if the search changed. Name searches are never touched.
    pub fn update_location(&mut self, new_coordinates: Coordinates) -> bool {
        match self {
            Self::Location { coordinates } => {
                *coordinates = Some(new_coordinates);
                true
            }
            Self::Name { .. } => false,
        }
    }

    /// Flatten into key-value parameters, discriminant included.
    pub fn to_params(&self) -> SearchParams {
        let mut params = SearchParams::new();
        params.insert(SEARCH_TYPE_KEY.to_string(), self.discriminant().to_string());
        match self {
            Self::Location { coordinates } => {
                if let Some(coordinates) = coordinates {
                    coordinates.write_to(&mut params);
                }
            }
            Self::Name { query } => {
                params.insert(QUERY_KEY.to_string(), query.clone());
            }
        }
        params
    }

    /// Rebuild a search from its discriminant and parameters.
    pub fn restore(discriminant: i32, params: &SearchParams) -> Option<Self> {
        match SearchKind::from_discriminant(discriminant)? {
            SearchKind::Location => Some(Self::location(Coordinates::read_from(params))),
            SearchKind::Name => Self::name(params.get(QUERY_KEY)?.clone()),
        }
    }

    /// Rebuild a search from parameters that carry their own discriminant.
    pub fn from_params(params: &SearchParams) -> Option<Self> {
        let discriminant = params.get(SEARCH_TYPE_KEY)?.parse().ok()?;
        Self::restore(discriminant, params)
    }
}

impl fmt::Display for SearchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Location {
                coordinates: Some(coordinates),
            } => write!(f, "Location{}", coordinates),
            Self::Location { coordinates: None } => write!(f, "Location(unknown)"),
            Self::Name { query } => write!(f, "Name({:?})", query),
        }
    }
}

/// A joinable player as returned by a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub player_id: String,
    pub name: String,
    pub owner_name: String,
    pub owner_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub has_password: bool,
}

impl Player {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }

    /// Convert to JSON for a list view.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "player_id": self.player_id,
            "name": self.name,
            "owner_name": self.owner_name,
            "owner_id": self.owner_id,
            "latitude": self.latitude,
            "longitude": self.longitude,
            "has_password": self.has_password
        })
    }
}

/// Why a search produced no list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum SearchError {
    #[error("no location fix available")]
    NoLocation,
    #[error("server error while loading players")]
    ServerError,
    #[error("no network connection")]
    NoConnection,
    #[error("no account available")]
    NoAccount,
}

impl SearchError {
    /// Text shown in place of the empty player list.
    pub fn empty_text(&self) -> &'static str {
        match self {
            Self::NoLocation => "Couldn't determine your location. Try searching by name.",
            Self::ServerError => "There was an error loading players. Pull to retry.",
            Self::NoConnection => "No network connection.",
            Self::NoAccount => "No account found. Please sign in.",
        }
    }
}

/// Runs player searches on behalf of an account.
pub trait PlayerSearcher {
    fn search(&self, spec: &SearchSpec, account: &Account) -> Result<Vec<Player>, SearchError>;
}
