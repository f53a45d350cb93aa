//! Player search session.
//!
//! Holds the active search, the last known location fix and the most recent
//! result list. Location fixes arrive on their own stream and are merged into
//! the active search without touching any join in flight.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::account::Account;
use super::search::{
    Coordinates, Player, PlayerSearcher, SearchError, SearchParams, SearchSpec, SEARCH_TYPE_KEY,
};

/// Snapshot key prefix for the last known fix.
const LAST_KNOWN_PREFIX: &str = "last_known.";

/// Text shown when a search succeeded but found nothing.
pub const NO_PLAYERS_TEXT: &str = "No players found.";

/// Flat key-value snapshot of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub values: BTreeMap<String, String>,
}

/// State of the player list screen.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSession {
    search: SearchSpec,
    last_known: Option<Coordinates>,
    players: Vec<Player>,
    empty_text: Option<String>,
    refreshed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Default for SearchSession {
    fn default() -> Self {
        Self::new(None)
    }
}

impl SearchSession {
    /// Start with a location search around the last known fix.
    pub fn new(last_known: Option<Coordinates>) -> Self {
        Self {
            search: SearchSpec::location(last_known),
            last_known,
            players: Vec::new(),
            empty_text: None,
            refreshed_at: None,
        }
    }

    pub fn search(&self) -> &SearchSpec {
        &self.search
    }

    pub fn last_known(&self) -> Option<Coordinates> {
        self.last_known
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn empty_text(&self) -> Option<&str> {
        self.empty_text.as_deref()
    }

    pub fn refreshed_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.refreshed_at
    }

    /// Adopt the first available provider fix if no fix is known yet.
    ///
    /// `fixes` are in provider preference order.
    pub fn seed_location<I>(&mut self, fixes: I)
    where
        I: IntoIterator<Item = Option<Coordinates>>,
    {
        if self.last_known.is_some() {
            return;
        }
        if let Some(fix) = fixes.into_iter().flatten().next() {
            debug!("seeding last known location {}", fix);
            self.on_location_changed(fix);
        }
    }

    /// Record a new fix.
    ///
    /// A location search picks it up in place; a name search keeps it for
    /// later.
    pub fn on_location_changed(&mut self, coordinates: Coordinates) {
        self.last_known = Some(coordinates);
        if self.search.update_location(coordinates) {
            trace!("location search now at {}", coordinates);
        }
    }

    /// Replace the active search.
    pub fn set_search(&mut self, search: SearchSpec) {
        debug!("search changed to {}", search);
        self.search = search;
    }

    /// Switch to a location search around the last known fix.
    pub fn search_nearby(&mut self) {
        self.set_search(SearchSpec::location(self.last_known));
    }

    /// Run the active search and store its result.
    pub fn refresh<S>(&mut self, searcher: &S, account: &Account)
    where
        S: PlayerSearcher + ?Sized,
    {
        self.refreshed_at = Some(chrono::Utc::now());
        match searcher.search(&self.search, account) {
            Ok(players) => {
                info!("{} players for {}", players.len(), self.search);
                self.empty_text = if players.is_empty() {
                    Some(NO_PLAYERS_TEXT.to_string())
                } else {
                    None
                };
                self.players = players;
            }
            Err(e) => {
                warn!("search {} failed: {}", self.search, e);
                self.show_error(e);
            }
        }
    }

    /// Clear the list and show the error's text instead.
    pub fn show_error(&mut self, error: SearchError) {
        self.players.clear();
        self.empty_text = Some(error.empty_text().to_string());
    }

    /// Flatten for a process restart.
    pub fn snapshot(&self) -> SessionSnapshot {
        let mut values = self.search.to_params();
        if let Some(last_known) = self.last_known {
            let mut fix = SearchParams::new();
            last_known.write_to(&mut fix);
            for (key, value) in fix {
                values.insert(format!("{}{}", LAST_KNOWN_PREFIX, key), value);
            }
        }
        SessionSnapshot { values }
    }

    /// Rebuild from a snapshot.
    ///
    /// A location search restarts from the last known fix. A missing or
    /// unknown search type falls back to a location search.
    pub fn restore(snapshot: &SessionSnapshot) -> Self {
        let fix: SearchParams = snapshot
            .values
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(LAST_KNOWN_PREFIX)
                    .map(|key| (key.to_string(), value.clone()))
            })
            .collect();
        let last_known = Coordinates::read_from(&fix);

        let mut session = Self::new(last_known);
        let restored = snapshot
            .values
            .get(SEARCH_TYPE_KEY)
            .and_then(|tag| tag.parse().ok())
            .and_then(|tag| SearchSpec::restore(tag, &snapshot.values));
        match restored {
            Some(SearchSpec::Location { .. }) | None => {}
            Some(search) => session.search = search,
        }
        session
    }

    /// Convert to JSON for the list view.
    pub fn to_json(&self) -> serde_json::Value {
        let players: Vec<serde_json::Value> = self.players.iter().map(Player::to_json).collect();
        serde_json::json!({
            "search": self.search,
            "last_known": self.last_known,
            "players": players,
            "empty_text": self.empty_text,
        })
    }
}
