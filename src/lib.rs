//! Player Join State Library
//!
//! This crate provides the state behind finding a shared music player and
//! joining it.
//!
//! # Overview
//!
//! - **Player Search** - Search by location or by name. Searches flatten to
//!   key-value parameters so they survive a restart.
//!
//! - **Join State Machine** - Tracks each account through joining
//!   (not in player, joining, in player, join failed) with validated
//!   transitions.
//!
//! - **Join Workflow** - Hands join requests to an executor and applies the
//!   single outcome it reports back through a one-shot channel.
//!
//! - **Account Store** - Per-account key-value attributes holding the join
//!   state.
//!
//! # Design Principles
//!
//! 1. **State machines validate transitions** - A completion signal in the
//!    wrong state is rejected with a clear error.
//!
//! 2. **Collaborators are traits** - Searching, joining and rendering are done
//!    by whoever implements `PlayerSearcher`, `JoinExecutor` and `JoinView`.
//!
//! 3. **No networking** - This crate is pure state.
//!
//! # Example
//!
//! ```rust
//! use player_join_state::config::Config;
//! use player_join_state::state::{Account, AppState, Coordinates, SearchSpec};
//!
//! let mut app = AppState::new(Config::default());
//! let account = Account::new("alice", app.config.account.account_type.clone());
//! app.accounts.add(account).unwrap();
//!
//! // Location fixes update a location search in place
//! app.on_location_changed(Coordinates::new(37.0, -122.0));
//! assert_eq!(app.session.search().coordinates(), Some(Coordinates::new(37.0, -122.0)));
//!
//! // Switch to a name search
//! app.session.set_search(SearchSpec::name("jazz").unwrap());
//! ```

#[macro_use]
extern crate log;

pub mod config;
pub mod error;
pub mod state;

// Re-export everything from state module at crate root
pub use error::{Error, Result};
pub use state::*;
