//! Player-join state machine.
//!
//! Tracks where an account is in the join workflow and validates transitions.
//!
//! # State Diagram
//!
//! ```text
//! ┌──────────────┐        initiate        ┌────────────────┐
//! │ NotInPlayer  │───────────────────────▶│ JoiningPlayer  │
//! └──────────────┘                        └───────┬────────┘
//!     ▲      ▲                                    │
//!     │      │                  succeeded         │ failed
//!     │      │            ┌───────────────────────┤
//!     │      │            ▼                       ▼
//!     │      │     ┌────────────┐       ┌──────────────────┐
//!     │      └─────│  InPlayer  │       │ PlayerJoinFailed │
//!     │   leave    └────────────┘       └────────┬─────────┘
//!     │                                   │      │
//!     └───────────────────────────────────┘      │ initiate (retry)
//!             acknowledge_failure                ▼
//!                                         JoiningPlayer
//! ```
//!
//! Every completion signal must match an outstanding join. A transition from
//! the wrong state means a signal was lost or delivered twice, so it is
//! rejected with [`InvalidTransition`] and logged as an error.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::join::{JoinError, JoinOutcome};
use super::search::Player;

/// Account attribute holding the [`PlayerState`] code.
pub const PLAYER_STATE_KEY: &str = "player_state";

/// Account attribute holding the [`JoinError`] code after a failed join.
pub const PLAYER_JOIN_ERROR_KEY: &str = "player_join_error";

/// Account attribute holding the player being joined or joined, as JSON.
pub const PLAYER_KEY: &str = "player";

/// Where an account is in the join workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PlayerState {
    /// Not associated with any player
    #[default]
    NotInPlayer,

    /// A join request is outstanding
    JoiningPlayer,

    /// Joined, until the user leaves
    InPlayer,

    /// The last join failed, until acknowledged
    PlayerJoinFailed,
}

impl PlayerState {
    /// Code stored in account metadata.
    pub fn code(&self) -> i32 {
        match self {
            Self::NotInPlayer => 0,
            Self::JoiningPlayer => 1,
            Self::InPlayer => 2,
            Self::PlayerJoinFailed => 3,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::NotInPlayer),
            1 => Some(Self::JoiningPlayer),
            2 => Some(Self::InPlayer),
            3 => Some(Self::PlayerJoinFailed),
            _ => None,
        }
    }

    /// Whether a new join may start from here.
    pub fn can_join(&self) -> bool {
        matches!(self, Self::NotInPlayer | Self::PlayerJoinFailed)
    }

    /// Whether a target player goes with this state.
    fn has_target(&self) -> bool {
        matches!(self, Self::JoiningPlayer | Self::InPlayer)
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInPlayer => write!(f, "NotInPlayer"),
            Self::JoiningPlayer => write!(f, "JoiningPlayer"),
            Self::InPlayer => write!(f, "InPlayer"),
            Self::PlayerJoinFailed => write!(f, "PlayerJoinFailed"),
        }
    }
}

/// State transition events.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinEvent {
    Initiate {
        player: Player,
        password: Option<String>,
    },
    Succeeded,
    Failed(JoinError),
    AcknowledgeFailure,
    Leave,
}

impl From<JoinOutcome> for JoinEvent {
    fn from(outcome: JoinOutcome) -> Self {
        match outcome {
            JoinOutcome::Success => Self::Succeeded,
            JoinOutcome::Failed(error) => Self::Failed(error),
        }
    }
}

impl JoinEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::Initiate { .. } => "initiate",
            Self::Succeeded => "succeeded",
            Self::Failed(_) => "failed",
            Self::AcknowledgeFailure => "acknowledge_failure",
            Self::Leave => "leave",
        }
    }
}

/// Error when a state transition is invalid.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid transition from {from} via {}: {reason}", .event.name())]
pub struct InvalidTransition {
    pub from: PlayerState,
    pub event: JoinEvent,
    pub reason: &'static str,
}

/// Join state machine for one account.
///
/// Besides the state it remembers the player being joined, the password used
/// and the error of the last failed attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinStateMachine {
    state: PlayerState,
    target: Option<Player>,
    password: Option<String>,
    last_error: Option<JoinError>,
}

impl JoinStateMachine {
    /// Create a machine that is not in any player.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a machine at a specific state (for restoring state).
    pub fn at(state: PlayerState) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn target(&self) -> Option<&Player> {
        self.target.as_ref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn last_error(&self) -> Option<JoinError> {
        self.last_error
    }

    /// Apply an event, returning the new machine or an error.
    pub fn apply(&self, event: JoinEvent) -> Result<Self, InvalidTransition> {
        let mut next = self.clone();
        next.apply_mut(event)?;
        Ok(next)
    }

    /// Apply an event in place. On error nothing changes.
    pub fn apply_mut(&mut self, event: JoinEvent) -> Result<(), InvalidTransition> {
        let next = match self.transition(&event) {
            Ok(next) => next,
            Err(e) => {
                error!("{}", e);
                return Err(e);
            }
        };
        debug!("player state {} -> {} via {}", self.state, next, event.name());
        self.state = next;

        match event {
            JoinEvent::Initiate { player, password } => {
                self.target = Some(player);
                self.password = password.filter(|p| !p.is_empty());
                self.last_error = None;
            }
            JoinEvent::Succeeded => {
                self.password = None;
            }
            JoinEvent::Failed(error) => {
                self.password = None;
                self.last_error = Some(error);
            }
            JoinEvent::AcknowledgeFailure | JoinEvent::Leave => {
                self.target = None;
                self.password = None;
                self.last_error = None;
            }
        }
        Ok(())
    }

    /// Calculate the new state for an event.
    fn transition(&self, event: &JoinEvent) -> Result<PlayerState, InvalidTransition> {
        use JoinEvent::*;
        use PlayerState::*;

        let invalid = |reason: &'static str| InvalidTransition {
            from: self.state,
            event: event.clone(),
            reason,
        };

        match (self.state, event) {
            // Initiate: NotInPlayer/PlayerJoinFailed -> JoiningPlayer
            (state, Initiate { .. }) if state.can_join() => Ok(JoiningPlayer),
            (JoiningPlayer, Initiate { .. }) => Err(invalid("A join is already outstanding")),
            (_, Initiate { .. }) => Err(invalid("Must leave the current player first")),

            // Succeeded/Failed: JoiningPlayer -> InPlayer/PlayerJoinFailed
            (JoiningPlayer, Succeeded) => Ok(InPlayer),
            (JoiningPlayer, Failed(_)) => Ok(PlayerJoinFailed),
            (_, Succeeded | Failed(_)) => Err(invalid("No join is outstanding")),

            // AcknowledgeFailure: PlayerJoinFailed -> NotInPlayer
            (PlayerJoinFailed, AcknowledgeFailure) => Ok(NotInPlayer),
            (_, AcknowledgeFailure) => Err(invalid("No failed join to acknowledge")),

            // Leave: InPlayer -> NotInPlayer
            (InPlayer, Leave) => Ok(NotInPlayer),
            (_, Leave) => Err(invalid("Not in a player")),
        }
    }

    /// Flatten into account attributes.
    ///
    /// The error key is only present while failed; the player only while
    /// joining or joined.
    pub fn to_metadata(&self) -> BTreeMap<String, String> {
        let mut metadata = BTreeMap::new();
        metadata.insert(PLAYER_STATE_KEY.to_string(), self.state.code().to_string());
        if let (PlayerState::PlayerJoinFailed, Some(error)) = (self.state, self.last_error) {
            metadata.insert(PLAYER_JOIN_ERROR_KEY.to_string(), error.code().to_string());
        }
        if let (true, Some(player)) = (self.state.has_target(), &self.target) {
            match serde_json::to_string(player) {
                Ok(json) => {
                    metadata.insert(PLAYER_KEY.to_string(), json);
                }
                Err(e) => warn!("not storing player {}: {}", player.player_id, e),
            }
        }
        metadata
    }

    /// Rebuild from account attributes.
    ///
    /// The password is never stored. An unknown state code restores as
    /// `NotInPlayer`, an unknown error code as no error and an unreadable
    /// player as no target.
    pub fn from_metadata(metadata: &BTreeMap<String, String>) -> Self {
        let state = metadata
            .get(PLAYER_STATE_KEY)
            .and_then(|value| value.parse().ok())
            .and_then(PlayerState::from_code)
            .unwrap_or_else(|| {
                if let Some(value) = metadata.get(PLAYER_STATE_KEY) {
                    warn!("unknown player state {:?}, resetting", value);
                }
                PlayerState::NotInPlayer
            });
        let last_error = match state {
            PlayerState::PlayerJoinFailed => metadata
                .get(PLAYER_JOIN_ERROR_KEY)
                .and_then(|code| JoinError::from_code(code)),
            _ => None,
        };
        let target = match (state.has_target(), metadata.get(PLAYER_KEY)) {
            (true, Some(json)) => serde_json::from_str(json)
                .map_err(|e| warn!("unreadable stored player: {}", e))
                .ok(),
            _ => None,
        };
        Self {
            state,
            target,
            last_error,
            ..Self::default()
        }
    }

    // Convenience methods for common checks

    pub fn is_joining(&self) -> bool {
        self.state == PlayerState::JoiningPlayer
    }

    pub fn is_in_player(&self) -> bool {
        self.state == PlayerState::InPlayer
    }

    pub fn has_failed(&self) -> bool {
        self.state == PlayerState::PlayerJoinFailed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn make_player(has_password: bool) -> Player {
        Player {
            player_id: "42".to_string(),
            name: "Kitchen".to_string(),
            owner_name: "Alice".to_string(),
            owner_id: "1".to_string(),
            latitude: 37.0,
            longitude: -122.0,
            has_password,
        }
    }

    fn initiate(has_password: bool, password: Option<&str>) -> JoinEvent {
        JoinEvent::Initiate {
            player: make_player(has_password),
            password: password.map(str::to_string),
        }
    }

    #[test]
    fn test_initial_state() {
        let machine = JoinStateMachine::new();
        assert_eq!(machine.state(), PlayerState::NotInPlayer);
        assert!(machine.target().is_none());
    }

    #[test]
    fn test_join_success_flow() {
        let mut machine = JoinStateMachine::new();

        machine.apply_mut(initiate(false, None)).unwrap();
        assert!(machine.is_joining());
        assert_eq!(machine.target().map(|p| p.player_id.as_str()), Some("42"));
        assert_eq!(machine.password(), None);

        machine.apply_mut(JoinEvent::Succeeded).unwrap();
        assert!(machine.is_in_player());

        machine.apply_mut(JoinEvent::Leave).unwrap();
        assert_eq!(machine.state(), PlayerState::NotInPlayer);
        assert!(machine.target().is_none());
    }

    #[test]
    fn test_join_failure_flow() {
        let mut machine = JoinStateMachine::new();

        machine.apply_mut(initiate(true, Some("abc"))).unwrap();
        assert_eq!(machine.password(), Some("abc"));

        machine
            .apply_mut(JoinEvent::Failed(JoinError::PlayerPasswordError))
            .unwrap();
        assert!(machine.has_failed());
        assert_eq!(machine.last_error(), Some(JoinError::PlayerPasswordError));

        machine.apply_mut(JoinEvent::AcknowledgeFailure).unwrap();
        assert_eq!(machine.state(), PlayerState::NotInPlayer);
        assert_eq!(machine.last_error(), None);
    }

    #[test]
    fn test_retry_after_failure() {
        let mut machine = JoinStateMachine::new();
        machine.apply_mut(initiate(false, None)).unwrap();
        machine
            .apply_mut(JoinEvent::Failed(JoinError::ServerError))
            .unwrap();

        machine.apply_mut(initiate(false, None)).unwrap();
        assert!(machine.is_joining());
        assert_eq!(machine.last_error(), None);
    }

    #[test]
    fn test_double_initiate_rejected() {
        let mut machine = JoinStateMachine::new();
        machine.apply_mut(initiate(false, None)).unwrap();

        let err = machine.apply_mut(initiate(false, None)).unwrap_err();
        assert_eq!(err.from, PlayerState::JoiningPlayer);
        assert!(machine.is_joining());
    }

    #[test]
    fn test_invalid_transitions() {
        let machine = JoinStateMachine::new();

        // Completion without an outstanding join
        assert!(machine.apply(JoinEvent::Succeeded).is_err());
        assert!(machine
            .apply(JoinEvent::Failed(JoinError::BannedError))
            .is_err());
        assert!(machine.apply(JoinEvent::AcknowledgeFailure).is_err());
        assert!(machine.apply(JoinEvent::Leave).is_err());

        // Duplicated success
        let joined = machine
            .apply(initiate(false, None))
            .unwrap()
            .apply(JoinEvent::Succeeded)
            .unwrap();
        assert!(joined.apply(JoinEvent::Succeeded).is_err());
        assert!(joined.apply(initiate(false, None)).is_err());
        assert!(joined.apply(JoinEvent::AcknowledgeFailure).is_err());

        // Joining can't leave or acknowledge
        let joining = machine.apply(initiate(false, None)).unwrap();
        assert!(joining.apply(JoinEvent::Leave).is_err());
        assert!(joining.apply(JoinEvent::AcknowledgeFailure).is_err());
    }

    #[test]
    fn test_only_listed_edges() {
        let states = [
            PlayerState::NotInPlayer,
            PlayerState::JoiningPlayer,
            PlayerState::InPlayer,
            PlayerState::PlayerJoinFailed,
        ];
        let events = [
            initiate(false, None),
            JoinEvent::Succeeded,
            JoinEvent::Failed(JoinError::ServerError),
            JoinEvent::AcknowledgeFailure,
            JoinEvent::Leave,
        ];
        let allowed = [
            (PlayerState::NotInPlayer, "initiate", PlayerState::JoiningPlayer),
            (PlayerState::PlayerJoinFailed, "initiate", PlayerState::JoiningPlayer),
            (PlayerState::JoiningPlayer, "succeeded", PlayerState::InPlayer),
            (PlayerState::JoiningPlayer, "failed", PlayerState::PlayerJoinFailed),
            (PlayerState::PlayerJoinFailed, "acknowledge_failure", PlayerState::NotInPlayer),
            (PlayerState::InPlayer, "leave", PlayerState::NotInPlayer),
        ];

        for state in states {
            for event in &events {
                let result = JoinStateMachine::at(state).apply(event.clone());
                let expected = allowed
                    .iter()
                    .find(|(from, name, _)| *from == state && *name == event.name())
                    .map(|(_, _, to)| *to);
                match (result, expected) {
                    (Ok(next), Some(to)) => assert_eq!(next.state(), to),
                    (Err(e), None) => assert_eq!(e.from, state),
                    (result, expected) => {
                        panic!("{} via {}: got {:?}, expected {:?}", state, event.name(), result, expected)
                    }
                }
            }
        }
    }

    #[test]
    fn test_outcome_to_event() {
        assert_eq!(JoinEvent::from(JoinOutcome::Success), JoinEvent::Succeeded);
        assert_eq!(
            JoinEvent::from(JoinOutcome::Failed(JoinError::PlayerFullError)),
            JoinEvent::Failed(JoinError::PlayerFullError)
        );
    }

    #[test]
    fn test_metadata_round_trip() {
        let mut machine = JoinStateMachine::new();
        machine.apply_mut(initiate(false, None)).unwrap();

        let metadata = machine.to_metadata();
        assert_eq!(metadata.get(PLAYER_STATE_KEY).map(String::as_str), Some("1"));
        let restored = JoinStateMachine::from_metadata(&metadata);
        assert_eq!(restored.state(), PlayerState::JoiningPlayer);
        assert_eq!(restored.target(), machine.target());
        assert_eq!(restored.password(), None);

        let joined = machine.apply(JoinEvent::Succeeded).unwrap();
        let restored = JoinStateMachine::from_metadata(&joined.to_metadata());
        assert!(restored.is_in_player());
        assert_eq!(restored.target().map(|p| p.player_id.as_str()), Some("42"));

        machine
            .apply_mut(JoinEvent::Failed(JoinError::BannedError))
            .unwrap();
        let metadata = machine.to_metadata();
        assert_eq!(
            metadata.get(PLAYER_JOIN_ERROR_KEY).map(String::as_str),
            Some("BANNED_ERROR")
        );
        assert!(!metadata.contains_key(PLAYER_KEY));

        let restored = JoinStateMachine::from_metadata(&metadata);
        assert!(restored.has_failed());
        assert_eq!(restored.last_error(), Some(JoinError::BannedError));
    }

    #[test]
    fn test_metadata_garbage() {
        let mut metadata = BTreeMap::new();
        metadata.insert(PLAYER_STATE_KEY.to_string(), "9".to_string());
        assert_eq!(
            JoinStateMachine::from_metadata(&metadata).state(),
            PlayerState::NotInPlayer
        );

        metadata.insert(PLAYER_STATE_KEY.to_string(), "3".to_string());
        metadata.insert(PLAYER_JOIN_ERROR_KEY.to_string(), "NEW_ERROR".to_string());
        let restored = JoinStateMachine::from_metadata(&metadata);
        assert!(restored.has_failed());
        assert_eq!(restored.last_error(), None);

        metadata.insert(PLAYER_STATE_KEY.to_string(), "2".to_string());
        metadata.insert(PLAYER_KEY.to_string(), "{\"player_id\":".to_string());
        let restored = JoinStateMachine::from_metadata(&metadata);
        assert!(restored.is_in_player());
        assert_eq!(restored.target(), None);
    }

    #[test]
    fn test_display() {
        let err = JoinStateMachine::new().apply(JoinEvent::Leave).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid transition from NotInPlayer via leave: Not in a player"
        );
    }
}
