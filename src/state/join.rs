//! Join requests and their outcomes.
//!
//! A join is handed to a [`JoinExecutor`] together with a [`JoinSignal`]. The
//! executor finishes the join out of band and completes the signal exactly
//! once; the workflow picks the outcome up through the matching
//! [`JoinListener`].

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot::{self, error::TryRecvError};

use super::account::Account;
use super::search::Player;

/// Reasons a join can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JoinError {
    ServerError,
    AuthenticationError,
    PlayerInactiveError,
    NoNetworkError,
    PlayerPasswordError,
    PlayerFullError,
    BannedError,
}

impl JoinError {
    pub const ALL: [JoinError; 7] = [
        Self::ServerError,
        Self::AuthenticationError,
        Self::PlayerInactiveError,
        Self::NoNetworkError,
        Self::PlayerPasswordError,
        Self::PlayerFullError,
        Self::BannedError,
    ];

    /// Code stored in account metadata.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ServerError => "SERVER_ERROR",
            Self::AuthenticationError => "AUTHENTICATION_ERROR",
            Self::PlayerInactiveError => "PLAYER_INACTIVE_ERROR",
            Self::NoNetworkError => "NO_NETWORK_ERROR",
            Self::PlayerPasswordError => "PLAYER_PASSWORD_ERROR",
            Self::PlayerFullError => "PLAYER_FULL_ERROR",
            Self::BannedError => "BANNED_ERROR",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|error| error.code() == code)
    }

    pub fn category(&self) -> MessageCategory {
        match self {
            Self::ServerError => MessageCategory::ServerError,
            Self::AuthenticationError => MessageCategory::AuthenticationError,
            Self::PlayerInactiveError => MessageCategory::PlayerInactive,
            Self::NoNetworkError => MessageCategory::NoNetwork,
            Self::PlayerPasswordError => MessageCategory::BadPassword,
            Self::PlayerFullError => MessageCategory::PlayerFull,
            Self::BannedError => MessageCategory::Banned,
        }
    }
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Result of one join attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinOutcome {
    Success,
    Failed(JoinError),
}

impl From<JoinError> for JoinOutcome {
    fn from(error: JoinError) -> Self {
        Self::Failed(error)
    }
}

/// What the failure dialog tells the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageCategory {
    ServerError,
    AuthenticationError,
    PlayerInactive,
    NoNetwork,
    BadPassword,
    PlayerFull,
    Banned,
    Unknown,
}

impl MessageCategory {
    /// Category for a stored error code. Unrecognized codes map to
    /// [`MessageCategory::Unknown`].
    pub fn for_code(code: &str) -> Self {
        JoinError::from_code(code)
            .map(|error| error.category())
            .unwrap_or(Self::Unknown)
    }

    pub fn title(&self) -> &'static str {
        "Couldn't join player"
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::ServerError => "The server had a problem joining the player. Try again later.",
            Self::AuthenticationError => "There was a problem authenticating your account.",
            Self::PlayerInactive => "That player is no longer active.",
            Self::NoNetwork => "No network connection. Check your connection and try again.",
            Self::BadPassword => "The password for that player was wrong.",
            Self::PlayerFull => "That player is full.",
            Self::Banned => "You have been banned from that player.",
            Self::Unknown => "An unknown error occurred while joining the player.",
        }
    }
}

/// A join handed off to the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub account: Account,
    pub player: Player,
    pub password: Option<String>,
    pub requested_at: chrono::DateTime<chrono::Utc>,
}

impl JoinRequest {
    /// Build a request. An empty password counts as no password.
    pub fn new(account: Account, player: Player, password: Option<String>) -> Self {
        Self {
            account,
            player,
            password: password.filter(|p| !p.is_empty()),
            requested_at: chrono::Utc::now(),
        }
    }
}

/// Listener side failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ListenerError {
    #[error("join signal dropped without an outcome")]
    SignalDropped,
    #[error("no join outstanding to listen for")]
    NotListening,
}

/// Completion side of a join, owned by the executor.
#[derive(Debug)]
pub struct JoinSignal {
    tx: oneshot::Sender<JoinOutcome>,
}

impl JoinSignal {
    /// Deliver the outcome. Consumes the signal, so there is at most one.
    ///
    /// Returns the outcome back if nobody is listening anymore.
    pub fn complete(self, outcome: JoinOutcome) -> Result<(), JoinOutcome> {
        self.tx.send(outcome)
    }

    pub fn succeed(self) -> Result<(), JoinOutcome> {
        self.complete(JoinOutcome::Success)
    }

    pub fn fail(self, error: JoinError) -> Result<(), JoinOutcome> {
        self.complete(JoinOutcome::Failed(error))
    }
}

/// Receiving side of a join, owned by the workflow.
#[derive(Debug)]
pub struct JoinListener {
    rx: oneshot::Receiver<JoinOutcome>,
}

impl JoinListener {
    /// Poll without blocking. `Ok(None)` means still joining.
    pub fn try_outcome(&mut self) -> Result<Option<JoinOutcome>, ListenerError> {
        match self.rx.try_recv() {
            Ok(outcome) => Ok(Some(outcome)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Closed) => Err(ListenerError::SignalDropped),
        }
    }

    /// Wait for the outcome.
    ///
    /// Cancel safe: if the returned future is dropped early, the outcome
    /// stays with the listener.
    pub async fn recv(&mut self) -> Result<JoinOutcome, ListenerError> {
        (&mut self.rx).await.map_err(|_| ListenerError::SignalDropped)
    }
}

/// Create a connected signal/listener pair.
pub fn completion_channel() -> (JoinSignal, JoinListener) {
    let (tx, rx) = oneshot::channel();
    (JoinSignal { tx }, JoinListener { rx })
}

/// Performs joins out of band.
///
/// Implementations must complete `signal` exactly once, possibly before
/// `execute` returns.
pub trait JoinExecutor {
    fn execute(&self, request: JoinRequest, signal: JoinSignal);
}
