//! Crate-wide error type.
//!
//! Each module has its own error; [`Error`] collects them so callers can use
//! `?` across module boundaries.

use thiserror::Error;

use crate::config::ConfigError;
use crate::state::account::AccountError;
use crate::state::join::ListenerError;
use crate::state::player::InvalidTransition;

/// Standard result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A join event arrived in the wrong state. This points at a lost or
    /// duplicated completion signal, never at user input.
    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// Whether this error is a programming error rather than a runtime
    /// condition.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::Transition(_))
    }
}
