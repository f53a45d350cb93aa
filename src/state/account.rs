//! Account metadata store.
//!
//! Every account carries a small set of string attributes. The join workflow
//! keeps its player state there so it survives restarts and can be read or
//! written by whoever performs the join.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::player::{PlayerState, PLAYER_STATE_KEY};

/// Account type used when none is configured.
pub const DEFAULT_ACCOUNT_TYPE: &str = "player-join.account";

/// A signed-in user account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    pub account_type: String,
}

impl Account {
    pub fn new(name: impl Into<String>, account_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            account_type: account_type.into(),
        }
    }
}

/// Account errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountError {
    #[error("no account of type {0}")]
    NoAccount(String),
    #[error("unknown account {0}")]
    UnknownAccount(String),
    #[error("account {0} already exists")]
    AlreadyExists(String),
    #[error("invalid value {value:?} for attribute {key}")]
    InvalidAttribute { key: String, value: String },
}

/// Key-value attributes per account.
pub trait AccountStore {
    fn user_data(&self, account: &Account, key: &str) -> Option<String>;

    fn set_user_data(&mut self, account: &Account, key: &str, value: String);

    fn remove_user_data(&mut self, account: &Account, key: &str);
}

/// An account together with its attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub account: Account,
    pub attributes: BTreeMap<String, String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl AccountRecord {
    /// New record, not in any player.
    pub fn new(account: Account) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert(
            PLAYER_STATE_KEY.to_string(),
            PlayerState::NotInPlayer.code().to_string(),
        );
        Self {
            account,
            attributes,
            created_at: chrono::Utc::now(),
        }
    }
}

/// In-memory account store, indexed by account name.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AccountManager {
    /// Records by account name
    records: HashMap<String, AccountRecord>,

    /// Account names in creation order
    order: Vec<String>,
}

impl AccountManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an account. Its player state starts at `NotInPlayer`.
    pub fn add(&mut self, account: Account) -> Result<(), AccountError> {
        if self.records.contains_key(&account.name) {
            return Err(AccountError::AlreadyExists(account.name));
        }
        debug!("adding account {}", account.name);
        self.order.push(account.name.clone());
        self.records
            .insert(account.name.clone(), AccountRecord::new(account));
        Ok(())
    }

    /// Remove an account and its attributes.
    pub fn remove(&mut self, name: &str) -> Option<AccountRecord> {
        let record = self.records.remove(name)?;
        self.order.retain(|n| n != name);
        Some(record)
    }

    pub fn get(&self, name: &str) -> Option<&AccountRecord> {
        self.records.get(name)
    }

    pub fn contains(&self, account: &Account) -> bool {
        self.records.contains_key(&account.name)
    }

    /// Accounts of a type, oldest first.
    pub fn accounts_by_type(&self, account_type: &str) -> Vec<&Account> {
        self.order
            .iter()
            .filter_map(|name| self.records.get(name))
            .map(|record| &record.account)
            .filter(|account| account.account_type == account_type)
            .collect()
    }

    /// The account to use for a type. With several, the oldest wins.
    pub fn primary(&self, account_type: &str) -> Result<&Account, AccountError> {
        let accounts = self.accounts_by_type(account_type);
        let first = *accounts
            .first()
            .ok_or_else(|| AccountError::NoAccount(account_type.to_string()))?;
        if accounts.len() > 1 {
            info!(
                "{} accounts of type {}, using {}",
                accounts.len(),
                account_type,
                first.name
            );
        }
        Ok(first)
    }

    /// Typed read of the player state attribute.
    pub fn player_state(&self, account: &Account) -> Result<PlayerState, AccountError> {
        let record = self
            .records
            .get(&account.name)
            .ok_or_else(|| AccountError::UnknownAccount(account.name.clone()))?;
        match record.attributes.get(PLAYER_STATE_KEY) {
            None => Ok(PlayerState::default()),
            Some(value) => value
                .parse()
                .ok()
                .and_then(PlayerState::from_code)
                .ok_or_else(|| AccountError::InvalidAttribute {
                    key: PLAYER_STATE_KEY.to_string(),
                    value: value.clone(),
                }),
        }
    }

    /// Convert to JSON.
    pub fn to_json(&self) -> serde_json::Value {
        let accounts: Vec<serde_json::Value> = self
            .order
            .iter()
            .filter_map(|name| self.records.get(name))
            .map(|record| {
                serde_json::json!({
                    "name": record.account.name,
                    "account_type": record.account.account_type,
                    "attributes": record.attributes,
                })
            })
            .collect();
        serde_json::json!({ "accounts": accounts })
    }
}

impl AccountStore for AccountManager {
    fn user_data(&self, account: &Account, key: &str) -> Option<String> {
        self.records.get(&account.name)?.attributes.get(key).cloned()
    }

    fn set_user_data(&mut self, account: &Account, key: &str, value: String) {
        match self.records.get_mut(&account.name) {
            Some(record) => {
                trace!("{}: {} = {}", account.name, key, value);
                record.attributes.insert(key.to_string(), value);
            }
            None => warn!("ignoring {} for unknown account {}", key, account.name),
        }
    }

    fn remove_user_data(&mut self, account: &Account, key: &str) {
        if let Some(record) = self.records.get_mut(&account.name) {
            record.attributes.remove(key);
        }
    }
}
