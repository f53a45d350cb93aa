//! State management for discovering and joining players.
//!
//! This module provides the core state types and managers:
//!
//! - `search` - How to look for players, and what a search returns
//! - `session` - The player list: active search, last location fix, results
//! - `join` - Join requests, outcomes and the completion channel
//! - `player` - Join state machine (where is each account?)
//! - `account` - Account attribute store
//! - `user` - Users as listed by the server
//! - `workflow` - Per-account actor driving joins against collaborators
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               AppState                                  │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌──────────────────────┐   │
//! │  │ AccountManager  │   │  SearchSession  │   │ JoinWorkflow (each)  │   │
//! │  │                 │   │                 │   │                      │   │
//! │  │ name →          │   │ SearchSpec      │   │ JoinStateMachine     │   │
//! │  │   attributes    │◀──│ last known fix  │   │ JoinListener ◀───────┼── JoinSignal
//! │  │                 │   │ players         │   │                      │   │  (executor)
//! │  └────────▲────────┘   └─────────────────┘   └──────────┬───────────┘   │
//! │           │                 persist after each event    │               │
//! │           └─────────────────────────────────────────────┘               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod account;
pub mod join;
pub mod player;
pub mod search;
pub mod session;
pub mod user;
pub mod workflow;

use std::collections::HashMap;

// Re-export commonly used types
pub use account::{Account, AccountError, AccountManager, AccountRecord, AccountStore};
pub use join::{
    completion_channel, JoinError, JoinExecutor, JoinListener, JoinOutcome, JoinRequest,
    JoinSignal, ListenerError, MessageCategory,
};
pub use player::{InvalidTransition, JoinEvent, JoinStateMachine, PlayerState};
pub use search::{
    Coordinates, Player, PlayerSearcher, SearchError, SearchKind, SearchParams, SearchSpec,
};
pub use session::{SearchSession, SessionSnapshot};
pub use user::User;
pub use workflow::{JoinView, JoinWorkflow, Selection};

use crate::config::Config;
use crate::error::Result;

/// Combined application state.
///
/// This is an optional convenience struct that combines the account store,
/// the search session and one join workflow per account. You can also use the
/// pieces directly.
#[derive(Debug, Default)]
pub struct AppState {
    pub config: Config,
    pub accounts: AccountManager,
    pub session: SearchSession,
    /// Join workflows by account name
    workflows: HashMap<String, JoinWorkflow>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// The account searches and joins run as.
    pub fn active_account(&self) -> Result<Account> {
        Ok(self
            .accounts
            .primary(&self.config.account.account_type)?
            .clone())
    }

    /// Get the workflow for an account, loading it from the store if needed.
    pub fn workflow(&mut self, account: &Account) -> Result<&mut JoinWorkflow> {
        if !self.accounts.contains(account) {
            return Err(AccountError::UnknownAccount(account.name.clone()).into());
        }
        let accounts = &self.accounts;
        Ok(self
            .workflows
            .entry(account.name.clone())
            .or_insert_with(|| JoinWorkflow::load(account.clone(), accounts)))
    }

    /// Get the workflow for an account if it was loaded.
    pub fn get_workflow(&self, account_name: &str) -> Option<&JoinWorkflow> {
        self.workflows.get(account_name)
    }

    /// Drop the in-memory workflow. Its stored state stays.
    pub fn remove_workflow(&mut self, account_name: &str) -> Option<JoinWorkflow> {
        self.workflows.remove(account_name)
    }

    /// Apply an outcome or user event to an account and persist the result.
    pub fn apply_join_event(
        &mut self,
        account: &Account,
        event: JoinEvent,
        view: &mut dyn JoinView,
    ) -> Result<()> {
        let workflow = self.workflow(account)?;
        match event {
            JoinEvent::Initiate { .. } => {
                // Needs an executor; go through `join` instead.
                return Err(InvalidTransition {
                    from: workflow.state(),
                    event,
                    reason: "Use AppState::join to start a join",
                }
                .into());
            }
            JoinEvent::Succeeded => workflow.on_join_succeeded(view)?,
            JoinEvent::Failed(error) => workflow.on_join_failed(error, view)?,
            JoinEvent::AcknowledgeFailure => workflow.acknowledge_failure()?,
            JoinEvent::Leave => workflow.leave()?,
        }
        self.persist(account);
        Ok(())
    }

    /// Select a player on behalf of the active account and persist.
    pub fn select_player<E>(
        &mut self,
        player: Player,
        executor: &E,
        view: &mut dyn JoinView,
    ) -> Result<Selection>
    where
        E: JoinExecutor + ?Sized,
    {
        let account = self.active_account()?;
        let selection = self.workflow(&account)?.select_player(player, executor, view)?;
        self.persist(&account);
        Ok(selection)
    }

    /// Join a player on behalf of the active account and persist.
    pub fn join<E>(
        &mut self,
        player: Player,
        password: Option<String>,
        executor: &E,
        view: &mut dyn JoinView,
    ) -> Result<()>
    where
        E: JoinExecutor + ?Sized,
    {
        let account = self.active_account()?;
        self.workflow(&account)?
            .initiate_join(player, password, executor, view)?;
        self.persist(&account);
        Ok(())
    }

    /// Apply any arrived join outcomes and persist them.
    ///
    /// Returns the accounts whose join finished.
    pub fn poll(&mut self, view: &mut dyn JoinView) -> Vec<(String, JoinOutcome)> {
        let mut finished = Vec::new();
        for (name, workflow) in &mut self.workflows {
            match workflow.poll(view) {
                Ok(Some(outcome)) => finished.push((name.clone(), outcome)),
                Ok(None) => {}
                Err(e) => warn!("{}: {}", name, e),
            }
        }
        for (name, _) in &finished {
            if let Some(workflow) = self.workflows.get(name) {
                workflow.persist(&mut self.accounts);
            }
        }
        finished
    }

    fn persist(&mut self, account: &Account) {
        if let Some(workflow) = self.workflows.get(&account.name) {
            workflow.persist(&mut self.accounts);
        }
    }

    /// Seed the session with the best last known fix of the configured
    /// providers.
    pub fn seed_location<F>(&mut self, fix_for: F)
    where
        F: FnMut(&str) -> Option<Coordinates>,
    {
        let fixes = self.config.preferred_fixes(fix_for);
        self.session.seed_location(fixes);
    }

    /// Feed a location fix into the search session.
    ///
    /// Fixes closer than the configured minimum distance to the last known
    /// one are dropped. Returns whether the fix was taken.
    pub fn on_location_changed(&mut self, coordinates: Coordinates) -> bool {
        if !self
            .config
            .location
            .accepts(self.session.last_known(), coordinates)
        {
            trace!("ignoring fix {}, too close", coordinates);
            return false;
        }
        self.session.on_location_changed(coordinates);
        true
    }

    /// Bring the view up to date for the active account.
    ///
    /// Unless the account is in a player, an empty list is searched again.
    /// Returns the signal of a freshly registered listener, see
    /// [`JoinWorkflow::resume`].
    pub fn resume<S>(
        &mut self,
        searcher: &S,
        view: &mut dyn JoinView,
    ) -> Result<Option<JoinSignal>>
    where
        S: PlayerSearcher + ?Sized,
    {
        let account = self.active_account()?;
        let workflow = self.workflow(&account)?;
        let signal = workflow.resume(view);
        let in_player = workflow.state() == PlayerState::InPlayer;
        if !in_player && self.session.players().is_empty() {
            self.session.refresh(searcher, &account);
            view.refresh_list();
        }
        Ok(signal)
    }

    /// Re-run the active search as the active account.
    ///
    /// Without an account the list shows the no-account text.
    pub fn refresh<S>(&mut self, searcher: &S)
    where
        S: PlayerSearcher + ?Sized,
    {
        match self.active_account() {
            Ok(account) => self.session.refresh(searcher, &account),
            Err(e) => {
                warn!("not searching: {}", e);
                self.session.show_error(SearchError::NoAccount);
            }
        }
    }
}
