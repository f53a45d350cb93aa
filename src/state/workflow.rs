//! Per-account join workflow.
//!
//! Drives the [`JoinStateMachine`] against the join executor and the active
//! view. The view is passed in on every call; nothing here holds on to it.
//!
//! All calls for one account must come from a single actor. Callers sharing a
//! workflow between threads wrap it in a lock.

use std::collections::BTreeMap;

use super::account::{Account, AccountStore};
use super::join::{
    completion_channel, JoinError, JoinExecutor, JoinListener, JoinOutcome, JoinRequest,
    JoinSignal, ListenerError, MessageCategory,
};
use super::player::{
    InvalidTransition, JoinEvent, JoinStateMachine, PlayerState, PLAYER_JOIN_ERROR_KEY,
    PLAYER_KEY, PLAYER_STATE_KEY,
};
use super::search::Player;
use crate::error::Result;

/// The UI layer currently showing the workflow.
pub trait JoinView {
    fn show_progress(&mut self);

    fn dismiss_progress(&mut self);

    /// Ask for the password of `player`, then call
    /// [`JoinWorkflow::submit_password`].
    fn request_password(&mut self, player: &Player);

    /// Navigate to the joined player. `player` is unknown after a restart.
    fn show_active_player(&mut self, player: Option<&Player>);

    fn refresh_list(&mut self);

    fn show_join_failure(&mut self, error: Option<JoinError>, category: MessageCategory);
}

/// What selecting a player led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// The player needs a password first
    PasswordRequired,
    /// A join request was handed off
    Joining,
}

/// Join workflow for one account.
#[derive(Debug)]
pub struct JoinWorkflow {
    account: Account,
    machine: JoinStateMachine,
    listener: Option<JoinListener>,
}

impl JoinWorkflow {
    pub fn new(account: Account) -> Self {
        Self {
            account,
            machine: JoinStateMachine::new(),
            listener: None,
        }
    }

    /// Restore from the account's stored attributes.
    pub fn load<S>(account: Account, store: &S) -> Self
    where
        S: AccountStore + ?Sized,
    {
        let keys = [PLAYER_STATE_KEY, PLAYER_JOIN_ERROR_KEY, PLAYER_KEY];
        let metadata: BTreeMap<String, String> = keys
            .into_iter()
            .filter_map(|key| {
                store
                    .user_data(&account, key)
                    .map(|value| (key.to_string(), value))
            })
            .collect();
        let machine = JoinStateMachine::from_metadata(&metadata);
        debug!("{}: loaded player state {}", account.name, machine.state());
        Self {
            account,
            machine,
            listener: None,
        }
    }

    /// Write the current state to the account's attributes.
    pub fn persist<S>(&self, store: &mut S)
    where
        S: AccountStore + ?Sized,
    {
        let metadata = self.machine.to_metadata();
        for key in [PLAYER_STATE_KEY, PLAYER_JOIN_ERROR_KEY, PLAYER_KEY] {
            match metadata.get(key) {
                Some(value) => store.set_user_data(&self.account, key, value.clone()),
                None => store.remove_user_data(&self.account, key),
            }
        }
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn machine(&self) -> &JoinStateMachine {
        &self.machine
    }

    pub fn state(&self) -> PlayerState {
        self.machine.state()
    }

    /// Whether a completion listener is registered.
    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Register the completion listener.
    ///
    /// Idempotent: with a listener already in place nothing changes and `None`
    /// is returned. Otherwise the signal for the new listener is returned.
    pub fn register_listener(&mut self) -> Option<JoinSignal> {
        if self.listener.is_some() {
            trace!("{}: listener already registered", self.account.name);
            return None;
        }
        let (signal, listener) = completion_channel();
        self.listener = Some(listener);
        debug!("{}: listener registered", self.account.name);
        Some(signal)
    }

    /// React to the user picking a player from the list.
    pub fn select_player<E>(
        &mut self,
        player: Player,
        executor: &E,
        view: &mut dyn JoinView,
    ) -> Result<Selection>
    where
        E: JoinExecutor + ?Sized,
    {
        if player.has_password {
            debug!("{}: player {} needs a password", self.account.name, player.player_id);
            view.request_password(&player);
            return Ok(Selection::PasswordRequired);
        }
        self.initiate_join(player, None, executor, view)?;
        Ok(Selection::Joining)
    }

    /// Continue a join after the password was entered.
    pub fn submit_password<E>(
        &mut self,
        player: Player,
        password: String,
        executor: &E,
        view: &mut dyn JoinView,
    ) -> Result<()>
    where
        E: JoinExecutor + ?Sized,
    {
        self.initiate_join(player, Some(password), executor, view)
    }

    /// Start joining `player`.
    ///
    /// Rejected while a join is outstanding or while in a player. The listener
    /// is in place before the executor sees the request, so an executor that
    /// completes right away is still heard.
    pub fn initiate_join<E>(
        &mut self,
        player: Player,
        password: Option<String>,
        executor: &E,
        view: &mut dyn JoinView,
    ) -> Result<()>
    where
        E: JoinExecutor + ?Sized,
    {
        self.machine.apply_mut(JoinEvent::Initiate {
            player: player.clone(),
            password: password.clone(),
        })?;

        // Replaces any listener left over from an earlier join.
        let (signal, listener) = completion_channel();
        self.listener = Some(listener);

        info!("{}: joining player {}", self.account.name, player.player_id);
        view.show_progress();
        executor.execute(JoinRequest::new(self.account.clone(), player, password), signal);
        Ok(())
    }

    /// Apply an outcome if one has arrived. Never blocks.
    ///
    /// Returns the outcome that was applied, if any.
    pub fn poll(&mut self, view: &mut dyn JoinView) -> Result<Option<JoinOutcome>> {
        let Some(listener) = self.listener.as_mut() else {
            return Ok(None);
        };
        match listener.try_outcome() {
            Ok(Some(outcome)) => {
                self.listener = None;
                self.handle_outcome(outcome, view)?;
                Ok(Some(outcome))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.listener = None;
                Err(e.into())
            }
        }
    }

    /// Wait for the outstanding join and apply its outcome.
    ///
    /// Cancel safe: if the future is dropped before the outcome arrives the
    /// listener stays registered and a later [`poll`](Self::poll) or `wait`
    /// still sees it.
    pub async fn wait(&mut self, view: &mut dyn JoinView) -> Result<JoinOutcome> {
        let listener = self.listener.as_mut().ok_or(ListenerError::NotListening)?;
        let received = listener.recv().await;
        self.listener = None;
        let outcome = received?;
        self.handle_outcome(outcome, view)?;
        Ok(outcome)
    }

    fn handle_outcome(&mut self, outcome: JoinOutcome, view: &mut dyn JoinView) -> Result<()> {
        match outcome {
            JoinOutcome::Success => self.on_join_succeeded(view)?,
            JoinOutcome::Failed(error) => self.on_join_failed(error, view)?,
        }
        Ok(())
    }

    /// The join went through.
    pub fn on_join_succeeded(
        &mut self,
        view: &mut dyn JoinView,
    ) -> std::result::Result<(), InvalidTransition> {
        self.machine.apply_mut(JoinEvent::Succeeded)?;
        self.listener = None;
        info!("{}: joined player", self.account.name);
        view.dismiss_progress();
        view.show_active_player(self.machine.target());
        Ok(())
    }

    /// The join failed with `error`.
    pub fn on_join_failed(
        &mut self,
        error: JoinError,
        view: &mut dyn JoinView,
    ) -> std::result::Result<(), InvalidTransition> {
        self.machine.apply_mut(JoinEvent::Failed(error))?;
        self.listener = None;
        warn!("{}: join failed: {}", self.account.name, error);
        view.dismiss_progress();
        view.refresh_list();
        view.show_join_failure(Some(error), error.category());
        Ok(())
    }

    /// The user dismissed the failure dialog.
    pub fn acknowledge_failure(&mut self) -> std::result::Result<(), InvalidTransition> {
        self.machine.apply_mut(JoinEvent::AcknowledgeFailure)
    }

    /// The user left the joined player.
    pub fn leave(&mut self) -> std::result::Result<(), InvalidTransition> {
        self.machine.apply_mut(JoinEvent::Leave)?;
        info!("{}: left player", self.account.name);
        Ok(())
    }

    /// Bring a view up to date with the current state.
    ///
    /// Returns the signal of a freshly registered listener if a join is
    /// outstanding and nothing was listening for it, so the caller can hand it
    /// to whoever finishes the join.
    pub fn resume(&mut self, view: &mut dyn JoinView) -> Option<JoinSignal> {
        match self.machine.state() {
            PlayerState::JoiningPlayer => {
                debug!("{}: still joining", self.account.name);
                let signal = self.register_listener();
                if signal.is_some() {
                    warn!("{}: join outstanding without a listener", self.account.name);
                }
                view.show_progress();
                signal
            }
            PlayerState::PlayerJoinFailed => {
                let error = self.machine.last_error();
                let category = error
                    .map(|e| e.category())
                    .unwrap_or(MessageCategory::Unknown);
                view.dismiss_progress();
                view.show_join_failure(error, category);
                None
            }
            PlayerState::InPlayer => {
                view.dismiss_progress();
                view.show_active_player(self.machine.target());
                None
            }
            PlayerState::NotInPlayer => None,
        }
    }

    /// The view is going away.
    ///
    /// The listener stays registered; an outcome that arrives meanwhile is
    /// buffered and applied on the next [`poll`](Self::poll).
    pub fn pause(&self) {
        trace!("{}: paused in {}", self.account.name, self.machine.state());
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::Error;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    /// View that records every call.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingView {
        pub calls: Vec<String>,
    }

    impl JoinView for RecordingView {
        fn show_progress(&mut self) {
            self.calls.push("show_progress".to_string());
        }

        fn dismiss_progress(&mut self) {
            self.calls.push("dismiss_progress".to_string());
        }

        fn request_password(&mut self, player: &Player) {
            self.calls.push(format!("request_password:{}", player.player_id));
        }

        fn show_active_player(&mut self, player: Option<&Player>) {
            let id = player.map(|p| p.player_id.as_str()).unwrap_or("?");
            self.calls.push(format!("show_active_player:{}", id));
        }

        fn refresh_list(&mut self) {
            self.calls.push("refresh_list".to_string());
        }

        fn show_join_failure(&mut self, _error: Option<JoinError>, category: MessageCategory) {
            self.calls.push(format!("show_join_failure:{:?}", category));
        }
    }

    /// Executor that keeps requests and signals for the test to finish.
    #[derive(Debug, Default)]
    pub(crate) struct DeferredExecutor {
        pub pending: RefCell<Vec<(JoinRequest, JoinSignal)>>,
    }

    impl DeferredExecutor {
        pub fn take(&self) -> (JoinRequest, JoinSignal) {
            self.pending.borrow_mut().remove(0)
        }
    }

    impl JoinExecutor for DeferredExecutor {
        fn execute(&self, request: JoinRequest, signal: JoinSignal) {
            self.pending.borrow_mut().push((request, signal));
        }
    }

    /// Executor that finishes before `execute` returns.
    pub(crate) struct ImmediateExecutor(pub JoinOutcome);

    impl JoinExecutor for ImmediateExecutor {
        fn execute(&self, _request: JoinRequest, signal: JoinSignal) {
            signal.complete(self.0).unwrap();
        }
    }

    pub(crate) fn make_player(id: &str, has_password: bool) -> Player {
        Player {
            player_id: id.to_string(),
            name: format!("Player {}", id),
            owner_name: "Owner".to_string(),
            owner_id: "1".to_string(),
            latitude: 37.0,
            longitude: -122.0,
            has_password,
        }
    }

    fn make_workflow() -> JoinWorkflow {
        JoinWorkflow::new(Account::new("alice", "test"))
    }

    #[test]
    fn test_join_without_password() {
        let mut workflow = make_workflow();
        let executor = DeferredExecutor::default();
        let mut view = RecordingView::default();

        let selection = workflow
            .select_player(make_player("1", false), &executor, &mut view)
            .unwrap();
        assert_eq!(selection, Selection::Joining);
        assert_eq!(workflow.state(), PlayerState::JoiningPlayer);

        let (request, signal) = executor.take();
        assert_eq!(request.password, None);
        assert_eq!(workflow.poll(&mut view).unwrap(), None);

        // Completion while paused is buffered
        workflow.pause();
        signal.succeed().unwrap();
        assert!(workflow.is_listening());
        assert_eq!(workflow.poll(&mut view).unwrap(), Some(JoinOutcome::Success));
        assert_eq!(workflow.state(), PlayerState::InPlayer);
        assert_eq!(
            view.calls,
            vec!["show_progress", "dismiss_progress", "show_active_player:1"]
        );
    }

    #[test]
    fn test_join_with_bad_password() {
        let mut workflow = make_workflow();
        let executor = DeferredExecutor::default();
        let mut view = RecordingView::default();
        let player = make_player("2", true);

        let selection = workflow
            .select_player(player.clone(), &executor, &mut view)
            .unwrap();
        assert_eq!(selection, Selection::PasswordRequired);
        assert_eq!(workflow.state(), PlayerState::NotInPlayer);
        assert!(executor.pending.borrow().is_empty());

        workflow
            .submit_password(player, "abc".to_string(), &executor, &mut view)
            .unwrap();
        assert_eq!(workflow.state(), PlayerState::JoiningPlayer);

        let (request, signal) = executor.take();
        assert_eq!(request.password.as_deref(), Some("abc"));
        signal.fail(JoinError::PlayerPasswordError).unwrap();

        workflow.poll(&mut view).unwrap();
        assert_eq!(workflow.state(), PlayerState::PlayerJoinFailed);
        assert_eq!(
            view.calls,
            vec![
                "request_password:2",
                "show_progress",
                "dismiss_progress",
                "refresh_list",
                "show_join_failure:BadPassword",
            ]
        );

        workflow.acknowledge_failure().unwrap();
        assert_eq!(workflow.state(), PlayerState::NotInPlayer);
    }

    #[test]
    fn test_immediate_completion_not_missed() {
        let mut workflow = make_workflow();
        let mut view = RecordingView::default();

        workflow
            .initiate_join(
                make_player("3", false),
                None,
                &ImmediateExecutor(JoinOutcome::Success),
                &mut view,
            )
            .unwrap();
        assert_eq!(workflow.poll(&mut view).unwrap(), Some(JoinOutcome::Success));
        assert_eq!(workflow.state(), PlayerState::InPlayer);
    }

    #[test]
    fn test_second_initiate_rejected() {
        let mut workflow = make_workflow();
        let executor = DeferredExecutor::default();
        let mut view = RecordingView::default();

        workflow
            .initiate_join(make_player("1", false), None, &executor, &mut view)
            .unwrap();
        let result = workflow.initiate_join(make_player("2", false), None, &executor, &mut view);

        assert!(matches!(result, Err(Error::Transition(_))));
        assert_eq!(workflow.state(), PlayerState::JoiningPlayer);
        assert_eq!(workflow.machine().target().unwrap().player_id, "1");
        assert_eq!(executor.pending.borrow().len(), 1);
    }

    #[test]
    fn test_register_listener_idempotent() {
        let mut workflow = make_workflow();
        assert!(workflow.register_listener().is_some());
        assert!(workflow.register_listener().is_none());
        assert!(workflow.is_listening());
    }

    #[test]
    fn test_stray_completion_rejected() {
        let mut workflow = make_workflow();
        let mut view = RecordingView::default();

        assert!(workflow.on_join_succeeded(&mut view).is_err());
        assert!(workflow
            .on_join_failed(JoinError::ServerError, &mut view)
            .is_err());
        assert!(view.calls.is_empty());
    }

    #[test]
    fn test_dropped_signal_keeps_joining() {
        let mut workflow = make_workflow();
        let executor = DeferredExecutor::default();
        let mut view = RecordingView::default();

        workflow
            .initiate_join(make_player("1", false), None, &executor, &mut view)
            .unwrap();
        drop(executor.take());

        assert!(matches!(
            workflow.poll(&mut view),
            Err(Error::Listener(ListenerError::SignalDropped))
        ));
        assert_eq!(workflow.state(), PlayerState::JoiningPlayer);
        assert!(!workflow.is_listening());
    }

    #[test]
    fn test_resume_states() {
        let mut store = crate::state::AccountManager::new();
        let account = Account::new("alice", "test");
        store.add(account.clone()).unwrap();
        let mut view = RecordingView::default();

        // Joining with nobody listening hands out a new signal
        let mut joining = JoinWorkflow::new(account.clone());
        joining.machine = JoinStateMachine::at(PlayerState::JoiningPlayer);
        let signal = joining.resume(&mut view);
        assert!(signal.is_some());
        assert!(joining.resume(&mut view).is_none());

        signal.unwrap().fail(JoinError::BannedError).unwrap();
        joining.poll(&mut view).unwrap();
        joining.persist(&mut store);

        // A restarted workflow sees the stored failure
        let mut view = RecordingView::default();
        let mut restored = JoinWorkflow::load(account.clone(), &store);
        assert_eq!(restored.state(), PlayerState::PlayerJoinFailed);
        restored.resume(&mut view);
        assert_eq!(view.calls, vec!["dismiss_progress", "show_join_failure:Banned"]);

        restored.acknowledge_failure().unwrap();
        restored.persist(&mut store);
        assert_eq!(store.player_state(&account), Ok(PlayerState::NotInPlayer));
        assert_eq!(store.user_data(&account, PLAYER_JOIN_ERROR_KEY), None);
    }

    #[test]
    fn test_resume_in_player_after_external_update() {
        let mut store = crate::state::AccountManager::new();
        let account = Account::new("alice", "test");
        store.add(account.clone()).unwrap();

        // Whoever performs the join writes the state directly
        store.set_user_data(&account, PLAYER_STATE_KEY, PlayerState::InPlayer.code().to_string());

        let mut view = RecordingView::default();
        let mut workflow = JoinWorkflow::load(account, &store);
        assert!(workflow.resume(&mut view).is_none());
        assert_eq!(view.calls, vec!["dismiss_progress", "show_active_player:?"]);

        workflow.leave().unwrap();
        assert_eq!(workflow.state(), PlayerState::NotInPlayer);
    }

    #[test]
    fn test_unknown_stored_error_uses_fallback() {
        let mut store = crate::state::AccountManager::new();
        let account = Account::new("alice", "test");
        store.add(account.clone()).unwrap();
        store.set_user_data(&account, PLAYER_STATE_KEY, "3".to_string());
        store.set_user_data(&account, PLAYER_JOIN_ERROR_KEY, "RATE_LIMITED".to_string());

        let mut view = RecordingView::default();
        JoinWorkflow::load(account, &store).resume(&mut view);
        assert_eq!(view.calls, vec!["dismiss_progress", "show_join_failure:Unknown"]);
    }

    #[test]
    fn test_direct_outcome_drops_listener() {
        let mut workflow = make_workflow();
        let executor = DeferredExecutor::default();
        let mut view = RecordingView::default();

        workflow
            .initiate_join(make_player("1", false), None, &executor, &mut view)
            .unwrap();
        let (_, signal) = executor.take();
        workflow.on_join_succeeded(&mut view).unwrap();
        assert!(!workflow.is_listening());

        // A late completion has nobody to reach and is not applied twice
        assert_eq!(signal.succeed(), Err(JoinOutcome::Success));
        assert_eq!(workflow.poll(&mut view).unwrap(), None);
        assert_eq!(workflow.state(), PlayerState::InPlayer);
    }

    #[test]
    fn test_resume_in_player_shows_stored_player() {
        let mut store = crate::state::AccountManager::new();
        let account = Account::new("alice", "test");
        store.add(account.clone()).unwrap();
        let mut view = RecordingView::default();

        let mut workflow = JoinWorkflow::new(account.clone());
        workflow
            .initiate_join(
                make_player("5", false),
                None,
                &ImmediateExecutor(JoinOutcome::Success),
                &mut view,
            )
            .unwrap();
        workflow.poll(&mut view).unwrap();
        workflow.persist(&mut store);

        let mut view = RecordingView::default();
        JoinWorkflow::load(account, &store).resume(&mut view);
        assert_eq!(view.calls, vec!["dismiss_progress", "show_active_player:5"]);
    }

    #[tokio::test]
    async fn test_wait_without_join() {
        let mut workflow = make_workflow();
        let mut view = RecordingView::default();
        assert!(matches!(
            workflow.wait(&mut view).await,
            Err(Error::Listener(ListenerError::NotListening))
        ));
    }

    #[tokio::test]
    async fn test_abandoned_wait_keeps_outcome() {
        let mut workflow = make_workflow();
        let executor = DeferredExecutor::default();
        let mut view = RecordingView::default();

        workflow
            .initiate_join(make_player("1", false), None, &executor, &mut view)
            .unwrap();
        let (_, signal) = executor.take();

        tokio::select! {
            biased;
            _ = workflow.wait(&mut view) => panic!("no outcome was sent yet"),
            _ = std::future::ready(()) => {}
        }
        assert!(workflow.is_listening());

        signal.succeed().unwrap();
        assert_eq!(workflow.poll(&mut view).unwrap(), Some(JoinOutcome::Success));
        assert_eq!(workflow.state(), PlayerState::InPlayer);
    }

    #[tokio::test]
    async fn test_wait_for_outcome() {
        let mut workflow = make_workflow();
        let executor = DeferredExecutor::default();
        let mut view = RecordingView::default();

        workflow
            .initiate_join(make_player("1", false), None, &executor, &mut view)
            .unwrap();
        let (_, signal) = executor.take();
        let handle = tokio::spawn(async move {
            signal.fail(JoinError::PlayerFullError).unwrap();
        });

        let outcome = workflow.wait(&mut view).await.unwrap();
        handle.await.unwrap();
        assert_eq!(outcome, JoinOutcome::Failed(JoinError::PlayerFullError));
        assert_eq!(workflow.state(), PlayerState::PlayerJoinFailed);
    }
}
