//! Session lifecycle.
//!
//! [`SessionManager`] is where local intent and remote truth meet. Every
//! mutation goes through `&mut self`: subscription callbacks only push into an
//! inbound queue, which the manager drains at the start of each operation, so
//! remote updates and local moves never interleave.

use std::sync::Arc;

use async_std::channel::{Receiver, Sender};
use log::{debug, info, warn};

use super::arbiter::{self, Decision, RejectReason};
use super::board::{BoardRecord, BoardState, MoveEvent, Position, Role};
use super::channel::{ChangeCallback, StoreError, SubscriptionHandle, SyncChannel};
use super::config::SessionConfig;
use super::identity::{SessionCode, SessionIdentity};
use super::outbox::{Inbound, Outbox};
use super::persistence::{IdentityStore, PersistenceError};
use super::phase::{PhaseEvent, SessionPhase};

/// Something the UI should know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A remote update or a reset changed the board
    BoardChanged {
        position: Position,
        turn_owner: Role,
        my_turn: bool,
    },

    /// Local state is confirmed by the store
    Synced,

    /// A publish or subscription failed. Local state is kept.
    Desynced { error: StoreError },

    /// Local storage failed; the session will not survive a restart.
    /// Reported once per manager.
    PersistenceUnavailable { error: PersistenceError },
}

/// Session lifecycle errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Only one session per client
    AlreadyActive(SessionCode),
    InvalidCode,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyActive(code) => write!(f, "Already in session {}", code),
            Self::InvalidCode => write!(f, "Session code is empty"),
        }
    }
}

impl std::error::Error for SessionError {}

struct ActiveSession {
    identity: SessionIdentity,
    board: BoardState,
    subscription: Option<SubscriptionHandle>,
    outbox: Outbox,

    /// Last record we published, until its echo arrives or the publish fails.
    /// Notifications that differ from it predate our write.
    awaiting_echo: Option<(u64, BoardRecord)>,

    /// Board holds a local write the store has not confirmed
    unconfirmed: bool,

    /// Whether the board reflects the store. False after join/resume until
    /// the first notification.
    board_known: bool,

    /// A background subscribe is still retrying
    resubscribing: bool,
}

pub struct SessionManager {
    config: SessionConfig,
    channel: Arc<dyn SyncChannel>,
    identities: Box<dyn IdentityStore>,
    phase: SessionPhase,
    active: Option<ActiveSession>,

    /// Bumped per session; stale queue entries carry an old value
    epoch: u64,

    inbound_tx: Sender<Inbound>,
    inbound_rx: Receiver<Inbound>,

    /// Observable events not yet collected by `pump`
    events: Vec<SessionEvent>,

    persistence_reported: bool,
}

impl SessionManager {
    pub fn new(
        channel: Arc<dyn SyncChannel>,
        identities: Box<dyn IdentityStore>,
        config: SessionConfig,
    ) -> Self {
        let (inbound_tx, inbound_rx) = async_std::channel::unbounded();
        Self {
            config,
            channel,
            identities,
            phase: SessionPhase::Idle,
            active: None,
            epoch: 0,
            inbound_tx,
            inbound_rx,
            events: Vec::new(),
            persistence_reported: false,
        }
    }

    /// Start a new session as the first mover and publish the starting board.
    ///
    /// If the store is unreachable the session still exists locally: the
    /// initial publish is retried in the background and the phase stays
    /// short of `Synced` until the store echoes it back.
    pub fn create_session(&mut self) -> Result<SessionIdentity, SessionError> {
        self.pump_inbound();
        self.ensure_idle()?;

        let identity = SessionIdentity::creator(SessionCode::generate());
        info!("Creating session {}", identity.session_code);
        self.persist(&identity);
        self.start(identity.clone(), PhaseEvent::Create);
        if let Some(active) = &mut self.active {
            active.board_known = true;
        }
        self.publish(BoardRecord::initial(self.config.starting_position.clone()));
        Ok(identity)
    }

    /// Join an existing session as the second mover. Never writes to the store.
    pub fn join_session(&mut self, code: &str) -> Result<SessionIdentity, SessionError> {
        self.pump_inbound();
        let session_code = SessionCode::parse(code).ok_or(SessionError::InvalidCode)?;
        self.ensure_idle()?;

        let identity = SessionIdentity::joiner(session_code);
        info!("Joining session {}", identity.session_code);
        self.persist(&identity);
        self.start(identity.clone(), PhaseEvent::Join);
        Ok(identity)
    }

    /// Pick up the persisted session, if any.
    pub fn resume_session(&mut self) -> Option<SessionIdentity> {
        self.pump_inbound();
        if let Some(active) = &self.active {
            return Some(active.identity.clone());
        }

        let identity = match self.identities.get() {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                debug!("No saved session to resume");
                return None;
            }
            Err(err) => {
                self.persistence_failed(err);
                return None;
            }
        };
        info!(
            "Resuming session {} as {}",
            identity.session_code, identity.role
        );
        self.start(identity.clone(), PhaseEvent::Resume);
        Some(identity)
    }

    /// Play a move made on the local board.
    ///
    /// On acceptance the board is updated immediately and the new record is
    /// published in the background. On rejection nothing changes.
    pub fn apply_local_move(&mut self, mv: &MoveEvent) -> Result<(), RejectReason> {
        self.pump_inbound();

        let decision = match &self.active {
            Some(active) if !active.board_known => {
                debug!("Turn owner unknown until the first notification");
                Decision::Reject(RejectReason::NotMyTurn)
            }
            Some(active) => arbiter::decide(Some(&active.board), Some(&active.identity), mv),
            None => arbiter::decide(None, None, mv),
        };
        let next_turn = match decision {
            Decision::Accept { next_turn } => next_turn,
            Decision::Reject(reason) => {
                debug!("Rejected move {}: {}", mv.notation(), reason);
                return Err(reason);
            }
        };
        if mv.color.is_none() {
            debug!("Move {} carries no color tag", mv.notation());
        }

        let active = self.active.as_mut().ok_or(RejectReason::NoActiveSession)?;
        active
            .board
            .apply_local_accepted(mv, mv.position_after.clone(), next_turn);
        let record = active.board.snapshot();
        info!("Played {}, {} to move", mv.notation(), next_turn);
        self.publish(record);
        Ok(())
    }

    /// Put the starting position back with the first mover to play, whoever's
    /// turn it is.
    pub fn reset_session(&mut self) -> Result<(), RejectReason> {
        self.pump_inbound();

        let starting_position = self.config.starting_position.clone();
        let active = self.active.as_mut().ok_or(RejectReason::NoActiveSession)?;
        info!("Resetting session {}", active.identity.session_code);
        active.board_known = true;
        if active.board.reset(starting_position.clone()) {
            let my_turn = active.board.is_turn_of(active.identity.role);
            self.events.push(SessionEvent::BoardChanged {
                position: starting_position.clone(),
                turn_owner: Role::First,
                my_turn,
            });
        }
        self.publish(BoardRecord::initial(starting_position));
        Ok(())
    }

    /// Forget the session. Safe to call at any time.
    pub fn leave_session(&mut self) {
        if let Some(active) = self.active.take() {
            info!("Leaving session {}", active.identity.session_code);
            if let Some(handle) = active.subscription {
                self.channel.unsubscribe(handle);
            }
            active.outbox.close();
            self.epoch += 1;
            self.transition(PhaseEvent::Leave);
        }
        if let Err(err) = self.identities.remove() {
            self.persistence_failed(err);
        }
        // Anything still queued belongs to the old session
        while self.inbound_rx.try_recv().is_ok() {}
    }

    /// Recover after a desync: resubscribe if the subscription failed and
    /// republish the local board if the store never confirmed it.
    ///
    /// A subscription whose echo of our last write never came is replaced,
    /// so the current remote record is delivered again.
    pub fn resync(&mut self) -> Result<(), RejectReason> {
        self.pump_inbound();

        let active = self.active.as_mut().ok_or(RejectReason::NoActiveSession)?;
        if active.awaiting_echo.is_some() && active.outbox.in_flight() == 0 {
            if let Some(handle) = active.subscription.take() {
                info!("Echo of our last write never arrived, resubscribing");
                self.channel.unsubscribe(handle);
            }
        }
        let needs_subscription = active.subscription.is_none();
        let republish = if active.unconfirmed && active.awaiting_echo.is_none() {
            Some(active.board.snapshot())
        } else {
            None
        };

        if needs_subscription {
            self.subscribe();
        }
        if let Some(record) = republish {
            info!("Republishing local board ({} to move)", record.turn_owner);
            self.publish(record);
        }
        Ok(())
    }

    /// Process everything that arrived asynchronously and collect events.
    pub fn pump(&mut self) -> Vec<SessionEvent> {
        self.pump_inbound();
        std::mem::take(&mut self.events)
    }

    /// Like [`pump`](Self::pump), but first wait for every outstanding publish
    /// and background subscribe to report its outcome.
    pub async fn settle(&mut self) -> Vec<SessionEvent> {
        self.pump_inbound();
        while self.active.as_ref().map_or(false, |active| {
            active.outbox.in_flight() > 0 || active.resubscribing
        }) {
            match self.inbound_rx.recv().await {
                Ok(inbound) => self.handle_inbound(inbound),
                Err(_) => break,
            }
        }
        self.pump()
    }

    pub fn identity(&self) -> Option<&SessionIdentity> {
        self.active.as_ref().map(|active| &active.identity)
    }

    pub fn session_code(&self) -> Option<&SessionCode> {
        self.identity().map(|identity| &identity.session_code)
    }

    pub fn board(&self) -> Option<&BoardState> {
        self.active.as_ref().map(|active| &active.board)
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_synced(&self) -> bool {
        self.phase.is_synced()
    }

    /// Whether a move made now would pass the turn check. Reflects the last
    /// `pump`.
    pub fn is_my_turn(&self) -> bool {
        self.active.as_ref().map_or(false, |active| {
            active.board_known && active.board.is_turn_of(active.identity.role)
        })
    }

    /// Convert to JSON for the UI.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "phase": self.phase.as_str(),
            "session": self.identity().map(|identity| identity.to_json()),
            "board": self.board().map(|board| board.to_json()),
            "my_turn": self.is_my_turn(),
        })
    }

    fn ensure_idle(&self) -> Result<(), SessionError> {
        match &self.active {
            Some(active) => Err(SessionError::AlreadyActive(
                active.identity.session_code.clone(),
            )),
            None => Ok(()),
        }
    }

    fn start(&mut self, identity: SessionIdentity, event: PhaseEvent) {
        self.epoch += 1;
        let outbox = Outbox::open(
            Arc::clone(&self.channel),
            identity.session_code.clone(),
            self.epoch,
            self.config.retry,
            self.inbound_tx.clone(),
        );
        self.active = Some(ActiveSession {
            identity,
            board: BoardState::new(self.config.starting_position.clone()),
            subscription: None,
            outbox,
            awaiting_echo: None,
            unconfirmed: false,
            board_known: false,
            resubscribing: false,
        });
        self.transition(event);
        self.subscribe();
    }

    fn subscribe(&mut self) {
        let Some(active) = &mut self.active else { return };
        let tx = self.inbound_tx.clone();
        let epoch = self.epoch;
        let on_change: ChangeCallback = Arc::new(move |record: BoardRecord| {
            let _ = tx.try_send(Inbound::Remote { epoch, record });
        });

        let result = self
            .channel
            .subscribe(&active.identity.session_code, Arc::clone(&on_change));
        match result {
            Ok(handle) => {
                debug!("Subscribed to {}", active.identity.session_code.store_path());
                active.subscription = Some(handle);
                // With nothing in flight, the first notification is current truth
                if active.outbox.in_flight() == 0 {
                    active.awaiting_echo = None;
                }
                self.transition(PhaseEvent::Subscribed);
            }
            Err(err) => {
                warn!(
                    "Cannot subscribe to session {}: {}",
                    active.identity.session_code, err
                );
                if !active.resubscribing {
                    active.resubscribing = active.outbox.retry_subscribe(on_change);
                }
                self.sync_failed(err);
            }
        }
    }

    fn publish(&mut self, record: BoardRecord) {
        let Some(active) = &mut self.active else { return };
        let seq = active.outbox.send(record.clone());
        active.awaiting_echo = Some((seq, record));
        active.unconfirmed = true;
        if active.subscription.is_some() {
            self.transition(PhaseEvent::LocalWrite);
        } else {
            // Without a subscription nothing can confirm the write
            debug!("Publishing #{} while unsubscribed, staying {}", seq, self.phase);
        }
    }

    fn persist(&mut self, identity: &SessionIdentity) {
        if let Err(err) = self.identities.set(identity) {
            self.persistence_failed(err);
        }
    }

    fn persistence_failed(&mut self, error: PersistenceError) {
        warn!("Session persistence failed: {}", error);
        if !self.persistence_reported {
            self.persistence_reported = true;
            self.events
                .push(SessionEvent::PersistenceUnavailable { error });
        }
    }

    fn sync_failed(&mut self, error: StoreError) {
        self.transition(PhaseEvent::SyncFailed);
        self.events.push(SessionEvent::Desynced { error });
    }

    fn transition(&mut self, event: PhaseEvent) {
        let was_synced = self.phase.is_synced();
        match self.phase.apply_mut(event) {
            Ok(()) => {
                if self.phase.is_synced() && !was_synced {
                    info!("Session in sync");
                    self.events.push(SessionEvent::Synced);
                }
            }
            Err(err) => warn!("{}", err),
        }
    }

    fn pump_inbound(&mut self) {
        while let Ok(inbound) = self.inbound_rx.try_recv() {
            self.handle_inbound(inbound);
        }
    }

    fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Remote { epoch, record } => self.handle_remote(epoch, record),
            Inbound::Published { epoch, seq, result } => {
                self.handle_published(epoch, seq, result)
            }
            Inbound::Subscribed { epoch, result } => self.handle_subscribed(epoch, result),
        }
    }

    fn handle_remote(&mut self, epoch: u64, record: BoardRecord) {
        if epoch != self.epoch {
            debug!("Ignoring notification from a previous session");
            return;
        }
        let Some(active) = &mut self.active else { return };

        // Current value from a background subscribe whose handle is not in yet
        if active.subscription.is_none() && active.outbox.in_flight() == 0 {
            active.awaiting_echo = None;
        }
        if let Some((_, expected)) = &active.awaiting_echo {
            if *expected != record {
                debug!(
                    "Dropping stale notification ({} to move) while awaiting our echo",
                    record.turn_owner
                );
                return;
            }
            active.awaiting_echo = None;
        }
        active.unconfirmed = false;
        active.board_known = true;

        let changed = active
            .board
            .apply_remote(record.position.clone(), record.turn_owner);
        if changed {
            let my_turn = active.board.is_turn_of(active.identity.role);
            debug!("Board updated remotely, {} to move", record.turn_owner);
            self.events.push(SessionEvent::BoardChanged {
                position: record.position,
                turn_owner: record.turn_owner,
                my_turn,
            });
        }
        self.transition(PhaseEvent::Confirmed);
    }

    fn handle_published(&mut self, epoch: u64, seq: u64, result: Result<(), StoreError>) {
        if epoch != self.epoch {
            debug!("Discarding publish result #{} from a previous session", seq);
            return;
        }
        let Some(active) = &mut self.active else { return };
        if !active.outbox.acknowledge(seq) {
            debug!("Report for unknown publish #{}", seq);
        }
        let awaited = matches!(&active.awaiting_echo, Some((awaited, _)) if *awaited == seq);

        let error = match result {
            Ok(()) => {
                if awaited && active.subscription.is_none() {
                    // Landed while unsubscribed; no echo is coming
                    debug!("Publish #{} landed without a subscription", seq);
                    active.awaiting_echo = None;
                    active.unconfirmed = false;
                }
                return;
            }
            Err(error) => error,
        };
        if awaited {
            active.awaiting_echo = None;
        }
        warn!(
            "Session {} is out of sync: {}",
            active.identity.session_code, error
        );
        self.sync_failed(error);
    }

    fn handle_subscribed(&mut self, epoch: u64, result: Result<SubscriptionHandle, StoreError>) {
        if epoch != self.epoch || self.active.is_none() {
            debug!("Dropping subscription from a previous session");
            if let Ok(handle) = result {
                self.channel.unsubscribe(handle);
            }
            return;
        }
        let Some(active) = &mut self.active else { return };
        active.resubscribing = false;

        match result {
            Ok(handle) if active.subscription.is_some() => {
                // resync got there first
                self.channel.unsubscribe(handle);
            }
            Ok(handle) => {
                info!("Resubscribed to session {}", active.identity.session_code);
                active.subscription = Some(handle);
                self.transition(PhaseEvent::Subscribed);
            }
            Err(_) if active.subscription.is_some() => {}
            Err(error) => {
                warn!(
                    "Giving up on subscribing to session {}: {}",
                    active.identity.session_code, error
                );
                self.sync_failed(error);
            }
        }
    }
}

impl Drop for SessionManager {
    // A dropped manager is a reload, not a leave: the persisted identity stays.
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            if let Some(handle) = active.subscription {
                self.channel.unsubscribe(handle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::board::{Color, STARTING_POSITION};
    use crate::sync::config::RetryPolicy;
    use crate::sync::memory_store::MemoryStore;
    use crate::sync::persistence::MemoryIdentityStore;
    use pretty_assertions::assert_eq;

    const AFTER_E4: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR";
    const AFTER_E5: &str = "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR";

    fn make_manager(store: &MemoryStore, identities: &MemoryIdentityStore) -> SessionManager {
        let config = SessionConfig::new().with_retry(RetryPolicy::no_retry());
        SessionManager::new(
            Arc::new(store.clone()),
            Box::new(identities.clone()),
            config,
        )
    }

    fn e2e4() -> MoveEvent {
        MoveEvent::new("e2", "e4", Position::new(AFTER_E4))
    }

    fn e7e5() -> MoveEvent {
        MoveEvent::new("e7", "e5", Position::new(AFTER_E5))
    }

    fn record(position: &str, turn_owner: Role) -> BoardRecord {
        BoardRecord::new(Position::new(position), turn_owner)
    }

    #[async_std::test]
    async fn test_create_session() {
        let store = MemoryStore::new();
        let identities = MemoryIdentityStore::new();
        let mut manager = make_manager(&store, &identities);

        let identity = manager.create_session().unwrap();
        assert_eq!(identity.role, Role::First);
        assert_eq!(identities.peek(), Some(identity.clone()));
        assert!(!manager.is_synced());

        let events = manager.settle().await;
        // Our own echo changes nothing on the board
        assert_eq!(events, vec![SessionEvent::Synced]);
        assert_eq!(
            store.record(&identity.session_code),
            Some(record(STARTING_POSITION, Role::First))
        );
        assert_eq!(manager.phase(), SessionPhase::Synced);
        assert!(manager.is_my_turn());
    }

    #[test]
    fn test_single_active_session() {
        let store = MemoryStore::new();
        let identities = MemoryIdentityStore::new();
        let mut manager = make_manager(&store, &identities);

        let identity = manager.create_session().unwrap();
        assert_eq!(
            manager.create_session(),
            Err(SessionError::AlreadyActive(identity.session_code.clone()))
        );
        assert_eq!(
            manager.join_session("123").unwrap_err(),
            SessionError::AlreadyActive(identity.session_code)
        );
    }

    #[test]
    fn test_join_session_does_not_write() {
        let store = MemoryStore::new();
        let identities = MemoryIdentityStore::new();
        let mut manager = make_manager(&store, &identities);

        let identity = manager.join_session("1700000000000").unwrap();
        assert_eq!(identity.role, Role::Second);
        assert_eq!(identity.session_code.as_str(), "1700000000000");
        assert_eq!(identities.peek().unwrap().role, Role::Second);
        assert_eq!(store.write_count(), 0);
        assert_eq!(store.subscriber_count(&identity.session_code), 1);
    }

    #[test]
    fn test_join_invalid_code() {
        let store = MemoryStore::new();
        let identities = MemoryIdentityStore::new();
        let mut manager = make_manager(&store, &identities);

        assert_eq!(manager.join_session("  "), Err(SessionError::InvalidCode));
        assert!(manager.identity().is_none());
        assert_eq!(identities.peek(), None);
    }

    #[test]
    fn test_move_without_session() {
        let store = MemoryStore::new();
        let identities = MemoryIdentityStore::new();
        let mut manager = make_manager(&store, &identities);

        assert_eq!(
            manager.apply_local_move(&e2e4()),
            Err(RejectReason::NoActiveSession)
        );
        assert_eq!(manager.reset_session(), Err(RejectReason::NoActiveSession));
        assert_eq!(manager.resync(), Err(RejectReason::NoActiveSession));
    }

    #[async_std::test]
    async fn test_rejections_leave_turn_unchanged() {
        let store = MemoryStore::new();
        let identities = MemoryIdentityStore::new();
        let mut manager = make_manager(&store, &identities);
        manager.create_session().unwrap();
        manager.settle().await;

        manager.apply_local_move(&e2e4()).unwrap();
        manager.settle().await;
        let board_after_move = manager.board().unwrap().clone();

        for _ in 0..3 {
            assert_eq!(
                manager.apply_local_move(&e7e5()),
                Err(RejectReason::NotMyTurn)
            );
        }
        assert_eq!(manager.board().unwrap(), &board_after_move);
        assert_eq!(manager.board().unwrap().turn_owner(), Role::Second);
        assert_eq!(store.write_count(), 2);
    }

    #[async_std::test]
    async fn test_wrong_color() {
        let store = MemoryStore::new();
        let identities = MemoryIdentityStore::new();
        let mut manager = make_manager(&store, &identities);
        manager.create_session().unwrap();
        manager.settle().await;

        let result = manager.apply_local_move(&e7e5().with_color(Color::Black));
        assert_eq!(result, Err(RejectReason::WrongColor));
        assert_eq!(manager.board().unwrap().turn_owner(), Role::First);

        manager
            .apply_local_move(&e2e4().with_color(Color::White))
            .unwrap();
        assert_eq!(manager.board().unwrap().turn_owner(), Role::Second);
    }

    #[async_std::test]
    async fn test_stale_notification_does_not_clobber_local_move() {
        let store = MemoryStore::new();
        let identities = MemoryIdentityStore::new();
        let mut manager = make_manager(&store, &identities);
        let identity = manager.create_session().unwrap();
        manager.settle().await;

        // A write that lands before ours, but whose notification is late
        store.set_delivery_paused(true);
        store.put(
            &identity.session_code,
            record(STARTING_POSITION, Role::First),
        );
        manager.apply_local_move(&e2e4()).unwrap();
        manager.settle().await;
        store.set_delivery_paused(false);

        let events = manager.pump();
        assert_eq!(events, vec![SessionEvent::Synced]);
        assert_eq!(manager.board().unwrap().position().as_str(), AFTER_E4);
        assert_eq!(manager.board().unwrap().turn_owner(), Role::Second);
    }

    #[async_std::test]
    async fn test_publish_failure_keeps_local_state() {
        let store = MemoryStore::new();
        let identities = MemoryIdentityStore::new();
        let mut manager = make_manager(&store, &identities);
        let identity = manager.create_session().unwrap();
        manager.settle().await;

        store.set_available(false);
        manager.apply_local_move(&e2e4()).unwrap();
        let events = manager.settle().await;

        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            SessionEvent::Desynced {
                error: StoreError::Unavailable(_)
            }
        ));
        assert_eq!(manager.phase(), SessionPhase::Desynced);
        assert_eq!(manager.board().unwrap().position().as_str(), AFTER_E4);
        assert_eq!(
            store.record(&identity.session_code),
            Some(record(STARTING_POSITION, Role::First))
        );

        // Store is back, user asks to retry
        store.set_available(true);
        manager.resync().unwrap();
        let events = manager.settle().await;
        assert_eq!(events, vec![SessionEvent::Synced]);
        assert_eq!(
            store.record(&identity.session_code),
            Some(record(AFTER_E4, Role::Second))
        );
    }

    #[async_std::test]
    async fn test_create_while_store_offline() {
        let store = MemoryStore::new();
        store.set_available(false);
        let identities = MemoryIdentityStore::new();
        let mut manager = make_manager(&store, &identities);

        let identity = manager.create_session().unwrap();
        assert_eq!(identity.role, Role::First);
        assert!(!manager.is_synced());

        let events = manager.settle().await;
        // Subscription and initial publish both fail
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| matches!(e, SessionEvent::Desynced { .. })));
        assert_eq!(manager.phase(), SessionPhase::Desynced);
        assert_eq!(store.write_count(), 0);

        store.set_available(true);
        manager.resync().unwrap();
        let events = manager.settle().await;
        assert_eq!(events, vec![SessionEvent::Synced]);
        assert_eq!(store.subscriber_count(&identity.session_code), 1);
        assert_eq!(
            store.record(&identity.session_code),
            Some(record(STARTING_POSITION, Role::First))
        );
    }

    #[async_std::test]
    async fn test_create_recovers_when_store_returns() {
        let store = MemoryStore::new();
        store.set_available(false);
        let identities = MemoryIdentityStore::new();
        let retry = RetryPolicy {
            max_attempts: 50,
            backoff_ms: 5,
        };
        let mut manager = SessionManager::new(
            Arc::new(store.clone()),
            Box::new(identities.clone()),
            SessionConfig::new().with_retry(retry),
        );

        let identity = manager.create_session().unwrap();
        let events = manager.pump();
        assert!(matches!(
            events.as_slice(),
            [SessionEvent::Desynced { .. }]
        ));
        // The initial publish must not hide the missing subscription
        assert_eq!(manager.phase(), SessionPhase::Desynced);

        store.set_available(true);
        let events = manager.settle().await;
        assert_eq!(events, vec![SessionEvent::Synced]);
        assert_eq!(manager.phase(), SessionPhase::Synced);
        assert_eq!(store.subscriber_count(&identity.session_code), 1);
        assert_eq!(
            store.record(&identity.session_code),
            Some(record(STARTING_POSITION, Role::First))
        );

        // Later writes reach us again
        store.put(&identity.session_code, record(AFTER_E4, Role::Second));
        assert_eq!(
            manager.pump(),
            vec![SessionEvent::BoardChanged {
                position: Position::new(AFTER_E4),
                turn_owner: Role::Second,
                my_turn: false,
            }]
        );
    }

    #[async_std::test]
    async fn test_resync_replaces_subscription_missing_echo() {
        let store = MemoryStore::new();
        let identities = MemoryIdentityStore::new();
        let mut manager = make_manager(&store, &identities);
        let identity = manager.create_session().unwrap();
        manager.settle().await;

        // Our write lands but its notification never shows up
        store.set_delivery_paused(true);
        manager.apply_local_move(&e2e4()).unwrap();
        assert!(manager.settle().await.is_empty());
        assert_eq!(manager.phase(), SessionPhase::Pending);

        manager.resync().unwrap();
        assert_eq!(manager.pump(), vec![SessionEvent::Synced]);
        assert_eq!(store.subscriber_count(&identity.session_code), 1);
        assert_eq!(store.write_count(), 2);

        // The late echo changes nothing
        store.set_delivery_paused(false);
        assert!(manager.pump().is_empty());
        assert_eq!(manager.board().unwrap().turn_owner(), Role::Second);
    }

    #[async_std::test]
    async fn test_persistence_failure_reported_once() {
        let store = MemoryStore::new();
        let identities = MemoryIdentityStore::new();
        identities.set_available(false);
        let mut manager = make_manager(&store, &identities);

        manager.create_session().unwrap();
        let events = manager.settle().await;
        assert!(matches!(
            events[0],
            SessionEvent::PersistenceUnavailable { .. }
        ));
        assert_eq!(events[1], SessionEvent::Synced);

        // Session works in memory regardless
        manager.apply_local_move(&e2e4()).unwrap();
        manager.settle().await;

        manager.leave_session();
        manager.create_session().unwrap();
        let events = manager.settle().await;
        assert_eq!(events, vec![SessionEvent::Synced]);
        assert_eq!(manager.resume_session().map(|i| i.role), Some(Role::First));
    }

    #[async_std::test]
    async fn test_reset_mid_turn() {
        let store = MemoryStore::new();
        let identities = MemoryIdentityStore::new();
        let mut manager = make_manager(&store, &identities);
        let identity = manager.create_session().unwrap();
        manager.settle().await;
        manager.apply_local_move(&e2e4()).unwrap();
        manager.settle().await;

        manager.reset_session().unwrap();
        let events = manager.pump();
        assert_eq!(
            events.first(),
            Some(&SessionEvent::BoardChanged {
                position: Position::starting(),
                turn_owner: Role::First,
                my_turn: true,
            })
        );
        manager.settle().await;
        assert_eq!(
            store.record(&identity.session_code),
            Some(record(STARTING_POSITION, Role::First))
        );
        assert!(manager.board().unwrap().last_move().is_none());
    }

    #[async_std::test]
    async fn test_leave_is_idempotent() {
        let store = MemoryStore::new();
        let identities = MemoryIdentityStore::new();
        let mut manager = make_manager(&store, &identities);
        let identity = manager.create_session().unwrap();

        manager.leave_session();
        manager.leave_session();

        assert_eq!(manager.phase(), SessionPhase::Idle);
        assert!(manager.identity().is_none());
        assert_eq!(store.subscriber_count(&identity.session_code), 0);
        assert_eq!(manager.resume_session(), None);
        // The in-flight initial publish may land, but nothing comes of it
        assert!(manager.settle().await.is_empty());
        assert_eq!(manager.phase(), SessionPhase::Idle);
    }

    #[async_std::test]
    async fn test_remote_updates_after_leave_are_ignored() {
        let store = MemoryStore::new();
        let identities = MemoryIdentityStore::new();
        let mut manager = make_manager(&store, &identities);
        let code = manager.join_session("1700000000000").unwrap().session_code;

        store.set_delivery_paused(true);
        store.put(&code, record(AFTER_E4, Role::Second));
        manager.leave_session();
        store.set_delivery_paused(false);

        assert!(manager.pump().is_empty());
        assert!(manager.board().is_none());
    }

    #[test]
    fn test_resume_restores_identity() {
        let store = MemoryStore::new();
        let saved = SessionIdentity::joiner(SessionCode::parse("1700000000000").unwrap());
        let identities = MemoryIdentityStore::with_identity(saved.clone());
        let mut manager = make_manager(&store, &identities);

        let resumed = manager.resume_session().unwrap();
        assert_eq!(resumed, saved);
        assert_eq!(manager.identity(), Some(&saved));
        assert_eq!(store.subscriber_count(&saved.session_code), 1);

        // Resuming again does not subscribe twice
        assert_eq!(manager.resume_session(), Some(saved.clone()));
        assert_eq!(store.subscriber_count(&saved.session_code), 1);
    }

    #[test]
    fn test_resume_without_saved_session() {
        let store = MemoryStore::new();
        let identities = MemoryIdentityStore::new();
        let mut manager = make_manager(&store, &identities);

        assert_eq!(manager.resume_session(), None);
        assert_eq!(manager.phase(), SessionPhase::Idle);
    }

    #[test]
    fn test_resumed_creator_waits_for_remote_board() {
        let store = MemoryStore::new();
        let saved = SessionIdentity::creator(SessionCode::parse("1700000000000").unwrap());
        let identities = MemoryIdentityStore::with_identity(saved);
        let mut manager = make_manager(&store, &identities);
        manager.resume_session().unwrap();

        // Nothing in the store yet, so the turn owner is unknown
        assert!(!manager.is_my_turn());
        assert_eq!(
            manager.apply_local_move(&e2e4()),
            Err(RejectReason::NotMyTurn)
        );
    }

    #[test]
    fn test_drop_keeps_saved_session() {
        let store = MemoryStore::new();
        let identities = MemoryIdentityStore::new();
        let code = {
            let mut manager = make_manager(&store, &identities);
            manager.create_session().unwrap().session_code
        };
        assert_eq!(store.subscriber_count(&code), 0);

        let mut reloaded = make_manager(&store, &identities);
        let resumed = reloaded.resume_session().unwrap();
        assert_eq!(resumed.session_code, code);
        assert_eq!(resumed.role, Role::First);
    }

    #[async_std::test]
    async fn test_to_json() {
        let store = MemoryStore::new();
        let identities = MemoryIdentityStore::new();
        let mut manager = make_manager(&store, &identities);
        assert_eq!(manager.to_json()["phase"], "idle");

        manager.create_session().unwrap();
        manager.settle().await;
        let json = manager.to_json();
        assert_eq!(json["phase"], "synced");
        assert_eq!(json["session"]["role"], "first");
        assert_eq!(json["board"]["turn_owner"], "first");
        assert_eq!(json["my_turn"], true);
    }
}
