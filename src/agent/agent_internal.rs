use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use stun::agent::TransactionId;
use stun::message::Message;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::sleep;

use crate::agent::agent_config::*;
use crate::agent::nominator::Nominator;
use crate::agent::{check_client, check_server, keepalive};
use crate::candidate::{CandidatePair, CandidatePairState};
use crate::checklist::{pairing, CheckListState};
use crate::events::{event_channel, IceEvent};
use crate::foundation::FoundationRegistry;
use crate::state::IceProcessingState;
use crate::stream::IceMediaStream;
use crate::stun_stack::{StunStack, TransactionEvent};
use crate::transport::TransportAddress;

/// Capacity of the channel the transaction engine reports outcomes on.
pub(crate) const TRANSACTION_CHANNEL_SIZE: usize = 64;

/// Whether an in-flight request is a connectivity check or a consent
/// refresh; outcomes route differently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CheckKind {
    Connectivity,
    Consent,
}

/// Everything the agent needs to interpret a transaction outcome: the
/// pair the check rode on and the request it carried.
pub(crate) struct PendingCheck {
    pub(crate) stream: Arc<IceMediaStream>,
    pub(crate) pair: Arc<CandidatePair>,
    pub(crate) destination: TransportAddress,
    pub(crate) source: TransportAddress,
    pub(crate) is_use_candidate: bool,
    pub(crate) request: Message,
    pub(crate) kind: CheckKind,
}

pub struct AgentInternal {
    pub(crate) settings: AgentSettings,

    pub(crate) streams: Mutex<Vec<Arc<IceMediaStream>>>,
    pub(crate) foundations: FoundationRegistry,

    pub(crate) local_ufrag: String,
    pub(crate) local_pwd: String,
    pub(crate) tie_breaker: AtomicU64,
    pub(crate) is_controlling: AtomicBool,
    pub(crate) generation: AtomicU32,

    state: AtomicU8,
    started: AtomicBool,
    freed: AtomicBool,
    keepalive_running: AtomicBool,

    pub(crate) event_tx: broadcast::Sender<IceEvent>,
    pub(crate) stun_stack: Arc<dyn StunStack + Send + Sync>,
    pub(crate) transaction_tx: mpsc::Sender<TransactionEvent>,
    pub(crate) transaction_rx: Mutex<Option<mpsc::Receiver<TransactionEvent>>>,

    /// In-flight checks keyed by transaction id; this is how a response
    /// or timeout finds its pair.
    pub(crate) checks: Mutex<HashMap<TransactionId, PendingCheck>>,

    /// Pairs discovered by incoming checks before connectivity
    /// establishment started, drained into the triggered queues on start.
    pub(crate) pre_discovered: Mutex<Vec<(Arc<IceMediaStream>, Arc<CandidatePair>)>>,

    pub(crate) nominator: Nominator,

    /// Fans out cancellation to every long-running task.
    pub(crate) done: broadcast::Sender<()>,
}

impl AgentInternal {
    pub(crate) fn new(
        settings: AgentSettings,
        stun_stack: Arc<dyn StunStack + Send + Sync>,
        local_ufrag: String,
        local_pwd: String,
        is_controlling: bool,
        tie_breaker: u64,
    ) -> Self {
        let (transaction_tx, transaction_rx) = mpsc::channel(TRANSACTION_CHANNEL_SIZE);
        let (done, _) = broadcast::channel(1);
        let nominator = Nominator::new(settings.nomination_strategy);

        Self {
            settings,
            streams: Mutex::new(vec![]),
            foundations: FoundationRegistry::new(),
            local_ufrag,
            local_pwd,
            tie_breaker: AtomicU64::new(tie_breaker),
            is_controlling: AtomicBool::new(is_controlling),
            generation: AtomicU32::new(0),
            state: AtomicU8::new(IceProcessingState::Waiting as u8),
            started: AtomicBool::new(false),
            freed: AtomicBool::new(false),
            keepalive_running: AtomicBool::new(false),
            event_tx: event_channel(),
            stun_stack,
            transaction_tx,
            transaction_rx: Mutex::new(Some(transaction_rx)),
            checks: Mutex::new(HashMap::new()),
            pre_discovered: Mutex::new(vec![]),
            nominator,
            done,
        }
    }

    pub(crate) fn state(&self) -> IceProcessingState {
        IceProcessingState::from(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn is_controlling(&self) -> bool {
        self.is_controlling.load(Ordering::SeqCst)
    }

    /// Checks are only initiated while the agent runs.
    pub(crate) fn is_active(&self) -> bool {
        self.state() == IceProcessingState::Running
    }

    pub(crate) fn get_name(&self) -> &str {
        if self.is_controlling() {
            "controlling"
        } else {
            "controlled"
        }
    }

    pub(crate) fn publish(&self, event: IceEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Compare-and-set state transition; returns false when another path
    /// got there first. Only the winner publishes.
    pub(crate) fn try_transition(
        &self,
        from: IceProcessingState,
        to: IceProcessingState,
    ) -> bool {
        let ok = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if ok {
            log::info!("[{}]: ICE state changed: {} -> {}", self.get_name(), from, to);
            self.publish(IceEvent::IceStateChanged { old: from, new: to });
        }
        ok
    }

    /// The `free` transition: everything except an already failed or
    /// terminated agent lands in terminated.
    fn transition_to_terminated(&self) {
        let result = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                let state = IceProcessingState::from(v);
                if state == IceProcessingState::Failed || state == IceProcessingState::Terminated
                {
                    None
                } else {
                    Some(IceProcessingState::Terminated as u8)
                }
            });

        if let Ok(old) = result {
            let old = IceProcessingState::from(old);
            log::info!(
                "[{}]: ICE state changed: {} -> {}",
                self.get_name(),
                old,
                IceProcessingState::Terminated
            );
            self.publish(IceEvent::IceStateChanged {
                old,
                new: IceProcessingState::Terminated,
            });
        }
    }

    /// Moves a pair to `new` and publishes the transition.
    pub(crate) fn set_pair_state(
        &self,
        stream: &IceMediaStream,
        pair: &Arc<CandidatePair>,
        new: CandidatePairState,
    ) -> CandidatePairState {
        let old = pair.set_state(new);
        if old != new {
            log::trace!(
                "[{}]: pair state {} -> {}: {}",
                self.get_name(),
                old,
                new,
                pair
            );
            self.publish(IceEvent::PairStateChanged {
                stream: stream.name.clone(),
                pair: Arc::clone(pair),
                old,
                new,
            });
        }
        old
    }

    pub(crate) fn fail_pair(&self, stream: &IceMediaStream, pair: &Arc<CandidatePair>) {
        self.set_pair_state(stream, pair, CandidatePairState::Failed);
    }

    pub(crate) async fn streams(&self) -> Vec<Arc<IceMediaStream>> {
        self.streams.lock().await.clone()
    }

    pub(crate) async fn stream(&self, name: &str) -> Option<Arc<IceMediaStream>> {
        let streams = self.streams.lock().await;
        streams.iter().find(|s| s.name == name).cloned()
    }

    /// Check lists that still have outgoing work, the multiplier of the
    /// pacing formula.
    pub(crate) async fn active_check_list_count(&self) -> usize {
        let streams = self.streams().await;
        let mut count = 0;
        for stream in &streams {
            if stream.check_list().is_active().await {
                count += 1;
            }
        }
        count
    }

    /// Flips the role and re-orients every pair priority before any
    /// further checks start.
    pub(crate) async fn set_controlling(&self, controlling: bool) {
        self.is_controlling.store(controlling, Ordering::SeqCst);
        log::info!("[{}]: role changed, recomputing pair priorities", self.get_name());

        for stream in self.streams().await {
            let check_list = stream.check_list();
            for pair in check_list.pairs().await {
                pair.set_controlling(controlling);
            }
            check_list.resort().await;
        }
    }

    /// Builds check lists, computes the first stream's initial states,
    /// drains pre-discovered pairs and starts the Pace Makers.
    pub(crate) async fn start_connectivity_establishment(self: &Arc<Self>) -> crate::error::Result<()> {
        if self.freed.load(Ordering::SeqCst) {
            return Err(crate::Error::ErrClosed);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(crate::Error::ErrMultipleStart);
        }

        self.try_transition(IceProcessingState::Waiting, IceProcessingState::Running);
        log::debug!(
            "[{}]: starting connectivity establishment, tie-breaker {}",
            self.get_name(),
            self.tie_breaker.load(Ordering::SeqCst)
        );

        self.start_event_routing();

        let streams = self.streams().await;
        if streams.is_empty() {
            log::warn!("[{}]: no streams to check", self.get_name());
            self.try_transition(IceProcessingState::Running, IceProcessingState::Failed);
            return Ok(());
        }

        self.init_check_lists(&streams).await;

        // Incoming checks that raced ahead of us become triggered checks
        // now.
        check_server::drain_pre_discovered(self).await;

        if self.settings.lite {
            return Ok(());
        }

        for stream in &streams {
            let check_list = stream.check_list();
            if !check_list.is_frozen().await {
                check_client::start_pace_maker(self, stream);
            }
        }

        Ok(())
    }

    async fn init_check_lists(&self, streams: &[Arc<IceMediaStream>]) {
        let controlling = self.is_controlling();
        let per_stream = (self.settings.max_check_list_size / streams.len()).max(1);

        for (index, stream) in streams.iter().enumerate() {
            let mut pairs = vec![];
            for component in stream.components().await {
                let locals = component.local_candidates().await;
                let remotes = component.remote_candidates().await;
                pairs.extend(pairing::build_pairs_for_component(
                    &locals,
                    &remotes,
                    controlling,
                    self.settings.allow_link_to_global,
                ));
            }

            pairs.sort_by(|a, b| b.priority().cmp(&a.priority()));
            pairs.truncate(per_stream);

            let check_list = stream.check_list();
            check_list.set_pairs(pairs).await;

            // Only the first stream starts unfrozen; the rest thaw
            // through the cross-stream rules.
            if index == 0 {
                for pair in check_list.compute_initial_states().await {
                    self.publish(IceEvent::PairStateChanged {
                        stream: stream.name.clone(),
                        pair,
                        old: CandidatePairState::Frozen,
                        new: CandidatePairState::Waiting,
                    });
                }
            }
        }
    }

    /// Spawns the task that serializes transaction outcomes into state
    /// machine transitions.
    fn start_event_routing(self: &Arc<Self>) {
        let mut rx = match self.transaction_rx.try_lock() {
            Ok(mut guard) => match guard.take() {
                Some(rx) => rx,
                None => return,
            },
            Err(_) => return,
        };

        let ai = Arc::clone(self);
        let mut done_rx = self.done.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Some(event) => ai.handle_transaction_event(event).await,
                        None => return,
                    },
                    _ = done_rx.recv() => return,
                }
            }
        });
    }

    async fn handle_transaction_event(self: &Arc<Self>, event: TransactionEvent) {
        let transaction_id = match &event {
            TransactionEvent::Response { transaction_id, .. }
            | TransactionEvent::Timeout { transaction_id, .. } => *transaction_id,
        };

        let check = {
            let mut checks = self.checks.lock().await;
            checks.remove(&transaction_id)
        };
        let check = match check {
            Some(check) => check,
            None => {
                log::warn!(
                    "[{}]: discarding outcome of unknown transaction {:?}",
                    self.get_name(),
                    transaction_id
                );
                return;
            }
        };

        match (check.kind, event) {
            (
                CheckKind::Connectivity,
                TransactionEvent::Response {
                    response,
                    local_addr,
                    remote_addr,
                    ..
                },
            ) => {
                check_client::process_response(self, check, response, local_addr, remote_addr)
                    .await;
            }
            (CheckKind::Connectivity, TransactionEvent::Timeout { .. }) => {
                check_client::process_timeout(self, check).await;
            }
            (
                CheckKind::Consent,
                TransactionEvent::Response {
                    local_addr,
                    remote_addr,
                    ..
                },
            ) => {
                keepalive::process_consent_response(self, check, local_addr, remote_addr);
            }
            (CheckKind::Consent, TransactionEvent::Timeout { .. }) => {
                keepalive::process_consent_timeout(self, check);
            }
        }
    }

    /// The aggregate update run after every terminal pair transition
    /// (RFC 8445 §7.2.5.3.3 and §8.1.2).
    pub(crate) async fn update_check_list_states(self: &Arc<Self>, stream: &Arc<IceMediaStream>) {
        let check_list = stream.check_list();

        if check_list.state() == CheckListState::Running
            && check_list.all_checks_completed().await
        {
            self.nominator.on_checks_ended(self, stream).await;

            if stream.nominated_covers_components().await {
                if check_list.try_finish(CheckListState::Completed) {
                    log::info!("[{}]: check list {} completed", self.get_name(), stream.name);
                }
            } else if !stream.valid_covers_components().await {
                self.arm_grace_timer(stream);
            }

            // An ended list unfreezes every still-frozen sibling.
            for other in self.streams().await {
                if Arc::ptr_eq(&other, stream) {
                    continue;
                }
                let other_list = other.check_list();
                if other_list.is_frozen().await {
                    for pair in other_list.compute_initial_states().await {
                        self.publish(IceEvent::PairStateChanged {
                            stream: other.name.clone(),
                            pair,
                            old: CandidatePairState::Frozen,
                            new: CandidatePairState::Waiting,
                        });
                    }
                    check_client::start_pace_maker(self, &other);
                }
            }
        }

        self.evaluate_overall_state().await;
    }

    /// A list that ended without covering its components gets one grace
    /// period for a late success before it fails.
    fn arm_grace_timer(self: &Arc<Self>, stream: &Arc<IceMediaStream>) {
        let check_list = stream.check_list();
        if check_list.grace_timer_armed.swap(true, Ordering::SeqCst) {
            return;
        }

        log::debug!(
            "[{}]: check list {} ended without coverage, arming grace timer",
            self.get_name(),
            stream.name
        );

        let ai = Arc::clone(self);
        let stream = Arc::clone(stream);
        let grace_period = self.settings.grace_period;
        let mut done_rx = self.done.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(grace_period) => {}
                _ = done_rx.recv() => return,
            }

            let check_list = stream.check_list();
            if check_list.all_checks_completed().await
                && !stream.valid_covers_components().await
                && check_list.try_finish(CheckListState::Failed)
            {
                log::info!("[{}]: check list {} failed", ai.get_name(), stream.name);
                ai.evaluate_overall_state().await;
            }
        });
    }

    /// Folds the per-list states into the agent state; compare-and-set
    /// keeps racing success and failure paths from double-firing.
    pub(crate) async fn evaluate_overall_state(self: &Arc<Self>) {
        let streams = self.streams().await;
        if streams.is_empty() {
            self.try_transition(IceProcessingState::Running, IceProcessingState::Failed);
            return;
        }

        let mut all_completed = true;
        let mut all_ended = true;
        for stream in &streams {
            match stream.check_list().state() {
                CheckListState::Completed => {}
                CheckListState::Failed => all_completed = false,
                CheckListState::Running => {
                    all_completed = false;
                    all_ended = false;
                }
            }
        }

        if all_completed {
            if self.try_transition(IceProcessingState::Running, IceProcessingState::Completed) {
                self.schedule_termination();
                if !self.settings.no_keepalives {
                    keepalive::start_keepalive(self);
                }
            }
        } else if all_ended {
            self.try_transition(IceProcessingState::Running, IceProcessingState::Failed);
        }
    }

    fn schedule_termination(self: &Arc<Self>) {
        let ai = Arc::clone(self);
        let delay = self.settings.termination_delay;
        let mut done_rx = self.done.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(delay) => {}
                _ = done_rx.recv() => return,
            }
            ai.try_transition(IceProcessingState::Completed, IceProcessingState::Terminated);
        });
    }

    /// Confirms a nomination on a valid pair: flags it, elects it as the
    /// component's selected pair, and completes the list once every
    /// component is covered.
    pub(crate) async fn confirm_nomination(
        self: &Arc<Self>,
        stream: &Arc<IceMediaStream>,
        pair: &Arc<CandidatePair>,
    ) {
        if pair.nominate() {
            log::debug!("[{}]: pair nominated: {}", self.get_name(), pair);
            self.publish(IceEvent::PairNominated {
                stream: stream.name.clone(),
                pair: Arc::clone(pair),
            });
        }

        if let Some(component) = stream.component(pair.local.data.component_id).await {
            if component.selected_pair().is_none() {
                component.set_selected_pair(Arc::clone(pair));
                log::info!(
                    "[{}]: selected pair for {}: {}",
                    self.get_name(),
                    component,
                    pair
                );
            }
        }

        if stream.nominated_covers_components().await
            && stream.check_list().try_finish(CheckListState::Completed)
        {
            log::info!("[{}]: check list {} completed", self.get_name(), stream.name);
        }
        self.evaluate_overall_state().await;
    }

    pub(crate) fn keepalive_claimed(&self) -> bool {
        self.keepalive_running.swap(true, Ordering::SeqCst)
    }

    /// Releases the agent: cancels tasks and outstanding transactions,
    /// terminates, and closes candidate sockets. Calling it twice is a
    /// no-op.
    pub(crate) async fn close(&self) -> crate::error::Result<()> {
        if self.freed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let _ = self.done.send(());

        let pending: Vec<TransactionId> = {
            let mut checks = self.checks.lock().await;
            checks.drain().map(|(id, _)| id).collect()
        };
        for transaction_id in pending {
            self.stun_stack.cancel_transaction(transaction_id).await;
        }

        self.transition_to_terminated();

        for stream in self.streams().await {
            stream.close().await;
        }

        Ok(())
    }
}
