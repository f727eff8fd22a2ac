use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::time::sleep;
use util::sync::Mutex as SyncMutex;

use crate::agent::agent_internal::AgentInternal;
use crate::agent::check_client;
use crate::candidate::{CandidatePair, CandidatePairState};
use crate::events::IceEvent;
use crate::stream::IceMediaStream;

/// How the controlling agent picks which valid pair carries media.
/// Controlled agents never nominate; they confirm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum NominationStrategy {
    /// Nominate the first pair that validates.
    #[serde(rename = "first-valid")]
    NominateFirstValid,

    /// Wait until the pair's check list has run dry, then nominate the
    /// highest-priority valid pair of each component.
    #[serde(rename = "highest-priority")]
    NominateHighestPriority,

    /// Nominate the first direct pair immediately; when a relayed pair
    /// validates first, hold it briefly in case a direct path still
    /// comes through.
    #[serde(rename = "first-host-or-reflexive")]
    NominateFirstHostOrReflexiveValid,
}

impl Default for NominationStrategy {
    fn default() -> Self {
        Self::NominateFirstValid
    }
}

type ComponentKey = (String, u16);

/// The controlling side's nomination bookkeeping. Hooks are invoked from
/// the agent's event-routing task, so per-strategy state only needs
/// short lock scopes.
pub(crate) struct Nominator {
    strategy: NominationStrategy,
    /// Components whose nomination has been issued.
    claimed: SyncMutex<HashSet<ComponentKey>>,
    /// Components whose relay fallback timer is armed.
    armed: SyncMutex<HashSet<ComponentKey>>,
    /// The relayed pair held back while the timer runs.
    held_relay: SyncMutex<HashMap<ComponentKey, Arc<CandidatePair>>>,
}

impl Nominator {
    pub(crate) fn new(strategy: NominationStrategy) -> Self {
        Self {
            strategy,
            claimed: SyncMutex::new(HashSet::new()),
            armed: SyncMutex::new(HashSet::new()),
            held_relay: SyncMutex::new(HashMap::new()),
        }
    }

    fn key(stream: &IceMediaStream, pair: &CandidatePair) -> ComponentKey {
        (stream.name.clone(), pair.local.data.component_id)
    }

    /// Marks the component nominated; false when some pair already
    /// claimed it.
    fn claim(&self, key: &ComponentKey) -> bool {
        self.claimed.lock().insert(key.clone())
    }

    fn arm(&self, key: &ComponentKey) -> bool {
        self.armed.lock().insert(key.clone())
    }

    /// A pair entered the valid list of `stream`.
    pub(crate) async fn on_pair_validated(
        &self,
        ai: &Arc<AgentInternal>,
        stream: &Arc<IceMediaStream>,
        pair: &Arc<CandidatePair>,
    ) {
        if !ai.is_controlling() {
            return;
        }

        let key = Self::key(stream, pair);
        match self.strategy {
            NominationStrategy::NominateFirstValid => {
                if self.claim(&key) {
                    nominate(ai, stream, pair).await;
                }
            }
            NominationStrategy::NominateHighestPriority => {
                if stream.check_list().all_checks_completed().await {
                    self.nominate_best_per_component(ai, stream).await;
                }
            }
            NominationStrategy::NominateFirstHostOrReflexiveValid => {
                if !pair.local.is_relayed() {
                    if self.claim(&key) {
                        nominate(ai, stream, pair).await;
                    }
                    return;
                }

                // A relayed pair validated first: hold it for a moment,
                // a direct path may still prove out.
                self.held_relay.lock().insert(key.clone(), Arc::clone(pair));
                if self.arm(&key) {
                    self.start_relay_timer(ai, stream, key);
                }
            }
        }
    }

    /// A pair failed terminally; the relay fallback may no longer have
    /// anything to wait for.
    pub(crate) async fn on_pair_failed(
        &self,
        ai: &Arc<AgentInternal>,
        stream: &Arc<IceMediaStream>,
        pair: &Arc<CandidatePair>,
    ) {
        if !ai.is_controlling()
            || self.strategy != NominationStrategy::NominateFirstHostOrReflexiveValid
        {
            return;
        }

        let key = Self::key(stream, pair);
        let held = self.held_relay.lock().get(&key).cloned();
        let held = match held {
            Some(held) => held,
            None => return,
        };

        let component_id = key.1;
        let all_direct_failed = stream
            .check_list()
            .pairs()
            .await
            .iter()
            .filter(|p| p.local.data.component_id == component_id && !p.local.is_relayed())
            .all(|p| p.state() == CandidatePairState::Failed);

        if all_direct_failed && self.claim(&key) {
            nominate(ai, stream, &held).await;
        }
    }

    /// Every check on the stream's list reached a terminal state.
    pub(crate) async fn on_checks_ended(
        &self,
        ai: &Arc<AgentInternal>,
        stream: &Arc<IceMediaStream>,
    ) {
        if !ai.is_controlling() {
            return;
        }
        if self.strategy != NominationStrategy::NominateHighestPriority {
            return;
        }
        self.nominate_best_per_component(ai, stream).await;
    }

    async fn nominate_best_per_component(
        &self,
        ai: &Arc<AgentInternal>,
        stream: &Arc<IceMediaStream>,
    ) {
        let valid_list = stream.valid_list().await;

        for component in stream.components().await {
            let best = valid_list
                .iter()
                .filter(|p| p.local.data.component_id == component.id)
                .max_by_key(|p| p.priority());

            if let Some(best) = best {
                let key = (stream.name.clone(), component.id);
                if self.claim(&key) {
                    nominate(ai, stream, best).await;
                }
            }
        }
    }

    fn start_relay_timer(
        &self,
        ai: &Arc<AgentInternal>,
        stream: &Arc<IceMediaStream>,
        key: ComponentKey,
    ) {
        let ai = Arc::clone(ai);
        let stream = Arc::clone(stream);
        let wait = ai.settings.relay_nomination_wait;
        let mut done_rx = ai.done.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(wait) => {}
                _ = done_rx.recv() => return,
            }

            let held = ai.nominator.held_relay.lock().get(&key).cloned();
            if let Some(held) = held {
                if ai.nominator.claim(&key) {
                    nominate(&ai, &stream, &held).await;
                }
            }
        });
    }
}

/// Flags the pair and queues the USE-CANDIDATE-bearing triggered check.
/// A second call for the same pair does nothing.
pub(crate) async fn nominate(
    ai: &Arc<AgentInternal>,
    stream: &Arc<IceMediaStream>,
    pair: &Arc<CandidatePair>,
) {
    if !ai.is_controlling() {
        return;
    }
    if !pair.nominate() {
        return;
    }

    log::debug!("[{}]: nominating pair: {}", ai.get_name(), pair);
    ai.publish(IceEvent::PairNominated {
        stream: stream.name.clone(),
        pair: Arc::clone(pair),
    });

    stream.check_list().push_triggered(Arc::clone(pair)).await;
    if ai.is_active() {
        check_client::start_pace_maker(ai, stream);
    }
}
