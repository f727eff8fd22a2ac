#[cfg(test)]
mod checklist_test;

pub(crate) mod pairing;

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::candidate::{CandidatePair, CandidatePairState, LocalCandidate, RemoteCandidate};

/// The aggregate state of a check list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CheckListState {
    /// The list is populated and checks may still run.
    #[serde(rename = "running")]
    Running = 0,

    /// Every component of the stream has a nominated valid pair.
    #[serde(rename = "completed")]
    Completed = 1,

    /// Checks ended without covering the stream's components.
    #[serde(rename = "failed")]
    Failed = 2,
}

impl From<u8> for CheckListState {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Completed,
            2 => Self::Failed,
            _ => Self::Running,
        }
    }
}

impl fmt::Display for CheckListState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// The per-stream schedule of connectivity checks: pairs ordered by pair
/// priority, a FIFO of triggered checks that preempts them, and the
/// aggregate state.
pub struct CheckList {
    name: String,
    pairs: Mutex<Vec<Arc<CandidatePair>>>,
    triggered: Mutex<VecDeque<Arc<CandidatePair>>>,
    state: AtomicU8,

    // One Pace Maker and one grace timer per list at most.
    pub(crate) pace_maker_running: AtomicBool,
    pub(crate) grace_timer_armed: AtomicBool,
}

impl CheckList {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            pairs: Mutex::new(vec![]),
            triggered: Mutex::new(VecDeque::new()),
            state: AtomicU8::new(CheckListState::Running as u8),
            pace_maker_running: AtomicBool::new(false),
            grace_timer_armed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn state(&self) -> CheckListState {
        CheckListState::from(self.state.load(Ordering::SeqCst))
    }

    /// Ends the list; only the first of racing success and failure paths
    /// wins.
    pub(crate) fn try_finish(&self, to: CheckListState) -> bool {
        self.state
            .compare_exchange(
                CheckListState::Running as u8,
                to as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    pub async fn pairs(&self) -> Vec<Arc<CandidatePair>> {
        self.pairs.lock().await.clone()
    }

    pub(crate) async fn set_pairs(&self, mut pairs: Vec<Arc<CandidatePair>>) {
        pairs.sort_by(|a, b| b.priority().cmp(&a.priority()));
        *self.pairs.lock().await = pairs;
    }

    /// Inserts a pair keeping the descending priority order.
    pub(crate) async fn add_pair(&self, pair: Arc<CandidatePair>) {
        let mut pairs = self.pairs.lock().await;
        let priority = pair.priority();
        let at = pairs
            .iter()
            .position(|p| p.priority() < priority)
            .unwrap_or(pairs.len());
        pairs.insert(at, pair);
    }

    /// Restores the priority order after a role flip changed every pair
    /// priority.
    pub(crate) async fn resort(&self) {
        let mut pairs = self.pairs.lock().await;
        pairs.sort_by(|a, b| b.priority().cmp(&a.priority()));
    }

    pub async fn find_pair(
        &self,
        local: &Arc<LocalCandidate>,
        remote: &Arc<RemoteCandidate>,
    ) -> Option<Arc<CandidatePair>> {
        let pairs = self.pairs.lock().await;
        pairs
            .iter()
            .find(|p| p.local.equal(local) && p.remote.equal(remote))
            .cloned()
    }

    /// Queues a triggered check. A pair already queued is not queued
    /// twice.
    pub(crate) async fn push_triggered(&self, pair: Arc<CandidatePair>) {
        let mut triggered = self.triggered.lock().await;
        if !triggered.iter().any(|p| Arc::ptr_eq(p, &pair)) {
            triggered.push_back(pair);
        }
    }

    pub(crate) async fn pop_triggered(&self) -> Option<Arc<CandidatePair>> {
        self.triggered.lock().await.pop_front()
    }

    /// The highest-priority waiting pair, the next ordinary check.
    pub(crate) async fn next_waiting(&self) -> Option<Arc<CandidatePair>> {
        let pairs = self.pairs.lock().await;
        pairs
            .iter()
            .find(|p| p.state() == CandidatePairState::Waiting)
            .cloned()
    }

    /// A list is frozen while every one of its pairs is frozen.
    pub async fn is_frozen(&self) -> bool {
        let pairs = self.pairs.lock().await;
        !pairs.is_empty() && pairs.iter().all(|p| p.state() == CandidatePairState::Frozen)
    }

    /// A list is active while at least one pair is waiting or has a check
    /// in flight.
    pub async fn is_active(&self) -> bool {
        let pairs = self.pairs.lock().await;
        pairs.iter().any(|p| {
            matches!(
                p.state(),
                CandidatePairState::Waiting | CandidatePairState::InProgress
            )
        })
    }

    /// All checks are completed once no pair is frozen, waiting, or in
    /// progress.
    pub async fn all_checks_completed(&self) -> bool {
        let pairs = self.pairs.lock().await;
        !pairs.is_empty() && pairs.iter().all(|p| p.state().is_terminal())
    }

    /// Computes the RFC 8445 §6.1.2.6 initial states: within every
    /// foundation group the pair with the lowest component id (ties
    /// broken by highest priority) becomes waiting, the rest stay
    /// frozen. Returns the pairs that were unfrozen.
    pub(crate) async fn compute_initial_states(&self) -> Vec<Arc<CandidatePair>> {
        let pairs = self.pairs.lock().await;

        let mut elected: Vec<(String, Arc<CandidatePair>)> = vec![];
        for pair in pairs.iter() {
            let foundation = pair.foundation();
            match elected.iter_mut().find(|(f, _)| *f == foundation) {
                Some((_, best)) => {
                    let better = pair.local.data.component_id < best.local.data.component_id
                        || (pair.local.data.component_id == best.local.data.component_id
                            && pair.priority() > best.priority());
                    if better {
                        *best = Arc::clone(pair);
                    }
                }
                None => elected.push((foundation, Arc::clone(pair))),
            }
        }

        let mut unfrozen = vec![];
        for (_, pair) in elected {
            if pair.state() == CandidatePairState::Frozen {
                pair.set_state(CandidatePairState::Waiting);
                unfrozen.push(pair);
            }
        }
        unfrozen
    }

    /// Unfreezes every frozen pair whose foundation is in `foundations`.
    /// Returns the pairs that changed state.
    pub(crate) async fn unfreeze_foundations(
        &self,
        foundations: &HashSet<String>,
    ) -> Vec<Arc<CandidatePair>> {
        let pairs = self.pairs.lock().await;

        let mut unfrozen = vec![];
        for pair in pairs.iter() {
            if pair.state() == CandidatePairState::Frozen
                && foundations.contains(&pair.foundation())
            {
                pair.set_state(CandidatePairState::Waiting);
                unfrozen.push(Arc::clone(pair));
            }
        }
        unfrozen
    }

    /// Foundations of every pair currently on the list.
    pub(crate) async fn foundations(&self) -> HashSet<String> {
        let pairs = self.pairs.lock().await;
        pairs.iter().map(|p| p.foundation()).collect()
    }
}
