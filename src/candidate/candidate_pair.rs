use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use stun::agent::TransactionId;
use util::sync::Mutex as SyncMutex;

use super::{LocalCandidate, RemoteCandidate};

/// Represents the ICE candidate pair state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CandidatePairState {
    /// A check for this pair is deferred until its foundation group is
    /// unfrozen.
    #[serde(rename = "frozen")]
    Frozen = 0,

    /// A check can be performed for this pair but has not been sent yet.
    #[serde(rename = "waiting")]
    Waiting = 1,

    /// A check has been sent for this pair and its transaction is in
    /// progress.
    #[serde(rename = "in-progress")]
    InProgress = 2,

    /// A check for this pair produced a successful result.
    #[serde(rename = "succeeded")]
    Succeeded = 3,

    /// A check for this pair was already done and failed, either never
    /// producing any response or producing an unrecoverable one.
    #[serde(rename = "failed")]
    Failed = 4,
}

impl From<u8> for CandidatePairState {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Waiting,
            2 => Self::InProgress,
            3 => Self::Succeeded,
            4 => Self::Failed,
            _ => Self::Frozen,
        }
    }
}

impl Default for CandidatePairState {
    fn default() -> Self {
        Self::Frozen
    }
}

impl fmt::Display for CandidatePairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Frozen => "frozen",
            Self::Waiting => "waiting",
            Self::InProgress => "in-progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl CandidatePairState {
    /// True once the pair can no longer change its check outcome.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Succeeded || self == Self::Failed
    }
}

/// A combination of a local and a remote candidate, the unit connectivity
/// checks operate on. The pair holds identity for the whole session:
/// its state changes but the object is never replaced.
pub struct CandidatePair {
    pub local: Arc<LocalCandidate>,
    pub remote: Arc<RemoteCandidate>,

    ice_role_controlling: AtomicBool,
    state: AtomicU8,
    nominated: AtomicBool,
    valid: AtomicBool,
    use_candidate_received: AtomicBool,
    use_candidate_sent: AtomicBool,
    // Present exactly while the pair is in-progress.
    transaction_id: SyncMutex<Option<TransactionId>>,
    // Unix millis of the last confirmed consent, -1 when unknown.
    consent_freshness: AtomicI64,
}

impl fmt::Debug for CandidatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "prio {} (local, prio {}) {} <-> {} (remote, prio {})",
            self.priority(),
            self.local.priority(),
            self.local,
            self.remote,
            self.remote.priority()
        )
    }
}

impl fmt::Display for CandidatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "prio {} (local, prio {}) {} <-> {} (remote, prio {})",
            self.priority(),
            self.local.priority(),
            self.local,
            self.remote,
            self.remote.priority()
        )
    }
}

impl PartialEq for CandidatePair {
    fn eq(&self, other: &Self) -> bool {
        self.local.equal(&other.local) && self.remote.equal(&other.remote)
    }
}

impl CandidatePair {
    #[must_use]
    pub fn new(
        local: Arc<LocalCandidate>,
        remote: Arc<RemoteCandidate>,
        controlling: bool,
    ) -> Self {
        Self {
            local,
            remote,
            ice_role_controlling: AtomicBool::new(controlling),
            state: AtomicU8::new(CandidatePairState::Frozen as u8),
            nominated: AtomicBool::new(false),
            valid: AtomicBool::new(false),
            use_candidate_received: AtomicBool::new(false),
            use_candidate_sent: AtomicBool::new(false),
            transaction_id: SyncMutex::new(None),
            consent_freshness: AtomicI64::new(-1),
        }
    }

    /// RFC 5245 §5.7.2, computing pair priority and ordering pairs.
    /// Let G be the priority of the candidate provided by the controlling
    /// agent and D the controlled one's:
    /// `pair priority = 2^32*MIN(G,D) + 2*MAX(G,D) + (G>D?1:0)`
    #[must_use]
    pub fn priority(&self) -> u64 {
        let (g, d) = if self.ice_role_controlling.load(Ordering::SeqCst) {
            (self.local.priority(), self.remote.priority())
        } else {
            (self.remote.priority(), self.local.priority())
        };

        (u64::from(g.min(d)) << 32) + 2 * u64::from(g.max(d)) + u64::from(g > d)
    }

    /// The pair foundation, the concatenation of both candidate
    /// foundations, used by the unfreezing algorithm.
    #[must_use]
    pub fn foundation(&self) -> String {
        format!(
            "{}{}",
            self.local.data.foundation(),
            self.remote.data.foundation()
        )
    }

    #[must_use]
    pub fn state(&self) -> CandidatePairState {
        CandidatePairState::from(self.state.load(Ordering::SeqCst))
    }

    /// Moves the pair to `new`, returning the state it left. Leaving
    /// in-progress drops the transaction id so that the id is only ever
    /// present while a check is outstanding.
    pub(crate) fn set_state(&self, new: CandidatePairState) -> CandidatePairState {
        let old = CandidatePairState::from(self.state.swap(new as u8, Ordering::SeqCst));
        if new != CandidatePairState::InProgress {
            self.transaction_id.lock().take();
        }
        old
    }

    /// Marks the pair in-progress under the given outstanding transaction.
    pub(crate) fn begin_check(&self, transaction_id: TransactionId) -> CandidatePairState {
        *self.transaction_id.lock() = Some(transaction_id);
        CandidatePairState::from(
            self.state
                .swap(CandidatePairState::InProgress as u8, Ordering::SeqCst),
        )
    }

    /// The transaction currently in flight for this pair, if any.
    #[must_use]
    pub fn transaction_id(&self) -> Option<TransactionId> {
        *self.transaction_id.lock()
    }

    /// Takes the in-flight transaction id, for cancellation.
    pub(crate) fn take_transaction_id(&self) -> Option<TransactionId> {
        self.transaction_id.lock().take()
    }

    #[must_use]
    pub fn is_nominated(&self) -> bool {
        self.nominated.load(Ordering::SeqCst)
    }

    /// Sets the nominated flag; returns false when it was already set.
    pub(crate) fn nominate(&self) -> bool {
        !self.nominated.swap(true, Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_valid(&self) -> bool {
        !self.valid.swap(true, Ordering::SeqCst)
    }

    #[must_use]
    pub fn use_candidate_received(&self) -> bool {
        self.use_candidate_received.load(Ordering::SeqCst)
    }

    pub(crate) fn set_use_candidate_received(&self) {
        self.use_candidate_received.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn use_candidate_sent(&self) -> bool {
        self.use_candidate_sent.load(Ordering::SeqCst)
    }

    pub(crate) fn set_use_candidate_sent(&self) {
        self.use_candidate_sent.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_controlling(&self) -> bool {
        self.ice_role_controlling.load(Ordering::SeqCst)
    }

    /// Re-orients G and D after a role flip; the pair priority changes
    /// with it.
    pub(crate) fn set_controlling(&self, controlling: bool) {
        self.ice_role_controlling
            .store(controlling, Ordering::SeqCst);
    }

    /// Unix millis of the last proof the peer still consents to receive
    /// on this pair, -1 when no consent has been confirmed yet.
    #[must_use]
    pub fn consent_freshness(&self) -> i64 {
        self.consent_freshness.load(Ordering::SeqCst)
    }

    pub(crate) fn refresh_consent(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(-1);
        self.consent_freshness.store(now, Ordering::SeqCst);
    }
}
