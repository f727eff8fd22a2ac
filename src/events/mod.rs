use std::sync::Arc;

use tokio::sync::broadcast;

use crate::candidate::{CandidatePair, CandidatePairState};
use crate::state::IceProcessingState;

/// Capacity of the agent's event channel; dispatch never blocks, slow
/// subscribers observe lag instead.
pub(crate) const EVENT_CHANNEL_SIZE: usize = 64;

/// Everything observable about a running agent, published on a broadcast
/// channel obtained from `Agent::subscribe`.
#[derive(Clone, Debug)]
pub enum IceEvent {
    /// A pair moved between check states.
    PairStateChanged {
        stream: String,
        pair: Arc<CandidatePair>,
        old: CandidatePairState,
        new: CandidatePairState,
    },
    /// A pair produced a successful check and entered the valid list.
    PairValidated {
        stream: String,
        pair: Arc<CandidatePair>,
    },
    /// A valid pair was nominated for media.
    PairNominated {
        stream: String,
        pair: Arc<CandidatePair>,
    },
    /// A consent-freshness round ended for a kept-alive pair.
    PairConsentFreshness {
        stream: String,
        pair: Arc<CandidatePair>,
        alive: bool,
    },
    /// The agent's overall processing state changed.
    IceStateChanged {
        old: IceProcessingState,
        new: IceProcessingState,
    },
}

pub(crate) fn event_channel() -> broadcast::Sender<IceEvent> {
    let (tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
    tx
}
