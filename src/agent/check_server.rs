use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::agent::agent_internal::AgentInternal;
use crate::agent::check_client;
use crate::candidate::{CandidatePair, CandidatePairState, RemoteCandidateConfig};
use crate::state::IceProcessingState;
use crate::stream::IceMediaStream;
use crate::transport::TransportAddress;

/// One authenticated Binding Request as the transport hands it up. The
/// STUN stack already answered it; this side only updates pair state.
#[derive(Debug, Clone)]
pub struct IncomingCheck {
    /// The local transport address the request arrived on.
    pub local_addr: TransportAddress,
    /// The source address of the request.
    pub remote_addr: TransportAddress,
    /// The PRIORITY attribute value.
    pub priority: u32,
    /// Whether USE-CANDIDATE was present.
    pub use_candidate: bool,
    /// The peer's username fragment from USERNAME.
    pub remote_ufrag: String,
    /// Our username fragment from USERNAME.
    pub local_ufrag: String,
}

/// Digests an incoming connectivity check (RFC 8445 §7.3.1): resolve the
/// local candidate, learn peer-reflexive remotes, and grow a triggered
/// check out of it.
pub(crate) async fn process_binding_request(ai: &Arc<AgentInternal>, incoming: IncomingCheck) {
    let resolved = {
        let mut found = None;
        for stream in ai.streams().await {
            if let Some((component, local)) = stream.find_local(incoming.local_addr).await {
                found = Some((stream, component, local));
                break;
            }
        }
        found
    };

    let (stream, component, local) = match resolved {
        Some(resolved) => resolved,
        None => {
            log::debug!(
                "[{}]: dropping check toward unknown local address {}",
                ai.get_name(),
                incoming.local_addr
            );
            return;
        }
    };

    let remote = match component.find_remote_candidate(incoming.remote_addr).await {
        Some(remote) => remote,
        None => {
            // RFC 8445 §7.3.1.3: the source address is a candidate the
            // peer did not (or not yet) signal.
            let ufrag = match component.any_remote_ufrag().await {
                Some(ufrag) => ufrag,
                None => incoming.remote_ufrag.clone(),
            };
            let prflx = Arc::new(
                RemoteCandidateConfig {
                    component_id: component.id,
                    transport_addr: incoming.remote_addr,
                    priority: incoming.priority,
                    foundation: ai.foundations.obtain_peer_reflexive_foundation(),
                    ufrag,
                    ..RemoteCandidateConfig::default()
                }
                .new_candidate_peer_reflexive(),
            );
            component.add_remote_candidate(Arc::clone(&prflx)).await;
            log::debug!(
                "[{}]: discovered peer-reflexive remote candidate {}",
                ai.get_name(),
                prflx
            );
            prflx
        }
    };

    let check_list = stream.check_list();
    let (pair, known) = match check_list.find_pair(&local, &remote).await {
        Some(pair) => (pair, true),
        None => (
            Arc::new(CandidatePair::new(local, remote, ai.is_controlling())),
            false,
        ),
    };

    if incoming.use_candidate {
        pair.set_use_candidate_received();
    }

    if ai.state() == IceProcessingState::Waiting {
        // Connectivity establishment has not begun; remember the pair and
        // replay it as a triggered check on start.
        if !known {
            check_list.add_pair(Arc::clone(&pair)).await;
        }
        let mut pre_discovered = ai.pre_discovered.lock().await;
        pre_discovered.push((Arc::clone(&stream), pair));
        return;
    }

    if pair.state() != CandidatePairState::Failed {
        triggered_check(ai, &stream, pair, known, incoming.use_candidate).await;
    }
}

/// Queues a check in response to one we received; triggered checks jump
/// ahead of ordinary scheduling (RFC 8445 §7.3.1.4).
pub(crate) async fn triggered_check(
    ai: &Arc<AgentInternal>,
    stream: &Arc<IceMediaStream>,
    pair: Arc<CandidatePair>,
    known: bool,
    use_candidate: bool,
) {
    let check_list = stream.check_list();
    let was_frozen = check_list.is_frozen().await;

    if known {
        match pair.state() {
            CandidatePairState::Succeeded => {
                // Our own earlier check already validated the pair; a
                // nominating request only needs its flag confirmed.
                if use_candidate && !ai.is_controlling() {
                    ai.confirm_nomination(stream, &pair).await;
                }
                return;
            }
            CandidatePairState::InProgress => {
                // The outstanding transaction is beaten by the triggered
                // repeat; cancel it before requeueing.
                if let Some(transaction_id) = pair.take_transaction_id() {
                    {
                        let mut checks = ai.checks.lock().await;
                        checks.remove(&transaction_id);
                    }
                    ai.stun_stack.cancel_transaction(transaction_id).await;
                }
                ai.set_pair_state(stream, &pair, CandidatePairState::Waiting);
                check_list.push_triggered(pair).await;
            }
            _ => {
                ai.set_pair_state(stream, &pair, CandidatePairState::Waiting);
                check_list.push_triggered(pair).await;
            }
        }
    } else {
        check_list.add_pair(Arc::clone(&pair)).await;
        ai.set_pair_state(stream, &pair, CandidatePairState::Waiting);
        check_list.push_triggered(pair).await;
    }

    if ai.is_active()
        && (was_frozen || !check_list.pace_maker_running.load(Ordering::SeqCst))
    {
        check_client::start_pace_maker(ai, stream);
    }
}

/// Replays the checks that arrived before connectivity establishment
/// started. The check lists were rebuilt in the meantime, so each
/// remembered pair is re-located by its candidates first.
pub(crate) async fn drain_pre_discovered(ai: &Arc<AgentInternal>) {
    let pre_discovered = {
        let mut queue = ai.pre_discovered.lock().await;
        std::mem::take(&mut *queue)
    };

    for (stream, pair) in pre_discovered {
        let check_list = stream.check_list();
        let (target, known) = match check_list.find_pair(&pair.local, &pair.remote).await {
            Some(existing) => {
                if pair.use_candidate_received() {
                    existing.set_use_candidate_received();
                }
                (existing, true)
            }
            None => (pair, false),
        };

        let use_candidate = target.use_candidate_received();
        triggered_check(ai, &stream, target, known, use_candidate).await;
    }
}
