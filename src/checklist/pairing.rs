use std::collections::HashSet;
use std::sync::Arc;

use crate::candidate::{CandidatePair, CandidateType, LocalCandidate, RemoteCandidate};
use crate::transport::{TcpType, TransportAddress};

/// Forms, orders and prunes the candidate pairs of one component
/// (RFC 8445 §6.1.2.2 through §6.1.2.4).
///
/// Reflexive local candidates are replaced by their base before
/// duplicate elimination. The caller truncates across components and
/// computes initial states.
pub(crate) fn build_pairs_for_component(
    locals: &[Arc<LocalCandidate>],
    remotes: &[Arc<RemoteCandidate>],
    controlling: bool,
    allow_link_to_global: bool,
) -> Vec<Arc<CandidatePair>> {
    let mut pairs: Vec<Arc<CandidatePair>> = vec![];
    for local in locals {
        for remote in remotes {
            if remote.addr().port() == 0 {
                continue;
            }
            if !local.addr().can_reach(&remote.addr(), allow_link_to_global) {
                continue;
            }
            pairs.push(Arc::new(CandidatePair::new(
                Arc::clone(local),
                Arc::clone(remote),
                controlling,
            )));
        }
    }

    pairs.sort_by(|a, b| b.priority().cmp(&a.priority()));

    prune_pairs(pairs, controlling)
}

fn prune_pairs(
    pairs: Vec<Arc<CandidatePair>>,
    controlling: bool,
) -> Vec<Arc<CandidatePair>> {
    let mut seen: HashSet<(TransportAddress, TransportAddress)> = HashSet::new();
    let mut kept = vec![];

    for pair in pairs {
        let local = match pair.local.data.candidate_type {
            CandidateType::ServerReflexive | CandidateType::PeerReflexive => pair.local.base(),
            _ => Arc::clone(&pair.local),
        };

        if local.data.transport() != pair.remote.data.transport() {
            continue;
        }
        if !seen.insert((local.addr(), pair.remote.addr())) {
            continue;
        }

        default_tcp_type(&local, &pair.remote);

        if Arc::ptr_eq(&local, &pair.local) {
            kept.push(pair);
        } else {
            kept.push(Arc::new(CandidatePair::new(
                local,
                Arc::clone(&pair.remote),
                controlling,
            )));
        }
    }

    kept
}

/// RFC 6544: a TCP local without an explicit direction probes a passive
/// remote actively and otherwise waits passively.
fn default_tcp_type(local: &Arc<LocalCandidate>, remote: &Arc<RemoteCandidate>) {
    if !local.data.transport().is_tcp_based() || local.data.tcp_type() != TcpType::Unspecified {
        return;
    }

    if remote.data.tcp_type() == TcpType::Passive {
        local.data.set_tcp_type(TcpType::Active);
    } else {
        local.data.set_tcp_type(TcpType::Passive);
    }
}
