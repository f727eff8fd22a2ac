use std::sync::Arc;

use super::pairing::build_pairs_for_component;
use super::*;
use crate::candidate::candidate_pair_test::{
    addr, host_candidate, relay_candidate, remote_candidate,
};
use crate::candidate::LocalCandidateConfig;
use crate::error::Result;
use crate::transport::{TcpType, Transport};

fn remote(ip: &str, port: u16, priority: u32, foundation: &str) -> Arc<crate::candidate::RemoteCandidate> {
    remote_candidate(ip, port, 1, priority, foundation)
}

#[tokio::test]
async fn test_pairs_ordered_by_priority() -> Result<()> {
    let check_list = CheckList::new("audio".to_owned());
    let local = host_candidate("10.0.0.1", 5000, 1);

    let low = Arc::new(CandidatePair::new(
        Arc::clone(&local),
        remote("10.0.0.2", 5000, 100, "1"),
        true,
    ));
    let high = Arc::new(CandidatePair::new(
        Arc::clone(&local),
        remote("10.0.0.3", 5000, 2_000_000_000, "2"),
        true,
    ));

    check_list.add_pair(low).await;
    check_list.add_pair(Arc::clone(&high)).await;

    let pairs = check_list.pairs().await;
    assert!(Arc::ptr_eq(&pairs[0], &high));

    // Unique candidates produce unique priorities, so the order is
    // deterministic.
    assert_ne!(pairs[0].priority(), pairs[1].priority());

    Ok(())
}

#[tokio::test]
async fn test_triggered_checks_preempt_and_dedupe() -> Result<()> {
    let check_list = CheckList::new("audio".to_owned());
    let local = host_candidate("10.0.0.1", 5000, 1);
    let pair = Arc::new(CandidatePair::new(
        local,
        remote("10.0.0.2", 5000, 100, "1"),
        true,
    ));

    check_list.push_triggered(Arc::clone(&pair)).await;
    check_list.push_triggered(Arc::clone(&pair)).await;

    assert!(check_list.pop_triggered().await.is_some());
    assert!(check_list.pop_triggered().await.is_none());

    Ok(())
}

#[tokio::test]
async fn test_initial_states_one_waiting_per_foundation() -> Result<()> {
    let check_list = CheckList::new("audio".to_owned());

    // Two components, all four pairs sharing one foundation group.
    let local_rtp = host_candidate("10.0.0.1", 5000, 1);
    let local_rtcp = host_candidate("10.0.0.1", 5001, 2);
    local_rtp.data.set_foundation("1".to_owned());
    local_rtcp.data.set_foundation("1".to_owned());

    let pairs = vec![
        Arc::new(CandidatePair::new(
            Arc::clone(&local_rtp),
            remote("10.0.0.2", 5000, 100, "9"),
            true,
        )),
        Arc::new(CandidatePair::new(
            Arc::clone(&local_rtp),
            remote("10.0.0.3", 5000, 90, "9"),
            true,
        )),
        Arc::new(CandidatePair::new(
            Arc::clone(&local_rtcp),
            remote_candidate("10.0.0.2", 5001, 2, 100, "9"),
            true,
        )),
        Arc::new(CandidatePair::new(
            Arc::clone(&local_rtcp),
            remote_candidate("10.0.0.3", 5001, 2, 90, "9"),
            true,
        )),
    ];
    check_list.set_pairs(pairs).await;

    let unfrozen = check_list.compute_initial_states().await;
    assert_eq!(unfrozen.len(), 1);

    // The winner is the lowest component id with the highest priority.
    let winner = &unfrozen[0];
    assert_eq!(winner.local.data.component_id, 1);
    assert_eq!(winner.remote.priority(), 100);

    let waiting = check_list
        .pairs()
        .await
        .iter()
        .filter(|p| p.state() == CandidatePairState::Waiting)
        .count();
    assert_eq!(waiting, 1);

    Ok(())
}

#[tokio::test]
async fn test_unfreeze_foundations() -> Result<()> {
    let check_list = CheckList::new("video".to_owned());
    let local = host_candidate("10.0.0.1", 6000, 1);
    local.data.set_foundation("1".to_owned());

    let matching = Arc::new(CandidatePair::new(
        Arc::clone(&local),
        remote("10.0.0.2", 6000, 100, "1"),
        true,
    ));
    let other = Arc::new(CandidatePair::new(
        local,
        remote("10.0.0.3", 6000, 90, "2"),
        true,
    ));
    check_list.set_pairs(vec![Arc::clone(&matching), Arc::clone(&other)]).await;
    assert!(check_list.is_frozen().await);

    let mut foundations = std::collections::HashSet::new();
    foundations.insert("11".to_owned());

    let unfrozen = check_list.unfreeze_foundations(&foundations).await;
    assert_eq!(unfrozen.len(), 1);
    assert!(Arc::ptr_eq(&unfrozen[0], &matching));
    assert_eq!(other.state(), CandidatePairState::Frozen);
    assert!(!check_list.is_frozen().await);

    Ok(())
}

#[tokio::test]
async fn test_states_aggregate() -> Result<()> {
    let check_list = CheckList::new("audio".to_owned());
    let local = host_candidate("10.0.0.1", 5000, 1);
    let pair = Arc::new(CandidatePair::new(
        local,
        remote("10.0.0.2", 5000, 100, "1"),
        true,
    ));
    check_list.set_pairs(vec![Arc::clone(&pair)]).await;

    assert!(check_list.is_frozen().await);
    assert!(!check_list.is_active().await);
    assert!(!check_list.all_checks_completed().await);

    pair.set_state(CandidatePairState::Waiting);
    assert!(check_list.is_active().await);

    pair.set_state(CandidatePairState::Succeeded);
    assert!(check_list.all_checks_completed().await);

    Ok(())
}

#[tokio::test]
async fn test_finish_is_compare_and_set() -> Result<()> {
    let check_list = CheckList::new("audio".to_owned());
    assert!(check_list.try_finish(CheckListState::Completed));
    assert!(!check_list.try_finish(CheckListState::Failed));
    assert_eq!(check_list.state(), CheckListState::Completed);
    Ok(())
}

#[test]
fn test_pairing_skips_unreachable_and_port_zero() -> Result<()> {
    let locals = vec![host_candidate("10.0.0.1", 5000, 1)];
    let remotes = vec![
        remote("10.0.0.2", 0, 100, "1"),
        remote("2001:db8::5", 5000, 100, "2"),
        remote("10.0.0.3", 5000, 100, "3"),
    ];

    let pairs = build_pairs_for_component(&locals, &remotes, true, false);
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].remote.addr(), addr("10.0.0.3", 5000, Transport::Udp));

    Ok(())
}

#[test]
fn test_pairing_replaces_reflexive_local_with_base() -> Result<()> {
    let base = host_candidate("10.0.0.1", 5000, 1);
    let srflx = Arc::new(
        LocalCandidateConfig {
            component_id: 1,
            transport_addr: addr("203.0.113.9", 40000, Transport::Udp),
            ..LocalCandidateConfig::default()
        }
        .new_candidate_server_reflexive(Arc::clone(&base)),
    );

    let locals = vec![Arc::clone(&base), srflx];
    let remotes = vec![remote("10.0.0.2", 5000, 100, "1")];

    // The reflexive pair collapses onto the base pair.
    let pairs = build_pairs_for_component(&locals, &remotes, true, false);
    assert_eq!(pairs.len(), 1);
    assert!(Arc::ptr_eq(&pairs[0].local, &base));

    Ok(())
}

#[test]
fn test_pairing_keeps_relayed_local() -> Result<()> {
    let relay = relay_candidate("198.51.100.7", 3478, 1);
    let locals = vec![relay];
    let remotes = vec![remote("10.0.0.2", 5000, 100, "1")];

    let pairs = build_pairs_for_component(&locals, &remotes, true, false);
    assert_eq!(pairs.len(), 1);
    assert!(pairs[0].local.is_relayed());

    Ok(())
}

#[test]
fn test_pairing_defaults_tcp_type() -> Result<()> {
    let local = Arc::new(
        LocalCandidateConfig {
            component_id: 1,
            transport_addr: addr("10.0.0.1", 9000, Transport::Tcp),
            ..LocalCandidateConfig::default()
        }
        .new_candidate_host(),
    );
    let remote = Arc::new(
        crate::candidate::RemoteCandidateConfig {
            component_id: 1,
            transport_addr: addr("10.0.0.2", 9000, Transport::Tcp),
            tcp_type: TcpType::Passive,
            priority: 100,
            foundation: "1".to_owned(),
            ..crate::candidate::RemoteCandidateConfig::default()
        }
        .new_candidate_host(),
    );

    let pairs = build_pairs_for_component(&[local], &[remote], true, false);
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].local.data.tcp_type(), TcpType::Active);

    Ok(())
}
