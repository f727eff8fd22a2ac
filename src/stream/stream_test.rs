use std::sync::Arc;

use super::*;
use crate::candidate::candidate_pair_test::{
    addr, host_candidate, relay_candidate, remote_candidate,
};
use crate::candidate::{CandidatePair, LocalCandidateConfig};
use crate::error::Result;
use crate::transport::Transport;

#[tokio::test]
async fn test_component_ids_start_at_one() -> Result<()> {
    let stream = IceMediaStream::new("audio");
    assert!(stream.create_component(0).await.is_err());

    stream.create_component(1).await?;
    assert!(
        stream.create_component(1).await.is_err(),
        "duplicate component must be rejected"
    );

    Ok(())
}

#[tokio::test]
async fn test_default_candidate_prefers_relay() -> Result<()> {
    let stream = IceMediaStream::new("audio");
    let component = stream.create_component(1).await?;

    let host = host_candidate("10.0.0.1", 5000, 1);
    let relay = relay_candidate("198.51.100.7", 3478, 1);

    component.add_local_candidate(Arc::clone(&host)).await;
    assert!(Arc::ptr_eq(
        &component.default_local_candidate().unwrap(),
        &host
    ));

    component.add_local_candidate(Arc::clone(&relay)).await;
    assert!(Arc::ptr_eq(
        &component.default_local_candidate().unwrap(),
        &relay
    ));

    Ok(())
}

#[tokio::test]
async fn test_duplicate_candidates_dropped() -> Result<()> {
    let stream = IceMediaStream::new("audio");
    let component = stream.create_component(1).await?;

    assert!(component
        .add_local_candidate(host_candidate("10.0.0.1", 5000, 1))
        .await);
    assert!(!component
        .add_local_candidate(host_candidate("10.0.0.1", 5000, 1))
        .await);

    assert!(component
        .add_remote_candidate(remote_candidate("10.0.0.2", 5000, 1, 100, "1"))
        .await);
    assert!(!component
        .add_remote_candidate(remote_candidate("10.0.0.2", 5000, 1, 100, "1"))
        .await);

    Ok(())
}

#[tokio::test]
async fn test_find_local_by_address() -> Result<()> {
    let stream = IceMediaStream::new("audio");
    let component = stream.create_component(1).await?;
    let candidate = host_candidate("10.0.0.1", 5000, 1);
    component.add_local_candidate(Arc::clone(&candidate)).await;

    let (found_component, found) = stream
        .find_local(addr("10.0.0.1", 5000, Transport::Udp))
        .await
        .expect("candidate should resolve");
    assert_eq!(found_component.id, 1);
    assert!(Arc::ptr_eq(&found, &candidate));

    assert!(stream
        .find_local(addr("10.0.0.9", 5000, Transport::Udp))
        .await
        .is_none());

    Ok(())
}

#[tokio::test]
async fn test_valid_list_is_idempotent() -> Result<()> {
    let stream = IceMediaStream::new("audio");
    stream.create_component(1).await?;

    let pair = Arc::new(CandidatePair::new(
        host_candidate("10.0.0.1", 5000, 1),
        remote_candidate("10.0.0.2", 5000, 1, 100, "1"),
        true,
    ));

    assert!(stream.add_to_valid_list(&pair).await);
    assert!(pair.is_valid());
    assert!(!stream.add_to_valid_list(&pair).await);
    assert_eq!(stream.valid_list().await.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_nominated_coverage() -> Result<()> {
    let stream = IceMediaStream::new("audio");
    stream.create_component(1).await?;
    stream.create_component(2).await?;

    let rtp_pair = Arc::new(CandidatePair::new(
        host_candidate("10.0.0.1", 5000, 1),
        remote_candidate("10.0.0.2", 5000, 1, 100, "1"),
        true,
    ));
    let rtcp_pair = Arc::new(CandidatePair::new(
        host_candidate("10.0.0.1", 5001, 2),
        remote_candidate("10.0.0.2", 5001, 2, 100, "1"),
        true,
    ));

    stream.add_to_valid_list(&rtp_pair).await;
    stream.add_to_valid_list(&rtcp_pair).await;
    assert!(stream.valid_covers_components().await);
    assert!(!stream.nominated_covers_components().await);

    rtp_pair.nominate();
    assert!(!stream.nominated_covers_components().await);

    rtcp_pair.nominate();
    assert!(stream.nominated_covers_components().await);

    Ok(())
}

#[tokio::test]
async fn test_keepalive_strategies() -> Result<()> {
    let stream = IceMediaStream::new("audio");
    let component = stream.create_component(1).await?;

    let selected = Arc::new(CandidatePair::new(
        host_candidate("10.0.0.1", 5000, 1),
        remote_candidate("10.0.0.2", 5000, 1, 100, "1"),
        true,
    ));
    let tcp_pair = Arc::new(CandidatePair::new(
        Arc::new(
            LocalCandidateConfig {
                component_id: 1,
                transport_addr: addr("10.0.0.1", 9000, Transport::Tcp),
                ..LocalCandidateConfig::default()
            }
            .new_candidate_host(),
        ),
        remote_candidate("10.0.0.2", 9000, 1, 90, "2"),
        true,
    ));
    component.set_selected_pair(Arc::clone(&selected));

    let succeeded = vec![Arc::clone(&selected), Arc::clone(&tcp_pair)];

    component
        .update_keepalive_pairs(KeepAliveStrategy::SelectedOnly, &succeeded)
        .await;
    assert_eq!(component.keepalive_pairs().await.len(), 1);

    component
        .update_keepalive_pairs(KeepAliveStrategy::SelectedAndTcp, &succeeded)
        .await;
    assert_eq!(component.keepalive_pairs().await.len(), 2);

    component
        .update_keepalive_pairs(KeepAliveStrategy::AllSucceeded, &succeeded)
        .await;
    assert_eq!(component.keepalive_pairs().await.len(), 2);

    Ok(())
}
