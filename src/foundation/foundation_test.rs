use std::sync::Arc;

use super::*;
use crate::candidate::candidate_pair_test::{addr, host_candidate};
use crate::candidate::LocalCandidateConfig;
use crate::error::Result;
use crate::transport::Transport;
use crate::url::ServerUrl;

#[test]
fn test_equal_keys_share_foundation() -> Result<()> {
    let registry = FoundationRegistry::new();

    // Same base IP, type and transport on different ports.
    let a = host_candidate("10.0.0.1", 5000, 1);
    let b = host_candidate("10.0.0.1", 5002, 2);
    registry.assign_foundation(&a);
    registry.assign_foundation(&b);

    assert_eq!(a.data.foundation(), "1");
    assert_eq!(b.data.foundation(), a.data.foundation());

    Ok(())
}

#[test]
fn test_distinct_keys_get_distinct_foundations() -> Result<()> {
    let registry = FoundationRegistry::new();

    let a = host_candidate("10.0.0.1", 5000, 1);
    let b = host_candidate("10.0.0.2", 5000, 1);
    registry.assign_foundation(&a);
    registry.assign_foundation(&b);

    assert_ne!(a.data.foundation(), b.data.foundation());

    Ok(())
}

#[test]
fn test_assignment_is_stable() -> Result<()> {
    let registry = FoundationRegistry::new();

    let a = host_candidate("10.0.0.1", 5000, 1);
    registry.assign_foundation(&a);
    let first = a.data.foundation();
    registry.assign_foundation(&a);

    assert_eq!(a.data.foundation(), first);

    Ok(())
}

#[test]
fn test_server_distinguishes_foundations() -> Result<()> {
    let registry = FoundationRegistry::new();
    let base = host_candidate("10.0.0.1", 5000, 1);
    registry.assign_foundation(&base);

    let srflx_a = Arc::new(
        LocalCandidateConfig {
            component_id: 1,
            transport_addr: addr("203.0.113.9", 40000, Transport::Udp),
            server: Some(ServerUrl::parse("stun:stun-a.example.org")?),
            ..LocalCandidateConfig::default()
        }
        .new_candidate_server_reflexive(Arc::clone(&base)),
    );
    let srflx_b = Arc::new(
        LocalCandidateConfig {
            component_id: 1,
            transport_addr: addr("203.0.113.9", 40002, Transport::Udp),
            server: Some(ServerUrl::parse("stun:stun-b.example.org")?),
            ..LocalCandidateConfig::default()
        }
        .new_candidate_server_reflexive(Arc::clone(&base)),
    );

    registry.assign_foundation(&srflx_a);
    registry.assign_foundation(&srflx_b);

    assert_ne!(srflx_a.data.foundation(), srflx_b.data.foundation());
    assert_ne!(srflx_a.data.foundation(), base.data.foundation());

    Ok(())
}

#[test]
fn test_peer_reflexive_counter_starts_high() -> Result<()> {
    let registry = FoundationRegistry::new();

    let first: u32 = registry.obtain_peer_reflexive_foundation().parse()?;
    let second: u32 = registry.obtain_peer_reflexive_foundation().parse()?;

    assert_eq!(first, 10000);
    assert_eq!(second, 10001);

    Ok(())
}
