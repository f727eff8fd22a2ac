use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use stun::agent::TransactionId;
use stun::attributes::{
    ATTR_ICE_CONTROLLED, ATTR_ICE_CONTROLLING, ATTR_USERNAME, ATTR_USE_CANDIDATE,
};
use stun::error_code::{ErrorCodeAttribute, CODE_ROLE_CONFLICT};
use stun::message::{Message, BINDING_ERROR, BINDING_SUCCESS};
use stun::xoraddr::XorMappedAddress;
use tokio::sync::mpsc;
use tokio::time::sleep;
use util::sync::Mutex as SyncMutex;

use super::agent_config::AgentConfig;
use super::*;
use crate::candidate::candidate_pair_test::{addr, host_candidate, remote_candidate};
use crate::candidate::{CandidatePairState, CandidateType};
use crate::error::Result;
use crate::events::IceEvent;
use crate::state::IceProcessingState;
use crate::stun_stack::{RetransmissionPolicy, StunStack, TransactionEvent};
use crate::transport::{Transport, TransportAddress};

const POLL_LIMIT: usize = 4000;
const POLL_STEP: Duration = Duration::from_millis(25);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ResponderMode {
    /// Answer every request with a symmetric success response.
    Success,
    /// Never answer; report a timeout instead.
    Timeout,
    /// Answer the first request with 487 Role Conflict, then succeed.
    RoleConflictOnce,
}

/// A transaction engine double: no sockets, no timers; every request is
/// answered (or timed out) immediately through the agent's event
/// channel.
struct MockStunStack {
    mode: SyncMutex<ResponderMode>,
    sender: SyncMutex<Option<mpsc::Sender<TransactionEvent>>>,
    sent: SyncMutex<Vec<Message>>,
}

impl MockStunStack {
    fn new(mode: ResponderMode) -> Arc<Self> {
        Arc::new(Self {
            mode: SyncMutex::new(mode),
            sender: SyncMutex::new(None),
            sent: SyncMutex::new(vec![]),
        })
    }

    fn set_sender(&self, sender: mpsc::Sender<TransactionEvent>) {
        *self.sender.lock() = Some(sender);
    }

    fn set_mode(&self, mode: ResponderMode) {
        *self.mode.lock() = mode;
    }

    fn sent_requests(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }
}

fn success_response(transaction_id: TransactionId, mapped: TransportAddress) -> Result<Message> {
    let mut response = Message::new();
    response.build(&[
        Box::new(BINDING_SUCCESS),
        Box::new(transaction_id),
        Box::new(XorMappedAddress {
            ip: mapped.ip(),
            port: mapped.port(),
        }),
    ])?;
    Ok(response)
}

fn role_conflict_response(transaction_id: TransactionId) -> Result<Message> {
    let mut response = Message::new();
    response.build(&[
        Box::new(BINDING_ERROR),
        Box::new(transaction_id),
        Box::new(ErrorCodeAttribute {
            code: CODE_ROLE_CONFLICT,
            reason: b"Role Conflict".to_vec(),
        }),
    ])?;
    Ok(response)
}

#[async_trait]
impl StunStack for MockStunStack {
    async fn send_request(
        &self,
        request: Message,
        destination: TransportAddress,
        source: TransportAddress,
        _policy: RetransmissionPolicy,
    ) -> Result<TransactionId> {
        let transaction_id = request.transaction_id;
        self.sent.lock().push(request.clone());

        let mode = {
            let mut mode = self.mode.lock();
            let current = *mode;
            if current == ResponderMode::RoleConflictOnce {
                *mode = ResponderMode::Success;
            }
            current
        };
        let sender = self.sender.lock().clone();

        if let Some(sender) = sender {
            let event = match mode {
                ResponderMode::Success => TransactionEvent::Response {
                    transaction_id,
                    response: success_response(transaction_id, source)?,
                    local_addr: source,
                    remote_addr: destination,
                },
                ResponderMode::RoleConflictOnce => TransactionEvent::Response {
                    transaction_id,
                    response: role_conflict_response(transaction_id)?,
                    local_addr: source,
                    remote_addr: destination,
                },
                ResponderMode::Timeout => TransactionEvent::Timeout {
                    transaction_id,
                    local_addr: source,
                },
            };
            tokio::spawn(async move {
                let _ = sender.send(event).await;
            });
        }

        Ok(transaction_id)
    }

    async fn send_indication(
        &self,
        _indication: Message,
        _destination: TransportAddress,
        _source: TransportAddress,
    ) -> Result<()> {
        Ok(())
    }

    async fn cancel_transaction(&self, _transaction_id: TransactionId) {}
}

fn build_agent(
    mode: ResponderMode,
    is_controlling: bool,
    tweak: impl FnOnce(&mut AgentConfig),
) -> Result<(Agent, Arc<MockStunStack>)> {
    let stack = MockStunStack::new(mode);
    let mut config = AgentConfig {
        stun_stack: Some(Arc::clone(&stack) as Arc<dyn StunStack + Send + Sync>),
        is_controlling,
        termination_delay: Some(Duration::from_millis(200)),
        ..AgentConfig::default()
    };
    tweak(&mut config);

    let agent = Agent::new(config)?;
    stack.set_sender(agent.transaction_event_sender());
    Ok((agent, stack))
}

async fn wait_for_state(agent: &Agent, accept: fn(IceProcessingState) -> bool, what: &str) {
    for _ in 0..POLL_LIMIT {
        if accept(agent.state()) {
            return;
        }
        sleep(POLL_STEP).await;
    }
    panic!("timed out waiting for {what}, agent is {}", agent.state());
}

async fn add_host_pair(
    agent: &Agent,
    stream: &Arc<crate::stream::IceMediaStream>,
    local_ip: &str,
    local_port: u16,
    remote_ip: &str,
    remote_port: u16,
    remote_foundation: &str,
) -> Result<Arc<crate::stream::Component>> {
    let component = stream.create_component(1).await?;
    agent
        .add_local_candidate(&component, host_candidate(local_ip, local_port, 1))
        .await;
    agent
        .add_remote_candidate(
            &component,
            remote_candidate(remote_ip, remote_port, 1, 687865855, remote_foundation),
        )
        .await;
    Ok(component)
}

#[tokio::test(start_paused = true)]
async fn test_single_host_pair_success() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let (agent, stack) = build_agent(ResponderMode::Success, true, |_| {})?;

    let stream = agent.create_stream("audio").await?;
    stream.set_remote_credentials("Buuu", "bpwdbpwdbpwdbpwdbpwdbp")?;
    let component = add_host_pair(&agent, &stream, "10.0.0.1", 5000, "10.0.0.2", 5000, "1").await?;

    agent.start_connectivity_establishment().await?;
    wait_for_state(&agent, |s| s.is_established(), "completion").await;

    let selected = component.selected_pair().expect("a pair must be selected");
    assert!(selected.is_nominated());
    assert!(selected.is_valid());
    assert_eq!(selected.local.addr(), addr("10.0.0.1", 5000, Transport::Udp));
    assert_eq!(selected.remote.addr(), addr("10.0.0.2", 5000, Transport::Udp));
    assert_eq!(selected.state(), CandidatePairState::Succeeded);

    let sent = stack.sent_requests();
    assert!(!sent.is_empty());
    let username = sent[0].get(ATTR_USERNAME)?;
    assert_eq!(username, format!("Buuu:{}", agent.local_ufrag()).into_bytes());
    assert!(
        sent.iter().any(|m| m.contains(ATTR_USE_CANDIDATE)),
        "the nomination must repeat the check with USE-CANDIDATE"
    );

    wait_for_state(
        &agent,
        |s| s == IceProcessingState::Terminated,
        "termination",
    )
    .await;

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_controlled_agent_confirms_nomination() -> Result<()> {
    let (agent, _stack) = build_agent(ResponderMode::Success, false, |_| {})?;

    let stream = agent.create_stream("audio").await?;
    stream.set_remote_credentials("Auuu", "apwdapwdapwdapwdapwdap")?;
    let component = add_host_pair(&agent, &stream, "10.0.0.2", 5000, "10.0.0.1", 5000, "1").await?;

    agent.start_connectivity_establishment().await?;

    for _ in 0..POLL_LIMIT {
        if !stream.valid_list().await.is_empty() {
            break;
        }
        sleep(POLL_STEP).await;
    }
    assert!(!stream.valid_list().await.is_empty());
    assert_eq!(agent.state(), IceProcessingState::Running);
    assert!(component.selected_pair().is_none());

    // The controlling peer nominates: the same check arrives bearing
    // USE-CANDIDATE.
    agent
        .process_binding_request(IncomingCheck {
            local_addr: addr("10.0.0.2", 5000, Transport::Udp),
            remote_addr: addr("10.0.0.1", 5000, Transport::Udp),
            priority: 687865855,
            use_candidate: true,
            remote_ufrag: "Auuu".to_owned(),
            local_ufrag: agent.local_ufrag().to_owned(),
        })
        .await;

    wait_for_state(&agent, |s| s.is_established(), "completion").await;
    assert!(component.selected_pair().is_some());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_peer_reflexive_remote_discovery() -> Result<()> {
    let (agent, _stack) = build_agent(ResponderMode::Success, false, |_| {})?;

    let stream = agent.create_stream("audio").await?;
    stream.set_remote_credentials("Auuu", "apwdapwdapwdapwdapwdap")?;
    let component = add_host_pair(&agent, &stream, "10.0.0.2", 5000, "10.0.0.1", 5000, "1").await?;

    // A check arrives from an address the peer never signalled, before
    // connectivity establishment even started.
    agent
        .process_binding_request(IncomingCheck {
            local_addr: addr("10.0.0.2", 5000, Transport::Udp),
            remote_addr: addr("203.0.113.5", 40000, Transport::Udp),
            priority: 999,
            use_candidate: false,
            remote_ufrag: "Auuu".to_owned(),
            local_ufrag: agent.local_ufrag().to_owned(),
        })
        .await;

    let prflx = component
        .find_remote_candidate(addr("203.0.113.5", 40000, Transport::Udp))
        .await
        .expect("a peer-reflexive remote must be created");
    assert_eq!(prflx.data.candidate_type, CandidateType::PeerReflexive);
    assert_eq!(prflx.priority(), 999);
    let foundation: u32 = prflx.data.foundation().parse()?;
    assert!(foundation >= 10000);

    // The pre-discovered pair is replayed as a triggered check on start.
    agent.start_connectivity_establishment().await?;

    let prflx_addr = addr("203.0.113.5", 40000, Transport::Udp);
    let mut validated = false;
    for _ in 0..POLL_LIMIT {
        if stream
            .valid_list()
            .await
            .iter()
            .any(|p| p.remote.addr() == prflx_addr)
        {
            validated = true;
            break;
        }
        sleep(POLL_STEP).await;
    }
    assert!(validated, "the pre-discovered pair must be checked");

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_role_conflict_repair() -> Result<()> {
    let (agent, stack) = build_agent(ResponderMode::RoleConflictOnce, true, |_| {})?;

    let stream = agent.create_stream("audio").await?;
    stream.set_remote_credentials("Buuu", "bpwdbpwdbpwdbpwdbpwdbp")?;
    let _ = add_host_pair(&agent, &stream, "10.0.0.1", 5000, "10.0.0.2", 5000, "1").await?;

    assert!(agent.is_controlling());
    agent.start_connectivity_establishment().await?;

    for _ in 0..POLL_LIMIT {
        if !stream.valid_list().await.is_empty() {
            break;
        }
        sleep(POLL_STEP).await;
    }
    assert!(!stream.valid_list().await.is_empty());

    // 487 flipped the role before the triggered repeat went out.
    assert!(!agent.is_controlling());
    let sent = stack.sent_requests();
    assert!(sent[0].contains(ATTR_ICE_CONTROLLING));
    assert!(
        sent.iter().any(|m| m.contains(ATTR_ICE_CONTROLLED)),
        "the repeated check must claim the controlled role"
    );

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_cross_stream_unfreeze() -> Result<()> {
    let (agent, _stack) = build_agent(ResponderMode::Success, true, |_| {})?;

    let audio = agent.create_stream("audio").await?;
    audio.set_remote_credentials("Buuu", "bpwdbpwdbpwdbpwdbpwdbp")?;
    add_host_pair(&agent, &audio, "10.0.0.1", 5000, "10.0.0.2", 5000, "1").await?;

    let video = agent.create_stream("video").await?;
    video.set_remote_credentials("Buuu", "bpwdbpwdbpwdbpwdbpwdbp")?;
    add_host_pair(&agent, &video, "10.0.0.1", 5002, "10.0.0.2", 5002, "1").await?;

    agent.start_connectivity_establishment().await?;

    // Only the first stream starts unfrozen; audio's success must thaw
    // the matching video foundation and start its checks.
    let mut thawed = false;
    for _ in 0..POLL_LIMIT {
        let pairs = video.check_list().pairs().await;
        if !pairs.is_empty() && pairs.iter().all(|p| p.state() != CandidatePairState::Frozen) {
            thawed = true;
            break;
        }
        sleep(POLL_STEP).await;
    }
    assert!(thawed, "video pairs must leave the frozen state");

    wait_for_state(&agent, |s| s.is_established(), "completion of both streams").await;

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_connectivity_failure() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let (agent, _stack) = build_agent(ResponderMode::Timeout, true, |_| {})?;
    let mut events = agent.subscribe();

    let stream = agent.create_stream("audio").await?;
    stream.set_remote_credentials("Buuu", "bpwdbpwdbpwdbpwdbpwdbp")?;
    add_host_pair(&agent, &stream, "10.0.0.1", 5000, "10.0.0.2", 5000, "1").await?;

    agent.start_connectivity_establishment().await?;
    wait_for_state(&agent, |s| s == IceProcessingState::Failed, "failure").await;

    let pairs = stream.check_list().pairs().await;
    assert!(pairs.iter().all(|p| p.state() == CandidatePairState::Failed));
    assert!(stream.valid_list().await.is_empty());

    // The failure transition must fire exactly once.
    let mut failed_transitions = 0;
    while let Ok(event) = events.try_recv() {
        if let IceEvent::IceStateChanged { new, .. } = event {
            if new == IceProcessingState::Failed {
                failed_transitions += 1;
            }
        }
    }
    assert_eq!(failed_transitions, 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_consent_loss_surfaces_failure() -> Result<()> {
    let (agent, stack) = build_agent(ResponderMode::Success, true, |config| {
        config.no_keepalives = Some(false);
        config.consent_freshness = true;
        // Keep the agent in COMPLETED long enough for consent rounds.
        config.termination_delay = Some(Duration::from_secs(3600));
    })?;
    let mut events = agent.subscribe();

    let stream = agent.create_stream("audio").await?;
    stream.set_remote_credentials("Buuu", "bpwdbpwdbpwdbpwdbpwdbp")?;
    let component = add_host_pair(&agent, &stream, "10.0.0.1", 5000, "10.0.0.2", 5000, "1").await?;

    agent.start_connectivity_establishment().await?;
    wait_for_state(&agent, |s| s == IceProcessingState::Completed, "completion").await;

    // The peer goes away: every further consent check times out.
    stack.set_mode(ResponderMode::Timeout);
    wait_for_state(&agent, |s| s == IceProcessingState::Failed, "consent failure").await;

    // The pair stays selected, only the state machine surfaces the loss.
    assert!(component.selected_pair().is_some());
    let mut saw_consent_loss = false;
    while let Ok(event) = events.try_recv() {
        if let IceEvent::PairConsentFreshness { alive: false, .. } = event {
            saw_consent_loss = true;
        }
    }
    assert!(saw_consent_loss);

    Ok(())
}

#[tokio::test]
async fn test_empty_agent_fails_immediately() -> Result<()> {
    let (agent, _stack) = build_agent(ResponderMode::Success, true, |_| {})?;

    agent.start_connectivity_establishment().await?;
    assert_eq!(agent.state(), IceProcessingState::Failed);

    assert_eq!(
        agent.start_connectivity_establishment().await,
        Err(crate::Error::ErrMultipleStart)
    );

    Ok(())
}

#[tokio::test]
async fn test_free_is_idempotent() -> Result<()> {
    let (agent, _stack) = build_agent(ResponderMode::Success, true, |_| {})?;
    let stream = agent.create_stream("audio").await?;
    stream.set_remote_credentials("Buuu", "bpwdbpwdbpwdbpwdbpwdbp")?;
    add_host_pair(&agent, &stream, "10.0.0.1", 5000, "10.0.0.2", 5000, "1").await?;

    agent.free().await?;
    assert_eq!(agent.state(), IceProcessingState::Terminated);

    // A second free changes nothing.
    agent.free().await?;
    assert_eq!(agent.state(), IceProcessingState::Terminated);

    // A freed agent cannot start checking.
    assert_eq!(
        agent.start_connectivity_establishment().await,
        Err(crate::Error::ErrClosed)
    );

    Ok(())
}

#[tokio::test]
async fn test_rejects_weak_credentials() -> Result<()> {
    let stack = MockStunStack::new(ResponderMode::Success);

    let short_ufrag = Agent::new(AgentConfig {
        stun_stack: Some(Arc::clone(&stack) as Arc<dyn StunStack + Send + Sync>),
        local_ufrag: "ab".to_owned(),
        ..AgentConfig::default()
    });
    assert_eq!(
        short_ufrag.err(),
        Some(crate::Error::ErrLocalUfragInsufficientBits)
    );

    let short_pwd = Agent::new(AgentConfig {
        stun_stack: Some(Arc::clone(&stack) as Arc<dyn StunStack + Send + Sync>),
        local_pwd: "short".to_owned(),
        ..AgentConfig::default()
    });
    assert_eq!(
        short_pwd.err(),
        Some(crate::Error::ErrLocalPwdInsufficientBits)
    );

    Ok(())
}

#[tokio::test]
async fn test_skip_remote_private_hosts() -> Result<()> {
    let (agent, _stack) = build_agent(ResponderMode::Success, true, |config| {
        config.skip_remote_private_hosts = true;
    })?;

    let stream = agent.create_stream("audio").await?;
    let component = stream.create_component(1).await?;

    assert!(
        !agent
            .add_remote_candidate(
                &component,
                remote_candidate("192.168.1.20", 5000, 1, 100, "1")
            )
            .await
    );
    assert!(
        agent
            .add_remote_candidate(
                &component,
                remote_candidate("203.0.113.20", 5000, 1, 100, "1")
            )
            .await
    );

    Ok(())
}
