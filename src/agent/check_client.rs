use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use stun::attributes::{ATTR_ICE_CONTROLLING, ATTR_SOFTWARE, ATTR_USERNAME};
use stun::error_code::{ErrorCodeAttribute, CODE_ROLE_CONFLICT};
use stun::fingerprint::FINGERPRINT;
use stun::integrity::MessageIntegrity;
use stun::agent::TransactionId;
use stun::message::{
    Getter, Message, Setter, BINDING_REQUEST, CLASS_ERROR_RESPONSE, CLASS_SUCCESS_RESPONSE,
};
use stun::textattrs::TextAttribute;
use stun::xoraddr::XorMappedAddress;
use tokio::time::{sleep, Instant};

use crate::agent::agent_internal::{AgentInternal, CheckKind, PendingCheck};
use crate::attributes::{AttrControlled, AttrControlling, PriorityAttr, UseCandidateAttr};
use crate::candidate::{
    CandidatePair, CandidatePairState, CandidateType, LocalCandidateConfig,
};
use crate::events::IceEvent;
use crate::stream::IceMediaStream;
use crate::stun_stack::RetransmissionPolicy;
use crate::transport::{TcpType, Transport, TransportAddress};

/// Port 9 is the discard placeholder an active TCP remote advertises; it
/// is probed by connecting, never by sending a check to it.
const TCP_DISCARD_PORT: u16 = 9;

/// Starts the Pace Maker for a stream's check list unless one is already
/// running. The loop exits when the agent stops running or its
/// initiation window closes, and can be restarted by triggered checks.
pub(crate) fn start_pace_maker(ai: &Arc<AgentInternal>, stream: &Arc<IceMediaStream>) {
    let check_list = stream.check_list();
    if check_list.pace_maker_running.swap(true, Ordering::SeqCst) {
        return;
    }

    let ai = Arc::clone(ai);
    let stream = Arc::clone(stream);
    tokio::spawn(async move {
        log::debug!(
            "[{}]: pace maker started for stream {}",
            ai.get_name(),
            stream.name
        );
        pace_maker_loop(&ai, &stream).await;
        stream
            .check_list()
            .pace_maker_running
            .store(false, Ordering::SeqCst);
        log::debug!(
            "[{}]: pace maker stopped for stream {}",
            ai.get_name(),
            stream.name
        );
    });
}

/// One tick per `Ta · active lists`: a triggered check if one is queued,
/// otherwise the highest-priority waiting pair (RFC 8445 §6.1.4.2).
async fn pace_maker_loop(ai: &Arc<AgentInternal>, stream: &Arc<IceMediaStream>) {
    let check_list = stream.check_list();
    let mut done_rx = ai.done.subscribe();
    let mut first_check: Option<Instant> = None;

    loop {
        if !ai.is_active() {
            return;
        }
        if let Some(first) = first_check {
            if first.elapsed() >= ai.settings.checklist_timeout {
                return;
            }
        }

        let active = ai.active_check_list_count().await.max(1);
        let delay = (ai.settings.ta * active as u32).min(ai.settings.checklist_timeout);
        tokio::select! {
            _ = sleep(delay) => {}
            _ = done_rx.recv() => return,
        }

        if !ai.is_active() {
            return;
        }

        let pair = match check_list.pop_triggered().await {
            Some(pair) => pair,
            None => match check_list.next_waiting().await {
                Some(pair) => pair,
                None => {
                    log::trace!(
                        "[{}]: end of ordinary checks for stream {}",
                        ai.get_name(),
                        stream.name
                    );
                    continue;
                }
            },
        };

        let remote_addr = pair.remote.addr();
        if remote_addr.transport == Transport::Tcp
            && pair.remote.data.tcp_type() == TcpType::Active
            && remote_addr.port() == TCP_DISCARD_PORT
        {
            log::trace!(
                "[{}]: skipping unreachable active TCP remote {}",
                ai.get_name(),
                pair.remote
            );
            continue;
        }

        if first_check.is_none() {
            first_check = Some(Instant::now());
        }
        start_check_for_pair(ai, stream, &pair).await;
    }
}

/// Issues one connectivity check: a Binding Request with PRIORITY, the
/// role attribute, USE-CANDIDATE when nominating, USERNAME and
/// MESSAGE-INTEGRITY, retransmitted per RFC 5389 §7.2.1.
pub(crate) async fn start_check_for_pair(
    ai: &Arc<AgentInternal>,
    stream: &Arc<IceMediaStream>,
    pair: &Arc<CandidatePair>,
) {
    if pair.local.is_relayed() {
        // A host remote cannot be reached through the relay at all; other
        // remotes need a permission installed first.
        if pair.remote.data.candidate_type == CandidateType::Host {
            log::debug!(
                "[{}]: relayed local toward host remote, failing {}",
                ai.get_name(),
                pair
            );
            ai.fail_pair(stream, pair);
            ai.update_check_list_states(stream).await;
            return;
        }

        if let Some(relay) = pair.local.relay() {
            if let Err(err) = relay.create_permission(pair.remote.addr().addr).await {
                log::warn!(
                    "[{}]: create permission failed for {}: {}",
                    ai.get_name(),
                    pair,
                    err
                );
                ai.fail_pair(stream, pair);
                ai.update_check_list_states(stream).await;
                return;
            }
        }
    }

    let username = format!("{}:{}", stream.remote_ufrag(), ai.local_ufrag);
    let is_controlling = ai.is_controlling();
    let use_candidate =
        is_controlling && (pair.is_nominated() || pair.use_candidate_sent());
    let tie_breaker = ai.tie_breaker.load(Ordering::SeqCst);

    let mut msg = Message::new();
    let build_result = {
        let mut setters: Vec<Box<dyn Setter>> = vec![
            Box::new(BINDING_REQUEST),
            Box::new(TransactionId::new()),
            Box::new(TextAttribute::new(ATTR_USERNAME, username)),
            Box::new(PriorityAttr(
                pair.local
                    .compute_priority_for_type(CandidateType::PeerReflexive),
            )),
        ];
        if is_controlling {
            setters.push(Box::new(AttrControlling(tie_breaker)));
            if use_candidate {
                setters.push(Box::new(UseCandidateAttr::new()));
            }
        } else {
            setters.push(Box::new(AttrControlled(tie_breaker)));
        }
        if !ai.settings.software.is_empty() {
            setters.push(Box::new(TextAttribute::new(
                ATTR_SOFTWARE,
                ai.settings.software.clone(),
            )));
        }
        setters.push(Box::new(MessageIntegrity::new_short_term_integrity(
            stream.remote_pwd(),
        )));
        if ai.settings.always_sign {
            setters.push(Box::new(FINGERPRINT));
        }
        msg.build(&setters)
    };
    if let Err(err) = build_result {
        log::error!("[{}]: failed to build check: {}", ai.get_name(), err);
        ai.fail_pair(stream, pair);
        ai.update_check_list_states(stream).await;
        return;
    }

    let destination = pair.remote.addr();
    let source = if pair.local.is_relayed() {
        pair.local.addr()
    } else {
        pair.local.base().addr()
    };
    let transaction_id = msg.transaction_id;

    // Registered before the send so a fast response finds its pair.
    {
        let mut checks = ai.checks.lock().await;
        checks.insert(
            transaction_id,
            PendingCheck {
                stream: Arc::clone(stream),
                pair: Arc::clone(pair),
                destination,
                source,
                is_use_candidate: use_candidate,
                request: msg.clone(),
                kind: CheckKind::Connectivity,
            },
        );
    }

    let old = pair.begin_check(transaction_id);
    if old != CandidatePairState::InProgress {
        ai.publish(IceEvent::PairStateChanged {
            stream: stream.name.clone(),
            pair: Arc::clone(pair),
            old,
            new: CandidatePairState::InProgress,
        });
    }
    if use_candidate {
        pair.set_use_candidate_sent();
    }

    log::trace!(
        "[{}]: check from {} to {} (use-candidate: {})",
        ai.get_name(),
        pair.local,
        pair.remote,
        use_candidate
    );

    let sent = ai
        .stun_stack
        .send_request(msg, destination, source, RetransmissionPolicy::default())
        .await;

    if let Err(err) = sent {
        log::warn!("[{}]: failed to send check for {}: {}", ai.get_name(), pair, err);
        {
            let mut checks = ai.checks.lock().await;
            checks.remove(&transaction_id);
        }
        ai.fail_pair(stream, pair);
        ai.update_check_list_states(stream).await;
    }
}

/// Digests the response to one of our checks (RFC 8445 §7.2.5).
pub(crate) async fn process_response(
    ai: &Arc<AgentInternal>,
    check: PendingCheck,
    response: Message,
    local_addr: TransportAddress,
    remote_addr: TransportAddress,
) {
    let stream = Arc::clone(&check.stream);
    let pair = Arc::clone(&check.pair);

    // A response must come back on exactly the reverse of the path the
    // request took; anything else smells like a symmetric NAT or
    // asymmetric routing.
    if remote_addr != check.destination || local_addr != check.source {
        log::debug!(
            "[{}]: non-symmetric response for {}: expected {} -> {}, got {} -> {}",
            ai.get_name(),
            pair,
            check.source,
            check.destination,
            local_addr,
            remote_addr
        );
        ai.fail_pair(&stream, &pair);
        ai.update_check_list_states(&stream).await;
        return;
    }

    if response.typ.class == CLASS_ERROR_RESPONSE {
        process_error_response(ai, &check, &response).await;
        return;
    }

    if response.typ.class != CLASS_SUCCESS_RESPONSE {
        ai.fail_pair(&stream, &pair);
        ai.update_check_list_states(&stream).await;
        return;
    }

    process_success_response(ai, &check, &response).await;
}

async fn process_error_response(
    ai: &Arc<AgentInternal>,
    check: &PendingCheck,
    response: &Message,
) {
    let stream = &check.stream;
    let pair = &check.pair;

    let mut error_code = ErrorCodeAttribute::default();
    let is_role_conflict = error_code.get_from(response).is_ok()
        && error_code.code == CODE_ROLE_CONFLICT;

    if !is_role_conflict {
        log::debug!(
            "[{}]: error response for {}: {}",
            ai.get_name(),
            pair,
            error_code
        );
        ai.fail_pair(stream, pair);
        ai.update_check_list_states(stream).await;
        return;
    }

    // RFC 8445 §7.2.5.1: switch to the role we did not claim in the
    // request, recompute every pair priority, then repeat the check as a
    // triggered one.
    let claimed_controlling = check.request.contains(ATTR_ICE_CONTROLLING);
    log::info!(
        "[{}]: role conflict reported, switching to {}",
        ai.get_name(),
        if claimed_controlling {
            "controlled"
        } else {
            "controlling"
        }
    );
    ai.set_controlling(!claimed_controlling).await;

    ai.set_pair_state(stream, pair, CandidatePairState::Waiting);
    let check_list = stream.check_list();
    check_list.push_triggered(Arc::clone(pair)).await;
    if ai.is_active() {
        start_pace_maker(ai, stream);
    }
}

async fn process_success_response(
    ai: &Arc<AgentInternal>,
    check: &PendingCheck,
    response: &Message,
) {
    let stream = &check.stream;
    let pair = &check.pair;
    let check_list = stream.check_list();

    let mut xor_addr = XorMappedAddress::default();
    if let Err(err) = xor_addr.get_from(response) {
        log::warn!(
            "[{}]: response without usable XOR-MAPPED-ADDRESS for {}: {}",
            ai.get_name(),
            pair,
            err
        );
        ai.fail_pair(stream, pair);
        ai.update_check_list_states(stream).await;
        return;
    }

    // The mapped address keeps the transport of the socket the check
    // left on; for TCP that means rewriting the UDP default.
    let mapped = TransportAddress::new(xor_addr.ip, xor_addr.port, check.source.transport);

    let component = match stream.component(pair.local.data.component_id).await {
        Some(component) => component,
        None => {
            ai.fail_pair(stream, pair);
            ai.update_check_list_states(stream).await;
            return;
        }
    };

    // The mapped address either matches a known local candidate or
    // reveals a peer-reflexive one behind a NAT we did not know about.
    let valid_local = match component.find_local_candidate(mapped).await {
        Some(local) => local,
        None => {
            let mut priority = PriorityAttr::default();
            let _ = priority.get_from(&check.request);

            let prflx = Arc::new(
                LocalCandidateConfig {
                    component_id: component.id,
                    transport_addr: mapped,
                    ufrag: ai.local_ufrag.clone(),
                    local_preference: Some(pair.local.local_preference()),
                    priority: priority.0,
                    ..LocalCandidateConfig::default()
                }
                .new_candidate_peer_reflexive(Arc::clone(&pair.local)),
            );
            ai.foundations.assign_foundation(&prflx);
            component.add_local_candidate(Arc::clone(&prflx)).await;
            log::debug!(
                "[{}]: discovered peer-reflexive local candidate {}",
                ai.get_name(),
                prflx
            );
            prflx
        }
    };

    // Construct or locate the valid pair the mapped address proves.
    let valid_pair = if Arc::ptr_eq(&valid_local, &pair.local) {
        Arc::clone(pair)
    } else {
        match check_list.find_pair(&valid_local, &pair.remote).await {
            Some(found) => found,
            None => {
                let created = Arc::new(CandidatePair::new(
                    valid_local,
                    Arc::clone(&pair.remote),
                    ai.is_controlling(),
                ));
                check_list.add_pair(Arc::clone(&created)).await;
                created
            }
        }
    };

    ai.set_pair_state(stream, pair, CandidatePairState::Succeeded);
    if !Arc::ptr_eq(&valid_pair, pair)
        && valid_pair.state() != CandidatePairState::Succeeded
    {
        ai.set_pair_state(stream, &valid_pair, CandidatePairState::Succeeded);
    }

    if stream.add_to_valid_list(&valid_pair).await {
        log::debug!("[{}]: pair validated: {}", ai.get_name(), valid_pair);
        ai.publish(IceEvent::PairValidated {
            stream: stream.name.clone(),
            pair: Arc::clone(&valid_pair),
        });
    }

    // Unfreeze the same foundation in this stream first, then in every
    // other stream through the valid-list foundations.
    let mut own = HashSet::new();
    own.insert(pair.foundation());
    for unfrozen in check_list.unfreeze_foundations(&own).await {
        ai.publish(IceEvent::PairStateChanged {
            stream: stream.name.clone(),
            pair: unfrozen,
            old: CandidatePairState::Frozen,
            new: CandidatePairState::Waiting,
        });
    }

    let valid_foundations = stream.valid_foundations().await;
    for other in ai.streams().await {
        if Arc::ptr_eq(&other, stream) {
            continue;
        }
        let other_list = other.check_list();
        let was_frozen = other_list.is_frozen().await;
        let unfrozen = other_list.unfreeze_foundations(&valid_foundations).await;
        for unfrozen_pair in &unfrozen {
            ai.publish(IceEvent::PairStateChanged {
                stream: other.name.clone(),
                pair: Arc::clone(unfrozen_pair),
                old: CandidatePairState::Frozen,
                new: CandidatePairState::Waiting,
            });
        }
        if was_frozen && !unfrozen.is_empty() {
            start_pace_maker(ai, &other);
        }
    }

    // Nomination bookkeeping (RFC 8445 §7.2.5.3.4 and §8.1.1).
    if ai.is_controlling() {
        if check.is_use_candidate || pair.use_candidate_sent() {
            ai.confirm_nomination(stream, &valid_pair).await;
        } else {
            ai.nominator
                .on_pair_validated(ai, stream, &valid_pair)
                .await;
        }
    } else if pair.use_candidate_received() {
        ai.confirm_nomination(stream, &valid_pair).await;
    }

    if let Some(selected) = component.selected_pair() {
        if Arc::ptr_eq(&selected, pair) {
            pair.refresh_consent();
        }
    }

    ai.update_check_list_states(stream).await;
}

/// The retransmission schedule ran dry without an answer.
pub(crate) async fn process_timeout(ai: &Arc<AgentInternal>, check: PendingCheck) {
    // A stale timeout of a superseded transaction must not undo a
    // success a newer check already proved.
    if check.pair.state() == CandidatePairState::Succeeded {
        return;
    }

    log::debug!(
        "[{}]: check timed out for {}",
        ai.get_name(),
        check.pair
    );
    ai.fail_pair(&check.stream, &check.pair);
    ai.nominator
        .on_pair_failed(ai, &check.stream, &check.pair)
        .await;
    ai.update_check_list_states(&check.stream).await;
}
