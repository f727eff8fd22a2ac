use std::sync::Arc;

use stun::agent::TransactionId;
use stun::attributes::{ATTR_SOFTWARE, ATTR_USERNAME};
use stun::fingerprint::FINGERPRINT;
use stun::integrity::MessageIntegrity;
use stun::message::{
    Message, MessageType, Setter, BINDING_REQUEST, CLASS_INDICATION, METHOD_BINDING,
};
use stun::textattrs::TextAttribute;
use tokio::time::sleep;

use crate::agent::agent_internal::{AgentInternal, CheckKind, PendingCheck};
use crate::attributes::{AttrControlled, AttrControlling, PriorityAttr};
use crate::candidate::{CandidatePair, CandidatePairState, CandidateType};
use crate::events::IceEvent;
use crate::state::IceProcessingState;
use crate::stream::IceMediaStream;
use crate::transport::TransportAddress;

/// Runs keepalive rounds from COMPLETED until the agent terminates.
/// With consent freshness on, every round proves the peer still
/// authorizes receiving (RFC 7675); otherwise it only keeps bindings
/// warm with indications.
pub(crate) fn start_keepalive(ai: &Arc<AgentInternal>) {
    if ai.keepalive_claimed() {
        return;
    }

    let ai = Arc::clone(ai);
    let mut done_rx = ai.done.subscribe();
    tokio::spawn(async move {
        log::debug!("[{}]: keepalive task started", ai.get_name());
        loop {
            tokio::select! {
                _ = sleep(ai.settings.consent_interval) => {}
                _ = done_rx.recv() => return,
            }

            match ai.state() {
                IceProcessingState::Terminated | IceProcessingState::Failed => return,
                _ => {}
            }

            run_round(&ai).await;
        }
    });
}

async fn run_round(ai: &Arc<AgentInternal>) {
    for stream in ai.streams().await {
        let succeeded: Vec<Arc<CandidatePair>> = stream
            .check_list()
            .pairs()
            .await
            .into_iter()
            .filter(|p| p.state() == CandidatePairState::Succeeded)
            .collect();

        for component in stream.components().await {
            component
                .update_keepalive_pairs(ai.settings.keep_alive_strategy, &succeeded)
                .await;

            for pair in component.keepalive_pairs().await {
                if ai.settings.consent_freshness {
                    send_consent_check(ai, &stream, &pair).await;
                } else {
                    send_keepalive_indication(ai, &pair).await;
                }
            }
        }
    }
}

/// One acknowledged Binding Request on a kept-alive pair; the response
/// advances the pair's consent timestamp.
async fn send_consent_check(
    ai: &Arc<AgentInternal>,
    stream: &Arc<IceMediaStream>,
    pair: &Arc<CandidatePair>,
) {
    let username = format!("{}:{}", stream.remote_ufrag(), ai.local_ufrag);
    let tie_breaker = ai.tie_breaker.load(std::sync::atomic::Ordering::SeqCst);

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
        if ai.is_controlling() {
            setters.push(Box::new(AttrControlling(tie_breaker)));
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
        log::error!("[{}]: failed to build consent check: {}", ai.get_name(), err);
        return;
    }

    let destination = pair.remote.addr();
    let source = if pair.local.is_relayed() {
        pair.local.addr()
    } else {
        pair.local.base().addr()
    };
    let transaction_id = msg.transaction_id;

    {
        let mut checks = ai.checks.lock().await;
        checks.insert(
            transaction_id,
            PendingCheck {
                stream: Arc::clone(stream),
                pair: Arc::clone(pair),
                destination,
                source,
                is_use_candidate: false,
                request: msg.clone(),
                kind: CheckKind::Consent,
            },
        );
    }

    let sent = ai
        .stun_stack
        .send_request(msg, destination, source, ai.settings.consent_policy)
        .await;

    if let Err(err) = sent {
        log::warn!(
            "[{}]: failed to send consent check for {}: {}",
            ai.get_name(),
            pair,
            err
        );
        let mut checks = ai.checks.lock().await;
        checks.remove(&transaction_id);
    }
}

/// Fire-and-forget Binding Indication, enough to hold NAT bindings open.
async fn send_keepalive_indication(ai: &Arc<AgentInternal>, pair: &Arc<CandidatePair>) {
    let mut msg = Message::new();
    let build_result = {
        let mut setters: Vec<Box<dyn Setter>> = vec![
            Box::new(MessageType {
                method: METHOD_BINDING,
                class: CLASS_INDICATION,
            }),
            Box::new(TransactionId::new()),
        ];
        if !ai.settings.software.is_empty() {
            setters.push(Box::new(TextAttribute::new(
                ATTR_SOFTWARE,
                ai.settings.software.clone(),
            )));
        }
        if ai.settings.always_sign {
            setters.push(Box::new(FINGERPRINT));
        }
        msg.build(&setters)
    };
    if let Err(err) = build_result {
        log::error!(
            "[{}]: failed to build keepalive indication: {}",
            ai.get_name(),
            err
        );
        return;
    }

    let destination = pair.remote.addr();
    let source = if pair.local.is_relayed() {
        pair.local.addr()
    } else {
        pair.local.base().addr()
    };

    if let Err(err) = ai
        .stun_stack
        .send_indication(msg, destination, source)
        .await
    {
        log::warn!(
            "[{}]: failed to send keepalive for {}: {}",
            ai.get_name(),
            pair,
            err
        );
    }
}

/// The peer answered a consent check; its authorization stays fresh.
pub(crate) fn process_consent_response(
    ai: &Arc<AgentInternal>,
    check: PendingCheck,
    local_addr: TransportAddress,
    remote_addr: TransportAddress,
) {
    if remote_addr != check.destination || local_addr != check.source {
        log::debug!(
            "[{}]: non-symmetric consent response for {}",
            ai.get_name(),
            check.pair
        );
        return;
    }

    check.pair.refresh_consent();
    ai.publish(IceEvent::PairConsentFreshness {
        stream: check.stream.name.clone(),
        pair: check.pair,
        alive: true,
    });
}

/// Every retransmission of a consent round went unanswered: consent is
/// considered lost, the pair stays selected but the failure surfaces
/// through the state machine.
pub(crate) fn process_consent_timeout(ai: &Arc<AgentInternal>, check: PendingCheck) {
    log::warn!(
        "[{}]: consent expired for {}",
        ai.get_name(),
        check.pair
    );
    ai.publish(IceEvent::PairConsentFreshness {
        stream: check.stream.name.clone(),
        pair: check.pair,
        alive: false,
    });
    ai.try_transition(IceProcessingState::Completed, IceProcessingState::Failed);
}
