use std::time::Duration;

use async_trait::async_trait;
use stun::agent::TransactionId;
use stun::message::Message;

use crate::error::*;
use crate::transport::TransportAddress;

/// Connectivity-check retransmissions, RFC 5389 §7.2.1 with Rc = 7: the
/// interval starts at 500 ms and doubles up to 1.6 s for as many as six
/// retransmissions of the original request.
pub const DEFAULT_ORIGINAL_RTO: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_RTO: Duration = Duration::from_millis(1600);
pub const DEFAULT_MAX_RETRANSMISSIONS: u16 = 6;

/// The retry schedule for one outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransmissionPolicy {
    pub rto: Duration,
    pub max_rto: Duration,
    pub max_retransmissions: u16,
}

impl Default for RetransmissionPolicy {
    fn default() -> Self {
        Self {
            rto: DEFAULT_ORIGINAL_RTO,
            max_rto: DEFAULT_MAX_RTO,
            max_retransmissions: DEFAULT_MAX_RETRANSMISSIONS,
        }
    }
}

/// An outcome the transaction engine reports for a request it was asked
/// to send. The agent routes these by transaction id back to the pair
/// the check belongs to.
#[derive(Debug)]
pub enum TransactionEvent {
    Response {
        transaction_id: TransactionId,
        response: Message,
        /// Where the response arrived.
        local_addr: TransportAddress,
        /// Who sent it.
        remote_addr: TransportAddress,
    },
    Timeout {
        transaction_id: TransactionId,
        local_addr: TransportAddress,
    },
}

/// The STUN transaction engine this core drives. Implementations own the
/// wire codec, retransmission timers and socket I/O; outcomes come back
/// as [`TransactionEvent`]s on the channel the agent hands out via
/// `Agent::transaction_event_sender`.
#[async_trait]
pub trait StunStack {
    /// Sends `request` from `source` to `destination` and keeps
    /// retransmitting per `policy` until a response arrives or the
    /// schedule is exhausted. Returns the transaction id the outcome
    /// event will carry.
    async fn send_request(
        &self,
        request: Message,
        destination: TransportAddress,
        source: TransportAddress,
        policy: RetransmissionPolicy,
    ) -> Result<TransactionId>;

    /// Fire-and-forget indication, no retransmissions, no outcome event.
    async fn send_indication(
        &self,
        indication: Message,
        destination: TransportAddress,
        source: TransportAddress,
    ) -> Result<()>;

    /// Stops retransmitting the given transaction and forgets it; no
    /// outcome event is delivered afterwards.
    async fn cancel_transaction(&self, transaction_id: TransactionId);
}
