
pub mod candidate_pair;

pub use candidate_pair::*;

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;
use util::sync::Mutex as SyncMutex;

use crate::error::*;
use crate::rand::generate_cand_id;
use crate::transport::{TcpType, Transport, TransportAddress};
use crate::url::ServerUrl;

/// Component id of the RTP flow of a stream, by convention.
pub const COMPONENT_RTP: u16 = 1;
/// Component id of the RTCP flow of a stream, by convention.
pub const COMPONENT_RTCP: u16 = 2;

/// The local preference used when a host has a single address.
pub(crate) const DEFAULT_LOCAL_PREFERENCE: u16 = 65535;

/// Represents the type of an ICE candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CandidateType {
    #[serde(rename = "unspecified")]
    Unspecified,
    #[serde(rename = "host")]
    Host,
    #[serde(rename = "srflx")]
    ServerReflexive,
    #[serde(rename = "prflx")]
    PeerReflexive,
    #[serde(rename = "relay")]
    Relay,
}

impl fmt::Display for CandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            CandidateType::Host => "host",
            CandidateType::ServerReflexive => "srflx",
            CandidateType::PeerReflexive => "prflx",
            CandidateType::Relay => "relay",
            CandidateType::Unspecified => "unspecified",
        };
        write!(f, "{s}")
    }
}

impl Default for CandidateType {
    fn default() -> Self {
        Self::Unspecified
    }
}

impl CandidateType {
    /// Returns the type preference weight that feeds the candidate
    /// priority formula. Relayed transports carry the highest weight,
    /// host addresses the lowest.
    #[must_use]
    pub const fn preference(self) -> u16 {
        match self {
            Self::Relay => 126,
            Self::PeerReflexive => 110,
            Self::ServerReflexive => 100,
            Self::Host => 40,
            Self::Unspecified => 0,
        }
    }

    /// Returns the weight used when electing a component's default
    /// candidate, highest wins.
    #[must_use]
    pub const fn default_preference(self, ipv6: bool) -> u16 {
        match self {
            Self::Relay => 30,
            Self::ServerReflexive => 20,
            Self::Host => {
                if ipv6 {
                    10
                } else {
                    15
                }
            }
            Self::PeerReflexive | Self::Unspecified => 0,
        }
    }
}

/// Tags how a local candidate was discovered, which can be finer grained
/// than its RFC type (a reflexive address may surface from a STUN
/// harvest or from an incoming connectivity check).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtendedType {
    HostCandidate,
    ServerReflexiveCandidate,
    StunPeerReflexiveCandidate,
    RelayedCandidate,
}

impl fmt::Display for ExtendedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::HostCandidate => "host",
            Self::ServerReflexiveCandidate => "srflx",
            Self::StunPeerReflexiveCandidate => "stun prflx",
            Self::RelayedCandidate => "relayed",
        };
        write!(f, "{s}")
    }
}

/// The record shared by local and remote candidates: where the candidate
/// lives, which component it belongs to, and how it groups for freezing.
pub struct CandidateData {
    pub id: String,
    pub component_id: u16,
    pub transport_addr: TransportAddress,
    pub candidate_type: CandidateType,
    pub related_addr: Option<TransportAddress>,
    pub ufrag: String,

    // Assigned after construction by the foundation registry, and for TCP
    // locals possibly rewritten while the check list is pruned.
    foundation: SyncMutex<String>,
    tcp_type: AtomicU8,
}

impl CandidateData {
    fn new(
        id: String,
        component_id: u16,
        transport_addr: TransportAddress,
        candidate_type: CandidateType,
        tcp_type: TcpType,
        related_addr: Option<TransportAddress>,
        ufrag: String,
        foundation: String,
    ) -> Self {
        Self {
            id: if id.is_empty() { generate_cand_id() } else { id },
            component_id,
            transport_addr,
            candidate_type,
            related_addr,
            ufrag,
            foundation: SyncMutex::new(foundation),
            tcp_type: AtomicU8::new(tcp_type as u8),
        }
    }

    /// The string grouping candidates that likely share path
    /// characteristics, used by the freezing algorithm.
    pub fn foundation(&self) -> String {
        self.foundation.lock().clone()
    }

    pub fn set_foundation(&self, foundation: String) {
        *self.foundation.lock() = foundation;
    }

    pub fn tcp_type(&self) -> TcpType {
        TcpType::from(self.tcp_type.load(Ordering::SeqCst))
    }

    pub fn set_tcp_type(&self, tcp_type: TcpType) {
        self.tcp_type.store(tcp_type as u8, Ordering::SeqCst);
    }

    pub fn addr(&self) -> TransportAddress {
        self.transport_addr
    }

    pub fn transport(&self) -> Transport {
        self.transport_addr.transport
    }

    fn equal(&self, other: &CandidateData) -> bool {
        self.candidate_type == other.candidate_type
            && self.transport_addr == other.transport_addr
            && self.tcp_type() == other.tcp_type()
            && self.related_addr == other.related_addr
    }
}

impl fmt::Display for CandidateData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(related) = &self.related_addr {
            write!(
                f,
                "{} {} related {}",
                self.candidate_type, self.transport_addr, related
            )
        } else {
            write!(f, "{} {}", self.candidate_type, self.transport_addr)
        }
    }
}

/// A transport address this agent offers, together with the socket it was
/// bound on and, for relayed candidates, the handle that installs TURN
/// permissions.
pub struct LocalCandidate {
    pub data: CandidateData,
    pub extended_type: ExtendedType,
    /// The server this candidate was learned from, if any.
    pub server: Option<ServerUrl>,

    // None for host and relayed candidates, which are their own base.
    base: Option<Arc<LocalCandidate>>,
    local_preference: u16,
    priority_override: u32,
    priority_modifier: u32,
    socket: Option<Arc<dyn util::Conn + Send + Sync>>,
    relay: Option<Arc<dyn crate::harvest::RelayPermission + Send + Sync>>,
}

impl fmt::Display for LocalCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.data.fmt(f)
    }
}

impl LocalCandidate {
    /// The base of a reflexive candidate; host and relayed candidates are
    /// their own base.
    #[must_use]
    pub fn base(self: &Arc<Self>) -> Arc<LocalCandidate> {
        match &self.base {
            Some(base) => Arc::clone(base),
            None => Arc::clone(self),
        }
    }

    /// Computes the candidate priority, RFC 8445 §5.1.2.1:
    /// `(2^24)·type preference + (2^8)·local preference + (256 - component id)`.
    #[must_use]
    pub fn priority(&self) -> u32 {
        if self.priority_override != 0 {
            return self.priority_override;
        }
        self.compute_priority_for_type(self.data.candidate_type)
    }

    /// The priority this candidate's transport address would have were it
    /// discovered as type `t`. Connectivity checks advertise the
    /// peer-reflexive variant in their PRIORITY attribute.
    #[must_use]
    pub fn compute_priority_for_type(&self, t: CandidateType) -> u32 {
        (1 << 24) * u32::from(t.preference())
            + (1 << 8) * u32::from(self.local_preference)
            + (256 - u32::from(self.data.component_id))
            + self.priority_modifier
    }

    #[must_use]
    pub fn local_preference(&self) -> u16 {
        self.local_preference
    }

    #[must_use]
    pub fn default_preference(&self) -> u16 {
        self.data
            .candidate_type
            .default_preference(self.data.transport_addr.is_ipv6())
    }

    #[must_use]
    pub fn addr(&self) -> TransportAddress {
        self.data.transport_addr
    }

    #[must_use]
    pub fn socket(&self) -> Option<&Arc<dyn util::Conn + Send + Sync>> {
        self.socket.as_ref()
    }

    #[must_use]
    pub fn relay(&self) -> Option<&Arc<dyn crate::harvest::RelayPermission + Send + Sync>> {
        self.relay.as_ref()
    }

    #[must_use]
    pub fn is_relayed(&self) -> bool {
        self.data.candidate_type == CandidateType::Relay
    }

    #[must_use]
    pub fn equal(&self, other: &LocalCandidate) -> bool {
        self.data.equal(&other.data)
    }

    /// Releases the candidate's socket. A socket shared with the base is
    /// left open, the base closes it.
    pub async fn close(self: &Arc<Self>) -> Result<()> {
        let socket = match &self.socket {
            Some(socket) => socket,
            None => return Ok(()),
        };

        if let Some(base) = &self.base {
            if let Some(base_socket) = base.socket() {
                if Arc::ptr_eq(socket, base_socket) {
                    return Ok(());
                }
            }
        }

        socket.close().await?;
        Ok(())
    }
}

/// A transport address offered by the peer, learned from signaling or
/// from the source address of an incoming check.
pub struct RemoteCandidate {
    pub data: CandidateData,
    priority: u32,
}

impl fmt::Display for RemoteCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.data.fmt(f)
    }
}

impl RemoteCandidate {
    /// The priority the peer advertised for this candidate.
    #[must_use]
    pub fn priority(&self) -> u32 {
        self.priority
    }

    #[must_use]
    pub fn addr(&self) -> TransportAddress {
        self.data.transport_addr
    }

    #[must_use]
    pub fn equal(&self, other: &RemoteCandidate) -> bool {
        self.data.equal(&other.data)
    }
}

/// The config shared by every `LocalCandidate` constructor.
#[derive(Default)]
pub struct LocalCandidateConfig {
    pub candidate_id: String,
    pub component_id: u16,
    pub transport_addr: TransportAddress,
    pub tcp_type: TcpType,
    pub related_addr: Option<TransportAddress>,
    pub ufrag: String,
    pub server: Option<ServerUrl>,
    /// Unset means the single-address default of 65535; harvesters pass 0
    /// for virtual or VPN interfaces.
    pub local_preference: Option<u16>,
    pub priority: u32,
    pub priority_modifier: u32,
    pub socket: Option<Arc<dyn util::Conn + Send + Sync>>,
    pub relay: Option<Arc<dyn crate::harvest::RelayPermission + Send + Sync>>,
}

impl LocalCandidateConfig {
    fn into_candidate(
        self,
        candidate_type: CandidateType,
        extended_type: ExtendedType,
        base: Option<Arc<LocalCandidate>>,
    ) -> LocalCandidate {
        LocalCandidate {
            data: CandidateData::new(
                self.candidate_id,
                self.component_id,
                self.transport_addr,
                candidate_type,
                self.tcp_type,
                self.related_addr,
                self.ufrag,
                String::new(),
            ),
            extended_type,
            server: self.server,
            base,
            local_preference: self.local_preference.unwrap_or(DEFAULT_LOCAL_PREFERENCE),
            priority_override: self.priority,
            priority_modifier: self.priority_modifier,
            socket: self.socket,
            relay: self.relay,
        }
    }

    /// Creates a host candidate, its own base.
    pub fn new_candidate_host(self) -> LocalCandidate {
        self.into_candidate(CandidateType::Host, ExtendedType::HostCandidate, None)
    }

    /// Creates a server-reflexive candidate on top of `base`.
    pub fn new_candidate_server_reflexive(mut self, base: Arc<LocalCandidate>) -> LocalCandidate {
        if self.related_addr.is_none() {
            self.related_addr = Some(base.addr());
        }
        self.into_candidate(
            CandidateType::ServerReflexive,
            ExtendedType::ServerReflexiveCandidate,
            Some(base),
        )
    }

    /// Creates a peer-reflexive candidate discovered by a connectivity
    /// check answered through `base`.
    pub fn new_candidate_peer_reflexive(mut self, base: Arc<LocalCandidate>) -> LocalCandidate {
        if self.related_addr.is_none() {
            self.related_addr = Some(base.addr());
        }
        self.into_candidate(
            CandidateType::PeerReflexive,
            ExtendedType::StunPeerReflexiveCandidate,
            Some(base),
        )
    }

    /// Creates a relayed candidate allocated on a TURN server, its own
    /// base.
    pub fn new_candidate_relay(self) -> LocalCandidate {
        self.into_candidate(CandidateType::Relay, ExtendedType::RelayedCandidate, None)
    }
}

/// The config shared by every `RemoteCandidate` constructor.
#[derive(Default)]
pub struct RemoteCandidateConfig {
    pub candidate_id: String,
    pub component_id: u16,
    pub transport_addr: TransportAddress,
    pub tcp_type: TcpType,
    pub priority: u32,
    pub foundation: String,
    pub related_addr: Option<TransportAddress>,
    pub ufrag: String,
}

impl RemoteCandidateConfig {
    fn into_candidate(self, candidate_type: CandidateType) -> RemoteCandidate {
        RemoteCandidate {
            data: CandidateData::new(
                self.candidate_id,
                self.component_id,
                self.transport_addr,
                candidate_type,
                self.tcp_type,
                self.related_addr,
                self.ufrag,
                self.foundation,
            ),
            priority: self.priority,
        }
    }

    pub fn new_candidate_host(self) -> RemoteCandidate {
        self.into_candidate(CandidateType::Host)
    }

    pub fn new_candidate_server_reflexive(self) -> RemoteCandidate {
        self.into_candidate(CandidateType::ServerReflexive)
    }

    pub fn new_candidate_peer_reflexive(self) -> RemoteCandidate {
        self.into_candidate(CandidateType::PeerReflexive)
    }

    pub fn new_candidate_relay(self) -> RemoteCandidate {
        self.into_candidate(CandidateType::Relay)
    }
}
