
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::error::*;

/// Transport protocols a candidate address can be reached over.
#[derive(PartialEq, Debug, Copy, Clone, Eq, Hash, Serialize, Deserialize)]
pub enum Transport {
    #[serde(rename = "udp")]
    Udp,
    #[serde(rename = "tcp")]
    Tcp,
    #[serde(rename = "tls")]
    Tls,
    #[serde(rename = "dtls")]
    Dtls,
    #[serde(rename = "sctp")]
    Sctp,
    #[serde(rename = "ssltcp")]
    SslTcp,
}

impl Default for Transport {
    fn default() -> Self {
        Self::Udp
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Udp => "udp",
            Self::Tcp => "tcp",
            Self::Tls => "tls",
            Self::Dtls => "dtls",
            Self::Sctp => "sctp",
            Self::SslTcp => "ssltcp",
        };
        write!(f, "{s}")
    }
}

impl TryFrom<&str> for Transport {
    type Error = Error;

    fn try_from(raw: &str) -> Result<Self> {
        match raw.to_lowercase().as_str() {
            "udp" => Ok(Self::Udp),
            "tcp" => Ok(Self::Tcp),
            "tls" => Ok(Self::Tls),
            "dtls" => Ok(Self::Dtls),
            "sctp" => Ok(Self::Sctp),
            "ssltcp" => Ok(Self::SslTcp),
            _ => Err(Error::ErrProtoType),
        }
    }
}

impl Transport {
    /// Returns true if the transport delivers an ordered byte stream.
    #[must_use]
    pub const fn is_reliable(self) -> bool {
        match self {
            Self::Tcp | Self::Tls | Self::Sctp | Self::SslTcp => true,
            Self::Udp | Self::Dtls => false,
        }
    }

    /// Returns true for the TCP family of transports, which share
    /// candidate pairing rules (RFC 6544).
    #[must_use]
    pub const fn is_tcp_based(self) -> bool {
        matches!(self, Self::Tcp | Self::Tls | Self::SslTcp)
    }
}

/// The type of an ICE TCP candidate (RFC 6544 §4.5).
#[derive(PartialEq, Eq, Debug, Copy, Clone, Serialize, Deserialize)]
pub enum TcpType {
    /// The default value, used by non-TCP candidates.
    #[serde(rename = "unspecified")]
    Unspecified,
    /// Initiates outgoing TCP connections.
    #[serde(rename = "active")]
    Active,
    /// Only accepts incoming TCP connections.
    #[serde(rename = "passive")]
    Passive,
    /// Simultaneous-open, both at once.
    #[serde(rename = "so")]
    SimultaneousOpen,
}

impl Default for TcpType {
    fn default() -> Self {
        Self::Unspecified
    }
}

impl From<&str> for TcpType {
    fn from(raw: &str) -> Self {
        match raw {
            "active" => Self::Active,
            "passive" => Self::Passive,
            "so" => Self::SimultaneousOpen,
            _ => Self::Unspecified,
        }
    }
}

impl From<u8> for TcpType {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Active,
            2 => Self::Passive,
            3 => Self::SimultaneousOpen,
            _ => Self::Unspecified,
        }
    }
}

impl fmt::Display for TcpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Active => "active",
            Self::Passive => "passive",
            Self::SimultaneousOpen => "so",
            Self::Unspecified => "unspecified",
        };
        write!(f, "{s}")
    }
}

/// A network address a candidate lives on: IP, port and transport
/// protocol. Equality covers all three fields.
#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash)]
pub struct TransportAddress {
    pub addr: SocketAddr,
    pub transport: Transport,
}

impl fmt::Display for TransportAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.transport)
    }
}

impl Default for TransportAddress {
    fn default() -> Self {
        Self {
            addr: SocketAddr::new(IpAddr::from([0, 0, 0, 0]), 0),
            transport: Transport::Udp,
        }
    }
}

impl TransportAddress {
    #[must_use]
    pub fn new(ip: IpAddr, port: u16, transport: Transport) -> Self {
        Self {
            addr: SocketAddr::new(ip, port),
            transport,
        }
    }

    #[must_use]
    pub fn from_socket_addr(addr: SocketAddr, transport: Transport) -> Self {
        Self { addr, transport }
    }

    #[must_use]
    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    #[must_use]
    pub fn is_ipv6(&self) -> bool {
        self.addr.is_ipv6()
    }

    /// Returns true when the address is in one of the RFC 1918 private
    /// IPv4 ranges.
    #[must_use]
    pub fn is_private_host(&self) -> bool {
        match self.addr.ip() {
            IpAddr::V4(v4) => v4.is_private(),
            IpAddr::V6(_) => false,
        }
    }

    fn is_link_local(&self) -> bool {
        match self.addr.ip() {
            IpAddr::V4(v4) => v4.is_link_local(),
            // fe80::/10
            IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
        }
    }

    /// Determines whether this address could in principle exchange packets
    /// with `other`: the transports and the address families must match,
    /// and a link-local address only reaches a global one when
    /// `allow_link_to_global` is set.
    #[must_use]
    pub fn can_reach(&self, other: &TransportAddress, allow_link_to_global: bool) -> bool {
        if self.transport != other.transport {
            return false;
        }
        if self.addr.is_ipv4() != other.addr.is_ipv4() {
            return false;
        }
        if self.is_link_local() != other.is_link_local() {
            return allow_link_to_global;
        }
        true
    }
}
