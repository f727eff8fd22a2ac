
use std::borrow::Cow;
use std::fmt;

use crate::error::*;
use crate::transport::Transport;

/// The kind of server a [`ServerUrl`] points at.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum SchemeType {
    /// A STUN server (RFC 7064).
    Stun,
    /// A STUNS (secure) server.
    Stuns,
    /// A TURN server (RFC 7065).
    Turn,
    /// A TURNS (secure) server.
    Turns,
}

impl TryFrom<&str> for SchemeType {
    type Error = Error;

    fn try_from(raw: &str) -> Result<Self> {
        match raw {
            "stun" => Ok(Self::Stun),
            "stuns" => Ok(Self::Stuns),
            "turn" => Ok(Self::Turn),
            "turns" => Ok(Self::Turns),
            _ => Err(Error::ErrSchemeType),
        }
    }
}

impl fmt::Display for SchemeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Stun => "stun",
            Self::Stuns => "stuns",
            Self::Turn => "turn",
            Self::Turns => "turns",
        };
        write!(f, "{s}")
    }
}

impl SchemeType {
    #[must_use]
    pub const fn is_turn(self) -> bool {
        matches!(self, Self::Turn | Self::Turns)
    }

    const fn default_port(self) -> u16 {
        match self {
            Self::Stun | Self::Turn => 3478,
            Self::Stuns | Self::Turns => 5349,
        }
    }

    const fn default_transport(self) -> Transport {
        match self {
            Self::Stun | Self::Turn => Transport::Udp,
            Self::Stuns | Self::Turns => Transport::Tcp,
        }
    }
}

/// A STUN or TURN server address handed to harvesters, also recorded on
/// the candidates a server yields so foundations can key on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerUrl {
    pub scheme: SchemeType,
    pub host: String,
    pub port: u16,
    pub transport: Transport,
}

impl fmt::Display for ServerUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let host = if self.host.contains("::") {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.scheme.is_turn() {
            write!(
                f,
                "{}:{}:{}?transport={}",
                self.scheme, host, self.port, self.transport
            )
        } else {
            write!(f, "{}:{}:{}", self.scheme, host, self.port)
        }
    }
}

impl ServerUrl {
    /// Parses a STUN or TURN URL following the ABNF of RFC 7064 and
    /// RFC 7065 respectively: `scheme:host[:port][?transport=udp|tcp]`.
    pub fn parse(raw: &str) -> Result<Self> {
        // the url crate only accepts authority-form urls
        if raw.contains("//") {
            return Err(Error::ErrSchemeType);
        }

        let mut s = raw.to_string();
        match raw.find(':') {
            Some(p) => s.replace_range(p..=p, "://"),
            None => return Err(Error::ErrSchemeType),
        }

        let raw_parts = url::Url::parse(&s)?;

        let scheme = SchemeType::try_from(raw_parts.scheme())?;

        let host = match raw_parts.host_str() {
            Some(host) => host
                .trim()
                .trim_start_matches('[')
                .trim_end_matches(']')
                .to_owned(),
            None => return Err(Error::ErrHost),
        };

        let port = raw_parts.port().unwrap_or_else(|| scheme.default_port());

        let mut q_args = raw_parts.query_pairs();
        let transport = match q_args.next() {
            Some((key, value)) => {
                if !scheme.is_turn() || key != Cow::Borrowed("transport") {
                    return Err(Error::ErrProtoType);
                }
                let transport = Transport::try_from(value.as_ref())?;
                if !matches!(transport, Transport::Udp | Transport::Tcp) {
                    return Err(Error::ErrProtoType);
                }
                transport
            }
            None => scheme.default_transport(),
        };

        Ok(Self {
            scheme,
            host,
            port,
            transport,
        })
    }
}
