use std::num::ParseIntError;
use std::time::SystemTimeError;
use std::{io, net};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// Indicates the scheme type could not be parsed.
    #[error("unknown scheme type")]
    ErrSchemeType,

    /// Indicates malformed hostname is provided.
    #[error("invalid hostname")]
    ErrHost,

    /// Indicates malformed port is provided.
    #[error("invalid port number")]
    ErrPort,

    /// Indicates an unsupported transport protocol was provided.
    #[error("invalid transport protocol type")]
    ErrProtoType,

    /// Indicates local username fragment insufficient bits are provided.
    /// Have to be at least 24 bits long.
    #[error("local username fragment is less than 24 bits long")]
    ErrLocalUfragInsufficientBits,

    /// Indicates local password insufficient bits are provided.
    /// Have to be at least 128 bits long.
    #[error("local password is less than 128 bits long")]
    ErrLocalPwdInsufficientBits,

    /// Indicates the agent is closed.
    #[error("the agent is closed")]
    ErrClosed,

    /// Indicates the agent was built without a STUN transaction engine.
    #[error("no STUN stack provided")]
    ErrNoStunStack,

    /// Indicates connectivity establishment was started twice.
    #[error("attempted to start agent twice")]
    ErrMultipleStart,

    /// Indicates the agent was started with an empty remote ufrag.
    #[error("remote ufrag is empty")]
    ErrRemoteUfragEmpty,

    /// Indicates the agent was started with an empty remote pwd.
    #[error("remote pwd is empty")]
    ErrRemotePwdEmpty,

    /// Indicates a component id below 1 was requested.
    #[error("component id must be 1 or greater")]
    ErrInvalidComponentId,

    /// Indicates a component was created twice for the same id.
    #[error("component already exists")]
    ErrComponentAlreadyExists,

    /// Indicates a stream was created twice under the same name.
    #[error("media stream already exists")]
    ErrStreamAlreadyExists,

    /// Indicates a lookup for an unknown media stream.
    #[error("no such media stream")]
    ErrStreamNotFound,

    /// Indicates a lookup for an unknown component.
    #[error("no such component")]
    ErrComponentNotFound,

    /// Indicates the agent does not have a valid candidate pair.
    #[error("no candidate pairs available")]
    ErrNoCandidatePairs,

    /// Indicates we were unable to parse a candidate address.
    #[error("failed to parse address")]
    ErrAddressParseFailed,

    /// Indicates an unknown ICE role string.
    #[error("unknown role")]
    ErrUnknownRole,

    /// Indicates a STUN message could not be sent.
    #[error("failed to send packet")]
    ErrSendPacket,

    /// Indicates the response carried no usable XOR-MAPPED-ADDRESS.
    #[error("failed to get XOR-MAPPED-ADDRESS response")]
    ErrGetXorMappedAddrResponse,

    /// Indicates a relayed check could not install a TURN permission.
    #[error("failed to create TURN permission")]
    ErrCreatePermission,

    #[error("parse int: {0}")]
    ParseInt(#[from] ParseIntError),
    #[error("parse addr: {0}")]
    ParseIp(#[from] net::AddrParseError),
    #[error("{0}")]
    Io(#[source] IoError),
    #[error("{0}")]
    Util(#[from] util::Error),
    #[error("{0}")]
    Stun(#[from] stun::Error),
    #[error("{0}")]
    ParseUrl(#[from] url::ParseError),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
#[error("io error: {0}")]
pub struct IoError(#[from] pub io::Error);

// Workaround for wanting PartialEq for io::Error.
impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(IoError(e))
    }
}

impl From<SystemTimeError> for Error {
    fn from(e: SystemTimeError) -> Self {
        Error::Other(e.to_string())
    }
}
