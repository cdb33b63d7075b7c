use std::error::Error;
use std::fmt::{self, Display};

use crate::protocol::ProtocolError;

/// A connection-terminating failure observed by the client instance.
#[derive(Debug)]
pub enum ClientError {
    Protocol(ProtocolError),
    ConnectionFailure(std::io::Error),
    /// The server sent a packet this client had no context for (e.g. an
    /// `Input` for a `plid` it never saw a `PlayerConf` for).
    UnknownPlayer(u32),
    /// A `GarbageState(Drop)` or `UpdateGarbage` named a `gbid` not present
    /// in either registry.
    UnknownGarbage(u32),
    /// The server closed the connection, or the transport errored mid-read.
    Disconnected,
}

impl Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Protocol(err) => write!(f, "{err}"),
            ClientError::ConnectionFailure(err) => write!(f, "failed to connect to server: {err}"),
            ClientError::UnknownPlayer(plid) => {
                write!(f, "received a packet for unknown player {plid}")
            }
            ClientError::UnknownGarbage(gbid) => {
                write!(f, "received a packet referencing unknown garbage {gbid}")
            }
            ClientError::Disconnected => write!(f, "disconnected from server"),
        }
    }
}

impl Error for ClientError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ClientError::Protocol(err) => Some(err),
            ClientError::ConnectionFailure(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        ClientError::Protocol(err)
    }
}
