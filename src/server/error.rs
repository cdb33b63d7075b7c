use std::error::Error;
use std::fmt::{self, Display};

use crate::error::ConfigError;
use crate::protocol::ProtocolError;

/// A connection-terminating failure on the server side. Every variant maps
/// to a `Notification(ERROR)` sent to the offending peer before the
/// connection closes (§7 of the design).
#[derive(Debug)]
pub enum ServerError {
    Protocol(ProtocolError),
    Config(ConfigError),
    /// A packet claimed a `plid` the connection hasn't been granted.
    PlidMismatch { claimed: u32, owned: Vec<u32> },
    /// A packet type is not valid in the server's current state.
    UnexpectedPacket { state: &'static str, got: &'static str },
    /// `Input.tick` named a tick at or before the field's current tick.
    InputTickInPast { field_tick: u64, packet_tick: u64 },
    /// `field.tick + 1 >= match.tick + max_lag_ticks`.
    MaximumLagExceeded { field_tick: u64, match_tick: u64, max_lag_ticks: u64 },
    /// A `PlayerConf.field_conf` preset name that doesn't exist.
    UnknownFieldConfPreset(String),
}

impl Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Protocol(err) => write!(f, "{err}"),
            ServerError::Config(err) => write!(f, "{err}"),
            ServerError::PlidMismatch { claimed, owned } => write!(
                f,
                "packet claims plid {claimed}, but this connection only owns {owned:?}"
            ),
            ServerError::UnexpectedPacket { state, got } => {
                write!(f, "packet `{got}` is not valid while the server is in state `{state}`")
            }
            ServerError::InputTickInPast { field_tick, packet_tick } => write!(
                f,
                "input tick {packet_tick} is not after the field's current tick {field_tick}"
            ),
            ServerError::MaximumLagExceeded { field_tick, match_tick, max_lag_ticks } => write!(
                f,
                "maximum lag exceeded: field tick {field_tick} would run past match tick \
                 {match_tick} by more than the {max_lag_ticks}-tick window"
            ),
            ServerError::UnknownFieldConfPreset(name) => {
                write!(f, "no field configuration preset named `{name}`")
            }
        }
    }
}

impl Error for ServerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ServerError::Protocol(err) => Some(err),
            ServerError::Config(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        ServerError::Protocol(err)
    }
}

impl From<ConfigError> for ServerError {
    fn from(err: ConfigError) -> Self {
        ServerError::Config(err)
    }
}
