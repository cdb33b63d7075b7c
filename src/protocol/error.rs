use std::error::Error;
use std::fmt::{self, Display};

/// Failures in framing or decoding a wire message, shared by server and
/// client connection tasks.
#[derive(Debug)]
pub enum ProtocolError {
    /// The 4-byte length prefix declared a payload larger than `MAX_PACKET_SIZE`.
    OversizePacket { declared: usize, max: usize },
    /// The connection's peer closed or errored mid-frame.
    Io(std::io::Error),
    /// The payload didn't deserialize into any known message, or was missing
    /// a field required for the tagged variant it claimed to be.
    MalformedPayload(String),
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::OversizePacket { declared, max } => write!(
                f,
                "packet of {declared} bytes exceeds the {max}-byte maximum"
            ),
            ProtocolError::Io(err) => write!(f, "frame I/O error: {err}"),
            ProtocolError::MalformedPayload(reason) => {
                write!(f, "malformed packet payload: {reason}")
            }
        }
    }
}

impl Error for ProtocolError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ProtocolError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        ProtocolError::Io(err)
    }
}
