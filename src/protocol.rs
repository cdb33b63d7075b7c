//! Netplay wire format: framed messages (`codec`) carrying a tagged message
//! union (`message`), decoded through a pluggable wire schema (`schema`).

pub mod codec;
pub mod error;
pub mod message;
pub mod schema;

pub use codec::MessageFramed;
pub use error::ProtocolError;
pub use message::{
    GameState, GarbageWireState, Message, PlayerGameState, Severity, WireCell, MAX_PACKET_SIZE,
};
pub use schema::{Deserialize, Json, Schema, SchemaType, Serialize};
