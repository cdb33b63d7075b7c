pub use crate::protocol::{GameState as ServerState, PlayerGameState as PlayerState};
