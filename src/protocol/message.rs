//! The tagged union of every packet that crosses the wire. Framing (length
//! prefix) lives in `codec`; only payload shape lives here.

use serde::{Deserialize, Serialize};

use crate::field::conf::FieldConf;
use crate::field::garbage::{GbId, GbType};
use crate::field::KeyState;

/// Maximum encoded payload size, excluding the 4-byte length prefix.
pub const MAX_PACKET_SIZE: usize = 51_200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameState {
    None,
    Lobby,
    GameInit,
    GameReady,
    Game,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerGameState {
    #[default]
    None,
    Quit,
    Lobby,
    LobbyReady,
    GameInit,
    GameReady,
    Game,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GarbageWireState {
    Wait,
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Grid cells serialised row-major, `width * (top + 1)` long, for `PlayerField`.
/// Each cell is `(kind, state, color_or_gbid)`; a full structural encoding of
/// `Block` isn't on the wire because only the initial random fill is ever
/// shipped this way — everything afterward replays from `Input`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireCell {
    pub color_index: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Message {
    ServerConf {
        max_players: u32,
        tick_microseconds: u64,
        max_lag_ticks: u64,
        start_countdown_ticks: u64,
        field_confs: Vec<(String, FieldConf)>,
    },
    ServerState {
        state: GameState,
    },
    PlayerConf {
        plid: u32,
        nick: Option<String>,
        field_conf: Option<String>,
        join: Option<bool>,
    },
    PlayerState {
        plid: u32,
        state: PlayerGameState,
    },
    PlayerField {
        plid: u32,
        seed: u32,
        grid: Vec<WireCell>,
    },
    Input {
        plid: u32,
        tick: u64,
        keys: Vec<KeyState>,
    },
    NewGarbage {
        gbid: GbId,
        pos: u8,
        plid_to: u32,
        plid_from: Option<u32>,
        #[serde(rename = "type")]
        gb_type: GbType,
        size: (u8, u8),
    },
    UpdateGarbage {
        gbid: GbId,
        size: (u8, u8),
    },
    GarbageState {
        gbid: GbId,
        state: GarbageWireState,
    },
    PlayerRank {
        plid: u32,
        rank: u32,
    },
    Chat {
        plid: u32,
        txt: String,
    },
    Notification {
        severity: Severity,
        txt: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::schema::{
        Deserialize as SchemaDeserialize, Json, Serialize as SchemaSerialize,
    };

    #[test]
    fn round_trips_through_json_schema() {
        let msg = Message::Input {
            plid: 1,
            tick: 42,
            keys: vec![KeyState::default()],
        };
        let bytes = SchemaSerialize::<Json>::serialize(&msg);
        let back: Message = SchemaDeserialize::<Json>::deserialize(&bytes).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn new_garbage_without_originator_round_trips() {
        let msg = Message::NewGarbage {
            gbid: GbId(7),
            pos: 0,
            plid_to: 2,
            plid_from: None,
            gb_type: GbType::Chain,
            size: (6, 1),
        };
        let bytes = SchemaSerialize::<Json>::serialize(&msg);
        let back: Message = SchemaDeserialize::<Json>::deserialize(&bytes).unwrap();
        assert_eq!(msg, back);
    }
}
