//! Mirrors a running match: applies the same server broadcasts a second
//! peer would see, relays local input upstream, and replays remote input
//! against its own copy of `Match`. There's no authority here — the server
//! settles disputes; a client that disagrees with a broadcast has a bug.

pub mod error;

use std::collections::HashMap;

pub use error::ClientError;

use crate::coordinator::Match;
use crate::field::garbage::{GbId, Garbage, GbPos, GbSize};
use crate::field::{Field, KeyState};
use crate::protocol::{GarbageWireState, Message, PlayerGameState};
use crate::server::ServerConf;

/// Pulled once per local tick to decide what keys the local player is
/// holding. A real binary wires this to whatever reads physical input;
/// rendering and input-device binding are out of scope for this crate.
pub trait InputProvider {
    fn poll(&mut self) -> KeyState;
}

#[derive(Debug, Clone, Default)]
struct RemotePlayer {
    nick: Option<String>,
    field_conf_name: Option<String>,
    state: PlayerGameState,
}

/// One player's view of a match: server config once learned, every known
/// player's public state, and a full mirrored `Match` once the game starts.
pub struct ClientInstance {
    conf: Option<ServerConf>,
    state: PlayerGameState,
    local_plid: Option<u32>,
    players: HashMap<u32, RemotePlayer>,
    match_: Match,
    fldid_by_plid: HashMap<u32, u32>,
}

impl Default for ClientInstance {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientInstance {
    pub fn new() -> Self {
        Self {
            conf: None,
            state: PlayerGameState::None,
            local_plid: None,
            players: HashMap::new(),
            match_: Match::new(),
            fldid_by_plid: HashMap::new(),
        }
    }

    pub fn local_plid(&self) -> Option<u32> {
        self.local_plid
    }

    pub fn state(&self) -> PlayerGameState {
        self.state
    }

    pub fn server_conf(&self) -> Option<&ServerConf> {
        self.conf.as_ref()
    }

    pub fn local_field(&self) -> Option<&Field> {
        let plid = self.local_plid?;
        let fldid = *self.fldid_by_plid.get(&plid)?;
        self.match_.field(fldid)
    }

    /// Applies one server broadcast to local state. Returns any messages the
    /// caller should send back upstream — currently only the `GarbageState`
    /// drop acknowledgement half of the handshake from §4.5.
    pub fn apply(&mut self, message: Message) -> Result<Vec<Message>, ClientError> {
        match message {
            Message::ServerConf { max_players, tick_microseconds, max_lag_ticks, start_countdown_ticks, field_confs } => {
                self.conf = Some(ServerConf { max_players, tick_microseconds, max_lag_ticks, start_countdown_ticks, field_confs });
                Ok(vec![])
            }
            Message::ServerState { .. } => Ok(vec![]),
            Message::PlayerConf { plid, nick, field_conf, join } => {
                let entry = self.players.entry(plid).or_default();
                if nick.is_some() {
                    entry.nick = nick;
                }
                if field_conf.is_some() {
                    entry.field_conf_name = field_conf;
                }
                if join == Some(true) {
                    self.local_plid = Some(plid);
                }
                Ok(vec![])
            }
            Message::PlayerState { plid, state } => {
                let entry = self.players.entry(plid).or_default();
                entry.state = state;
                if Some(plid) == self.local_plid {
                    self.state = state;
                }
                if matches!(state, PlayerGameState::None | PlayerGameState::Quit) {
                    self.fldid_by_plid.remove(&plid);
                }
                Ok(vec![])
            }
            Message::PlayerField { plid, seed, grid } => {
                let conf = self
                    .players
                    .get(&plid)
                    .and_then(|p| p.field_conf_name.as_deref())
                    .and_then(|name| self.conf.as_ref().and_then(|c| c.field_conf(name).ok()))
                    .or_else(|| self.conf.as_ref().and_then(|c| c.field_confs.first().map(|(_, conf)| conf)))
                    .ok_or(ClientError::UnknownPlayer(plid))?
                    .clone();
                let fldid = self.match_.add_field(conf, seed);
                self.fldid_by_plid.insert(plid, fldid);
                if let Some(field) = self.match_.field_mut(fldid) {
                    apply_initial_grid(field, &grid);
                }
                if !self.match_.started() {
                    self.match_.start();
                }
                Ok(vec![])
            }
            Message::Input { plid, tick, keys } => {
                let fldid = *self.fldid_by_plid.get(&plid).ok_or(ClientError::UnknownPlayer(plid))?;
                for (i, key) in keys.into_iter().enumerate() {
                    let target_tick = tick + i as u64;
                    let Some(field) = self.match_.field_mut(fldid) else { break };
                    if field.lost() || field.tick() + 1 != target_tick {
                        continue;
                    }
                    field.step(key);
                }
                self.match_.update_tick();
                let _ = self.match_.update_ranks();
                Ok(vec![])
            }
            Message::NewGarbage { gbid, plid_to, plid_from, gb_type, size, .. } => {
                let to_field = *self.fldid_by_plid.get(&plid_to).ok_or(ClientError::UnknownPlayer(plid_to))?;
                let from_field = plid_from.and_then(|p| self.fldid_by_plid.get(&p).copied());
                let garbage = Garbage {
                    gbid,
                    from_field,
                    to_field,
                    gb_type,
                    pos: GbPos { x: 0, y: 0 },
                    size: GbSize { x: size.0, y: size.1 },
                };
                let front = matches!(gb_type, crate::field::garbage::GbType::Chain);
                self.match_.add_garbage(garbage, front);
                Ok(vec![])
            }
            Message::UpdateGarbage { gbid, size } => {
                if let Some(garbage) = self.match_.hanging_mut(gbid) {
                    garbage.size = GbSize { x: size.0, y: size.1 };
                }
                Ok(vec![])
            }
            Message::GarbageState { gbid, state } => self.on_garbage_state(gbid, state),
            Message::PlayerRank { plid, rank } => {
                if let Some(&fldid) = self.fldid_by_plid.get(&plid) {
                    if let Some(field) = self.match_.field_mut(fldid) {
                        field.set_rank(rank);
                    }
                }
                Ok(vec![])
            }
            Message::Chat { .. } | Message::Notification { .. } => Ok(vec![]),
        }
    }

    /// Half of the drop handshake this client is responsible for: once the
    /// server announces a garbage is `Wait`-ing, the owner of the *target*
    /// field is the one that must ack with `Drop` before it materializes. A
    /// client only owns its own local field, so it only acks drops aimed at
    /// itself; every other peer's `Wait` is purely informational here.
    fn on_garbage_state(&mut self, gbid: GbId, state: GarbageWireState) -> Result<Vec<Message>, ClientError> {
        match state {
            GarbageWireState::Wait => {
                let Some(garbage) = self.match_.hanging(gbid) else {
                    return Ok(vec![]);
                };
                let owns_target = self.local_plid.and_then(|p| self.fldid_by_plid.get(&p)) == Some(&garbage.to_field);
                self.match_.wait_garbage_drop(gbid);
                if owns_target {
                    Ok(vec![Message::GarbageState { gbid, state: GarbageWireState::Drop }])
                } else {
                    Ok(vec![])
                }
            }
            GarbageWireState::Drop => {
                self.match_.acknowledge_drop(gbid);
                Ok(vec![])
            }
        }
    }
}

/// `PlayerField.grid` ships only the initial random fill; every later
/// difference comes from replaying broadcast `Input`. This only needs to
/// seed the play rows a fresh `Field` doesn't already carry.
fn apply_initial_grid(field: &mut Field, grid: &[crate::protocol::WireCell]) {
    use crate::field::block::{Block, ColorState, HEIGHT, WIDTH};

    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            let idx = y * WIDTH + x;
            let Some(cell) = grid.get(idx) else { continue };
            let block = match cell.color_index {
                Some(color_index) => Block::color(color_index, ColorState::Rest),
                None => Block::None,
            };
            field.grid_mut().set(x, y, block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::conf::test_conf;

    fn conf() -> ServerConf {
        ServerConf {
            max_players: 2,
            tick_microseconds: 16_667,
            max_lag_ticks: 20,
            start_countdown_ticks: 180,
            field_confs: vec![("default".to_string(), test_conf())],
        }
    }

    fn empty_grid() -> Vec<crate::protocol::WireCell> {
        vec![crate::protocol::WireCell { color_index: None }; 6 * 13]
    }

    #[test]
    fn learns_local_plid_from_join_marker() {
        let mut client = ClientInstance::new();
        client
            .apply(Message::PlayerConf { plid: 3, nick: None, field_conf: None, join: Some(true) })
            .unwrap();
        assert_eq!(client.local_plid(), Some(3));
    }

    #[test]
    fn player_field_creates_a_mirrored_field() {
        let mut client = ClientInstance::new();
        client.conf = Some(conf());
        client.apply(Message::PlayerConf { plid: 1, nick: None, field_conf: None, join: Some(true) }).unwrap();
        client.apply(Message::PlayerField { plid: 1, seed: 7, grid: empty_grid() }).unwrap();
        assert!(client.local_field().is_some());
    }

    #[test]
    fn non_owning_client_does_not_ack_drop() {
        let mut client = ClientInstance::new();
        client.conf = Some(conf());
        client.apply(Message::PlayerConf { plid: 1, nick: None, field_conf: None, join: Some(true) }).unwrap();
        client.apply(Message::PlayerField { plid: 1, seed: 1, grid: empty_grid() }).unwrap();
        client.apply(Message::PlayerField { plid: 2, seed: 1, grid: empty_grid() }).unwrap();
        client
            .apply(Message::NewGarbage {
                gbid: GbId(1),
                pos: 0,
                plid_to: 2,
                plid_from: Some(1),
                gb_type: crate::field::garbage::GbType::Combo,
                size: (3, 1),
            })
            .unwrap();
        let acks = client.apply(Message::GarbageState { gbid: GbId(1), state: GarbageWireState::Wait }).unwrap();
        assert!(acks.is_empty());
    }

    #[test]
    fn owning_client_acks_drop() {
        let mut client = ClientInstance::new();
        client.conf = Some(conf());
        client.apply(Message::PlayerConf { plid: 2, nick: None, field_conf: None, join: Some(true) }).unwrap();
        client.apply(Message::PlayerField { plid: 1, seed: 1, grid: empty_grid() }).unwrap();
        client.apply(Message::PlayerField { plid: 2, seed: 1, grid: empty_grid() }).unwrap();
        client
            .apply(Message::NewGarbage {
                gbid: GbId(1),
                pos: 0,
                plid_to: 2,
                plid_from: Some(1),
                gb_type: crate::field::garbage::GbType::Combo,
                size: (3, 1),
            })
            .unwrap();
        let acks = client.apply(Message::GarbageState { gbid: GbId(1), state: GarbageWireState::Wait }).unwrap();
        assert_eq!(acks, vec![Message::GarbageState { gbid: GbId(1), state: GarbageWireState::Drop }]);
    }
}
