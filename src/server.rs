//! Lobby, peer lifecycle, broadcast, and the authoritative per-tick
//! simulation. One `ServerInstance` owns the entire `Match`; peer connection
//! tasks never touch it directly, they only feed packets in over a command
//! channel and drain outbound messages from their own `SessionManager` slot.

pub mod config;
pub mod error;
pub mod session;
pub mod state;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub use config::ServerConf;
pub use error::ServerError;
pub use session::SessionManager;
pub use state::{PlayerState, ServerState};

use crate::coordinator::Match;
use crate::distributor::{DistributorEvent, GarbageDistributor};
use crate::field::conf::FieldConf;
use crate::protocol::{GameState, GarbageWireState, Message, MessageFramed, PlayerGameState, Severity};

#[derive(Debug, Clone)]
struct PlayerInfo {
    plid: u32,
    nick: Option<String>,
    field_conf_name: Option<String>,
    state: PlayerState,
    fldid: Option<u32>,
}

enum ServerCommand {
    Connected { plid: u32 },
    Disconnected { plid: u32 },
    Packet { plid: u32, message: Message },
}

/// Owner of the match, every player's public state, and the current server
/// state machine position. There is exactly one of these per running match
/// server; it lives inside the single task that `run` spawns to drive it.
pub struct ServerInstance {
    conf: ServerConf,
    session: Arc<SessionManager>,
    players: HashMap<u32, PlayerInfo>,
    state: ServerState,
    match_: Match,
    distributor: GarbageDistributor,
    seed_rng: crate::field::rng::Rng,
}

impl ServerInstance {
    pub fn new(conf: ServerConf, session: Arc<SessionManager>) -> Result<Self, ServerError> {
        conf.validate()?;
        Ok(Self {
            conf,
            session,
            players: HashMap::new(),
            state: ServerState::Lobby,
            match_: Match::new(),
            distributor: GarbageDistributor::new(),
            seed_rng: crate::field::rng::Rng::new(0x2545_F491),
        })
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    fn field_conf_for(&self, player: &PlayerInfo) -> Result<FieldConf, ServerError> {
        let name = player
            .field_conf_name
            .as_deref()
            .unwrap_or_else(|| self.conf.field_confs[0].0.as_str());
        Ok(self.conf.field_conf(name)?.clone())
    }

    /// Registers a newly-accepted connection as a fresh player and sends it
    /// the snapshot every peer receives on connect: server config, current
    /// server state, then every existing player's public state.
    fn on_connected(&mut self, plid: u32) {
        self.players.insert(
            plid,
            PlayerInfo {
                plid,
                nick: None,
                field_conf_name: None,
                state: PlayerState::Lobby,
                fldid: None,
            },
        );

        self.session.send(
            plid,
            Message::ServerConf {
                max_players: self.conf.max_players,
                tick_microseconds: self.conf.tick_microseconds,
                max_lag_ticks: self.conf.max_lag_ticks,
                start_countdown_ticks: self.conf.start_countdown_ticks,
                field_confs: self.conf.field_confs.clone(),
            },
        );
        self.session.send(plid, Message::ServerState { state: self.state });
        self.session.send(
            plid,
            Message::PlayerConf { plid, nick: None, field_conf: None, join: Some(true) },
        );

        for other in self.players.values() {
            if other.plid == plid {
                continue;
            }
            self.session.send(
                plid,
                Message::PlayerConf {
                    plid: other.plid,
                    nick: other.nick.clone(),
                    field_conf: other.field_conf_name.clone(),
                    join: Some(false),
                },
            );
            self.session.send(plid, Message::PlayerState { plid: other.plid, state: other.state });
        }

        log::debug!("player {plid} connected, server state {:?}", self.state);
        self.session.broadcast_except(
            plid,
            Message::PlayerConf { plid, nick: None, field_conf: None, join: Some(false) },
        );
        self.broadcast_player_state(plid, PlayerState::Lobby);
    }

    fn on_disconnected(&mut self, plid: u32) {
        log::debug!("player {plid} disconnected");
        let fldid = self.players.remove(&plid).and_then(|p| p.fldid);
        self.session.unregister(plid);
        self.broadcast_player_state(plid, PlayerState::Quit);

        if self.state == ServerState::Game {
            if let Some(field) = fldid.and_then(|id| self.match_.field_mut(id)) {
                field.abort();
            }
            self.match_.update_tick();
            let (ranked, ended) = self.match_.update_ranks();
            for r in ranked {
                self.session.broadcast(Message::PlayerRank { plid: r.fldid, rank: r.rank });
            }
            if ended {
                self.stop_match();
            }
        }
    }

    fn broadcast_player_state(&self, plid: u32, state: PlayerState) {
        self.session.broadcast(Message::PlayerState { plid, state });
    }

    fn handle_packet(&mut self, plid: u32, message: Message) -> Result<(), ServerError> {
        match message {
            Message::PlayerConf { plid: claimed, nick, field_conf, .. } => {
                self.require_owns(plid, claimed)?;
                let player = self.players.get_mut(&plid).expect("registered on connect");
                if nick.is_some() {
                    player.nick = nick;
                }
                if field_conf.is_some() {
                    player.field_conf_name = field_conf;
                }
            }
            Message::PlayerState { plid: claimed, state } => {
                self.require_owns(plid, claimed)?;
                self.on_player_state(plid, state)?;
            }
            Message::Input { plid: claimed, tick, keys } => {
                self.require_owns(plid, claimed)?;
                self.on_input(plid, tick, keys)?;
            }
            Message::GarbageState { gbid, state } => {
                self.on_garbage_state(plid, gbid, state);
            }
            Message::Chat { plid: claimed, txt } => {
                self.require_owns(plid, claimed)?;
                self.session.broadcast(Message::Chat { plid, txt });
            }
            other => {
                return Err(ServerError::UnexpectedPacket {
                    state: state_name(self.state),
                    got: message_name(&other),
                });
            }
        }
        Ok(())
    }

    fn require_owns(&self, connection_plid: u32, claimed: u32) -> Result<(), ServerError> {
        if connection_plid != claimed {
            return Err(ServerError::PlidMismatch { claimed, owned: vec![connection_plid] });
        }
        Ok(())
    }

    fn on_player_state(&mut self, plid: u32, requested: PlayerGameState) -> Result<(), ServerError> {
        let player = self.players.get_mut(&plid).ok_or(ServerError::PlidMismatch { claimed: plid, owned: vec![] })?;
        player.state = requested;
        self.broadcast_player_state(plid, requested);

        match (self.state, requested) {
            (ServerState::Lobby, PlayerState::LobbyReady) => self.maybe_start_game_init(),
            (ServerState::GameReady, PlayerState::GameReady) => self.maybe_start_game(),
            _ => {}
        }
        Ok(())
    }

    fn maybe_start_game_init(&mut self) {
        let ready = self.players.values().filter(|p| p.state == PlayerState::LobbyReady).count();
        if ready as u32 != self.conf.max_players {
            return;
        }

        self.state = ServerState::GameInit;
        self.session.broadcast(Message::ServerState { state: GameState::GameInit });

        let seed = self.fresh_shared_seed();
        self.match_.clear();
        self.match_.start();
        self.distributor.reset();

        let plids: Vec<u32> = self
            .players
            .iter()
            .filter(|(_, p)| p.state == PlayerState::LobbyReady)
            .map(|(&plid, _)| plid)
            .collect();

        for plid in plids {
            let conf = match self.field_conf_for(self.players.get(&plid).unwrap()) {
                Ok(conf) => conf,
                Err(err) => {
                    log::warn!("player {plid} named an invalid field conf: {err}");
                    continue;
                }
            };
            let fldid = self.match_.add_field(conf, seed);
            if let Some(player) = self.players.get_mut(&plid) {
                player.fldid = Some(fldid);
                player.state = PlayerState::GameInit;
            }
            let grid = snapshot_grid(self.match_.field(fldid).expect("just added"));
            self.session.broadcast(Message::PlayerField { plid, seed, grid });
            self.broadcast_player_state(plid, PlayerState::GameInit);
        }

        // GameInit -> GameReady is implicit the moment the broadcast above lands.
        self.state = ServerState::GameReady;
        self.session.broadcast(Message::ServerState { state: GameState::GameReady });
    }

    /// Every match needs a shared seed the caller never has to supply. There's
    /// no process-wide RNG in this crate (§9), so the instance carries one
    /// `Rng` of its own purely to mint match seeds; it never touches field
    /// simulation.
    fn fresh_shared_seed(&mut self) -> u32 {
        self.seed_rng.next() as u32
    }

    fn maybe_start_game(&mut self) {
        let all_ready = self
            .players
            .values()
            .filter(|p| p.fldid.is_some())
            .all(|p| p.state == PlayerState::GameReady);
        if !all_ready || self.players.is_empty() {
            return;
        }
        self.state = ServerState::Game;
        self.session.broadcast(Message::ServerState { state: GameState::Game });
        for player in self.players.values_mut().filter(|p| p.fldid.is_some()) {
            player.state = PlayerState::Game;
        }
    }

    /// Applies every key in `keys` at its own tick, one field-step at a
    /// time, validating the lag window before each step and broadcasting the
    /// result to every other peer.
    fn on_input(&mut self, plid: u32, tick: u64, keys: Vec<crate::field::KeyState>) -> Result<(), ServerError> {
        let fldid = self.players.get(&plid).and_then(|p| p.fldid).ok_or(ServerError::UnexpectedPacket {
            state: state_name(self.state),
            got: "Input",
        })?;

        for (i, key) in keys.iter().enumerate() {
            let target_tick = tick + i as u64;
            let (field_tick, lost) = {
                let field = self.match_.field(fldid).expect("fldid tracked for this player");
                (field.tick(), field.lost())
            };
            if lost {
                break;
            }
            if target_tick != field_tick + 1 {
                return Err(ServerError::InputTickInPast { field_tick, packet_tick: target_tick });
            }
            let match_tick = self.match_.tick();
            if field_tick + 1 >= match_tick + self.conf.max_lag_ticks {
                return Err(ServerError::MaximumLagExceeded {
                    field_tick,
                    match_tick,
                    max_lag_ticks: self.conf.max_lag_ticks,
                });
            }

            let step_info = self.match_.field_mut(fldid).expect("checked above").step(*key);
            let events = self.distributor.update_garbages(&mut self.match_, fldid, &step_info);
            self.broadcast_distributor_events(events);

            self.match_.update_tick();
            let (ranked, ended) = self.match_.update_ranks();
            for r in ranked {
                self.session.broadcast(Message::PlayerRank { plid: r.fldid, rank: r.rank });
            }
            if ended {
                self.stop_match();
                break;
            }
        }

        self.session.broadcast_except(plid, Message::Input { plid, tick, keys });
        Ok(())
    }

    fn broadcast_distributor_events(&mut self, events: Vec<DistributorEvent>) {
        for event in events {
            match event {
                DistributorEvent::NewGarbage { gbid, to_field, from_field, gb_type, size } => {
                    let plid_to = self.plid_for_fldid(to_field).unwrap_or(to_field);
                    let plid_from = from_field.and_then(|f| self.plid_for_fldid(f));
                    self.session.broadcast(Message::NewGarbage {
                        gbid,
                        pos: 0,
                        plid_to,
                        plid_from,
                        gb_type,
                        size: (size.x, size.y),
                    });
                }
                DistributorEvent::UpdateGarbage { gbid, size } => {
                    self.session.broadcast(Message::UpdateGarbage { gbid, size: (size.x, size.y) });
                }
                DistributorEvent::WaitGarbage { gbid } => {
                    self.session.broadcast(Message::GarbageState { gbid, state: GarbageWireState::Wait });
                    self.maybe_auto_drop(gbid);
                }
            }
        }
    }

    /// The server is itself the owning authority for every field in this
    /// design (there's no "host also plays" split here), so it immediately
    /// acknowledges every `Wait` with a `Drop` once the target field can
    /// accept it — matching §4.5's "owner of the target field issues Drop".
    fn maybe_auto_drop(&mut self, gbid: crate::field::garbage::GbId) {
        if self.match_.waiting_by_gbid().contains_key(&gbid) {
            self.match_.acknowledge_drop(gbid);
            self.session.broadcast(Message::GarbageState { gbid, state: GarbageWireState::Drop });
        }
    }

    fn on_garbage_state(&mut self, _plid: u32, gbid: crate::field::garbage::GbId, state: GarbageWireState) {
        if state == GarbageWireState::Drop {
            self.match_.acknowledge_drop(gbid);
            self.session.broadcast(Message::GarbageState { gbid, state: GarbageWireState::Drop });
        }
    }

    fn plid_for_fldid(&self, fldid: u32) -> Option<u32> {
        self.players.iter().find(|(_, p)| p.fldid == Some(fldid)).map(|(&plid, _)| plid)
    }

    fn stop_match(&mut self) {
        log::debug!("match ended, returning to lobby");
        self.match_.stop();
        self.match_.clear();
        self.state = ServerState::Lobby;
        for player in self.players.values_mut() {
            player.fldid = None;
            player.state = PlayerState::Lobby;
        }
        self.session.broadcast(Message::ServerState { state: GameState::Lobby });
    }
}

fn state_name(state: ServerState) -> &'static str {
    match state {
        ServerState::None => "None",
        ServerState::Lobby => "Lobby",
        ServerState::GameInit => "GameInit",
        ServerState::GameReady => "GameReady",
        ServerState::Game => "Game",
    }
}

fn message_name(message: &Message) -> &'static str {
    match message {
        Message::ServerConf { .. } => "ServerConf",
        Message::ServerState { .. } => "ServerState",
        Message::PlayerConf { .. } => "PlayerConf",
        Message::PlayerState { .. } => "PlayerState",
        Message::PlayerField { .. } => "PlayerField",
        Message::Input { .. } => "Input",
        Message::NewGarbage { .. } => "NewGarbage",
        Message::UpdateGarbage { .. } => "UpdateGarbage",
        Message::GarbageState { .. } => "GarbageState",
        Message::PlayerRank { .. } => "PlayerRank",
        Message::Chat { .. } => "Chat",
        Message::Notification { .. } => "Notification",
    }
}

fn snapshot_grid(field: &crate::field::Field) -> Vec<crate::protocol::WireCell> {
    use crate::field::block::{Block, HEIGHT, WIDTH};

    let grid = field.grid();
    let mut cells = Vec::with_capacity(WIDTH * HEIGHT);
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            let color_index = match grid.get(x, y) {
                Block::Color { color_index, .. } => Some(color_index),
                _ => None,
            };
            cells.push(crate::protocol::WireCell { color_index });
        }
    }
    cells
}

/// Accepts connections and runs the server's single command loop: every
/// connection funnels its inbound packets into one `mpsc` channel, consumed
/// serially by the task that owns `ServerInstance`. Each connection's own
/// writer task drains the `SessionManager` slot registered for its player.
pub async fn run(conf: ServerConf, listener: TcpListener) -> Result<(), ServerError> {
    let session = Arc::new(SessionManager::default());
    let mut instance = ServerInstance::new(conf, Arc::clone(&session))?;
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<ServerCommand>();

    tokio::spawn(accept_loop(listener, Arc::clone(&session), cmd_tx));

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            ServerCommand::Connected { plid } => instance.on_connected(plid),
            ServerCommand::Disconnected { plid } => instance.on_disconnected(plid),
            ServerCommand::Packet { plid, message } => {
                if let Err(err) = instance.handle_packet(plid, message) {
                    log::warn!("player {plid} violated the protocol: {err}");
                    session.send(plid, Message::Notification { severity: Severity::Error, txt: err.to_string() });
                    instance.on_disconnected(plid);
                }
            }
        }
    }
    Ok(())
}

async fn accept_loop(listener: TcpListener, session: Arc<SessionManager>, cmd_tx: mpsc::UnboundedSender<ServerCommand>) {
    let mut next_plid: u32 = 1;
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                log::error!("accept failed: {err}");
                continue;
            }
        };
        let plid = next_plid;
        next_plid += 1;
        log::debug!("accepted connection from {addr} as player {plid}");
        tokio::spawn(run_connection(stream, plid, Arc::clone(&session), cmd_tx.clone()));
    }
}

async fn run_connection(stream: TcpStream, plid: u32, session: Arc<SessionManager>, cmd_tx: mpsc::UnboundedSender<ServerCommand>) {
    let mut outbound = session.register(plid);
    let _ = cmd_tx.send(ServerCommand::Connected { plid });

    let mut framed = MessageFramed::new(stream);
    loop {
        tokio::select! {
            outgoing = outbound.recv() => {
                match outgoing {
                    Some(message) => {
                        if framed.write_message(&message).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = framed.read_message() => {
                match incoming {
                    Ok(Some(message)) => {
                        if cmd_tx.send(ServerCommand::Packet { plid, message }).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        log::warn!("player {plid} framing error: {err}");
                        break;
                    }
                }
            }
        }
    }

    let _ = cmd_tx.send(ServerCommand::Disconnected { plid });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::config::test_server_conf;

    #[test]
    fn new_instance_starts_in_lobby() {
        let session = Arc::new(SessionManager::default());
        let instance = ServerInstance::new(test_server_conf(), session).unwrap();
        assert_eq!(instance.state(), ServerState::Lobby);
    }

    #[test]
    fn rejects_invalid_server_conf() {
        let mut conf = test_server_conf();
        conf.max_lag_ticks = conf.field_confs[0].1.gb_hang_ticks;
        let session = Arc::new(SessionManager::default());
        assert!(ServerInstance::new(conf, session).is_err());
    }

    #[test]
    fn lobby_ready_from_all_players_starts_game_init() {
        let session = Arc::new(SessionManager::default());
        let mut instance = ServerInstance::new(test_server_conf(), Arc::clone(&session)).unwrap();
        let _rx1 = session.register(1);
        let _rx2 = session.register(2);
        instance.on_connected(1);
        instance.on_connected(2);
        instance.on_player_state(1, PlayerGameState::LobbyReady).unwrap();
        assert_eq!(instance.state(), ServerState::Lobby);
        instance.on_player_state(2, PlayerGameState::LobbyReady).unwrap();
        assert_eq!(instance.state(), ServerState::GameReady);
    }
}
