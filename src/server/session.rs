use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::protocol::Message;

/// Per-player outbound channels. The server's main task never writes to a
/// socket directly: it enqueues a `Message` here, and each connection's own
/// writer task (see `server::run_connection`) pumps its queue in FIFO order.
/// There is no `Mutex<Match>` anywhere in this crate; this is the one piece
/// of state shared across tasks, and it holds only send handles.
#[derive(Default)]
pub struct SessionManager {
    conns: RwLock<HashMap<u32, UnboundedSender<Message>>>,
}

impl SessionManager {
    pub fn register(&self, plid: u32) -> UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.conns.write().expect("session lock poisoned").insert(plid, tx);
        rx
    }

    pub fn unregister(&self, plid: u32) {
        self.conns.write().expect("session lock poisoned").remove(&plid);
    }

    /// Best-effort send: a send failure means the peer's connection task has
    /// already torn down, which is observed independently when its read loop
    /// exits.
    pub fn send(&self, plid: u32, message: Message) {
        let conns = self.conns.read().expect("session lock poisoned");
        if let Some(tx) = conns.get(&plid) {
            let _ = tx.send(message);
        }
    }

    pub fn broadcast(&self, message: Message) {
        let conns = self.conns.read().expect("session lock poisoned");
        for tx in conns.values() {
            let _ = tx.send(message.clone());
        }
    }

    pub fn broadcast_except(&self, except_plid: u32, message: Message) {
        let conns = self.conns.read().expect("session lock poisoned");
        for (&plid, tx) in conns.iter() {
            if plid != except_plid {
                let _ = tx.send(message.clone());
            }
        }
    }

    pub fn connected_plids(&self) -> Vec<u32> {
        self.conns.read().expect("session lock poisoned").keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registered_player_receives_sent_message() {
        let manager = SessionManager::default();
        let mut rx = manager.register(1);
        manager.send(1, Message::Chat { plid: 1, txt: "hi".to_string() });
        let received = rx.recv().await.unwrap();
        assert_eq!(received, Message::Chat { plid: 1, txt: "hi".to_string() });
    }

    #[tokio::test]
    async fn broadcast_except_skips_the_excluded_player() {
        let manager = SessionManager::default();
        let mut rx1 = manager.register(1);
        let mut rx2 = manager.register(2);
        manager.broadcast_except(1, Message::Chat { plid: 2, txt: "hey".to_string() });
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
    }
}
