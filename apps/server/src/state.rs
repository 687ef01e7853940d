use axum::extract::ws::Message;
use dashmap::DashMap;
use shared_proto::ConnId;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;

pub type Tx = mpsc::UnboundedSender<Message>;
/// Outbound channel per live socket, keyed by the server-assigned connection id.
pub type PeerMap = Arc<DashMap<ConnId, Tx>>;

#[derive(Clone)]
pub struct AppState {
    pub peers: PeerMap,
    pub dispatcher: Dispatcher,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(peers: PeerMap, dispatcher: Dispatcher, config: ServerConfig) -> Self {
        Self {
            peers,
            dispatcher,
            config: Arc::new(config),
        }
    }

    pub fn register(&self, conn: ConnId, tx: Tx) {
        self.peers.insert(conn, tx);
    }

    /// Returns whether the connection was still registered.
    pub fn unregister(&self, conn: &ConnId) -> bool {
        self.peers.remove(conn).is_some()
    }

    pub fn online_count(&self) -> usize {
        self.peers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::switchboard::Switchboard;

    #[tokio::test]
    async fn register_and_unregister_track_sockets() {
        let peers: PeerMap = Arc::new(DashMap::new());
        let (dispatcher, _handle) = Dispatcher::spawn(Switchboard::new(None), peers.clone());
        let state = AppState::new(peers, dispatcher, ServerConfig::default());

        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = ConnId::from("c-1");
        state.register(conn.clone(), tx);
        assert_eq!(state.online_count(), 1);

        assert!(state.unregister(&conn));
        assert!(!state.unregister(&conn));
        assert_eq!(state.online_count(), 0);
    }
}
