//! Per-user WebSocket connection registry.
//!
//! Maintains `user_id -> set<Connection>`, capped per user, with best-effort
//! fan-out. The gateway's actual WS endpoint owns the socket and the
//! receive-timeout/keep-alive loop (§4.2 liveness); this module only tracks
//! who is connected and how to reach them.

use std::collections::HashMap;

use bg_domain::ws::ServerMessage;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Default simultaneous live connections per user, used only by [`WsHub::default`]
/// and tests. The gateway itself always constructs via [`WsHub::new`] with the
/// configured limit.
pub const DEFAULT_MAX_CONNECTIONS_PER_USER: usize = 5;

/// Channel the hub uses to push frames to one connection's writer task.
pub type ConnSink = mpsc::Sender<ServerMessage>;

struct Connection {
    conn_id: String,
    sink: ConnSink,
}

/// Returned by [`WsHub::register`] when the user's connection set is
/// already at capacity.
#[derive(Debug)]
pub struct ConnectionCapExceeded;

pub struct WsHub {
    connections: RwLock<HashMap<String, Vec<Connection>>>,
    max_per_user: usize,
}

impl Default for WsHub {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONNECTIONS_PER_USER)
    }
}

impl WsHub {
    pub fn new(max_per_user: usize) -> Self {
        Self { connections: RwLock::new(HashMap::new()), max_per_user }
    }

    /// Registers a new connection for `user_id`, rejecting it if the user's
    /// connection set is already at the configured per-user cap. Returns the
    /// connection id to pass to [`WsHub::remove`] on disconnect.
    pub fn register(&self, user_id: &str, sink: ConnSink) -> Result<String, ConnectionCapExceeded> {
        let mut conns = self.connections.write();
        let set = conns.entry(user_id.to_owned()).or_default();
        if set.len() >= self.max_per_user {
            return Err(ConnectionCapExceeded);
        }
        let conn_id = Uuid::new_v4().to_string();
        set.push(Connection { conn_id: conn_id.clone(), sink });
        Ok(conn_id)
    }

    pub fn remove(&self, user_id: &str, conn_id: &str) {
        let mut conns = self.connections.write();
        if let Some(set) = conns.get_mut(user_id) {
            set.retain(|c| c.conn_id != conn_id);
            if set.is_empty() {
                conns.remove(user_id);
            }
        }
    }

    /// Fan-out: pushes `msg` to every live connection for `user_id`.
    /// Delivery is best-effort — a connection whose writer task has gone
    /// away is dropped without blocking the others, not an error.
    pub fn send_to_user(&self, user_id: &str, msg: ServerMessage) {
        let conns = self.connections.read();
        let Some(set) = conns.get(user_id) else { return };
        for conn in set {
            let _ = conn.sink.try_send(msg.clone());
        }
    }

    pub fn connection_count(&self, user_id: &str) -> usize {
        self.connections.read().get(user_id).map_or(0, |s| s.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> (ConnSink, mpsc::Receiver<ServerMessage>) {
        mpsc::channel(16)
    }

    #[test]
    fn register_and_fan_out() {
        let hub = WsHub::new(DEFAULT_MAX_CONNECTIONS_PER_USER);
        let (tx1, mut rx1) = sink();
        let (tx2, mut rx2) = sink();
        hub.register("u1", tx1).unwrap();
        hub.register("u1", tx2).unwrap();

        hub.send_to_user("u1", ServerMessage::Heartbeat);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn cap_enforced_per_user() {
        let hub = WsHub::new(DEFAULT_MAX_CONNECTIONS_PER_USER);
        for _ in 0..DEFAULT_MAX_CONNECTIONS_PER_USER {
            let (tx, _rx) = sink();
            hub.register("u1", tx).unwrap();
        }
        let (tx, _rx) = sink();
        assert!(hub.register("u1", tx).is_err());
        assert_eq!(hub.connection_count("u1"), DEFAULT_MAX_CONNECTIONS_PER_USER);
    }

    #[test]
    fn different_users_have_independent_caps() {
        let hub = WsHub::new(DEFAULT_MAX_CONNECTIONS_PER_USER);
        for _ in 0..DEFAULT_MAX_CONNECTIONS_PER_USER {
            let (tx, _rx) = sink();
            hub.register("u1", tx).unwrap();
        }
        let (tx, _rx) = sink();
        assert!(hub.register("u2", tx).is_ok());
    }

    #[test]
    fn send_is_best_effort_dropped_receiver_does_not_panic() {
        let hub = WsHub::new(DEFAULT_MAX_CONNECTIONS_PER_USER);
        let (tx, rx) = sink();
        hub.register("u1", tx).unwrap();
        drop(rx);
        // Should not panic even though the receiver is gone.
        hub.send_to_user("u1", ServerMessage::Heartbeat);
    }

    #[test]
    fn remove_frees_a_slot() {
        let hub = WsHub::new(DEFAULT_MAX_CONNECTIONS_PER_USER);
        let (tx, _rx) = sink();
        let conn_id = hub.register("u1", tx).unwrap();
        assert_eq!(hub.connection_count("u1"), 1);
        hub.remove("u1", &conn_id);
        assert_eq!(hub.connection_count("u1"), 0);

        let (tx2, _rx2) = sink();
        assert!(hub.register("u1", tx2).is_ok());
    }

    #[test]
    fn send_to_unknown_user_is_a_noop() {
        let hub = WsHub::new(DEFAULT_MAX_CONNECTIONS_PER_USER);
        hub.send_to_user("ghost", ServerMessage::Heartbeat);
    }
}
