//! Session hub: connected clients and per-container rooms

use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::types::ServerMessage;

/// Routes server messages to connected gateway clients.
///
/// A room is keyed by container id and holds the clients registered for
/// that container.
#[derive(Default)]
pub struct SessionHub {
    clients: DashMap<String, mpsc::UnboundedSender<ServerMessage>>,
    rooms: DashMap<String, HashSet<String>>,
}

impl SessionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connected client
    pub fn register(&self, client_id: &str, tx: mpsc::UnboundedSender<ServerMessage>) {
        self.clients.insert(client_id.to_string(), tx);
    }

    /// Forget a client and remove it from every room
    pub fn unregister(&self, client_id: &str) {
        self.clients.remove(client_id);
        self.rooms.retain(|_, members| {
            members.remove(client_id);
            !members.is_empty()
        });
    }

    pub fn join(&self, container_id: &str, client_id: &str) {
        self.rooms
            .entry(container_id.to_string())
            .or_default()
            .insert(client_id.to_string());
    }

    pub fn leave(&self, container_id: &str, client_id: &str) {
        let emptied = match self.rooms.get_mut(container_id) {
            Some(mut members) => {
                members.remove(client_id);
                members.is_empty()
            }
            None => false,
        };
        if emptied {
            self.rooms.remove_if(container_id, |_, members| members.is_empty());
        }
    }

    /// Send a message to one client. Returns false if the client is gone.
    pub fn send_to(&self, client_id: &str, msg: ServerMessage) -> bool {
        match self.clients.get(client_id) {
            Some(tx) => tx.send(msg).is_ok(),
            None => false,
        }
    }

    /// Send a message to every client in a container's room
    pub fn broadcast_room(&self, container_id: &str, msg: &ServerMessage) -> usize {
        let members: Vec<String> = match self.rooms.get(container_id) {
            Some(members) => members.iter().cloned().collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for client_id in members {
            if self.send_to(&client_id, msg.clone()) {
                delivered += 1;
            }
        }
        debug!("Broadcast to {} client(s) of {}", delivered, container_id);
        delivered
    }

    #[cfg(test)]
    pub fn room_size(&self, container_id: &str) -> usize {
        self.rooms.get(container_id).map(|m| m.len()).unwrap_or(0)
    }
}
