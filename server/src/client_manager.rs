//! Roster of connected peers kept by the server front door
//!
//! The front door owns one `ClientManager` and uses it to:
//! - assign player ids to accepted connections
//! - enforce the per-match seat limit before a peer reaches the engine
//! - find and release a seat when its connection goes away
//!
//! Ids are never reused within a server run, so a late event about a closed
//! connection can never be mistaken for a newer peer.

use log::info;
use shared::PlayerId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// One accepted connection
#[derive(Debug)]
pub struct Client {
    /// Player id handed to the engine
    pub id: PlayerId,
    /// Remote address of the TCP peer
    pub addr: SocketAddr,
    /// When the connection was accepted
    pub connected_at: Instant,
}

impl Client {
    pub fn new(id: PlayerId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            connected_at: Instant::now(),
        }
    }

    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Seats taken by connected peers
///
/// Capacity is the number of players a match accepts. A seat is released as
/// soon as the connection closes, but the engine keeps the player's session.
pub struct ClientManager {
    /// Connected clients indexed by player id
    clients: HashMap<PlayerId, Client>,
    /// Next id to hand out
    next_client_id: PlayerId,
    /// Maximum number of concurrent clients allowed
    max_clients: usize,
}

impl ClientManager {
    /// Creates an empty roster. Ids start from 1.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Seats a new peer.
    ///
    /// Returns the assigned player id, or None when every seat is taken.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<PlayerId> {
        if self.is_full() {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr));

        Some(client_id)
    }

    /// Frees the seat held by `client_id`. Returns false if it was already free.
    pub fn remove_client(&mut self, client_id: &PlayerId) -> bool {
        match self.clients.remove(client_id) {
            Some(client) => {
                info!(
                    "Client {} ({}) left after {:?}",
                    client.id,
                    client.addr,
                    client.connected_for()
                );
                true
            }
            None => false,
        }
    }

    pub fn is_full(&self) -> bool {
        self.clients.len() >= self.max_clients
    }

    /// Returns the number of currently connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
