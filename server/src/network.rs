//! Server front door: TCP accept loop and lobby management

use crate::client_manager::ClientManager;
use crate::connection::{ConnectionCounter, ConnectionEvent, ConnectionWorker};
use crate::engine::{EngineConfig, MatchHandle, MatchPhase};
use crate::game::GameState;
use log::{debug, error, info, warn};
use shared::{KeyRing, PlayerId, SessionCrypto, DEFAULT_FIELD_SIZE, MAX_PLAYERS};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// How long connection workers get to flush the end message before
/// `Server::run` returns.
const END_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on, `host:port`
    pub addr: String,
    pub field_size: i32,
    /// The match starts as soon as this many players have joined
    pub players_per_match: usize,
    pub tick_interval: Duration,
    pub start_delay: Duration,
    /// Fixed seed for the tail growth schedule
    pub seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            addr: "127.0.0.1:8080".to_string(),
            field_size: DEFAULT_FIELD_SIZE,
            players_per_match: MAX_PLAYERS,
            tick_interval: engine.tick_interval,
            start_delay: engine.start_delay,
            seed: None,
        }
    }
}

impl ServerConfig {
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            tick_interval: self.tick_interval,
            start_delay: self.start_delay,
        }
    }
}

/// Accepts players for a single match and hosts it until it ends
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    crypto: Arc<KeyRing>,
    clients: ClientManager,
    connections: ConnectionCounter,
    engine: MatchHandle,
    engine_task: JoinHandle<Option<PlayerId>>,
    /// Players the engine has accepted, including ones that left since
    registered: usize,

    lost_tx: mpsc::UnboundedSender<ConnectionEvent>,
    lost_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl Server {
    /// Binds the listener and spawns the engine in its forming phase.
    pub async fn bind(config: ServerConfig) -> Result<Self, BoxError> {
        if !(1..=MAX_PLAYERS).contains(&config.players_per_match) {
            return Err(format!(
                "players per match must be between 1 and {}, got {}",
                MAX_PLAYERS, config.players_per_match
            )
            .into());
        }

        let listener = TcpListener::bind(&config.addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let game = match config.seed {
            Some(seed) => GameState::with_seed(config.field_size, seed),
            None => GameState::new(config.field_size),
        };
        let (engine, engine_task) = MatchHandle::spawn(game, config.engine());
        let (lost_tx, lost_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener,
            clients: ClientManager::new(config.players_per_match),
            config,
            crypto: Arc::new(KeyRing::generate()),
            connections: ConnectionCounter::new(),
            engine,
            engine_task,
            registered: 0,
            lost_tx,
            lost_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle to the hosted match, e.g. to stop it early.
    pub fn engine(&self) -> MatchHandle {
        self.engine.clone()
    }

    /// Shared count of live connection workers
    pub fn connections(&self) -> ConnectionCounter {
        self.connections.clone()
    }

    /// Runs the accept loop until the match is over.
    ///
    /// Returns the winner, or `None` if the match was stopped or nobody won.
    pub async fn run(mut self) -> Result<Option<PlayerId>, BoxError> {
        info!(
            "Waiting for {} players on a {}x{} field",
            self.config.players_per_match, self.config.field_size, self.config.field_size
        );

        let winner = loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.handle_connection(stream, addr).await,
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
                Some(event) = self.lost_rx.recv() => self.handle_connection_event(event),
                result = &mut self.engine_task => break result?,
            }
        };

        info!(
            "Match over, winner {:?}, {} connections still open",
            winner,
            self.connections.active()
        );
        tokio::time::sleep(END_GRACE).await;
        Ok(winner)
    }

    async fn handle_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle for {}: {}", addr, e);
        }

        if self.engine.phase() != MatchPhase::Forming
            || self.registered >= self.config.players_per_match
        {
            warn!("Refusing {}: match already full or running", addr);
            return;
        }

        let Some(player_id) = self.clients.add_client(addr) else {
            warn!("Refusing {}: no free seat", addr);
            return;
        };

        let position = match self.engine.register_player(player_id).await {
            Ok(position) => position,
            Err(e) => {
                warn!("Engine refused player {} from {}: {}", player_id, addr, e);
                self.clients.remove_client(&player_id);
                return;
            }
        };
        self.registered += 1;
        info!(
            "Player {} joined at ({}, {}), {}/{} seats taken",
            player_id,
            position.x,
            position.y,
            self.registered,
            self.config.players_per_match
        );

        let events = self.engine.subscribe().await;
        let crypto: Arc<dyn SessionCrypto> = self.crypto.clone();
        let worker = ConnectionWorker::new(
            player_id,
            addr,
            crypto,
            self.engine.clone(),
            events,
            self.lost_tx.clone(),
            self.connections.enter(),
        );
        tokio::spawn(worker.run(stream));
        debug!("{} active connections", self.connections.active());

        if self.registered == self.config.players_per_match {
            info!("Lobby full, starting match");
            self.engine.start();
        }
    }

    fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Lost { addr, player_id } => {
                if !self.clients.remove_client(&player_id) {
                    debug!("Connection {} for player {} already released", addr, player_id);
                }
            }
        }
    }
}
