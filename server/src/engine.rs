//! Match runtime: drives a [`GameState`] on its own task.
//!
//! The task is the only writer of the roster. Connection workers push
//! commands onto an unbounded queue which the task drains at the top of each
//! tick, so a command is always applied whole, either before or after a
//! tick, never in the middle of one. Results go out through an [`EventHub`].

use crate::game::{GameError, GameState};
use log::{debug, info, warn};
use shared::{Action, MessageType, PlayerId, Position, ProtocolMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("match engine has shut down")]
    Closed,
    #[error("match already started")]
    AlreadyStarted,
    #[error(transparent)]
    Game(#[from] GameError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    Forming,
    Starting,
    Running,
    Ended,
}

/// Requests queued for the engine task
#[derive(Debug)]
pub enum EngineCommand {
    Register {
        id: PlayerId,
        reply: oneshot::Sender<Result<Position, EngineError>>,
    },
    Action {
        id: PlayerId,
        action: Action,
    },
    Start,
    /// Wakes a forming match so it can observe the stop flag
    Stop,
}

/// Notifications published by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    /// Once at start and once per tick
    Snapshot(ProtocolMessage),
    PlayerDied(PlayerId),
    /// Terminal. Carries the winner, if any.
    MatchEnded(Option<PlayerId>),
}

impl GameEvent {
    /// Protocol message sent to clients for this event
    pub fn to_message(&self) -> ProtocolMessage {
        match self {
            GameEvent::Snapshot(message) => message.clone(),
            GameEvent::PlayerDied(id) => ProtocolMessage::died(*id),
            GameEvent::MatchEnded(winner) => ProtocolMessage::ended(*winner),
        }
    }
}

/// Fan-out of engine events to every registered subscriber.
///
/// Each subscriber owns an unbounded queue, so publishing never waits on a
/// slow connection and every subscriber sees every event exactly once.
/// Subscribers whose receiver is gone are pruned on the next publish.
#[derive(Clone, Default)]
pub struct EventHub {
    subscribers: Arc<RwLock<Vec<mpsc::UnboundedSender<GameEvent>>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<GameEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().await.push(tx);
        rx
    }

    /// Returns the number of subscribers the event reached.
    pub async fn publish(&self, event: GameEvent) -> usize {
        let mut subscribers = self.subscribers.write().await;
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        subscribers.len()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub tick_interval: Duration,
    /// Pause between the start snapshot and the first tick
    pub start_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(shared::TICK_INTERVAL_MS),
            start_delay: Duration::from_millis(shared::START_DELAY_MS),
        }
    }
}

/// Cloneable handle to a running match task
#[derive(Clone)]
pub struct MatchHandle {
    commands: mpsc::UnboundedSender<EngineCommand>,
    shutdown: Arc<AtomicBool>,
    /// Cuts short the start delay and the wait for the next tick
    stop_signal: Arc<Notify>,
    phase: watch::Receiver<MatchPhase>,
    events: EventHub,
}

impl MatchHandle {
    /// Moves `game` onto a new task in the forming phase.
    ///
    /// The join handle resolves to the winner once the match ends, or `None`
    /// if it was stopped.
    pub fn spawn(game: GameState, config: EngineConfig) -> (Self, JoinHandle<Option<PlayerId>>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (phase_tx, phase) = watch::channel(MatchPhase::Forming);
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop_signal = Arc::new(Notify::new());
        let events = EventHub::new();

        let task = tokio::spawn(run_match(
            game,
            command_rx,
            Arc::clone(&shutdown),
            Arc::clone(&stop_signal),
            events.clone(),
            phase_tx,
            config,
        ));

        let handle = Self {
            commands,
            shutdown,
            stop_signal,
            phase,
            events,
        };
        (handle, task)
    }

    /// Registers a player while the match is forming.
    pub async fn register_player(&self, id: PlayerId) -> Result<Position, EngineError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(EngineCommand::Register { id, reply })
            .map_err(|_| EngineError::Closed)?;
        response.await.map_err(|_| EngineError::Closed)?
    }

    /// Queues an action for the next tick. Never blocks.
    pub fn process_command(&self, id: PlayerId, action: Action) {
        if self
            .commands
            .send(EngineCommand::Action { id, action })
            .is_err()
        {
            debug!("Dropping {:?} from player {}, engine closed", action, id);
        }
    }

    /// Launches the match. Returns immediately.
    pub fn start(&self) {
        if self.commands.send(EngineCommand::Start).is_err() {
            warn!("Start requested after the engine shut down");
        }
    }

    /// Ends the match without a winner. Takes effect right away in every
    /// phase, including the start delay.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        // Stores a permit if the task is busy, so the next wait returns at once.
        self.stop_signal.notify_one();
        let _ = self.commands.send(EngineCommand::Stop);
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> MatchPhase {
        *self.phase.borrow()
    }

    /// Watch channel that follows the match phase.
    pub fn phase_watch(&self) -> watch::Receiver<MatchPhase> {
        self.phase.clone()
    }

    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<GameEvent> {
        self.events.subscribe().await
    }
}

async fn run_match(
    mut game: GameState,
    mut commands: mpsc::UnboundedReceiver<EngineCommand>,
    shutdown: Arc<AtomicBool>,
    stop_signal: Arc<Notify>,
    events: EventHub,
    phase: watch::Sender<MatchPhase>,
    config: EngineConfig,
) -> Option<PlayerId> {
    // Forming: registrations and early direction changes.
    loop {
        if shutdown.load(Ordering::Acquire) {
            info!("Match stopped while forming");
            let _ = phase.send(MatchPhase::Ended);
            return None;
        }
        match commands.recv().await {
            Some(EngineCommand::Register { id, reply }) => {
                let result = game.register_player(id).map_err(EngineError::from);
                let _ = reply.send(result);
            }
            Some(EngineCommand::Action { id, action }) => {
                game.process_command(id, action);
            }
            Some(EngineCommand::Start) => break,
            Some(EngineCommand::Stop) => continue,
            None => {
                let _ = phase.send(MatchPhase::Ended);
                return None;
            }
        }
    }

    let _ = phase.send(MatchPhase::Starting);
    info!(
        "Match starting with {} players, first tick in {:?}",
        game.player_count(),
        config.start_delay
    );
    events
        .publish(GameEvent::Snapshot(game.snapshot(MessageType::Start)))
        .await;
    tokio::select! {
        _ = sleep(config.start_delay) => {}
        _ = stop_signal.notified() => {}
    }
    if shutdown.load(Ordering::Acquire) {
        info!("Match stopped before the first tick");
        let _ = phase.send(MatchPhase::Ended);
        return None;
    }

    let _ = phase.send(MatchPhase::Running);
    let mut ticker = interval(config.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // The first tick fires immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop_signal.notified() => {}
        }

        if shutdown.load(Ordering::Acquire) {
            info!("Match stopped on tick {}", game.tick_count());
            let _ = phase.send(MatchPhase::Ended);
            return None;
        }

        while let Ok(command) = commands.try_recv() {
            match command {
                EngineCommand::Action { id, action } => {
                    game.process_command(id, action);
                }
                EngineCommand::Register { id, reply } => {
                    warn!("Player {} tried to join a running match", id);
                    let _ = reply.send(Err(EngineError::AlreadyStarted));
                }
                EngineCommand::Start | EngineCommand::Stop => {}
            }
        }

        let outcome = game.tick();

        for id in &outcome.deaths {
            events.publish(GameEvent::PlayerDied(*id)).await;
        }
        events
            .publish(GameEvent::Snapshot(game.snapshot(MessageType::Update)))
            .await;

        if game.tick_count() % 300 == 0 {
            debug!(
                "Tick {}: {} of {} players alive, trail length {}",
                game.tick_count(),
                game.living_count(),
                game.player_count(),
                game.trail_length()
            );
        }

        if outcome.ended {
            let winner = game.winner();
            info!("Match ended on tick {}, winner {:?}", game.tick_count(), winner);
            events.publish(GameEvent::MatchEnded(winner)).await;
            let _ = phase.send(MatchPhase::Ended);
            return winner;
        }
    }
}
