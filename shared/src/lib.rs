//! Wire-level data model shared by the arena server and its clients.
//!
//! Holds the game constants, the JSON protocol message, the line framing
//! buffer and the session cryptography used on both ends of a connection.

pub mod crypto;
pub mod framing;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crypto::{ClientCipher, ConnectionId, CryptoError, KeyRing, SessionCrypto};
pub use framing::{
    encode_frame, from_base64, to_base64, FrameBuffer, FrameTooLong, DELIMITER, MAX_FRAME_LEN,
};

pub const PLAYER_SIZE: i32 = 10;
pub const SEGMENT_SIZE: i32 = 5;
pub const MOVE_SPEED: i32 = 3;
pub const JUMP_LENGTH: u32 = 16;
pub const MAX_PLAYERS: usize = 4;
pub const DEFAULT_FIELD_SIZE: i32 = 500;
pub const INITIAL_TRAIL_LENGTH: u32 = 1;
pub const INITIAL_TAIL_COUNTDOWN: u32 = 20;
pub const TAIL_GROWTH_MIN: u32 = 5;
pub const TAIL_GROWTH_MAX: u32 = 25;
pub const START_DELAY_MS: u64 = 2000;
pub const TICK_INTERVAL_MS: u64 = 33;

pub type PlayerId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }

    /// Unit step on the field. Up decreases `y`.
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    MoveUp,
    MoveDown,
    MoveLeft,
    MoveRight,
    Jump,
}

impl Action {
    /// The heading requested by a move action, `None` for a jump.
    pub fn direction(self) -> Option<Direction> {
        match self {
            Action::MoveUp => Some(Direction::Up),
            Action::MoveDown => Some(Direction::Down),
            Action::MoveLeft => Some(Direction::Left),
            Action::MoveRight => Some(Direction::Right),
            Action::Jump => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Start,
    Update,
    End,
    Died,
    Action,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
    /// Published invulnerability flag, true while the owner is mid-jump.
    #[serde(default)]
    pub jumping: bool,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self {
            x,
            y,
            jumping: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerView {
    pub id: PlayerId,
    pub position: Position,
    pub direction: Direction,
    pub alive: bool,
}

/// One protocol message as carried inside a frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(default)]
    pub length: u32,
    #[serde(default)]
    pub players: Vec<PlayerView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<PlayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<PlayerId>,
}

impl ProtocolMessage {
    pub fn snapshot(kind: MessageType, length: u32, players: Vec<PlayerView>) -> Self {
        Self {
            kind,
            action: None,
            length,
            players,
            winner: None,
            player: None,
        }
    }

    pub fn command(action: Action) -> Self {
        Self {
            kind: MessageType::Action,
            action: Some(action),
            length: 0,
            players: Vec::new(),
            winner: None,
            player: None,
        }
    }

    pub fn died(player: PlayerId) -> Self {
        Self {
            player: Some(player),
            ..Self::snapshot(MessageType::Died, 0, Vec::new())
        }
    }

    pub fn ended(winner: Option<PlayerId>) -> Self {
        Self {
            winner,
            ..Self::snapshot(MessageType::End, 0, Vec::new())
        }
    }

    pub fn encode(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Per-frame faults. None of these are fatal to a connection.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("decryption failed: {0}")]
    Crypto(#[from] CryptoError),
    #[error("frame is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("malformed protocol message: {0}")]
    Json(#[from] serde_json::Error),
}
