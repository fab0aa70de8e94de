//! Per-connection worker: key exchange, framing, and relaying.
//!
//! Each accepted socket gets one [`ConnectionWorker`] on its own task. The
//! worker announces the server's public parameters, waits for the client's
//! key material, and from then on decodes every inbound frame into a command
//! for the engine while writing every engine event back to the peer.
//!
//! Outbound messages are plain JSON until the key exchange completes and
//! base64 of the sealed JSON afterwards. Inbound frames after the exchange
//! must always be sealed.

use crate::engine::{GameEvent, MatchHandle};
use log::{debug, info, warn};
use shared::{
    encode_frame, from_base64, to_base64, Action, FrameBuffer, FrameError, PlayerId,
    ProtocolMessage, SessionCrypto,
};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Upper bound on bytes pulled from the socket per read
pub const READ_BUDGET: usize = 1024;

/// Reads delimiter-terminated frames from a byte stream.
///
/// `next_frame` is cancel safe: bytes already read stay buffered if the
/// future is dropped, so it can sit in a `select!` next to other branches.
pub struct FrameReader<R> {
    reader: R,
    frames: FrameBuffer,
    chunk: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            frames: FrameBuffer::new(),
            chunk: vec![0u8; READ_BUDGET],
        }
    }

    /// Next complete frame, or `None` once the peer has closed.
    ///
    /// A trailing partial frame at end of stream is discarded. A frame over
    /// [`shared::MAX_FRAME_LEN`] fails with `InvalidData`.
    pub async fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(frame) = self
                .frames
                .next_frame()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
            {
                return Ok(Some(frame));
            }

            let n = self.reader.read(&mut self.chunk).await?;
            if n == 0 {
                if self.frames.buffered() > 0 {
                    debug!(
                        "Discarding {} bytes of unterminated frame",
                        self.frames.buffered()
                    );
                }
                return Ok(None);
            }
            self.frames.push(&self.chunk[..n]);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Public parameters sent, client key not yet received
    AwaitingKey,
    Established,
    Closed,
}

/// Where decoded client commands go
pub trait CommandSink: Send + Sync + 'static {
    fn process_command(&self, id: PlayerId, action: Action);
}

impl CommandSink for MatchHandle {
    fn process_command(&self, id: PlayerId, action: Action) {
        MatchHandle::process_command(self, id, action);
    }
}

/// Notifications from workers to the front door
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Lost { addr: SocketAddr, player_id: PlayerId },
}

/// Counts live connection workers
#[derive(Debug, Clone, Default)]
pub struct ConnectionCounter {
    active: Arc<AtomicUsize>,
}

impl ConnectionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Counts one more connection until the returned guard is dropped.
    pub fn enter(&self) -> ConnectionGuard {
        self.active.fetch_add(1, Ordering::AcqRel);
        ConnectionGuard {
            active: Arc::clone(&self.active),
        }
    }
}

pub struct ConnectionGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct ConnectionWorker<C> {
    player_id: PlayerId,
    peer: SocketAddr,
    state: HandshakeState,
    crypto: Arc<dyn SessionCrypto>,
    commands: C,
    events: mpsc::UnboundedReceiver<GameEvent>,
    lost: mpsc::UnboundedSender<ConnectionEvent>,
    _guard: ConnectionGuard,
}

impl<C: CommandSink> ConnectionWorker<C> {
    pub fn new(
        player_id: PlayerId,
        peer: SocketAddr,
        crypto: Arc<dyn SessionCrypto>,
        commands: C,
        events: mpsc::UnboundedReceiver<GameEvent>,
        lost: mpsc::UnboundedSender<ConnectionEvent>,
        guard: ConnectionGuard,
    ) -> Self {
        Self {
            player_id,
            peer,
            state: HandshakeState::AwaitingKey,
            crypto,
            commands,
            events,
            lost,
            _guard: guard,
        }
    }

    /// Serves the connection until the peer goes away or a write fails.
    pub async fn run<S>(mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut frames = FrameReader::new(reader);

        let greeting = self.crypto.public_parameters();
        if let Err(e) = write_frame(&mut writer, &greeting).await {
            warn!("Failed to greet {}: {}", self.peer, e);
            self.close();
            return;
        }
        debug!("Sent public parameters to player {}", self.player_id);

        let mut events_open = true;
        loop {
            tokio::select! {
                frame = frames.next_frame() => match frame {
                    Ok(Some(frame)) => self.handle_frame(&frame),
                    Ok(None) => {
                        info!("Player {} at {} closed the connection", self.player_id, self.peer);
                        break;
                    }
                    Err(e) => {
                        warn!("Read from {} failed: {}", self.peer, e);
                        break;
                    }
                },
                event = self.events.recv(), if events_open => match event {
                    Some(event) => {
                        let Some(payload) = self.render_event(&event) else {
                            continue;
                        };
                        if let Err(e) = write_frame(&mut writer, &payload).await {
                            warn!("Write to {} failed: {}", self.peer, e);
                            break;
                        }
                    }
                    None => {
                        debug!("Event stream for player {} closed", self.player_id);
                        events_open = false;
                    }
                },
            }
        }

        self.close();
    }

    fn handle_frame(&mut self, frame: &[u8]) {
        match self.state {
            HandshakeState::AwaitingKey => self.complete_handshake(frame),
            HandshakeState::Established => match self.decode_frame(frame) {
                Ok(message) => self.dispatch(message),
                Err(e) => warn!(
                    "Dropping malformed frame from player {}: {}",
                    self.player_id, e
                ),
            },
            HandshakeState::Closed => {}
        }
    }

    fn complete_handshake(&mut self, frame: &[u8]) {
        let material = match std::str::from_utf8(frame) {
            Ok(text) => text,
            Err(e) => {
                warn!("Key material from {} is not UTF-8: {}", self.peer, e);
                return;
            }
        };

        match self.crypto.register_client_key(self.player_id, material) {
            Ok(()) => {
                self.state = HandshakeState::Established;
                info!("Key exchange with player {} complete", self.player_id);
            }
            Err(e) => warn!("Rejected key material from {}: {}", self.peer, e),
        }
    }

    fn decode_frame(&self, frame: &[u8]) -> Result<ProtocolMessage, FrameError> {
        let sealed = from_base64(frame)?;
        let plaintext = self.crypto.decrypt_from(self.player_id, &sealed)?;
        let text = String::from_utf8(plaintext)?;
        ProtocolMessage::decode(&text)
    }

    fn dispatch(&self, message: ProtocolMessage) {
        match message.action {
            Some(action) => self.commands.process_command(self.player_id, action),
            None => debug!(
                "Ignoring {:?} message without action from player {}",
                message.kind, self.player_id
            ),
        }
    }

    /// Wire payload for an engine event: sealed and base64 encoded once the
    /// key exchange is done, plain JSON before.
    fn render_event(&self, event: &GameEvent) -> Option<String> {
        let json = match event.to_message().encode() {
            Ok(json) => json,
            Err(e) => {
                warn!("Could not encode {:?}: {}", event, e);
                return None;
            }
        };

        if self.state != HandshakeState::Established {
            return Some(json);
        }

        match self.crypto.encrypt_for(self.player_id, json.as_bytes()) {
            Ok(sealed) => Some(to_base64(&sealed)),
            Err(e) => {
                warn!("Could not seal message for player {}: {}", self.player_id, e);
                None
            }
        }
    }

    fn close(&mut self) {
        self.state = HandshakeState::Closed;
        self.crypto.forget(self.player_id);
        let _ = self.lost.send(ConnectionEvent::Lost {
            addr: self.peer,
            player_id: self.player_id,
        });
    }
}

async fn write_frame<W>(writer: &mut W, payload: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_frame(payload)).await?;
    writer.flush().await
}
