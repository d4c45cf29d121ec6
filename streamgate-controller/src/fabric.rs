//! Fabric adapter: the control channel between switches and the director.
//!
//! A fabric shim connects once per switch over TCP and exchanges newline-delimited
//! JSON. Events flow in (`ControlEvent`), commands flow out (`Command`). Each
//! connection is served by one task, so a switch's events are handled strictly in
//! order while different switches proceed in parallel.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use streamgate_core::{Command, ControlChannel, ControlEvent, Director, SwitchId};

/// Errors that end a fabric session.
#[derive(Debug, Error)]
pub enum FabricError {
    /// The socket failed.
    #[error("fabric I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A second switch tried to announce itself on an already bound session.
    #[error("session already bound to switch {bound}, refusing {announced}")]
    AlreadyBound {
        /// Switch the session belongs to.
        bound: SwitchId,
        /// Switch that was announced.
        announced: SwitchId,
    },
}

/// Identity of one fabric session, unique for the lifetime of a [`FabricChannel`].
pub type SessionId = u64;

#[derive(Debug)]
struct Session {
    id: SessionId,
    commands: mpsc::UnboundedSender<Command>,
}

/// Outbound queues, one per attached switch.
///
/// `send` never blocks: commands go onto an unbounded queue drained by the
/// session's writer task. Commands for switches without a session are dropped.
#[derive(Debug, Default)]
pub struct FabricChannel {
    sessions: DashMap<SwitchId, Session>,
    next_session: AtomicU64,
}

impl FabricChannel {
    /// Create a channel with no sessions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the outbound queue of a switch, replacing any previous one.
    ///
    /// The returned id is what [`detach`](Self::detach) must be given to close it.
    pub fn attach(&self, switch: SwitchId) -> (SessionId, mpsc::UnboundedReceiver<Command>) {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(previous) = self.sessions.insert(switch, Session { id, commands: tx }) {
            warn!(
                %switch,
                previous = previous.id,
                session = id,
                "Switch reattached, previous session superseded"
            );
        }
        (id, rx)
    }

    /// Close the outbound queue of a switch if `session` still owns it.
    ///
    /// Returns false when a newer session has taken the switch over.
    pub fn detach(&self, switch: SwitchId, session: SessionId) -> bool {
        self.sessions
            .remove_if(&switch, |_, current| current.id == session)
            .is_some()
    }

    /// Number of attached switches.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}

impl ControlChannel for FabricChannel {
    fn send(&self, switch: SwitchId, command: Command) {
        match self.sessions.get(&switch) {
            Some(session) => {
                if session.commands.send(command).is_err() {
                    debug!(%switch, "Session closed, command dropped");
                }
            }
            None => debug!(%switch, "No session for switch, command dropped"),
        }
    }
}

/// Accept fabric connections until the listener fails.
pub async fn serve(
    listener: TcpListener,
    director: Arc<Director>,
    channel: Arc<FabricChannel>,
) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "Fabric adapter listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let director = director.clone();
        let channel = channel.clone();

        tokio::spawn(async move {
            if let Err(err) = run_session(stream, peer, director, channel).await {
                warn!(%peer, %err, "Fabric session ended with error");
            }
        });
    }
}

/// Serve one switch connection until it closes.
async fn run_session(
    stream: TcpStream,
    peer: SocketAddr,
    director: Arc<Director>,
    channel: Arc<FabricChannel>,
) -> Result<(), FabricError> {
    let (reader, writer) = stream.into_split();
    let mut writer = Some(writer);
    let mut lines = BufReader::new(reader).lines();
    let mut bound: Option<(SwitchId, SessionId)> = None;
    debug!(%peer, "Fabric session opened");

    let result = async {
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: ControlEvent = match serde_json::from_str(&line) {
                Ok(event) => event,
                Err(err) => {
                    warn!(%peer, %err, "Discarding undecodable fabric event");
                    continue;
                }
            };

            let switch = event.switch();
            match (bound, &event) {
                (Some((existing, _)), ControlEvent::SwitchConnected { .. }) if existing != switch => {
                    return Err(FabricError::AlreadyBound { bound: existing, announced: switch });
                }
                (Some((existing, _)), _) if existing != switch => {
                    warn!(%peer, bound = %existing, %switch, "Discarding event for another switch");
                    continue;
                }
                (Some(_), _) => {}
                (None, ControlEvent::SwitchConnected { .. }) => {
                    let (session, commands) = channel.attach(switch);
                    if let Some(writer) = writer.take() {
                        tokio::spawn(write_commands(writer, commands, peer));
                    }
                    bound = Some((switch, session));
                    info!(%peer, %switch, session, sessions = channel.len(), "Switch attached");
                }
                (None, _) => {
                    warn!(%peer, %switch, "Discarding event before switch_connected");
                    continue;
                }
            }

            director.handle_event(event);
        }
        Ok::<(), FabricError>(())
    }
    .await;

    if let Some((switch, session)) = bound {
        if channel.detach(switch, session) {
            director.handle_event(ControlEvent::SwitchDisconnected { switch });
        } else {
            debug!(%peer, %switch, session, "Superseded session closed, switch state kept");
        }
    }
    debug!(%peer, "Fabric session closed");
    result
}

/// Drain a switch's command queue onto its socket.
async fn write_commands(
    mut writer: OwnedWriteHalf,
    mut commands: mpsc::UnboundedReceiver<Command>,
    peer: SocketAddr,
) {
    while let Some(command) = commands.recv().await {
        let mut line = match serde_json::to_vec(&command) {
            Ok(line) => line,
            Err(err) => {
                warn!(%peer, %err, "Failed to encode command");
                continue;
            }
        };
        line.push(b'\n');

        if let Err(err) = writer.write_all(&line).await {
            warn!(%peer, %err, "Failed to write command, closing writer");
            break;
        }
    }
}
