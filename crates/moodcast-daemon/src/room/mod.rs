//! Session room: a single actor task owns every live session. Everything
//! else talks to it through a cloneable [`RoomHandle`].

mod actor;
pub mod events;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use moodcast_core::clock::Clock;
use moodcast_core::simulation::SimulationEngine;
use moodcast_core::{PresenceSnapshot, ValidationError};

use crate::protocol::Frame;

pub use actor::{RoomActor, RoomStats};
pub use events::{RoomEvent, RoomEventKind};
pub use session::{SessionSummary, SocketId};

#[derive(Debug, Error)]
pub enum RoomError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("room is shutting down")]
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Periodic broadcast cadence while at least one session is connected.
    pub broadcast_interval: Duration,
    /// Minimum spacing between durability snapshots.
    pub snapshot_interval: Duration,
    pub event_log_capacity: usize,
    /// Per-socket outbound queue depth. A full queue drops frames.
    pub outbound_capacity: usize,
    pub command_capacity: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            broadcast_interval: Duration::from_secs(5),
            snapshot_interval: Duration::from_secs(60),
            event_log_capacity: events::DEFAULT_EVENT_LOG_CAPACITY,
            outbound_capacity: 32,
            command_capacity: 256,
        }
    }
}

/// A socket's membership in the room. Frames for this socket arrive on
/// `outbound`; the socket must report its own close through
/// [`RoomHandle::close`].
#[derive(Debug)]
pub struct Connection {
    pub socket: SocketId,
    pub session_id: String,
    pub outbound: mpsc::Receiver<Frame>,
}

#[derive(Debug)]
pub(crate) enum RoomCommand {
    Open {
        identifier: Option<String>,
        mood: Option<String>,
        country: Option<String>,
        reply: oneshot::Sender<Result<Connection, RoomError>>,
    },
    Message {
        socket: SocketId,
        payload: String,
    },
    Close {
        socket: SocketId,
    },
    Snapshot {
        reply: oneshot::Sender<PresenceSnapshot>,
    },
    Sessions {
        reply: oneshot::Sender<Vec<SessionSummary>>,
    },
    Events {
        reply: oneshot::Sender<Vec<RoomEvent>>,
    },
    Stats {
        reply: oneshot::Sender<RoomStats>,
    },
}

#[derive(Debug, Clone)]
pub struct RoomHandle {
    tx: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub async fn open(
        &self,
        identifier: Option<&str>,
        mood: Option<&str>,
        country: Option<&str>,
    ) -> Result<Connection, RoomError> {
        self.request(|reply| RoomCommand::Open {
            identifier: identifier.map(str::to_string),
            mood: mood.map(str::to_string),
            country: country.map(str::to_string),
            reply,
        })
        .await?
    }

    /// Forward a raw text frame received on `socket`.
    pub async fn message(&self, socket: SocketId, payload: String) -> Result<(), RoomError> {
        self.send(RoomCommand::Message { socket, payload }).await
    }

    pub async fn close(&self, socket: SocketId) -> Result<(), RoomError> {
        self.send(RoomCommand::Close { socket }).await
    }

    /// Merged (real + simulated) snapshot as of now.
    pub async fn snapshot(&self) -> Result<PresenceSnapshot, RoomError> {
        self.request(|reply| RoomCommand::Snapshot { reply }).await
    }

    pub async fn sessions(&self) -> Result<Vec<SessionSummary>, RoomError> {
        self.request(|reply| RoomCommand::Sessions { reply }).await
    }

    pub async fn events(&self) -> Result<Vec<RoomEvent>, RoomError> {
        self.request(|reply| RoomCommand::Events { reply }).await
    }

    pub async fn stats(&self) -> Result<RoomStats, RoomError> {
        self.request(|reply| RoomCommand::Stats { reply }).await
    }

    async fn send(&self, command: RoomCommand) -> Result<(), RoomError> {
        self.tx.send(command).await.map_err(|_| RoomError::Unavailable)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RoomCommand,
    ) -> Result<T, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await.map_err(|_| RoomError::Unavailable)
    }
}

/// Spawn the room actor. Durability snapshots go to `persist_tx` when set.
pub fn spawn(
    config: RoomConfig,
    simulation: SimulationEngine,
    clock: Arc<dyn Clock>,
    persist_tx: Option<mpsc::Sender<PresenceSnapshot>>,
    cancel: CancellationToken,
) -> (RoomHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
    let actor = RoomActor::new(config, simulation, clock, rx, persist_tx, cancel);
    let task = tokio::spawn(actor.run());
    (RoomHandle { tx }, task)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
