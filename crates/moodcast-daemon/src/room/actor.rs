use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use moodcast_core::clock::Clock;
use moodcast_core::simulation::{SimulationEngine, overlay};
use moodcast_core::validation::{normalize_country, validate_room_identifier};
use moodcast_core::{Mood, PresenceSnapshot};

use super::events::{EventLog, RoomEventKind};
use super::session::{Attach, Detach, SessionArena, SocketId};
use super::{Connection, RoomCommand, RoomConfig, RoomError};
use crate::protocol::{ClientMessage, Frame, ProtocolError, ServerMessage, coerce_mood};

/// Upper bound on commands folded into a single pending broadcast.
const MAX_COALESCED_COMMANDS: usize = 64;

/// Counters exposed on the admin surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomStats {
    pub sessions: usize,
    pub sockets: usize,
    pub simulated: u64,
    pub total: u64,
    pub broadcasts: u64,
    pub events_recorded: u64,
    pub uptime_secs: i64,
    pub timer_active: bool,
}

pub struct RoomActor {
    config: RoomConfig,
    arena: SessionArena,
    /// Per-socket outbound queues. Only ever written with `try_send`.
    outbound: HashMap<SocketId, mpsc::Sender<Frame>>,
    events: EventLog,
    simulation: SimulationEngine,
    clock: Arc<dyn Clock>,
    commands: mpsc::Receiver<RoomCommand>,
    persist_tx: Option<mpsc::Sender<PresenceSnapshot>>,
    cancel: CancellationToken,
    next_socket: SocketId,
    /// Set by anything that changes what clients see; cleared by a flush.
    pending_broadcast: bool,
    /// Present only while at least one session exists.
    ticker: Option<Interval>,
    last_persist: Option<DateTime<Utc>>,
    broadcasts: u64,
    started_at: DateTime<Utc>,
}

impl RoomActor {
    pub(crate) fn new(
        config: RoomConfig,
        simulation: SimulationEngine,
        clock: Arc<dyn Clock>,
        commands: mpsc::Receiver<RoomCommand>,
        persist_tx: Option<mpsc::Sender<PresenceSnapshot>>,
        cancel: CancellationToken,
    ) -> Self {
        let started_at = clock.now();
        Self {
            events: EventLog::new(config.event_log_capacity),
            config,
            arena: SessionArena::new(),
            outbound: HashMap::new(),
            simulation,
            clock,
            commands,
            persist_tx,
            cancel,
            next_socket: 1,
            pending_broadcast: false,
            ticker: None,
            last_persist: None,
            broadcasts: 0,
            started_at,
        }
    }

    /// Runs until cancelled or every handle is dropped.
    pub async fn run(mut self) {
        info!(
            broadcast_interval_ms = self.config.broadcast_interval.as_millis() as u64,
            simulation = self.simulation.config().enabled,
            "room: actor started"
        );
        // Commands handled since the last flush or drain.
        let mut coalesced = 0usize;
        loop {
            let mut ticked = false;
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(command) => {
                            self.handle(command);
                            coalesced += 1;
                        }
                        None => {
                            info!("room: all handles dropped, shutting down");
                            break;
                        }
                    }
                }
                _ = next_tick(&mut self.ticker) => {
                    self.pending_broadcast = true;
                    ticked = true;
                }
                _ = self.cancel.cancelled() => {
                    info!("room: cancellation requested, shutting down");
                    break;
                }
            }

            // Coalesce whatever is already queued into one broadcast, but a
            // queue that never drains must not hold back ticks or changes.
            let drained = self.commands.is_empty();
            if self.pending_broadcast
                && (drained || ticked || coalesced >= MAX_COALESCED_COMMANDS)
            {
                self.broadcast();
                coalesced = 0;
            } else if drained {
                coalesced = 0;
            }
            self.sync_ticker();
        }
        info!(
            sessions = self.arena.len(),
            broadcasts = self.broadcasts,
            "room: actor stopped"
        );
    }

    fn handle(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Open {
                identifier,
                mood,
                country,
                reply,
            } => {
                let result = self.open(identifier.as_deref(), mood.as_deref(), country.as_deref());
                if let Err(Ok(connection)) = reply.send(result) {
                    debug!(socket = connection.socket, "room: opener went away, detaching");
                    self.close(connection.socket);
                }
            }
            RoomCommand::Message { socket, payload } => self.on_message(socket, &payload),
            RoomCommand::Close { socket } => self.close(socket),
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            RoomCommand::Sessions { reply } => {
                let _ = reply.send(self.arena.summaries(self.clock.now()));
            }
            RoomCommand::Events { reply } => {
                let _ = reply.send(self.events.recent());
            }
            RoomCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn open(
        &mut self,
        identifier: Option<&str>,
        mood: Option<&str>,
        country: Option<&str>,
    ) -> Result<Connection, RoomError> {
        let session_id = validate_room_identifier(identifier)?.to_string();
        // No requested mood on an existing session keeps the one it has.
        let mood = match (mood, self.arena.get(&session_id)) {
            (None, Some(existing)) => existing.mood,
            (requested, _) => Mood::coerce(requested),
        };
        let country = normalize_country(country);
        let now = self.clock.now();

        let socket = self.next_socket;
        self.next_socket += 1;
        let (tx, rx) = mpsc::channel(self.config.outbound_capacity.max(1));
        self.outbound.insert(socket, tx);

        match self.arena.attach(&session_id, socket, mood, country, now) {
            Attach::Created => {
                info!(session_id = %session_id, socket, mood = %mood, "room: session joined");
                self.events.push(RoomEventKind::Join, &session_id, mood, now);
                self.pending_broadcast = true;
            }
            Attach::Joined { mood_changed } => {
                debug!(session_id = %session_id, socket, "room: socket attached to session");
                if mood_changed {
                    self.events.push(RoomEventKind::Mood, &session_id, mood, now);
                    self.pending_broadcast = true;
                }
            }
        }

        let snapshot = self.snapshot();
        self.send_to(socket, &ServerMessage::Presence(snapshot));

        Ok(Connection {
            socket,
            session_id,
            outbound: rx,
        })
    }

    fn on_message(&mut self, socket: SocketId, payload: &str) {
        let result = ClientMessage::parse(payload).and_then(|message| match message {
            ClientMessage::Ping => {
                self.send_to(socket, &ServerMessage::Pong);
                Ok(())
            }
            ClientMessage::Mood { session_id, mood } => {
                self.set_mood(socket, session_id.as_deref(), coerce_mood(mood.as_ref()))
            }
        });
        if let Err(e) = result {
            warn!(socket, error = %e, "room: dropping client message");
        }
    }

    fn set_mood(
        &mut self,
        socket: SocketId,
        claimed: Option<&str>,
        mood: Mood,
    ) -> Result<(), ProtocolError> {
        let claimed = claimed.map(str::trim).filter(|c| !c.is_empty());
        if let Some(claimed) = claimed {
            let owned = self
                .arena
                .owner(socket)
                .is_some_and(|session| session.id == claimed);
            if !owned {
                return Err(ProtocolError::SessionMismatch {
                    claimed: claimed.to_string(),
                });
            }
        }

        let now = self.clock.now();
        if let Some((session_id, changed)) = self.arena.set_mood(socket, mood, now) {
            if changed {
                debug!(session_id = %session_id, mood = %mood, "room: mood changed");
                self.events.push(RoomEventKind::Mood, &session_id, mood, now);
                self.pending_broadcast = true;
            }
        }
        Ok(())
    }

    fn close(&mut self, socket: SocketId) {
        self.outbound.remove(&socket);
        match self.arena.detach(socket) {
            Detach::Removed(session) => {
                info!(session_id = %session.id, socket, "room: session left");
                self.events
                    .push(RoomEventKind::Leave, &session.id, session.mood, self.clock.now());
            }
            Detach::Remaining {
                session_id,
                sockets,
            } => {
                debug!(session_id = %session_id, socket, sockets, "room: socket detached");
            }
            Detach::Unknown => {
                debug!(socket, "room: close for unknown socket");
            }
        }
        self.pending_broadcast = true;
    }

    /// Merged real + simulated view.
    fn snapshot(&mut self) -> PresenceSnapshot {
        let now = self.clock.now();
        let real = PresenceSnapshot::from_users(self.arena.users(), now.timestamp_millis());
        overlay(real, &self.simulation.roster())
    }

    fn send_to(&self, socket: SocketId, message: &ServerMessage) {
        let Some(tx) = self.outbound.get(&socket) else {
            return;
        };
        match message.to_frame() {
            Ok(frame) => {
                if tx.try_send(frame).is_err() {
                    debug!(socket, "room: outbound queue full or closed, frame dropped");
                }
            }
            Err(e) => warn!(error = %e, "room: failed to encode frame"),
        }
    }

    fn broadcast(&mut self) {
        self.pending_broadcast = false;
        let snapshot = self.snapshot();
        let count = snapshot.count;
        let message = ServerMessage::Presence(snapshot);
        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "room: failed to encode broadcast");
                return;
            }
        };

        let mut dropped = 0usize;
        for tx in self.outbound.values() {
            if tx.try_send(frame.clone()).is_err() {
                dropped += 1;
            }
        }
        self.broadcasts += 1;
        debug!(
            sockets = self.outbound.len(),
            dropped,
            count,
            "room: broadcast"
        );

        if let ServerMessage::Presence(snapshot) = message {
            self.maybe_persist(snapshot);
        }
    }

    fn maybe_persist(&mut self, snapshot: PresenceSnapshot) {
        let Some(tx) = &self.persist_tx else {
            return;
        };
        let now = self.clock.now();
        let interval = TimeDelta::from_std(self.config.snapshot_interval).unwrap_or(TimeDelta::MAX);
        let due = self.last_persist.is_none_or(|at| now - at >= interval);
        if !due {
            return;
        }
        match tx.try_send(snapshot) {
            Ok(()) => self.last_persist = Some(now),
            Err(_) => debug!("room: persister busy, skipping durability snapshot"),
        }
    }

    fn sync_ticker(&mut self) {
        match (self.arena.is_empty(), self.ticker.is_some()) {
            (false, false) => {
                let period = self.config.broadcast_interval.max(Duration::from_millis(1));
                let mut ticker = time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.ticker = Some(ticker);
                debug!("room: broadcast timer started");
            }
            (true, true) => {
                self.ticker = None;
                debug!("room: broadcast timer stopped");
            }
            _ => {}
        }
    }

    fn stats(&mut self) -> RoomStats {
        let snapshot = self.snapshot();
        let sessions = self.arena.len();
        RoomStats {
            sessions,
            sockets: self.arena.socket_count(),
            simulated: snapshot.count.saturating_sub(sessions as u64),
            total: snapshot.count,
            broadcasts: self.broadcasts,
            events_recorded: self.events.recorded(),
            uptime_secs: (self.clock.now() - self.started_at).num_seconds().max(0),
            timer_active: self.ticker.is_some(),
        }
    }
}

/// Resolves on the next tick, or never when the timer is stopped.
async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
