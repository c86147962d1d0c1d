//! The task that drives one room: a command inbox plus three fixed-rate
//! schedules (simulation, state broadcast, UI broadcast), all on one task
//! so the room itself needs no locking.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::entities::PlayerId;
use crate::error::CommandError;
use crate::protocol::{self, ClientMessage};
use crate::room::Room;
use crate::types::RuntimeEvent;

const ROOM_INBOX_CAPACITY: usize = 512;

/// A fixed-interval timer that never bunches up missed slots. After an
/// overrun it jumps to the next slot in the future, keeping its phase.
#[derive(Clone, Debug)]
pub struct FixedSchedule {
    interval: Duration,
    next_fire: Instant,
}

impl FixedSchedule {
    pub fn new(interval: Duration, start: Instant) -> Self {
        let interval = interval.max(Duration::from_millis(1));
        Self {
            interval,
            next_fire: start + interval,
        }
    }

    pub fn next_fire(&self) -> Instant {
        self.next_fire
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Call after the slot at `next_fire` ran; returns how many slots were
    /// skipped because `now` was already past them.
    pub fn advance(&mut self, now: Instant) -> u32 {
        self.next_fire += self.interval;
        if self.next_fire > now {
            return 0;
        }
        let behind = now.duration_since(self.next_fire);
        let slots = u32::try_from(behind.as_nanos() / self.interval.as_nanos())
            .unwrap_or(u32::MAX)
            .saturating_add(1);
        self.next_fire += self.interval * slots;
        slots
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum OutboundMessage {
    Text(String),
    Close { code: u16, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueuePolicy {
    DropOnFull,
    DisconnectOnFull,
}

#[derive(Debug)]
pub enum RoomCommand {
    Join {
        name: String,
        outbound: mpsc::Sender<OutboundMessage>,
        reply: oneshot::Sender<Result<PlayerId, CommandError>>,
    },
    Leave {
        player: PlayerId,
    },
    Client {
        player: PlayerId,
        message: ClientMessage,
    },
}

/// Cheap, cloneable address of a running room.
#[derive(Clone, Debug)]
pub struct RoomHandle {
    id: String,
    tx: mpsc::Sender<RoomCommand>,
    destroyed: Arc<AtomicBool>,
    players: Arc<AtomicUsize>,
}

impl RoomHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst) || self.tx.is_closed()
    }

    pub fn player_count(&self) -> usize {
        self.players.load(Ordering::SeqCst)
    }

    /// Stops the room at its next wake-up.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }

    pub async fn join(
        &self,
        name: String,
        outbound: mpsc::Sender<OutboundMessage>,
    ) -> Result<PlayerId, CommandError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(RoomCommand::Join {
                name,
                outbound,
                reply,
            })
            .await
            .map_err(|_| CommandError::RoomClosed)?;
        response.await.map_err(|_| CommandError::RoomClosed)?
    }

    pub async fn leave(&self, player: PlayerId) {
        // A closed room has already forgotten everyone.
        let _ = self.tx.send(RoomCommand::Leave { player }).await;
    }

    /// Queues a client message without waiting; a full inbox drops it.
    pub fn send(&self, player: PlayerId, message: ClientMessage) -> Result<(), CommandError> {
        self.tx
            .try_send(RoomCommand::Client { player, message })
            .map_err(|err| match err {
                TrySendError::Full(_) => CommandError::NotAllowed("room is busy"),
                TrySendError::Closed(_) => CommandError::RoomClosed,
            })
    }
}

/// Moves `room` onto its own task and returns its handle.
pub fn spawn_room(room: Room) -> RoomHandle {
    let (tx, inbox) = mpsc::channel(ROOM_INBOX_CAPACITY);
    let handle = RoomHandle {
        id: room.id.clone(),
        tx,
        destroyed: Arc::new(AtomicBool::new(false)),
        players: Arc::new(AtomicUsize::new(room.player_count())),
    };
    let task = RoomTask {
        room,
        sockets: BTreeMap::new(),
        destroyed: handle.destroyed.clone(),
        players: handle.players.clone(),
    };
    tokio::spawn(task.run(inbox));
    handle
}

struct RoomTask {
    room: Room,
    sockets: BTreeMap<PlayerId, mpsc::Sender<OutboundMessage>>,
    destroyed: Arc<AtomicBool>,
    players: Arc<AtomicUsize>,
}

impl RoomTask {
    async fn run(mut self, mut inbox: mpsc::Receiver<RoomCommand>) {
        let config = self.room.config().clone();
        let start = Instant::now();
        let mut tick = FixedSchedule::new(Duration::from_millis(config.tick_ms()), start);
        let mut high = FixedSchedule::new(Duration::from_millis(config.high_broadcast_ms()), start);
        let mut low = FixedSchedule::new(Duration::from_millis(config.low_broadcast_ms()), start);
        info!(room = %self.room.id, tick_ms = config.tick_ms(), "room task started");

        loop {
            if self.destroyed.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                biased;
                _ = sleep_until(tick.next_fire()) => {
                    self.room.step(config.tick_ms());
                    self.flush_events();
                    let skipped = tick.advance(Instant::now());
                    if skipped > 0 {
                        warn!(room = %self.room.id, skipped, "tick overran its slot");
                    }
                }
                _ = sleep_until(high.next_fire()) => {
                    self.broadcast_state();
                    high.advance(Instant::now());
                }
                _ = sleep_until(low.next_fire()) => {
                    self.broadcast_ui();
                    low.advance(Instant::now());
                }
                command = inbox.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }

        self.destroyed.store(true, Ordering::SeqCst);
        for outbound in self.sockets.values() {
            let _ = outbound.try_send(OutboundMessage::Close {
                code: 1001,
                reason: "room closed".to_string(),
            });
        }
        info!(room = %self.room.id, ticks = self.room.tick(), "room destroyed");
    }

    fn handle(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Join {
                name,
                outbound,
                reply,
            } => {
                let result = self.room.add_player(&name);
                if let Ok(player) = result {
                    self.sockets.insert(player, outbound);
                    self.sync_player_count();
                    let welcome = protocol::envelope("welcome", &self.room.world_init(player));
                    self.send_to(player, welcome, QueuePolicy::DisconnectOnFull);
                }
                let _ = reply.send(result);
            }
            RoomCommand::Leave { player } => self.disconnect(player),
            RoomCommand::Client { player, message } => self.dispatch(player, message),
        }
    }

    fn dispatch(&mut self, player: PlayerId, message: ClientMessage) {
        let room = &mut self.room;
        let result = match message {
            ClientMessage::Hello { .. } => Err(CommandError::InvalidState("already joined")),
            ClientMessage::Input(input) => room.update_player_input(player, input),
            ClientMessage::LobbyStart => room.start_lobby_countdown(player),
            ClientMessage::LobbyCancel => room.cancel_lobby_countdown(player),
            ClientMessage::ExtractionStart => room.start_extraction(player),
            ClientMessage::ExtractionCancel => room.cancel_extraction(player),
            ClientMessage::OpenChest { chest_id } => room.open_chest(player, &chest_id),
            ClientMessage::Pickup { item_id } => room.pickup_item(player, &item_id),
            ClientMessage::Drop => room.drop_item(player).map(|_| ()),
            ClientMessage::ReviveStart { target_id } => room.start_revive(player, &target_id),
            ClientMessage::ReviveAccept => room.accept_revive(player),
            ClientMessage::DebugHorde { count } => room.debug_spawn_horde(player, count).map(|_| ()),
            ClientMessage::CastAbility { kind } => room.spawn_ability(player, kind).map(|_| ()),
            ClientMessage::SummonTroop => room.spawn_troop(player).map(|_| ()),
            ClientMessage::Ping { t } => {
                self.send_to(player, protocol::pong(t), QueuePolicy::DisconnectOnFull);
                return;
            }
        };
        if let Err(err) = result {
            self.send_to(
                player,
                protocol::error_message(&err.to_string()),
                QueuePolicy::DisconnectOnFull,
            );
        }
    }

    fn flush_events(&mut self) {
        let events = self.room.drain_events();
        if events.is_empty() {
            return;
        }
        let scene_changed = events
            .iter()
            .any(|e| matches!(e, RuntimeEvent::SceneChanged { .. }));
        self.broadcast(
            |_, _| Some(protocol::envelope("events", &events)),
            QueuePolicy::DropOnFull,
        );
        if scene_changed {
            self.broadcast(
                |room, player| Some(protocol::envelope("welcome", &room.world_init(player))),
                QueuePolicy::DisconnectOnFull,
            );
        }
    }

    fn broadcast_state(&mut self) {
        let delta = self.room.get_state_delta();
        if delta.full || !delta.players.is_empty() || !delta.removed.is_empty() {
            let payload = protocol::envelope("state", &delta);
            self.broadcast(|_, _| Some(payload.clone()), QueuePolicy::DropOnFull);
        }
        self.broadcast(
            |room, player| {
                room.entity_snapshot(player)
                    .map(|snapshot| protocol::envelope("entities", &snapshot))
            },
            QueuePolicy::DropOnFull,
        );
    }

    fn broadcast_ui(&mut self) {
        let payload = protocol::envelope("ui", &self.room.ui_snapshot());
        self.broadcast(|_, _| Some(payload.clone()), QueuePolicy::DropOnFull);
    }

    /// Sends a per-player payload to every socket; `None` skips that player.
    fn broadcast<F>(&mut self, payload: F, policy: QueuePolicy)
    where
        F: Fn(&Room, PlayerId) -> Option<String>,
    {
        let mut failed = Vec::new();
        for (player, outbound) in &self.sockets {
            let Some(text) = payload(&self.room, *player) else {
                continue;
            };
            if outbound.try_send(OutboundMessage::Text(text)).is_err() {
                failed.push(*player);
            }
        }
        if policy == QueuePolicy::DisconnectOnFull {
            for player in failed {
                warn!(room = %self.room.id, player = %player, "outbound queue full; disconnecting");
                self.disconnect(player);
            }
        }
    }

    fn send_to(&mut self, player: PlayerId, text: String, policy: QueuePolicy) {
        let send_failed = self
            .sockets
            .get(&player)
            .is_some_and(|outbound| outbound.try_send(OutboundMessage::Text(text)).is_err());
        if send_failed && policy == QueuePolicy::DisconnectOnFull {
            warn!(room = %self.room.id, player = %player, "outbound queue full; disconnecting");
            self.disconnect(player);
        }
    }

    fn disconnect(&mut self, player: PlayerId) {
        self.sockets.remove(&player);
        if self.room.remove_player(player) {
            debug!(room = %self.room.id, player = %player, remaining = self.room.player_count(), "socket detached");
        }
        self.sync_player_count();
        if self.room.is_empty() {
            self.destroyed.store(true, Ordering::SeqCst);
        }
    }

    fn sync_player_count(&self) {
        self.players.store(self.room.player_count(), Ordering::SeqCst);
    }
}
