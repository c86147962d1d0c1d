//! Player-issued commands. Each one checks its preconditions against server
//! state and either mutates the room or returns the reason it refused.

use super::*;

use crate::entities::{ChestId, ChestState, GroundItem, ItemId, LootDrop, PlayerInput, ReviveChannel};

impl Room {
    /// Buffers the latest input; it is consumed at the start of the next tick.
    pub fn update_player_input(&mut self, player: PlayerId, mut input: PlayerInput) -> Result<(), CommandError> {
        let now_ms = self.now_ms;
        let slot = self
            .regs
            .players
            .get_mut(&player)
            .ok_or(CommandError::UnknownPlayer)?;
        if input.seq < slot.input.seq {
            debug!(room = %self.id, player = %player, seq = input.seq, last = slot.input.seq, "stale input dropped");
            return Ok(());
        }
        if !input.aim.is_finite() {
            warn!(room = %self.id, player = %player, "non-finite aim ignored");
            input.aim = slot.input.aim;
        }
        if !input.evil_progress.is_finite() {
            warn!(room = %self.id, player = %player, "non-finite evil progress ignored");
            input.evil_progress = 0.0;
        }
        input.evil_progress = input.evil_progress.clamp(0.0, 1.0);
        // A dash press survives until a tick consumes it.
        input.dash |= slot.input.dash;
        slot.input = input;
        slot.input_received_ms = now_ms;
        Ok(())
    }

    pub fn start_lobby_countdown(&mut self, player: PlayerId) -> Result<(), CommandError> {
        let result = self.try_start_lobby_countdown(player);
        self.log_rejection(player, "lobby_start", result)
    }

    fn try_start_lobby_countdown(&mut self, player: PlayerId) -> Result<(), CommandError> {
        self.require_player(player)?;
        if self.scene != Scene::Lobby {
            return Err(CommandError::InvalidState("mission already running"));
        }
        if self.mission.lobby_countdown_ms.is_some() {
            return Err(CommandError::InvalidState("countdown already running"));
        }
        self.mission.lobby_countdown_ms = Some(LOBBY_COUNTDOWN_MS);
        info!(room = %self.id, player = %player, "lobby countdown started");
        Ok(())
    }

    pub fn cancel_lobby_countdown(&mut self, player: PlayerId) -> Result<(), CommandError> {
        let result = self.require_player(player).map(|_| ()).and_then(|()| {
            self.mission
                .lobby_countdown_ms
                .take()
                .map(|_| ())
                .ok_or(CommandError::InvalidState("no countdown running"))
        });
        self.log_rejection(player, "lobby_cancel", result)
    }

    pub fn start_extraction(&mut self, player: PlayerId) -> Result<(), CommandError> {
        let result = self.try_start_extraction(player);
        self.log_rejection(player, "extraction_start", result)
    }

    fn try_start_extraction(&mut self, player: PlayerId) -> Result<(), CommandError> {
        let requester = self.require_player(player)?;
        if requester.downed {
            return Err(CommandError::InvalidState("downed"));
        }
        let pos = requester.pos;
        if !self.extraction_unlocked() {
            return Err(CommandError::InvalidState("extraction is locked"));
        }
        if !self.in_extraction_zone(pos) {
            return Err(CommandError::OutOfRange);
        }
        if self.mission.extraction_countdown_ms.is_some() {
            return Err(CommandError::InvalidState("extraction already running"));
        }
        self.mission.extraction_countdown_ms = Some(EXTRACTION_COUNTDOWN_MS);
        info!(room = %self.id, player = %player, "extraction started");
        self.events.push(RuntimeEvent::Toast {
            message: "extraction started".to_string(),
        });
        Ok(())
    }

    pub fn cancel_extraction(&mut self, player: PlayerId) -> Result<(), CommandError> {
        let result = self.require_player(player).map(|_| ()).and_then(|()| {
            self.mission
                .extraction_countdown_ms
                .take()
                .map(|_| ())
                .ok_or(CommandError::InvalidState("no extraction running"))
        });
        self.log_rejection(player, "extraction_cancel", result)
    }

    /// Starts opening a closed chest the player is standing next to.
    pub fn open_chest(&mut self, player: PlayerId, chest_id: &str) -> Result<(), CommandError> {
        let result = self.try_open_chest(player, chest_id);
        self.log_rejection(player, "open_chest", result)
    }

    fn try_open_chest(&mut self, player: PlayerId, chest_id: &str) -> Result<(), CommandError> {
        let opener = self.require_player(player)?;
        if opener.downed {
            return Err(CommandError::InvalidState("downed"));
        }
        let (pos, radius) = (opener.pos, opener.radius);
        let id = ChestId::parse_wire(chest_id).ok_or_else(|| CommandError::unknown("chest", chest_id))?;
        let chest = self
            .regs
            .chests
            .get_mut(&id)
            .ok_or_else(|| CommandError::unknown("chest", chest_id))?;
        if chest.state != ChestState::Closed {
            return Err(CommandError::InvalidState("chest is not closed"));
        }
        if chest.pos.distance(pos) > INTERACT_RANGE + chest.radius + radius {
            return Err(CommandError::OutOfRange);
        }
        chest.state = ChestState::Opening {
            by: player,
            remaining_ms: CHEST_OPEN_MS,
        };
        Ok(())
    }

    pub fn pickup_item(&mut self, player: PlayerId, item_id: &str) -> Result<(), CommandError> {
        let result = self.try_pickup_item(player, item_id);
        self.log_rejection(player, "pickup", result)
    }

    fn try_pickup_item(&mut self, player: PlayerId, item_id: &str) -> Result<(), CommandError> {
        let id = ItemId::parse_wire(item_id).ok_or_else(|| CommandError::unknown("item", item_id))?;
        let item = self
            .regs
            .items
            .get(&id)
            .ok_or_else(|| CommandError::unknown("item", item_id))?;
        let item_pos = item.pos;
        let carrying = matches!(item.drop, LootDrop::Carried(_));
        let picker = self.require_player(player)?;
        if picker.downed {
            return Err(CommandError::InvalidState("downed"));
        }
        if picker.pos.distance(item_pos) > INTERACT_RANGE + picker.radius {
            return Err(CommandError::OutOfRange);
        }
        if carrying && picker.carried_item.is_some() {
            return Err(CommandError::InvalidState("already carrying an item"));
        }
        let Some(item) = self.regs.items.remove(&id) else {
            return Err(CommandError::unknown("item", item_id));
        };
        let Some(picker) = self.regs.players.get_mut(&player) else {
            return Err(CommandError::UnknownPlayer);
        };
        match item.drop {
            LootDrop::Coins(amount) => picker.coins = picker.coins.saturating_add(amount),
            LootDrop::Stat(stat) => {
                picker.inventory.push(stat);
                picker.recompute_stats();
            }
            LootDrop::Carried(name) => picker.carried_item = Some(name),
        }
        self.events.push(RuntimeEvent::ItemPicked {
            item_id: id.to_string(),
            by: player.to_string(),
        });
        Ok(())
    }

    /// Puts the carried item back on the ground at the player's feet.
    pub fn drop_item(&mut self, player: PlayerId) -> Result<ItemId, CommandError> {
        let result = self.try_drop_item(player);
        self.log_rejection(player, "drop", result)
    }

    fn try_drop_item(&mut self, player: PlayerId) -> Result<ItemId, CommandError> {
        let dropper = self
            .regs
            .players
            .get_mut(&player)
            .ok_or(CommandError::UnknownPlayer)?;
        let name = dropper
            .carried_item
            .take()
            .ok_or(CommandError::InvalidState("not carrying anything"))?;
        let pos = dropper.pos;
        let id = ItemId(self.regs.alloc());
        self.regs.items.insert(
            id,
            GroundItem {
                id,
                pos,
                drop: LootDrop::Carried(name),
                dropped_at_ms: self.now_ms,
            },
        );
        Ok(id)
    }

    /// Offers a revive to a downed teammate; the channel runs once they accept.
    pub fn start_revive(&mut self, reviver: PlayerId, target_id: &str) -> Result<(), CommandError> {
        let result = self.try_start_revive(reviver, target_id);
        self.log_rejection(reviver, "revive_start", result)
    }

    fn try_start_revive(&mut self, reviver: PlayerId, target_id: &str) -> Result<(), CommandError> {
        let helper = self.require_player(reviver)?;
        if helper.downed {
            return Err(CommandError::InvalidState("downed"));
        }
        let (pos, radius) = (helper.pos, helper.radius);
        let target = PlayerId::parse_wire(target_id)
            .filter(|id| *id != reviver)
            .ok_or_else(|| CommandError::unknown("player", target_id))?;
        let downed = self
            .regs
            .players
            .get_mut(&target)
            .ok_or_else(|| CommandError::unknown("player", target_id))?;
        if !downed.downed {
            return Err(CommandError::InvalidState("player is not downed"));
        }
        if downed.revive.is_some() {
            return Err(CommandError::InvalidState("already being revived"));
        }
        if downed.pos.distance(pos) > REVIVE_RANGE + radius {
            return Err(CommandError::OutOfRange);
        }
        downed.revive = Some(ReviveChannel {
            reviver,
            accepted: false,
            elapsed_ms: 0,
        });
        Ok(())
    }

    pub fn accept_revive(&mut self, player: PlayerId) -> Result<(), CommandError> {
        let result = self
            .regs
            .players
            .get_mut(&player)
            .ok_or(CommandError::UnknownPlayer)
            .and_then(|p| {
                p.revive
                    .as_mut()
                    .map(|channel| channel.accepted = true)
                    .ok_or(CommandError::InvalidState("no revive offered"))
            });
        self.log_rejection(player, "revive_accept", result)
    }

    /// Ops hook: drops a horde on the map. Off unless the room enables it.
    pub fn debug_spawn_horde(&mut self, player: PlayerId, count: Option<usize>) -> Result<usize, CommandError> {
        let result = self.try_debug_spawn_horde(player, count);
        self.log_rejection(player, "debug_horde", result)
    }

    fn try_debug_spawn_horde(&mut self, player: PlayerId, count: Option<usize>) -> Result<usize, CommandError> {
        self.require_player(player)?;
        if !self.config.debug_commands {
            return Err(CommandError::NotAllowed("debug commands are disabled"));
        }
        if self.scene != Scene::Level {
            return Err(CommandError::InvalidState("no level running"));
        }
        let count = count.unwrap_or(self.mode.horde_size).clamp(1, MAX_DEBUG_HORDE);
        Ok(self.spawn_horde(count, None))
    }

    fn require_player(&self, player: PlayerId) -> Result<&Player, CommandError> {
        self.regs.players.get(&player).ok_or(CommandError::UnknownPlayer)
    }

    fn log_rejection<T>(
        &self,
        player: PlayerId,
        command: &'static str,
        result: Result<T, CommandError>,
    ) -> Result<T, CommandError> {
        result.inspect_err(|err| {
            debug!(room = %self.id, player = %player, command, %err, "command rejected");
        })
    }
}

const MAX_DEBUG_HORDE: usize = 50;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{InventoryItem, StatBonus};
    use crate::geometry::Vec2;
    use crate::room::tests::level_room;

    fn drop_at(room: &mut Room, pos: Vec2, drop: LootDrop) -> ItemId {
        let id = ItemId(room.regs.alloc());
        room.regs.items.insert(
            id,
            GroundItem {
                id,
                pos,
                drop,
                dropped_at_ms: 0,
            },
        );
        id
    }

    #[test]
    fn stale_and_malformed_input_is_contained() {
        let mut room = Room::with_defaults("input", 7, RoomConfig::default());
        let id = room.add_player("a").expect("space");
        let fresh = PlayerInput {
            seq: 5,
            aim: 1.0,
            dash: true,
            ..PlayerInput::default()
        };
        room.update_player_input(id, fresh).expect("known");
        let stale = PlayerInput {
            seq: 4,
            aim: 2.0,
            ..PlayerInput::default()
        };
        room.update_player_input(id, stale).expect("known");
        assert_eq!(room.regs.players[&id].input.aim, 1.0);

        let broken = PlayerInput {
            seq: 6,
            aim: f32::NAN,
            evil_progress: f32::INFINITY,
            ..PlayerInput::default()
        };
        room.update_player_input(id, broken).expect("known");
        let input = &room.regs.players[&id].input;
        assert_eq!(input.aim, 1.0);
        assert_eq!(input.evil_progress, 0.0);
        assert!(input.dash, "unconsumed dash press is kept");

        assert_eq!(
            room.update_player_input(PlayerId(404), PlayerInput::default()),
            Err(CommandError::UnknownPlayer)
        );
    }

    #[test]
    fn lobby_countdown_can_be_cancelled_once() {
        let mut room = Room::with_defaults("lobby", 8, RoomConfig::default());
        let id = room.add_player("a").expect("space");
        room.start_lobby_countdown(id).expect("lobby");
        assert!(room.start_lobby_countdown(id).is_err());
        room.cancel_lobby_countdown(id).expect("running");
        assert_eq!(
            room.cancel_lobby_countdown(id),
            Err(CommandError::InvalidState("no countdown running"))
        );
    }

    #[test]
    fn pickup_applies_each_kind_of_drop() {
        let (mut room, ids) = level_room(21, 1);
        let player = ids[0];
        let at = room.regs.players[&player].pos;
        let armor_before = room.regs.players[&player].stats.armor;

        let coins = drop_at(&mut room, at, LootDrop::Coins(7));
        let stat = drop_at(
            &mut room,
            at,
            LootDrop::Stat(InventoryItem {
                name: "plate".into(),
                bonus: StatBonus {
                    armor: 20.0,
                    ..StatBonus::default()
                },
            }),
        );
        let core = drop_at(&mut room, at, LootDrop::Carried("data core".into()));
        let spare = drop_at(&mut room, at, LootDrop::Carried("spare core".into()));

        room.pickup_item(player, &coins.to_string()).expect("coins");
        room.pickup_item(player, &stat.to_string()).expect("stat");
        room.pickup_item(player, &core.to_string()).expect("carried");
        assert_eq!(
            room.pickup_item(player, &spare.to_string()),
            Err(CommandError::InvalidState("already carrying an item"))
        );

        let p = &room.regs.players[&player];
        assert_eq!(p.coins, 7);
        assert!(p.stats.armor > armor_before);
        assert_eq!(p.carried_item.as_deref(), Some("data core"));
        assert!(room.regs.items.contains_key(&spare));

        let dropped = room.drop_item(player).expect("carrying");
        assert!(room.regs.items.contains_key(&dropped));
        assert!(room.regs.players[&player].carried_item.is_none());
        assert!(room.drop_item(player).is_err());
    }

    #[test]
    fn far_or_forged_targets_are_refused() {
        let (mut room, ids) = level_room(22, 2);
        let player = ids[0];
        let at = room.regs.players[&player].pos;
        let far = drop_at(&mut room, at + Vec2::new(900.0, 0.0), LootDrop::Coins(1));
        assert_eq!(room.pickup_item(player, &far.to_string()), Err(CommandError::OutOfRange));
        assert!(matches!(
            room.pickup_item(player, "item_99999"),
            Err(CommandError::UnknownEntity { kind: "item", .. })
        ));
        assert!(matches!(
            room.open_chest(player, "enemy_1"),
            Err(CommandError::UnknownEntity { kind: "chest", .. })
        ));
        assert_eq!(
            room.start_revive(player, &ids[1].to_string()),
            Err(CommandError::InvalidState("player is not downed"))
        );
        assert!(room.start_revive(player, &player.to_string()).is_err());
        assert_eq!(
            room.accept_revive(player),
            Err(CommandError::InvalidState("no revive offered"))
        );
    }

    #[test]
    fn debug_horde_needs_the_switch() {
        let (mut room, ids) = level_room(23, 1);
        assert_eq!(
            room.debug_spawn_horde(ids[0], Some(5)),
            Err(CommandError::NotAllowed("debug commands are disabled"))
        );
        room.config.debug_commands = true;
        let before = room.regs.enemies.len();
        assert_eq!(room.debug_spawn_horde(ids[0], Some(500)), Ok(MAX_DEBUG_HORDE));
        assert_eq!(room.regs.enemies.len(), before + MAX_DEBUG_HORDE);
    }
}
