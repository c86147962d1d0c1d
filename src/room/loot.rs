use super::*;

use crate::combat::Kill;
use crate::entities::{ChestState, DamageSource, Faction, GroundItem, ItemId, VictimRef};
use crate::geometry::Vec2;

/// Counts down chests being opened. The opening is abandoned when the
/// opener leaves, goes down or walks away.
pub(super) fn update_chests(ctx: &mut TickContext<'_>, dt_ms: u64) {
    let ids: Vec<_> = ctx.regs.chests.keys().copied().collect();
    for id in ids {
        let Some(chest) = ctx.regs.chests.get(&id) else {
            continue;
        };
        let ChestState::Opening { by, remaining_ms } = chest.state else {
            continue;
        };
        let pos = chest.pos;
        let reach = INTERACT_RANGE + chest.radius;
        let opener_ok = ctx
            .regs
            .players
            .get(&by)
            .is_some_and(|p| !p.downed && p.pos.distance(pos) <= reach + p.radius);
        let Some(chest) = ctx.regs.chests.get_mut(&id) else {
            continue;
        };
        if !opener_ok {
            chest.state = ChestState::Closed;
            continue;
        }
        if remaining_ms > dt_ms {
            chest.state = ChestState::Opening {
                by,
                remaining_ms: remaining_ms - dt_ms,
            };
            continue;
        }
        chest.state = ChestState::Opened;
        ctx.events.push(RuntimeEvent::ChestOpened {
            chest_id: id.to_string(),
        });
        ctx.kills.push(Kill {
            victim: VictimRef::Chest(id),
            enemy_kind: None,
            pos,
            by: DamageSource::Player(by),
        });
    }
}

impl Room {
    /// Turns this tick's deaths into ground items. Enemies only drop loot
    /// when a friendly source killed them; chests always do.
    pub(super) fn place_loot(&mut self, kills: Vec<Kill>) {
        for kill in kills {
            let drops = match (kill.victim, kill.enemy_kind) {
                (VictimRef::Enemy(_), Some(kind)) if kill.by.faction() == Faction::Friendly => {
                    self.loot.enemy_drops(kind, &mut self.rng)
                }
                (VictimRef::Chest(_), _) => self.loot.chest_drops(&mut self.rng),
                _ => continue,
            };
            for drop in drops {
                let offset = Vec2::from_angle(self.rng.angle()) * self.rng.range(0.0, LOOT_SCATTER);
                let pos = self.env.boundary.clamp_circle(kill.pos + offset, 8.0);
                let id = ItemId(self.regs.alloc());
                self.regs.items.insert(
                    id,
                    GroundItem {
                        id,
                        pos,
                        drop,
                        dropped_at_ms: self.now_ms,
                    },
                );
            }
        }
    }
}
