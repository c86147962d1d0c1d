use crate::constants::ATTRACTOR_PULL_RADIUS;
use crate::entities::{ChestState, EntityRegistries, ObjectiveMode, PlayerId, TroopId, VictimRef};
use crate::geometry::Vec2;
use crate::rng::Rng;
use crate::steering::SteeringTarget;
use crate::types::{AbilityKind, EnemyKind};

use super::AiTuning;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetRef {
    Player(PlayerId),
    Troop(TroopId),
    /// Attractors, objectives, chests and placed structures. These do not
    /// fight back, so they are approached directly rather than steered around.
    Structure(VictimRef),
}

impl TargetRef {
    pub fn steering(self) -> Option<SteeringTarget> {
        match self {
            TargetRef::Player(id) => Some(SteeringTarget::Player(id)),
            TargetRef::Troop(id) => Some(SteeringTarget::Troop(id)),
            TargetRef::Structure(_) => None,
        }
    }

    pub fn victim(self) -> VictimRef {
        match self {
            TargetRef::Player(id) => VictimRef::Player(id),
            TargetRef::Troop(id) => VictimRef::Troop(id),
            TargetRef::Structure(v) => v,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Target {
    pub reference: TargetRef,
    pub pos: Vec2,
    pub radius: f32,
}

impl Target {
    pub fn distance_from(&self, pos: Vec2) -> f32 {
        self.pos.distance(pos)
    }
}

/// Re-rolls objective mode once its timer has elapsed; never earlier.
pub fn roll_objective_mode(mode: &mut ObjectiveMode, now_ms: u64, rng: &mut Rng, tuning: &AiTuning) {
    if now_ms < mode.next_roll_ms {
        return;
    }
    mode.active = rng.bool(tuning.objective_chance);
    mode.next_roll_ms = now_ms + tuning.objective_reroll_ms;
}

fn nearest<I>(pos: Vec2, candidates: I) -> Option<(f32, Target)>
where
    I: IntoIterator<Item = Target>,
{
    candidates
        .into_iter()
        .map(|t| (t.pos.distance(pos), t))
        .min_by(|a, b| a.0.total_cmp(&b.0))
}

/// Picks what an enemy at `pos` should go after this tick.
///
/// Attractors in range win outright, then structures while objective mode is
/// active, then the nearest targetable player. A troop only beats the player
/// when it is closer by more than the troop distance penalty. `None` means
/// the enemy should wander.
pub fn select_target(
    kind: EnemyKind,
    pos: Vec2,
    objective_active: bool,
    regs: &EntityRegistries,
    tuning: &AiTuning,
) -> Option<Target> {
    if kind.respects_structures() {
        let attractors = regs
            .abilities
            .values()
            .filter(|a| a.kind == AbilityKind::Attractor && a.is_alive())
            .map(|a| Target {
                reference: TargetRef::Structure(VictimRef::Ability(a.id)),
                pos: a.pos,
                radius: a.radius,
            });
        if let Some((d, t)) = nearest(pos, attractors) {
            if d <= ATTRACTOR_PULL_RADIUS {
                return Some(t);
            }
        }

        if objective_active {
            let objectives = regs
                .objectives
                .values()
                .filter(|o| o.is_vulnerable())
                .map(|o| Target {
                    reference: TargetRef::Structure(VictimRef::Objective(o.id)),
                    pos: o.pos,
                    radius: o.radius,
                });
            let structures = regs
                .abilities
                .values()
                .filter(|a| a.is_alive() && a.kind.is_destructible_structure())
                .map(|a| Target {
                    reference: TargetRef::Structure(VictimRef::Ability(a.id)),
                    pos: a.pos,
                    radius: a.radius,
                });
            let chests = regs
                .chests
                .values()
                .filter(|c| c.state == ChestState::Closed)
                .map(|c| Target {
                    reference: TargetRef::Structure(VictimRef::Chest(c.id)),
                    pos: c.pos,
                    radius: c.radius,
                });
            if let Some((_, t)) = nearest(pos, objectives.chain(structures).chain(chests)) {
                return Some(t);
            }
        }
    }

    let player = nearest(
        pos,
        regs.players.values().filter(|p| p.is_targetable()).map(|p| Target {
            reference: TargetRef::Player(p.id),
            pos: p.pos,
            radius: p.radius,
        }),
    );
    let troop = if kind.targets_troops() {
        nearest(
            pos,
            regs.troops.values().filter(|t| t.alive).map(|t| Target {
                reference: TargetRef::Troop(t.id),
                pos: t.pos,
                radius: t.radius,
            }),
        )
    } else {
        None
    };

    match (player, troop) {
        (Some((pd, p)), Some((td, t))) => {
            if td * tuning.troop_penalty < pd {
                Some(t)
            } else {
                Some(p)
            }
        }
        (Some((_, p)), None) => Some(p),
        (None, Some((_, t))) => Some(t),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Ability, AbilityId, Objective, ObjectiveId, Player, Troop};

    fn scene() -> EntityRegistries {
        let mut regs = EntityRegistries::new();
        let player = PlayerId(regs.alloc());
        regs.players
            .insert(player, Player::new(player, "p".into(), Vec2::new(200.0, 0.0)));
        let troop = TroopId(regs.alloc());
        regs.troops
            .insert(troop, Troop::new(troop, Some(player), Vec2::new(150.0, 0.0)));
        let objective = ObjectiveId(regs.alloc());
        regs.objectives.insert(
            objective,
            Objective {
                id: objective,
                name: "generator".into(),
                pos: Vec2::new(0.0, 300.0),
                radius: 30.0,
                health: 500.0,
                health_max: 500.0,
                vulnerable: None,
                destroyed: false,
            },
        );
        let attractor = AbilityId(regs.alloc());
        regs.abilities.insert(
            attractor,
            Ability {
                id: attractor,
                kind: AbilityKind::Attractor,
                owner: player,
                pos: Vec2::new(-300.0, 0.0),
                facing: 0.0,
                radius: 22.0,
                health: 150.0,
                health_max: 150.0,
                expires_at_ms: None,
                shape: None,
                cooldown: 0.0,
                arm_remaining: 0.0,
            },
        );
        regs
    }

    fn certain_objective() -> AiTuning {
        AiTuning {
            objective_chance: 1.0,
            ..AiTuning::default()
        }
    }

    #[test]
    fn attractor_beats_everything() {
        let regs = scene();
        let tuning = certain_objective();
        let picked = select_target(EnemyKind::Basic, Vec2::ZERO, true, &regs, &tuning);
        assert!(matches!(
            picked.map(|t| t.reference),
            Some(TargetRef::Structure(VictimRef::Ability(_)))
        ));
    }

    #[test]
    fn objective_mode_waits_for_its_timer() {
        let mut regs = scene();
        regs.abilities.clear();
        let tuning = certain_objective();
        let mut rng = Rng::new(3);
        let mut mode = ObjectiveMode {
            active: false,
            next_roll_ms: 5_000,
        };

        roll_objective_mode(&mut mode, 1_000, &mut rng, &tuning);
        assert!(!mode.active);
        let picked = select_target(EnemyKind::Basic, Vec2::ZERO, mode.active, &regs, &tuning);
        assert!(matches!(picked.map(|t| t.reference), Some(TargetRef::Player(_))));

        roll_objective_mode(&mut mode, 5_000, &mut rng, &tuning);
        assert!(mode.active);
        assert_eq!(mode.next_roll_ms, 10_000);
        let picked = select_target(EnemyKind::Basic, Vec2::ZERO, mode.active, &regs, &tuning);
        assert!(matches!(
            picked.map(|t| t.reference),
            Some(TargetRef::Structure(VictimRef::Objective(_)))
        ));
    }

    #[test]
    fn troop_needs_to_be_much_closer_than_player() {
        let mut regs = scene();
        regs.abilities.clear();
        let tuning = AiTuning::default();
        // Troop at 150, player at 200: 150 * 1.6 > 200, so the player wins.
        let picked = select_target(EnemyKind::Basic, Vec2::ZERO, false, &regs, &tuning);
        assert!(matches!(picked.map(|t| t.reference), Some(TargetRef::Player(_))));

        for troop in regs.troops.values_mut() {
            troop.pos = Vec2::new(50.0, 0.0);
        }
        let picked = select_target(EnemyKind::Basic, Vec2::ZERO, false, &regs, &tuning);
        assert!(matches!(picked.map(|t| t.reference), Some(TargetRef::Troop(_))));
    }

    #[test]
    fn untargetable_players_leave_nothing_to_chase() {
        let mut regs = scene();
        regs.abilities.clear();
        regs.troops.clear();
        for player in regs.players.values_mut() {
            player.in_dialogue = true;
        }
        assert!(select_target(EnemyKind::Basic, Vec2::ZERO, false, &regs, &AiTuning::default()).is_none());
    }

    #[test]
    fn lickers_ignore_attractors() {
        let regs = scene();
        let picked = select_target(EnemyKind::Licker, Vec2::new(-290.0, 0.0), true, &regs, &certain_objective());
        assert!(matches!(picked.map(|t| t.reference), Some(TargetRef::Player(_))));
    }
}
