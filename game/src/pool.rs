//! 8-ball pool engine (spec.md §4.4.2). Physics runs client-side; this
//! engine only validates shot preconditions and evaluates the rules
//! once the client reports a `shot_result`.

use std::collections::{HashMap, HashSet};

use duelstake_core::prelude::{PlayerId, WinType};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::engine::{Conclusion, EngineError, EngineStatus, GameEngine};

/// Normalized table units; not physically calibrated, just internally
/// consistent for bounds/overlap checks.
const TABLE_WIDTH: f64 = 2.0;
const TABLE_HEIGHT: f64 = 1.0;
const BALL_RADIUS: f64 = 0.028;
const MIN_POWER: f64 = 40.0;
const MAX_POWER: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    Solids,
    Stripes,
}

fn group_of_ball(id: u8) -> Option<Group> {
    match id {
        1..=7 => Some(Group::Solids),
        9..=15 => Some(Group::Stripes),
        _ => None,
    }
}

fn opposite(group: Group) -> Group {
    match group {
        Group::Solids => Group::Stripes,
        Group::Stripes => Group::Solids,
    }
}

#[derive(Debug, Deserialize)]
struct TakeShotPayload {
    angle: f64,
    power: f64,
    #[allow(dead_code)]
    screw: f64,
    #[allow(dead_code)]
    english: f64,
}

#[derive(Debug, Deserialize)]
struct ShotResultPayload {
    ball_positions: Vec<(f64, f64)>,
    pocketed_balls: Vec<u8>,
    first_contact_ball_id: i64,
    cushion_after_contact: bool,
    break_cushion_count: u32,
}

#[derive(Debug, Deserialize)]
struct PlaceCueBallPayload {
    x: f64,
    y: f64,
}

pub struct PoolEngine {
    player1: PlayerId,
    player2: PlayerId,
    turn: PlayerId,
    status: EngineStatus,
    conclusion: Option<Conclusion>,
    groups: HashMap<PlayerId, Group>,
    positions: HashMap<u8, (f64, f64)>,
    pocketed: HashSet<u8>,
    shot_in_progress: bool,
    is_break: bool,
    ball_in_hand_for: Option<PlayerId>,
}

impl PoolEngine {
    pub fn new(player1: PlayerId, player2: PlayerId) -> Self {
        let mut positions = HashMap::new();
        positions.insert(0, (TABLE_WIDTH * 0.25, TABLE_HEIGHT * 0.5));
        for id in 1..=15u8 {
            let row = (id - 1) / 5;
            let col = (id - 1) % 5;
            positions.insert(
                id,
                (TABLE_WIDTH * 0.75 + row as f64 * BALL_RADIUS * 2.2, TABLE_HEIGHT * 0.2 + col as f64 * BALL_RADIUS * 2.2),
            );
        }

        Self {
            player1,
            player2,
            turn: player1,
            status: EngineStatus::InProgress,
            conclusion: None,
            groups: HashMap::new(),
            positions,
            pocketed: HashSet::new(),
            shot_in_progress: false,
            is_break: true,
            ball_in_hand_for: None,
        }
    }

    fn opponent_of(&self, player: PlayerId) -> PlayerId {
        if player == self.player1 { self.player2 } else { self.player1 }
    }

    fn finish(&mut self, winner: Option<PlayerId>, win_type: WinType) {
        self.status = EngineStatus::Completed;
        self.conclusion = Some(Conclusion { winner, win_type });
    }

    fn is_on_eight_ball(&self, player: PlayerId) -> bool {
        match self.groups.get(&player) {
            None => false,
            Some(group) => {
                let balls: Vec<u8> = match group {
                    Group::Solids => (1..=7).collect(),
                    Group::Stripes => (9..=15).collect(),
                };
                balls.iter().all(|b| self.pocketed.contains(b))
            }
        }
    }

    fn take_shot(&mut self, player: PlayerId, payload: &Value) -> Result<(), EngineError> {
        if self.status != EngineStatus::InProgress {
            return Err(EngineError::NotInProgress);
        }
        if self.turn != player {
            return Err(EngineError::NotYourTurn);
        }
        if self.ball_in_hand_for.is_some() {
            return Err(EngineError::IllegalMove("cue ball must be placed before shooting".into()));
        }
        if self.shot_in_progress {
            return Err(EngineError::ShotInProgress);
        }
        let parsed: TakeShotPayload =
            serde_json::from_value(payload.clone()).map_err(|e| EngineError::BadPayload(e.to_string()))?;
        if !(MIN_POWER..=MAX_POWER).contains(&parsed.power) {
            return Err(EngineError::IllegalMove(format!("power {} out of range", parsed.power)));
        }
        if !parsed.angle.is_finite() {
            return Err(EngineError::BadPayload("angle must be finite".into()));
        }
        self.shot_in_progress = true;
        Ok(())
    }

    fn shot_result(&mut self, player: PlayerId, payload: &Value) -> Result<(), EngineError> {
        if self.status != EngineStatus::InProgress {
            return Err(EngineError::NotInProgress);
        }
        if self.turn != player {
            return Err(EngineError::NotYourTurn);
        }
        if !self.shot_in_progress {
            return Err(EngineError::IllegalMove("no shot is in progress".into()));
        }
        let parsed: ShotResultPayload =
            serde_json::from_value(payload.clone()).map_err(|e| EngineError::BadPayload(e.to_string()))?;
        if parsed.ball_positions.len() != 16 {
            return Err(EngineError::BadPayload("ball_positions must have 16 entries".into()));
        }
        self.shot_in_progress = false;

        for (id, pos) in parsed.ball_positions.iter().enumerate() {
            if !parsed.pocketed_balls.contains(&(id as u8)) {
                self.positions.insert(id as u8, *pos);
            }
        }

        let scratch = parsed.pocketed_balls.contains(&0);
        let no_contact = parsed.first_contact_ball_id == -1;
        let on_eight = self.is_on_eight_ball(player);

        let wrong_first_contact = if no_contact {
            false
        } else if let Some(group) = self.groups.get(&player).copied() {
            if on_eight {
                parsed.first_contact_ball_id != 8
            } else {
                group_of_ball(parsed.first_contact_ball_id as u8) != Some(group)
            }
        } else {
            false
        };

        let no_cushion = !no_contact && !parsed.cushion_after_contact && parsed.pocketed_balls.is_empty();
        let break_foul = self.is_break && (parsed.break_cushion_count + parsed.pocketed_balls.len() as u32) < 2;

        let foul = scratch || no_contact || wrong_first_contact || no_cushion || break_foul;
        let pocketed_eight = parsed.pocketed_balls.contains(&8);
        self.is_break = false;

        for &id in &parsed.pocketed_balls {
            self.pocketed.insert(id);
        }

        debug!(?player, scratch, no_contact, wrong_first_contact, no_cushion, break_foul, pocketed_eight, "shot evaluated");

        if pocketed_eight {
            if !foul && on_eight {
                self.finish(Some(player), WinType::PoolWin);
            } else {
                self.finish(Some(self.opponent_of(player)), WinType::PoolWin);
            }
            return Ok(());
        }

        if on_eight && scratch {
            self.finish(Some(self.opponent_of(player)), WinType::PoolWin);
            return Ok(());
        }

        if foul {
            let opponent = self.opponent_of(player);
            self.turn = opponent;
            self.ball_in_hand_for = Some(opponent);
            return Ok(());
        }

        if !self.groups.contains_key(&player) && !self.groups.contains_key(&self.opponent_of(player)) {
            if let Some(&first) = parsed.pocketed_balls.iter().find(|&&b| b != 0 && b != 8) {
                if let Some(group) = group_of_ball(first) {
                    self.groups.insert(player, group);
                    self.groups.insert(self.opponent_of(player), opposite(group));
                }
            }
        }

        let own_group = self.groups.get(&player).copied();
        let potted_own = own_group
            .map(|g| parsed.pocketed_balls.iter().any(|&b| group_of_ball(b) == Some(g)))
            .unwrap_or(!parsed.pocketed_balls.is_empty());
        if !potted_own {
            self.turn = self.opponent_of(player);
        }
        Ok(())
    }

    fn place_cue_ball(&mut self, player: PlayerId, payload: &Value) -> Result<(), EngineError> {
        if self.ball_in_hand_for != Some(player) {
            return Err(EngineError::IllegalMove("no ball-in-hand for this player".into()));
        }
        let parsed: PlaceCueBallPayload =
            serde_json::from_value(payload.clone()).map_err(|e| EngineError::BadPayload(e.to_string()))?;
        if !self.validate_cue_placement(parsed.x, parsed.y) {
            return Err(EngineError::InvalidCuePlacement);
        }
        self.positions.insert(0, (parsed.x, parsed.y));
        self.ball_in_hand_for = None;
        Ok(())
    }

    fn validate_cue_placement(&self, x: f64, y: f64) -> bool {
        if x < 0.0 || x > TABLE_WIDTH || y < 0.0 || y > TABLE_HEIGHT {
            return false;
        }
        for (&id, &(bx, by)) in &self.positions {
            if id == 0 || self.pocketed.contains(&id) {
                continue;
            }
            let dx = x - bx;
            let dy = y - by;
            if (dx * dx + dy * dy).sqrt() < 2.0 * BALL_RADIUS {
                return false;
            }
        }
        true
    }
}

impl GameEngine for PoolEngine {
    fn status(&self) -> EngineStatus {
        self.status
    }

    fn conclusion(&self) -> Option<Conclusion> {
        self.conclusion
    }

    fn state_for(&self, player: PlayerId) -> Value {
        json!({
            "status": format!("{:?}", self.status),
            "turn": self.turn.0,
            "your_group": self.groups.get(&player).map(|g| format!("{g:?}")),
            "opponent_group": self.groups.get(&self.opponent_of(player)).map(|g| format!("{g:?}")),
            "positions": self.positions,
            "pocketed": self.pocketed.iter().collect::<Vec<_>>(),
            "shot_in_progress": self.shot_in_progress,
            "ball_in_hand_for": self.ball_in_hand_for.map(|p| p.0),
        })
    }

    fn full_state(&self) -> Value {
        self.state_for(self.player1)
    }

    fn apply_move(&mut self, player: PlayerId, move_type: &str, payload: &Value) -> Result<(), EngineError> {
        match move_type {
            "take_shot" => self.take_shot(player, payload),
            "shot_result" => self.shot_result(player, payload),
            "place_cue_ball" => self.place_cue_ball(player, payload),
            other => Err(EngineError::BadPayload(format!("unknown pool move {other}"))),
        }
    }

    fn forfeit_by_disconnect(&mut self, disconnected: PlayerId) {
        let winner = self.opponent_of(disconnected);
        self.finish(Some(winner), WinType::Forfeit);
    }

    fn concede(&mut self, conceding: PlayerId) {
        let winner = self.opponent_of(conceding);
        self.finish(Some(winner), WinType::Concede);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_positions() -> Vec<(f64, f64)> {
        (0..16).map(|i| (0.5 + i as f64 * 0.05, 0.5)).collect()
    }

    #[test]
    fn power_below_forty_is_rejected() {
        let mut engine = PoolEngine::new(PlayerId(1), PlayerId(2));
        let err = engine
            .apply_move(PlayerId(1), "take_shot", &json!({"angle": 0.0, "power": 39.0, "screw": 0.0, "english": 0.0}))
            .unwrap_err();
        assert!(matches!(err, EngineError::IllegalMove(_)));
    }

    #[test]
    fn power_at_forty_and_max_power_are_accepted() {
        let mut engine = PoolEngine::new(PlayerId(1), PlayerId(2));
        engine
            .apply_move(PlayerId(1), "take_shot", &json!({"angle": 0.0, "power": 40.0, "screw": 0.0, "english": 0.0}))
            .unwrap();
        assert!(engine.shot_in_progress);
        engine.shot_in_progress = false;
        engine
            .apply_move(PlayerId(1), "take_shot", &json!({"angle": 0.0, "power": MAX_POWER, "screw": 0.0, "english": 0.0}))
            .unwrap();
    }

    #[test]
    fn scratch_is_a_foul_and_grants_ball_in_hand() {
        let mut engine = PoolEngine::new(PlayerId(1), PlayerId(2));
        engine.shot_in_progress = true;
        engine
            .apply_move(
                PlayerId(1),
                "shot_result",
                &json!({
                    "ball_positions": default_positions(),
                    "pocketed_balls": [0u8],
                    "first_contact_ball_id": 1,
                    "cushion_after_contact": true,
                    "break_cushion_count": 2,
                }),
            )
            .unwrap();
        assert_eq!(engine.turn, PlayerId(2));
        assert_eq!(engine.ball_in_hand_for, Some(PlayerId(2)));
    }

    #[test]
    fn no_contact_is_a_foul() {
        let mut engine = PoolEngine::new(PlayerId(1), PlayerId(2));
        engine.shot_in_progress = true;
        engine
            .apply_move(
                PlayerId(1),
                "shot_result",
                &json!({
                    "ball_positions": default_positions(),
                    "pocketed_balls": [],
                    "first_contact_ball_id": -1,
                    "cushion_after_contact": false,
                    "break_cushion_count": 0,
                }),
            )
            .unwrap();
        assert_eq!(engine.turn, PlayerId(2));
    }

    #[test]
    fn potting_own_group_continues_the_turn() {
        let mut engine = PoolEngine::new(PlayerId(1), PlayerId(2));
        engine.groups.insert(PlayerId(1), Group::Solids);
        engine.groups.insert(PlayerId(2), Group::Stripes);
        engine.is_break = false;
        engine.shot_in_progress = true;
        engine
            .apply_move(
                PlayerId(1),
                "shot_result",
                &json!({
                    "ball_positions": default_positions(),
                    "pocketed_balls": [3u8],
                    "first_contact_ball_id": 3,
                    "cushion_after_contact": true,
                    "break_cushion_count": 0,
                }),
            )
            .unwrap();
        assert_eq!(engine.turn, PlayerId(1));
    }

    #[test]
    fn potting_eight_ball_while_on_it_wins() {
        let mut engine = PoolEngine::new(PlayerId(1), PlayerId(2));
        engine.groups.insert(PlayerId(1), Group::Solids);
        engine.groups.insert(PlayerId(2), Group::Stripes);
        for b in 1..=7u8 {
            engine.pocketed.insert(b);
        }
        engine.is_break = false;
        engine.shot_in_progress = true;
        engine
            .apply_move(
                PlayerId(1),
                "shot_result",
                &json!({
                    "ball_positions": default_positions(),
                    "pocketed_balls": [8u8],
                    "first_contact_ball_id": 8,
                    "cushion_after_contact": true,
                    "break_cushion_count": 0,
                }),
            )
            .unwrap();
        assert_eq!(engine.conclusion().unwrap().winner, Some(PlayerId(1)));
        assert_eq!(engine.conclusion().unwrap().win_type, WinType::PoolWin);
    }

    #[test]
    fn potting_eight_ball_before_clearing_group_loses() {
        let mut engine = PoolEngine::new(PlayerId(1), PlayerId(2));
        engine.groups.insert(PlayerId(1), Group::Solids);
        engine.groups.insert(PlayerId(2), Group::Stripes);
        engine.is_break = false;
        engine.shot_in_progress = true;
        engine
            .apply_move(
                PlayerId(1),
                "shot_result",
                &json!({
                    "ball_positions": default_positions(),
                    "pocketed_balls": [8u8],
                    "first_contact_ball_id": 8,
                    "cushion_after_contact": true,
                    "break_cushion_count": 0,
                }),
            )
            .unwrap();
        assert_eq!(engine.conclusion().unwrap().winner, Some(PlayerId(2)));
    }

    #[test]
    fn scratching_while_on_the_eight_ball_loses_immediately() {
        let mut engine = PoolEngine::new(PlayerId(1), PlayerId(2));
        engine.groups.insert(PlayerId(1), Group::Solids);
        engine.groups.insert(PlayerId(2), Group::Stripes);
        for b in 1..=7u8 {
            engine.pocketed.insert(b);
        }
        engine.is_break = false;
        engine.shot_in_progress = true;
        engine
            .apply_move(
                PlayerId(1),
                "shot_result",
                &json!({
                    "ball_positions": default_positions(),
                    "pocketed_balls": [0u8],
                    "first_contact_ball_id": 8,
                    "cushion_after_contact": true,
                    "break_cushion_count": 0,
                }),
            )
            .unwrap();
        assert_eq!(engine.conclusion().unwrap().winner, Some(PlayerId(2)));
        assert_eq!(engine.conclusion().unwrap().win_type, WinType::PoolWin);
    }

    #[test]
    fn cue_placement_rejects_overlap_and_out_of_bounds() {
        let engine = PoolEngine::new(PlayerId(1), PlayerId(2));
        assert!(!engine.validate_cue_placement(-0.1, 0.5));
        assert!(!engine.validate_cue_placement(1.5, 0.2)); // sits on ball 1's rack position
        assert!(engine.validate_cue_placement(0.1, 0.05));
    }
}
