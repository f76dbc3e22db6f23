//! Matatu (a West/East-African card game) engine (spec.md §4.4.1).

use std::collections::HashMap;

use duelstake_core::prelude::{PlayerId, WinType};
use rand::rngs::SmallRng;
use rand::Rng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::cards::{points_in_hand, shuffled_deck, Card, Rank, Suit};
use crate::engine::{Conclusion, EngineError, EngineStatus, GameEngine};

const HAND_SIZE: usize = 7;

#[derive(Debug, Deserialize)]
struct PlayCardPayload {
    card: Card,
    declared_suit: Option<Suit>,
}

pub struct MatatuEngine {
    player1: PlayerId,
    player2: PlayerId,
    hands: HashMap<PlayerId, Vec<Card>>,
    deck: Vec<Card>,
    discard: Vec<Card>,
    target_suit: Suit,
    current_suit: Suit,
    draw_stack: u32,
    turn: PlayerId,
    pending_single_draw: bool,
    status: EngineStatus,
    conclusion: Option<Conclusion>,
}

impl MatatuEngine {
    /// spec.md §4.4.1 "Setup". `seed` is drawn fresh at match time so
    /// deal order and first-player choice are reproducible for replay
    /// but not predictable ahead of time.
    pub fn new(player1: PlayerId, player2: PlayerId, seed: u64) -> Self {
        let mut deck = shuffled_deck(seed);
        let mut rng = SmallRng::seed_from_u64(seed ^ 0xA5A5_A5A5_A5A5_A5A5);

        let mut p1_hand = Vec::with_capacity(HAND_SIZE);
        let mut p2_hand = Vec::with_capacity(HAND_SIZE);
        for _ in 0..HAND_SIZE {
            p1_hand.push(deck.pop().expect("deck has 52 cards"));
            p2_hand.push(deck.pop().expect("deck has 52 cards"));
        }

        let mut target_suit = Suit::Clubs;
        loop {
            let card = deck.pop().expect("deck not exhausted finding a non-7");
            if card.rank != Rank::Seven {
                target_suit = card.suit;
                deck.insert(0, card);
                break;
            }
        }

        let turn = if rng.gen_bool(0.5) { player1 } else { player2 };

        let mut hands = HashMap::new();
        hands.insert(player1, p1_hand);
        hands.insert(player2, p2_hand);

        Self {
            player1,
            player2,
            hands,
            deck,
            discard: Vec::new(),
            target_suit,
            current_suit: target_suit,
            draw_stack: 0,
            turn,
            pending_single_draw: false,
            status: EngineStatus::InProgress,
            conclusion: None,
        }
    }

    fn opponent_of(&self, player: PlayerId) -> PlayerId {
        if player == self.player1 { self.player2 } else { self.player1 }
    }

    fn ensure_deck_has(&mut self, n: usize) {
        while self.deck.len() < n && self.discard.len() > 1 {
            let top = self.discard.pop().expect("checked non-empty above");
            let mut reshuffled = std::mem::take(&mut self.discard);
            let mut rng = SmallRng::seed_from_u64(reshuffled.len() as u64 + self.deck.len() as u64);
            use rand::seq::SliceRandom;
            reshuffled.shuffle(&mut rng);
            self.deck.extend(reshuffled);
            self.discard = vec![top];
        }
    }

    fn draw_n(&mut self, player: PlayerId, n: u32) {
        self.ensure_deck_has(n as usize);
        let hand = self.hands.get_mut(&player).expect("both players have hands");
        for _ in 0..n {
            if let Some(card) = self.deck.pop() {
                hand.push(card);
            }
        }
    }

    fn finish(&mut self, winner: Option<PlayerId>, win_type: WinType) {
        self.status = EngineStatus::Completed;
        self.conclusion = Some(Conclusion { winner, win_type });
    }

    fn play_card(&mut self, player: PlayerId, payload: &Value) -> Result<(), EngineError> {
        if self.status != EngineStatus::InProgress {
            return Err(EngineError::NotInProgress);
        }
        if self.turn != player {
            return Err(EngineError::NotYourTurn);
        }
        let parsed: PlayCardPayload =
            serde_json::from_value(payload.clone()).map_err(|e| EngineError::BadPayload(e.to_string()))?;

        let hand = self.hands.get(&player).expect("both players have hands");
        if !hand.contains(&parsed.card) {
            return Err(EngineError::CardNotHeld);
        }
        if self.draw_stack > 0 && parsed.card.rank != Rank::Two {
            return Err(EngineError::IllegalMove("must answer the pending draw with a 2".into()));
        }
        if let Some(top) = self.discard.last() {
            let matches =
                parsed.card.rank == top.rank || parsed.card.suit == self.current_suit || parsed.card.rank == Rank::Ace;
            if !matches {
                return Err(EngineError::IllegalMove("card does not follow suit, rank, or ace".into()));
            }
        }

        let hand = self.hands.get_mut(&player).expect("both players have hands");
        let idx = hand.iter().position(|&c| c == parsed.card).expect("checked contains above");
        hand.remove(idx);
        let hand_now_empty = hand.is_empty();
        self.discard.push(parsed.card);

        if parsed.card.rank == Rank::Ace && !hand_now_empty {
            let declared = parsed.declared_suit.ok_or_else(|| {
                EngineError::BadPayload("declared_suit is required when playing an ace".into())
            })?;
            self.current_suit = declared;
        } else {
            self.current_suit = parsed.card.suit;
        }

        if parsed.card.rank == Rank::Seven && parsed.card.suit == self.target_suit {
            let p1_points = points_in_hand(self.hands.get(&self.player1).unwrap());
            let p2_points = points_in_hand(self.hands.get(&self.player2).unwrap());
            let winner = if p1_points < p2_points {
                self.player1
            } else if p2_points < p1_points {
                self.player2
            } else {
                player
            };
            debug!(?winner, p1_points, p2_points, "chop win");
            self.finish(Some(winner), WinType::Chop);
            return Ok(());
        }

        if hand_now_empty {
            self.finish(Some(player), WinType::Classic);
            return Ok(());
        }

        match parsed.card.rank {
            Rank::Two => {
                self.draw_stack = 2;
                self.turn = self.opponent_of(player);
            }
            Rank::Jack | Rank::Eight => {
                // skip the opponent; turn stays with the player.
            }
            _ => {
                self.turn = self.opponent_of(player);
            }
        }
        self.pending_single_draw = false;
        Ok(())
    }

    fn draw_card(&mut self, player: PlayerId) -> Result<(), EngineError> {
        if self.status != EngineStatus::InProgress {
            return Err(EngineError::NotInProgress);
        }
        if self.turn != player {
            return Err(EngineError::NotYourTurn);
        }
        if self.draw_stack > 0 {
            let n = self.draw_stack;
            self.draw_stack = 0;
            self.draw_n(player, n);
            self.turn = self.opponent_of(player);
            self.pending_single_draw = false;
        } else {
            self.draw_n(player, 1);
            self.pending_single_draw = true;
        }
        Ok(())
    }

    fn pass(&mut self, player: PlayerId) -> Result<(), EngineError> {
        if self.status != EngineStatus::InProgress {
            return Err(EngineError::NotInProgress);
        }
        if self.turn != player || !self.pending_single_draw {
            return Err(EngineError::IllegalMove("pass is only valid right after drawing a single card".into()));
        }
        self.turn = self.opponent_of(player);
        self.pending_single_draw = false;
        Ok(())
    }
}

impl GameEngine for MatatuEngine {
    fn status(&self) -> EngineStatus {
        self.status
    }

    fn conclusion(&self) -> Option<Conclusion> {
        self.conclusion
    }

    fn state_for(&self, player: PlayerId) -> Value {
        let opponent = self.opponent_of(player);
        json!({
            "status": format!("{:?}", self.status),
            "turn": self.turn.0,
            "current_suit": self.current_suit,
            "target_suit": self.target_suit,
            "draw_stack": self.draw_stack,
            "top_card": self.discard.last(),
            "deck_remaining": self.deck.len(),
            "your_hand": self.hands.get(&player),
            "opponent_hand_size": self.hands.get(&opponent).map(Vec::len),
        })
    }

    fn full_state(&self) -> Value {
        json!({
            "player1": self.player1.0,
            "player2": self.player2.0,
            "hands": {
                "player1": self.hands.get(&self.player1),
                "player2": self.hands.get(&self.player2),
            },
            "deck": self.deck,
            "discard": self.discard,
            "target_suit": self.target_suit,
            "current_suit": self.current_suit,
            "draw_stack": self.draw_stack,
            "turn": self.turn.0,
            "status": format!("{:?}", self.status),
        })
    }

    fn apply_move(&mut self, player: PlayerId, move_type: &str, payload: &Value) -> Result<(), EngineError> {
        match move_type {
            "play_card" => self.play_card(player, payload),
            "draw_card" => self.draw_card(player),
            "pass" => self.pass(player),
            other => Err(EngineError::BadPayload(format!("unknown matatu move {other}"))),
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

    #[test]
    fn deal_gives_seven_cards_each_and_picks_a_first_player() {
        let engine = MatatuEngine::new(PlayerId(1), PlayerId(2), 42);
        assert_eq!(engine.hands[&PlayerId(1)].len(), HAND_SIZE);
        assert_eq!(engine.hands[&PlayerId(2)].len(), HAND_SIZE);
        assert!(engine.turn == PlayerId(1) || engine.turn == PlayerId(2));
        assert_eq!(engine.deck.len(), 52 - 2 * HAND_SIZE - 1);
    }

    #[test]
    fn jack_keeps_the_turn_with_the_player_who_played_it() {
        let mut engine = MatatuEngine::new(PlayerId(1), PlayerId(2), 7);
        let turn = engine.turn;
        let jack_suit = engine.current_suit;
        engine.hands.get_mut(&turn).unwrap().push(Card::new(Rank::Jack, jack_suit));

        engine
            .apply_move(turn, "play_card", &json!({"card": {"rank": "Jack", "suit": jack_suit}}))
            .unwrap();
        assert_eq!(engine.turn, turn);
    }

    #[test]
    fn two_sets_draw_stack_and_passes_turn() {
        let mut engine = MatatuEngine::new(PlayerId(1), PlayerId(2), 7);
        let turn = engine.turn;
        let suit = engine.current_suit;
        engine.hands.get_mut(&turn).unwrap().push(Card::new(Rank::Two, suit));

        engine.apply_move(turn, "play_card", &json!({"card": {"rank": "Two", "suit": suit}})).unwrap();
        assert_eq!(engine.draw_stack, 2);
        assert_ne!(engine.turn, turn);
    }

    #[test]
    fn opponent_must_answer_a_pending_draw_stack_with_a_two() {
        let mut engine = MatatuEngine::new(PlayerId(1), PlayerId(2), 7);
        let turn = engine.turn;
        let suit = engine.current_suit;
        engine.hands.get_mut(&turn).unwrap().push(Card::new(Rank::Two, suit));
        engine.apply_move(turn, "play_card", &json!({"card": {"rank": "Two", "suit": suit}})).unwrap();
        let next = engine.turn;

        let some_other_card = Card::new(Rank::Four, suit);
        engine.hands.get_mut(&next).unwrap().push(some_other_card);
        let err = engine
            .apply_move(next, "play_card", &json!({"card": {"rank": "Four", "suit": suit}}))
            .unwrap_err();
        assert!(matches!(err, EngineError::IllegalMove(_)));
    }

    #[test]
    fn emptying_the_hand_wins_classic() {
        let mut engine = MatatuEngine::new(PlayerId(1), PlayerId(2), 7);
        let turn = engine.turn;
        let suit = engine.current_suit;
        engine.hands.insert(turn, vec![Card::new(Rank::Four, suit)]);

        engine.apply_move(turn, "play_card", &json!({"card": {"rank": "Four", "suit": suit}})).unwrap();
        assert_eq!(engine.status(), EngineStatus::Completed);
        assert_eq!(engine.conclusion().unwrap().winner, Some(turn));
        assert_eq!(engine.conclusion().unwrap().win_type, WinType::Classic);
    }

    #[test]
    fn chop_goes_to_the_lower_point_total_ties_break_to_chopper() {
        let mut engine = MatatuEngine::new(PlayerId(1), PlayerId(2), 7);
        let turn = engine.turn;
        let other = engine.opponent_of(turn);
        engine.hands.insert(turn, vec![Card::new(Rank::Seven, engine.target_suit), Card::new(Rank::Three, Suit::Clubs)]);
        engine.hands.insert(other, vec![Card::new(Rank::King, Suit::Clubs)]);

        engine
            .apply_move(turn, "play_card", &json!({"card": {"rank": "Seven", "suit": engine.target_suit}}))
            .unwrap();
        assert_eq!(engine.conclusion().unwrap().win_type, WinType::Chop);
        assert_eq!(engine.conclusion().unwrap().winner, Some(turn));
    }

    #[test]
    fn forfeit_by_disconnect_awards_the_opponent() {
        let mut engine = MatatuEngine::new(PlayerId(1), PlayerId(2), 7);
        engine.forfeit_by_disconnect(PlayerId(1));
        assert_eq!(engine.conclusion().unwrap().winner, Some(PlayerId(2)));
        assert_eq!(engine.conclusion().unwrap().win_type, WinType::Forfeit);
    }
}
