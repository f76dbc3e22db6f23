//! The 52-card deck and chop-scoring table for Matatu (spec.md §4.4.1).

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Suit {
    Clubs,
    Diamonds,
    Hearts,
    Spades,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rank {
    Two,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Eight,
    Nine,
    Ten,
    Jack,
    Queen,
    King,
    Ace,
}

impl Rank {
    /// Chop-scoring point value (spec.md §4.4.1 "Point values for chop
    /// scoring").
    pub fn points(&self) -> u32 {
        match self {
            Rank::Two => 20,
            Rank::Ace => 15,
            Rank::King => 13,
            Rank::Queen => 12,
            Rank::Jack => 11,
            Rank::Ten => 10,
            Rank::Nine => 9,
            Rank::Eight => 8,
            Rank::Seven => 7,
            Rank::Six => 6,
            Rank::Five => 5,
            Rank::Four => 4,
            Rank::Three => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Card {
    pub rank: Rank,
    pub suit: Suit,
}

impl Card {
    pub fn new(rank: Rank, suit: Suit) -> Self {
        Self { rank, suit }
    }
}

const SUITS: [Suit; 4] = [Suit::Clubs, Suit::Diamonds, Suit::Hearts, Suit::Spades];
const RANKS: [Rank; 13] = [
    Rank::Two, Rank::Three, Rank::Four, Rank::Five, Rank::Six, Rank::Seven, Rank::Eight,
    Rank::Nine, Rank::Ten, Rank::Jack, Rank::Queen, Rank::King, Rank::Ace,
];

/// A freshly shuffled 52-card deck, seeded for reproducible turn order
/// and card order within one session (spec.md §4.4.1 "first player
/// chosen randomly").
pub fn shuffled_deck(seed: u64) -> Vec<Card> {
    let mut deck: Vec<Card> = SUITS.iter().flat_map(|&s| RANKS.iter().map(move |&r| Card::new(r, s))).collect();
    let mut rng = SmallRng::seed_from_u64(seed);
    deck.shuffle(&mut rng);
    deck
}

pub fn points_in_hand(hand: &[Card]) -> u32 {
    hand.iter().map(|c| c.rank.points()).sum()
}
