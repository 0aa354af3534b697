//! Poker betting primitives: one betting round and main/side pot
//! computation. Games own the seat order, chip stacks, and street flow;
//! these types only track who owes what.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::player::PlayerId;

/// Disabled-reason key for a raise below the minimum raise size.
pub const RAISE_TOO_SMALL: &str = "poker-raise-too-small";

/// State of a single betting round (one street).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BettingRound {
    /// Seat order for this street.
    pub order: Vec<PlayerId>,
    /// Cap on the number of raises, if the game imposes one.
    pub max_raises: Option<u32>,
    pub current_bet: i64,
    pub last_raise_size: i64,
    pub raises_count: u32,
    /// Amount each player has put in on this street.
    pub bets: HashMap<PlayerId, i64>,
    /// Players who have acted since the last full raise.
    pub acted_since_raise: HashSet<PlayerId>,
}

impl BettingRound {
    pub fn new(order: Vec<PlayerId>) -> Self {
        Self { order, ..Self::default() }
    }

    /// Reset for a new street. `initial_bets` seeds posted blinds.
    pub fn reset(&mut self, current_bet: i64, last_raise_size: i64, initial_bets: &[(PlayerId, i64)]) {
        self.current_bet = current_bet;
        self.last_raise_size = last_raise_size;
        self.raises_count = 0;
        self.bets = self.order.iter().map(|&id| (id, 0)).collect();
        for &(id, amount) in initial_bets {
            if let Some(bet) = self.bets.get_mut(&id) {
                *bet = amount;
            }
        }
        self.acted_since_raise.clear();
    }

    pub fn bet_of(&self, player: PlayerId) -> i64 {
        self.bets.get(&player).copied().unwrap_or(0)
    }

    pub fn amount_to_call(&self, player: PlayerId) -> i64 {
        (self.current_bet - self.bet_of(player)).max(0)
    }

    /// Minimum legal raise increment over the current bet.
    pub fn min_raise(&self) -> i64 {
        self.last_raise_size.max(1)
    }

    pub fn can_raise(&self) -> bool {
        self.max_raises.is_none_or(|cap| self.raises_count < cap)
    }

    /// Check or call: posts `amount_to_call` and marks the player acted.
    /// Returns the chips posted.
    pub fn post_call(&mut self, player: PlayerId) -> i64 {
        let owed = self.amount_to_call(player);
        *self.bets.entry(player).or_insert(0) += owed;
        self.acted_since_raise.insert(player);
        owed
    }

    /// Raise by `amount` over the current bet, paying any call first.
    /// Refused (no state change) when the increment is below the minimum
    /// raise or the raise cap is reached. Returns the chips posted.
    pub fn post_raise(&mut self, player: PlayerId, amount: i64) -> Result<i64, &'static str> {
        if !self.can_raise() || amount < self.min_raise() {
            return Err(RAISE_TOO_SMALL);
        }
        let posted = self.amount_to_call(player) + amount;
        let bet = self.bets.entry(player).or_insert(0);
        *bet += posted;
        self.raises_count += 1;
        self.last_raise_size = self.last_raise_size.max(amount);
        self.current_bet = *bet;
        self.acted_since_raise = HashSet::from([player]);
        Ok(posted)
    }

    /// Post an all-in of exactly `chips`. A short all-in (total above the
    /// current bet by less than the minimum raise) does not reopen
    /// betting: the current bet and last raise size are unchanged, and
    /// only the all-in player counts as having acted since the "raise".
    pub fn post_all_in(&mut self, player: PlayerId, chips: i64) -> i64 {
        let bet = self.bets.entry(player).or_insert(0);
        *bet += chips;
        let total = *bet;
        if total >= self.current_bet + self.min_raise() {
            let raise_size = total - self.current_bet;
            self.raises_count += 1;
            self.last_raise_size = self.last_raise_size.max(raise_size);
            self.current_bet = total;
        }
        self.acted_since_raise = HashSet::from([player]);
        chips
    }

    /// A street is complete once every non-all-in active player has
    /// matched the current bet and acted since the last raise.
    pub fn is_complete(&self, active: &HashSet<PlayerId>, all_in: &HashSet<PlayerId>) -> bool {
        active.iter().filter(|id| !all_in.contains(id)).all(|id| {
            self.bet_of(*id) == self.current_bet && self.acted_since_raise.contains(id)
        })
    }

    /// Next active seat after `current`, wrapping around the order.
    pub fn next_player(&self, current: Option<PlayerId>, active: &HashSet<PlayerId>) -> Option<PlayerId> {
        if self.order.is_empty() {
            return None;
        }
        let start = current
            .and_then(|id| self.order.iter().position(|&p| p == id))
            .map(|idx| (idx + 1) % self.order.len())
            .unwrap_or(0);
        (0..self.order.len())
            .map(|offset| self.order[(start + offset) % self.order.len()])
            .find(|id| active.contains(id))
    }
}

/// One pot and the players who can win it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pot {
    pub amount: i64,
    pub eligible: HashSet<PlayerId>,
}

/// Tracks total contributions across a hand and computes main/side pots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PotManager {
    pub contributions: HashMap<PlayerId, i64>,
    pub folded: HashSet<PlayerId>,
}

impl PotManager {
    pub fn reset(&mut self) {
        self.contributions.clear();
        self.folded.clear();
    }

    pub fn add_contribution(&mut self, player: PlayerId, amount: i64) {
        if amount > 0 {
            *self.contributions.entry(player).or_insert(0) += amount;
        }
    }

    pub fn mark_folded(&mut self, player: PlayerId) {
        self.folded.insert(player);
    }

    pub fn total(&self) -> i64 {
        self.contributions.values().sum()
    }

    /// Layer contributions into a main pot plus side pots. Folded players
    /// leave their chips behind but are ineligible to win.
    pub fn pots(&self) -> Vec<Pot> {
        let mut levels: Vec<i64> =
            self.contributions.values().copied().filter(|&amount| amount > 0).collect();
        levels.sort_unstable();
        levels.dedup();

        let mut pots = Vec::new();
        let mut previous = 0;
        for level in levels {
            let contributors: Vec<PlayerId> = self
                .contributions
                .iter()
                .filter(|&(_, &amount)| amount >= level)
                .map(|(&id, _)| id)
                .collect();
            let amount = (level - previous) * contributors.len() as i64;
            previous = level;
            if amount <= 0 {
                continue;
            }
            let eligible: HashSet<PlayerId> =
                contributors.into_iter().filter(|id| !self.folded.contains(id)).collect();
            pots.push(Pot { amount, eligible });
        }
        pots
    }
}

/// Seat order starting left of the button.
pub fn order_after_button(active: &[PlayerId], button: Option<PlayerId>) -> Vec<PlayerId> {
    if active.is_empty() {
        return Vec::new();
    }
    match button.and_then(|id| active.iter().position(|&p| p == id)) {
        Some(idx) => {
            let start = (idx + 1) % active.len();
            active[start..].iter().chain(active[..start].iter()).copied().collect()
        },
        None => active.to_vec(),
    }
}
