//! Dice with keep/lock mechanics shared by dice games.
//!
//! A die can be *kept* (held back from the next roll, player-reversible)
//! or *locked* (set aside by the rules, immune to toggling). Keeping is
//! driven either by index (keys 1-5) or by face value (keys 1-6 keep,
//! shift+1-6 unkeep) depending on the user's dice keeping style.

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceSet {
    values: Vec<u8>,
    kept: Vec<bool>,
    locked: Vec<bool>,
    sides: u8,
    pub has_rolled: bool,
}

impl DiceSet {
    pub fn new(num_dice: usize, sides: u8) -> Self {
        Self {
            values: vec![1; num_dice],
            kept: vec![false; num_dice],
            locked: vec![false; num_dice],
            sides,
            has_rolled: false,
        }
    }

    pub fn num_dice(&self) -> usize {
        self.values.len()
    }

    pub fn value(&self, index: usize) -> Option<u8> {
        self.values.get(index).copied()
    }

    pub fn values(&self) -> &[u8] {
        &self.values
    }

    pub fn is_kept(&self, index: usize) -> bool {
        self.kept.get(index).copied().unwrap_or(false)
    }

    pub fn is_locked(&self, index: usize) -> bool {
        self.locked.get(index).copied().unwrap_or(false)
    }

    /// Reroll every die that is neither kept nor locked. With
    /// `clear_kept`, kept flags are released afterwards so the next roll
    /// rerolls them unless re-kept.
    pub fn roll(&mut self, rng: &mut impl Rng, clear_kept: bool) {
        for i in 0..self.values.len() {
            if !self.kept[i] && !self.locked[i] {
                self.values[i] = rng.random_range(1..=self.sides);
            }
        }
        if clear_kept {
            for kept in &mut self.kept {
                *kept = false;
            }
        }
        self.has_rolled = true;
    }

    /// Toggle keeping a die. Returns the new kept state, or `None` if the
    /// die is locked.
    pub fn toggle_keep(&mut self, index: usize) -> Option<bool> {
        if index >= self.values.len() || self.locked[index] {
            return None;
        }
        self.kept[index] = !self.kept[index];
        Some(self.kept[index])
    }

    pub fn keep(&mut self, index: usize) {
        if index < self.values.len() && !self.locked[index] {
            self.kept[index] = true;
        }
    }

    pub fn unkeep(&mut self, index: usize) {
        if index < self.values.len() && !self.locked[index] {
            self.kept[index] = false;
        }
    }

    /// Keep the first free die showing `value`. Returns the index kept.
    pub fn keep_by_value(&mut self, value: u8) -> Option<usize> {
        for i in 0..self.values.len() {
            if !self.locked[i] && !self.kept[i] && self.values[i] == value {
                self.kept[i] = true;
                return Some(i);
            }
        }
        None
    }

    /// Unkeep the first kept (not locked) die showing `value`.
    pub fn unkeep_by_value(&mut self, value: u8) -> Option<usize> {
        for i in 0..self.values.len() {
            if !self.locked[i] && self.kept[i] && self.values[i] == value {
                self.kept[i] = false;
                return Some(i);
            }
        }
        None
    }

    pub fn lock(&mut self, index: usize) {
        if index < self.values.len() {
            self.locked[index] = true;
            self.kept[index] = false;
        }
    }

    /// Lock every currently-kept die.
    pub fn lock_kept(&mut self) {
        for i in 0..self.values.len() {
            if self.kept[i] {
                self.locked[i] = true;
                self.kept[i] = false;
            }
        }
    }

    pub fn kept_count(&self) -> usize {
        self.kept.iter().filter(|&&k| k).count()
    }

    pub fn locked_count(&self) -> usize {
        self.locked.iter().filter(|&&l| l).count()
    }

    pub fn unlocked_count(&self) -> usize {
        self.values.len() - self.locked_count()
    }

    /// Every die is either kept or locked.
    pub fn all_decided(&self) -> bool {
        self.free_count() == 0
    }

    /// Sum of all face values, skipping dice showing `exclude`.
    pub fn sum_excluding(&self, exclude: u8) -> i64 {
        self.values.iter().filter(|&&v| v != exclude).map(|&v| i64::from(v)).sum()
    }

    pub fn count_value(&self, value: u8) -> usize {
        self.values.iter().filter(|&&v| v == value).count()
    }

    /// "3, 5, 6" style listing of the current faces.
    pub fn format_values(&self) -> String {
        self.values.iter().map(u8::to_string).collect::<Vec<_>>().join(", ")
    }

    /// Listing with kept/locked markers, for check-hand style actions.
    pub fn format_with_state(&self) -> String {
        (0..self.values.len())
            .map(|i| {
                let value = self.values[i];
                if self.locked[i] {
                    format!("{value} (locked)")
                } else if self.kept[i] {
                    format!("{value} (kept)")
                } else {
                    value.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Number of dice that would reroll.
    pub fn free_count(&self) -> usize {
        (0..self.values.len()).filter(|&i| !self.kept[i] && !self.locked[i]).count()
    }

    /// Values of dice that are neither kept nor locked.
    pub fn free_values(&self) -> Vec<u8> {
        (0..self.values.len())
            .filter(|&i| !self.kept[i] && !self.locked[i])
            .map(|i| self.values[i])
            .collect()
    }

    /// Release all keeps and locks, ready for a fresh turn.
    pub fn reset(&mut self) {
        for i in 0..self.values.len() {
            self.kept[i] = false;
            self.locked[i] = false;
        }
        self.has_rolled = false;
    }

    #[cfg(any(test, feature = "test-helpers"))]
    pub fn set_values(&mut self, values: &[u8]) {
        self.values = values.to_vec();
        self.kept = vec![false; values.len()];
        self.locked = vec![false; values.len()];
        self.has_rolled = true;
    }
}

/// Add the shared dice actions to a turn action set: per-index
/// `toggle_die_<i>` menu entries plus the hidden `dice_key_1..6` and
/// `dice_unkeep_1..6` keybind actions whose behavior follows the user's
/// dice keeping style. The framework handles all of their hooks for any
/// game exposing its dice through `Rules::dice`.
pub fn add_dice_toggle_actions(set: &mut crate::action::ActionSet, num_dice: usize) {
    use crate::action::Action;
    use crate::ui::Text;

    for i in 0..num_dice {
        let hook = format!("toggle_die_{i}");
        set.add(
            Action::new(
                hook.clone(),
                Text::raw(format!("Die {}", i + 1)),
                hook.clone(),
                hook.clone(),
                hook.clone(),
            )
            .with_label_hook(hook),
        );
    }
    for value in 1..=6u8 {
        set.add(
            Action::new(
                format!("dice_key_{value}"),
                Text::raw(format!("Dice key {value}")),
                format!("dice_key_{value}"),
                "dice_key",
                "dice_key",
            )
            .without_actions_menu(),
        );
        set.add(
            Action::new(
                format!("dice_unkeep_{value}"),
                Text::raw(format!("Unkeep {value}")),
                format!("dice_unkeep_{value}"),
                "dice_key",
                "dice_key",
            )
            .without_actions_menu(),
        );
    }
}

/// Install the dice keybinds: keys 1-6 keep/toggle, shift+1-6 unkeep.
pub fn define_dice_keybinds(keybinds: &mut crate::keybind::KeybindMap) {
    use crate::keybind::{Keybind, KeybindState};

    for value in 1..=6u8 {
        keybinds.define(Keybind {
            name: format!("Dice key {value}"),
            key: value.to_string(),
            actions: vec![format!("dice_key_{value}")],
            requires_focus: false,
            state: KeybindState::Active,
            players: Vec::new(),
            include_spectators: false,
        });
        keybinds.define(Keybind {
            name: format!("Unkeep dice {value}"),
            key: format!("shift+{value}"),
            actions: vec![format!("dice_unkeep_{value}")],
            requires_focus: false,
            state: KeybindState::Active,
            players: Vec::new(),
            include_spectators: false,
        });
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    proptest! {
        #[test]
        fn rolls_never_touch_locked_dice(
            seed in 0u64..10_000,
            locked in 0usize..5,
            rolls in 1usize..10,
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut dice = DiceSet::new(5, 6);
            dice.roll(&mut rng, false);
            dice.lock(locked);
            let frozen = dice.value(locked);
            for _ in 0..rolls {
                dice.roll(&mut rng, false);
                prop_assert_eq!(dice.value(locked), frozen);
                prop_assert!(dice.values().iter().all(|&v| (1..=6).contains(&v)));
            }
            prop_assert_eq!(dice.toggle_keep(locked), None);
        }

        #[test]
        fn keep_counts_stay_consistent(
            seed in 0u64..10_000,
            toggles in proptest::collection::vec(0usize..5, 0..20),
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut dice = DiceSet::new(5, 6);
            dice.roll(&mut rng, false);
            for index in toggles {
                dice.toggle_keep(index);
                prop_assert_eq!(
                    dice.kept_count() + dice.locked_count() + dice.free_count(),
                    dice.num_dice()
                );
            }
        }
    }
}
