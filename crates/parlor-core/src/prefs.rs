//! Per-user UI preferences, stored as one JSON blob on the user row.

use serde::{Deserialize, Serialize};

/// How the dice keys 1-6 behave in dice games.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiceKeepingStyle {
    /// Keys 1-5 toggle the die at that position.
    #[default]
    ByIndex,
    /// Keys 1-6 keep the first free die with that face value; shift+1-6
    /// releases one.
    ByValue,
}

impl DiceKeepingStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            DiceKeepingStyle::ByIndex => "by_index",
            DiceKeepingStyle::ByValue => "by_value",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "by_index" => Some(DiceKeepingStyle::ByIndex),
            "by_value" => Some(DiceKeepingStyle::ByValue),
            _ => None,
        }
    }

    /// Catalog key for the style's display name.
    pub fn label_key(self) -> &'static str {
        match self {
            DiceKeepingStyle::ByIndex => "dice-keeping-style-indexes",
            DiceKeepingStyle::ByValue => "dice-keeping-style-values",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub play_turn_sound: bool,
    pub clear_kept_on_roll: bool,
    pub dice_keeping_style: DiceKeepingStyle,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            play_turn_sound: true,
            clear_kept_on_roll: false,
            dice_keeping_style: DiceKeepingStyle::ByIndex,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_survive_empty_blob() {
        let prefs: Preferences = serde_json::from_str("{}").unwrap();
        assert_eq!(prefs, Preferences::default());
        assert!(prefs.play_turn_sound);
    }

    #[test]
    fn style_round_trips_through_str() {
        for style in [DiceKeepingStyle::ByIndex, DiceKeepingStyle::ByValue] {
            assert_eq!(DiceKeepingStyle::from_str_opt(style.as_str()), Some(style));
        }
        assert_eq!(DiceKeepingStyle::from_str_opt("bogus"), None);
    }
}
