use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a player. Equals the owning user's UUID for
/// humans; freshly generated for bots.
pub type PlayerId = Uuid;

/// A seat in a game. Serialized with the game state; the user attachment
/// is runtime-only and reattached on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub is_spectator: bool,
    /// Ticks until the bot may act again.
    #[serde(default)]
    pub bot_think_ticks: u32,
    /// Action id queued for execution once think ticks reach zero.
    #[serde(default)]
    pub bot_pending_action: Option<String>,
    /// Game-specific integer target (e.g. score the bot is playing toward).
    #[serde(default)]
    pub bot_target: Option<i64>,
}

impl Player {
    pub fn new(id: PlayerId, name: impl Into<String>, is_bot: bool) -> Self {
        Self {
            id,
            name: name.into(),
            is_bot,
            is_spectator: false,
            bot_think_ticks: 0,
            bot_pending_action: None,
            bot_target: None,
        }
    }

    /// Seed the bot with a small pause so it cannot chain actions within a
    /// single tick. Clears any queued action.
    pub fn jolt(&mut self, ticks: u32) {
        if self.is_bot {
            self.bot_think_ticks = ticks;
            self.bot_pending_action = None;
        }
    }
}

/// Default think pause applied when no explicit jolt duration is given.
pub const DEFAULT_THINK_TICKS: u32 = 5;

/// Names handed out to bots, skipping any already seated at the table.
pub const BOT_NAMES: &[&str] = &[
    "Alice", "Bob", "Charlie", "Diana", "Eve", "Frank", "Grace", "Henry", "Ivy", "Jack", "Kate",
    "Leo", "Mia", "Noah", "Olivia", "Pete", "Quinn", "Rose", "Sam", "Tina", "Uma", "Vic", "Wendy",
    "Xander", "Yara", "Zack",
];

/// Pick the first bot name not already in use (case-insensitive).
pub fn pick_bot_name<'a>(taken: impl Iterator<Item = &'a str> + Clone) -> Option<&'static str> {
    BOT_NAMES
        .iter()
        .copied()
        .find(|candidate| !taken.clone().any(|name| name.eq_ignore_ascii_case(candidate)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jolt_only_affects_bots() {
        let mut human = Player::new(Uuid::new_v4(), "Alice", false);
        human.jolt(10);
        assert_eq!(human.bot_think_ticks, 0);

        let mut bot = Player::new(Uuid::new_v4(), "Bob", true);
        bot.bot_pending_action = Some("roll".to_string());
        bot.jolt(10);
        assert_eq!(bot.bot_think_ticks, 10);
        assert!(bot.bot_pending_action.is_none());
    }

    #[test]
    fn bot_name_skips_taken_names() {
        let taken = ["alice", "Bob"];
        let name = pick_bot_name(taken.iter().copied()).unwrap();
        assert_eq!(name, "Charlie");
    }

    #[test]
    fn bot_names_exhausted() {
        let all: Vec<&str> = BOT_NAMES.to_vec();
        assert!(pick_bot_name(all.iter().copied()).is_none());
    }
}
