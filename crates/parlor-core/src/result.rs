use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::player::PlayerId;

/// Immutable record of one finished game, persisted for leaderboards and
/// rating updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameResult {
    pub game_type: String,
    /// ISO-8601 timestamp.
    pub timestamp: String,
    pub duration_ticks: u64,
    pub player_results: Vec<PlayerResult>,
    /// Free-form per-game data: winner name, final scores, per-player stats.
    #[serde(default)]
    pub custom_data: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerResult {
    pub player_id: PlayerId,
    pub player_name: String,
    pub is_bot: bool,
}

/// How a custom leaderboard combines values across results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardAggregate {
    Sum,
    Max,
    Avg,
}

/// A game-declared leaderboard computed from result custom data.
/// `path` is a dot-separated path into `custom_data`, with
/// `{player_name}` expanded per player. With `denominator_path` set the
/// board is a ratio: both paths are summed across games and divided
/// (e.g. total score over turns taken), ignoring `aggregate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardType {
    pub id: String,
    pub path: String,
    #[serde(default)]
    pub denominator_path: Option<String>,
    pub aggregate: LeaderboardAggregate,
}

impl GameResult {
    pub fn has_human_players(&self) -> bool {
        self.player_results.iter().any(|p| !p.is_bot)
    }

    pub fn winner_name(&self) -> Option<&str> {
        self.custom_data.get("winner_name").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn human_detection() {
        let mut result = GameResult {
            game_type: "pig".to_string(),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            duration_ticks: 1200,
            player_results: vec![PlayerResult {
                player_id: Uuid::new_v4(),
                player_name: "Alice".to_string(),
                is_bot: true,
            }],
            custom_data: serde_json::Map::new(),
        };
        assert!(!result.has_human_players());

        result.player_results.push(PlayerResult {
            player_id: Uuid::new_v4(),
            player_name: "Bob".to_string(),
            is_bot: false,
        });
        assert!(result.has_human_players());
    }

    #[test]
    fn winner_name_reads_custom_data() {
        let mut custom = serde_json::Map::new();
        custom.insert("winner_name".to_string(), Value::String("Alice".to_string()));
        let result = GameResult {
            game_type: "pig".to_string(),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            duration_ticks: 0,
            player_results: Vec::new(),
            custom_data: custom,
        };
        assert_eq!(result.winner_name(), Some("Alice"));
    }
}
