//! Teams and scoring.
//!
//! Every game scores through the team manager, including "individual" mode
//! where each player is a team of one. Modes like "2v2" and "2v2v2" group
//! players round-robin in seating order.

use serde::{Deserialize, Serialize};

use crate::ui::{Arg, Text};

pub const TEAM_MODE_INDIVIDUAL: &str = "individual";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub player_names: Vec<String>,
    pub total_score: i64,
    pub round_score: i64,
}

impl Team {
    /// Locale-independent display name, also used as the key in result
    /// custom data.
    pub fn display_name(&self) -> String {
        self.player_names.join(" & ")
    }

    pub fn contains(&self, player_name: &str) -> bool {
        self.player_names.iter().any(|n| n == player_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamManager {
    pub team_mode: String,
    pub teams: Vec<Team>,
}

impl TeamManager {
    /// Team modes selectable for a game with the given player bounds.
    /// Always starts with "individual"; grouped modes are emitted as
    /// "2v2", "2v2v2", "3v3", etc.
    pub fn all_team_modes(min_players: usize, max_players: usize) -> Vec<String> {
        let mut modes = vec![TEAM_MODE_INDIVIDUAL.to_string()];
        for size in 2..=max_players / 2 {
            for teams in 2..=max_players / size {
                let total = teams * size;
                if total >= min_players.max(2 * size) && total <= max_players {
                    modes.push(vec![size.to_string(); teams].join("v"));
                }
            }
        }
        modes
    }

    /// Parse a grouped mode like "2v2v2" into (team count, team size).
    fn parse_grouped(mode: &str) -> Option<(usize, usize)> {
        let sizes: Vec<usize> = mode.split('v').map(|part| part.parse().ok()).collect::<Option<_>>()?;
        match sizes.as_slice() {
            [first, rest @ ..] if !rest.is_empty() && rest.iter().all(|s| s == first) => {
                Some((sizes.len(), *first))
            },
            _ => None,
        }
    }

    /// Display text for a mode value.
    pub fn format_team_mode(mode: &str) -> Text {
        match Self::parse_grouped(mode) {
            Some((teams, size)) => Text::with_args(
                "team-mode-grouped",
                vec![("teams", Arg::Int(teams as i64)), ("size", Arg::Int(size as i64))],
            ),
            None => Text::key("team-mode-individual"),
        }
    }

    /// Assign players to teams for the configured mode, resetting scores.
    /// Grouped modes distribute players round-robin in seating order; if
    /// the player count doesn't fit the mode, falls back to individual.
    pub fn setup_teams(&mut self, player_names: &[String]) {
        self.teams.clear();
        if let Some((team_count, size)) = Self::parse_grouped(&self.team_mode) {
            if player_names.len() == team_count * size {
                self.teams = (0..team_count).map(|_| Team::default()).collect();
                for (seat, name) in player_names.iter().enumerate() {
                    self.teams[seat % team_count].player_names.push(name.clone());
                }
                return;
            }
        }
        self.team_mode = TEAM_MODE_INDIVIDUAL.to_string();
        self.teams = player_names
            .iter()
            .map(|name| Team { player_names: vec![name.clone()], ..Team::default() })
            .collect();
    }

    pub fn team_of(&self, player_name: &str) -> Option<&Team> {
        self.teams.iter().find(|team| team.contains(player_name))
    }

    pub fn add_to_team_score(&mut self, player_name: &str, delta: i64) {
        if let Some(team) = self.teams.iter_mut().find(|team| team.contains(player_name)) {
            team.total_score += delta;
            team.round_score += delta;
        }
    }

    pub fn reset_round_scores(&mut self) {
        for team in &mut self.teams {
            team.round_score = 0;
        }
    }

    /// Teams ordered by total score, highest first.
    pub fn standings(&self) -> Vec<&Team> {
        let mut ordered: Vec<&Team> = self.teams.iter().collect();
        ordered.sort_by_key(|team| std::cmp::Reverse(team.total_score));
        ordered
    }

    /// One line per team: "name: score".
    pub fn format_scores_brief(&self) -> Vec<Text> {
        self.standings()
            .iter()
            .map(|team| {
                Text::with_args(
                    "team-score-brief",
                    vec![("team", Arg::Str(team.display_name())), ("score", Arg::Int(team.total_score))],
                )
            })
            .collect()
    }

    /// One line per team including the current round's score.
    pub fn format_scores_detailed(&self) -> Vec<Text> {
        self.standings()
            .iter()
            .map(|team| {
                Text::with_args(
                    "team-score-round",
                    vec![
                        ("team", Arg::Str(team.display_name())),
                        ("score", Arg::Int(team.total_score)),
                        ("round", Arg::Int(team.round_score)),
                    ],
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn modes_for_four_players() {
        let modes = TeamManager::all_team_modes(2, 4);
        assert_eq!(modes, ["individual", "2v2"]);
    }

    #[test]
    fn modes_for_six_players() {
        let modes = TeamManager::all_team_modes(2, 6);
        assert!(modes.contains(&"2v2".to_string()));
        assert!(modes.contains(&"2v2v2".to_string()));
        assert!(modes.contains(&"3v3".to_string()));
    }

    #[test]
    fn individual_mode_makes_one_team_per_player() {
        let mut manager = TeamManager { team_mode: TEAM_MODE_INDIVIDUAL.to_string(), ..TeamManager::default() };
        manager.setup_teams(&names(&["Alice", "Bob"]));
        assert_eq!(manager.teams.len(), 2);
        assert_eq!(manager.team_of("Alice").unwrap().display_name(), "Alice");
    }

    #[test]
    fn grouped_mode_assigns_round_robin() {
        let mut manager = TeamManager { team_mode: "2v2".to_string(), ..TeamManager::default() };
        manager.setup_teams(&names(&["A", "B", "C", "D"]));
        assert_eq!(manager.teams.len(), 2);
        // Seats alternate between teams
        assert!(manager.teams[0].contains("A") && manager.teams[0].contains("C"));
        assert!(manager.teams[1].contains("B") && manager.teams[1].contains("D"));
    }

    #[test]
    fn grouped_mode_with_wrong_count_falls_back_to_individual() {
        let mut manager = TeamManager { team_mode: "2v2".to_string(), ..TeamManager::default() };
        manager.setup_teams(&names(&["A", "B", "C"]));
        assert_eq!(manager.team_mode, TEAM_MODE_INDIVIDUAL);
        assert_eq!(manager.teams.len(), 3);
    }

    #[test]
    fn scores_accumulate_per_team() {
        let mut manager = TeamManager { team_mode: "2v2".to_string(), ..TeamManager::default() };
        manager.setup_teams(&names(&["A", "B", "C", "D"]));
        manager.add_to_team_score("A", 10);
        manager.add_to_team_score("C", 5);
        let team = manager.team_of("A").unwrap();
        assert_eq!(team.total_score, 15);
        assert_eq!(team.round_score, 15);

        manager.reset_round_scores();
        assert_eq!(manager.team_of("A").unwrap().round_score, 0);
        assert_eq!(manager.team_of("A").unwrap().total_score, 15);
    }

    #[test]
    fn standings_order_by_total_descending() {
        let mut manager = TeamManager { team_mode: TEAM_MODE_INDIVIDUAL.to_string(), ..TeamManager::default() };
        manager.setup_teams(&names(&["A", "B"]));
        manager.add_to_team_score("B", 30);
        manager.add_to_team_score("A", 10);
        let standings = manager.standings();
        assert_eq!(standings[0].display_name(), "B");
    }
}
