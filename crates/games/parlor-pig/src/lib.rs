//! Pig: roll or bank, but don't roll a 1.
//!
//! Each roll adds to the turn score; rolling a 1 busts the turn. Banking
//! moves the turn score to the player's team total and passes the turn.
//! First team to reach the target score at the end of a round wins, with
//! tiebreaker rounds between tied leaders.

use std::collections::HashMap;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use parlor_core::action::{Action, ActionSet, Visibility};
use parlor_core::game::{Game, GameCore, GameStatus, Rules};
use parlor_core::keybind::{Keybind, KeybindMap, KeybindState};
use parlor_core::options::{OptionDef, OptionKind, OptionValue};
use parlor_core::player::{Player, PlayerId};
use parlor_core::result::GameResult;
use parlor_core::ui::{Arg, Text};

pub type PigGame = Game<PigRules>;

/// Build a fresh Pig game.
pub fn new_game() -> PigGame {
    Game::new(PigRules::default())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PigOptions {
    pub target_score: i64,
    pub min_bank_points: i64,
    pub dice_sides: i64,
    pub team_mode: String,
}

impl Default for PigOptions {
    fn default() -> Self {
        Self {
            target_score: 50,
            min_bank_points: 0,
            dice_sides: 6,
            team_mode: "individual".to_string(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PigRules {
    pub options: PigOptions,
    /// Per-player score for the current turn, lost on a bust.
    round_scores: HashMap<PlayerId, i64>,
}

impl PigRules {
    fn round_score(&self, player_id: PlayerId) -> i64 {
        self.round_scores.get(&player_id).copied().unwrap_or(0)
    }

    fn min_bank(&self) -> i64 {
        self.options.min_bank_points.max(1)
    }

    fn player_score(&self, core: &GameCore, player_id: PlayerId) -> i64 {
        core.player_by_id(player_id)
            .and_then(|p| core.teams.team_of(&p.name))
            .map(|t| t.total_score)
            .unwrap_or(0)
    }

    fn start_round(&mut self, core: &mut GameCore) {
        core.round += 1;
        // Reseat with the current active players (handles tiebreakers)
        // and reset to the first seat.
        let order: Vec<PlayerId> = core.active_players().iter().map(|p| p.id).collect();
        core.set_turn_players(order, false);
        core.play_sound("game_pig/roundstart.ogg");
        core.broadcast_l("game-round-start", vec![("round", Arg::from(core.round))]);
        self.start_turn(core);
    }

    fn start_turn(&mut self, core: &mut GameCore) {
        let Some(player) = core.current_player() else { return };
        let id = player.id;
        let is_bot = player.is_bot;
        self.round_scores.insert(id, 0);
        core.announce_turn();
        if is_bot {
            self.setup_bot_target(core, id);
        }
        core.mark_all_menus_dirty();
    }

    /// Pick how many points this bot tries to collect before banking:
    /// normally a modest random target, pushed up when an opponent is at
    /// or near the winning score, relaxed when the bot has the game in
    /// hand.
    fn setup_bot_target(&mut self, core: &mut GameCore, player_id: PlayerId) {
        let mut target = core.rng().random_range(10..=25);
        let my_score = self.player_score(core, player_id);
        let my_round = self.round_score(player_id);

        let mut someone_hit_threshold = false;
        let mut highest = 0;
        for other in core.active_players() {
            if other.id == player_id {
                continue;
            }
            let score = self.player_score(core, other.id);
            if score >= self.options.target_score {
                someone_hit_threshold = true;
                highest = highest.max(score);
            } else if score >= self.options.target_score - 1 {
                highest = highest.max(score);
            }
        }

        if someone_hit_threshold || highest > 0 {
            target = highest + 1 - my_score;
        }

        if (my_score + my_round) >= self.options.target_score - 1 && !someone_hit_threshold {
            let can_relax = core
                .active_players()
                .iter()
                .filter(|p| p.id != player_id)
                .all(|p| self.player_score(core, p.id) <= my_score + my_round - 8);
            if can_relax {
                target = 0;
            }
        }

        if let Some(player) = core.player_by_id_mut(player_id) {
            player.bot_target = Some(target.max(0));
        }
    }

    fn apply_roll(&mut self, core: &mut GameCore, player_id: PlayerId, roll: i64) {
        if roll == 1 {
            let lost = self.round_score(player_id);
            let name = core.player_by_id(player_id).map(|p| p.name.clone()).unwrap_or_default();
            core.play_sound("game_pig/lose.ogg");
            core.broadcast_l(
                "pig-bust",
                vec![("player", Arg::Str(name)), ("points", Arg::Int(lost))],
            );
            self.round_scores.insert(player_id, 0);
            self.end_turn(core);
        } else {
            let total = self.round_score(player_id) + roll;
            self.round_scores.insert(player_id, total);
            core.broadcast_l(
                "pig-roll-result",
                vec![("roll", Arg::Int(roll)), ("total", Arg::Int(total))],
            );
        }
    }

    fn handle_roll(&mut self, core: &mut GameCore, player_id: PlayerId) {
        let name = core.player_by_id(player_id).map(|p| p.name.clone()).unwrap_or_default();
        core.broadcast_l("pig-rolls", vec![("player", Arg::Str(name))]);
        core.play_sound("game_pig/roll.ogg");
        let pause = core.rng().random_range(10..=20);
        core.jolt_bot(player_id, pause);
        let roll = core.rng().random_range(1..=self.options.dice_sides);
        self.apply_roll(core, player_id, roll);
    }

    fn handle_bank(&mut self, core: &mut GameCore, player_id: PlayerId) {
        core.play_sound("game_pig/bank.ogg");
        let banked = self.round_score(player_id);
        let name = core.player_by_id(player_id).map(|p| p.name.clone()).unwrap_or_default();
        core.teams.add_to_team_score(&name, banked);
        let total = core.teams.team_of(&name).map(|t| t.total_score).unwrap_or(0);
        self.round_scores.insert(player_id, 0);
        core.broadcast_l(
            "pig-bank-action",
            vec![("player", Arg::Str(name)), ("points", Arg::Int(banked)), ("total", Arg::Int(total))],
        );
        self.end_turn(core);
    }

    fn end_turn(&mut self, core: &mut GameCore) {
        let pause = core.rng().random_range(20..=30);
        core.jolt_bots(pause);
        if core.turn_player_ids.is_empty() {
            return;
        }
        if core.turn_index >= core.turn_player_ids.len() - 1 {
            self.end_round(core);
        } else {
            core.advance_turn(false);
            self.start_turn(core);
        }
    }

    fn end_round(&mut self, core: &mut GameCore) {
        let mut winners: Vec<(PlayerId, String, i64)> = Vec::new();
        let mut high_score = 0;
        for player in core.active_players() {
            let score = self.player_score(core, player.id);
            if score >= self.options.target_score {
                match score.cmp(&high_score) {
                    std::cmp::Ordering::Greater => {
                        winners = vec![(player.id, player.name.clone(), score)];
                        high_score = score;
                    },
                    std::cmp::Ordering::Equal => {
                        winners.push((player.id, player.name.clone(), score));
                    },
                    std::cmp::Ordering::Less => {},
                }
            }
        }

        match winners.len() {
            0 => self.start_round(core),
            1 => {
                core.play_sound("game_pig/win.ogg");
                core.broadcast_l("pig-winner", vec![("player", Arg::Str(winners[0].1.clone()))]);
                core.request_finish(true);
            },
            _ => {
                // Tiebreaker round: losers watch from the sidelines.
                let names =
                    winners.iter().map(|(_, name, _)| name.clone()).collect::<Vec<_>>().join(", ");
                core.broadcast_l("game-tiebreaker-players", vec![("players", Arg::Str(names))]);
                let winner_ids: Vec<PlayerId> = winners.iter().map(|(id, _, _)| *id).collect();
                let demote: Vec<PlayerId> = core
                    .active_players()
                    .iter()
                    .filter(|p| !winner_ids.contains(&p.id))
                    .map(|p| p.id)
                    .collect();
                for id in demote {
                    if let Some(player) = core.player_by_id_mut(id) {
                        player.is_spectator = true;
                    }
                }
                self.start_round(core);
            },
        }
    }
}

impl Rules for PigRules {
    fn game_type(&self) -> &'static str {
        "pig"
    }

    fn display_name(&self) -> &'static str {
        "Pig"
    }

    fn category(&self) -> &'static str {
        "category-dice-games"
    }

    fn turn_sound(&self) -> &'static str {
        "game_pig/turn.ogg"
    }

    fn turn_action_set(&self, _core: &GameCore, _player: &Player) -> Option<ActionSet> {
        let mut set = ActionSet::new("turn");
        set.add(Action::new("roll", Text::key("pig-roll"), "roll", "roll", "roll"));
        set.add(
            Action::new(
                "bank",
                Text::with_args("pig-bank", vec![("points", Arg::Int(0))]),
                "bank",
                "bank",
                "bank",
            )
            .with_label_hook("bank"),
        );
        Some(set)
    }

    fn setup_keybinds(&self, keybinds: &mut KeybindMap) {
        keybinds.define(Keybind {
            name: "Roll".to_string(),
            key: "r".to_string(),
            actions: vec!["roll".to_string()],
            requires_focus: false,
            state: KeybindState::Active,
            players: Vec::new(),
            include_spectators: false,
        });
        keybinds.define(Keybind {
            name: "Bank".to_string(),
            key: "b".to_string(),
            actions: vec!["bank".to_string()],
            requires_focus: false,
            state: KeybindState::Active,
            players: Vec::new(),
            include_spectators: false,
        });
    }

    fn options(&self) -> Vec<OptionDef> {
        vec![
            OptionDef {
                name: "target_score",
                label: "game-set-target-score",
                prompt: "game-enter-target-score",
                kind: OptionKind::Int { min: 10, max: 1000, value_key: "score" },
            },
            OptionDef {
                name: "min_bank_points",
                label: "pig-set-min-bank",
                prompt: "pig-enter-min-bank",
                kind: OptionKind::Int { min: 0, max: 50, value_key: "points" },
            },
            OptionDef {
                name: "dice_sides",
                label: "pig-set-dice-sides",
                prompt: "pig-enter-dice-sides",
                kind: OptionKind::Int { min: 4, max: 20, value_key: "sides" },
            },
            OptionDef {
                name: "team_mode",
                label: "game-set-team-mode",
                prompt: "game-select-team-mode",
                kind: OptionKind::TeamMode { value_key: "mode" },
            },
        ]
    }

    fn option_value(&self, name: &str) -> Option<OptionValue> {
        match name {
            "target_score" => Some(OptionValue::Int(self.options.target_score)),
            "min_bank_points" => Some(OptionValue::Int(self.options.min_bank_points)),
            "dice_sides" => Some(OptionValue::Int(self.options.dice_sides)),
            "team_mode" => Some(OptionValue::Choice(self.options.team_mode.clone())),
            _ => None,
        }
    }

    fn set_option(&mut self, name: &str, value: OptionValue) {
        match (name, value) {
            ("target_score", OptionValue::Int(n)) => self.options.target_score = n,
            ("min_bank_points", OptionValue::Int(n)) => self.options.min_bank_points = n,
            ("dice_sides", OptionValue::Int(n)) => self.options.dice_sides = n,
            ("team_mode", OptionValue::Choice(mode)) => self.options.team_mode = mode,
            _ => {},
        }
    }

    fn on_start(&mut self, core: &mut GameCore) {
        core.game_active = true;
        core.round = 0;

        let names: Vec<String> =
            core.active_players().iter().map(|p| p.name.clone()).collect();
        core.teams.team_mode = self.options.team_mode.clone();
        core.teams.setup_teams(&names);

        let order: Vec<PlayerId> = core.active_players().iter().map(|p| p.id).collect();
        for id in &order {
            self.round_scores.insert(*id, 0);
        }
        core.set_turn_players(order, false);
        core.play_music("game_pig/mus.ogg");
        self.start_round(core);
    }

    fn on_tick(&mut self, core: &mut GameCore) {
        if !core.game_active {
            return;
        }
        // Bot targets are runtime-derived; reseed after a reload.
        if let Some(current) = core.current_player() {
            if current.is_bot && current.bot_target.is_none() {
                let id = current.id;
                self.setup_bot_target(core, id);
            }
        }
    }

    fn bot_think(&mut self, core: &mut GameCore, player_id: PlayerId) -> Option<String> {
        let target = core.player_by_id(player_id).and_then(|p| p.bot_target).unwrap_or(15);
        let round = self.round_score(player_id);
        if round >= target && round >= self.min_bank() {
            Some("bank".to_string())
        } else {
            Some("roll".to_string())
        }
    }

    fn action_enabled(&self, core: &GameCore, player: &Player, hook: &str) -> Option<&'static str> {
        let turn_guard = || {
            if core.status != GameStatus::Playing {
                Some("action-not-playing")
            } else if player.is_spectator {
                Some("action-spectator")
            } else if !core.is_current(player.id) {
                Some("action-not-your-turn")
            } else {
                None
            }
        };
        match hook {
            "roll" => turn_guard(),
            "bank" => turn_guard().or_else(|| {
                if self.round_score(player.id) < self.min_bank() {
                    Some("pig-need-more-points")
                } else {
                    None
                }
            }),
            _ => None,
        }
    }

    fn action_hidden(&self, core: &GameCore, player: &Player, hook: &str) -> Visibility {
        let on_turn = core.status == GameStatus::Playing
            && !player.is_spectator
            && core.is_current(player.id);
        match hook {
            "roll" => {
                if on_turn {
                    Visibility::Visible
                } else {
                    Visibility::Hidden
                }
            },
            "bank" => {
                if on_turn && self.round_score(player.id) >= self.min_bank() {
                    Visibility::Visible
                } else {
                    Visibility::Hidden
                }
            },
            _ => Visibility::Visible,
        }
    }

    fn action_label(&self, _core: &GameCore, player: &Player, hook: &str, _action_id: &str) -> Option<Text> {
        match hook {
            "bank" => Some(Text::with_args(
                "pig-bank",
                vec![("points", Arg::Int(self.round_score(player.id)))],
            )),
            _ => None,
        }
    }

    fn handle_action(&mut self, core: &mut GameCore, player_id: PlayerId, hook: &str, _input: Option<&str>) {
        match hook {
            "roll" => self.handle_roll(core, player_id),
            "bank" => self.handle_bank(core, player_id),
            _ => {},
        }
    }

    fn player_created(&mut self, _core: &GameCore, player_id: PlayerId) {
        self.round_scores.insert(player_id, 0);
    }

    fn player_removed(&mut self, player_id: PlayerId) {
        self.round_scores.remove(&player_id);
    }

    fn custom_result_data(&self, core: &GameCore) -> serde_json::Map<String, Value> {
        let standings = core.teams.standings();
        let mut final_scores = serde_json::Map::new();
        for team in &standings {
            final_scores.insert(team.display_name(), Value::from(team.total_score));
        }
        let mut data = serde_json::Map::new();
        if let Some(winner) = standings.first() {
            data.insert("winner_name".to_string(), Value::String(winner.display_name()));
            data.insert("winner_score".to_string(), Value::from(winner.total_score));
        }
        data.insert("final_scores".to_string(), Value::Object(final_scores));
        data.insert("rounds_played".to_string(), Value::from(core.round));
        data.insert("target_score".to_string(), Value::from(self.options.target_score));
        data.insert("team_mode".to_string(), Value::String(self.options.team_mode.clone()));
        data
    }

    fn format_end_screen(&self, core: &GameCore, _result: &GameResult) -> Vec<Text> {
        let mut lines = vec![Text::key("game-final-scores")];
        for (rank, team) in core.teams.standings().iter().enumerate() {
            lines.push(Text::raw(format!(
                "{}. {}: {} points",
                rank + 1,
                team.display_name(),
                team.total_score
            )));
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parlor_core::game::game_from_json;
    use parlor_core::test_helpers as th;

    #[test]
    fn lobby_contract() {
        th::contract_lobby_initializes(&mut new_game());
    }

    #[test]
    fn start_contract() {
        th::contract_start_with_bots(&mut new_game());
    }

    #[test]
    fn save_restore_contract() {
        let mut game = new_game();
        let host = th::lobby_with_bots(&mut game, "Host", 1);
        game.execute_action(host, "start_game");
        th::run_ticks(&mut game, 10);
        th::contract_save_restore(&mut game, game_from_json::<PigRules>);
    }

    #[test]
    fn roll_accumulates_and_one_busts() {
        let mut game = new_game();
        let host = th::lobby_with_bots(&mut game, "Host", 1);
        game.execute_action(host, "start_game");
        game.core.drain_outbox();

        game.rules.apply_roll(&mut game.core, host, 4);
        assert_eq!(game.rules.round_score(host), 4);
        game.rules.apply_roll(&mut game.core, host, 5);
        assert_eq!(game.rules.round_score(host), 9);

        let before_turn = game.core.current_player_id();
        game.rules.apply_roll(&mut game.core, host, 1);
        assert_eq!(game.rules.round_score(host), 0, "a 1 wipes the turn score");
        assert_ne!(game.core.current_player_id(), before_turn, "bust passes the turn");
    }

    #[test]
    fn bank_moves_points_to_team_total_and_passes_turn() {
        let mut game = new_game();
        let host = th::lobby_with_bots(&mut game, "Host", 1);
        game.execute_action(host, "start_game");

        game.rules.apply_roll(&mut game.core, host, 6);
        game.execute_action(host, "bank");
        assert_eq!(game.rules.player_score(&game.core, host), 6);
        assert_eq!(game.rules.round_score(host), 0);
        assert_ne!(game.core.current_player_id(), Some(host));
    }

    #[test]
    fn bank_below_minimum_is_refused_with_reason() {
        let mut game = new_game();
        let host = th::lobby_with_bots(&mut game, "Host", 1);
        game.rules.options.min_bank_points = 10;
        game.execute_action(host, "start_game");
        game.core.drain_outbox();

        game.rules.apply_roll(&mut game.core, host, 4);
        let score_before = game.rules.player_score(&game.core, host);
        game.execute_action(host, "bank");

        assert_eq!(game.rules.player_score(&game.core, host), score_before);
        assert_eq!(game.rules.round_score(host), 4, "refused bank leaves the turn score");
        let speech = th::drain_speech(&mut game, host);
        assert!(speech.iter().any(|s| s.contains("more points to bank")), "got: {speech:?}");
    }

    #[test]
    fn bank_is_hidden_until_worth_banking() {
        let mut game = new_game();
        let host = th::lobby_with_bots(&mut game, "Host", 1);
        game.execute_action(host, "start_game");

        let player = game.core.player_by_id(host).unwrap().clone();
        let visible: Vec<String> =
            game.visible_actions(&player).into_iter().map(|ra| ra.action.id).collect();
        assert!(visible.contains(&"roll".to_string()));
        assert!(!visible.contains(&"bank".to_string()));

        game.rules.apply_roll(&mut game.core, host, 3);
        let visible: Vec<String> =
            game.visible_actions(&player).into_iter().map(|ra| ra.action.id).collect();
        assert!(visible.contains(&"bank".to_string()));
    }

    #[test]
    fn bot_game_to_thirty_completes() {
        let mut game = new_game();
        game.rules.options.target_score = 30;
        let (ticks, result) = th::contract_bot_game_completes(&mut game, 7, 20_000);
        assert!(ticks <= 20_000);

        let winner = result.winner_name().expect("winner recorded");
        let scores = result.custom_data.get("final_scores").unwrap().as_object().unwrap();
        assert!(scores.get(winner).unwrap().as_i64().unwrap() >= 30);
    }

    #[test]
    fn bot_target_drives_bank_decision() {
        let mut game = new_game();
        let host = th::lobby_with_bots(&mut game, "Host", 1);
        game.execute_action(host, "start_game");

        let bot_id = game.core.players.iter().find(|p| p.is_bot).unwrap().id;
        game.core.player_by_id_mut(bot_id).unwrap().bot_target = Some(10);
        game.core.set_current_player(bot_id);

        game.rules.round_scores.insert(bot_id, 12);
        assert_eq!(game.rules.bot_think(&mut game.core, bot_id).as_deref(), Some("bank"));
        game.rules.round_scores.insert(bot_id, 5);
        assert_eq!(game.rules.bot_think(&mut game.core, bot_id).as_deref(), Some("roll"));
    }

    #[test]
    fn team_mode_scores_jointly() {
        let mut game = new_game();
        game.rules.options.team_mode = "2v2".to_string();
        let host = th::lobby_with_bots(&mut game, "Host", 3);
        game.execute_action(host, "start_game");

        assert_eq!(game.core.teams.teams.len(), 2);
        game.rules.apply_roll(&mut game.core, host, 8);
        game.rules.handle_bank(&mut game.core, host);

        let host_name = game.core.player_by_id(host).unwrap().name.clone();
        let team = game.core.teams.team_of(&host_name).unwrap();
        assert_eq!(team.total_score, 8);
        assert_eq!(team.player_names.len(), 2);
    }

    #[test]
    fn tiebreaker_reseats_only_tied_leaders() {
        let mut game = new_game();
        game.rules.options.target_score = 20;
        let host = th::lobby_with_bots(&mut game, "Host", 2);
        game.execute_action(host, "start_game");

        // Two players tied past the target, one below.
        let ids: Vec<PlayerId> = game.core.players.iter().map(|p| p.id).collect();
        let names: Vec<String> = game.core.players.iter().map(|p| p.name.clone()).collect();
        game.core.teams.add_to_team_score(&names[0], 25);
        game.core.teams.add_to_team_score(&names[1], 25);
        game.core.teams.add_to_team_score(&names[2], 10);

        game.rules.end_round(&mut game.core);
        assert_eq!(game.core.status, GameStatus::Playing, "tie continues the game");
        assert!(game.core.player_by_id(ids[2]).unwrap().is_spectator);
        assert_eq!(game.core.turn_player_ids.len(), 2);
        assert!(!game.core.turn_player_ids.contains(&ids[2]));
    }

    #[test]
    fn single_leader_past_target_wins() {
        let mut game = new_game();
        game.rules.options.target_score = 20;
        let host = th::lobby_with_bots(&mut game, "Host", 1);
        game.execute_action(host, "start_game");

        let host_name = game.core.player_by_id(host).unwrap().name.clone();
        game.core.teams.add_to_team_score(&host_name, 22);
        game.rules.end_round(&mut game.core);
        game.on_tick();

        assert_eq!(game.core.status, GameStatus::Finished);
        let result = th::finished_result(&mut game).expect("result for game with a human");
        assert_eq!(result.winner_name(), Some(host_name.as_str()));
    }
}
