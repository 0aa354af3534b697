//! Farkle: roll six dice, take scoring combinations, push your luck.
//!
//! After each roll the player must take at least one combination before
//! rolling the remaining dice; a roll with nothing to take is a farkle
//! and wipes the turn score. Taking all six dice is "hot dice" and
//! restarts the set. First player past the target score at the end of a
//! round wins.

mod combos;

pub use combos::{Combo, available_combos, has_scoring_dice};

use std::collections::HashMap;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use parlor_core::action::{Action, ActionSet, Visibility};
use parlor_core::game::{Game, GameCore, GameStatus, Rules};
use parlor_core::keybind::{Keybind, KeybindMap, KeybindState};
use parlor_core::options::{OptionDef, OptionKind, OptionValue};
use parlor_core::player::{Player, PlayerId};
use parlor_core::result::{GameResult, LeaderboardAggregate, LeaderboardType};
use parlor_core::ui::{Arg, Text};

pub type FarkleGame = Game<FarkleRules>;

pub fn new_game() -> FarkleGame {
    Game::new(FarkleRules::default())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarkleOptions {
    pub target_score: i64,
}

impl Default for FarkleOptions {
    fn default() -> Self {
        Self { target_score: 500 }
    }
}

/// Per-seat Farkle state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Seat {
    pub score: i64,
    /// Points accumulated this turn, lost on a farkle.
    pub turn_score: i64,
    /// Dice still on the table, available to take.
    pub current_roll: Vec<u8>,
    /// Dice set aside by taken combos this turn.
    pub taken_dice: Vec<u8>,
    /// A combo has been taken since the last roll, so rolling is legal.
    pub has_taken_combo: bool,
    pub turns_taken: u32,
    pub best_turn: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FarkleRules {
    pub options: FarkleOptions,
    seats: HashMap<PlayerId, Seat>,
}

impl FarkleRules {
    fn seat(&self, player_id: PlayerId) -> Seat {
        self.seats.get(&player_id).cloned().unwrap_or_default()
    }

    fn seat_mut(&mut self, player_id: PlayerId) -> &mut Seat {
        self.seats.entry(player_id).or_default()
    }

    fn can_roll(seat: &Seat) -> bool {
        seat.current_roll.is_empty() || seat.has_taken_combo
    }

    fn can_bank(seat: &Seat) -> bool {
        seat.turn_score > 0
            && (seat.current_roll.is_empty() || !has_scoring_dice(&seat.current_roll))
    }

    fn roll_dice_count(seat: &Seat) -> usize {
        if !seat.current_roll.is_empty() {
            return seat.current_roll.len();
        }
        let remaining = 6 - seat.taken_dice.len();
        if remaining == 0 { 6 } else { remaining }
    }

    /// Build a turn set for a roll: one action per available combo (best
    /// first), then roll, bank, and the check-turn-score keybind action.
    fn build_turn_set(roll: &[u8]) -> ActionSet {
        let mut set = ActionSet::new("turn");
        for (combo, points) in available_combos(roll) {
            let id = combo.action_id();
            set.add(Action::new(
                id.clone(),
                Text::with_args(
                    "farkle-take-combo",
                    vec![("combo", Arg::Str(combo.name())), ("points", Arg::Int(points))],
                ),
                id.clone(),
                "score",
                "score",
            ));
        }
        set.add(
            Action::new(
                "roll",
                Text::with_args("farkle-roll", vec![("count", Arg::Int(6))]),
                "roll",
                "roll",
                "roll",
            )
            .with_label_hook("roll"),
        );
        set.add(
            Action::new(
                "bank",
                Text::with_args("farkle-bank", vec![("points", Arg::Int(0))]),
                "bank",
                "bank",
                "bank",
            )
            .with_label_hook("bank"),
        );
        set.add(Action::new(
            "check_turn_score",
            Text::key("farkle-check-turn"),
            "check_turn_score",
            "check_turn_score",
            "check_turn_score",
        ));
        set
    }

    fn rebuild_turn_set(&self, core: &mut GameCore, player_id: PlayerId) {
        let seat = self.seat(player_id);
        let set = Self::build_turn_set(&seat.current_roll);
        if let Some(existing) = core.action_set_mut(player_id, "turn") {
            *existing = set;
        }
    }

    fn handle_roll(&mut self, core: &mut GameCore, player_id: PlayerId) {
        let seat = self.seat_mut(player_id);
        let count = if seat.current_roll.is_empty() {
            let remaining = 6 - seat.taken_dice.len();
            if remaining == 0 {
                // Hot dice: all six are back in hand.
                seat.taken_dice.clear();
                6
            } else {
                remaining
            }
        } else {
            seat.current_roll.len()
        };

        let name = core.player_by_id(player_id).map(|p| p.name.clone()).unwrap_or_default();
        core.broadcast_l(
            "farkle-rolls",
            vec![("player", Arg::Str(name.clone())), ("count", Arg::Int(count as i64))],
        );
        core.play_sound("game_pig/roll.ogg");
        let pause = core.rng().random_range(10..=20);
        core.jolt_bot(player_id, pause);

        let mut roll: Vec<u8> = (0..count).map(|_| core.rng().random_range(1..=6)).collect();
        roll.sort_unstable();
        let dice_str = roll.iter().map(u8::to_string).collect::<Vec<_>>().join(", ");
        core.broadcast_l("farkle-roll-result", vec![("dice", Arg::Str(dice_str))]);

        let busted = !has_scoring_dice(&roll);
        let seat = self.seat_mut(player_id);
        seat.current_roll = roll;

        if busted {
            let lost = seat.turn_score;
            seat.turns_taken += 1;
            seat.turn_score = 0;
            seat.current_roll.clear();
            seat.taken_dice.clear();
            core.play_sound("game_farkle/farkle.ogg");
            core.broadcast_l(
                "farkle-busted",
                vec![("player", Arg::Str(name)), ("points", Arg::Int(lost))],
            );
            self.end_turn(core);
            return;
        }

        seat.has_taken_combo = false;
        self.rebuild_turn_set(core, player_id);
        core.mark_player_menu_dirty(player_id);
    }

    fn handle_take_combo(&mut self, core: &mut GameCore, player_id: PlayerId, action_id: &str) {
        let Some(combo) = Combo::from_action_id(action_id) else { return };
        {
            let seat = self.seat(player_id);
            if !combo.is_present(&seat.current_roll) {
                return;
            }
        }
        let pause = core.rng().random_range(8..=12);
        core.jolt_bot(player_id, pause);

        let points = combo.points();
        let seat = self.seat_mut(player_id);
        let mut roll = std::mem::take(&mut seat.current_roll);
        combo.remove_dice(&mut roll, &mut seat.taken_dice);
        seat.current_roll = roll;
        seat.turn_score += points;
        seat.has_taken_combo = true;
        let hot_dice = seat.taken_dice.len() == 6 && seat.current_roll.is_empty();

        core.play_sound("game_farkle/takepoint.ogg");
        core.schedule_sound(combo.sound(), 2);
        core.broadcast_personal_l(
            player_id,
            "farkle-you-take-combo",
            "farkle-takes-combo",
            vec![("combo", Arg::Str(combo.name())), ("points", Arg::Int(points))],
        );

        if hot_dice {
            core.broadcast_l("farkle-hot-dice", vec![]);
            core.play_sound("game_farkle/hotdice.ogg");
        }

        self.rebuild_turn_set(core, player_id);
        core.mark_player_menu_dirty(player_id);
    }

    fn handle_bank(&mut self, core: &mut GameCore, player_id: PlayerId) {
        let name = core.player_by_id(player_id).map(|p| p.name.clone()).unwrap_or_default();
        let seat = self.seat_mut(player_id);
        let banked = seat.turn_score;
        seat.turns_taken += 1;
        seat.best_turn = seat.best_turn.max(banked);
        seat.score += banked;
        let total = seat.score;
        seat.turn_score = 0;
        seat.current_roll.clear();
        seat.taken_dice.clear();
        seat.has_taken_combo = false;

        core.teams.add_to_team_score(&name, banked);
        let which = core.rng().random_range(1..=3);
        core.play_sound(&format!("game_farkle/bank{which}.ogg"));
        core.broadcast_l(
            "farkle-banks",
            vec![("player", Arg::Str(name)), ("points", Arg::Int(banked)), ("total", Arg::Int(total))],
        );
        self.end_turn(core);
    }

    fn handle_check_turn_score(&mut self, core: &mut GameCore, player_id: PlayerId) {
        let line = match core.current_player() {
            Some(current) => {
                let seat = self.seat(current.id);
                Text::with_args(
                    "farkle-turn-score",
                    vec![("player", Arg::Str(current.name.clone())), ("points", Arg::Int(seat.turn_score))],
                )
            },
            None => Text::key("game-no-turn"),
        };
        core.status_box(player_id, vec![line]);
    }

    fn start_round(&mut self, core: &mut GameCore) {
        core.round += 1;
        let order: Vec<PlayerId> = core.active_players().iter().map(|p| p.id).collect();
        core.set_turn_players(order, false);
        core.broadcast_l("game-round-start", vec![("round", Arg::from(core.round))]);
        self.start_turn(core);
    }

    fn start_turn(&mut self, core: &mut GameCore) {
        let Some(player) = core.current_player() else { return };
        let id = player.id;
        let seat = self.seat_mut(id);
        seat.turn_score = 0;
        seat.current_roll.clear();
        seat.taken_dice.clear();
        seat.has_taken_combo = false;
        self.rebuild_turn_set(core, id);
        core.announce_turn();
        core.mark_all_menus_dirty();
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
            let score = self.seat(player.id).score;
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
                core.broadcast_l(
                    "farkle-winner",
                    vec![("player", Arg::Str(winners[0].1.clone())), ("score", Arg::Int(winners[0].2))],
                );
                core.request_finish(true);
            },
            _ => {
                let names =
                    winners.iter().map(|(_, name, _)| name.clone()).collect::<Vec<_>>().join(", ");
                core.broadcast_l("farkle-winners-tie", vec![("players", Arg::Str(names))]);
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

impl Rules for FarkleRules {
    fn game_type(&self) -> &'static str {
        "farkle"
    }

    fn display_name(&self) -> &'static str {
        "Farkle"
    }

    fn category(&self) -> &'static str {
        "category-dice-games"
    }

    fn turn_action_set(&self, _core: &GameCore, player: &Player) -> Option<ActionSet> {
        let seat = self.seats.get(&player.id).cloned().unwrap_or_default();
        Some(Self::build_turn_set(&seat.current_roll))
    }

    fn setup_keybinds(&self, keybinds: &mut KeybindMap) {
        let active = |name: &str, key: &str, action: &str| Keybind {
            name: name.to_string(),
            key: key.to_string(),
            actions: vec![action.to_string()],
            requires_focus: false,
            state: KeybindState::Active,
            players: Vec::new(),
            include_spectators: false,
        };
        keybinds.define(active("Roll dice", "r", "roll"));
        keybinds.define(active("Bank points", "b", "bank"));
        keybinds.define(active("Check turn score", "c", "check_turn_score"));
    }

    fn options(&self) -> Vec<OptionDef> {
        vec![OptionDef {
            name: "target_score",
            label: "farkle-set-target-score",
            prompt: "farkle-enter-target-score",
            kind: OptionKind::Int { min: 500, max: 5000, value_key: "score" },
        }]
    }

    fn option_value(&self, name: &str) -> Option<OptionValue> {
        match name {
            "target_score" => Some(OptionValue::Int(self.options.target_score)),
            _ => None,
        }
    }

    fn set_option(&mut self, name: &str, value: OptionValue) {
        if name == "target_score" {
            if let Some(target) = value.as_int() {
                self.options.target_score = target;
            }
        }
    }

    fn on_start(&mut self, core: &mut GameCore) {
        core.game_active = true;
        core.round = 0;

        let names: Vec<String> = core.active_players().iter().map(|p| p.name.clone()).collect();
        core.teams.team_mode = "individual".to_string();
        core.teams.setup_teams(&names);

        let order: Vec<PlayerId> = core.active_players().iter().map(|p| p.id).collect();
        for id in &order {
            self.seats.insert(*id, Seat::default());
        }
        core.set_turn_players(order, false);
        core.play_music("game_pig/mus.ogg");
        self.start_round(core);
    }

    fn bot_think(&mut self, core: &mut GameCore, player_id: PlayerId) -> Option<String> {
        let seat = self.seat(player_id);

        // Take the best available combo first.
        if let Some((combo, _)) = available_combos(&seat.current_roll).first() {
            return Some(combo.action_id());
        }

        let roll_enabled = Self::can_roll(&seat);
        let bank_enabled = Self::can_bank(&seat);

        if roll_enabled {
            let mut dice_remaining = 6 - seat.taken_dice.len();
            if dice_remaining == 0 {
                dice_remaining = 6;
            }

            // If an opponent already crossed the target, keep pushing
            // until this bot can actually beat them.
            let score_to_beat = core
                .players
                .iter()
                .filter(|p| p.id != player_id)
                .map(|p| self.seat(p.id).score)
                .filter(|&score| score >= self.options.target_score)
                .max();
            if let Some(best) = score_to_beat {
                if seat.score + seat.turn_score <= best {
                    return Some("roll".to_string());
                }
            }

            if seat.turn_score >= 35 && bank_enabled {
                let bank_probability = match dice_remaining {
                    6 => 0.40,
                    5 => 0.50,
                    4 => 0.55,
                    3 => 0.65,
                    2 => 0.70,
                    _ => 0.75,
                };
                if core.rng().random::<f64>() < bank_probability {
                    return Some("bank".to_string());
                }
            }
            return Some("roll".to_string());
        }

        if bank_enabled {
            return Some("bank".to_string());
        }
        None
    }

    fn action_enabled(&self, core: &GameCore, player: &Player, hook: &str) -> Option<&'static str> {
        let turn_guard = || {
            if core.status != GameStatus::Playing {
                Some("action-not-playing")
            } else if !core.is_current(player.id) {
                Some("action-not-your-turn")
            } else if player.is_spectator {
                Some("action-spectator")
            } else {
                None
            }
        };
        match hook {
            "roll" => turn_guard().or_else(|| {
                if Self::can_roll(&self.seat(player.id)) {
                    None
                } else {
                    Some("farkle-must-take-combo")
                }
            }),
            "bank" => turn_guard().or_else(|| {
                if Self::can_bank(&self.seat(player.id)) {
                    None
                } else {
                    Some("farkle-cannot-bank")
                }
            }),
            "score" => turn_guard(),
            "check_turn_score" => {
                if core.status != GameStatus::Playing {
                    Some("action-not-playing")
                } else {
                    None
                }
            },
            _ => None,
        }
    }

    fn action_hidden(&self, core: &GameCore, player: &Player, hook: &str) -> Visibility {
        let on_turn = core.status == GameStatus::Playing && core.is_current(player.id);
        match hook {
            "roll" => {
                if on_turn && Self::can_roll(&self.seat(player.id)) {
                    Visibility::Visible
                } else {
                    Visibility::Hidden
                }
            },
            "bank" => {
                if on_turn && Self::can_bank(&self.seat(player.id)) {
                    Visibility::Visible
                } else {
                    Visibility::Hidden
                }
            },
            "score" => {
                if on_turn {
                    Visibility::Visible
                } else {
                    Visibility::Hidden
                }
            },
            "check_turn_score" => Visibility::Hidden,
            _ => Visibility::Visible,
        }
    }

    fn action_label(&self, _core: &GameCore, player: &Player, hook: &str, _action_id: &str) -> Option<Text> {
        let seat = self.seat(player.id);
        match hook {
            "roll" => Some(Text::with_args(
                "farkle-roll",
                vec![("count", Arg::Int(Self::roll_dice_count(&seat) as i64))],
            )),
            "bank" => {
                Some(Text::with_args("farkle-bank", vec![("points", Arg::Int(seat.turn_score))]))
            },
            _ => None,
        }
    }

    fn handle_action(&mut self, core: &mut GameCore, player_id: PlayerId, hook: &str, _input: Option<&str>) {
        match hook {
            "roll" => self.handle_roll(core, player_id),
            "bank" => self.handle_bank(core, player_id),
            "check_turn_score" => self.handle_check_turn_score(core, player_id),
            _ => {
                if hook.starts_with("score_") {
                    self.handle_take_combo(core, player_id, hook);
                }
            },
        }
    }

    fn player_created(&mut self, _core: &GameCore, player_id: PlayerId) {
        self.seats.insert(player_id, Seat::default());
    }

    fn player_removed(&mut self, player_id: PlayerId) {
        self.seats.remove(&player_id);
    }

    fn custom_result_data(&self, core: &GameCore) -> serde_json::Map<String, Value> {
        let mut ranked: Vec<(&Player, Seat)> = core
            .active_players()
            .into_iter()
            .map(|p| (p, self.seat(p.id)))
            .collect();
        ranked.sort_by_key(|(_, seat)| std::cmp::Reverse(seat.score));

        let mut final_scores = serde_json::Map::new();
        let mut player_stats = serde_json::Map::new();
        for (player, seat) in &ranked {
            final_scores.insert(player.name.clone(), Value::from(seat.score));
            let mut stats = serde_json::Map::new();
            stats.insert("turns_taken".to_string(), Value::from(seat.turns_taken));
            stats.insert("best_turn".to_string(), Value::from(seat.best_turn));
            stats.insert("total_score".to_string(), Value::from(seat.score));
            player_stats.insert(player.name.clone(), Value::Object(stats));
        }

        let mut data = serde_json::Map::new();
        if let Some((winner, seat)) = ranked.first() {
            data.insert("winner_name".to_string(), Value::String(winner.name.clone()));
            data.insert("winner_score".to_string(), Value::from(seat.score));
        }
        data.insert("final_scores".to_string(), Value::Object(final_scores));
        data.insert("player_stats".to_string(), Value::Object(player_stats));
        data.insert("rounds_played".to_string(), Value::from(core.round));
        data.insert("target_score".to_string(), Value::from(self.options.target_score));
        data
    }

    fn format_end_screen(&self, core: &GameCore, _result: &GameResult) -> Vec<Text> {
        let mut ranked: Vec<(&Player, Seat)> =
            core.active_players().into_iter().map(|p| (p, self.seat(p.id))).collect();
        ranked.sort_by_key(|(_, seat)| std::cmp::Reverse(seat.score));

        let mut lines = vec![Text::key("game-final-scores")];
        for (rank, (player, seat)) in ranked.iter().enumerate() {
            lines.push(Text::raw(format!("{}. {}: {} points", rank + 1, player.name, seat.score)));
        }
        lines
    }

    fn leaderboard_types(&self) -> Vec<LeaderboardType> {
        vec![
            LeaderboardType {
                id: "avg_points_per_turn".to_string(),
                path: "player_stats.{player_name}.total_score".to_string(),
                denominator_path: Some("player_stats.{player_name}.turns_taken".to_string()),
                aggregate: LeaderboardAggregate::Sum,
            },
            LeaderboardType {
                id: "best_single_turn".to_string(),
                path: "player_stats.{player_name}.best_turn".to_string(),
                denominator_path: None,
                aggregate: LeaderboardAggregate::Max,
            },
        ]
    }
}
