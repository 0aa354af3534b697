//! Threes: roll five dice, keep at least one each roll, lowest total
//! wins. Threes count zero; five sixes shoot the moon for -30.
//!
//! Kept dice lock when the remaining dice are rolled, so every roll
//! commits at least one die. The turn scores automatically once a single
//! die remains.

use std::collections::HashMap;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use parlor_core::action::{Action, ActionSet, Visibility};
use parlor_core::dice::{DiceSet, add_dice_toggle_actions, define_dice_keybinds};
use parlor_core::game::{Game, GameCore, GameStatus, Rules};
use parlor_core::keybind::{Keybind, KeybindMap, KeybindState};
use parlor_core::options::{OptionDef, OptionKind, OptionValue};
use parlor_core::player::{Player, PlayerId};
use parlor_core::result::GameResult;
use parlor_core::ui::{Arg, Text};

pub type ThreesGame = Game<ThreesRules>;

pub fn new_game() -> ThreesGame {
    Game::new(ThreesRules::default())
}

/// Score for shooting the moon (five sixes).
const MOON_SCORE: i64 = -30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreesOptions {
    pub total_rounds: i64,
}

impl Default for ThreesOptions {
    fn default() -> Self {
        Self { total_rounds: 10 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seat {
    pub dice: DiceSet,
    pub turn_score: i64,
    pub total_score: i64,
}

impl Default for Seat {
    fn default() -> Self {
        Self { dice: DiceSet::new(5, 6), turn_score: 0, total_score: 0 }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ThreesRules {
    pub options: ThreesOptions,
    seats: HashMap<PlayerId, Seat>,
}

impl ThreesRules {
    fn seat(&self, player_id: PlayerId) -> &Seat {
        static DEFAULT: std::sync::LazyLock<Seat> = std::sync::LazyLock::new(Seat::default);
        self.seats.get(&player_id).unwrap_or(&DEFAULT)
    }

    fn seat_mut(&mut self, player_id: PlayerId) -> &mut Seat {
        self.seats.entry(player_id).or_default()
    }

    fn handle_roll(&mut self, core: &mut GameCore, player_id: PlayerId) {
        {
            let seat = self.seat(player_id);
            if seat.dice.has_rolled && seat.dice.kept_count() == 0 {
                core.speak_key(player_id, "threes-must-keep");
                return;
            }
        }
        core.play_sound("game_pig/roll.ogg");
        let dice_str = {
            let seat = self.seats.entry(player_id).or_default();
            // Kept dice commit: they lock and sit out the rest of the turn.
            seat.dice.lock_kept();
            seat.dice.roll(core.rng(), false);
            seat.dice.format_values()
        };
        core.broadcast_personal_l(
            player_id,
            "threes-you-rolled",
            "threes-player-rolled",
            vec![("dice", Arg::Str(dice_str))],
        );

        if self.seat(player_id).dice.unlocked_count() <= 1 {
            self.score_turn(core, player_id);
            return;
        }

        let pause = core.rng().random_range(15..=30);
        core.jolt_bot(player_id, pause);
        core.mark_all_menus_dirty();
    }

    fn handle_check_hand(&mut self, core: &mut GameCore, player_id: PlayerId) {
        let seat = self.seat(player_id);
        if !seat.dice.has_rolled {
            core.speak_key(player_id, "threes-no-dice-yet");
            return;
        }
        let dice = seat.dice.format_with_state();
        core.speak_l(player_id, "threes-your-dice", vec![("dice", Arg::Str(dice))]);
    }

    fn score_turn(&mut self, core: &mut GameCore, player_id: PlayerId) {
        let (score, moon) = {
            let seat = self.seat(player_id);
            let six_count = seat.dice.count_value(6);
            if six_count == 5 {
                (MOON_SCORE, true)
            } else {
                (seat.dice.sum_excluding(3), false)
            }
        };

        if moon {
            core.play_sound("game_pig/win.ogg");
            core.broadcast_personal_l(player_id, "threes-you-shot-moon", "threes-shot-moon", vec![]);
        } else {
            core.play_sound("game_pig/bank.ogg");
            core.broadcast_personal_l(
                player_id,
                "threes-you-scored",
                "threes-scored",
                vec![("score", Arg::Int(score))],
            );
        }

        let seat = self.seat_mut(player_id);
        seat.turn_score = score;
        seat.total_score += score;
        self.end_turn(core);
    }

    fn end_turn(&mut self, core: &mut GameCore) {
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
        let mut scores: Vec<(String, i64)> = core
            .players
            .iter()
            .map(|p| (p.name.clone(), self.seat(p.id).total_score))
            .collect();
        scores.sort_by_key(|(_, score)| *score);
        let scores_str =
            scores.iter().map(|(name, score)| format!("{name}: {score}")).collect::<Vec<_>>().join(", ");
        core.broadcast_l(
            "threes-round-scores",
            vec![("round", Arg::from(core.round)), ("scores", Arg::Str(scores_str))],
        );

        if i64::from(core.round) >= self.options.total_rounds {
            self.end_game(core);
        } else {
            self.start_round(core);
        }
    }

    fn start_round(&mut self, core: &mut GameCore) {
        core.round += 1;
        core.broadcast_l(
            "threes-round-start",
            vec![("round", Arg::from(core.round)), ("total", Arg::Int(self.options.total_rounds))],
        );
        let order: Vec<PlayerId> = core.active_players().iter().map(|p| p.id).collect();
        core.set_turn_players(order, false);
        self.start_turn(core);
    }

    fn start_turn(&mut self, core: &mut GameCore) {
        let Some(player) = core.current_player() else { return };
        let id = player.id;
        let is_bot = player.is_bot;
        {
            let seat = self.seat_mut(id);
            seat.dice.reset();
            seat.turn_score = 0;
        }
        core.announce_turn();
        if is_bot {
            let pause = core.rng().random_range(20..=40);
            core.jolt_bot(id, pause);
        }
        core.mark_all_menus_dirty();
    }

    fn end_game(&mut self, core: &mut GameCore) {
        let mut ranked: Vec<(String, i64)> = core
            .players
            .iter()
            .map(|p| (p.name.clone(), self.seat(p.id).total_score))
            .collect();
        ranked.sort_by_key(|(_, score)| *score);

        let Some((_, lowest)) = ranked.first().cloned() else { return };
        let winners: Vec<String> =
            ranked.iter().filter(|(_, s)| *s == lowest).map(|(name, _)| name.clone()).collect();

        if winners.len() == 1 {
            core.play_sound("game_pig/win.ogg");
            core.broadcast_l(
                "threes-winner",
                vec![("player", Arg::Str(winners[0].clone())), ("score", Arg::Int(lowest))],
            );
        } else {
            core.broadcast_l(
                "threes-tie",
                vec![("players", Arg::Str(winners.join(" and "))), ("score", Arg::Int(lowest))],
            );
        }
        core.request_finish(true);
    }

    /// Choose which dice the bot keeps this roll: chase the moon with a
    /// fistful of sixes, otherwise hold threes, then the lowest faces.
    fn bot_decide_keepers(&mut self, player_id: PlayerId) {
        let seat = self.seat_mut(player_id);
        let dice = &mut seat.dice;

        let mut by_value: HashMap<u8, Vec<usize>> = HashMap::new();
        for i in 0..dice.num_dice() {
            if !dice.is_locked(i) && !dice.is_kept(i) {
                if let Some(value) = dice.value(i) {
                    by_value.entry(value).or_default().push(i);
                }
            }
        }

        let locked_sixes = (0..dice.num_dice())
            .filter(|&i| dice.is_locked(i) && dice.value(i) == Some(6))
            .count();
        let free_sixes = by_value.get(&6).cloned().unwrap_or_default();
        if (locked_sixes >= 3 || free_sixes.len() + locked_sixes >= 4) && !free_sixes.is_empty() {
            for i in free_sixes {
                dice.keep(i);
            }
            return;
        }

        for value in [3u8, 1, 2] {
            if let Some(indices) = by_value.get(&value) {
                for &i in indices {
                    dice.keep(i);
                }
                return;
            }
        }
        for value in [4u8, 5, 6] {
            if let Some(indices) = by_value.get(&value) {
                dice.keep(indices[0]);
                return;
            }
        }
    }
}

impl Rules for ThreesRules {
    fn game_type(&self) -> &'static str {
        "threes"
    }

    fn display_name(&self) -> &'static str {
        "Threes"
    }

    fn category(&self) -> &'static str {
        "category-dice-games"
    }

    fn max_players(&self) -> usize {
        8
    }

    fn turn_sound(&self) -> &'static str {
        "game_3cardpoker/turn.ogg"
    }

    fn turn_action_set(&self, _core: &GameCore, _player: &Player) -> Option<ActionSet> {
        let mut set = ActionSet::new("turn");
        add_dice_toggle_actions(&mut set, 5);
        set.add(Action::new("roll", Text::key("threes-roll"), "roll", "roll", "roll"));
        set.add(Action::new("bank", Text::key("threes-bank"), "bank", "bank", "bank"));
        set.add(Action::new(
            "check_hand",
            Text::key("threes-check-hand"),
            "check_hand",
            "check_hand",
            "check_hand",
        ));
        Some(set)
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
        keybinds.define(active("Bank and end turn", "b", "bank"));
        keybinds.define(active("Check hand", "h", "check_hand"));
        define_dice_keybinds(keybinds);
    }

    fn options(&self) -> Vec<OptionDef> {
        vec![OptionDef {
            name: "total_rounds",
            label: "threes-set-rounds",
            prompt: "threes-enter-rounds",
            kind: OptionKind::Int { min: 1, max: 20, value_key: "rounds" },
        }]
    }

    fn option_value(&self, name: &str) -> Option<OptionValue> {
        match name {
            "total_rounds" => Some(OptionValue::Int(self.options.total_rounds)),
            _ => None,
        }
    }

    fn set_option(&mut self, name: &str, value: OptionValue) {
        if name == "total_rounds" {
            if let Some(rounds) = value.as_int() {
                self.options.total_rounds = rounds;
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

    fn bot_think(&mut self, _core: &mut GameCore, player_id: PlayerId) -> Option<String> {
        let seat = self.seat(player_id);
        if !seat.dice.has_rolled {
            return Some("roll".to_string());
        }
        if seat.dice.unlocked_count() <= 1 || seat.dice.all_decided() {
            return Some("bank".to_string());
        }
        self.bot_decide_keepers(player_id);
        if self.seat(player_id).dice.kept_count() > 0 {
            return Some("roll".to_string());
        }
        None
    }

    fn action_enabled(&self, core: &GameCore, player: &Player, hook: &str) -> Option<&'static str> {
        let turn_guard = || {
            if core.status != GameStatus::Playing {
                Some("action-not-playing")
            } else if !core.is_current(player.id) {
                Some("action-not-your-turn")
            } else {
                None
            }
        };
        match hook {
            "roll" => turn_guard().or_else(|| {
                let dice = &self.seat(player.id).dice;
                if !dice.has_rolled {
                    None
                } else if dice.unlocked_count() <= 1 {
                    Some("threes-must-bank")
                } else if dice.kept_count() == 0 {
                    Some("threes-must-keep")
                } else {
                    None
                }
            }),
            "bank" => turn_guard().or_else(|| {
                let dice = &self.seat(player.id).dice;
                if !dice.has_rolled {
                    Some("threes-roll-first")
                } else if !dice.all_decided() && dice.unlocked_count() > 1 {
                    Some("threes-keep-all-first")
                } else {
                    None
                }
            }),
            "check_hand" => {
                if core.status != GameStatus::Playing {
                    Some("action-not-playing")
                } else if !self.seat(player.id).dice.has_rolled {
                    Some("threes-no-dice-yet")
                } else {
                    None
                }
            },
            hook if hook.starts_with("toggle_die_") => {
                // The shared playing/turn/rolled/locked checks have
                // already passed; only the last-die rule is ours.
                if self.seat(player.id).dice.unlocked_count() <= 1 {
                    Some("threes-last-die")
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
                if on_turn {
                    Visibility::Visible
                } else {
                    Visibility::Hidden
                }
            },
            "bank" => {
                if on_turn && self.seat(player.id).dice.has_rolled {
                    Visibility::Visible
                } else {
                    Visibility::Hidden
                }
            },
            "check_hand" => Visibility::Hidden,
            _ => Visibility::Visible,
        }
    }

    fn handle_action(&mut self, core: &mut GameCore, player_id: PlayerId, hook: &str, _input: Option<&str>) {
        match hook {
            "roll" => self.handle_roll(core, player_id),
            "bank" => self.score_turn(core, player_id),
            "check_hand" => self.handle_check_hand(core, player_id),
            _ => {},
        }
    }

    fn player_created(&mut self, _core: &GameCore, player_id: PlayerId) {
        self.seats.insert(player_id, Seat::default());
    }

    fn player_removed(&mut self, player_id: PlayerId) {
        self.seats.remove(&player_id);
    }

    fn dice(&self, player_id: PlayerId) -> Option<&DiceSet> {
        self.seats.get(&player_id).map(|seat| &seat.dice)
    }

    fn dice_mut(&mut self, player_id: PlayerId) -> Option<&mut DiceSet> {
        self.seats.get_mut(&player_id).map(|seat| &mut seat.dice)
    }

    fn custom_result_data(&self, core: &GameCore) -> serde_json::Map<String, Value> {
        let mut ranked: Vec<(String, i64)> = core
            .players
            .iter()
            .map(|p| (p.name.clone(), self.seat(p.id).total_score))
            .collect();
        ranked.sort_by_key(|(_, score)| *score);

        let mut final_scores = serde_json::Map::new();
        for (name, score) in &ranked {
            final_scores.insert(name.clone(), Value::from(*score));
        }
        let mut data = serde_json::Map::new();
        if let Some((winner, score)) = ranked.first() {
            data.insert("winner_name".to_string(), Value::String(winner.clone()));
            data.insert("winner_score".to_string(), Value::from(*score));
        }
        data.insert("final_scores".to_string(), Value::Object(final_scores));
        data.insert("rounds_played".to_string(), Value::from(core.round));
        data.insert("total_rounds".to_string(), Value::from(self.options.total_rounds));
        data.insert("scoring_mode".to_string(), Value::String("lowest_wins".to_string()));
        data
    }

    fn format_end_screen(&self, core: &GameCore, _result: &GameResult) -> Vec<Text> {
        let mut ranked: Vec<(String, i64)> = core
            .players
            .iter()
            .map(|p| (p.name.clone(), self.seat(p.id).total_score))
            .collect();
        ranked.sort_by_key(|(_, score)| *score);

        let mut lines = vec![Text::key("game-final-scores")];
        for (rank, (name, score)) in ranked.iter().enumerate() {
            lines.push(Text::raw(format!("{}. {name}: {score} points", rank + 1)));
        }
        lines
    }
}
