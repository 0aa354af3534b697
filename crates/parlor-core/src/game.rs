//! The game framework.
//!
//! [`GameCore`] is the serializable root of every game: players, turn
//! rotation, sound scheduler, action sets, teams, options-driven lobby
//! state. Concrete games implement [`Rules`] and are composed into
//! [`Game<R>`], which carries the framework behavior: declarative action
//! resolution and execution, packet event dispatch, bot cadence, lobby
//! lifecycle, and the finish/save flows. The server drives games through
//! the object-safe [`GameHandle`].
//!
//! Action hooks are plain strings resolved through a fixed dispatch table:
//! framework hooks are matched here, everything else is routed to the
//! game's own match in its `Rules` impl. Serialized games carry only the
//! hook ids, so saves stay portable.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::{Action, ActionSet, InputRequest, ResolvedAction, Visibility};
use crate::keybind::{Keybind, KeybindMap, KeybindState, normalize_key};
use crate::options::{OptionDef, OptionKind, OptionValue, build_options_action_set};
use crate::player::{Player, PlayerId, pick_bot_name};
use crate::prefs::{DiceKeepingStyle, Preferences};
use crate::protocol::ClientPacket;
use crate::result::{GameResult, LeaderboardType, PlayerResult};
use crate::team::TeamManager;
use crate::time::now_iso8601;
use crate::ui::{Arg, EscapeBehavior, MenuItem, Outbox, Text, UiEvent};

/// Ticks per second of the scheduler; one tick is 50 ms.
pub const TICKS_PER_SECOND: u64 = 20;

/// Number of headless simulations behind one duration estimate.
pub const NUM_ESTIMATE_SIMULATIONS: usize = 10;

/// Lifecycle phase of a table's game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    #[default]
    Waiting,
    Playing,
    Finished,
}

impl GameStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GameStatus::Waiting => "waiting",
            GameStatus::Playing => "playing",
            GameStatus::Finished => "finished",
        }
    }
}

/// Context passed to handlers, carrying menu focus for keybind-triggered
/// actions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionContext {
    pub menu_item_id: Option<String>,
    pub menu_index: Option<usize>,
    pub from_keybind: bool,
}

/// A user (human or bot stand-in) attached to a seat. Runtime-only;
/// reattached on load and on reconnect.
#[derive(Debug, Clone)]
pub struct UserAttachment {
    pub user_id: PlayerId,
    pub username: String,
    pub is_bot: bool,
    pub prefs: Preferences,
}

impl UserAttachment {
    pub fn bot(user_id: PlayerId, name: impl Into<String>) -> Self {
        Self { user_id, username: name.into(), is_bot: true, prefs: Preferences::default() }
    }
}

/// Lifecycle requests a game raises toward its table; drained by the
/// table manager after each dispatch.
#[derive(Debug, Clone)]
pub enum TableEvent {
    /// The game asked for its table to be torn down.
    Destroyed,
    /// Host asked to save the table (save-and-close).
    SaveRequested { username: String },
    /// A finished game produced a persistable result.
    GameFinished(GameResult),
    /// The estimate action needs simulation subprocesses spawned.
    EstimateRequested { game_type: String, options: Vec<(String, String)>, bots: usize },
}

/// Shared collection bucket the estimation subprocess callbacks fill;
/// polled from `on_tick`.
#[derive(Debug, Default)]
pub struct EstimatePool {
    pub expected: usize,
    pub finished: usize,
    pub ticks: Vec<u64>,
    pub errors: Vec<String>,
}

pub type SharedEstimatePool = Arc<Mutex<EstimatePool>>;

/// Read access to skill ratings for the predict-outcomes action.
pub trait RatingView: Send {
    /// (mu, sigma) for a player, defaults if absent.
    fn rating(&self, game_type: &str, player: PlayerId) -> (f64, f64);
    fn win_probability(&self, game_type: &str, a: PlayerId, b: PlayerId) -> f64;
}

/// A sound queued for a future tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledSound {
    pub tick: u64,
    pub name: String,
    pub volume: i32,
    pub pan: i32,
    pub pitch: i32,
}

#[derive(Debug, Default)]
struct MenuDirty {
    all: bool,
    players: HashSet<PlayerId>,
}

/// Runtime-only game state, rebuilt when a saved game is loaded.
pub struct GameRuntime {
    pub attachments: HashMap<PlayerId, UserAttachment>,
    pub keybinds: KeybindMap,
    /// player -> action id awaiting menu/editbox input.
    pub pending_actions: HashMap<PlayerId, String>,
    action_context: HashMap<PlayerId, ActionContext>,
    pub status_box_open: HashSet<PlayerId>,
    pub actions_menu_open: HashSet<PlayerId>,
    pub destroyed: bool,
    finish_requested: Option<bool>,
    menus_dirty: MenuDirty,
    pub outbox: Outbox,
    pub events: Vec<TableEvent>,
    pub rng: StdRng,
    pub estimate_running: bool,
    pub estimate_pool: Option<SharedEstimatePool>,
    pub ratings: Option<Box<dyn RatingView>>,
}

impl Default for GameRuntime {
    fn default() -> Self {
        Self {
            attachments: HashMap::new(),
            keybinds: KeybindMap::default(),
            pending_actions: HashMap::new(),
            action_context: HashMap::new(),
            status_box_open: HashSet::new(),
            actions_menu_open: HashSet::new(),
            destroyed: false,
            finish_requested: None,
            menus_dirty: MenuDirty::default(),
            outbox: Outbox::default(),
            events: Vec::new(),
            rng: StdRng::from_os_rng(),
            estimate_running: false,
            estimate_pool: None,
            ratings: None,
        }
    }
}

/// The serializable root shared by all games. Every field needed to
/// resume after a restart is here; `runtime` is rebuilt on load.
#[derive(Serialize, Deserialize)]
pub struct GameCore {
    #[serde(default)]
    pub players: Vec<Player>,
    #[serde(default)]
    pub round: u32,
    #[serde(default)]
    pub game_active: bool,
    #[serde(default)]
    pub status: GameStatus,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub current_music: String,
    #[serde(default)]
    pub current_ambience: String,
    #[serde(default)]
    pub turn_index: usize,
    #[serde(default = "default_direction")]
    pub turn_direction: i32,
    #[serde(default)]
    pub turn_skip_count: u32,
    #[serde(default)]
    pub turn_player_ids: Vec<PlayerId>,
    #[serde(default)]
    pub scheduled_sounds: Vec<ScheduledSound>,
    #[serde(default)]
    pub sound_tick: u64,
    #[serde(default)]
    pub action_sets: HashMap<PlayerId, Vec<ActionSet>>,
    #[serde(default)]
    pub teams: TeamManager,
    /// Sound played to the player whose turn begins.
    #[serde(default)]
    pub turn_sound_name: String,
    #[serde(skip)]
    pub runtime: GameRuntime,
}

fn default_direction() -> i32 {
    1
}

impl Default for GameCore {
    fn default() -> Self {
        Self {
            players: Vec::new(),
            round: 0,
            game_active: false,
            status: GameStatus::Waiting,
            host: String::new(),
            current_music: String::new(),
            current_ambience: String::new(),
            turn_index: 0,
            turn_direction: 1,
            turn_skip_count: 0,
            turn_player_ids: Vec::new(),
            scheduled_sounds: Vec::new(),
            sound_tick: 0,
            action_sets: HashMap::new(),
            teams: TeamManager::default(),
            turn_sound_name: "turn.ogg".to_string(),
            runtime: GameRuntime::default(),
        }
    }
}

impl GameCore {
    // ----- players -----

    pub fn player_by_id(&self, id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn player_by_id_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    pub fn player_by_name(&self, name: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.name == name)
    }

    /// Players who are actually playing (not spectating).
    pub fn active_players(&self) -> Vec<&Player> {
        self.players.iter().filter(|p| !p.is_spectator).collect()
    }

    pub fn active_player_count(&self) -> usize {
        self.players.iter().filter(|p| !p.is_spectator).count()
    }

    pub fn human_count(&self) -> usize {
        self.players.iter().filter(|p| !p.is_bot).count()
    }

    pub fn bot_count(&self) -> usize {
        self.players.iter().filter(|p| p.is_bot).count()
    }

    // ----- turn rotation -----

    pub fn current_player_id(&self) -> Option<PlayerId> {
        if self.turn_player_ids.is_empty() {
            return None;
        }
        Some(self.turn_player_ids[self.turn_index % self.turn_player_ids.len()])
    }

    pub fn current_player(&self) -> Option<&Player> {
        self.current_player_id().and_then(|id| self.player_by_id(id))
    }

    pub fn is_current(&self, player_id: PlayerId) -> bool {
        self.current_player_id() == Some(player_id)
    }

    pub fn set_current_player(&mut self, player_id: PlayerId) {
        if let Some(index) = self.turn_player_ids.iter().position(|&id| id == player_id) {
            self.turn_index = index;
        }
    }

    /// Store the turn order. Resets the cursor unless `keep_cursor`.
    pub fn set_turn_players(&mut self, ids: Vec<PlayerId>, keep_cursor: bool) {
        self.turn_player_ids = ids;
        if !keep_cursor {
            self.turn_index = 0;
        }
    }

    fn step_cursor(&mut self) {
        let len = self.turn_player_ids.len() as i64;
        if len == 0 {
            return;
        }
        self.turn_index =
            (self.turn_index as i64 + i64::from(self.turn_direction)).rem_euclid(len) as usize;
    }

    /// Advance to the next turn, consuming queued skips first. Marks all
    /// menus for rebuild; announces unless `announce` is false.
    pub fn advance_turn(&mut self, announce: bool) -> Option<PlayerId> {
        if self.turn_player_ids.is_empty() {
            return None;
        }
        let mut skipped = Vec::new();
        while self.turn_skip_count > 0 {
            self.turn_skip_count -= 1;
            self.step_cursor();
            if let Some(player) = self.current_player() {
                skipped.push(player.name.clone());
            }
        }
        for name in skipped {
            self.broadcast_l("game-player-skipped", vec![("player", Arg::Str(name))]);
        }
        self.step_cursor();
        if announce {
            self.announce_turn();
        }
        self.mark_all_menus_dirty();
        self.current_player_id()
    }

    pub fn skip_next_players(&mut self, count: u32) {
        self.turn_skip_count += count;
    }

    pub fn reverse_turn_direction(&mut self) {
        self.turn_direction = -self.turn_direction;
    }

    pub fn reset_turn_order(&mut self, announce: bool) {
        self.turn_index = 0;
        self.turn_direction = 1;
        self.turn_skip_count = 0;
        if announce {
            self.announce_turn();
        }
    }

    /// Speak the turn-start line to everyone and play the turn sound to
    /// the player whose turn begins (subject to their preference).
    pub fn announce_turn(&mut self) {
        let Some(player) = self.current_player() else { return };
        let id = player.id;
        let name = player.name.clone();
        let sound = self.turn_sound_name.clone();
        self.runtime.outbox.push(id, UiEvent::TurnSound { name: sound });
        self.broadcast_l("game-turn-start", vec![("player", Arg::Str(name))]);
    }

    // ----- sound scheduler -----

    pub fn schedule_sound(&mut self, name: &str, delay_ticks: u64) {
        self.schedule_sound_full(name, delay_ticks, 100, 0, 100);
    }

    pub fn schedule_sound_full(&mut self, name: &str, delay_ticks: u64, volume: i32, pan: i32, pitch: i32) {
        self.scheduled_sounds.push(ScheduledSound {
            tick: self.sound_tick + delay_ticks,
            name: name.to_string(),
            volume,
            pan,
            pitch,
        });
    }

    /// Schedule sounds back to back: each entry is (name, delay after the
    /// previous sound).
    pub fn schedule_sound_sequence(&mut self, sounds: &[(&str, u64)], start_delay: u64) {
        let mut at = start_delay;
        for (name, delay_after) in sounds {
            self.schedule_sound(name, at);
            at += delay_after;
        }
    }

    pub fn clear_scheduled_sounds(&mut self) {
        self.scheduled_sounds.clear();
    }

    /// Play every sound due this tick, then advance the counter.
    pub fn process_scheduled_sounds(&mut self) {
        let current = self.sound_tick;
        let due: Vec<ScheduledSound> =
            self.scheduled_sounds.iter().filter(|s| s.tick <= current).cloned().collect();
        self.scheduled_sounds.retain(|s| s.tick > current);
        for sound in due {
            self.play_sound_full(&sound.name, sound.volume, sound.pan, sound.pitch);
        }
        self.sound_tick += 1;
    }

    // ----- communication -----

    pub fn speak(&mut self, player: PlayerId, text: Text) {
        self.runtime.outbox.push(player, UiEvent::Speak(text));
    }

    pub fn speak_key(&mut self, player: PlayerId, key: &str) {
        self.speak(player, Text::key(key));
    }

    pub fn speak_l(&mut self, player: PlayerId, key: &str, args: Vec<(&str, Arg)>) {
        self.speak(player, Text::with_args(key, args));
    }

    pub fn broadcast_text(&mut self, text: Text, exclude: Option<PlayerId>) {
        let ids: Vec<PlayerId> = self.players.iter().map(|p| p.id).collect();
        for id in ids {
            if Some(id) != exclude {
                self.runtime.outbox.push(id, UiEvent::Speak(text.clone()));
            }
        }
    }

    pub fn broadcast(&mut self, text: &str) {
        self.broadcast_text(Text::raw(text), None);
    }

    pub fn broadcast_l(&mut self, key: &str, args: Vec<(&str, Arg)>) {
        self.broadcast_text(Text::with_args(key, args), None);
    }

    pub fn broadcast_l_except(&mut self, key: &str, args: Vec<(&str, Arg)>, exclude: PlayerId) {
        self.broadcast_text(Text::with_args(key, args), Some(exclude));
    }

    /// The focal player hears `personal_key`; everyone else hears
    /// `others_key` with a `player` argument naming the focal player.
    pub fn broadcast_personal_l(
        &mut self,
        player: PlayerId,
        personal_key: &str,
        others_key: &str,
        args: Vec<(&str, Arg)>,
    ) {
        let name = self.player_by_id(player).map(|p| p.name.clone()).unwrap_or_default();
        self.speak(player, Text::with_args(personal_key, args.clone()));
        let mut other_args = args;
        other_args.push(("player", Arg::Str(name)));
        let text = Text::with_args(others_key, other_args);
        self.broadcast_text(text, Some(player));
    }

    pub fn play_sound(&mut self, name: &str) {
        self.play_sound_full(name, 100, 0, 100);
    }

    pub fn play_sound_full(&mut self, name: &str, volume: i32, pan: i32, pitch: i32) {
        let ids: Vec<PlayerId> = self.players.iter().map(|p| p.id).collect();
        for id in ids {
            self.runtime.outbox.push(
                id,
                UiEvent::PlaySound { name: name.to_string(), volume, pan, pitch },
            );
        }
    }

    pub fn play_music(&mut self, name: &str) {
        self.current_music = name.to_string();
        let ids: Vec<PlayerId> = self.players.iter().map(|p| p.id).collect();
        for id in ids {
            self.runtime.outbox.push(id, UiEvent::PlayMusic { name: name.to_string(), looping: true });
        }
    }

    pub fn play_ambience(&mut self, looped: &str, intro: &str, outro: &str) {
        self.current_ambience = looped.to_string();
        let ids: Vec<PlayerId> = self.players.iter().map(|p| p.id).collect();
        for id in ids {
            self.runtime.outbox.push(
                id,
                UiEvent::PlayAmbience {
                    looped: looped.to_string(),
                    intro: intro.to_string(),
                    outro: outro.to_string(),
                },
            );
        }
    }

    pub fn stop_ambience(&mut self) {
        self.current_ambience.clear();
        let ids: Vec<PlayerId> = self.players.iter().map(|p| p.id).collect();
        for id in ids {
            self.runtime.outbox.push(id, UiEvent::StopAmbience);
        }
    }

    pub fn show_menu(
        &mut self,
        player: PlayerId,
        menu_id: &str,
        items: Vec<MenuItem>,
        multiletter: bool,
        escape_behavior: EscapeBehavior,
    ) {
        self.runtime.outbox.push(
            player,
            UiEvent::ShowMenu { menu_id: menu_id.to_string(), items, multiletter, escape_behavior },
        );
    }

    pub fn update_menu(
        &mut self,
        player: PlayerId,
        menu_id: &str,
        items: Vec<MenuItem>,
        selection_id: Option<String>,
    ) {
        self.runtime.outbox.push(
            player,
            UiEvent::UpdateMenu { menu_id: menu_id.to_string(), items, selection_id },
        );
    }

    pub fn remove_menu(&mut self, player: PlayerId, menu_id: &str) {
        self.runtime.outbox.push(player, UiEvent::RemoveMenu { menu_id: menu_id.to_string() });
    }

    pub fn show_editbox(&mut self, player: PlayerId, input_id: &str, prompt: Text, default: &str) {
        self.runtime.outbox.push(
            player,
            UiEvent::ShowEditbox {
                input_id: input_id.to_string(),
                prompt,
                default: default.to_string(),
            },
        );
    }

    /// Read-only multi-line display; any selection closes it.
    pub fn status_box(&mut self, player: PlayerId, lines: Vec<Text>) {
        let items: Vec<MenuItem> =
            lines.into_iter().map(|line| MenuItem::new(line, "status_line")).collect();
        self.show_menu(player, "status_box", items, false, EscapeBehavior::SelectLast);
        self.runtime.status_box_open.insert(player);
    }

    // ----- attachments -----

    /// Bind a user to a seat. Late joiners receive the current music and
    /// ambience immediately.
    pub fn attach_user(&mut self, player_id: PlayerId, attachment: UserAttachment) {
        if !self.current_music.is_empty() {
            let name = self.current_music.clone();
            self.runtime.outbox.push(player_id, UiEvent::PlayMusic { name, looping: true });
        }
        if !self.current_ambience.is_empty() {
            let looped = self.current_ambience.clone();
            self.runtime.outbox.push(
                player_id,
                UiEvent::PlayAmbience { looped, intro: String::new(), outro: String::new() },
            );
        }
        self.runtime.attachments.insert(player_id, attachment);
    }

    pub fn attachment(&self, player_id: PlayerId) -> Option<&UserAttachment> {
        self.runtime.attachments.get(&player_id)
    }

    fn prefs_of(&self, player_id: PlayerId) -> Preferences {
        self.runtime
            .attachments
            .get(&player_id)
            .map(|a| a.prefs.clone())
            .unwrap_or_default()
    }

    // ----- keybinds -----

    pub fn define_keybind(&mut self, key: &str, name: &str, actions: &[&str], state: KeybindState) {
        self.define_keybind_full(key, name, actions, state, false, &[], false);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn define_keybind_full(
        &mut self,
        key: &str,
        name: &str,
        actions: &[&str],
        state: KeybindState,
        requires_focus: bool,
        players: &[&str],
        include_spectators: bool,
    ) {
        self.runtime.keybinds.define(Keybind {
            name: name.to_string(),
            key: key.to_string(),
            actions: actions.iter().map(|a| a.to_string()).collect(),
            requires_focus,
            state,
            players: players.iter().map(|p| p.to_string()).collect(),
            include_spectators,
        });
    }

    // ----- lifecycle -----

    /// Ask the framework to finish the game after the current handler
    /// returns. `show_end_screen` controls the game-over menu.
    pub fn request_finish(&mut self, show_end_screen: bool) {
        self.runtime.finish_requested = Some(show_end_screen);
    }

    /// Request destruction of this game's table.
    pub fn destroy(&mut self) {
        if !self.runtime.destroyed {
            self.runtime.destroyed = true;
            self.runtime.events.push(TableEvent::Destroyed);
        }
    }

    pub fn jolt_bots(&mut self, ticks: u32) {
        for player in &mut self.players {
            player.jolt(ticks);
        }
    }

    pub fn jolt_bot(&mut self, player_id: PlayerId, ticks: u32) {
        if let Some(player) = self.player_by_id_mut(player_id) {
            player.jolt(ticks);
        }
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.runtime.rng
    }

    pub fn mark_all_menus_dirty(&mut self) {
        self.runtime.menus_dirty.all = true;
    }

    pub fn mark_player_menu_dirty(&mut self, player_id: PlayerId) {
        self.runtime.menus_dirty.players.insert(player_id);
    }

    pub fn drain_outbox(&mut self) -> Vec<(PlayerId, UiEvent)> {
        self.runtime.outbox.drain()
    }

    pub fn drain_events(&mut self) -> Vec<TableEvent> {
        std::mem::take(&mut self.runtime.events)
    }

    pub fn action_sets_of(&self, player_id: PlayerId) -> &[ActionSet] {
        self.action_sets.get(&player_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn action_set_mut(&mut self, player_id: PlayerId, name: &str) -> Option<&mut ActionSet> {
        self.action_sets.get_mut(&player_id)?.iter_mut().find(|set| set.name == name)
    }

    pub fn find_action(&self, player_id: PlayerId, action_id: &str) -> Option<&Action> {
        self.action_sets_of(player_id).iter().find_map(|set| set.get(action_id))
    }
}

/// Capabilities a concrete game plugs into the framework.
pub trait Rules: Serialize + DeserializeOwned + Send + 'static {
    fn game_type(&self) -> &'static str;
    fn display_name(&self) -> &'static str;
    fn category(&self) -> &'static str {
        "category-uncategorized"
    }
    fn min_players(&self) -> usize {
        2
    }
    fn max_players(&self) -> usize {
        4
    }
    fn turn_sound(&self) -> &'static str {
        "turn.ogg"
    }
    /// How much slower humans play than bots, for duration estimates.
    fn human_speed_multiplier(&self) -> u64 {
        2
    }

    /// Game-specific turn actions for one player, or `None`.
    fn turn_action_set(&self, core: &GameCore, player: &Player) -> Option<ActionSet> {
        let _ = (core, player);
        None
    }

    /// Install game-specific keybinds (framework binds are already set).
    fn setup_keybinds(&self, keybinds: &mut KeybindMap) {
        let _ = keybinds;
    }

    fn options(&self) -> Vec<OptionDef> {
        Vec::new()
    }
    fn option_value(&self, name: &str) -> Option<OptionValue> {
        let _ = name;
        None
    }
    fn set_option(&mut self, name: &str, value: OptionValue) {
        let _ = (name, value);
    }

    fn on_start(&mut self, core: &mut GameCore);
    fn on_tick(&mut self, core: &mut GameCore) {
        let _ = core;
    }
    /// Decide the current bot's next action id, if any.
    fn bot_think(&mut self, core: &mut GameCore, player_id: PlayerId) -> Option<String> {
        let _ = (core, player_id);
        None
    }

    /// `None` when enabled, otherwise the disabled-reason key.
    fn action_enabled(&self, core: &GameCore, player: &Player, hook: &str) -> Option<&'static str> {
        let _ = (core, player, hook);
        None
    }
    fn action_hidden(&self, core: &GameCore, player: &Player, hook: &str) -> Visibility {
        let _ = (core, player, hook);
        Visibility::Visible
    }
    fn action_label(&self, core: &GameCore, player: &Player, hook: &str, action_id: &str) -> Option<Text> {
        let _ = (core, player, hook, action_id);
        None
    }
    /// Options for a menu input request.
    fn menu_options(&self, core: &GameCore, player: &Player, hook: &str) -> Option<Vec<String>> {
        let _ = (core, player, hook);
        None
    }
    fn bot_select(&self, core: &GameCore, player: &Player, hook: &str, options: &[String]) -> Option<String> {
        let _ = (core, player, hook, options);
        None
    }
    fn bot_input(&self, core: &GameCore, player: &Player, hook: &str) -> Option<String> {
        let _ = (core, player, hook);
        None
    }
    /// Execute a game-specific action handler.
    fn handle_action(&mut self, core: &mut GameCore, player_id: PlayerId, hook: &str, input: Option<&str>);

    /// Initialize game-specific per-player state for a new seat.
    fn player_created(&mut self, core: &GameCore, player_id: PlayerId) {
        let _ = (core, player_id);
    }
    fn player_removed(&mut self, player_id: PlayerId) {
        let _ = player_id;
    }

    /// Expose the player's dice set to enable the shared dice actions.
    fn dice(&self, player_id: PlayerId) -> Option<&crate::dice::DiceSet> {
        let _ = player_id;
        None
    }
    fn dice_mut(&mut self, player_id: PlayerId) -> Option<&mut crate::dice::DiceSet> {
        let _ = player_id;
        None
    }

    /// Game-specific fields of the result's custom data.
    fn custom_result_data(&self, core: &GameCore) -> serde_json::Map<String, serde_json::Value> {
        let _ = core;
        serde_json::Map::new()
    }

    /// Lines of the end screen for a finished game.
    fn format_end_screen(&self, core: &GameCore, result: &GameResult) -> Vec<Text> {
        let _ = core;
        let mut lines = vec![Text::key("game-over")];
        lines.extend(result.player_results.iter().map(|p| Text::raw(p.player_name.clone())));
        lines
    }

    /// Placement groups for the rating update, first place first; groups
    /// are ties. Default: winner first, remaining humans tied.
    fn rankings_for_rating(&self, core: &GameCore, result: &GameResult) -> Vec<Vec<PlayerId>> {
        let _ = core;
        default_rankings(result)
    }

    fn leaderboard_types(&self) -> Vec<LeaderboardType> {
        Vec::new()
    }

    /// Rebuild game-specific runtime caches after deserialization.
    fn rebuild_runtime_state(&mut self, core: &mut GameCore) {
        let _ = core;
    }
}

/// Winner-first ranking over human players, everyone else tied second.
pub fn default_rankings(result: &GameResult) -> Vec<Vec<PlayerId>> {
    let humans: Vec<&PlayerResult> = result.player_results.iter().filter(|p| !p.is_bot).collect();
    if humans.is_empty() {
        return Vec::new();
    }
    if let Some(winner_name) = result.winner_name() {
        let winner = humans.iter().find(|p| p.player_name == winner_name);
        if let Some(winner) = winner {
            let others: Vec<PlayerId> =
                humans.iter().filter(|p| p.player_id != winner.player_id).map(|p| p.player_id).collect();
            if others.is_empty() {
                return vec![vec![winner.player_id]];
            }
            return vec![vec![winner.player_id], others];
        }
    }
    vec![humans.iter().map(|p| p.player_id).collect()]
}

/// A complete game: framework core plus one game's rules.
#[derive(Serialize, Deserialize)]
pub struct Game<R> {
    pub core: GameCore,
    pub rules: R,
}

impl<R: Rules> Game<R> {
    pub fn new(rules: R) -> Self {
        let core =
            GameCore { turn_sound_name: rules.turn_sound().to_string(), ..GameCore::default() };
        Self { core, rules }
    }

    // ----- action set construction -----

    fn lobby_action_set(&self) -> ActionSet {
        let mut set = ActionSet::new("lobby");
        set.add(Action::new("start_game", Text::key("start-game"), "start_game", "start_game", "start_game"));
        set.add(
            Action::new("add_bot", Text::key("add-bot"), "add_bot", "add_bot", "add_bot").with_input(
                InputRequest::Editbox {
                    prompt: Text::key("enter-bot-name"),
                    default: String::new(),
                    bot_input: Some("add_bot".to_string()),
                },
            ),
        );
        set.add(Action::new("remove_bot", Text::key("remove-bot"), "remove_bot", "remove_bot", "remove_bot"));
        set.add(
            Action::new(
                "toggle_spectator",
                Text::key("spectate"),
                "toggle_spectator",
                "toggle_spectator",
                "toggle_spectator",
            )
            .with_label_hook("toggle_spectator"),
        );
        set.add(Action::new("leave_game", Text::key("leave-table"), "leave_game", "leave_game", "leave_game"));
        set
    }

    fn estimate_action_set(&self) -> ActionSet {
        let mut set = ActionSet::new("estimate");
        set.add(Action::new(
            "estimate_duration",
            Text::key("estimate-duration"),
            "estimate_duration",
            "estimate_duration",
            "estimate_duration",
        ));
        set
    }

    fn standard_action_set(&self) -> ActionSet {
        let mut set = ActionSet::new("standard");
        set.add(Action::new("show_actions", Text::key("actions-menu"), "show_actions", "show_actions", "show_actions"));
        set.add(Action::new("save_table", Text::key("save-table"), "save_table", "save_table", "save_table"));
        set.add(Action::new("whose_turn", Text::key("whose-turn"), "whose_turn", "whose_turn", "whose_turn"));
        set.add(Action::new("check_scores", Text::key("check-scores"), "check_scores", "check_scores", "check_scores"));
        set.add(Action::new(
            "check_scores_detailed",
            Text::key("check-scores-detailed"),
            "check_scores_detailed",
            "check_scores_detailed",
            "check_scores_detailed",
        ));
        set.add(Action::new(
            "predict_outcomes",
            Text::key("predict-outcomes"),
            "predict_outcomes",
            "predict_outcomes",
            "predict_outcomes",
        ));
        set
    }

    /// Assemble a player's action sets in menu order: turn, lobby,
    /// options, estimate, standard.
    fn setup_player_actions(&mut self, player_id: PlayerId) {
        let Some(player) = self.core.player_by_id(player_id).cloned() else { return };
        let mut sets = Vec::new();
        if let Some(turn_set) = self.rules.turn_action_set(&self.core, &player) {
            sets.push(turn_set);
        }
        sets.push(self.lobby_action_set());
        let defs = self.rules.options();
        if !defs.is_empty() {
            sets.push(build_options_action_set(&defs, |name| self.rules.option_value(name)));
        }
        sets.push(self.estimate_action_set());
        sets.push(self.standard_action_set());
        self.core.action_sets.insert(player_id, sets);
    }

    fn install_keybinds(&mut self) {
        self.core.runtime.keybinds.clear();
        let core = &mut self.core;
        core.define_keybind("enter", "Start game", &["start_game"], KeybindState::Idle);
        core.define_keybind("b", "Add bot", &["add_bot"], KeybindState::Idle);
        core.define_keybind("shift+b", "Remove bot", &["remove_bot"], KeybindState::Idle);
        core.define_keybind_full("f3", "Toggle spectator", &["toggle_spectator"], KeybindState::Idle, false, &[], true);
        core.define_keybind_full("q", "Leave table", &["leave_game"], KeybindState::Always, false, &[], true);
        core.define_keybind_full("escape", "Actions menu", &["show_actions"], KeybindState::Always, false, &[], true);
        core.define_keybind("ctrl+s", "Save table", &["save_table"], KeybindState::Always);
        core.define_keybind_full("t", "Whose turn", &["whose_turn"], KeybindState::Active, false, &[], true);
        core.define_keybind_full("s", "Check scores", &["check_scores"], KeybindState::Active, false, &[], true);
        core.define_keybind_full(
            "shift+s",
            "Detailed scores",
            &["check_scores_detailed"],
            KeybindState::Active,
            false,
            &[],
            true,
        );
        core.define_keybind_full(
            "ctrl+r",
            "Predict outcomes",
            &["predict_outcomes"],
            KeybindState::Active,
            false,
            &[],
            true,
        );
        self.rules.setup_keybinds(&mut self.core.runtime.keybinds);
    }

    // ----- lobby lifecycle -----

    /// Set up a fresh table: host seat, keybinds, waiting status.
    pub fn initialize_lobby(&mut self, host_name: &str, attachment: UserAttachment) {
        self.core.host = host_name.to_string();
        self.core.status = GameStatus::Waiting;
        self.install_keybinds();
        self.add_player(attachment);
        self.rebuild_all_menus();
    }

    /// Seat a user as a new player. Returns the player id.
    pub fn add_player(&mut self, attachment: UserAttachment) -> PlayerId {
        let player = Player::new(attachment.user_id, attachment.username.clone(), attachment.is_bot);
        let id = player.id;
        self.core.players.push(player);
        self.rules.player_created(&self.core, id);
        self.core.attach_user(id, attachment);
        self.setup_player_actions(id);
        id
    }

    // ----- resolution -----

    fn resolve_enabled(&self, player: &Player, hook: &str) -> Option<&'static str> {
        let core = &self.core;
        match hook {
            "start_game" => {
                if core.status != GameStatus::Waiting {
                    Some("action-game-in-progress")
                } else if player.name != core.host {
                    Some("action-not-host")
                } else if core.active_player_count() < self.rules.min_players() {
                    Some("action-need-more-players")
                } else {
                    None
                }
            },
            "add_bot" => {
                if core.status != GameStatus::Waiting {
                    Some("action-game-in-progress")
                } else if player.name != core.host {
                    Some("action-not-host")
                } else if core.players.len() >= self.rules.max_players() {
                    Some("action-table-full")
                } else {
                    None
                }
            },
            "remove_bot" => {
                if core.status != GameStatus::Waiting {
                    Some("action-game-in-progress")
                } else if player.name != core.host {
                    Some("action-not-host")
                } else if core.bot_count() == 0 {
                    Some("action-no-bots")
                } else {
                    None
                }
            },
            "toggle_spectator" => {
                if core.status != GameStatus::Waiting {
                    Some("action-game-in-progress")
                } else if player.is_bot {
                    Some("action-bots-cannot")
                } else {
                    None
                }
            },
            "leave_game" | "show_actions" => None,
            "option" => {
                if core.status != GameStatus::Waiting {
                    Some("action-game-in-progress")
                } else if player.name != core.host {
                    Some("action-not-host")
                } else {
                    None
                }
            },
            "estimate_duration" => {
                if core.status != GameStatus::Waiting {
                    Some("action-game-in-progress")
                } else {
                    None
                }
            },
            "save_table" => {
                if player.name != core.host {
                    Some("action-not-host")
                } else {
                    None
                }
            },
            "whose_turn" => {
                if core.status != GameStatus::Playing {
                    Some("action-not-playing")
                } else {
                    None
                }
            },
            "check_scores" | "check_scores_detailed" => {
                if core.status != GameStatus::Playing {
                    Some("action-not-playing")
                } else if core.teams.teams.is_empty() {
                    Some("action-no-scores")
                } else {
                    None
                }
            },
            "predict_outcomes" => {
                if core.status != GameStatus::Playing {
                    Some("action-not-playing")
                } else if core.players.iter().filter(|p| !p.is_bot && !p.is_spectator).count() < 2 {
                    Some("action-need-more-humans")
                } else {
                    None
                }
            },
            "dice_key" => {
                if core.status != GameStatus::Playing {
                    Some("action-not-playing")
                } else {
                    None
                }
            },
            _ => {
                if let Some(index) = hook.strip_prefix("toggle_die_").and_then(|s| s.parse::<usize>().ok()) {
                    // Shared playing/turn/rolled/locked gate first, then
                    // any game-specific restriction on top.
                    return self
                        .dice_toggle_enabled(player, index)
                        .or_else(|| self.rules.action_enabled(core, player, hook));
                }
                self.rules.action_enabled(core, player, hook)
            },
        }
    }

    fn dice_toggle_enabled(&self, player: &Player, index: usize) -> Option<&'static str> {
        if self.core.status != GameStatus::Playing {
            return Some("action-not-playing");
        }
        if !self.core.is_current(player.id) {
            return Some("action-not-your-turn");
        }
        let Some(dice) = self.rules.dice(player.id) else {
            return Some("dice-no-dice");
        };
        if !dice.has_rolled {
            return Some("dice-not-rolled");
        }
        if dice.is_locked(index) {
            return Some("dice-locked");
        }
        None
    }

    fn resolve_hidden(&self, player: &Player, hook: &str) -> Visibility {
        let core = &self.core;
        match hook {
            "start_game" | "option" | "estimate_duration" => {
                if core.status == GameStatus::Waiting {
                    Visibility::Visible
                } else {
                    Visibility::Hidden
                }
            },
            "add_bot" | "remove_bot" | "toggle_spectator" | "leave_game" | "show_actions"
            | "save_table" | "whose_turn" | "check_scores" | "check_scores_detailed"
            | "predict_outcomes" | "dice_key" => Visibility::Hidden,
            _ => {
                if let Some(index) = hook.strip_prefix("toggle_die_").and_then(|s| s.parse::<usize>().ok()) {
                    return self.dice_toggle_hidden(player, index);
                }
                self.rules.action_hidden(core, player, hook)
            },
        }
    }

    fn dice_toggle_hidden(&self, player: &Player, _index: usize) -> Visibility {
        if self.core.status != GameStatus::Playing || !self.core.is_current(player.id) {
            return Visibility::Hidden;
        }
        match self.rules.dice(player.id) {
            Some(dice) if dice.has_rolled => Visibility::Visible,
            _ => Visibility::Hidden,
        }
    }

    fn resolve_label(&self, player: &Player, hook: &str, action_id: &str) -> Option<Text> {
        match hook {
            "toggle_spectator" => {
                Some(Text::key(if player.is_spectator { "play-seat" } else { "spectate" }))
            },
            _ => {
                if let Some(index) = hook.strip_prefix("toggle_die_").and_then(|s| s.parse::<usize>().ok()) {
                    return Some(self.dice_toggle_label(player, index));
                }
                self.rules.action_label(&self.core, player, hook, action_id)
            },
        }
    }

    fn dice_toggle_label(&self, player: &Player, index: usize) -> Text {
        let Some(dice) = self.rules.dice(player.id) else {
            return Text::raw(format!("Die {}", index + 1));
        };
        let value = dice.value(index).unwrap_or(0);
        let key = if dice.is_locked(index) {
            "dice-die-locked"
        } else if dice.is_kept(index) {
            "dice-die-kept"
        } else {
            "dice-die-label"
        };
        Text::with_args(key, vec![("number", Arg::Int(index as i64 + 1)), ("value", Arg::Int(i64::from(value)))])
    }

    /// Resolve one action's state for a player.
    pub fn resolve_action(&self, player: &Player, action: &Action) -> ResolvedAction {
        let disabled_reason = self.resolve_enabled(player, &action.is_enabled);
        let visible = self.resolve_hidden(player, &action.is_hidden) == Visibility::Visible;
        let label = action
            .get_label
            .as_ref()
            .and_then(|hook| self.resolve_label(player, hook, &action.id))
            .unwrap_or_else(|| action.label.clone());
        ResolvedAction {
            action: action.clone(),
            label,
            enabled: disabled_reason.is_none(),
            disabled_reason,
            visible,
        }
    }

    /// Enabled AND visible actions across all sets, in order (the turn
    /// menu).
    pub fn visible_actions(&self, player: &Player) -> Vec<ResolvedAction> {
        self.all_resolved_actions(player).into_iter().filter(|ra| ra.enabled && ra.visible).collect()
    }

    /// Enabled actions regardless of visibility (the actions menu).
    pub fn enabled_actions(&self, player: &Player) -> Vec<ResolvedAction> {
        self.all_resolved_actions(player)
            .into_iter()
            .filter(|ra| ra.enabled && !ra.action.skip_actions_menu)
            .collect()
    }

    fn all_resolved_actions(&self, player: &Player) -> Vec<ResolvedAction> {
        self.core
            .action_sets_of(player.id)
            .iter()
            .flat_map(|set| set.iter())
            .map(|action| self.resolve_action(player, action))
            .collect()
    }

    // ----- menus -----

    pub fn rebuild_player_menu(&mut self, player_id: PlayerId) {
        if self.core.runtime.destroyed || self.core.status == GameStatus::Finished {
            return;
        }
        let Some(player) = self.core.player_by_id(player_id).cloned() else { return };
        let items: Vec<MenuItem> = self
            .visible_actions(&player)
            .into_iter()
            .map(|ra| MenuItem::new(ra.label, ra.action.id))
            .collect();
        self.core.show_menu(player_id, "turn_menu", items, false, EscapeBehavior::Keybind);
        self.core.runtime.menus_dirty.players.remove(&player_id);
    }

    pub fn rebuild_all_menus(&mut self) {
        if self.core.runtime.destroyed || self.core.status == GameStatus::Finished {
            return;
        }
        let ids: Vec<PlayerId> = self.core.players.iter().map(|p| p.id).collect();
        for id in ids {
            if !self.menu_suppressed(id) {
                self.rebuild_player_menu(id);
            }
        }
        self.core.runtime.menus_dirty = MenuDirty::default();
    }

    /// Update the turn menu in place, preserving focus when a selection
    /// id is supplied.
    pub fn update_player_menu(&mut self, player_id: PlayerId, selection_id: Option<String>) {
        if self.core.runtime.destroyed || self.core.status == GameStatus::Finished {
            return;
        }
        let Some(player) = self.core.player_by_id(player_id).cloned() else { return };
        let items: Vec<MenuItem> = self
            .visible_actions(&player)
            .into_iter()
            .map(|ra| MenuItem::new(ra.label, ra.action.id))
            .collect();
        self.core.update_menu(player_id, "turn_menu", items, selection_id);
    }

    fn menu_suppressed(&self, player_id: PlayerId) -> bool {
        self.core.runtime.pending_actions.contains_key(&player_id)
            || self.core.runtime.status_box_open.contains(&player_id)
            || self.core.runtime.actions_menu_open.contains(&player_id)
    }

    fn flush_dirty_menus(&mut self) {
        let dirty = std::mem::take(&mut self.core.runtime.menus_dirty);
        if self.core.runtime.destroyed || self.core.status == GameStatus::Finished {
            return;
        }
        let targets: Vec<PlayerId> = if dirty.all {
            self.core.players.iter().map(|p| p.id).collect()
        } else {
            dirty.players.into_iter().collect()
        };
        for id in targets {
            if !self.menu_suppressed(id) {
                self.rebuild_player_menu(id);
            }
        }
    }

    // ----- action execution -----

    pub fn execute_action(&mut self, player_id: PlayerId, action_id: &str) {
        self.execute_action_with(player_id, action_id, None, None);
    }

    pub fn execute_action_with(
        &mut self,
        player_id: PlayerId,
        action_id: &str,
        input: Option<&str>,
        context: Option<ActionContext>,
    ) {
        let Some(action) = self.core.find_action(player_id, action_id).cloned() else { return };
        let Some(player) = self.core.player_by_id(player_id).cloned() else { return };

        let resolved = self.resolve_action(&player, &action);
        if !resolved.enabled {
            if let Some(reason) = resolved.disabled_reason {
                self.core.speak_key(player_id, reason);
            }
            return;
        }

        let mut input_value: Option<String> = input.map(str::to_string);
        if action.input_request.is_some() && input_value.is_none() {
            if player.is_bot {
                self.core.runtime.pending_actions.insert(player_id, action_id.to_string());
                input_value = self.bot_input_for(&action, &player);
                self.core.runtime.pending_actions.remove(&player_id);
                if input_value.is_none() {
                    return;
                }
            } else {
                self.request_action_input(&action, &player);
                return;
            }
        }

        self.core.runtime.action_context.insert(player_id, context.unwrap_or_default());
        let handler = action.handler.clone();
        self.execute_handler(player_id, &handler, input_value.as_deref(), action_id);
        self.core.runtime.action_context.remove(&player_id);
    }

    pub fn action_context(&self, player_id: PlayerId) -> ActionContext {
        self.core.runtime.action_context.get(&player_id).cloned().unwrap_or_default()
    }

    fn menu_options_for(&self, player: &Player, hook: &str) -> Option<Vec<String>> {
        if let Some(name) = hook.strip_prefix("options_for_") {
            if let Some(def) = self.rules.options().into_iter().find(|def| def.name == name) {
                return match &def.kind {
                    OptionKind::Menu { choices, .. } => Some(choices.clone()),
                    OptionKind::TeamMode { .. } => Some(TeamManager::all_team_modes(
                        self.rules.min_players(),
                        self.rules.max_players(),
                    )),
                    _ => None,
                };
            }
        }
        self.rules.menu_options(&self.core, player, hook)
    }

    fn bot_input_for(&mut self, action: &Action, player: &Player) -> Option<String> {
        match action.input_request.as_ref()? {
            InputRequest::Menu { options, bot_select, .. } => {
                let choices = self.menu_options_for(player, options)?;
                if choices.is_empty() {
                    return None;
                }
                if let Some(hook) = bot_select {
                    if let Some(choice) = self.rules.bot_select(&self.core, player, hook, &choices) {
                        return Some(choice);
                    }
                }
                choices.into_iter().next()
            },
            InputRequest::Editbox { default, bot_input, .. } => {
                if let Some(hook) = bot_input {
                    if let Some(value) = self.framework_bot_input(hook) {
                        return Some(value);
                    }
                    if let Some(value) = self.rules.bot_input(&self.core, player, hook) {
                        return Some(value);
                    }
                }
                Some(default.clone())
            },
        }
    }

    fn framework_bot_input(&self, hook: &str) -> Option<String> {
        match hook {
            "add_bot" => {
                pick_bot_name(self.core.players.iter().map(|p| p.name.as_str())).map(str::to_string)
            },
            _ => None,
        }
    }

    fn request_action_input(&mut self, action: &Action, player: &Player) {
        self.core.runtime.pending_actions.insert(player.id, action.id.clone());
        match action.input_request.clone() {
            Some(InputRequest::Menu { options, .. }) => {
                let Some(choices) = self.menu_options_for(player, &options) else {
                    self.core.runtime.pending_actions.remove(&player.id);
                    self.core.speak_key(player.id, "no-options-available");
                    return;
                };
                if choices.is_empty() {
                    self.core.runtime.pending_actions.remove(&player.id);
                    self.core.speak_key(player.id, "no-options-available");
                    return;
                }
                let option_def = action
                    .id
                    .strip_prefix("set_")
                    .and_then(|name| self.rules.options().into_iter().find(|def| def.name == name));
                let mut items: Vec<MenuItem> = choices
                    .iter()
                    .map(|choice| {
                        let text = option_def
                            .as_ref()
                            .map(|def| def.choice_text(choice))
                            .unwrap_or_else(|| Text::raw(choice.clone()));
                        MenuItem::new(text, choice.clone())
                    })
                    .collect();
                items.push(MenuItem::new(Text::key("cancel"), "_cancel"));
                self.core.show_menu(player.id, "action_input_menu", items, true, EscapeBehavior::SelectLast);
            },
            Some(InputRequest::Editbox { prompt, default, .. }) => {
                self.core.show_editbox(player.id, "action_input_editbox", prompt, &default);
            },
            None => {},
        }
    }

    fn execute_handler(&mut self, player_id: PlayerId, handler: &str, input: Option<&str>, action_id: &str) {
        match handler {
            "start_game" => self.handle_start_game(),
            "add_bot" => self.handle_add_bot(player_id, input.unwrap_or("")),
            "remove_bot" => self.handle_remove_bot(),
            "toggle_spectator" => self.handle_toggle_spectator(player_id),
            "leave_game" => self.handle_leave_game(player_id),
            "show_actions" => self.show_actions_menu(player_id),
            "save_table" => self.handle_save_table(player_id),
            "whose_turn" => self.handle_whose_turn(player_id),
            "check_scores" => self.handle_check_scores(player_id),
            "check_scores_detailed" => self.handle_check_scores_detailed(player_id),
            "predict_outcomes" => self.handle_predict_outcomes(player_id),
            "estimate_duration" => self.handle_estimate_duration(player_id),
            "set_option" => self.handle_set_option(input.unwrap_or(""), action_id),
            "toggle_option" => self.handle_toggle_option(action_id),
            _ => {
                if let Some(index) = handler.strip_prefix("toggle_die_").and_then(|s| s.parse().ok()) {
                    self.toggle_die(player_id, index);
                } else if let Some(value) = handler.strip_prefix("dice_key_").and_then(|s| s.parse().ok()) {
                    self.handle_dice_key(player_id, value);
                } else if let Some(value) = handler.strip_prefix("dice_unkeep_").and_then(|s| s.parse().ok()) {
                    self.handle_dice_unkeep(player_id, value);
                } else {
                    self.rules.handle_action(&mut self.core, player_id, handler, input);
                }
            },
        }
    }

    // ----- framework handlers -----

    fn handle_start_game(&mut self) {
        self.core.status = GameStatus::Playing;
        self.core.broadcast_l("game-starting", vec![]);
        self.rules.on_start(&mut self.core);
    }

    fn handle_add_bot(&mut self, player_id: PlayerId, bot_name: &str) {
        let name = if bot_name.trim().is_empty() {
            match pick_bot_name(self.core.players.iter().map(|p| p.name.as_str())) {
                Some(name) => name.to_string(),
                None => {
                    self.core.speak_key(player_id, "no-bot-names-available");
                    return;
                },
            }
        } else {
            bot_name.trim().to_string()
        };
        let bot_id = Uuid::new_v4();
        self.add_player(UserAttachment::bot(bot_id, name.clone()));
        self.core.broadcast_l("table-joined", vec![("player", Arg::Str(name))]);
        self.core.play_sound("join.ogg");
        self.rebuild_all_menus();
    }

    fn handle_remove_bot(&mut self) {
        let Some(index) = self.core.players.iter().rposition(|p| p.is_bot) else { return };
        let bot = self.core.players.remove(index);
        self.core.action_sets.remove(&bot.id);
        self.core.runtime.attachments.remove(&bot.id);
        self.rules.player_removed(bot.id);
        self.core.broadcast_l("table-left", vec![("player", Arg::Str(bot.name))]);
        self.core.play_sound("leave.ogg");
        self.rebuild_all_menus();
    }

    fn handle_toggle_spectator(&mut self, player_id: PlayerId) {
        if self.core.status != GameStatus::Waiting {
            return;
        }
        let Some(player) = self.core.player_by_id_mut(player_id) else { return };
        player.is_spectator = !player.is_spectator;
        let name = player.name.clone();
        let key = if player.is_spectator { "now-spectating" } else { "now-playing" };
        self.core.broadcast_l(key, vec![("player", Arg::Str(name))]);
        self.rebuild_all_menus();
    }

    fn handle_leave_game(&mut self, player_id: PlayerId) {
        let Some(player) = self.core.player_by_id(player_id).cloned() else { return };

        if self.core.status == GameStatus::Playing && !player.is_bot {
            // Mid-game leave converts the seat to a bot in place, keeping
            // the id so the same human can rejoin and take it back.
            if let Some(seat) = self.core.player_by_id_mut(player_id) {
                seat.is_bot = true;
            }
            self.core.runtime.attachments.remove(&player_id);
            self.core.attach_user(player_id, UserAttachment::bot(player_id, player.name.clone()));
            self.core.broadcast_l("player-replaced-by-bot", vec![("player", Arg::Str(player.name))]);
            self.core.play_sound("leave.ogg");
            if self.core.human_count() == 0 {
                self.core.destroy();
                return;
            }
            self.rebuild_all_menus();
            return;
        }

        self.core.players.retain(|p| p.id != player_id);
        self.core.action_sets.remove(&player_id);
        self.core.runtime.attachments.remove(&player_id);
        self.rules.player_removed(player_id);
        self.core.broadcast_l("table-left", vec![("player", Arg::Str(player.name.clone()))]);
        self.core.play_sound("leave.ogg");

        if self.core.human_count() == 0 {
            self.core.destroy();
            return;
        }

        if self.core.status == GameStatus::Waiting {
            if player.name == self.core.host {
                if let Some(new_host) = self.core.players.iter().find(|p| !p.is_bot) {
                    self.core.host = new_host.name.clone();
                    let name = new_host.name.clone();
                    self.core.broadcast_l("new-host", vec![("player", Arg::Str(name))]);
                }
            }
            self.rebuild_all_menus();
        }
    }

    fn show_actions_menu(&mut self, player_id: PlayerId) {
        let Some(player) = self.core.player_by_id(player_id).cloned() else { return };
        let enabled = self.enabled_actions(&player);
        if enabled.is_empty() {
            self.core.speak_key(player_id, "no-actions-available");
            return;
        }
        let mut items: Vec<MenuItem> = enabled
            .into_iter()
            .map(|ra| {
                let key = self.core.runtime.keybinds.key_for_action(&ra.action.id).map(str::to_uppercase);
                let text = match key {
                    Some(key) => Text::with_args(
                        "action-with-key",
                        vec![("label", Arg::Nested(Box::new(ra.label))), ("key", Arg::Str(key))],
                    ),
                    None => ra.label,
                };
                MenuItem::new(text, ra.action.id)
            })
            .collect();
        items.push(MenuItem::new(Text::key("go-back"), "go_back"));
        self.core.runtime.actions_menu_open.insert(player_id);
        self.core.speak_key(player_id, "context-menu");
        self.core.show_menu(player_id, "actions_menu", items, true, EscapeBehavior::SelectLast);
    }

    fn handle_save_table(&mut self, player_id: PlayerId) {
        let Some(player) = self.core.player_by_id(player_id) else { return };
        let username = player.name.clone();
        self.core.runtime.events.push(TableEvent::SaveRequested { username });
    }

    fn handle_whose_turn(&mut self, player_id: PlayerId) {
        match self.core.current_player() {
            Some(current) => {
                let name = current.name.clone();
                self.core.speak_l(player_id, "game-turn-start", vec![("player", Arg::Str(name))]);
            },
            None => self.core.speak_key(player_id, "game-no-turn"),
        }
    }

    fn handle_check_scores(&mut self, player_id: PlayerId) {
        if self.core.teams.teams.is_empty() {
            self.core.speak_key(player_id, "no-scores-available");
            return;
        }
        for line in self.core.teams.format_scores_brief() {
            self.core.speak(player_id, line);
        }
    }

    fn handle_check_scores_detailed(&mut self, player_id: PlayerId) {
        let lines = self.core.teams.format_scores_detailed();
        self.core.status_box(player_id, lines);
    }

    fn handle_predict_outcomes(&mut self, player_id: PlayerId) {
        if self.core.runtime.ratings.is_none() {
            self.core.speak_key(player_id, "predict-unavailable");
            return;
        }
        let humans: Vec<Player> =
            self.core.players.iter().filter(|p| !p.is_bot && !p.is_spectator).cloned().collect();
        if humans.len() < 2 {
            self.core.speak_key(player_id, "predict-need-players");
            return;
        }
        let game_type = self.rules.game_type();
        let view = self.core.runtime.ratings.as_ref().expect("checked above");
        let mut rated: Vec<(Player, f64)> = humans
            .into_iter()
            .map(|p| {
                let (mu, sigma) = view.rating(game_type, p.id);
                (p, mu - 3.0 * sigma)
            })
            .collect();
        rated.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut lines = vec![Text::key("predict-header")];
        if rated.len() == 2 {
            for (rank, (player, ordinal)) in rated.iter().enumerate() {
                let other = &rated[1 - rank].0;
                let probability = view.win_probability(game_type, player.id, other.id);
                lines.push(Text::with_args(
                    "predict-entry-2p",
                    vec![
                        ("rank", Arg::Int(rank as i64 + 1)),
                        ("player", Arg::Str(player.name.clone())),
                        ("rating", Arg::Int(ordinal.round() as i64)),
                        ("probability", Arg::Int((probability * 100.0).round() as i64)),
                    ],
                ));
            }
        } else {
            for (rank, (player, ordinal)) in rated.iter().enumerate() {
                lines.push(Text::with_args(
                    "predict-entry",
                    vec![
                        ("rank", Arg::Int(rank as i64 + 1)),
                        ("player", Arg::Str(player.name.clone())),
                        ("rating", Arg::Int(ordinal.round() as i64)),
                    ],
                ));
            }
        }
        self.core.status_box(player_id, lines);
    }

    // ----- options handlers -----

    fn handle_set_option(&mut self, raw: &str, action_id: &str) {
        let Some(name) = action_id.strip_prefix("set_") else { return };
        if self.set_option_raw(name, raw) {
            self.refresh_options_action_sets();
            self.core.mark_all_menus_dirty();
        }
    }

    /// Validate and apply a raw option value. Returns whether the value
    /// was accepted. Also used by the headless simulation runner.
    pub fn set_option_raw(&mut self, name: &str, raw: &str) -> bool {
        let Some(def) = self.rules.options().into_iter().find(|def| def.name == name) else {
            return false;
        };
        let Some(value) = def.validate(raw) else { return false };
        if let OptionValue::Choice(mode) = &value {
            if matches!(def.kind, OptionKind::TeamMode { .. }) {
                self.core.teams.team_mode = mode.clone();
            }
        }
        self.rules.set_option(name, value);
        true
    }

    fn handle_toggle_option(&mut self, action_id: &str) {
        let Some(name) = action_id.strip_prefix("toggle_") else { return };
        let Some(current) = self.rules.option_value(name).and_then(|v| v.as_bool()) else { return };
        self.rules.set_option(name, OptionValue::Bool(!current));
        self.refresh_options_action_sets();
        self.core.mark_all_menus_dirty();
    }

    /// Rewrite every player's options action set to reflect current
    /// values.
    fn refresh_options_action_sets(&mut self) {
        let defs = self.rules.options();
        if defs.is_empty() {
            return;
        }
        let rebuilt = build_options_action_set(&defs, |name| self.rules.option_value(name));
        let ids: Vec<PlayerId> = self.core.players.iter().map(|p| p.id).collect();
        for id in ids {
            if let Some(set) = self.core.action_set_mut(id, "options") {
                *set = rebuilt.clone();
            }
        }
    }

    // ----- dice handlers -----

    fn toggle_die(&mut self, player_id: PlayerId, index: usize) {
        let Some(dice) = self.rules.dice_mut(player_id) else { return };
        match dice.toggle_keep(index) {
            None => self.core.speak_key(player_id, "dice-locked"),
            Some(kept) => {
                let value = self.rules.dice(player_id).and_then(|d| d.value(index)).unwrap_or(0);
                let key = if kept { "dice-keeping" } else { "dice-rerolling" };
                self.core.speak_l(player_id, key, vec![("value", Arg::Int(i64::from(value)))]);
                self.rebuild_player_menu(player_id);
            },
        }
    }

    fn handle_dice_key(&mut self, player_id: PlayerId, value: u8) {
        match self.core.prefs_of(player_id).dice_keeping_style {
            DiceKeepingStyle::ByIndex => {
                if value <= 5 {
                    self.toggle_die(player_id, usize::from(value) - 1);
                }
            },
            DiceKeepingStyle::ByValue => {
                let Some(dice) = self.rules.dice_mut(player_id) else { return };
                if dice.keep_by_value(value).is_some() {
                    self.core.speak_l(player_id, "dice-keeping", vec![("value", Arg::Int(i64::from(value)))]);
                    self.rebuild_player_menu(player_id);
                }
            },
        }
    }

    fn handle_dice_unkeep(&mut self, player_id: PlayerId, value: u8) {
        if self.core.prefs_of(player_id).dice_keeping_style != DiceKeepingStyle::ByValue {
            return;
        }
        let Some(dice) = self.rules.dice_mut(player_id) else { return };
        if dice.unkeep_by_value(value).is_some() {
            self.core.speak_l(player_id, "dice-rerolling", vec![("value", Arg::Int(i64::from(value)))]);
            self.rebuild_player_menu(player_id);
        }
    }

    // ----- estimation -----

    fn handle_estimate_duration(&mut self, player_id: PlayerId) {
        if self.core.runtime.estimate_running {
            self.core.speak_key(player_id, "estimate-already-running");
            return;
        }
        let options = self
            .rules
            .options()
            .iter()
            .filter_map(|def| {
                self.rules.option_value(def.name).map(|value| {
                    let raw = match value {
                        OptionValue::Int(n) => n.to_string(),
                        OptionValue::Float(f) => f.to_string(),
                        OptionValue::Bool(b) => b.to_string(),
                        OptionValue::Choice(c) => c,
                    };
                    (def.name.to_string(), raw)
                })
            })
            .collect();
        let bots = self.core.active_player_count().max(self.rules.min_players());
        self.core.runtime.estimate_running = true;
        self.core.runtime.events.push(TableEvent::EstimateRequested {
            game_type: self.rules.game_type().to_string(),
            options,
            bots,
        });
        self.core.broadcast_l("estimate-computing", vec![]);
    }

    /// Called by the table layer once subprocesses are spawned.
    pub fn set_estimate_pool(&mut self, pool: SharedEstimatePool) {
        self.core.runtime.estimate_pool = Some(pool);
    }

    /// Called by the table layer when spawning failed outright.
    pub fn estimate_failed(&mut self) {
        self.core.runtime.estimate_running = false;
        self.core.runtime.estimate_pool = None;
        self.core.broadcast_l("estimate-error", vec![]);
    }

    fn poll_estimate(&mut self) {
        if !self.core.runtime.estimate_running {
            return;
        }
        let Some(pool) = self.core.runtime.estimate_pool.clone() else { return };
        let (ticks, errors) = {
            let guard = match pool.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            if guard.finished < guard.expected {
                return;
            }
            (guard.ticks.clone(), guard.errors.clone())
        };
        self.core.runtime.estimate_running = false;
        self.core.runtime.estimate_pool = None;

        if ticks.is_empty() {
            if let Some(first) = errors.first() {
                tracing::warn!(error = %first, "duration estimate produced no samples");
            }
            self.core.broadcast_l("estimate-error", vec![]);
            return;
        }

        let (kept, removed) = trim_iqr_outliers(&ticks);
        let mean = kept.iter().sum::<u64>() as f64 / kept.len() as f64;
        let stddev = if kept.len() < 2 {
            0.0
        } else {
            (kept.iter().map(|&t| (t as f64 - mean).powi(2)).sum::<f64>() / kept.len() as f64).sqrt()
        };
        let outlier_info = if removed > 0 {
            format!("{removed} outlier{} removed. ", if removed > 1 { "s" } else { "" })
        } else {
            String::new()
        };
        let human_mean = mean * self.rules.human_speed_multiplier() as f64;
        self.core.broadcast_l(
            "estimate-result",
            vec![
                ("bot_time", Arg::Str(format_duration(mean))),
                ("std_dev", Arg::Str(format_duration(stddev))),
                ("outlier_info", Arg::Str(outlier_info)),
                ("human_time", Arg::Str(format_duration(human_mean))),
            ],
        );
    }

    // ----- game end -----

    /// Build the result record for the game as it stands.
    pub fn build_game_result(&self) -> GameResult {
        GameResult {
            game_type: self.rules.game_type().to_string(),
            timestamp: now_iso8601(),
            duration_ticks: self.core.sound_tick,
            player_results: self
                .core
                .active_players()
                .into_iter()
                .map(|p| PlayerResult { player_id: p.id, player_name: p.name.clone(), is_bot: p.is_bot })
                .collect(),
            custom_data: self.rules.custom_result_data(&self.core),
        }
    }

    fn finish_game(&mut self, show_end_screen: bool) {
        self.core.game_active = false;
        self.core.status = GameStatus::Finished;

        let result = self.build_game_result();
        if result.has_human_players() {
            self.core.runtime.events.push(TableEvent::GameFinished(result.clone()));
        }
        if show_end_screen {
            let lines = self.rules.format_end_screen(&self.core, &result);
            let mut items: Vec<MenuItem> =
                lines.into_iter().map(|line| MenuItem::new(line, "score_line")).collect();
            items.push(MenuItem::new(Text::key("game-end-congrats"), "leave_game"));
            let ids: Vec<PlayerId> = self.core.players.iter().map(|p| p.id).collect();
            for id in ids {
                self.core.show_menu(id, "game_over", items.clone(), false, EscapeBehavior::SelectLast);
            }
        }
        if self.core.human_count() == 0 {
            self.core.destroy();
        }
    }

    /// Placement groups for the persistence layer's rating update.
    pub fn rankings_for_rating(&self, result: &GameResult) -> Vec<Vec<PlayerId>> {
        self.rules.rankings_for_rating(&self.core, result)
    }

    fn process_finish(&mut self) {
        if let Some(show) = self.core.runtime.finish_requested.take() {
            self.finish_game(show);
        }
    }

    // ----- event dispatch -----

    pub fn handle_event(&mut self, player_id: PlayerId, packet: &ClientPacket) {
        match packet {
            ClientPacket::Menu { menu_id, selection_id, selection } => {
                self.handle_menu_event(player_id, menu_id, selection_id.as_deref(), *selection);
            },
            ClientPacket::Editbox { input_id, text } => {
                self.handle_editbox_event(player_id, input_id, text);
            },
            ClientPacket::Keybind { key, shift, control, alt, menu_item_id, menu_index } => {
                self.handle_keybind_event(
                    player_id,
                    &normalize_key(key, *shift, *control, *alt),
                    menu_item_id.clone(),
                    *menu_index,
                );
            },
            _ => {},
        }
        self.process_finish();
        self.flush_dirty_menus();
    }

    fn handle_menu_event(
        &mut self,
        player_id: PlayerId,
        menu_id: &str,
        selection_id: Option<&str>,
        selection: Option<usize>,
    ) {
        match menu_id {
            "turn_menu" => {
                self.core.runtime.actions_menu_open.remove(&player_id);
                let by_id = selection_id
                    .filter(|sel| !sel.is_empty())
                    .and_then(|sel| self.core.find_action(player_id, sel).map(|a| a.id.clone()));
                let action_id = match by_id {
                    Some(id) => Some(id),
                    None => {
                        // Index fallback over the visible actions.
                        let index = selection.unwrap_or(1).saturating_sub(1);
                        self.core.player_by_id(player_id).cloned().and_then(|player| {
                            self.visible_actions(&player).get(index).map(|ra| ra.action.id.clone())
                        })
                    },
                };
                if let Some(action_id) = action_id {
                    self.execute_action(player_id, &action_id);
                    if !self.core.runtime.pending_actions.contains_key(&player_id) {
                        self.rebuild_all_menus();
                    }
                }
            },
            "actions_menu" => {
                if let Some(sel) = selection_id {
                    self.handle_actions_menu_selection(player_id, sel.to_string());
                }
            },
            "status_box" => {
                self.core.remove_menu(player_id, "status_box");
                self.core.speak_key(player_id, "status-box-closed");
                self.core.runtime.status_box_open.remove(&player_id);
                self.rebuild_player_menu(player_id);
            },
            "game_over" => {
                // The leave entry is the only interactive line.
                self.execute_action(player_id, "leave_game");
            },
            "action_input_menu" => {
                if let Some(action_id) = self.core.runtime.pending_actions.remove(&player_id) {
                    if let Some(sel) = selection_id {
                        if sel != "_cancel" {
                            self.execute_action_with(player_id, &action_id, Some(sel), None);
                        }
                    }
                }
                self.rebuild_player_menu(player_id);
            },
            _ => {},
        }
    }

    fn handle_editbox_event(&mut self, player_id: PlayerId, input_id: &str, text: &str) {
        if input_id != "action_input_editbox" {
            return;
        }
        if let Some(action_id) = self.core.runtime.pending_actions.remove(&player_id) {
            if !text.is_empty() {
                self.execute_action_with(player_id, &action_id, Some(text), None);
            }
        }
        self.rebuild_player_menu(player_id);
    }

    fn handle_keybind_event(
        &mut self,
        player_id: PlayerId,
        combo: &str,
        menu_item_id: Option<String>,
        menu_index: Option<usize>,
    ) {
        let Some(player) = self.core.player_by_id(player_id).cloned() else { return };
        let candidates: Vec<Keybind> = self.core.runtime.keybinds.lookup(combo).to_vec();
        if candidates.is_empty() {
            return;
        }

        let context = ActionContext {
            menu_item_id: menu_item_id.clone(),
            menu_index,
            from_keybind: true,
        };

        let mut executed_any = false;
        for keybind in candidates {
            if !keybind.can_player_use(self.core.status, &player) {
                continue;
            }
            if keybind.requires_focus {
                let focused = menu_item_id.as_deref();
                if !focused.is_some_and(|id| keybind.actions.iter().any(|a| a == id)) {
                    continue;
                }
            }
            for action_id in &keybind.actions {
                let Some(action) = self.core.find_action(player_id, action_id).cloned() else { continue };
                let resolved = self.resolve_action(&player, &action);
                if resolved.enabled {
                    self.execute_action_with(player_id, action_id, None, Some(context.clone()));
                    executed_any = true;
                } else if let Some(reason) = resolved.disabled_reason {
                    self.core.speak_key(player_id, reason);
                }
            }
        }

        if executed_any && !self.menu_suppressed(player_id) {
            self.rebuild_all_menus();
        }
    }

    fn handle_actions_menu_selection(&mut self, player_id: PlayerId, action_id: String) {
        self.core.runtime.actions_menu_open.remove(&player_id);
        if action_id == "go_back" {
            self.rebuild_player_menu(player_id);
            return;
        }
        if let Some(action) = self.core.find_action(player_id, &action_id).cloned() {
            if let Some(player) = self.core.player_by_id(player_id).cloned() {
                if self.resolve_action(&player, &action).enabled {
                    self.execute_action(player_id, &action_id);
                }
            }
        }
        if !self.core.runtime.pending_actions.contains_key(&player_id) {
            self.rebuild_player_menu(player_id);
        }
    }

    // ----- ticking -----

    pub fn on_tick(&mut self) {
        if self.core.runtime.destroyed {
            return;
        }
        self.poll_estimate();
        if self.core.status != GameStatus::Finished {
            self.rules.on_tick(&mut self.core);
            self.process_bots();
        }
        self.core.process_scheduled_sounds();
        self.process_finish();
        self.flush_dirty_menus();
    }

    /// Bot cadence: think-ticks countdown, then pending action, then ask
    /// the rules what to do next.
    fn process_bots(&mut self) {
        if !self.core.game_active || self.core.status != GameStatus::Playing {
            return;
        }
        let Some(current_id) = self.core.current_player_id() else { return };
        let pending = {
            let Some(player) = self.core.player_by_id_mut(current_id) else { return };
            if !player.is_bot {
                return;
            }
            if player.bot_think_ticks > 0 {
                player.bot_think_ticks -= 1;
                return;
            }
            player.bot_pending_action.take()
        };
        if let Some(action) = pending {
            self.execute_action(current_id, &action);
            return;
        }
        if let Some(action) = self.rules.bot_think(&mut self.core, current_id) {
            if let Some(player) = self.core.player_by_id_mut(current_id) {
                player.bot_pending_action = Some(action);
            }
        }
    }

    // ----- persistence -----

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Restore runtime-only state after deserialization: keybinds and any
    /// game-specific caches.
    pub fn rebuild_runtime_state(&mut self) {
        self.install_keybinds();
        self.rules.rebuild_runtime_state(&mut self.core);
    }

    pub fn seed_rng(&mut self, seed: u64) {
        self.core.runtime.rng = StdRng::seed_from_u64(seed);
    }
}

fn trim_iqr_outliers(values: &[u64]) -> (Vec<u64>, usize) {
    if values.len() < 4 {
        return (values.to_vec(), 0);
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let n = sorted.len();
    let q1 = sorted[n / 4] as f64;
    let q3 = sorted[(3 * n) / 4] as f64;
    let iqr = q3 - q1;
    let lower = q1 - 1.5 * iqr;
    let upper = q3 + 1.5 * iqr;
    let kept: Vec<u64> =
        values.iter().copied().filter(|&v| (v as f64) >= lower && (v as f64) <= upper).collect();
    let removed = values.len() - kept.len();
    (kept, removed)
}

/// Render a tick count as "H:MM:SS", "M:SS", or "N seconds".
pub fn format_duration(ticks: f64) -> String {
    let total_seconds = (ticks / TICKS_PER_SECOND as f64) as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else if minutes > 0 {
        format!("{minutes}:{seconds:02}")
    } else {
        format!("{seconds} seconds")
    }
}

/// Object-safe access to a game, independent of its rules type. The
/// server's registry and tables drive games through this.
pub trait GameHandle: Send {
    fn game_type(&self) -> &'static str;
    fn display_name(&self) -> &'static str;
    fn category(&self) -> &'static str;
    fn min_players(&self) -> usize;
    fn max_players(&self) -> usize;
    fn core(&self) -> &GameCore;
    fn core_mut(&mut self) -> &mut GameCore;
    fn initialize_lobby(&mut self, host_name: &str, attachment: UserAttachment);
    fn add_player(&mut self, attachment: UserAttachment) -> PlayerId;
    fn handle_event(&mut self, player_id: PlayerId, packet: &ClientPacket);
    fn execute_action(&mut self, player_id: PlayerId, action_id: &str);
    fn on_tick(&mut self);
    fn rebuild_all_menus(&mut self);
    fn rebuild_player_menu(&mut self, player_id: PlayerId);
    fn to_json(&self) -> serde_json::Result<String>;
    fn rebuild_runtime_state(&mut self);
    fn build_game_result(&self) -> GameResult;
    fn rankings_for_rating(&self, result: &GameResult) -> Vec<Vec<PlayerId>>;
    fn leaderboard_types(&self) -> Vec<LeaderboardType>;
    fn set_estimate_pool(&mut self, pool: SharedEstimatePool);
    fn estimate_failed(&mut self);
    fn seed_rng(&mut self, seed: u64);
    fn set_option_raw(&mut self, name: &str, raw: &str) -> bool;

    /// Whether the seat is currently driven by this (human) username.
    fn is_user_attached(&self, player_id: PlayerId, username: &str) -> bool {
        self.core()
            .attachment(player_id)
            .is_some_and(|a| !a.is_bot && a.username == username)
    }
}

impl<R: Rules> GameHandle for Game<R> {
    fn game_type(&self) -> &'static str {
        self.rules.game_type()
    }
    fn display_name(&self) -> &'static str {
        self.rules.display_name()
    }
    fn category(&self) -> &'static str {
        self.rules.category()
    }
    fn min_players(&self) -> usize {
        self.rules.min_players()
    }
    fn max_players(&self) -> usize {
        self.rules.max_players()
    }
    fn core(&self) -> &GameCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut GameCore {
        &mut self.core
    }
    fn initialize_lobby(&mut self, host_name: &str, attachment: UserAttachment) {
        Game::initialize_lobby(self, host_name, attachment);
    }
    fn add_player(&mut self, attachment: UserAttachment) -> PlayerId {
        Game::add_player(self, attachment)
    }
    fn handle_event(&mut self, player_id: PlayerId, packet: &ClientPacket) {
        Game::handle_event(self, player_id, packet);
    }
    fn execute_action(&mut self, player_id: PlayerId, action_id: &str) {
        Game::execute_action(self, player_id, action_id);
        self.process_finish();
        self.flush_dirty_menus();
    }
    fn on_tick(&mut self) {
        Game::on_tick(self);
    }
    fn rebuild_all_menus(&mut self) {
        Game::rebuild_all_menus(self);
    }
    fn rebuild_player_menu(&mut self, player_id: PlayerId) {
        Game::rebuild_player_menu(self, player_id);
    }
    fn to_json(&self) -> serde_json::Result<String> {
        Game::to_json(self)
    }
    fn rebuild_runtime_state(&mut self) {
        Game::rebuild_runtime_state(self);
    }
    fn build_game_result(&self) -> GameResult {
        Game::build_game_result(self)
    }
    fn rankings_for_rating(&self, result: &GameResult) -> Vec<Vec<PlayerId>> {
        Game::rankings_for_rating(self, result)
    }
    fn leaderboard_types(&self) -> Vec<LeaderboardType> {
        self.rules.leaderboard_types()
    }
    fn set_estimate_pool(&mut self, pool: SharedEstimatePool) {
        Game::set_estimate_pool(self, pool);
    }
    fn estimate_failed(&mut self) {
        Game::estimate_failed(self);
    }
    fn seed_rng(&mut self, seed: u64) {
        Game::seed_rng(self, seed);
    }
    fn set_option_raw(&mut self, name: &str, raw: &str) -> bool {
        Game::set_option_raw(self, name, raw)
    }
}

/// Deserialize a saved game of a known rules type and rebuild its runtime
/// state. Used by the server's game registry.
pub fn game_from_json<R: Rules>(json: &str) -> serde_json::Result<Box<dyn GameHandle>> {
    let mut game: Game<R> = serde_json::from_str(json)?;
    game.rebuild_runtime_state();
    Ok(Box::new(game))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers as th;
    use serde_json::Value;

    /// Minimal game exercising the framework: players take turns tapping;
    /// first to reach the target wins.
    #[derive(Serialize, Deserialize)]
    struct TallyRules {
        scores: HashMap<PlayerId, i64>,
        target: i64,
    }

    impl Default for TallyRules {
        fn default() -> Self {
            Self { scores: HashMap::new(), target: 3 }
        }
    }

    impl Rules for TallyRules {
        fn game_type(&self) -> &'static str {
            "tally"
        }
        fn display_name(&self) -> &'static str {
            "Tally"
        }

        fn turn_action_set(&self, _core: &GameCore, _player: &Player) -> Option<ActionSet> {
            let mut set = ActionSet::new("turn");
            set.add(Action::new("tap", Text::raw("Tap"), "tap", "tap", "tap"));
            set
                .add(Action::new("boost", Text::raw("Boost"), "boost", "tap", "tap").with_input(
                    InputRequest::Editbox {
                        prompt: Text::raw("How much?"),
                        default: "1".to_string(),
                        bot_input: None,
                    },
                ));
            Some(set)
        }

        fn setup_keybinds(&self, keybinds: &mut KeybindMap) {
            keybinds.define(Keybind {
                name: "Tap".to_string(),
                key: "t".to_string(),
                actions: vec!["tap".to_string()],
                requires_focus: false,
                state: KeybindState::Active,
                players: Vec::new(),
                include_spectators: false,
            });
        }

        fn options(&self) -> Vec<OptionDef> {
            vec![OptionDef {
                name: "target",
                label: "game-set-target-score",
                prompt: "game-enter-target-score",
                kind: OptionKind::Int { min: 1, max: 100, value_key: "score" },
            }]
        }

        fn option_value(&self, name: &str) -> Option<OptionValue> {
            match name {
                "target" => Some(OptionValue::Int(self.target)),
                _ => None,
            }
        }

        fn set_option(&mut self, name: &str, value: OptionValue) {
            if name == "target" {
                if let Some(target) = value.as_int() {
                    self.target = target;
                }
            }
        }

        fn on_start(&mut self, core: &mut GameCore) {
            core.game_active = true;
            core.round = 1;
            let order: Vec<PlayerId> = core.active_players().iter().map(|p| p.id).collect();
            for id in &order {
                self.scores.insert(*id, 0);
            }
            core.set_turn_players(order, false);
            core.announce_turn();
        }

        fn bot_think(&mut self, _core: &mut GameCore, _player_id: PlayerId) -> Option<String> {
            Some("tap".to_string())
        }

        fn action_enabled(&self, core: &GameCore, player: &Player, hook: &str) -> Option<&'static str> {
            match hook {
                "tap" => {
                    if core.status != GameStatus::Playing {
                        Some("action-not-playing")
                    } else if player.is_spectator {
                        Some("action-spectator")
                    } else if !core.is_current(player.id) {
                        Some("action-not-your-turn")
                    } else {
                        None
                    }
                },
                _ => None,
            }
        }

        fn action_hidden(&self, core: &GameCore, player: &Player, hook: &str) -> Visibility {
            match hook {
                "tap" => {
                    if core.status == GameStatus::Playing && core.is_current(player.id) {
                        Visibility::Visible
                    } else {
                        Visibility::Hidden
                    }
                },
                _ => Visibility::Visible,
            }
        }

        fn handle_action(&mut self, core: &mut GameCore, player_id: PlayerId, hook: &str, input: Option<&str>) {
            match hook {
                "tap" => {
                    let score = self.scores.entry(player_id).or_insert(0);
                    *score += 1;
                    if *score >= self.target {
                        core.request_finish(true);
                    } else {
                        core.jolt_bots(2);
                        core.advance_turn(true);
                    }
                },
                "boost" => {
                    let amount: i64 = input.and_then(|s| s.parse().ok()).unwrap_or(0);
                    *self.scores.entry(player_id).or_insert(0) += amount;
                },
                _ => {},
            }
        }

        fn custom_result_data(&self, core: &GameCore) -> serde_json::Map<String, Value> {
            let mut data = serde_json::Map::new();
            let winner = self
                .scores
                .iter()
                .max_by_key(|(_, score)| **score)
                .and_then(|(id, _)| core.player_by_id(*id))
                .map(|p| p.name.clone());
            if let Some(winner) = winner {
                data.insert("winner_name".to_string(), Value::String(winner));
            }
            data
        }
    }

    fn new_game() -> Game<TallyRules> {
        Game::new(TallyRules::default())
    }

    #[test]
    fn lobby_contract() {
        let mut game = new_game();
        th::contract_lobby_initializes(&mut game);
    }

    #[test]
    fn start_contract() {
        let mut game = new_game();
        th::contract_start_with_bots(&mut game);
    }

    #[test]
    fn add_bot_through_editbox_flow() {
        let mut game = new_game();
        let host = th::human("Host");
        let host_id = host.user_id;
        game.initialize_lobby("Host", host);
        game.core.drain_outbox();

        // Keybind 'b' requests the bot-name editbox.
        game.handle_event(host_id, &th::keybind("b"));
        assert_eq!(game.core.runtime.pending_actions.get(&host_id).map(String::as_str), Some("add_bot"));

        // Submitting a name seats the bot.
        game.handle_event(host_id, &th::editbox("action_input_editbox", "Robby"));
        assert_eq!(game.core.players.len(), 2);
        assert!(game.core.players[1].is_bot);
        assert_eq!(game.core.players[1].name, "Robby");
    }

    #[test]
    fn blank_bot_name_picks_from_roster() {
        let mut game = new_game();
        let host_id = th::lobby_with_bots(&mut game, "Host", 1);
        // execute_action with no input goes through the editbox request,
        // so drive the handler directly with a blank submission.
        game.handle_event(host_id, &th::keybind("b"));
        game.handle_event(host_id, &th::editbox("action_input_editbox", " "));
        let bots: Vec<&str> =
            game.core.players.iter().filter(|p| p.is_bot).map(|p| p.name.as_str()).collect();
        assert_eq!(bots, ["Alice", "Bob"]);
    }

    #[test]
    fn non_host_cannot_start() {
        let mut game = new_game();
        let _host = th::lobby_with_bots(&mut game, "Host", 1);
        let guest = th::human("Guest");
        let guest_id = guest.user_id;
        game.add_player(guest);
        game.core.drain_outbox();

        game.execute_action(guest_id, "start_game");
        assert_eq!(game.core.status, GameStatus::Waiting);
        let speech = th::drain_speech(&mut game, guest_id);
        assert!(speech.iter().any(|s| s.contains("Only the host")), "got: {speech:?}");
    }

    #[test]
    fn idle_keybind_never_fires_while_playing() {
        let mut game = new_game();
        let host_id = th::lobby_with_bots(&mut game, "Host", 1);
        game.execute_action(host_id, "start_game");
        assert_eq!(game.core.status, GameStatus::Playing);

        let before = game.core.players.len();
        game.handle_event(host_id, &th::keybind("b"));
        assert_eq!(game.core.players.len(), before, "idle add-bot bind must not fire in play");
        assert!(game.core.runtime.pending_actions.is_empty());
    }

    #[test]
    fn active_keybind_never_fires_while_waiting() {
        let mut game = new_game();
        let host_id = th::lobby_with_bots(&mut game, "Host", 1);
        game.core.drain_outbox();
        game.handle_event(host_id, &th::keybind("t"));
        assert_eq!(game.rules.scores.get(&host_id), None);
    }

    #[test]
    fn turn_rotation_with_skips_and_reverse() {
        let mut core = GameCore::default();
        let ids: Vec<PlayerId> = (0..4).map(|_| Uuid::new_v4()).collect();
        for (i, id) in ids.iter().enumerate() {
            core.players.push(Player::new(*id, format!("P{i}"), true));
        }
        core.set_turn_players(ids.clone(), false);

        assert_eq!(core.current_player_id(), Some(ids[0]));
        core.advance_turn(false);
        assert_eq!(core.current_player_id(), Some(ids[1]));

        core.skip_next_players(1);
        core.advance_turn(false);
        assert_eq!(core.current_player_id(), Some(ids[3]), "skip should jump over P2");

        core.reverse_turn_direction();
        core.advance_turn(false);
        assert_eq!(core.current_player_id(), Some(ids[2]));

        core.reset_turn_order(false);
        assert_eq!(core.current_player_id(), Some(ids[0]));
        assert_eq!(core.turn_direction, 1);
        assert_eq!(core.turn_skip_count, 0);
    }

    #[test]
    fn sound_scheduler_fires_each_sound_exactly_once() {
        let mut core = GameCore::default();
        let id = Uuid::new_v4();
        core.players.push(Player::new(id, "P", false));

        for delay in 0..5u64 {
            core.schedule_sound(&format!("s{delay}.ogg"), delay);
        }
        for tick in 0..5u64 {
            core.process_scheduled_sounds();
            let sounds: Vec<String> = core
                .drain_outbox()
                .into_iter()
                .filter_map(|(_, e)| match e {
                    UiEvent::PlaySound { name, .. } => Some(name),
                    _ => None,
                })
                .collect();
            assert_eq!(sounds, vec![format!("s{tick}.ogg")], "tick {tick}");
        }
        assert!(core.scheduled_sounds.is_empty());
        assert_eq!(core.sound_tick, 5);
    }

    #[test]
    fn sound_sequence_spaces_by_prior_delay() {
        let mut core = GameCore::default();
        core.players.push(Player::new(Uuid::new_v4(), "P", false));

        core.schedule_sound_sequence(&[("a.ogg", 3), ("b.ogg", 2), ("c.ogg", 1)], 1);
        let ticks: Vec<u64> = core.scheduled_sounds.iter().map(|s| s.tick).collect();
        assert_eq!(ticks, vec![1, 4, 6]);
    }

    #[test]
    fn bot_cadence_thinks_then_queues_then_acts() {
        let mut game = new_game();
        let host_id = th::bot_lobby(&mut game, 3);
        game.execute_action(host_id, "start_game");

        // A fresh bot starts at zero think ticks, so tick 1 queues the
        // action and tick 2 executes it.
        let current = game.core.current_player_id().unwrap();
        game.on_tick();
        assert_eq!(
            game.core.player_by_id(current).unwrap().bot_pending_action.as_deref(),
            Some("tap")
        );
        game.on_tick();
        assert_eq!(game.rules.scores.get(&current), Some(&1));
    }

    #[test]
    fn bot_game_runs_to_completion() {
        let mut game = new_game();
        let (ticks, result) = th::contract_bot_game_completes(&mut game, 42, 2_000);
        assert!(ticks > 0);
        assert!(result.winner_name().is_some());
        let winner_score =
            game.rules.scores.values().max().copied().unwrap_or(0);
        assert!(winner_score >= game.rules.target);
        // All-bot games auto-destroy on finish.
        assert!(game.core.runtime.destroyed);
    }

    #[test]
    fn option_set_through_input_flow_clamps() {
        let mut game = new_game();
        let host_id = th::lobby_with_bots(&mut game, "Host", 0);

        game.handle_event(host_id, &th::menu_select("turn_menu", "set_target"));
        assert!(game.core.runtime.pending_actions.contains_key(&host_id));
        game.handle_event(host_id, &th::editbox("action_input_editbox", "999"));
        assert_eq!(game.rules.target, 100, "input beyond max clamps to range");

        // The options action label now reflects the new value.
        let set = game.core.action_sets_of(host_id).iter().find(|s| s.name == "options").unwrap();
        let action = set.get("set_target").unwrap();
        match &action.label {
            Text::Localized { args, .. } => {
                assert!(args.iter().any(|(k, v)| k == "score" && *v == Arg::Int(100)));
            },
            other => panic!("Expected localized label, got: {other:?}"),
        }
    }

    #[test]
    fn leave_during_play_converts_seat_to_bot() {
        let mut game = new_game();
        let host_id = th::lobby_with_bots(&mut game, "Host", 1);
        let guest = th::human("Guest");
        let guest_id = guest.user_id;
        game.add_player(guest);
        game.execute_action(host_id, "start_game");

        let index_before =
            game.core.players.iter().position(|p| p.id == guest_id).unwrap();
        let humans_before = game.core.human_count();
        game.execute_action(guest_id, "leave_game");

        let seat = &game.core.players[index_before];
        assert_eq!(seat.id, guest_id);
        assert_eq!(seat.name, "Guest");
        assert!(seat.is_bot);
        assert_eq!(game.core.human_count(), humans_before - 1);
        assert!(game.core.attachment(guest_id).is_some_and(|a| a.is_bot));
    }

    #[test]
    fn last_human_leaving_mid_game_destroys_table() {
        let mut game = new_game();
        let host_id = th::lobby_with_bots(&mut game, "Host", 1);
        game.execute_action(host_id, "start_game");
        game.execute_action(host_id, "leave_game");
        assert!(game.core.runtime.destroyed);
        let events = game.core.drain_events();
        assert!(events.iter().any(|e| matches!(e, TableEvent::Destroyed)));
    }

    #[test]
    fn host_leaving_lobby_transfers_host() {
        let mut game = new_game();
        let host_id = th::lobby_with_bots(&mut game, "Host", 1);
        let guest = th::human("Guest");
        game.add_player(guest);

        game.execute_action(host_id, "leave_game");
        assert_eq!(game.core.host, "Guest");
        assert!(game.core.player_by_name("Host").is_none());
    }

    #[test]
    fn visible_actions_are_subset_of_enabled() {
        let mut game = new_game();
        let host_id = th::lobby_with_bots(&mut game, "Host", 1);
        game.execute_action(host_id, "start_game");

        for player in game.core.players.clone() {
            let visible: Vec<String> =
                game.visible_actions(&player).into_iter().map(|ra| ra.action.id).collect();
            let all_enabled: Vec<String> = game
                .all_resolved_actions(&player)
                .into_iter()
                .filter(|ra| ra.enabled)
                .map(|ra| ra.action.id)
                .collect();
            for id in &visible {
                assert!(all_enabled.contains(id), "{id} visible but not enabled");
            }
        }
    }

    #[test]
    fn update_menu_preserves_focus() {
        let mut game = new_game();
        let host_id = th::lobby_with_bots(&mut game, "Host", 1);
        game.core.drain_outbox();
        game.update_player_menu(host_id, Some("tap".to_string()));
        let events = game.core.drain_outbox();
        match &events[0].1 {
            UiEvent::UpdateMenu { menu_id, selection_id, .. } => {
                assert_eq!(menu_id, "turn_menu");
                assert_eq!(selection_id.as_deref(), Some("tap"));
            },
            other => panic!("Expected UpdateMenu, got: {other:?}"),
        }
    }

    #[test]
    fn status_box_opens_and_closes() {
        let mut game = new_game();
        let host_id = th::lobby_with_bots(&mut game, "Host", 1);
        game.execute_action(host_id, "start_game");
        game.core.drain_outbox();

        // Scores are empty for tally, so use a direct status box.
        game.core.status_box(host_id, vec![Text::raw("line one")]);
        assert!(game.core.runtime.status_box_open.contains(&host_id));

        game.handle_event(host_id, &th::menu_select("status_box", "status_line"));
        assert!(!game.core.runtime.status_box_open.contains(&host_id));
        let events: Vec<UiEvent> =
            game.core.drain_outbox().into_iter().map(|(_, e)| e).collect();
        assert!(events.iter().any(|e| matches!(e, UiEvent::RemoveMenu { menu_id } if menu_id == "status_box")));
    }

    #[test]
    fn save_restore_mid_game_round_trip() {
        let mut game = new_game();
        let host_id = th::lobby_with_bots(&mut game, "Host", 1);
        game.execute_action(host_id, "start_game");
        game.execute_action(host_id, "tap");
        th::run_ticks(&mut game, 5);

        let restored = th::contract_save_restore(&mut game, game_from_json::<TallyRules>);
        // Rules state survives too.
        let json = restored.to_json().unwrap();
        let reparsed: Game<TallyRules> = serde_json::from_str(&json).unwrap();
        assert_eq!(reparsed.rules.scores.get(&host_id), Some(&1));
        assert_eq!(reparsed.rules.target, game.rules.target);
    }

    #[test]
    fn restored_game_ticks_like_the_original() {
        let mut game = new_game();
        let host_id = th::lobby_with_bots(&mut game, "Host", 2);
        game.execute_action(host_id, "start_game");
        game.execute_action(host_id, "tap");

        let json = game.to_json().unwrap();
        let mut restored: Game<TallyRules> = serde_json::from_str(&json).unwrap();
        restored.rebuild_runtime_state();

        // The same non-random action produces the same state on both.
        let current = game.core.current_player_id().unwrap();
        game.execute_action_with(current, "tap", None, None);
        restored.execute_action_with(current, "tap", None, None);
        assert_eq!(game.rules.scores, restored.rules.scores);
        assert_eq!(game.core.turn_index, restored.core.turn_index);
    }

    #[test]
    fn save_table_emits_save_event_for_host_only() {
        let mut game = new_game();
        let host_id = th::lobby_with_bots(&mut game, "Host", 1);
        let guest = th::human("Guest");
        let guest_id = guest.user_id;
        game.add_player(guest);
        game.core.drain_events();

        game.execute_action(guest_id, "save_table");
        assert!(game.core.drain_events().is_empty());

        game.execute_action(host_id, "save_table");
        let events = game.core.drain_events();
        assert!(
            events.iter().any(|e| matches!(e, TableEvent::SaveRequested { username } if username == "Host"))
        );
    }

    #[test]
    fn estimate_request_and_poll_flow() {
        let mut game = new_game();
        let host_id = th::lobby_with_bots(&mut game, "Host", 1);
        game.core.drain_events();
        game.execute_action(host_id, "estimate_duration");

        let events = game.core.drain_events();
        let (game_type, bots) = events
            .iter()
            .find_map(|e| match e {
                TableEvent::EstimateRequested { game_type, bots, .. } => {
                    Some((game_type.clone(), *bots))
                },
                _ => None,
            })
            .expect("estimate event");
        assert_eq!(game_type, "tally");
        assert_eq!(bots, 2);
        assert!(game.core.runtime.estimate_running);

        // Second request while running is refused.
        game.core.drain_outbox();
        game.execute_action(host_id, "estimate_duration");
        let speech = th::drain_speech(&mut game, host_id);
        assert!(speech.iter().any(|s| s.contains("already running")), "got: {speech:?}");

        // Feed results and poll.
        let pool = Arc::new(Mutex::new(EstimatePool {
            expected: 3,
            finished: 3,
            ticks: vec![1000, 1100, 1200],
            errors: Vec::new(),
        }));
        game.set_estimate_pool(Arc::clone(&pool));
        game.on_tick();
        assert!(!game.core.runtime.estimate_running);
        let speech = th::drain_speech(&mut game, host_id);
        assert!(speech.iter().any(|s| s.contains("Bots finish in about")), "got: {speech:?}");
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(100.0), "5 seconds");
        assert_eq!(format_duration(20.0 * 90.0), "1:30");
        assert_eq!(format_duration(20.0 * 3700.0), "1:01:40");
    }

    #[test]
    fn iqr_trim_drops_extreme_samples() {
        let values = vec![100, 110, 105, 95, 98, 102, 5000];
        let (kept, removed) = trim_iqr_outliers(&values);
        assert_eq!(removed, 1);
        assert!(!kept.contains(&5000));

        let few = vec![10, 20, 30];
        assert_eq!(trim_iqr_outliers(&few), (few.clone(), 0));
    }
}
