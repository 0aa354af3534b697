//! Keybinds. Runtime-only: reinstalled on game construction and after a
//! saved game is rebuilt.

use std::collections::HashMap;

use crate::game::GameStatus;
use crate::player::Player;

/// When a keybind may fire, relative to the game status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeybindState {
    Never,
    /// Only while the table is waiting in the lobby.
    Idle,
    /// Only while the game is being played.
    Active,
    #[default]
    Always,
}

impl KeybindState {
    pub fn allows(self, status: GameStatus) -> bool {
        match self {
            KeybindState::Never => false,
            KeybindState::Idle => status == GameStatus::Waiting,
            KeybindState::Active => status == GameStatus::Playing,
            KeybindState::Always => true,
        }
    }
}

/// A key combo bound to one or more action ids.
#[derive(Debug, Clone)]
pub struct Keybind {
    pub name: String,
    pub key: String,
    pub actions: Vec<String>,
    /// The focused menu item must be one of `actions` for this bind to fire.
    pub requires_focus: bool,
    pub state: KeybindState,
    /// Player names allowed to use the bind; empty means everyone.
    pub players: Vec<String>,
    pub include_spectators: bool,
}

impl Keybind {
    pub fn can_player_use(&self, status: GameStatus, player: &Player) -> bool {
        if !self.state.allows(status) {
            return false;
        }
        if player.is_spectator && !self.include_spectators {
            return false;
        }
        if !self.players.is_empty() && !self.players.iter().any(|n| n == &player.name) {
            return false;
        }
        true
    }
}

/// Key combo string -> keybinds sharing it. Several binds may share a key
/// with disjoint allowed-states; registration order is preserved.
#[derive(Debug, Clone, Default)]
pub struct KeybindMap {
    binds: HashMap<String, Vec<Keybind>>,
}

impl KeybindMap {
    pub fn define(&mut self, keybind: Keybind) {
        self.binds.entry(keybind.key.clone()).or_default().push(keybind);
    }

    pub fn lookup(&self, key: &str) -> &[Keybind] {
        self.binds.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn clear(&mut self) {
        self.binds.clear();
    }

    /// First key combo bound to an action, used to annotate menu labels.
    pub fn key_for_action(&self, action_id: &str) -> Option<&str> {
        let mut keys: Vec<&String> = self.binds.keys().collect();
        keys.sort();
        for key in keys {
            for bind in &self.binds[key] {
                if bind.actions.iter().any(|a| a == action_id) {
                    return Some(key);
                }
            }
        }
        None
    }
}

/// Normalize a raw key event into the registered combo form:
/// lowercase with `shift+`/`ctrl+`/`alt+` prefixes in that order.
pub fn normalize_key(key: &str, shift: bool, ctrl: bool, alt: bool) -> String {
    let mut combo = key.to_lowercase();
    if shift && !combo.starts_with("shift+") {
        combo = format!("shift+{combo}");
    }
    if ctrl && !combo.starts_with("ctrl+") {
        combo = format!("ctrl+{combo}");
    }
    if alt && !combo.starts_with("alt+") {
        combo = format!("alt+{combo}");
    }
    combo
}
