//! Declarative actions.
//!
//! An [`Action`] is pure data: its behavior is referenced through hook name
//! strings resolved against the game at execution time, which keeps whole
//! action sets serializable alongside the game state. Hook names are
//! resolved through a fixed dispatch table on the game (framework hooks
//! first, then the game's own match), never through runtime reflection.

use serde::{Deserialize, Serialize};

use crate::ui::Text;

/// Visibility state for a resolved action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Input requested from the actor before the handler runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputRequest {
    /// Present a menu of options. `options` is the hook returning the
    /// option list; `bot_select` (if set) picks one for bots.
    Menu {
        prompt: Text,
        options: String,
        #[serde(default)]
        bot_select: Option<String>,
    },
    /// Present an editbox. `bot_input` (if set) supplies a bot's answer,
    /// otherwise bots submit the default.
    Editbox {
        prompt: Text,
        #[serde(default)]
        default: String,
        #[serde(default)]
        bot_input: Option<String>,
    },
}

/// One player-visible operation, fully described by data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    /// Static label, used unless `get_label` is set.
    pub label: Text,
    /// Hook invoked when the action executes.
    pub handler: String,
    /// Hook returning `None` when enabled, or a disabled-reason key.
    pub is_enabled: String,
    /// Hook returning the action's visibility.
    pub is_hidden: String,
    /// Optional hook computing a dynamic label.
    #[serde(default)]
    pub get_label: Option<String>,
    #[serde(default)]
    pub input_request: Option<InputRequest>,
    /// Excluded from the fallback actions menu even when enabled.
    #[serde(default)]
    pub skip_actions_menu: bool,
}

impl Action {
    pub fn new(
        id: impl Into<String>,
        label: Text,
        handler: impl Into<String>,
        is_enabled: impl Into<String>,
        is_hidden: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            label,
            handler: handler.into(),
            is_enabled: is_enabled.into(),
            is_hidden: is_hidden.into(),
            get_label: None,
            input_request: None,
            skip_actions_menu: false,
        }
    }

    pub fn with_label_hook(mut self, hook: impl Into<String>) -> Self {
        self.get_label = Some(hook.into());
        self
    }

    pub fn with_input(mut self, request: InputRequest) -> Self {
        self.input_request = Some(request);
        self
    }

    pub fn without_actions_menu(mut self) -> Self {
        self.skip_actions_menu = true;
        self
    }
}

/// An action resolved for one player. Never serialized; computed fresh
/// whenever a menu is built.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAction {
    pub action: Action,
    pub label: Text,
    pub enabled: bool,
    pub disabled_reason: Option<&'static str>,
    pub visible: bool,
}

/// A named ordered group of actions owned by one player.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionSet {
    pub name: String,
    actions: Vec<Action>,
}

impl ActionSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), actions: Vec::new() }
    }

    /// Add an action, replacing any existing action with the same id while
    /// preserving its position.
    pub fn add(&mut self, action: Action) {
        if let Some(existing) = self.actions.iter_mut().find(|a| a.id == action.id) {
            *existing = action;
        } else {
            self.actions.push(action);
        }
    }

    pub fn remove(&mut self, action_id: &str) {
        self.actions.retain(|a| a.id != action_id);
    }

    pub fn remove_by_prefix(&mut self, prefix: &str) {
        self.actions.retain(|a| !a.id.starts_with(prefix));
    }

    pub fn get(&self, action_id: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.id == action_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter()
    }

    pub fn clear(&mut self) {
        self.actions.clear();
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(id: &str) -> Action {
        Action::new(id, Text::raw(id), id, id, id)
    }

    #[test]
    fn add_replaces_in_place() {
        let mut set = ActionSet::new("turn");
        set.add(action("roll"));
        set.add(action("bank"));

        let mut replacement = action("roll");
        replacement.label = Text::raw("Roll again");
        set.add(replacement);

        assert_eq!(set.len(), 2);
        let ids: Vec<&str> = set.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, ["roll", "bank"]);
        assert_eq!(set.get("roll").unwrap().label, Text::raw("Roll again"));
    }

    #[test]
    fn remove_by_prefix() {
        let mut set = ActionSet::new("turn");
        set.add(action("take_combo_0"));
        set.add(action("take_combo_1"));
        set.add(action("roll"));
        set.remove_by_prefix("take_combo_");
        assert_eq!(set.len(), 1);
        assert!(set.get("roll").is_some());
    }

    #[test]
    fn action_set_round_trips_through_json() {
        let mut set = ActionSet::new("lobby");
        set.add(
            Action::new("add_bot", Text::key("add-bot"), "add_bot", "add_bot", "add_bot")
                .with_input(InputRequest::Editbox {
                    prompt: Text::key("enter-bot-name"),
                    default: String::new(),
                    bot_input: Some("add_bot".to_string()),
                }),
        );
        let json = serde_json::to_string(&set).unwrap();
        let back: ActionSet = serde_json::from_str(&json).unwrap();
        assert_eq!(set, back);
    }
}
