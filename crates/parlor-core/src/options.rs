//! Declarative game options.
//!
//! Games declare their options as [`OptionDef`]s; the framework generates
//! the "options" action set from them (one action per option, editbox for
//! scalars, menu for choices, direct toggle for booleans) together with
//! generic set/toggle handlers that validate and clamp input.

use serde::{Deserialize, Serialize};

use crate::action::{Action, ActionSet, InputRequest};
use crate::team::TeamManager;
use crate::ui::{Arg, Text};

/// A validated option value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OptionValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Choice(String),
}

impl OptionValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            OptionValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_choice(&self) -> Option<&str> {
        match self {
            OptionValue::Choice(c) => Some(c),
            _ => None,
        }
    }
}

/// Type-specific metadata and validation for one option.
#[derive(Debug, Clone)]
pub enum OptionKind {
    Int {
        min: i64,
        max: i64,
        /// Placeholder name the label/prompt templates interpolate.
        value_key: &'static str,
    },
    Float {
        min: f64,
        max: f64,
        decimal_places: u32,
        value_key: &'static str,
    },
    Bool {
        value_key: &'static str,
    },
    Menu {
        choices: Vec<String>,
        value_key: &'static str,
        /// Maps choice values to catalog keys for display.
        choice_labels: Vec<(String, String)>,
    },
    /// Menu specialized to team modes; choices come from the game's player
    /// bounds and display via the team-mode formatter.
    TeamMode {
        value_key: &'static str,
    },
}

/// One declared option.
#[derive(Debug, Clone)]
pub struct OptionDef {
    pub name: &'static str,
    /// Catalog key for the menu label; interpolates the current value.
    pub label: &'static str,
    /// Catalog key for the input prompt (unused for booleans).
    pub prompt: &'static str,
    pub kind: OptionKind,
}

impl OptionDef {
    /// Validate raw input, clamping scalars into range. Returns `None` for
    /// unparseable input (the option keeps its previous value).
    pub fn validate(&self, raw: &str) -> Option<OptionValue> {
        match &self.kind {
            OptionKind::Int { min, max, .. } => {
                let parsed: i64 = raw.trim().parse().ok()?;
                Some(OptionValue::Int(parsed.clamp(*min, *max)))
            },
            OptionKind::Float { min, max, decimal_places, .. } => {
                let parsed: f64 = raw.trim().parse().ok()?;
                let clamped = parsed.clamp(*min, *max);
                let factor = 10f64.powi(*decimal_places as i32);
                Some(OptionValue::Float((clamped * factor).round() / factor))
            },
            OptionKind::Bool { .. } => {
                Some(OptionValue::Bool(matches!(raw.to_lowercase().as_str(), "true" | "1" | "yes")))
            },
            OptionKind::Menu { .. } | OptionKind::TeamMode { .. } => {
                Some(OptionValue::Choice(raw.to_string()))
            },
        }
    }

    /// Display form of a value, for interpolation into labels.
    pub fn display_value(&self, value: &OptionValue) -> Arg {
        match (&self.kind, value) {
            (OptionKind::Bool { .. }, OptionValue::Bool(b)) => {
                Arg::Key(if *b { "option-on" } else { "option-off" }.to_string())
            },
            (OptionKind::Menu { choice_labels, .. }, OptionValue::Choice(choice)) => choice_labels
                .iter()
                .find(|(value, _)| value == choice)
                .map(|(_, key)| Arg::Key(key.clone()))
                .unwrap_or_else(|| Arg::Str(choice.clone())),
            (OptionKind::TeamMode { .. }, OptionValue::Choice(choice)) => {
                Arg::Nested(Box::new(TeamManager::format_team_mode(choice)))
            },
            (_, OptionValue::Int(n)) => Arg::Int(*n),
            (_, OptionValue::Float(f)) => Arg::Str(f.to_string()),
            (_, OptionValue::Bool(b)) => Arg::Str(b.to_string()),
            (_, OptionValue::Choice(c)) => Arg::Str(c.clone()),
        }
    }

    fn value_key(&self) -> &'static str {
        match &self.kind {
            OptionKind::Int { value_key, .. }
            | OptionKind::Float { value_key, .. }
            | OptionKind::Bool { value_key }
            | OptionKind::Menu { value_key, .. }
            | OptionKind::TeamMode { value_key } => value_key,
        }
    }

    /// The hook/action id the framework generates for this option.
    pub fn action_id(&self) -> String {
        match self.kind {
            OptionKind::Bool { .. } => format!("toggle_{}", self.name),
            _ => format!("set_{}", self.name),
        }
    }

    /// Build the action representing this option at its current value.
    pub fn build_action(&self, current: &OptionValue) -> Action {
        let label = Text::Localized {
            key: self.label.to_string(),
            args: vec![(self.value_key().to_string(), self.display_value(current))],
        };
        let mut action = Action::new(self.action_id(), label, "", "option", "option");
        match &self.kind {
            OptionKind::Bool { .. } => {
                action.handler = "toggle_option".to_string();
            },
            OptionKind::Int { .. } | OptionKind::Float { .. } => {
                action.handler = "set_option".to_string();
                let default = match current {
                    OptionValue::Int(n) => n.to_string(),
                    OptionValue::Float(f) => f.to_string(),
                    _ => String::new(),
                };
                action.input_request = Some(InputRequest::Editbox {
                    prompt: Text::key(self.prompt),
                    default,
                    bot_input: None,
                });
            },
            OptionKind::Menu { .. } | OptionKind::TeamMode { .. } => {
                action.handler = "set_option".to_string();
                action.input_request = Some(InputRequest::Menu {
                    prompt: Text::key(self.prompt),
                    options: format!("options_for_{}", self.name),
                    bot_select: None,
                });
            },
        }
        action
    }

    /// Display text for one choice of a menu option.
    pub fn choice_text(&self, choice: &str) -> Text {
        match &self.kind {
            OptionKind::Menu { choice_labels, .. } => choice_labels
                .iter()
                .find(|(value, _)| value == choice)
                .map(|(_, key)| Text::key(key.clone()))
                .unwrap_or_else(|| Text::raw(choice)),
            OptionKind::TeamMode { .. } => TeamManager::format_team_mode(choice),
            _ => Text::raw(choice),
        }
    }
}

/// Build the auto-generated "options" action set from a list of defs and a
/// value accessor.
pub fn build_options_action_set(
    defs: &[OptionDef],
    value_of: impl Fn(&str) -> Option<OptionValue>,
) -> ActionSet {
    let mut set = ActionSet::new("options");
    for def in defs {
        if let Some(current) = value_of(def.name) {
            set.add(def.build_action(&current));
        }
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target_score() -> OptionDef {
        OptionDef {
            name: "target_score",
            label: "game-set-target-score",
            prompt: "game-enter-target-score",
            kind: OptionKind::Int { min: 10, max: 1000, value_key: "score" },
        }
    }

    #[test]
    fn int_input_is_clamped_to_range() {
        let def = target_score();
        assert_eq!(def.validate("50"), Some(OptionValue::Int(50)));
        assert_eq!(def.validate("5"), Some(OptionValue::Int(10)));
        assert_eq!(def.validate("99999"), Some(OptionValue::Int(1000)));
        assert_eq!(def.validate("not a number"), None);
    }

    #[test]
    fn float_input_rounds_to_declared_places() {
        let def = OptionDef {
            name: "speed",
            label: "l",
            prompt: "p",
            kind: OptionKind::Float { min: 0.0, max: 10.0, decimal_places: 1, value_key: "value" },
        };
        assert_eq!(def.validate("3.14"), Some(OptionValue::Float(3.1)));
        assert_eq!(def.validate("99"), Some(OptionValue::Float(10.0)));
    }

    #[test]
    fn scalar_options_generate_editbox_actions() {
        let def = target_score();
        let action = def.build_action(&OptionValue::Int(50));
        assert_eq!(action.id, "set_target_score");
        assert_eq!(action.handler, "set_option");
        assert!(matches!(action.input_request, Some(InputRequest::Editbox { .. })));
    }

    #[test]
    fn bool_options_generate_toggle_actions() {
        let def = OptionDef {
            name: "show_hints",
            label: "l",
            prompt: "",
            kind: OptionKind::Bool { value_key: "enabled" },
        };
        let action = def.build_action(&OptionValue::Bool(false));
        assert_eq!(action.id, "toggle_show_hints");
        assert_eq!(action.handler, "toggle_option");
        assert!(action.input_request.is_none());
    }

    #[test]
    fn options_action_set_covers_all_defs() {
        let defs = vec![
            target_score(),
            OptionDef {
                name: "team_mode",
                label: "game-set-team-mode",
                prompt: "game-select-team-mode",
                kind: OptionKind::TeamMode { value_key: "mode" },
            },
        ];
        let set = build_options_action_set(&defs, |name| match name {
            "target_score" => Some(OptionValue::Int(50)),
            "team_mode" => Some(OptionValue::Choice("individual".to_string())),
            _ => None,
        });
        assert_eq!(set.len(), 2);
        assert!(set.get("set_target_score").is_some());
        assert!(set.get("set_team_mode").is_some());
    }
}
