//! Outbound UI effects.
//!
//! Games and the shell enqueue [`UiEvent`]s addressed to players. Events
//! carry unrendered [`Text`] so each recipient can be served their own
//! locale when the outbox is flushed at the end of the tick.

use serde::{Deserialize, Serialize};

use crate::player::PlayerId;

/// A value interpolated into a localized message template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Arg {
    /// Literal string, inserted verbatim.
    Str(String),
    /// Integer, formatted with `to_string`.
    Int(i64),
    /// Another catalog key, rendered (without args) in the recipient locale.
    Key(String),
    /// A nested [`Text`], rendered in the recipient locale.
    Nested(Box<Text>),
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Str(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Str(value)
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::Int(value)
    }
}

impl From<u32> for Arg {
    fn from(value: u32) -> Self {
        Arg::Int(i64::from(value))
    }
}

impl From<usize> for Arg {
    fn from(value: usize) -> Self {
        Arg::Int(value as i64)
    }
}

/// Text that is either raw or a catalog key plus arguments, rendered per
/// recipient locale at flush time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Text {
    Raw(String),
    Localized { key: String, args: Vec<(String, Arg)> },
}

impl Text {
    pub fn raw(text: impl Into<String>) -> Self {
        Text::Raw(text.into())
    }

    pub fn key(key: impl Into<String>) -> Self {
        Text::Localized { key: key.into(), args: Vec::new() }
    }

    pub fn with_args(key: impl Into<String>, args: Vec<(&str, Arg)>) -> Self {
        Text::Localized {
            key: key.into(),
            args: args.into_iter().map(|(name, arg)| (name.to_string(), arg)).collect(),
        }
    }
}

/// One entry of a menu sent to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItem {
    pub text: Text,
    pub id: String,
}

impl MenuItem {
    pub fn new(text: Text, id: impl Into<String>) -> Self {
        Self { text, id: id.into() }
    }
}

/// What the client does when Escape is pressed inside a menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscapeBehavior {
    /// Escape is forwarded to the server as a keybind.
    Keybind,
    /// Escape activates the last menu item (conventionally "back").
    SelectLast,
}

/// A UI effect queued for one player. Mirrors the server→client packets,
/// pre-localization.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Speak(Text),
    ShowMenu {
        menu_id: String,
        items: Vec<MenuItem>,
        multiletter: bool,
        escape_behavior: EscapeBehavior,
    },
    UpdateMenu {
        menu_id: String,
        items: Vec<MenuItem>,
        selection_id: Option<String>,
    },
    RemoveMenu {
        menu_id: String,
    },
    ShowEditbox {
        input_id: String,
        prompt: Text,
        default: String,
    },
    PlaySound {
        name: String,
        volume: i32,
        pan: i32,
        pitch: i32,
    },
    /// Like `PlaySound` but dropped at flush time for users who disabled
    /// the turn sound preference.
    TurnSound {
        name: String,
    },
    PlayMusic {
        name: String,
        looping: bool,
    },
    PlayAmbience {
        looped: String,
        intro: String,
        outro: String,
    },
    StopAmbience,
}

/// Per-player queue of pending UI effects, drained each tick.
#[derive(Debug, Default)]
pub struct Outbox {
    events: Vec<(PlayerId, UiEvent)>,
}

impl Outbox {
    pub fn push(&mut self, player: PlayerId, event: UiEvent) {
        self.events.push((player, event));
    }

    pub fn drain(&mut self) -> Vec<(PlayerId, UiEvent)> {
        std::mem::take(&mut self.events)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn outbox_drains_in_order() {
        let mut outbox = Outbox::default();
        let player = Uuid::new_v4();
        outbox.push(player, UiEvent::Speak(Text::raw("one")));
        outbox.push(player, UiEvent::Speak(Text::raw("two")));

        let drained = outbox.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].1, UiEvent::Speak(Text::raw("one")));
        assert!(outbox.is_empty());
    }

    #[test]
    fn escape_behavior_serializes_snake_case() {
        let json = serde_json::to_string(&EscapeBehavior::SelectLast).unwrap();
        assert_eq!(json, "\"select_last\"");
    }
}
