//! Wire protocol: JSON text frames, one packet per frame, tagged by a
//! required `"type"` field. Frames that fail to decode are protocol noise
//! and are dropped by the transport without disconnecting the client.

use serde::{Deserialize, Serialize};

use crate::catalog;
use crate::ui::{EscapeBehavior, UiEvent};

/// Client -> server packets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientPacket {
    Authorize {
        username: String,
        password: String,
    },
    Register {
        username: String,
        password: String,
    },
    Menu {
        menu_id: String,
        #[serde(default)]
        selection_id: Option<String>,
        /// 1-based index fallback when no selection id is known.
        #[serde(default)]
        selection: Option<usize>,
    },
    Editbox {
        input_id: String,
        text: String,
    },
    Keybind {
        key: String,
        #[serde(default)]
        shift: bool,
        #[serde(default)]
        control: bool,
        #[serde(default)]
        alt: bool,
        #[serde(default)]
        menu_item_id: Option<String>,
        #[serde(default)]
        menu_index: Option<usize>,
    },
    Chat {
        convo: ChatConvo,
        message: String,
        #[serde(default)]
        language: Option<String>,
    },
    Ping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatConvo {
    Table,
    Global,
}

/// One game in the catalog advertised after login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameListing {
    #[serde(rename = "type")]
    pub game_type: String,
    pub name: String,
}

/// A rendered menu entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMenuItem {
    pub text: String,
    pub id: String,
}

/// Server -> client packets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerPacket {
    AuthorizeSuccess {
        username: String,
        version: String,
    },
    Disconnect {
        #[serde(default)]
        reason: Option<String>,
        reconnect: bool,
    },
    UpdateOptionsLists {
        games: Vec<GameListing>,
    },
    Speak {
        text: String,
    },
    ShowMenu {
        menu_id: String,
        items: Vec<WireMenuItem>,
        multiletter: bool,
        escape_behavior: EscapeBehavior,
    },
    UpdateMenu {
        menu_id: String,
        items: Vec<WireMenuItem>,
        #[serde(default)]
        selection_id: Option<String>,
    },
    RemoveMenu {
        menu_id: String,
    },
    ShowEditbox {
        input_id: String,
        prompt: String,
        default: String,
    },
    PlaySound {
        name: String,
        volume: i32,
        pan: i32,
        pitch: i32,
    },
    PlayMusic {
        name: String,
        looping: bool,
    },
    PlayAmbience {
        #[serde(rename = "loop")]
        looped: String,
        #[serde(default)]
        intro: Option<String>,
        #[serde(default)]
        outro: Option<String>,
    },
    StopAmbience,
    Chat {
        convo: ChatConvo,
        sender: String,
        message: String,
        language: String,
    },
    Pong,
}

/// Render a queued [`UiEvent`] into the packet a specific user receives.
/// Returns `None` when the event is suppressed for this user (turn sound
/// preference).
pub fn render_ui_event(event: &UiEvent, locale: &str, play_turn_sound: bool) -> Option<ServerPacket> {
    let packet = match event {
        UiEvent::Speak(text) => ServerPacket::Speak { text: catalog::render(locale, text) },
        UiEvent::ShowMenu { menu_id, items, multiletter, escape_behavior } => {
            ServerPacket::ShowMenu {
                menu_id: menu_id.clone(),
                items: items
                    .iter()
                    .map(|item| WireMenuItem {
                        text: catalog::render(locale, &item.text),
                        id: item.id.clone(),
                    })
                    .collect(),
                multiletter: *multiletter,
                escape_behavior: *escape_behavior,
            }
        },
        UiEvent::UpdateMenu { menu_id, items, selection_id } => ServerPacket::UpdateMenu {
            menu_id: menu_id.clone(),
            items: items
                .iter()
                .map(|item| WireMenuItem {
                    text: catalog::render(locale, &item.text),
                    id: item.id.clone(),
                })
                .collect(),
            selection_id: selection_id.clone(),
        },
        UiEvent::RemoveMenu { menu_id } => ServerPacket::RemoveMenu { menu_id: menu_id.clone() },
        UiEvent::ShowEditbox { input_id, prompt, default } => ServerPacket::ShowEditbox {
            input_id: input_id.clone(),
            prompt: catalog::render(locale, prompt),
            default: default.clone(),
        },
        UiEvent::PlaySound { name, volume, pan, pitch } => ServerPacket::PlaySound {
            name: name.clone(),
            volume: *volume,
            pan: *pan,
            pitch: *pitch,
        },
        UiEvent::TurnSound { name } => {
            if !play_turn_sound {
                return None;
            }
            ServerPacket::PlaySound { name: name.clone(), volume: 100, pan: 0, pitch: 100 }
        },
        UiEvent::PlayMusic { name, looping } => {
            ServerPacket::PlayMusic { name: name.clone(), looping: *looping }
        },
        UiEvent::PlayAmbience { looped, intro, outro } => ServerPacket::PlayAmbience {
            looped: looped.clone(),
            intro: if intro.is_empty() { None } else { Some(intro.clone()) },
            outro: if outro.is_empty() { None } else { Some(outro.clone()) },
        },
        UiEvent::StopAmbience => ServerPacket::StopAmbience,
    };
    Some(packet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::Text;

    #[test]
    fn authorize_decodes_from_wire_json() {
        let json = r#"{"type":"authorize","username":"alice","password":"secret"}"#;
        let packet: ClientPacket = serde_json::from_str(json).unwrap();
        assert_eq!(
            packet,
            ClientPacket::Authorize {
                username: "alice".to_string(),
                password: "secret".to_string(),
            }
        );
    }

    #[test]
    fn keybind_modifiers_default_false() {
        let json = r#"{"type":"keybind","key":"b"}"#;
        let packet: ClientPacket = serde_json::from_str(json).unwrap();
        match packet {
            ClientPacket::Keybind { key, shift, control, alt, menu_item_id, menu_index } => {
                assert_eq!(key, "b");
                assert!(!shift && !control && !alt);
                assert!(menu_item_id.is_none());
                assert!(menu_index.is_none());
            },
            other => panic!("Expected keybind, got: {other:?}"),
        }
    }

    #[test]
    fn menu_selection_index_is_optional() {
        let json = r#"{"type":"menu","menu_id":"turn_menu","selection":2}"#;
        let packet: ClientPacket = serde_json::from_str(json).unwrap();
        match packet {
            ClientPacket::Menu { menu_id, selection_id, selection } => {
                assert_eq!(menu_id, "turn_menu");
                assert!(selection_id.is_none());
                assert_eq!(selection, Some(2));
            },
            other => panic!("Expected menu, got: {other:?}"),
        }
    }

    #[test]
    fn unknown_packet_type_fails_to_decode() {
        let json = r#"{"type":"fly_to_moon","speed":9000}"#;
        let result: Result<ClientPacket, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn game_listing_uses_type_field() {
        let listing = GameListing { game_type: "pig".to_string(), name: "Pig".to_string() };
        let json: serde_json::Value = serde_json::to_value(&listing).unwrap();
        assert_eq!(json["type"], "pig");
        assert_eq!(json["name"], "Pig");
    }

    #[test]
    fn play_ambience_uses_loop_field() {
        let packet = ServerPacket::PlayAmbience {
            looped: "tavern.ogg".to_string(),
            intro: None,
            outro: None,
        };
        let json: serde_json::Value = serde_json::to_value(&packet).unwrap();
        assert_eq!(json["type"], "play_ambience");
        assert_eq!(json["loop"], "tavern.ogg");
    }

    #[test]
    fn turn_sound_respects_preference() {
        let event = UiEvent::TurnSound { name: "turn.ogg".to_string() };
        assert!(render_ui_event(&event, "en", true).is_some());
        assert!(render_ui_event(&event, "en", false).is_none());
    }

    #[test]
    fn speak_renders_recipient_locale() {
        let event = UiEvent::Speak(Text::with_args("user-online", vec![("player", "Bob".into())]));
        match render_ui_event(&event, "en", true).unwrap() {
            ServerPacket::Speak { text } => assert_eq!(text, "Bob is online."),
            other => panic!("Expected speak, got: {other:?}"),
        }
    }

    #[test]
    fn server_packet_round_trip() {
        let packet = ServerPacket::ShowMenu {
            menu_id: "main_menu".to_string(),
            items: vec![WireMenuItem { text: "Play".to_string(), id: "play".to_string() }],
            multiletter: true,
            escape_behavior: EscapeBehavior::SelectLast,
        };
        let json = serde_json::to_string(&packet).unwrap();
        let back: ServerPacket = serde_json::from_str(&json).unwrap();
        assert_eq!(packet, back);
    }
}
