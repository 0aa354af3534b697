pub mod action;
pub mod catalog;
pub mod dice;
pub mod game;
pub mod keybind;
pub mod options;
pub mod player;
pub mod poker;
pub mod prefs;
pub mod protocol;
pub mod result;
pub mod team;
pub mod time;
pub mod ui;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use uuid::Uuid;

    use crate::catalog;
    use crate::game::{GameHandle, GameStatus, TableEvent, UserAttachment};
    use crate::player::PlayerId;
    use crate::prefs::Preferences;
    use crate::protocol::ClientPacket;
    use crate::ui::UiEvent;

    /// A human attachment with a fresh uuid.
    pub fn human(name: &str) -> UserAttachment {
        human_with_id(Uuid::new_v4(), name)
    }

    pub fn human_with_id(user_id: PlayerId, name: &str) -> UserAttachment {
        UserAttachment {
            user_id,
            username: name.to_string(),
            is_bot: false,
            prefs: Preferences::default(),
        }
    }

    pub fn menu_select(menu_id: &str, selection_id: &str) -> ClientPacket {
        ClientPacket::Menu {
            menu_id: menu_id.to_string(),
            selection_id: Some(selection_id.to_string()),
            selection: None,
        }
    }

    pub fn keybind(key: &str) -> ClientPacket {
        ClientPacket::Keybind {
            key: key.to_string(),
            shift: false,
            control: false,
            alt: false,
            menu_item_id: None,
            menu_index: None,
        }
    }

    pub fn editbox(input_id: &str, text: &str) -> ClientPacket {
        ClientPacket::Editbox { input_id: input_id.to_string(), text: text.to_string() }
    }

    pub fn run_ticks(game: &mut dyn GameHandle, n: u64) {
        for _ in 0..n {
            game.on_tick();
        }
    }

    /// Rendered English speech queued for one player, draining the whole
    /// outbox.
    pub fn drain_speech(game: &mut dyn GameHandle, player: PlayerId) -> Vec<String> {
        game.core_mut()
            .drain_outbox()
            .into_iter()
            .filter(|(id, _)| *id == player)
            .filter_map(|(_, event)| match event {
                UiEvent::Speak(text) => Some(catalog::render("en", &text)),
                _ => None,
            })
            .collect()
    }

    /// Set up a lobby: human host plus `bots` bot seats added through the
    /// real add-bot action. Returns the host's player id.
    pub fn lobby_with_bots(game: &mut dyn GameHandle, host: &str, bots: usize) -> PlayerId {
        let attachment = human(host);
        let host_id = attachment.user_id;
        game.initialize_lobby(host, attachment);
        for _ in 0..bots {
            game.execute_action(host_id, "add_bot");
        }
        host_id
    }

    /// Set up a headless bot-only lobby (bot host included in `bots`),
    /// the same shape the simulation harness uses. Returns the bot
    /// host's player id.
    pub fn bot_lobby(game: &mut dyn GameHandle, bots: usize) -> PlayerId {
        let host_id = Uuid::new_v4();
        game.initialize_lobby("Simulant", UserAttachment::bot(host_id, "Simulant"));
        for _ in 1..bots.max(1) {
            game.execute_action(host_id, "add_bot");
        }
        host_id
    }

    // ================================================================
    // Game contract tests
    // ================================================================
    // Every game crate calls these from its own #[cfg(test)] module with
    // a concrete game instance.

    /// After `initialize_lobby`, the host is seated with the standard
    /// action set stack and the table is waiting.
    pub fn contract_lobby_initializes(game: &mut dyn GameHandle) {
        let host_id = lobby_with_bots(game, "Host", 0);
        assert_eq!(game.core().status, GameStatus::Waiting);
        assert_eq!(game.core().host, "Host");
        assert_eq!(game.core().players.len(), 1);
        let sets = game.core().action_sets_of(host_id);
        let names: Vec<&str> = sets.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"lobby"), "host must have the lobby set, got: {names:?}");
        assert!(names.contains(&"standard"), "host must have the standard set, got: {names:?}");
        assert!(names.contains(&"estimate"), "host must have the estimate set, got: {names:?}");
    }

    /// Filling the table with bots and starting transitions to playing
    /// with a non-empty turn order.
    pub fn contract_start_with_bots(game: &mut dyn GameHandle) {
        let bots = game.min_players().saturating_sub(1).max(1);
        let host_id = lobby_with_bots(game, "Host", bots);
        game.execute_action(host_id, "start_game");
        assert_eq!(game.core().status, GameStatus::Playing);
        assert!(!game.core().turn_player_ids.is_empty(), "turn order must be seeded on start");
        assert!(game.core().current_player().is_some());
    }

    /// A bot-only game runs to completion within `max_ticks` and reports
    /// a result. Returns (duration ticks, result) for further checks.
    pub fn contract_bot_game_completes(
        game: &mut dyn GameHandle,
        seed: u64,
        max_ticks: u64,
    ) -> (u64, crate::result::GameResult) {
        let bots = game.min_players().max(3);
        let host_id = bot_lobby(game, bots);
        assert!(game.core().players.iter().all(|p| p.is_bot));
        game.seed_rng(seed);
        game.execute_action(host_id, "start_game");
        assert_eq!(game.core().status, GameStatus::Playing);

        let mut ticks = 0;
        while ticks < max_ticks && game.core().status == GameStatus::Playing {
            game.on_tick();
            ticks += 1;
        }
        assert_eq!(
            game.core().status,
            GameStatus::Finished,
            "bot game should finish within {max_ticks} ticks"
        );
        (game.core().sound_tick, game.build_game_result())
    }

    /// Serialize, restore through `from_json`, and verify the restored
    /// game carries the same persistent state.
    pub fn contract_save_restore(
        game: &mut dyn GameHandle,
        from_json: fn(&str) -> serde_json::Result<Box<dyn GameHandle>>,
    ) -> Box<dyn GameHandle> {
        let json = game.to_json().expect("game must serialize");
        let restored = from_json(&json).expect("game must deserialize");
        assert_eq!(restored.core().status, game.core().status);
        assert_eq!(restored.core().round, game.core().round);
        assert_eq!(restored.core().host, game.core().host);
        assert_eq!(restored.core().turn_index, game.core().turn_index);
        assert_eq!(restored.core().turn_player_ids, game.core().turn_player_ids);
        assert_eq!(restored.core().players, game.core().players);
        assert_eq!(restored.core().sound_tick, game.core().sound_tick);
        restored
    }

    /// Drain table events, returning any finished-game result.
    pub fn finished_result(game: &mut dyn GameHandle) -> Option<crate::result::GameResult> {
        game.core_mut().drain_events().into_iter().find_map(|event| match event {
            TableEvent::GameFinished(result) => Some(result),
            _ => None,
        })
    }
}
