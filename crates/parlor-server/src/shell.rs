//! The per-user shell: every menu outside a live game.
//!
//! A pure server-side state machine. Each state renders one menu and
//! consumes one selection event; while a user is seated at a table the
//! shell never sees their packets.

use parlor_core::catalog;
use parlor_core::game::UserAttachment;
use parlor_core::player::PlayerId;
use parlor_core::prefs::DiceKeepingStyle;
use parlor_core::protocol::{ServerPacket, WireMenuItem};
use parlor_core::result::{LeaderboardAggregate, LeaderboardType};
use parlor_core::ui::Arg;

use serde_json::Value;

use crate::core::ServerCore;
use crate::db::StoredResult;
use crate::table::SavedMember;

/// Where a user is in the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellState {
    MainMenu,
    CategoriesMenu,
    GamesMenu { category: String },
    TablesMenu { game_type: String },
    JoinMenu { game_type: String, table_id: String },
    OptionsMenu,
    LanguageMenu,
    DiceKeepingStyleMenu,
    SavedTablesMenu,
    SavedTableActionsMenu { save_id: i64 },
    LeaderboardsMenu,
    LeaderboardTypesMenu { game_type: String },
    GameLeaderboard { game_type: String },
    MyStatsMenu,
    MyGameStats { game_type: String },
    InGame { table_id: String },
}

impl ServerCore {
    // ----- menu rendering -----

    pub fn show_main_menu(&mut self, username: &str) {
        let Some(user) = self.users.get_mut(username) else { return };
        let items = vec![
            user.item("play", "play"),
            user.item("saved-tables", "saved_tables"),
            user.item("leaderboards", "leaderboards"),
            user.item("my-stats", "my_stats"),
            user.item("options", "options"),
            user.item("logout", "logout"),
        ];
        user.show_menu("main_menu", items, true);
        user.play_music("mainmus.ogg");
        user.stop_ambience();
        self.shell.insert(username.to_string(), ShellState::MainMenu);
    }

    fn show_categories_menu(&mut self, username: &str) {
        let categories: Vec<&'static str> =
            self.registry.by_category().keys().copied().collect();
        let Some(user) = self.users.get_mut(username) else { return };
        let mut items: Vec<WireMenuItem> = categories
            .into_iter()
            .map(|key| user.item(key, &format!("category_{key}")))
            .collect();
        items.push(user.item("back", "back"));
        user.show_menu("categories_menu", items, true);
        self.shell.insert(username.to_string(), ShellState::CategoriesMenu);
    }

    fn show_games_menu(&mut self, username: &str, category: &str) {
        let games: Vec<(&'static str, &'static str)> = self
            .registry
            .by_category()
            .get(category)
            .map(|entries| entries.iter().map(|e| (e.game_type, e.name)).collect())
            .unwrap_or_default();
        let Some(user) = self.users.get_mut(username) else { return };
        let mut items: Vec<WireMenuItem> = games
            .into_iter()
            .map(|(game_type, _)| {
                user.item(&format!("game-name-{game_type}"), &format!("game_{game_type}"))
            })
            .collect();
        items.push(user.item("back", "back"));
        user.show_menu("games_menu", items, true);
        self.shell
            .insert(username.to_string(), ShellState::GamesMenu { category: category.to_string() });
    }

    fn show_tables_menu(&mut self, username: &str, game_type: &str) {
        let listings: Vec<(String, String, usize)> = self
            .tables
            .waiting_tables(game_type)
            .into_iter()
            .map(|t| (t.table_id.clone(), t.host.clone(), t.player_count()))
            .collect();
        let Some(user) = self.users.get_mut(username) else { return };
        let mut items = vec![user.item("create-table", "create_table")];
        for (table_id, host, count) in listings {
            items.push(user.item_args(
                "table-listing",
                vec![("host", Arg::Str(host)), ("count", Arg::from(count))],
                &format!("table_{table_id}"),
            ));
        }
        items.push(user.item("back", "back"));
        user.show_menu("tables_menu", items, true);
        self.shell
            .insert(username.to_string(), ShellState::TablesMenu { game_type: game_type.to_string() });
    }

    fn show_options_menu(&mut self, username: &str) {
        let Some(user) = self.users.get_mut(username) else { return };
        let on_off = |enabled: bool| {
            Arg::Key(if enabled { "option-on" } else { "option-off" }.to_string())
        };
        let language = catalog::AVAILABLE_LOCALES
            .iter()
            .find(|(code, _)| *code == user.locale)
            .map(|(_, name)| *name)
            .unwrap_or("English");
        let items = vec![
            user.item_args("language-option", vec![("language", Arg::Str(language.to_string()))], "language"),
            user.item_args(
                "turn-sound-option",
                vec![("status", on_off(user.prefs.play_turn_sound))],
                "turn_sound",
            ),
            user.item_args(
                "clear-kept-option",
                vec![("status", on_off(user.prefs.clear_kept_on_roll))],
                "clear_kept",
            ),
            user.item_args(
                "dice-keeping-style-option",
                vec![("style", Arg::Key(user.prefs.dice_keeping_style.label_key().to_string()))],
                "dice_keeping_style",
            ),
            user.item("back", "back"),
        ];
        user.show_menu("options_menu", items, true);
        self.shell.insert(username.to_string(), ShellState::OptionsMenu);
    }

    fn show_language_menu(&mut self, username: &str) {
        let Some(user) = self.users.get_mut(username) else { return };
        let mut items: Vec<WireMenuItem> = catalog::AVAILABLE_LOCALES
            .iter()
            .map(|(code, name)| {
                let prefix = if *code == user.locale { "* " } else { "" };
                WireMenuItem { text: format!("{prefix}{name}"), id: format!("lang_{code}") }
            })
            .collect();
        items.push(user.item("back", "back"));
        user.show_menu("language_menu", items, true);
        self.shell.insert(username.to_string(), ShellState::LanguageMenu);
    }

    fn show_dice_keeping_style_menu(&mut self, username: &str) {
        let Some(user) = self.users.get_mut(username) else { return };
        let current = user.prefs.dice_keeping_style;
        let mut items: Vec<WireMenuItem> = [DiceKeepingStyle::ByIndex, DiceKeepingStyle::ByValue]
            .into_iter()
            .map(|style| {
                let prefix = if style == current { "* " } else { "" };
                let name = catalog::lookup(&user.locale, style.label_key(), &[]);
                WireMenuItem {
                    text: format!("{prefix}{name}"),
                    id: format!("style_{}", style.as_str()),
                }
            })
            .collect();
        items.push(user.item("back", "back"));
        user.show_menu("dice_keeping_style_menu", items, true);
        self.shell.insert(username.to_string(), ShellState::DiceKeepingStyleMenu);
    }

    fn show_saved_tables_menu(&mut self, username: &str) {
        let saved = self.db.get_user_saved_tables(username).unwrap_or_default();
        if saved.is_empty() {
            if let Some(user) = self.users.get_mut(username) {
                user.speak_l("no-saved-tables", vec![]);
            }
            self.show_main_menu(username);
            return;
        }
        let Some(user) = self.users.get_mut(username) else { return };
        let mut items: Vec<WireMenuItem> = saved
            .iter()
            .map(|record| WireMenuItem {
                text: record.save_name.clone(),
                id: format!("saved_{}", record.id),
            })
            .collect();
        items.push(user.item("back", "back"));
        user.show_menu("saved_tables_menu", items, true);
        self.shell.insert(username.to_string(), ShellState::SavedTablesMenu);
    }

    fn show_saved_table_actions_menu(&mut self, username: &str, save_id: i64) {
        let Some(user) = self.users.get_mut(username) else { return };
        let items = vec![
            user.item("restore-table", "restore"),
            user.item("delete-saved-table", "delete"),
            user.item("back", "back"),
        ];
        user.show_menu("saved_table_actions_menu", items, true);
        self.shell
            .insert(username.to_string(), ShellState::SavedTableActionsMenu { save_id });
    }

    fn show_leaderboards_menu(&mut self, username: &str) {
        let games: Vec<(&'static str, &'static str)> =
            self.registry.iter().map(|e| (e.game_type, e.name)).collect();
        let Some(user) = self.users.get_mut(username) else { return };
        let mut items: Vec<WireMenuItem> = games
            .into_iter()
            .map(|(game_type, _)| {
                user.item(&format!("game-name-{game_type}"), &format!("game_{game_type}"))
            })
            .collect();
        items.push(user.item("back", "back"));
        user.show_menu("leaderboards_menu", items, true);
        self.shell.insert(username.to_string(), ShellState::LeaderboardsMenu);
    }

    fn show_leaderboard_types_menu(&mut self, username: &str, game_type: &str) {
        let custom: Vec<LeaderboardType> = self
            .registry
            .create(game_type)
            .map(|game| game.leaderboard_types())
            .unwrap_or_default();
        let Some(user) = self.users.get_mut(username) else { return };
        let mut items = vec![
            user.item("leaderboard-rating", "board_rating"),
            user.item("leaderboard-wins", "board_wins"),
            user.item("leaderboard-games-played", "board_games_played"),
        ];
        for board in &custom {
            // Custom boards are declared by the game; hyphenate the id
            // for the catalog key.
            let key = format!("leaderboard-type-{}", board.id.replace('_', "-"));
            items.push(user.item(&key, &format!("board_custom_{}", board.id)));
        }
        items.push(user.item("back", "back"));
        user.show_menu("leaderboard_types_menu", items, true);
        self.shell.insert(
            username.to_string(),
            ShellState::LeaderboardTypesMenu { game_type: game_type.to_string() },
        );
    }

    fn show_game_leaderboard(&mut self, username: &str, game_type: &str, board_id: &str) {
        let entries = self.leaderboard_entries(game_type, board_id);
        // Ratio boards (average points per turn and the like) show one
        // decimal; everything else rounds to a whole number.
        let is_ratio = board_id.strip_prefix("board_custom_").is_some_and(|id| {
            self.registry.create(game_type).is_some_and(|game| {
                game.leaderboard_types()
                    .iter()
                    .any(|board| board.id == id && board.denominator_path.is_some())
            })
        });
        let Some(user) = self.users.get_mut(username) else { return };
        let mut items: Vec<WireMenuItem> = Vec::new();
        if entries.is_empty() {
            items.push(user.item("leaderboard-empty", "entry"));
        }
        for (rank, (name, value)) in entries.into_iter().enumerate() {
            let key = if board_id == "board_rating" {
                "leaderboard-rating-entry"
            } else {
                "leaderboard-count-entry"
            };
            let value_arg = if is_ratio {
                Arg::Str(format!("{value:.1}"))
            } else {
                Arg::Int(value.round() as i64)
            };
            let args = vec![
                ("rank", Arg::from(rank + 1)),
                ("player", Arg::Str(name)),
                (if board_id == "board_rating" { "rating" } else { "count" }, value_arg),
            ];
            items.push(user.item_args(key, args, "entry"));
        }
        items.push(user.item("back", "back"));
        user.show_menu("game_leaderboard", items, true);
        self.shell.insert(
            username.to_string(),
            ShellState::GameLeaderboard { game_type: game_type.to_string() },
        );
    }

    /// Compute (player name, value) entries for a leaderboard, best
    /// first, capped at ten.
    fn leaderboard_entries(&self, game_type: &str, board_id: &str) -> Vec<(String, f64)> {
        let results = self.db.get_game_results(game_type).unwrap_or_default();
        let mut entries: Vec<(String, f64)> = match board_id {
            "board_rating" => {
                let names = human_names_by_id(&results);
                self.ratings
                    .leaderboard(game_type, 10)
                    .into_iter()
                    .map(|(id, rating)| {
                        let name =
                            names.iter().find(|(pid, _)| *pid == id).map(|(_, n)| n.clone());
                        (
                            name.unwrap_or_else(|| id.to_string()),
                            crate::rating::RatingEngine::ordinal(&rating),
                        )
                    })
                    .collect()
            },
            "board_wins" => {
                let mut wins: Vec<(String, f64)> = Vec::new();
                for result in &results {
                    let Some(winner) = result.custom_data.get("winner_name").and_then(Value::as_str)
                    else {
                        continue;
                    };
                    if !result.players.iter().any(|(_, name, is_bot)| name == winner && !is_bot) {
                        continue;
                    }
                    match wins.iter_mut().find(|(name, _)| name == winner) {
                        Some(entry) => entry.1 += 1.0,
                        None => wins.push((winner.to_string(), 1.0)),
                    }
                }
                wins
            },
            "board_games_played" => {
                let mut played: Vec<(String, f64)> = Vec::new();
                for result in &results {
                    for (_, name, is_bot) in &result.players {
                        if *is_bot {
                            continue;
                        }
                        match played.iter_mut().find(|(n, _)| n == name) {
                            Some(entry) => entry.1 += 1.0,
                            None => played.push((name.clone(), 1.0)),
                        }
                    }
                }
                played
            },
            custom => {
                let Some(board_id) = custom.strip_prefix("board_custom_") else {
                    return Vec::new();
                };
                let boards = self
                    .registry
                    .create(game_type)
                    .map(|game| game.leaderboard_types())
                    .unwrap_or_default();
                let Some(board) = boards.into_iter().find(|b| b.id == board_id) else {
                    return Vec::new();
                };
                custom_leaderboard(&results, &board)
            },
        };
        entries.sort_by(|a, b| b.1.total_cmp(&a.1));
        entries.truncate(10);
        entries
    }

    fn show_my_stats_menu(&mut self, username: &str) {
        let games: Vec<&'static str> = self.registry.iter().map(|e| e.game_type).collect();
        let Some(user) = self.users.get_mut(username) else { return };
        let mut items: Vec<WireMenuItem> = games
            .into_iter()
            .map(|game_type| {
                user.item(&format!("game-name-{game_type}"), &format!("game_{game_type}"))
            })
            .collect();
        items.push(user.item("back", "back"));
        user.show_menu("my_stats_menu", items, true);
        self.shell.insert(username.to_string(), ShellState::MyStatsMenu);
    }

    fn show_my_game_stats(&mut self, username: &str, game_type: &str) {
        let results = self.db.get_game_results(game_type).unwrap_or_default();
        let Some(user) = self.users.get(username) else { return };
        let uuid = user.uuid;

        let mine: Vec<&StoredResult> = results
            .iter()
            .filter(|r| r.players.iter().any(|(id, _, is_bot)| *id == uuid && !is_bot))
            .collect();
        let wins = mine
            .iter()
            .filter(|r| {
                r.custom_data.get("winner_name").and_then(Value::as_str)
                    == Some(user.username.as_str())
            })
            .count();
        let rating = self.ratings.get_rating(game_type, uuid);

        let Some(user) = self.users.get_mut(username) else { return };
        let mut items = Vec::new();
        if mine.is_empty() {
            items.push(user.item("stats-no-games", "stat"));
        } else {
            items.push(user.item_args(
                "stats-games-played",
                vec![("count", Arg::from(mine.len()))],
                "stat",
            ));
            items.push(user.item_args("stats-wins", vec![("count", Arg::from(wins))], "stat"));
            items.push(user.item_args(
                "stats-rating",
                vec![("rating", Arg::Int(crate::rating::RatingEngine::ordinal(&rating).round() as i64))],
                "stat",
            ));
        }
        items.push(user.item("back", "back"));
        user.show_menu("my_game_stats", items, true);
        self.shell.insert(
            username.to_string(),
            ShellState::MyGameStats { game_type: game_type.to_string() },
        );
    }

    // ----- selection handling -----

    pub fn handle_shell_menu(
        &mut self,
        username: &str,
        _menu_id: &str,
        selection_id: Option<&str>,
        _selection: Option<usize>,
    ) {
        let Some(selection) = selection_id else { return };
        let selection = selection.to_string();
        let state = self
            .shell
            .get(username)
            .cloned()
            .unwrap_or(ShellState::MainMenu);

        match state {
            ShellState::MainMenu => self.handle_main_menu(username, &selection),
            ShellState::CategoriesMenu => {
                if let Some(category) = selection.strip_prefix("category_") {
                    self.show_games_menu(username, &category.to_string());
                } else {
                    self.show_main_menu(username);
                }
            },
            ShellState::GamesMenu { .. } => {
                if let Some(game_type) = selection.strip_prefix("game_") {
                    self.show_tables_menu(username, &game_type.to_string());
                } else {
                    self.show_categories_menu(username);
                }
            },
            ShellState::TablesMenu { game_type } => {
                self.handle_tables_menu(username, &game_type, &selection);
            },
            ShellState::JoinMenu { game_type, table_id } => {
                self.handle_join_menu(username, &game_type, &table_id, &selection);
            },
            ShellState::OptionsMenu => self.handle_options_menu(username, &selection),
            ShellState::LanguageMenu => self.handle_language_menu(username, &selection),
            ShellState::DiceKeepingStyleMenu => {
                self.handle_dice_keeping_style_menu(username, &selection);
            },
            ShellState::SavedTablesMenu => {
                if let Some(save_id) = selection.strip_prefix("saved_").and_then(|s| s.parse().ok()) {
                    self.show_saved_table_actions_menu(username, save_id);
                } else {
                    self.show_main_menu(username);
                }
            },
            ShellState::SavedTableActionsMenu { save_id } => {
                self.handle_saved_table_actions(username, save_id, &selection);
            },
            ShellState::LeaderboardsMenu => {
                if let Some(game_type) = selection.strip_prefix("game_") {
                    self.show_leaderboard_types_menu(username, &game_type.to_string());
                } else {
                    self.show_main_menu(username);
                }
            },
            ShellState::LeaderboardTypesMenu { game_type } => {
                if selection == "back" {
                    self.show_leaderboards_menu(username);
                } else {
                    self.show_game_leaderboard(username, &game_type, &selection);
                }
            },
            ShellState::GameLeaderboard { game_type } => {
                if selection == "back" {
                    self.show_leaderboard_types_menu(username, &game_type);
                }
                // Entries themselves are informational only.
            },
            ShellState::MyStatsMenu => {
                if let Some(game_type) = selection.strip_prefix("game_") {
                    self.show_my_game_stats(username, &game_type.to_string());
                } else {
                    self.show_main_menu(username);
                }
            },
            ShellState::MyGameStats { .. } => {
                if selection == "back" {
                    self.show_my_stats_menu(username);
                }
            },
            ShellState::InGame { .. } => {
                // Game packets never reach the shell; a stale state here
                // means the table is gone.
                self.show_main_menu(username);
            },
        }
    }

    fn handle_main_menu(&mut self, username: &str, selection: &str) {
        match selection {
            "play" => self.show_categories_menu(username),
            "saved_tables" => self.show_saved_tables_menu(username),
            "leaderboards" => self.show_leaderboards_menu(username),
            "my_stats" => self.show_my_stats_menu(username),
            "options" => self.show_options_menu(username),
            "logout" => {
                if let Some(user) = self.users.get_mut(username) {
                    user.speak_l("goodbye", vec![]);
                    user.send(ServerPacket::Disconnect { reason: None, reconnect: false });
                }
            },
            _ => {},
        }
    }

    fn handle_tables_menu(&mut self, username: &str, game_type: &str, selection: &str) {
        match selection {
            "create_table" => self.create_table_for(username, game_type),
            "back" => {
                let category = self
                    .registry
                    .entry(game_type)
                    .map(|e| e.category.to_string())
                    .unwrap_or_default();
                if category.is_empty() {
                    self.show_categories_menu(username);
                } else {
                    self.show_games_menu(username, &category);
                }
            },
            other => {
                if let Some(table_id) = other.strip_prefix("table_") {
                    if self.tables.get(table_id).is_some() {
                        let Some(user) = self.users.get_mut(username) else { return };
                        let items = vec![
                            user.item("join-as-player", "join_player"),
                            user.item("join-as-spectator", "join_spectator"),
                            user.item("back", "back"),
                        ];
                        user.show_menu("join_menu", items, false);
                        self.shell.insert(
                            username.to_string(),
                            ShellState::JoinMenu {
                                game_type: game_type.to_string(),
                                table_id: table_id.to_string(),
                            },
                        );
                    } else {
                        if let Some(user) = self.users.get_mut(username) {
                            user.speak_l("table-not-exists", vec![]);
                        }
                        self.show_tables_menu(username, game_type);
                    }
                }
            },
        }
    }

    /// Create a table, build its game, and seat the user as host.
    fn create_table_for(&mut self, username: &str, game_type: &str) {
        let Some(mut game) = self.registry.create(game_type) else {
            if let Some(user) = self.users.get_mut(username) {
                user.speak_l("game-type-not-found", vec![]);
            }
            self.show_main_menu(username);
            return;
        };
        let Some(user) = self.users.get(username) else { return };
        let attachment = UserAttachment {
            user_id: user.uuid,
            username: username.to_string(),
            is_bot: false,
            prefs: user.prefs.clone(),
        };

        game.core_mut().runtime.ratings = Some(Box::new(self.ratings.clone()));
        game.initialize_lobby(username, attachment);
        let (min_players, max_players) = (game.min_players(), game.max_players());
        let player_count = game.core().players.len();

        let table_id = self.tables.create_table(game_type, username);
        if let Some(table) = self.tables.get_mut(&table_id) {
            table.game = Some(game);
        }

        if let Some(user) = self.users.get_mut(username) {
            user.speak_l(
                "table-created",
                vec![
                    ("host", Arg::Str(username.to_string())),
                    ("game", Arg::Key(format!("game-name-{game_type}"))),
                ],
            );
            user.speak_l(
                "waiting-for-players",
                vec![
                    ("current", Arg::from(player_count)),
                    ("min", Arg::from(min_players)),
                    ("max", Arg::from(max_players)),
                ],
            );
        }
        self.shell
            .insert(username.to_string(), ShellState::InGame { table_id: table_id.clone() });
        self.pump_table(&table_id);
        tracing::info!(username, game_type, table_id = %table_id, "table created");
    }

    fn handle_join_menu(&mut self, username: &str, game_type: &str, table_id: &str, selection: &str) {
        use parlor_core::game::GameStatus;

        if selection == "back" {
            self.show_tables_menu(username, game_type);
            return;
        }
        let Some(user) = self.users.get(username) else { return };
        let uuid = user.uuid;
        let attachment = UserAttachment {
            user_id: uuid,
            username: username.to_string(),
            is_bot: false,
            prefs: user.prefs.clone(),
        };

        enum JoinOutcome {
            NoTable,
            Full,
            TookOver,
            JoinedPlayer,
            JoinedSpectator { host: String },
        }

        let outcome = {
            let Some(table) = self.tables.get_mut(table_id) else {
                if let Some(user) = self.users.get_mut(username) {
                    user.speak_l("table-not-exists", vec![]);
                }
                self.show_tables_menu(username, game_type);
                return;
            };
            let host = table.host.clone();
            match table.game.as_mut() {
                None => JoinOutcome::NoTable,
                Some(game) => match selection {
                    "join_player" => {
                        if game.core().status == GameStatus::Playing {
                            // Rejoining a running game: take over the bot
                            // that inherited this user's seat, otherwise
                            // spectate.
                            let seat = game
                                .core()
                                .players
                                .iter()
                                .find(|p| p.id == uuid && p.is_bot)
                                .map(|p| p.id);
                            match seat {
                                Some(player_id) => {
                                    if let Some(player) =
                                        game.core_mut().player_by_id_mut(player_id)
                                    {
                                        player.is_bot = false;
                                    }
                                    game.core_mut().attach_user(player_id, attachment);
                                    game.core_mut().broadcast_l(
                                        "player-took-over",
                                        vec![("player", Arg::Str(username.to_string()))],
                                    );
                                    game.core_mut().play_sound("join.ogg");
                                    game.rebuild_all_menus();
                                    table.add_member(username, false);
                                    JoinOutcome::TookOver
                                },
                                None => {
                                    table.add_member(username, true);
                                    JoinOutcome::JoinedSpectator { host }
                                },
                            }
                        } else if game.core().players.len() >= game.max_players() {
                            JoinOutcome::Full
                        } else {
                            game.add_player(attachment);
                            game.core_mut().broadcast_l(
                                "table-joined",
                                vec![("player", Arg::Str(username.to_string()))],
                            );
                            game.core_mut().play_sound("join.ogg");
                            game.rebuild_all_menus();
                            table.add_member(username, false);
                            JoinOutcome::JoinedPlayer
                        }
                    },
                    "join_spectator" => {
                        table.add_member(username, true);
                        JoinOutcome::JoinedSpectator { host }
                    },
                    _ => return,
                },
            }
        };

        match outcome {
            JoinOutcome::NoTable => {
                if let Some(user) = self.users.get_mut(username) {
                    user.speak_l("table-not-exists", vec![]);
                }
                self.show_tables_menu(username, game_type);
            },
            JoinOutcome::Full => {
                if let Some(user) = self.users.get_mut(username) {
                    user.speak_l("table-full", vec![]);
                }
                self.show_tables_menu(username, game_type);
            },
            JoinOutcome::JoinedSpectator { host } => {
                if let Some(user) = self.users.get_mut(username) {
                    user.speak_l("spectator-joined", vec![("host", Arg::Str(host))]);
                }
                self.shell.insert(
                    username.to_string(),
                    ShellState::InGame { table_id: table_id.to_string() },
                );
                self.pump_table(table_id);
            },
            JoinOutcome::TookOver | JoinOutcome::JoinedPlayer => {
                self.shell.insert(
                    username.to_string(),
                    ShellState::InGame { table_id: table_id.to_string() },
                );
                self.pump_table(table_id);
            },
        }
    }

    fn handle_options_menu(&mut self, username: &str, selection: &str) {
        match selection {
            "language" => self.show_language_menu(username),
            "turn_sound" => {
                if let Some(user) = self.users.get_mut(username) {
                    user.prefs.play_turn_sound = !user.prefs.play_turn_sound;
                }
                self.save_user_preferences(username);
                self.show_options_menu(username);
            },
            "clear_kept" => {
                if let Some(user) = self.users.get_mut(username) {
                    user.prefs.clear_kept_on_roll = !user.prefs.clear_kept_on_roll;
                }
                self.save_user_preferences(username);
                self.show_options_menu(username);
            },
            "dice_keeping_style" => self.show_dice_keeping_style_menu(username),
            _ => self.show_main_menu(username),
        }
    }

    fn handle_language_menu(&mut self, username: &str, selection: &str) {
        if let Some(code) = selection.strip_prefix("lang_") {
            let known = catalog::AVAILABLE_LOCALES.iter().find(|(c, _)| *c == code);
            if let Some((code, name)) = known {
                if let Some(user) = self.users.get_mut(username) {
                    user.locale = code.to_string();
                    user.speak_l("language-changed", vec![("language", Arg::Str(name.to_string()))]);
                }
                if let Err(e) = self.db.update_user_locale(username, code) {
                    tracing::error!(error = %e, "failed to persist locale");
                }
            }
        }
        self.show_options_menu(username);
    }

    fn handle_dice_keeping_style_menu(&mut self, username: &str, selection: &str) {
        if let Some(style) = selection
            .strip_prefix("style_")
            .and_then(DiceKeepingStyle::from_str_opt)
        {
            if let Some(user) = self.users.get_mut(username) {
                user.prefs.dice_keeping_style = style;
                user.speak_l(
                    "dice-keeping-style-changed",
                    vec![("style", Arg::Key(style.label_key().to_string()))],
                );
            }
            self.save_user_preferences(username);
        }
        self.show_options_menu(username);
    }

    fn handle_saved_table_actions(&mut self, username: &str, save_id: i64, selection: &str) {
        match selection {
            "restore" => self.restore_saved_table(username, save_id),
            "delete" => {
                if let Err(e) = self.db.delete_saved_table(save_id) {
                    tracing::error!(error = %e, "failed to delete saved table");
                }
                if let Some(user) = self.users.get_mut(username) {
                    user.speak_l("saved-table-deleted", vec![]);
                }
                self.show_saved_tables_menu(username);
            },
            _ => self.show_saved_tables_menu(username),
        }
    }

    /// Restore a snapshot: verify every human member is online and free,
    /// rebuild the game, reattach everyone, delete the row.
    fn restore_saved_table(&mut self, username: &str, save_id: i64) {
        let Some(record) = self.db.get_saved_table(save_id).ok().flatten() else {
            if let Some(user) = self.users.get_mut(username) {
                user.speak_l("table-not-exists", vec![]);
            }
            self.show_main_menu(username);
            return;
        };

        let members: Vec<SavedMember> =
            serde_json::from_str(&record.members_json).unwrap_or_default();
        let missing: Vec<String> = members
            .iter()
            .filter(|m| !m.is_bot)
            .filter(|m| {
                !self.users.contains_key(&m.username)
                    || self.tables.find_user_table(&m.username).is_some()
            })
            .map(|m| m.username.clone())
            .collect();
        if !missing.is_empty() {
            if let Some(user) = self.users.get_mut(username) {
                user.speak_l("missing-players", vec![("players", Arg::Str(missing.join(", ")))]);
            }
            self.show_saved_tables_menu(username);
            return;
        }

        let Some(loaded) = self.registry.load(&record.game_type, &record.game_json) else {
            if let Some(user) = self.users.get_mut(username) {
                user.speak_l("game-type-not-found", vec![]);
            }
            self.show_main_menu(username);
            return;
        };
        let mut game = match loaded {
            Ok(game) => game,
            Err(e) => {
                tracing::error!(error = %e, save_id, "failed to rebuild saved game");
                if let Some(user) = self.users.get_mut(username) {
                    user.speak_l("table-not-exists", vec![]);
                }
                self.show_saved_tables_menu(username);
                return;
            },
        };
        game.core_mut().runtime.ratings = Some(Box::new(self.ratings.clone()));
        game.core_mut().host = username.to_string();

        // Attach everyone by the player ids stored in the game: bots get
        // fresh bot users with their original ids, humans reattach live.
        let mut seated: Vec<String> = Vec::new();
        for member in &members {
            let Some(player_id) =
                game.core().players.iter().find(|p| p.name == member.username).map(|p| p.id)
            else {
                continue;
            };
            if member.is_bot {
                game.core_mut()
                    .attach_user(player_id, UserAttachment::bot(player_id, member.username.clone()));
            } else if let Some(user) = self.users.get(&member.username) {
                game.core_mut().attach_user(
                    player_id,
                    UserAttachment {
                        user_id: user.uuid,
                        username: member.username.clone(),
                        is_bot: false,
                        prefs: user.prefs.clone(),
                    },
                );
                seated.push(member.username.clone());
            }
        }
        game.rebuild_all_menus();
        game.core_mut().broadcast_l("table-restored", vec![]);

        let table_id = self.tables.create_table(&record.game_type, username);
        if let Some(table) = self.tables.get_mut(&table_id) {
            table.game = Some(game);
            for member in &seated {
                table.add_member(member, false);
            }
        }
        for member in seated {
            self.shell
                .insert(member, ShellState::InGame { table_id: table_id.clone() });
        }
        if let Err(e) = self.db.delete_saved_table(save_id) {
            tracing::error!(error = %e, "failed to delete restored snapshot");
        }
        self.pump_table(&table_id);
        tracing::info!(save_id, table_id = %table_id, "table restored");
    }
}

/// Map player ids to the names recorded in results (humans only).
fn human_names_by_id(results: &[StoredResult]) -> Vec<(PlayerId, String)> {
    let mut names: Vec<(PlayerId, String)> = Vec::new();
    for result in results {
        for (id, name, is_bot) in &result.players {
            if !is_bot && !names.iter().any(|(known, _)| known == id) {
                names.push((*id, name.clone()));
            }
        }
    }
    names
}

/// Aggregate a custom leaderboard over result custom data. Boards with
/// a denominator path are sum/sum ratios; the rest fold one path per
/// the declared aggregate.
fn custom_leaderboard(results: &[StoredResult], board: &LeaderboardType) -> Vec<(String, f64)> {
    if let Some(denominator_path) = &board.denominator_path {
        // (name, numerator sum, denominator sum)
        let mut totals: Vec<(String, f64, f64)> = Vec::new();
        for result in results {
            for (_, name, is_bot) in &result.players {
                if *is_bot {
                    continue;
                }
                let numerator_path = board.path.replace("{player_name}", name);
                let denominator_path = denominator_path.replace("{player_name}", name);
                let Some(numerator) = extract_path(&result.custom_data, &numerator_path) else {
                    continue;
                };
                let Some(denominator) = extract_path(&result.custom_data, &denominator_path) else {
                    continue;
                };
                match totals.iter_mut().find(|(n, _, _)| n == name) {
                    Some(entry) => {
                        entry.1 += numerator;
                        entry.2 += denominator;
                    },
                    None => totals.push((name.clone(), numerator, denominator)),
                }
            }
        }
        return totals
            .into_iter()
            .filter(|(_, _, denominator)| *denominator > 0.0)
            .map(|(name, numerator, denominator)| (name, numerator / denominator))
            .collect();
    }

    let mut totals: Vec<(String, f64, usize)> = Vec::new();
    for result in results {
        for (_, name, is_bot) in &result.players {
            if *is_bot {
                continue;
            }
            let path = board.path.replace("{player_name}", name);
            let Some(value) = extract_path(&result.custom_data, &path) else { continue };
            match totals.iter_mut().find(|(n, _, _)| n == name) {
                Some(entry) => {
                    match board.aggregate {
                        LeaderboardAggregate::Sum | LeaderboardAggregate::Avg => entry.1 += value,
                        LeaderboardAggregate::Max => entry.1 = entry.1.max(value),
                    }
                    entry.2 += 1;
                },
                None => totals.push((name.clone(), value, 1)),
            }
        }
    }
    totals
        .into_iter()
        .map(|(name, total, count)| {
            let value = match board.aggregate {
                LeaderboardAggregate::Avg if count > 0 => total / count as f64,
                _ => total,
            };
            (name, value)
        })
        .collect()
}

/// Walk a dot-separated path into a JSON value.
fn extract_path(data: &Value, path: &str) -> Option<f64> {
    let mut current = data;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    current.as_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::core::{ConnId, CoreCommand};
    use crate::db::Database;
    use parlor_core::protocol::ClientPacket;
    use tokio::sync::mpsc;

    fn test_core() -> ServerCore {
        ServerCore::new(ServerConfig::default(), Database::open_in_memory().unwrap())
    }

    fn login(core: &mut ServerCore, conn: ConnId, username: &str) -> mpsc::UnboundedReceiver<ServerPacket> {
        let (tx, rx) = mpsc::unbounded_channel();
        core.handle_command(CoreCommand::Connected {
            conn,
            addr: "test".to_string(),
            sender: tx,
        });
        core.handle_command(CoreCommand::Packet {
            conn,
            packet: ClientPacket::Authorize {
                username: username.to_string(),
                password: "secret".to_string(),
            },
        });
        rx
    }

    fn select(core: &mut ServerCore, conn: ConnId, menu_id: &str, selection: &str) {
        core.handle_command(CoreCommand::Packet {
            conn,
            packet: ClientPacket::Menu {
                menu_id: menu_id.to_string(),
                selection_id: Some(selection.to_string()),
                selection: None,
            },
        });
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerPacket>) -> Vec<ServerPacket> {
        let mut packets = Vec::new();
        while let Ok(packet) = rx.try_recv() {
            packets.push(packet);
        }
        packets
    }

    fn menus_of(packets: &[ServerPacket]) -> Vec<String> {
        packets
            .iter()
            .filter_map(|p| match p {
                ServerPacket::ShowMenu { menu_id, .. } => Some(menu_id.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn menu_walk_reaches_tables_menu_and_back() {
        let mut core = test_core();
        let mut rx = login(&mut core, 1, "alice");

        select(&mut core, 1, "main_menu", "play");
        select(&mut core, 1, "categories_menu", "category_category-dice-games");
        select(&mut core, 1, "games_menu", "game_pig");
        core.on_tick();
        let menus = menus_of(&drain(&mut rx));
        assert!(menus.contains(&"categories_menu".to_string()));
        assert!(menus.contains(&"games_menu".to_string()));
        assert!(menus.contains(&"tables_menu".to_string()));

        select(&mut core, 1, "tables_menu", "back");
        core.on_tick();
        let menus = menus_of(&drain(&mut rx));
        assert!(menus.contains(&"games_menu".to_string()));
    }

    #[test]
    fn options_toggles_persist_preferences() {
        let mut core = test_core();
        let mut rx = login(&mut core, 1, "alice");
        select(&mut core, 1, "main_menu", "options");
        select(&mut core, 1, "options_menu", "turn_sound");
        core.on_tick();
        drain(&mut rx);

        assert!(!core.users["alice"].prefs.play_turn_sound);
        let record = core.db.get_user("alice").unwrap().unwrap();
        assert!(record.preferences_json.contains("\"play_turn_sound\":false"));

        select(&mut core, 1, "options_menu", "dice_keeping_style");
        select(&mut core, 1, "dice_keeping_style_menu", "style_by_value");
        core.on_tick();
        assert_eq!(
            core.users["alice"].prefs.dice_keeping_style,
            DiceKeepingStyle::ByValue
        );
    }

    #[test]
    fn second_player_can_join_a_waiting_table() {
        let mut core = test_core();
        let mut rx1 = login(&mut core, 1, "alice");
        select(&mut core, 1, "main_menu", "play");
        select(&mut core, 1, "categories_menu", "category_category-dice-games");
        select(&mut core, 1, "games_menu", "game_pig");
        select(&mut core, 1, "tables_menu", "create_table");
        core.on_tick();
        drain(&mut rx1);

        let table_id = core.user_table_id("alice").unwrap();

        let mut rx2 = login(&mut core, 2, "bob");
        select(&mut core, 2, "main_menu", "play");
        select(&mut core, 2, "categories_menu", "category_category-dice-games");
        select(&mut core, 2, "games_menu", "game_pig");
        select(&mut core, 2, "tables_menu", &format!("table_{table_id}"));
        select(&mut core, 2, "join_menu", "join_player");
        core.on_tick();

        let table = core.tables.get(&table_id).unwrap();
        assert_eq!(table.player_count(), 2);
        assert!(table.has_member("bob"));

        // Bob hears the join broadcast through the game outbox.
        let packets = drain(&mut rx2);
        assert!(packets.iter().any(
            |p| matches!(p, ServerPacket::Speak { text } if text.contains("joined the table"))
        ));
    }

    #[test]
    fn save_and_restore_round_trips_a_table() {
        let mut core = test_core();
        let mut rx = login(&mut core, 1, "alice");
        select(&mut core, 1, "main_menu", "play");
        select(&mut core, 1, "categories_menu", "category_category-dice-games");
        select(&mut core, 1, "games_menu", "game_pig");
        select(&mut core, 1, "tables_menu", "create_table");
        core.on_tick();
        drain(&mut rx);

        // Add a bot, then save via the ctrl+s keybind.
        core.handle_command(CoreCommand::Packet {
            conn: 1,
            packet: ClientPacket::Keybind {
                key: "b".to_string(),
                shift: false,
                control: false,
                alt: false,
                menu_item_id: None,
                menu_index: None,
            },
        });
        core.handle_command(CoreCommand::Packet {
            conn: 1,
            packet: ClientPacket::Editbox {
                input_id: "action_input_editbox".to_string(),
                text: "Robby".to_string(),
            },
        });
        core.handle_command(CoreCommand::Packet {
            conn: 1,
            packet: ClientPacket::Keybind {
                key: "s".to_string(),
                shift: false,
                control: true,
                alt: false,
                menu_item_id: None,
                menu_index: None,
            },
        });
        core.on_tick();

        // The table is gone and one snapshot exists.
        assert!(core.tables.find_user_table("alice").is_none());
        let saved = core.db.get_user_saved_tables("alice").unwrap();
        assert_eq!(saved.len(), 1);
        let save_id = saved[0].id;
        drain(&mut rx);

        // Restore it from the saved tables menu.
        core.shell.insert("alice".to_string(), ShellState::SavedTableActionsMenu { save_id });
        select(&mut core, 1, "saved_table_actions_menu", "restore");
        core.on_tick();

        let table = core.tables.find_user_table("alice").expect("restored table");
        assert_eq!(table.game_type, "pig");
        let game = table.game.as_ref().unwrap();
        assert_eq!(game.core().players.len(), 2);
        assert!(game.core().players.iter().any(|p| p.name == "Robby" && p.is_bot));
        assert!(core.db.get_user_saved_tables("alice").unwrap().is_empty());

        let packets = drain(&mut rx);
        assert!(packets.iter().any(
            |p| matches!(p, ServerPacket::Speak { text } if text.contains("restored"))
        ));
    }

    #[test]
    fn restore_refuses_when_members_are_missing() {
        let mut core = test_core();
        let mut rx = login(&mut core, 1, "alice");
        core.on_tick();
        drain(&mut rx);

        // A snapshot that requires bob, who is offline.
        let members = serde_json::to_string(&[
            SavedMember { username: "alice".to_string(), is_bot: false },
            SavedMember { username: "bob".to_string(), is_bot: false },
        ])
        .unwrap();
        let game = core.registry.create("pig").unwrap();
        let save_id = core
            .db
            .save_user_table("alice", "test", "pig", &game.to_json().unwrap(), &members, "now")
            .unwrap();

        core.shell.insert("alice".to_string(), ShellState::SavedTableActionsMenu { save_id });
        select(&mut core, 1, "saved_table_actions_menu", "restore");
        core.on_tick();

        assert!(core.tables.find_user_table("alice").is_none());
        // The snapshot survives a refused restore.
        assert_eq!(core.db.get_user_saved_tables("alice").unwrap().len(), 1);
        let packets = drain(&mut rx);
        assert!(packets.iter().any(
            |p| matches!(p, ServerPacket::Speak { text } if text.contains("missing players"))
        ));
    }

    #[test]
    fn leaderboards_show_wins_and_ratings() {
        let mut core = test_core();
        let mut rx = login(&mut core, 1, "alice");
        core.on_tick();
        drain(&mut rx);

        let alice_id = core.users["alice"].uuid;
        let bob_id = uuid::Uuid::new_v4();
        let custom = serde_json::json!({"winner_name": "alice"});
        core.db
            .save_game_result(
                "pig",
                "2026-01-01T00:00:00Z",
                100,
                &[(alice_id, "alice".to_string(), false), (bob_id, "bob".to_string(), false)],
                &custom,
            )
            .unwrap();
        core.ratings.update_ratings("pig", &[vec![alice_id], vec![bob_id]]);

        select(&mut core, 1, "main_menu", "leaderboards");
        select(&mut core, 1, "leaderboards_menu", "game_pig");
        select(&mut core, 1, "leaderboard_types_menu", "board_wins");
        core.on_tick();
        let packets = drain(&mut rx);
        let board = packets.iter().find_map(|p| match p {
            ServerPacket::ShowMenu { menu_id, items, .. } if menu_id == "game_leaderboard" => {
                Some(items.clone())
            },
            _ => None,
        });
        let items = board.expect("wins leaderboard shown");
        assert!(items.iter().any(|i| i.text.contains("alice") && i.text.contains('1')));

        select(&mut core, 1, "game_leaderboard", "back");
        select(&mut core, 1, "leaderboard_types_menu", "board_rating");
        core.on_tick();
        let packets = drain(&mut rx);
        let board = packets.iter().find_map(|p| match p {
            ServerPacket::ShowMenu { menu_id, items, .. } if menu_id == "game_leaderboard" => {
                Some(items.clone())
            },
            _ => None,
        });
        let items = board.expect("rating leaderboard shown");
        assert_eq!(items.first().map(|i| i.text.contains("alice")), Some(true));
    }

    #[test]
    fn my_stats_summarizes_results() {
        let mut core = test_core();
        let mut rx = login(&mut core, 1, "alice");
        core.on_tick();
        drain(&mut rx);

        let alice_id = core.users["alice"].uuid;
        let custom = serde_json::json!({"winner_name": "alice"});
        core.db
            .save_game_result(
                "pig",
                "2026-01-01T00:00:00Z",
                100,
                &[(alice_id, "alice".to_string(), false)],
                &custom,
            )
            .unwrap();

        select(&mut core, 1, "main_menu", "my_stats");
        select(&mut core, 1, "my_stats_menu", "game_pig");
        core.on_tick();
        let packets = drain(&mut rx);
        let items = packets
            .iter()
            .find_map(|p| match p {
                ServerPacket::ShowMenu { menu_id, items, .. } if menu_id == "my_game_stats" => {
                    Some(items.clone())
                },
                _ => None,
            })
            .expect("stats menu shown");
        assert!(items.iter().any(|i| i.text.contains("Games played: 1")));
        assert!(items.iter().any(|i| i.text.contains("Wins: 1")));
    }

    #[test]
    fn custom_path_extraction() {
        let data = serde_json::json!({
            "player_stats": {"alice": {"best_turn": 120}}
        });
        assert_eq!(extract_path(&data, "player_stats.alice.best_turn"), Some(120.0));
        assert_eq!(extract_path(&data, "player_stats.bob.best_turn"), None);
    }

    #[test]
    fn ratio_leaderboards_divide_summed_paths() {
        let alice = uuid::Uuid::new_v4();
        let stats = |score: i64, turns: i64| {
            serde_json::json!({"player_stats": {"alice": {"total_score": score, "turns_taken": turns}}})
        };
        let result = |id: i64, custom: Value| StoredResult {
            id,
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            duration_ticks: 100,
            custom_data: custom,
            players: vec![(alice, "alice".to_string(), false)],
        };
        let results = vec![result(1, stats(300, 10)), result(2, stats(100, 10))];

        let board = LeaderboardType {
            id: "avg_points_per_turn".to_string(),
            path: "player_stats.{player_name}.total_score".to_string(),
            denominator_path: Some("player_stats.{player_name}.turns_taken".to_string()),
            aggregate: LeaderboardAggregate::Sum,
        };
        let entries = custom_leaderboard(&results, &board);
        // 400 points over 20 turns across both games.
        assert_eq!(entries, vec![("alice".to_string(), 20.0)]);

        // A zero denominator drops the player instead of dividing.
        let empty = vec![result(3, stats(50, 0))];
        assert!(custom_leaderboard(&empty, &board).is_empty());
    }
}
