//! The server core: one task owns every user, table, and game.
//!
//! The transport decodes frames on its own tasks and hands packets over a
//! channel; the core task processes them in arrival order and runs the
//! 50 ms tick that advances games and flushes per-user outbound queues.
//! No game code ever runs concurrently with itself.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use parlor_core::catalog;
use parlor_core::game::{GameStatus, TableEvent, UserAttachment};
use parlor_core::player::PlayerId;
use parlor_core::prefs::Preferences;
use parlor_core::protocol::{ChatConvo, ClientPacket, ServerPacket, WireMenuItem, render_ui_event};
use parlor_core::time::now_iso8601;
use parlor_core::ui::{Arg, EscapeBehavior, Text};

use crate::auth::Auth;
use crate::config::ServerConfig;
use crate::db::Database;
use crate::estimate;
use crate::rating::RatingEngine;
use crate::registry::GameRegistry;
use crate::shell::ShellState;
use crate::table::{SavedMember, Table, TableManager};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// One scheduler tick: 50 ms.
pub const TICK_INTERVAL: Duration = Duration::from_millis(50);

pub type ConnId = u64;

/// Commands the transport sends into the core task.
#[derive(Debug)]
pub enum CoreCommand {
    Connected {
        conn: ConnId,
        addr: String,
        sender: mpsc::UnboundedSender<ServerPacket>,
    },
    Packet {
        conn: ConnId,
        packet: ClientPacket,
    },
    Disconnected {
        conn: ConnId,
    },
}

struct Connection {
    sender: mpsc::UnboundedSender<ServerPacket>,
    addr: String,
    username: Option<String>,
}

/// An authenticated user with a live connection.
pub struct OnlineUser {
    pub username: String,
    pub uuid: PlayerId,
    pub locale: String,
    pub prefs: Preferences,
    pub conn: ConnId,
    queue: Vec<ServerPacket>,
}

impl OnlineUser {
    pub fn send(&mut self, packet: ServerPacket) {
        self.queue.push(packet);
    }

    pub fn speak(&mut self, text: &str) {
        self.send(ServerPacket::Speak { text: text.to_string() });
    }

    pub fn speak_l(&mut self, key: &str, args: Vec<(&str, Arg)>) {
        let text = catalog::render(&self.locale, &Text::with_args(key, args));
        self.send(ServerPacket::Speak { text });
    }

    pub fn play_sound(&mut self, name: &str) {
        self.send(ServerPacket::PlaySound {
            name: name.to_string(),
            volume: 100,
            pan: 0,
            pitch: 100,
        });
    }

    pub fn play_music(&mut self, name: &str) {
        self.send(ServerPacket::PlayMusic { name: name.to_string(), looping: true });
    }

    pub fn stop_ambience(&mut self) {
        self.send(ServerPacket::StopAmbience);
    }

    pub fn show_menu(&mut self, menu_id: &str, items: Vec<WireMenuItem>, multiletter: bool) {
        self.send(ServerPacket::ShowMenu {
            menu_id: menu_id.to_string(),
            items,
            multiletter,
            escape_behavior: EscapeBehavior::SelectLast,
        });
    }

    /// Localized menu item helper.
    pub fn item(&self, key: &str, id: &str) -> WireMenuItem {
        WireMenuItem { text: catalog::lookup(&self.locale, key, &[]), id: id.to_string() }
    }

    pub fn item_args(&self, key: &str, args: Vec<(&str, Arg)>, id: &str) -> WireMenuItem {
        WireMenuItem {
            text: catalog::render(&self.locale, &Text::with_args(key, args)),
            id: id.to_string(),
        }
    }

    fn attachment(&self) -> UserAttachment {
        UserAttachment {
            user_id: self.uuid,
            username: self.username.clone(),
            is_bot: false,
            prefs: self.prefs.clone(),
        }
    }
}

pub struct ServerCore {
    pub config: ServerConfig,
    pub db: Database,
    pub auth: Auth,
    pub ratings: RatingEngine,
    pub registry: GameRegistry,
    connections: HashMap<ConnId, Connection>,
    pub users: HashMap<String, OnlineUser>,
    pub shell: HashMap<String, ShellState>,
    pub tables: TableManager,
    tick_count: u64,
}

impl ServerCore {
    pub fn new(config: ServerConfig, db: Database) -> Self {
        let mut core = Self {
            auth: Auth::new(db.clone()),
            ratings: RatingEngine::new(db.clone()),
            registry: GameRegistry::new(),
            connections: HashMap::new(),
            users: HashMap::new(),
            shell: HashMap::new(),
            tables: TableManager::new(),
            tick_count: 0,
            config,
            db,
        };
        core.restore_tables();
        core
    }

    /// Run the core loop until shutdown. All game mutation happens here.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<CoreCommand>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.save_tables();
                    break;
                },
                _ = interval.tick() => {
                    self.on_tick();
                },
                command = rx.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => {
                            self.save_tables();
                            break;
                        },
                    }
                },
            }
        }
        tracing::info!("server core stopped");
    }

    // ----- cold-start persistence -----

    /// Load every table saved at the previous shutdown, rebuild its game,
    /// and reattach bot seats. Humans reattach when they log in. The rows
    /// are deleted afterwards so a crash cannot resurrect stale tables;
    /// live tables are re-saved on clean shutdown.
    fn restore_tables(&mut self) {
        let rows = match self.db.load_all_tables() {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "failed to load saved tables");
                return;
            },
        };
        let count = rows.len();
        for row in rows {
            let Some(loaded) = self.registry.load(&row.game_type, &row.game_json) else {
                tracing::warn!(game_type = %row.game_type, "no game registered for saved table");
                continue;
            };
            let mut game = match loaded {
                Ok(game) => game,
                Err(e) => {
                    tracing::error!(error = %e, table = %row.table_id, "failed to rebuild saved game");
                    continue;
                },
            };
            game.core_mut().runtime.ratings = Some(Box::new(self.ratings.clone()));
            let bots: Vec<(PlayerId, String)> = game
                .core()
                .players
                .iter()
                .filter(|p| p.is_bot)
                .map(|p| (p.id, p.name.clone()))
                .collect();
            for (id, name) in bots {
                game.core_mut().attach_user(id, UserAttachment::bot(id, name));
            }
            let members = serde_json::from_str(&row.members_json).unwrap_or_default();
            self.tables.insert(Table {
                table_id: row.table_id,
                game_type: row.game_type,
                host: row.host,
                members,
                game: Some(game),
            });
        }
        if count > 0 {
            tracing::info!(count, "restored tables from database");
        }
        if let Err(e) = self.db.delete_all_tables() {
            tracing::error!(error = %e, "failed to clear restored tables");
        }
    }

    fn save_tables(&mut self) {
        let rows = self.tables.save_all();
        match self.db.save_all_tables(&rows) {
            Ok(()) => tracing::info!(count = rows.len(), "saved tables to database"),
            Err(e) => tracing::error!(error = %e, "failed to save tables"),
        }
    }

    // ----- command handling -----

    pub fn handle_command(&mut self, command: CoreCommand) {
        match command {
            CoreCommand::Connected { conn, addr, sender } => {
                tracing::info!(conn, addr = %addr, "client connected");
                self.connections.insert(conn, Connection { sender, addr, username: None });
            },
            CoreCommand::Packet { conn, packet } => self.handle_packet(conn, packet),
            CoreCommand::Disconnected { conn } => self.handle_disconnect(conn),
        }
    }

    fn handle_disconnect(&mut self, conn: ConnId) {
        let Some(connection) = self.connections.remove(&conn) else { return };
        tracing::info!(conn, addr = %connection.addr, "client disconnected");
        let Some(username) = connection.username else { return };
        // Only drop the registry entry if this connection still owns the
        // username (a newer login may have taken it over).
        if self.users.get(&username).is_some_and(|u| u.conn == conn) {
            self.users.remove(&username);
            self.shell.remove(&username);
            self.broadcast_presence("user-offline", &username, "offline.ogg");
        }
        // The player's seat (if any) stays in place until they reconnect
        // or explicitly leave.
    }

    fn broadcast_presence(&mut self, key: &str, player_name: &str, sound: &str) {
        for user in self.users.values_mut() {
            user.speak_l(key, vec![("player", Arg::Str(player_name.to_string()))]);
            user.play_sound(sound);
        }
    }

    fn send_direct(&self, conn: ConnId, packet: ServerPacket) {
        if let Some(connection) = self.connections.get(&conn) {
            let _ = connection.sender.send(packet);
        }
    }

    fn username_of(&self, conn: ConnId) -> Option<String> {
        self.connections.get(&conn).and_then(|c| c.username.clone())
    }

    fn handle_packet(&mut self, conn: ConnId, packet: ClientPacket) {
        match &packet {
            ClientPacket::Authorize { username, password } => {
                self.handle_authorize(conn, username.clone(), password.clone());
                return;
            },
            ClientPacket::Register { username, password } => {
                self.handle_register(conn, username, password);
                return;
            },
            _ => {},
        }

        // Everything else requires an authenticated connection; silence
        // otherwise.
        let Some(username) = self.username_of(conn) else { return };

        match packet {
            ClientPacket::Ping => {
                if let Some(user) = self.users.get(&username) {
                    self.send_direct(user.conn, ServerPacket::Pong);
                }
            },
            ClientPacket::Chat { convo, message, language } => {
                self.handle_chat(&username, convo, &message, language.as_deref());
            },
            ClientPacket::Menu { .. } | ClientPacket::Keybind { .. } | ClientPacket::Editbox { .. } => {
                if self.user_table_id(&username).is_some() {
                    self.forward_to_game(&username, &packet);
                } else if let ClientPacket::Menu { menu_id, selection_id, selection } = packet {
                    self.handle_shell_menu(&username, &menu_id, selection_id.as_deref(), selection);
                }
                // Keybinds and editboxes outside a game have no shell
                // meaning and are dropped.
            },
            _ => {},
        }
    }

    // ----- authentication -----

    /// Fused auth-or-register: unknown usernames are registered with the
    /// presented password and logged straight in; a known username with
    /// the wrong password is refused with a non-reconnectable disconnect.
    fn handle_authorize(&mut self, conn: ConnId, username: String, password: String) {
        if !self.auth.authenticate(&username, &password) && !self.auth.register(&username, &password)
        {
            self.send_direct(
                conn,
                ServerPacket::Disconnect {
                    reason: Some("Invalid credentials".to_string()),
                    reconnect: false,
                },
            );
            return;
        }

        let Some(record) = self.auth.get_user(&username) else {
            tracing::error!(username = %username, "user vanished after successful auth");
            return;
        };
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.username = Some(username.clone());
        }

        let prefs: Preferences =
            serde_json::from_str(&record.preferences_json).unwrap_or_default();
        let mut user = OnlineUser {
            username: username.clone(),
            uuid: record.uuid,
            locale: record.locale,
            prefs,
            conn,
            queue: Vec::new(),
        };
        user.send(ServerPacket::AuthorizeSuccess {
            username: username.clone(),
            version: VERSION.to_string(),
        });
        user.send(ServerPacket::UpdateOptionsLists { games: self.registry.listings() });
        self.users.insert(username.clone(), user);
        self.broadcast_presence("user-online", &username, "online.ogg");
        tracing::info!(username = %username, "user authorized");

        // A seat left by a bare disconnect is still theirs: reattach and
        // drop them back into the game.
        let uuid = self.users[&username].uuid;
        let attachment = self.users[&username].attachment();
        let table_id = self.user_table_id(&username);
        if let Some(table_id) = table_id {
            let mut rejoined = false;
            if let Some(table) = self.tables.get_mut(&table_id) {
                if let Some(game) = table.game.as_mut() {
                    if game.core().player_by_id(uuid).is_some() {
                        game.core_mut().attach_user(uuid, attachment);
                        game.rebuild_player_menu(uuid);
                        rejoined = true;
                    }
                }
            }
            if rejoined {
                self.shell.insert(username.clone(), ShellState::InGame { table_id: table_id.clone() });
                self.pump_table(&table_id);
                return;
            }
        }
        self.show_main_menu(&username);
    }

    /// Plain registration from the registration dialog; no auto-login.
    fn handle_register(&mut self, conn: ConnId, username: &str, password: &str) {
        let text = if username.is_empty() || password.is_empty() {
            "Username and password are required.".to_string()
        } else if self.auth.register(username, password) {
            "Registration successful! You can now log in with your credentials.".to_string()
        } else {
            "Username already taken. Please choose a different username.".to_string()
        };
        self.send_direct(conn, ServerPacket::Speak { text });
    }

    // ----- chat -----

    fn handle_chat(&mut self, username: &str, convo: ChatConvo, message: &str, language: Option<&str>) {
        let language = language.unwrap_or("Other").to_string();
        let packet = ServerPacket::Chat {
            convo,
            sender: username.to_string(),
            message: message.to_string(),
            language,
        };
        match convo {
            ChatConvo::Table => {
                let members: Vec<String> = match self.tables.find_user_table(username) {
                    Some(table) => table.members.iter().map(|m| m.username.clone()).collect(),
                    None => return,
                };
                for member in members {
                    if let Some(user) = self.users.get_mut(&member) {
                        user.send(packet.clone());
                    }
                }
            },
            ChatConvo::Global => {
                for user in self.users.values_mut() {
                    user.send(packet.clone());
                }
            },
        }
    }

    // ----- game routing -----

    pub fn user_table_id(&self, username: &str) -> Option<String> {
        self.tables.find_user_table(username).map(|t| t.table_id.clone())
    }

    /// Deliver a packet to the game the user sits at. Afterwards, if the
    /// event made them leave (seat converted to a bot or removed), put
    /// them back in the main menu.
    fn forward_to_game(&mut self, username: &str, packet: &ClientPacket) {
        let Some(user) = self.users.get(username) else { return };
        let uuid = user.uuid;
        let Some(table_id) = self.user_table_id(username) else { return };

        let mut left = false;
        if let Some(table) = self.tables.get_mut(&table_id) {
            if let Some(game) = table.game.as_mut() {
                if game.core().player_by_id(uuid).is_some() {
                    game.handle_event(uuid, packet);
                    left = !game.is_user_attached(uuid, username);
                } else {
                    // Table-level spectator with no seat: nothing to do.
                }
            }
        }
        if left {
            if let Some(table) = self.tables.get_mut(&table_id) {
                table.remove_member(username);
            }
            self.pump_table(&table_id);
            self.show_main_menu(username);
        } else {
            self.pump_table(&table_id);
        }
    }

    /// Drain a table's outbox and lifecycle events after any activity.
    pub fn pump_table(&mut self, table_id: &str) {
        let (deliveries, events) = {
            let Some(table) = self.tables.get_mut(table_id) else { return };
            let Some(game) = table.game.as_mut() else { return };
            let outbox = game.core_mut().drain_outbox();
            let deliveries: Vec<(String, parlor_core::ui::UiEvent)> = outbox
                .into_iter()
                .filter_map(|(player_id, event)| {
                    let attachment = game.core().attachment(player_id)?;
                    if attachment.is_bot {
                        return None;
                    }
                    Some((attachment.username.clone(), event))
                })
                .collect();
            (deliveries, game.core_mut().drain_events())
        };

        for (recipient, event) in deliveries {
            if let Some(user) = self.users.get_mut(&recipient) {
                if let Some(packet) =
                    render_ui_event(&event, &user.locale, user.prefs.play_turn_sound)
                {
                    user.send(packet);
                }
            }
        }

        for event in events {
            match event {
                TableEvent::Destroyed => self.destroy_table(table_id),
                TableEvent::SaveRequested { username } => {
                    self.save_table_snapshot(table_id, &username);
                },
                TableEvent::GameFinished(result) => self.persist_result(table_id, result),
                TableEvent::EstimateRequested { game_type, options, bots } => {
                    self.start_estimate(table_id, &game_type, &options, bots);
                },
            }
        }
    }

    /// Tear a table down and return the displaced humans to the main
    /// menu.
    pub fn destroy_table(&mut self, table_id: &str) {
        let Some(table) = self.tables.remove(table_id) else { return };
        tracing::info!(table_id, game_type = %table.game_type, "table destroyed");
        let members: Vec<String> = table.members.iter().map(|m| m.username.clone()).collect();
        for member in members {
            if self.users.contains_key(&member) {
                self.show_main_menu(&member);
            }
        }
    }

    /// Host-invoked save-and-close: snapshot the game, store it under the
    /// host's saved tables, then destroy the table.
    fn save_table_snapshot(&mut self, table_id: &str, username: &str) {
        let snapshot = {
            let Some(table) = self.tables.get_mut(table_id) else { return };
            let Some(game) = table.game.as_mut() else { return };
            let members: Vec<SavedMember> = game
                .core()
                .players
                .iter()
                .map(|p| SavedMember { username: p.name.clone(), is_bot: p.is_bot })
                .collect();
            let save_name = format!("{} - {}", game.display_name(), now_iso8601());
            match game.to_json() {
                Ok(game_json) => Some((
                    save_name,
                    table.game_type.clone(),
                    game_json,
                    serde_json::to_string(&members).unwrap_or_else(|_| "[]".to_string()),
                )),
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize game for save");
                    None
                },
            }
        };
        let Some((save_name, game_type, game_json, members_json)) = snapshot else { return };
        if let Err(e) = self.db.save_user_table(
            username,
            &save_name,
            &game_type,
            &game_json,
            &members_json,
            &now_iso8601(),
        ) {
            tracing::error!(error = %e, "failed to persist saved table");
            return;
        }
        // Tell everyone, then close the table.
        let members: Vec<String> = self
            .tables
            .get(table_id)
            .map(|t| t.members.iter().map(|m| m.username.clone()).collect())
            .unwrap_or_default();
        for member in members {
            if let Some(user) = self.users.get_mut(&member) {
                user.speak_l("table-saved-destroying", vec![]);
            }
        }
        self.destroy_table(table_id);
    }

    /// Persist a finished game and update ratings from its rankings.
    fn persist_result(&mut self, table_id: &str, result: parlor_core::result::GameResult) {
        let rankings = self
            .tables
            .get(table_id)
            .and_then(|t| t.game.as_ref())
            .map(|g| g.rankings_for_rating(&result))
            .unwrap_or_default();

        let players: Vec<(PlayerId, String, bool)> = result
            .player_results
            .iter()
            .map(|p| (p.player_id, p.player_name.clone(), p.is_bot))
            .collect();
        let custom = serde_json::Value::Object(result.custom_data.clone());
        if let Err(e) = self.db.save_game_result(
            &result.game_type,
            &result.timestamp,
            result.duration_ticks,
            &players,
            &custom,
        ) {
            tracing::error!(error = %e, "failed to persist game result");
        }
        if rankings.len() >= 2 {
            self.ratings.update_ratings(&result.game_type, &rankings);
        }
    }

    fn start_estimate(&mut self, table_id: &str, game_type: &str, options: &[(String, String)], bots: usize) {
        let spawned = estimate::spawn_estimates(game_type, options, bots);
        let Some(table) = self.tables.get_mut(table_id) else { return };
        let Some(game) = table.game.as_mut() else { return };
        match spawned {
            Ok(pool) => game.set_estimate_pool(pool),
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn estimate simulations");
                game.estimate_failed();
            },
        }
        self.pump_table(table_id);
    }

    // ----- tick -----

    pub fn on_tick(&mut self) {
        self.tick_count += 1;
        for table_id in self.tables.table_ids() {
            if let Some(table) = self.tables.get_mut(&table_id) {
                if let Some(game) = table.game.as_mut() {
                    game.on_tick();
                }
            }
            self.pump_table(&table_id);
        }
        self.flush_user_queues();

        // Status file for external monitoring, roughly every 5 seconds.
        if self.tick_count % 100 == 0 {
            self.write_status_file();
        }
    }

    fn flush_user_queues(&mut self) {
        for user in self.users.values_mut() {
            if user.queue.is_empty() {
                continue;
            }
            let Some(connection) = self.connections.get(&user.conn) else {
                user.queue.clear();
                continue;
            };
            for packet in user.queue.drain(..) {
                // A send failure means the socket died; the disconnect
                // command will clean up.
                let _ = connection.sender.send(packet);
            }
        }
    }

    fn write_status_file(&self) {
        let Some(path) = &self.config.status_file else { return };
        let playing = self
            .tables
            .table_ids()
            .iter()
            .filter(|id| {
                self.tables.get(id).is_some_and(|t| t.status() == GameStatus::Playing)
            })
            .count();
        let status = serde_json::json!({
            "version": VERSION,
            "online_users": self.users.len(),
            "live_tables": self.tables.len(),
            "playing_tables": playing,
            "updated_at": now_iso8601(),
        });
        if let Err(e) = std::fs::write(path, status.to_string()) {
            tracing::warn!(error = %e, "failed to write status file");
        }
    }

    // ----- helpers shared with the shell -----

    /// Persist the user's preference blob after a change.
    pub fn save_user_preferences(&mut self, username: &str) {
        let Some(user) = self.users.get(username) else { return };
        match serde_json::to_string(&user.prefs) {
            Ok(blob) => {
                if let Err(e) = self.db.update_user_preferences(username, &blob) {
                    tracing::error!(error = %e, "failed to save preferences");
                }
            },
            Err(e) => tracing::error!(error = %e, "failed to encode preferences"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parlor_core::game::GameStatus;

    fn test_core() -> ServerCore {
        ServerCore::new(ServerConfig::default(), Database::open_in_memory().unwrap())
    }

    fn connect(core: &mut ServerCore, conn: ConnId) -> mpsc::UnboundedReceiver<ServerPacket> {
        let (tx, rx) = mpsc::unbounded_channel();
        core.handle_command(CoreCommand::Connected {
            conn,
            addr: format!("127.0.0.1:{conn}"),
            sender: tx,
        });
        rx
    }

    fn authorize(core: &mut ServerCore, conn: ConnId, username: &str, password: &str) {
        core.handle_packet(
            conn,
            ClientPacket::Authorize {
                username: username.to_string(),
                password: password.to_string(),
            },
        );
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerPacket>) -> Vec<ServerPacket> {
        let mut packets = Vec::new();
        while let Ok(packet) = rx.try_recv() {
            packets.push(packet);
        }
        packets
    }

    #[test]
    fn authorize_registers_unknown_user_and_logs_in() {
        let mut core = test_core();
        let mut rx = connect(&mut core, 1);
        authorize(&mut core, 1, "alice", "secret");
        core.on_tick();

        let packets = drain(&mut rx);
        assert!(
            packets
                .iter()
                .any(|p| matches!(p, ServerPacket::AuthorizeSuccess { username, .. } if username == "alice"))
        );
        assert!(packets.iter().any(|p| matches!(p, ServerPacket::UpdateOptionsLists { games } if games.len() == 3)));
        assert!(packets.iter().any(
            |p| matches!(p, ServerPacket::ShowMenu { menu_id, .. } if menu_id == "main_menu")
        ));
        assert!(core.users.contains_key("alice"));
    }

    #[test]
    fn wrong_password_gets_disconnect_without_reconnect() {
        let mut core = test_core();
        let mut rx1 = connect(&mut core, 1);
        authorize(&mut core, 1, "alice", "secret");
        drain(&mut rx1);

        let mut rx2 = connect(&mut core, 2);
        authorize(&mut core, 2, "alice", "wrong");
        let packets = drain(&mut rx2);
        assert!(packets.iter().any(|p| matches!(
            p,
            ServerPacket::Disconnect { reconnect: false, reason: Some(reason) }
                if reason == "Invalid credentials"
        )));
        assert_eq!(core.users.get("alice").map(|u| u.conn), Some(1));
    }

    #[test]
    fn unauthenticated_game_traffic_is_dropped() {
        let mut core = test_core();
        let mut rx = connect(&mut core, 1);
        core.handle_packet(1, ClientPacket::Ping);
        core.handle_packet(
            1,
            ClientPacket::Menu { menu_id: "main_menu".to_string(), selection_id: None, selection: None },
        );
        core.on_tick();
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn ping_gets_immediate_pong() {
        let mut core = test_core();
        let mut rx = connect(&mut core, 1);
        authorize(&mut core, 1, "alice", "secret");
        drain(&mut rx);

        core.handle_packet(1, ClientPacket::Ping);
        // No tick needed: pong bypasses the queue.
        let packets = drain(&mut rx);
        assert!(packets.iter().any(|p| matches!(p, ServerPacket::Pong)));
    }

    #[test]
    fn presence_is_broadcast_on_login_and_disconnect() {
        let mut core = test_core();
        let mut rx1 = connect(&mut core, 1);
        authorize(&mut core, 1, "alice", "secret");
        core.on_tick();
        drain(&mut rx1);

        let mut rx2 = connect(&mut core, 2);
        authorize(&mut core, 2, "bob", "secret");
        core.on_tick();
        let packets = drain(&mut rx1);
        assert!(packets.iter().any(
            |p| matches!(p, ServerPacket::Speak { text } if text == "bob is online.")
        ));
        drain(&mut rx2);

        core.handle_command(CoreCommand::Disconnected { conn: 2 });
        core.on_tick();
        let packets = drain(&mut rx1);
        assert!(packets.iter().any(
            |p| matches!(p, ServerPacket::Speak { text } if text == "bob is offline.")
        ));
        assert!(!core.users.contains_key("bob"));
    }

    #[test]
    fn global_chat_reaches_everyone() {
        let mut core = test_core();
        let mut rx1 = connect(&mut core, 1);
        authorize(&mut core, 1, "alice", "secret");
        let mut rx2 = connect(&mut core, 2);
        authorize(&mut core, 2, "bob", "secret");
        core.on_tick();
        drain(&mut rx1);
        drain(&mut rx2);

        core.handle_packet(
            1,
            ClientPacket::Chat {
                convo: ChatConvo::Global,
                message: "hello".to_string(),
                language: None,
            },
        );
        core.on_tick();
        for rx in [&mut rx1, &mut rx2] {
            let packets = drain(rx);
            assert!(packets.iter().any(|p| matches!(
                p,
                ServerPacket::Chat { sender, message, .. }
                    if sender == "alice" && message == "hello"
            )));
        }
    }

    fn walk_to_pig_table(core: &mut ServerCore, conn: ConnId) {
        let menu = |core: &mut ServerCore, menu_id: &str, selection: &str| {
            core.handle_packet(
                conn,
                ClientPacket::Menu {
                    menu_id: menu_id.to_string(),
                    selection_id: Some(selection.to_string()),
                    selection: None,
                },
            );
        };
        menu(core, "main_menu", "play");
        menu(core, "categories_menu", "category_category-dice-games");
        menu(core, "games_menu", "game_pig");
        menu(core, "tables_menu", "create_table");
    }

    #[test]
    fn create_table_seats_host_in_game() {
        let mut core = test_core();
        let mut rx = connect(&mut core, 1);
        authorize(&mut core, 1, "alice", "secret");
        drain(&mut rx);

        walk_to_pig_table(&mut core, 1);
        core.on_tick();

        let table = core.tables.find_user_table("alice").expect("table exists");
        assert_eq!(table.game_type, "pig");
        assert_eq!(table.host, "alice");
        assert_eq!(table.player_count(), 1);

        let packets = drain(&mut rx);
        assert!(packets.iter().any(
            |p| matches!(p, ServerPacket::ShowMenu { menu_id, .. } if menu_id == "turn_menu")
        ));
        assert!(matches!(
            core.shell.get("alice"),
            Some(ShellState::InGame { .. })
        ));
    }

    #[test]
    fn game_events_route_to_table_and_leave_returns_to_main_menu() {
        let mut core = test_core();
        let mut rx = connect(&mut core, 1);
        authorize(&mut core, 1, "alice", "secret");
        walk_to_pig_table(&mut core, 1);
        core.on_tick();
        drain(&mut rx);

        // Leave while waiting: the table dies (no humans remain) and
        // alice lands back in the main menu.
        core.handle_packet(
            1,
            ClientPacket::Keybind {
                key: "q".to_string(),
                shift: false,
                control: false,
                alt: false,
                menu_item_id: None,
                menu_index: None,
            },
        );
        core.on_tick();

        assert!(core.tables.find_user_table("alice").is_none());
        let packets = drain(&mut rx);
        assert!(packets.iter().any(
            |p| matches!(p, ServerPacket::ShowMenu { menu_id, .. } if menu_id == "main_menu")
        ));
    }

    #[test]
    fn finished_game_results_persist_through_the_table_pump() {
        let mut core = test_core();
        let mut rx = connect(&mut core, 1);
        authorize(&mut core, 1, "alice", "secret");
        walk_to_pig_table(&mut core, 1);
        drain(&mut rx);

        // Drive the game by hand: add a bot, start, and push alice over
        // the target.
        let table_id = core.user_table_id("alice").unwrap();
        let alice_id = core.users["alice"].uuid;
        {
            let table = core.tables.get_mut(&table_id).unwrap();
            let game = table.game.as_mut().unwrap();
            game.execute_action(alice_id, "add_bot");
            game.execute_action(alice_id, "start_game");
            assert_eq!(game.core().status, GameStatus::Playing);
            game.core_mut().teams.add_to_team_score("alice", 60);
            // End alice's turn: either the roll busts (turn passes) or
            // the bank goes through.
            game.execute_action(alice_id, "roll");
            game.execute_action(alice_id, "bank");
        }
        // Let the bots play; alice is already past the default target so
        // the round ends the game.
        for _ in 0..5_000 {
            core.on_tick();
            if core.db.get_game_results("pig").unwrap().len() == 1 {
                break;
            }
        }

        let results = core.db.get_game_results("pig").unwrap();
        assert_eq!(results.len(), 1, "finished game should persist one result");
        assert_eq!(results[0].custom_data["winner_name"], "alice");
    }
}
