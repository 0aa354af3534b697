//! SQLite persistence.
//!
//! The connection is wrapped in `Arc<Mutex<..>>` so the database handle
//! works as a cheap-to-clone smart pointer. All operations are
//! synchronous and fast; the tick loop never awaits them.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use uuid::Uuid;

use parlor_core::player::PlayerId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    pub password_hash: String,
    pub uuid: Uuid,
    pub locale: String,
    pub preferences_json: String,
    pub trust_level: i64,
    pub approved: bool,
}

/// Trust level for ordinary players.
pub const TRUST_PLAYER: i64 = 1;
/// Trust level for administrators (the first registered user).
pub const TRUST_ADMIN: i64 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    pub table_id: String,
    pub game_type: String,
    pub host: String,
    pub members_json: String,
    pub game_json: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedTableRecord {
    pub id: i64,
    pub username: String,
    pub save_name: String,
    pub game_type: String,
    pub game_json: String,
    pub members_json: String,
    pub saved_at: String,
}

#[derive(Debug, Clone)]
pub struct StoredResult {
    pub id: i64,
    pub timestamp: String,
    pub duration_ticks: u64,
    pub custom_data: Value,
    /// (player_id, player_name, is_bot)
    pub players: Vec<(PlayerId, String, bool)>,
}

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> rusqlite::Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> rusqlite::Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> rusqlite::Result<Self> {
        let db = Self { conn: Arc::new(Mutex::new(conn)) };
        db.create_schema()?;
        db.run_migrations()?;
        Ok(db)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    fn create_schema(&self) -> rusqlite::Result<()> {
        let conn = self.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 username TEXT UNIQUE NOT NULL,
                 password_hash TEXT NOT NULL,
                 uuid TEXT NOT NULL,
                 locale TEXT DEFAULT 'en',
                 preferences_json TEXT DEFAULT '{}',
                 trust_level INTEGER DEFAULT 1,
                 approved INTEGER DEFAULT 0
             );
             CREATE TABLE IF NOT EXISTS tables (
                 table_id TEXT PRIMARY KEY,
                 game_type TEXT NOT NULL,
                 host TEXT NOT NULL,
                 members_json TEXT NOT NULL,
                 game_json TEXT,
                 status TEXT DEFAULT 'waiting'
             );
             CREATE TABLE IF NOT EXISTS saved_tables (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 username TEXT NOT NULL,
                 save_name TEXT NOT NULL,
                 game_type TEXT NOT NULL,
                 game_json TEXT NOT NULL,
                 members_json TEXT NOT NULL,
                 saved_at TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS game_results (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 game_type TEXT NOT NULL,
                 timestamp TEXT NOT NULL,
                 duration_ticks INTEGER,
                 custom_data TEXT
             );
             CREATE TABLE IF NOT EXISTS game_result_players (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 result_id INTEGER REFERENCES game_results(id) ON DELETE CASCADE,
                 player_id TEXT NOT NULL,
                 player_name TEXT NOT NULL,
                 is_bot INTEGER NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_game_results_type
                 ON game_results(game_type);
             CREATE INDEX IF NOT EXISTS idx_game_results_timestamp
                 ON game_results(timestamp);
             CREATE INDEX IF NOT EXISTS idx_result_players_player
                 ON game_result_players(player_id);
             CREATE TABLE IF NOT EXISTS player_ratings (
                 player_id TEXT NOT NULL,
                 game_type TEXT NOT NULL,
                 mu REAL NOT NULL,
                 sigma REAL NOT NULL,
                 PRIMARY KEY (player_id, game_type)
             );",
        )
    }

    /// Add trust_level/approved to databases created before those
    /// columns existed; pre-existing users are approved.
    fn run_migrations(&self) -> rusqlite::Result<()> {
        let conn = self.lock();
        let mut columns: Vec<String> = Vec::new();
        {
            let mut stmt = conn.prepare("PRAGMA table_info(users)")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                columns.push(row.get::<_, String>(1)?);
            }
        }
        if !columns.iter().any(|c| c == "trust_level") {
            conn.execute("ALTER TABLE users ADD COLUMN trust_level INTEGER DEFAULT 1", [])?;
        }
        if !columns.iter().any(|c| c == "approved") {
            conn.execute("ALTER TABLE users ADD COLUMN approved INTEGER DEFAULT 0", [])?;
            conn.execute("UPDATE users SET approved = 1", [])?;
        }
        Ok(())
    }

    // ----- users -----

    pub fn get_user(&self, username: &str) -> rusqlite::Result<Option<UserRecord>> {
        self.lock()
            .query_row(
                "SELECT username, password_hash, uuid, locale, preferences_json,
                        trust_level, approved
                 FROM users WHERE username = ?1",
                params![username],
                |row| {
                    Ok(UserRecord {
                        username: row.get(0)?,
                        password_hash: row.get(1)?,
                        uuid: row
                            .get::<_, String>(2)?
                            .parse()
                            .unwrap_or_else(|_| Uuid::new_v4()),
                        locale: row.get(3)?,
                        preferences_json: row.get(4)?,
                        trust_level: row.get(5)?,
                        approved: row.get::<_, i64>(6)? != 0,
                    })
                },
            )
            .optional()
    }

    pub fn user_exists(&self, username: &str) -> rusqlite::Result<bool> {
        let count: i64 = self.lock().query_row(
            "SELECT COUNT(*) FROM users WHERE username = ?1",
            params![username],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn user_count(&self) -> rusqlite::Result<i64> {
        self.lock().query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
    }

    pub fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        uuid: Uuid,
        trust_level: i64,
        approved: bool,
    ) -> rusqlite::Result<()> {
        self.lock().execute(
            "INSERT INTO users (username, password_hash, uuid, trust_level, approved)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![username, password_hash, uuid.to_string(), trust_level, approved as i64],
        )?;
        Ok(())
    }

    pub fn update_user_locale(&self, username: &str, locale: &str) -> rusqlite::Result<()> {
        self.lock().execute(
            "UPDATE users SET locale = ?2 WHERE username = ?1",
            params![username, locale],
        )?;
        Ok(())
    }

    pub fn update_user_preferences(&self, username: &str, preferences_json: &str) -> rusqlite::Result<()> {
        self.lock().execute(
            "UPDATE users SET preferences_json = ?2 WHERE username = ?1",
            params![username, preferences_json],
        )?;
        Ok(())
    }

    // ----- live tables (cold-start persistence) -----

    pub fn save_all_tables(&self, rows: &[TableRow]) -> rusqlite::Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        for row in rows {
            tx.execute(
                "INSERT OR REPLACE INTO tables
                     (table_id, game_type, host, members_json, game_json, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    row.table_id,
                    row.game_type,
                    row.host,
                    row.members_json,
                    row.game_json,
                    row.status
                ],
            )?;
        }
        tx.commit()
    }

    pub fn load_all_tables(&self) -> rusqlite::Result<Vec<TableRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT table_id, game_type, host, members_json, game_json, status FROM tables",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(TableRow {
                table_id: row.get(0)?,
                game_type: row.get(1)?,
                host: row.get(2)?,
                members_json: row.get(3)?,
                game_json: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                status: row.get(5)?,
            })
        })?;
        rows.collect()
    }

    pub fn delete_all_tables(&self) -> rusqlite::Result<()> {
        self.lock().execute("DELETE FROM tables", [])?;
        Ok(())
    }

    // ----- saved tables (user snapshots) -----

    #[allow(clippy::too_many_arguments)]
    pub fn save_user_table(
        &self,
        username: &str,
        save_name: &str,
        game_type: &str,
        game_json: &str,
        members_json: &str,
        saved_at: &str,
    ) -> rusqlite::Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO saved_tables
                 (username, save_name, game_type, game_json, members_json, saved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![username, save_name, game_type, game_json, members_json, saved_at],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_user_saved_tables(&self, username: &str) -> rusqlite::Result<Vec<SavedTableRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, username, save_name, game_type, game_json, members_json, saved_at
             FROM saved_tables WHERE username = ?1 ORDER BY saved_at DESC",
        )?;
        let rows = stmt.query_map(params![username], saved_table_from_row)?;
        rows.collect()
    }

    pub fn get_saved_table(&self, save_id: i64) -> rusqlite::Result<Option<SavedTableRecord>> {
        self.lock()
            .query_row(
                "SELECT id, username, save_name, game_type, game_json, members_json, saved_at
                 FROM saved_tables WHERE id = ?1",
                params![save_id],
                saved_table_from_row,
            )
            .optional()
    }

    pub fn delete_saved_table(&self, save_id: i64) -> rusqlite::Result<()> {
        self.lock().execute("DELETE FROM saved_tables WHERE id = ?1", params![save_id])?;
        Ok(())
    }

    // ----- game results -----

    pub fn save_game_result(
        &self,
        game_type: &str,
        timestamp: &str,
        duration_ticks: u64,
        players: &[(PlayerId, String, bool)],
        custom_data: &Value,
    ) -> rusqlite::Result<i64> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO game_results (game_type, timestamp, duration_ticks, custom_data)
             VALUES (?1, ?2, ?3, ?4)",
            params![game_type, timestamp, duration_ticks as i64, custom_data.to_string()],
        )?;
        let result_id = tx.last_insert_rowid();
        for (player_id, player_name, is_bot) in players {
            tx.execute(
                "INSERT INTO game_result_players (result_id, player_id, player_name, is_bot)
                 VALUES (?1, ?2, ?3, ?4)",
                params![result_id, player_id.to_string(), player_name, *is_bot as i64],
            )?;
        }
        tx.commit()?;
        Ok(result_id)
    }

    pub fn get_game_results(&self, game_type: &str) -> rusqlite::Result<Vec<StoredResult>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, duration_ticks, custom_data
             FROM game_results WHERE game_type = ?1 ORDER BY timestamp DESC",
        )?;
        let mut results: Vec<StoredResult> = stmt
            .query_map(params![game_type], |row| {
                Ok(StoredResult {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    duration_ticks: row.get::<_, i64>(2)? as u64,
                    custom_data: serde_json::from_str(
                        &row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    )
                    .unwrap_or(Value::Null),
                    players: Vec::new(),
                })
            })?
            .collect::<rusqlite::Result<_>>()?;

        let mut player_stmt = conn.prepare(
            "SELECT player_id, player_name, is_bot FROM game_result_players
             WHERE result_id = ?1",
        )?;
        for result in &mut results {
            let players = player_stmt.query_map(params![result.id], |row| {
                Ok((
                    row.get::<_, String>(0)?.parse().unwrap_or_else(|_| Uuid::new_v4()),
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)? != 0,
                ))
            })?;
            result.players = players.collect::<rusqlite::Result<_>>()?;
        }
        Ok(results)
    }

    // ----- ratings -----

    pub fn get_player_rating(&self, player_id: PlayerId, game_type: &str) -> rusqlite::Result<Option<(f64, f64)>> {
        self.lock()
            .query_row(
                "SELECT mu, sigma FROM player_ratings WHERE player_id = ?1 AND game_type = ?2",
                params![player_id.to_string(), game_type],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
    }

    pub fn set_player_rating(
        &self,
        player_id: PlayerId,
        game_type: &str,
        mu: f64,
        sigma: f64,
    ) -> rusqlite::Result<()> {
        self.lock().execute(
            "INSERT OR REPLACE INTO player_ratings (player_id, game_type, mu, sigma)
             VALUES (?1, ?2, ?3, ?4)",
            params![player_id.to_string(), game_type, mu, sigma],
        )?;
        Ok(())
    }

    pub fn rating_leaderboard(&self, game_type: &str, limit: usize) -> rusqlite::Result<Vec<(PlayerId, f64, f64)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT player_id, mu, sigma FROM player_ratings
             WHERE game_type = ?1 ORDER BY mu - 3 * sigma DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![game_type, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?.parse().unwrap_or_else(|_| Uuid::new_v4()),
                row.get(1)?,
                row.get(2)?,
            ))
        })?;
        rows.collect()
    }
}

fn saved_table_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SavedTableRecord> {
    Ok(SavedTableRecord {
        id: row.get(0)?,
        username: row.get(1)?,
        save_name: row.get(2)?,
        game_type: row.get(3)?,
        game_json: row.get(4)?,
        members_json: row.get(5)?,
        saved_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn create_and_fetch_user() {
        let db = db();
        let uuid = Uuid::new_v4();
        db.create_user("alice", "hash", uuid, TRUST_ADMIN, true).unwrap();

        let user = db.get_user("alice").unwrap().unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.uuid, uuid);
        assert_eq!(user.trust_level, TRUST_ADMIN);
        assert!(user.approved);
        assert_eq!(user.locale, "en");

        assert!(db.user_exists("alice").unwrap());
        assert!(!db.user_exists("bob").unwrap());
        assert_eq!(db.user_count().unwrap(), 1);
        assert!(db.get_user("bob").unwrap().is_none());
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let db = db();
        db.create_user("alice", "hash", Uuid::new_v4(), TRUST_PLAYER, false).unwrap();
        assert!(db.create_user("alice", "hash2", Uuid::new_v4(), TRUST_PLAYER, false).is_err());
    }

    #[test]
    fn locale_and_preferences_update() {
        let db = db();
        db.create_user("alice", "hash", Uuid::new_v4(), TRUST_PLAYER, false).unwrap();
        db.update_user_locale("alice", "fr").unwrap();
        db.update_user_preferences("alice", r#"{"play_turn_sound":false}"#).unwrap();

        let user = db.get_user("alice").unwrap().unwrap();
        assert_eq!(user.locale, "fr");
        assert!(user.preferences_json.contains("play_turn_sound"));
    }

    #[test]
    fn tables_round_trip_and_clear() {
        let db = db();
        let rows = vec![TableRow {
            table_id: "t1".to_string(),
            game_type: "pig".to_string(),
            host: "alice".to_string(),
            members_json: "[]".to_string(),
            game_json: "{}".to_string(),
            status: "playing".to_string(),
        }];
        db.save_all_tables(&rows).unwrap();
        assert_eq!(db.load_all_tables().unwrap(), rows);

        db.delete_all_tables().unwrap();
        assert!(db.load_all_tables().unwrap().is_empty());
    }

    #[test]
    fn saved_tables_lifecycle() {
        let db = db();
        let id = db
            .save_user_table("alice", "Pig - save", "pig", "{}", "[]", "2026-01-01T00:00:00Z")
            .unwrap();

        let saved = db.get_user_saved_tables("alice").unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].id, id);
        assert_eq!(saved[0].save_name, "Pig - save");

        assert!(db.get_saved_table(id).unwrap().is_some());
        db.delete_saved_table(id).unwrap();
        assert!(db.get_saved_table(id).unwrap().is_none());
        assert!(db.get_user_saved_tables("bob").unwrap().is_empty());
    }

    #[test]
    fn game_results_store_players_and_custom_data() {
        let db = db();
        let alice = Uuid::new_v4();
        let custom = serde_json::json!({"winner_name": "alice", "final_scores": {"alice": 52}});
        db.save_game_result(
            "pig",
            "2026-01-01T00:00:00Z",
            1234,
            &[(alice, "alice".to_string(), false), (Uuid::new_v4(), "Bot".to_string(), true)],
            &custom,
        )
        .unwrap();

        let results = db.get_game_results("pig").unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].duration_ticks, 1234);
        assert_eq!(results[0].custom_data["winner_name"], "alice");
        assert_eq!(results[0].players.len(), 2);
        assert!(results[0].players.iter().any(|(id, _, is_bot)| *id == alice && !is_bot));

        assert!(db.get_game_results("farkle").unwrap().is_empty());
    }

    #[test]
    fn ratings_upsert_and_leaderboard_order() {
        let db = db();
        let strong = Uuid::new_v4();
        let weak = Uuid::new_v4();
        db.set_player_rating(strong, "pig", 30.0, 1.0).unwrap();
        db.set_player_rating(weak, "pig", 25.0, 8.0).unwrap();

        assert_eq!(db.get_player_rating(strong, "pig").unwrap(), Some((30.0, 1.0)));
        assert_eq!(db.get_player_rating(strong, "farkle").unwrap(), None);

        // Ordered by ordinal (mu - 3 sigma).
        let board = db.rating_leaderboard("pig", 10).unwrap();
        assert_eq!(board[0].0, strong);
        assert_eq!(board.len(), 2);

        db.set_player_rating(strong, "pig", 31.0, 0.9).unwrap();
        assert_eq!(db.get_player_rating(strong, "pig").unwrap(), Some((31.0, 0.9)));
    }
}
