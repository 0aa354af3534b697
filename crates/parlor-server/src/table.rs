//! Live tables: the container that pairs a game with its member list.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use parlor_core::game::{GameHandle, GameStatus};

use crate::db::TableRow;

/// A seat-holder or spectator at a table, by username.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMember {
    pub username: String,
    #[serde(default)]
    pub is_spectator: bool,
}

/// One seat recorded in a saved-table snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedMember {
    pub username: String,
    #[serde(default)]
    pub is_bot: bool,
}

/// One live game container. Owns at most one game.
pub struct Table {
    pub table_id: String,
    pub game_type: String,
    pub host: String,
    pub members: Vec<TableMember>,
    pub game: Option<Box<dyn GameHandle>>,
}

impl Table {
    pub fn player_count(&self) -> usize {
        self.game.as_ref().map(|g| g.core().players.len()).unwrap_or(0)
    }

    pub fn status(&self) -> GameStatus {
        self.game.as_ref().map(|g| g.core().status).unwrap_or(GameStatus::Waiting)
    }

    pub fn has_member(&self, username: &str) -> bool {
        self.members.iter().any(|m| m.username == username)
    }

    pub fn add_member(&mut self, username: &str, is_spectator: bool) {
        if let Some(member) = self.members.iter_mut().find(|m| m.username == username) {
            member.is_spectator = is_spectator;
        } else {
            self.members
                .push(TableMember { username: username.to_string(), is_spectator });
        }
    }

    pub fn remove_member(&mut self, username: &str) {
        self.members.retain(|m| m.username != username);
    }

    /// Snapshot for the cold-start tables store.
    pub fn to_row(&self) -> Option<TableRow> {
        let game = self.game.as_ref()?;
        Some(TableRow {
            table_id: self.table_id.clone(),
            game_type: self.game_type.clone(),
            host: self.host.clone(),
            members_json: serde_json::to_string(&self.members).unwrap_or_else(|_| "[]".to_string()),
            game_json: game.to_json().ok()?,
            status: game.core().status.as_str().to_string(),
        })
    }
}

/// Catalog of live tables keyed by table id.
#[derive(Default)]
pub struct TableManager {
    tables: HashMap<String, Table>,
}

impl TableManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a table with a fresh opaque id. The caller fills the game
    /// slot immediately afterwards.
    pub fn create_table(&mut self, game_type: &str, host: &str) -> String {
        let table_id = Uuid::new_v4().to_string();
        self.tables.insert(
            table_id.clone(),
            Table {
                table_id: table_id.clone(),
                game_type: game_type.to_string(),
                host: host.to_string(),
                members: vec![TableMember { username: host.to_string(), is_spectator: false }],
                game: None,
            },
        );
        table_id
    }

    /// Re-insert a table restored from persistence.
    pub fn insert(&mut self, table: Table) {
        self.tables.insert(table.table_id.clone(), table);
    }

    pub fn get(&self, table_id: &str) -> Option<&Table> {
        self.tables.get(table_id)
    }

    pub fn get_mut(&mut self, table_id: &str) -> Option<&mut Table> {
        self.tables.get_mut(table_id)
    }

    pub fn find_user_table(&self, username: &str) -> Option<&Table> {
        self.tables.values().find(|t| t.has_member(username))
    }

    pub fn find_user_table_mut(&mut self, username: &str) -> Option<&mut Table> {
        self.tables.values_mut().find(|t| t.has_member(username))
    }

    /// Tables still gathering players for a game type.
    pub fn waiting_tables(&self, game_type: &str) -> Vec<&Table> {
        let mut waiting: Vec<&Table> = self
            .tables
            .values()
            .filter(|t| t.game_type == game_type && t.status() == GameStatus::Waiting)
            .collect();
        waiting.sort_by(|a, b| a.table_id.cmp(&b.table_id));
        waiting
    }

    pub fn remove(&mut self, table_id: &str) -> Option<Table> {
        self.tables.remove(table_id)
    }

    pub fn table_ids(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Snapshot every table for shutdown persistence.
    pub fn save_all(&self) -> Vec<TableRow> {
        self.tables.values().filter_map(Table::to_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_table_seats_the_host() {
        let mut manager = TableManager::new();
        let id = manager.create_table("pig", "alice");
        let table = manager.get(&id).unwrap();
        assert_eq!(table.game_type, "pig");
        assert_eq!(table.host, "alice");
        assert!(table.has_member("alice"));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn find_user_table_scans_members() {
        let mut manager = TableManager::new();
        let id = manager.create_table("pig", "alice");
        manager.get_mut(&id).unwrap().add_member("bob", true);

        assert_eq!(manager.find_user_table("bob").unwrap().table_id, id);
        assert!(manager.find_user_table("carol").is_none());
    }

    #[test]
    fn member_add_is_idempotent_and_updates_spectator_flag() {
        let mut manager = TableManager::new();
        let id = manager.create_table("pig", "alice");
        let table = manager.get_mut(&id).unwrap();
        table.add_member("bob", false);
        table.add_member("bob", true);
        assert_eq!(table.members.len(), 2);
        assert!(table.members.iter().find(|m| m.username == "bob").unwrap().is_spectator);

        table.remove_member("bob");
        assert!(!table.has_member("bob"));
    }

    #[test]
    fn waiting_tables_filter_by_type_and_status() {
        let mut manager = TableManager::new();
        manager.create_table("pig", "alice");
        manager.create_table("farkle", "bob");

        assert_eq!(manager.waiting_tables("pig").len(), 1);
        assert_eq!(manager.waiting_tables("farkle").len(), 1);
        assert!(manager.waiting_tables("threes").is_empty());
    }

    #[test]
    fn remove_drops_the_table() {
        let mut manager = TableManager::new();
        let id = manager.create_table("pig", "alice");
        assert!(manager.remove(&id).is_some());
        assert!(manager.is_empty());
        assert!(manager.remove(&id).is_none());
    }
}
