//! Registry of game factories: one entry per shipped game, with the
//! create/load functions the tables and the cold-start restore use.

use std::collections::BTreeMap;

use parlor_core::game::{Game, GameHandle, game_from_json};
use parlor_core::protocol::GameListing;

type CreateFn = fn() -> Box<dyn GameHandle>;
type LoadFn = fn(&str) -> serde_json::Result<Box<dyn GameHandle>>;

pub struct GameEntry {
    pub game_type: &'static str,
    pub name: &'static str,
    pub category: &'static str,
    pub min_players: usize,
    pub max_players: usize,
    create: CreateFn,
    load: LoadFn,
}

pub struct GameRegistry {
    entries: Vec<GameEntry>,
}

impl Default for GameRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GameRegistry {
    pub fn new() -> Self {
        let mut registry = Self { entries: Vec::new() };
        registry.register(|| Box::new(Game::new(parlor_pig::PigRules::default())), |json| {
            game_from_json::<parlor_pig::PigRules>(json)
        });
        registry.register(
            || Box::new(Game::new(parlor_farkle::FarkleRules::default())),
            |json| game_from_json::<parlor_farkle::FarkleRules>(json),
        );
        registry.register(
            || Box::new(Game::new(parlor_threes::ThreesRules::default())),
            |json| game_from_json::<parlor_threes::ThreesRules>(json),
        );
        registry
    }

    fn register(&mut self, create: CreateFn, load: LoadFn) {
        let probe = create();
        self.entries.push(GameEntry {
            game_type: probe.game_type(),
            name: probe.display_name(),
            category: probe.category(),
            min_players: probe.min_players(),
            max_players: probe.max_players(),
            create,
            load,
        });
    }

    pub fn entry(&self, game_type: &str) -> Option<&GameEntry> {
        self.entries.iter().find(|entry| entry.game_type == game_type)
    }

    pub fn create(&self, game_type: &str) -> Option<Box<dyn GameHandle>> {
        self.entry(game_type).map(|entry| (entry.create)())
    }

    pub fn load(&self, game_type: &str, json: &str) -> Option<serde_json::Result<Box<dyn GameHandle>>> {
        self.entry(game_type).map(|entry| (entry.load)(json))
    }

    /// The catalog advertised to clients after login.
    pub fn listings(&self) -> Vec<GameListing> {
        self.entries
            .iter()
            .map(|entry| GameListing {
                game_type: entry.game_type.to_string(),
                name: entry.name.to_string(),
            })
            .collect()
    }

    /// Category key -> game types, for the categories menu.
    pub fn by_category(&self) -> BTreeMap<&'static str, Vec<&GameEntry>> {
        let mut categories: BTreeMap<&'static str, Vec<&GameEntry>> = BTreeMap::new();
        for entry in &self.entries {
            categories.entry(entry.category).or_default().push(entry);
        }
        categories
    }

    pub fn iter(&self) -> impl Iterator<Item = &GameEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_shipped_games_are_registered() {
        let registry = GameRegistry::new();
        for game_type in ["pig", "farkle", "threes"] {
            assert!(registry.create(game_type).is_some(), "{game_type} should be registered");
        }
        assert!(registry.create("chess").is_none());
        assert_eq!(registry.listings().len(), 3);
    }

    #[test]
    fn load_round_trips_a_fresh_game() {
        let registry = GameRegistry::new();
        let game = registry.create("pig").unwrap();
        let json = game.to_json().unwrap();
        let restored = registry.load("pig", &json).unwrap().unwrap();
        assert_eq!(restored.game_type(), "pig");
    }

    #[test]
    fn categories_group_games() {
        let registry = GameRegistry::new();
        let categories = registry.by_category();
        let dice = categories.get("category-dice-games").unwrap();
        assert_eq!(dice.len(), 3);
    }

    #[test]
    fn entry_metadata_matches_rules() {
        let registry = GameRegistry::new();
        let pig = registry.entry("pig").unwrap();
        assert_eq!(pig.name, "Pig");
        assert_eq!(pig.min_players, 2);
        assert_eq!(pig.max_players, 4);
    }
}
