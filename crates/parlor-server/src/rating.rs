//! TrueSkill ratings per (player, game type), backed by the
//! player_ratings table. Rankings arrive as ordered groups of player ids
//! (first place first, groups are ties).

use skillratings::MultiTeamOutcome;
use skillratings::trueskill::{TrueSkillConfig, TrueSkillRating, expected_score, trueskill_multi_team};

use parlor_core::game::RatingView;
use parlor_core::player::PlayerId;

use crate::db::Database;

#[derive(Clone)]
pub struct RatingEngine {
    db: Database,
}

impl RatingEngine {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// A player's rating, TrueSkill defaults if absent (mu 25.0, sigma
    /// 25/3).
    pub fn get_rating(&self, game_type: &str, player: PlayerId) -> TrueSkillRating {
        match self.db.get_player_rating(player, game_type) {
            Ok(Some((mu, sigma))) => TrueSkillRating { rating: mu, uncertainty: sigma },
            Ok(None) => TrueSkillRating::new(),
            Err(e) => {
                tracing::warn!(error = %e, "rating lookup failed, using default");
                TrueSkillRating::new()
            },
        }
    }

    /// Conservative skill estimate used for leaderboard ordering.
    pub fn ordinal(rating: &TrueSkillRating) -> f64 {
        rating.rating - 3.0 * rating.uncertainty
    }

    /// Apply a Bayesian update for a finished game. Needs at least two
    /// ranking groups to be meaningful.
    pub fn update_ratings(&self, game_type: &str, rankings: &[Vec<PlayerId>]) {
        if rankings.len() < 2 {
            return;
        }
        let ratings: Vec<Vec<TrueSkillRating>> = rankings
            .iter()
            .map(|group| group.iter().map(|&id| self.get_rating(game_type, id)).collect())
            .collect();
        let teams: Vec<(&[TrueSkillRating], MultiTeamOutcome)> = ratings
            .iter()
            .enumerate()
            .map(|(place, group)| (group.as_slice(), MultiTeamOutcome::new(place + 1)))
            .collect();

        let updated = trueskill_multi_team(&teams, &TrueSkillConfig::new());
        for (group_ids, group_ratings) in rankings.iter().zip(updated) {
            for (&player, rating) in group_ids.iter().zip(group_ratings) {
                if let Err(e) =
                    self.db.set_player_rating(player, game_type, rating.rating, rating.uncertainty)
                {
                    tracing::error!(error = %e, "failed to persist rating update");
                }
            }
        }
    }

    /// Top rated players by ordinal.
    pub fn leaderboard(&self, game_type: &str, limit: usize) -> Vec<(PlayerId, TrueSkillRating)> {
        self.db
            .rating_leaderboard(game_type, limit)
            .unwrap_or_default()
            .into_iter()
            .map(|(id, mu, sigma)| (id, TrueSkillRating { rating: mu, uncertainty: sigma }))
            .collect()
    }

    /// Head-to-head win probability for a against b.
    pub fn predict_win_probability(&self, game_type: &str, a: PlayerId, b: PlayerId) -> f64 {
        let (p_a, _) = expected_score(
            &self.get_rating(game_type, a),
            &self.get_rating(game_type, b),
            &TrueSkillConfig::new(),
        );
        p_a
    }
}

impl RatingView for RatingEngine {
    fn rating(&self, game_type: &str, player: PlayerId) -> (f64, f64) {
        let rating = self.get_rating(game_type, player);
        (rating.rating, rating.uncertainty)
    }

    fn win_probability(&self, game_type: &str, a: PlayerId, b: PlayerId) -> f64 {
        self.predict_win_probability(game_type, a, b)
    }
}
