use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::config::TierParams;
use crate::error::SimError;
use crate::types::{AggregateRecord, GamePlayerRecord, PlayerId};

/// Per-player career aggregates, folded one game record at a time.
///
/// The fold is incremental: averages move by `(x - avg) / n` so no game
/// history has to be retained. A monotone game-id guard rejects replays.
#[derive(Clone, Debug, Default)]
pub struct AggregationLedger {
    records: HashMap<PlayerId, AggregateRecord>,
}

impl AggregationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, player: PlayerId) -> Option<&AggregateRecord> {
        self.records.get(&player)
    }

    pub fn player_count(&self) -> usize {
        self.records.len()
    }

    /// Seed a pool player with a plausible career so estimators and lobby
    /// composition do not start from a blank slate.
    pub fn seed(
        &mut self,
        player: PlayerId,
        prior_games: u32,
        win_rate: f64,
        tier: &TierParams,
        at: DateTime<Utc>,
    ) {
        let mut agg = AggregateRecord::empty(at);
        let wins = (prior_games as f64 * win_rate.clamp(0.0, 1.0)).round() as u32;
        let ties = prior_games / 50;
        agg.games_played = prior_games;
        agg.wins = wins.min(prior_games);
        agg.ties = ties.min(prior_games - agg.wins);
        agg.losses = prior_games - agg.wins - agg.ties;
        agg.total_kills = (prior_games as f64 * tier.mean_kills).round() as u64;
        agg.total_deaths = (prior_games as f64 * tier.mean_deaths).round() as u64;
        agg.total_assists = (prior_games as f64 * tier.mean_assists).round() as u64;
        agg.total_damage_dealt =
            (prior_games as f64 * tier.mean_kills * 150.0).round() as u64;
        agg.total_damage_taken =
            (prior_games as f64 * tier.mean_deaths * 150.0).round() as u64;
        agg.avg_kills = tier.mean_kills;
        agg.avg_deaths = tier.mean_deaths;
        agg.avg_assists = tier.mean_assists;
        agg.avg_damage_dealt = tier.mean_kills * 150.0;
        agg.avg_accuracy = tier.mean_accuracy;
        agg.avg_longest_time_alive = tier.mean_longest_time_alive;
        agg.avg_objective_time = tier.mean_objective_time;
        agg.best_killstreak = tier.mean_killstreak.round() as u32;
        self.records.insert(player, agg);
    }

    /// Fold one game record into the player's aggregates.
    pub fn apply(&mut self, record: &GamePlayerRecord) -> Result<(), SimError> {
        let agg = self
            .records
            .entry(record.player_id)
            .or_insert_with(|| AggregateRecord::empty(record.created_at));

        if let Some(last) = agg.last_applied_game {
            if record.game_id <= last {
                return Err(SimError::LedgerReplayError {
                    game_id: record.game_id,
                    player_id: record.player_id,
                });
            }
        }

        // In a free-for-all only the players sharing first place tied; the
        // rest of the lobby still lost. Team-mode ties place everyone first.
        let tie = record.is_tie.unwrap_or(false) && record.placement == 1;
        let won = record.placement == 1 && !tie;
        agg.games_played += 1;
        if tie {
            agg.ties += 1;
            agg.win_streak = 0;
        } else if won {
            agg.wins += 1;
            agg.win_streak += 1;
        } else {
            agg.losses += 1;
            agg.win_streak = 0;
        }

        let s = &record.stats;
        agg.total_kills += s.kills as u64;
        agg.total_deaths += s.deaths as u64;
        agg.total_assists += s.assists.unwrap_or(0) as u64;
        agg.total_damage_dealt += s.damage_dealt as u64;
        agg.total_damage_taken += s.damage_taken as u64;
        agg.best_killstreak = agg.best_killstreak.max(s.killstreak);

        let n = agg.games_played as f64;
        agg.avg_kills += (s.kills as f64 - agg.avg_kills) / n;
        agg.avg_deaths += (s.deaths as f64 - agg.avg_deaths) / n;
        agg.avg_assists += (s.assists.unwrap_or(0) as f64 - agg.avg_assists) / n;
        agg.avg_damage_dealt += (s.damage_dealt as f64 - agg.avg_damage_dealt) / n;
        agg.avg_accuracy += (s.accuracy - agg.avg_accuracy) / n;
        agg.avg_longest_time_alive +=
            (s.longest_time_alive as f64 - agg.avg_longest_time_alive) / n;
        agg.avg_objective_time +=
            (s.objective_time.unwrap_or(0) as f64 - agg.avg_objective_time) / n;

        agg.last_played = record.created_at;
        agg.last_applied_game = Some(record.game_id);
        Ok(())
    }
}
