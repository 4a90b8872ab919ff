use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::error::SimError;
use crate::types::{Mode, PlayerId, Roster};

/// A pool player as the match builder sees them. The builder matches on
/// ground truth so lobby quality tracks the scripted trajectory, not any
/// estimator's lag.
#[derive(Clone, Debug)]
pub struct PoolEntry {
    pub player_id: PlayerId,
    pub true_rating: f64,
    pub last_played: Option<DateTime<Utc>>,
    /// Persistent party label; members sharing a label queue together.
    pub party_label: Option<String>,
}

/// One atomic queue unit: a solo player or a cohesive party.
struct QueueUnit {
    members: Vec<PlayerId>,
    party_label: Option<String>,
    mean_rating: f64,
    busy: bool,
}

/// Builds lobbies around a reference entity with an expanding rating window.
pub struct MatchBuilder {
    window_initial: f64,
    window_growth: f64,
    max_widenings: u32,
}

impl MatchBuilder {
    pub fn new(window_initial: f64, window_growth: f64, max_widenings: u32) -> Self {
        Self {
            window_initial,
            window_growth,
            max_widenings,
        }
    }

    /// Deterministically truncate a party to the mode's slot: members keep
    /// their id order and the overflow is dropped from the tail.
    pub fn truncate_party(members: &[PlayerId], slot: usize) -> Vec<PlayerId> {
        let mut kept: Vec<PlayerId> = members.to_vec();
        kept.sort_unstable();
        kept.truncate(slot);
        kept
    }

    /// Assemble a full roster for `mode` around the reference group.
    ///
    /// `reference` must already respect the mode's party slot. Pool players
    /// inside the current window are ranked by rating distance from the
    /// anchor (busy players last, id as the tie-break) and packed into teams
    /// without splitting parties. Each failed pass widens the window by the
    /// growth factor until the widening budget runs out.
    pub fn build(
        &self,
        mode: Mode,
        anchor_rating: f64,
        reference: &[PlayerId],
        reference_party: Option<&str>,
        pool: &[PoolEntry],
        now: DateTime<Utc>,
    ) -> Result<Roster, SimError> {
        let needed = mode.roster_size() - reference.len();
        let mut window = self.window_initial;

        for widening in 0..=self.max_widenings {
            let units = self.collect_units(mode, anchor_rating, window, pool, now);
            if let Some(roster) = self.pack(mode, reference, reference_party, &units) {
                return Ok(roster);
            }
            let found: usize = units.iter().map(|u| u.members.len()).sum();
            if widening == self.max_widenings {
                return Err(SimError::RosterBuildFailure {
                    mode,
                    needed,
                    found,
                    widenings: widening,
                });
            }
            window *= self.window_growth;
        }
        unreachable!("widening loop always returns");
    }

    fn collect_units(
        &self,
        mode: Mode,
        anchor: f64,
        window: f64,
        pool: &[PoolEntry],
        now: DateTime<Utc>,
    ) -> Vec<QueueUnit> {
        let slot = mode.party_slot();
        let in_window: Vec<&PoolEntry> = pool
            .iter()
            .filter(|e| (e.true_rating - anchor).abs() <= window)
            .collect();

        let mut units: Vec<QueueUnit> = Vec::new();
        let mut parties: HashMap<&str, Vec<&PoolEntry>> = HashMap::new();
        for entry in &in_window {
            match (slot, entry.party_label.as_deref()) {
                // Parties only cohere in modes that support them.
                (Some(_), Some(label)) => parties.entry(label).or_default().push(entry),
                _ => units.push(solo_unit(entry, now)),
            }
        }

        if let Some(slot) = slot {
            for (label, mut members) in parties {
                members.sort_by_key(|e| e.player_id);
                members.truncate(slot);
                let mean =
                    members.iter().map(|e| e.true_rating).sum::<f64>() / members.len() as f64;
                let busy = members
                    .iter()
                    .any(|e| e.last_played.map(|t| t > now).unwrap_or(false));
                units.push(QueueUnit {
                    members: members.iter().map(|e| e.player_id).collect(),
                    party_label: Some(label.to_string()),
                    mean_rating: mean,
                    busy,
                });
            }
        }

        units.sort_by(|a, b| {
            let da = (a.mean_rating - anchor).abs();
            let db = (b.mean_rating - anchor).abs();
            (a.busy, da, a.members[0])
                .partial_cmp(&(b.busy, db, b.members[0]))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        units
    }

    /// Greedy first-fit packing into teams. Returns None if the window does
    /// not hold enough candidates to fill every seat.
    fn pack(
        &self,
        mode: Mode,
        reference: &[PlayerId],
        reference_party: Option<&str>,
        units: &[QueueUnit],
    ) -> Option<Roster> {
        let team_count = mode.team_count();
        let team_size = mode.team_size();
        let mut teams: Vec<Vec<PlayerId>> = vec![Vec::new(); team_count];
        let mut party_names: HashMap<PlayerId, String> = HashMap::new();

        teams[0].extend_from_slice(reference);
        if let Some(name) = reference_party {
            if reference.len() > 1 {
                for &id in reference {
                    party_names.insert(id, name.to_string());
                }
            }
        }

        for unit in units {
            // Team with the least remaining room that still fits the unit,
            // so parties do not strand single seats.
            let target = teams
                .iter()
                .enumerate()
                .filter(|(_, t)| team_size - t.len() >= unit.members.len())
                .min_by_key(|(i, t)| (team_size - t.len(), *i))
                .map(|(i, _)| i);
            if let Some(ti) = target {
                teams[ti].extend_from_slice(&unit.members);
                if let Some(label) = &unit.party_label {
                    if unit.members.len() > 1 {
                        for &id in &unit.members {
                            party_names.insert(id, label.clone());
                        }
                    }
                }
            }
            if teams.iter().all(|t| t.len() == team_size) {
                return Some(Roster {
                    mode,
                    teams,
                    party_names,
                });
            }
        }
        None
    }
}

fn solo_unit(entry: &PoolEntry, now: DateTime<Utc>) -> QueueUnit {
    QueueUnit {
        members: vec![entry.player_id],
        party_label: None,
        mean_rating: entry.true_rating,
        busy: entry.last_played.map(|t| t > now).unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_704_067_200, 0).single().unwrap()
    }

    fn entry(id: PlayerId, rating: f64) -> PoolEntry {
        PoolEntry {
            player_id: id,
            true_rating: rating,
            last_played: None,
            party_label: None,
        }
    }

    fn flat_pool(count: u32, rating: f64) -> Vec<PoolEntry> {
        (100..100 + count).map(|id| entry(id, rating)).collect()
    }

    #[test]
    fn truncation_is_stable_and_keeps_lowest_ids() {
        let kept = MatchBuilder::truncate_party(&[44, 12, 99, 7, 31], 3);
        assert_eq!(kept, vec![7, 12, 31]);
    }

    #[test]
    fn truncation_leaves_small_parties_alone() {
        let kept = MatchBuilder::truncate_party(&[5, 6], 6);
        assert_eq!(kept, vec![5, 6]);
    }

    #[test]
    fn builds_full_tdm_roster_around_reference() {
        let builder = MatchBuilder::new(300.0, 2.0, 4);
        let roster = builder
            .build(Mode::TeamDeathmatch, 600.0, &[1], None, &flat_pool(30, 620.0), now())
            .unwrap();
        assert_eq!(roster.teams.len(), 2);
        assert!(roster.teams.iter().all(|t| t.len() == 6));
        assert_eq!(roster.team_of(1), Some(0));
    }

    #[test]
    fn prefers_closest_ratings() {
        let builder = MatchBuilder::new(300.0, 2.0, 4);
        let mut pool = flat_pool(11, 610.0);
        pool.push(entry(500, 880.0)); // in window but far
        let roster = builder
            .build(Mode::TeamDeathmatch, 600.0, &[1], None, &pool, now())
            .unwrap();
        assert!(!roster.players().any(|p| p == 500));
    }

    #[test]
    fn widens_window_when_needed() {
        let builder = MatchBuilder::new(100.0, 2.0, 4);
        // Everyone is 500 away: needs two widenings (100 -> 200 -> 400).
        let roster = builder
            .build(Mode::TeamDeathmatch, 600.0, &[1], None, &flat_pool(30, 1100.0), now())
            .unwrap();
        assert_eq!(roster.player_count(), 12);
    }

    #[test]
    fn fails_after_widening_budget() {
        let builder = MatchBuilder::new(100.0, 2.0, 2);
        let err = builder
            .build(Mode::TeamDeathmatch, 600.0, &[1], None, &flat_pool(4, 620.0), now())
            .unwrap_err();
        match err {
            SimError::RosterBuildFailure { mode, needed, found, widenings } => {
                assert_eq!(mode, Mode::TeamDeathmatch);
                assert_eq!(needed, 11);
                assert_eq!(found, 4);
                assert_eq!(widenings, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn pool_parties_stay_on_one_team() {
        let builder = MatchBuilder::new(300.0, 2.0, 4);
        let mut pool = flat_pool(20, 600.0);
        for id in 200..203u32 {
            pool.push(PoolEntry {
                player_id: id,
                true_rating: 600.0,
                last_played: None,
                party_label: Some("trio".to_string()),
            });
        }
        let roster = builder
            .build(Mode::TeamDeathmatch, 600.0, &[1], None, &pool, now())
            .unwrap();
        let teams: Vec<Option<usize>> =
            (200..203u32).map(|id| roster.team_of(id)).collect();
        if let Some(first) = teams[0] {
            assert!(teams.iter().all(|&t| t == Some(first)));
            assert_eq!(roster.party_names.get(&200).map(String::as_str), Some("trio"));
        }
    }

    #[test]
    fn solo_mode_ignores_party_labels() {
        let builder = MatchBuilder::new(300.0, 2.0, 4);
        let mut pool = flat_pool(15, 600.0);
        for id in 200..203u32 {
            pool.push(PoolEntry {
                player_id: id,
                true_rating: 600.0,
                last_played: None,
                party_label: Some("trio".to_string()),
            });
        }
        let roster = builder
            .build(Mode::FreeForAll, 600.0, &[1], None, &pool, now())
            .unwrap();
        assert_eq!(roster.teams.len(), 12);
        assert!(roster.teams.iter().all(|t| t.len() == 1));
        assert!(roster.party_names.is_empty());
    }

    #[test]
    fn reference_party_carries_its_name() {
        let builder = MatchBuilder::new(300.0, 2.0, 4);
        let roster = builder
            .build(
                Mode::SearchAndDestroy,
                600.0,
                &[5, 6, 7],
                Some("plateau_trio"),
                &flat_pool(20, 600.0),
                now(),
            )
            .unwrap();
        assert_eq!(roster.team_of(5), Some(0));
        assert_eq!(roster.team_of(7), Some(0));
        assert_eq!(
            roster.party_names.get(&5).map(String::as_str),
            Some("plateau_trio")
        );
    }

    #[test]
    fn busy_players_are_picked_last() {
        let builder = MatchBuilder::new(300.0, 2.0, 0);
        let mut pool = flat_pool(11, 600.0);
        pool.push(PoolEntry {
            player_id: 999,
            true_rating: 600.0,
            last_played: Some(now() + chrono::Duration::hours(1)),
            party_label: None,
        });
        let roster = builder
            .build(Mode::TeamDeathmatch, 600.0, &[1], None, &pool, now())
            .unwrap();
        assert!(!roster.players().any(|p| p == 999));
    }
}
