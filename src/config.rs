use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::scenario::TrajectoryLaw;
use crate::types::{Mode, PlayerId};

/// Gaussian parameters for one rating tier. Means/deviations drive the raw
/// per-game draws before outcome resolution.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TierParams {
    pub mean_kills: f64,
    pub sd_kills: f64,
    pub mean_deaths: f64,
    pub sd_deaths: f64,
    pub mean_assists: f64,
    pub sd_assists: f64,
    pub mean_accuracy: f64,
    pub sd_accuracy: f64,
    pub mean_headshot_accuracy: f64,
    pub sd_headshot_accuracy: f64,
    pub mean_torso_accuracy: f64,
    pub sd_torso_accuracy: f64,
    pub mean_killstreak: f64,
    pub sd_killstreak: f64,
    pub mean_longest_time_alive: f64,
    pub sd_longest_time_alive: f64,
    pub mean_objective_time: f64,
    pub sd_objective_time: f64,
    // Seed history for pool players (how much play they arrive with).
    pub mean_prior_games: f64,
    pub sd_prior_games: f64,
    pub mean_prior_win_rate: f64,
}

/// Low/medium/high anchors with piecewise-linear interpolation over the
/// ground-truth rating. Anchor ratings follow the calibration placeholder in
/// the source data: 200 / 1300 / 3000.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TierAnchors {
    pub low: TierParams,
    pub med: TierParams,
    pub high: TierParams,
}

const ANCHOR_LOW: f64 = 200.0;
const ANCHOR_MED: f64 = 1300.0;
const ANCHOR_HIGH: f64 = 3000.0;

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

impl TierAnchors {
    /// Interpolate every parameter for the given rating. Extrapolates with
    /// the nearest segment's slope below 200 / above 3000, floored at zero.
    pub fn at(&self, rating: f64) -> TierParams {
        let blend = |low: f64, med: f64, high: f64| -> f64 {
            let v = if rating <= ANCHOR_LOW {
                let slope = (med - low) / (ANCHOR_MED - ANCHOR_LOW);
                low - (ANCHOR_LOW - rating) * slope
            } else if rating <= ANCHOR_MED {
                lerp(low, med, (rating - ANCHOR_LOW) / (ANCHOR_MED - ANCHOR_LOW))
            } else if rating <= ANCHOR_HIGH {
                lerp(med, high, (rating - ANCHOR_MED) / (ANCHOR_HIGH - ANCHOR_MED))
            } else {
                let slope = (high - med) / (ANCHOR_HIGH - ANCHOR_MED);
                high + (rating - ANCHOR_HIGH) * slope
            };
            v.max(0.0)
        };

        TierParams {
            mean_kills: blend(self.low.mean_kills, self.med.mean_kills, self.high.mean_kills),
            sd_kills: blend(self.low.sd_kills, self.med.sd_kills, self.high.sd_kills),
            mean_deaths: blend(self.low.mean_deaths, self.med.mean_deaths, self.high.mean_deaths),
            sd_deaths: blend(self.low.sd_deaths, self.med.sd_deaths, self.high.sd_deaths),
            mean_assists: blend(
                self.low.mean_assists,
                self.med.mean_assists,
                self.high.mean_assists,
            ),
            sd_assists: blend(self.low.sd_assists, self.med.sd_assists, self.high.sd_assists),
            mean_accuracy: blend(
                self.low.mean_accuracy,
                self.med.mean_accuracy,
                self.high.mean_accuracy,
            ),
            sd_accuracy: blend(
                self.low.sd_accuracy,
                self.med.sd_accuracy,
                self.high.sd_accuracy,
            ),
            mean_headshot_accuracy: blend(
                self.low.mean_headshot_accuracy,
                self.med.mean_headshot_accuracy,
                self.high.mean_headshot_accuracy,
            ),
            sd_headshot_accuracy: blend(
                self.low.sd_headshot_accuracy,
                self.med.sd_headshot_accuracy,
                self.high.sd_headshot_accuracy,
            ),
            mean_torso_accuracy: blend(
                self.low.mean_torso_accuracy,
                self.med.mean_torso_accuracy,
                self.high.mean_torso_accuracy,
            ),
            sd_torso_accuracy: blend(
                self.low.sd_torso_accuracy,
                self.med.sd_torso_accuracy,
                self.high.sd_torso_accuracy,
            ),
            mean_killstreak: blend(
                self.low.mean_killstreak,
                self.med.mean_killstreak,
                self.high.mean_killstreak,
            ),
            sd_killstreak: blend(
                self.low.sd_killstreak,
                self.med.sd_killstreak,
                self.high.sd_killstreak,
            ),
            mean_longest_time_alive: blend(
                self.low.mean_longest_time_alive,
                self.med.mean_longest_time_alive,
                self.high.mean_longest_time_alive,
            ),
            sd_longest_time_alive: blend(
                self.low.sd_longest_time_alive,
                self.med.sd_longest_time_alive,
                self.high.sd_longest_time_alive,
            ),
            mean_objective_time: blend(
                self.low.mean_objective_time,
                self.med.mean_objective_time,
                self.high.mean_objective_time,
            ),
            sd_objective_time: blend(
                self.low.sd_objective_time,
                self.med.sd_objective_time,
                self.high.sd_objective_time,
            ),
            mean_prior_games: blend(
                self.low.mean_prior_games,
                self.med.mean_prior_games,
                self.high.mean_prior_games,
            ),
            sd_prior_games: blend(
                self.low.sd_prior_games,
                self.med.sd_prior_games,
                self.high.sd_prior_games,
            ),
            mean_prior_win_rate: blend(
                self.low.mean_prior_win_rate,
                self.med.mean_prior_win_rate,
                self.high.mean_prior_win_rate,
            ),
        }
    }
}

/// Tier-to-distribution mapping per mode. A calibration placeholder until
/// real gameplay telemetry is available; callers are expected to swap in
/// their own table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TierTable {
    pub tdm: TierAnchors,
    pub ffa: TierAnchors,
    pub domination: TierAnchors,
    pub br_1v99: TierAnchors,
    pub br_4v96: TierAnchors,
    pub sad: TierAnchors,
}

impl TierTable {
    pub fn anchors(&self, mode: Mode) -> &TierAnchors {
        match mode {
            Mode::TeamDeathmatch => &self.tdm,
            Mode::FreeForAll => &self.ffa,
            Mode::Domination => &self.domination,
            Mode::BattleRoyale1v99 => &self.br_1v99,
            Mode::BattleRoyale4v96 => &self.br_4v96,
            Mode::SearchAndDestroy => &self.sad,
        }
    }

    pub fn params(&self, mode: Mode, rating: f64) -> TierParams {
        self.anchors(mode).at(rating)
    }
}

fn default_anchors(objective: bool, alive_scale: f64) -> TierAnchors {
    TierAnchors {
        low: TierParams {
            mean_kills: 3.0,
            sd_kills: 2.0,
            mean_deaths: 9.0,
            sd_deaths: 3.0,
            mean_assists: 1.0,
            sd_assists: 1.0,
            mean_accuracy: 0.10,
            sd_accuracy: 0.02,
            mean_headshot_accuracy: 0.01,
            sd_headshot_accuracy: 0.003,
            mean_torso_accuracy: 0.05,
            sd_torso_accuracy: 0.01,
            mean_killstreak: 2.0,
            sd_killstreak: 1.0,
            mean_longest_time_alive: 120.0 * alive_scale,
            sd_longest_time_alive: 60.0 * alive_scale,
            mean_objective_time: if objective { 40.0 } else { 0.0 },
            sd_objective_time: if objective { 20.0 } else { 0.0 },
            mean_prior_games: 50.0,
            sd_prior_games: 15.0,
            mean_prior_win_rate: 0.25,
        },
        med: TierParams {
            mean_kills: 8.0,
            sd_kills: 3.0,
            mean_deaths: 8.0,
            sd_deaths: 3.0,
            mean_assists: 2.0,
            sd_assists: 1.0,
            mean_accuracy: 0.15,
            sd_accuracy: 0.02,
            mean_headshot_accuracy: 0.04,
            sd_headshot_accuracy: 0.005,
            mean_torso_accuracy: 0.07,
            sd_torso_accuracy: 0.01,
            mean_killstreak: 3.0,
            sd_killstreak: 1.0,
            mean_longest_time_alive: 200.0 * alive_scale,
            sd_longest_time_alive: 80.0 * alive_scale,
            mean_objective_time: if objective { 90.0 } else { 0.0 },
            sd_objective_time: if objective { 30.0 } else { 0.0 },
            mean_prior_games: 200.0,
            sd_prior_games: 50.0,
            mean_prior_win_rate: 0.45,
        },
        high: TierParams {
            mean_kills: 15.0,
            sd_kills: 4.0,
            mean_deaths: 6.0,
            sd_deaths: 2.0,
            mean_assists: 4.0,
            sd_assists: 2.0,
            mean_accuracy: 0.25,
            sd_accuracy: 0.03,
            mean_headshot_accuracy: 0.07,
            sd_headshot_accuracy: 0.01,
            mean_torso_accuracy: 0.10,
            sd_torso_accuracy: 0.01,
            mean_killstreak: 5.0,
            sd_killstreak: 2.0,
            mean_longest_time_alive: 320.0 * alive_scale,
            sd_longest_time_alive: 90.0 * alive_scale,
            mean_objective_time: if objective { 160.0 } else { 0.0 },
            sd_objective_time: if objective { 40.0 } else { 0.0 },
            mean_prior_games: 800.0,
            sd_prior_games: 150.0,
            mean_prior_win_rate: 0.55,
        },
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            tdm: default_anchors(false, 1.0),
            ffa: default_anchors(false, 1.0),
            domination: default_anchors(true, 1.3),
            br_1v99: default_anchors(false, 3.5),
            br_4v96: default_anchors(false, 4.0),
            sad: default_anchors(false, 0.8),
        }
    }
}

/// One scripted reference entity: a solo player or a party sharing a single
/// trajectory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScenarioSpec {
    /// Members in id order; a single element means a solo reference player.
    pub members: Vec<PlayerId>,
    /// Shared party label; required when `members.len() > 1`.
    pub party_name: Option<String>,
    pub law: TrajectoryLaw,
}

impl ScenarioSpec {
    pub fn solo(id: PlayerId, law: TrajectoryLaw) -> Self {
        Self {
            members: vec![id],
            party_name: None,
            law,
        }
    }

    pub fn party(members: Vec<PlayerId>, name: &str, law: TrajectoryLaw) -> Self {
        Self {
            members,
            party_name: Some(name.to_string()),
            law,
        }
    }
}

/// Elo estimator parameters. K decays with games played so new players move
/// faster.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct EloParams {
    pub k_base: f64,
    pub k_decay_games: f64,
    pub k_min: f64,
}

impl Default for EloParams {
    fn default() -> Self {
        Self {
            k_base: 40.0,
            k_decay_games: 400.0,
            k_min: 10.0,
        }
    }
}

/// Glicko estimator parameters.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct GlickoParams {
    pub rd_min: f64,
    pub rd_max: f64,
    /// RD inflation per idle day, applied as sqrt(rd^2 + c^2 * days).
    pub inflation_c: f64,
}

impl Default for GlickoParams {
    fn default() -> Self {
        Self {
            rd_min: 50.0,
            rd_max: 350.0,
            inflation_c: 8.0,
        }
    }
}

/// TrueSkill-style estimator parameters. Sigma bounds follow the rating
/// scale: six deviations cover the full rank range.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TrueSkillParams {
    pub sigma_max: f64,
    pub sigma_min: f64,
    pub beta: f64,
    /// Additive dynamics variance per game.
    pub tau: f64,
    pub draw_margin: f64,
}

impl Default for TrueSkillParams {
    fn default() -> Self {
        let sigma_max = 3000.0 / 6.0;
        Self {
            sigma_max,
            sigma_min: 3000.0 / 60.0,
            beta: sigma_max / 2.0,
            tau: sigma_max / 100.0,
            draw_margin: 0.1,
        }
    }
}

/// All simulation tunables, serde round-trippable. Environment/file loading
/// lives outside the core.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Total population; ids above the reference entities form the pool.
    pub total_players: u32,
    /// Simulation clock origin; the core never reads the real clock.
    pub start_time: DateTime<Utc>,
    /// Gap between consecutive games of one reference entity, seconds.
    pub game_gap_secs: u32,
    /// Wall-clock length of a trajectory dormancy pause, days.
    pub pause_gap_days: i64,

    /// Games generated per reference entity per mode.
    pub games_per_reference: u32,
    pub scenarios: Vec<ScenarioSpec>,

    /// Starting ground-truth rating for reference entities.
    pub baseline_rating: f64,
    /// Peak trajectory height above the baseline.
    pub trajectory_amplitude: f64,
    /// Upper edge of the pool's stratified starting-rating bands.
    pub max_rating: f64,

    /// Opponent rating window half-width at the first attempt.
    pub rating_window_initial: f64,
    /// Multiplier applied to the window on every relaxation step.
    pub rating_window_growth: f64,
    /// Relaxation budget before a roster build fails.
    pub rating_window_max_widenings: u32,
    /// Fraction of pool players grouped into persistent parties.
    pub pool_party_fraction: f64,

    /// Ground-truth drift cap per game for pool entities.
    pub max_truth_delta: f64,
    /// Scale of the pool ground-truth performance adjustment.
    pub base_performance: f64,

    pub elo: EloParams,
    pub glicko: GlickoParams,
    pub trueskill: TrueSkillParams,
    pub tier_table: TierTable,

    pub rng_seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            total_players: 3000,
            // 2024-01-01T00:00:00Z
            start_time: Utc.timestamp_opt(1_704_067_200, 0).single().unwrap_or_default(),
            game_gap_secs: 120,
            pause_gap_days: 30,
            games_per_reference: 400,
            scenarios: default_scenarios(),
            baseline_rating: 600.0,
            trajectory_amplitude: 900.0,
            max_rating: 3000.0,
            rating_window_initial: 300.0,
            rating_window_growth: 2.0,
            rating_window_max_widenings: 4,
            pool_party_fraction: 0.10,
            max_truth_delta: 40.0,
            base_performance: 20.0,
            elo: EloParams::default(),
            glicko: GlickoParams::default(),
            trueskill: TrueSkillParams::default(),
            tier_table: TierTable::default(),
            rng_seed: 7,
        }
    }
}

/// Default scenario set: each law once as a solo player, plus two party
/// variants so team cohesion and shared trajectories are exercised.
fn default_scenarios() -> Vec<ScenarioSpec> {
    vec![
        ScenarioSpec::solo(1, TrajectoryLaw::RiseFall),
        ScenarioSpec::solo(2, TrajectoryLaw::RisePlateau),
        ScenarioSpec::solo(3, TrajectoryLaw::RisePlateauPausePlateau),
        ScenarioSpec::solo(4, TrajectoryLaw::SmurfDip),
        ScenarioSpec::party(vec![5, 6, 7], "plateau_trio", TrajectoryLaw::RisePlateau),
        ScenarioSpec::party(
            vec![8, 9, 10, 11, 12, 13],
            "smurf_six",
            TrajectoryLaw::SmurfDip,
        ),
    ]
}

impl SimulationConfig {
    /// Ids of every reference player across all scenarios, ascending.
    pub fn reference_ids(&self) -> Vec<PlayerId> {
        let mut ids: Vec<PlayerId> = self
            .scenarios
            .iter()
            .flat_map(|s| s.members.iter().copied())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn is_reference(&self, id: PlayerId) -> bool {
        self.scenarios.iter().any(|s| s.members.contains(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_interpolation_hits_anchors() {
        let anchors = default_anchors(false, 1.0);
        assert!((anchors.at(200.0).mean_kills - anchors.low.mean_kills).abs() < 1e-9);
        assert!((anchors.at(1300.0).mean_kills - anchors.med.mean_kills).abs() < 1e-9);
        assert!((anchors.at(3000.0).mean_kills - anchors.high.mean_kills).abs() < 1e-9);
    }

    #[test]
    fn tier_interpolation_is_monotone_between_anchors() {
        let anchors = default_anchors(false, 1.0);
        let mut prev = anchors.at(200.0).mean_kills;
        for rating in (300..=3000).step_by(100) {
            let next = anchors.at(rating as f64).mean_kills;
            assert!(next >= prev, "mean_kills dropped at rating {rating}");
            prev = next;
        }
    }

    #[test]
    fn tier_extrapolation_never_negative() {
        let anchors = default_anchors(false, 1.0);
        assert!(anchors.at(0.0).mean_kills >= 0.0);
        assert!(anchors.at(5000.0).mean_accuracy >= 0.0);
    }

    #[test]
    fn default_reference_ids_are_contiguous() {
        let config = SimulationConfig::default();
        assert_eq!(config.reference_ids(), (1..=13).collect::<Vec<_>>());
        assert!(config.is_reference(5));
        assert!(!config.is_reference(14));
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = SimulationConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: SimulationConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.total_players, config.total_players);
        assert_eq!(back.scenarios.len(), config.scenarios.len());
    }
}
