use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::collections::HashMap;

use crate::config::{ScenarioSpec, SimulationConfig};
use crate::error::SimError;
use crate::ledger::AggregationLedger;
use crate::rating::{
    pool_truth_delta, Belief, EloEstimator, GlickoEstimator, PlayerRatingState, PreGame,
    RatingAlgorithm, TrueSkillEstimator,
};
use crate::roster::{MatchBuilder, PoolEntry};
use crate::scenario::{Phase, Trajectory};
use crate::synth::{GameOutcome, RequiredOutcome, StatSynthesizer};
use crate::types::{Attribute, Game, GamePlayerRecord, Mode, PlayerId};

/// Receives finished games. One sink instance per mode worker, so no
/// synchronization is needed.
pub trait GameSink: Send {
    fn record(&mut self, game: Game, players: Vec<GamePlayerRecord>);
}

/// In-memory sink, also the default for tests and small runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub games: Vec<Game>,
    pub players: Vec<GamePlayerRecord>,
}

impl GameSink for MemorySink {
    fn record(&mut self, game: Game, players: Vec<GamePlayerRecord>) {
        self.games.push(game);
        self.players.extend(players);
    }
}

/// What happened while generating one mode's games.
#[derive(Clone, Copy, Debug, Default)]
pub struct ModeReport {
    pub games_emitted: u64,
    pub roster_failures: u64,
    pub constraint_conflicts: u64,
    pub scenarios_skipped: u64,
}

/// Output of one mode worker: the report plus the mode's final state.
pub struct ModeRun {
    pub mode: Mode,
    pub report: ModeReport,
    pub sink: MemorySink,
    pub ledger: AggregationLedger,
}

/// Drives the whole generation: one independent worker per mode, each owning
/// its players, ledger, and randomness.
pub struct Pipeline {
    config: SimulationConfig,
}

/// Rating bands used to spread the pool's starting skill.
const POOL_BANDS: u32 = 30;
/// Every 8th plateau game of a tie-capable mode is forced to a capped tie.
const TIE_CADENCE: u32 = 8;
const POOL_PARTY_SIZE: u32 = 3;

impl Pipeline {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Run every mode in parallel. Modes never share mutable state, so each
    /// worker proceeds lock-free.
    pub fn run_all(&self) -> Result<Vec<ModeRun>, SimError> {
        Mode::ALL
            .par_iter()
            .map(|&mode| {
                let mut sink = MemorySink::default();
                let (report, ledger) = self.run_mode(mode, &mut sink)?;
                Ok(ModeRun {
                    mode,
                    report,
                    sink,
                    ledger,
                })
            })
            .collect()
    }

    /// Generate all scenario games for one mode into `sink`.
    pub fn run_mode(
        &self,
        mode: Mode,
        sink: &mut dyn GameSink,
    ) -> Result<(ModeReport, AggregationLedger), SimError> {
        let cfg = &self.config;
        let mut rng = StdRng::seed_from_u64(cfg.rng_seed ^ (mode as u64).wrapping_mul(0x9e37_79b9));
        let mut report = ModeReport::default();
        let mut ledger = AggregationLedger::new();

        let elo = EloEstimator::new(cfg.elo, cfg.baseline_rating);
        let glicko = GlickoEstimator::new(cfg.glicko, cfg.baseline_rating);
        let trueskill = TrueSkillEstimator::new(cfg.trueskill, cfg.baseline_rating);
        let builder = MatchBuilder::new(
            cfg.rating_window_initial,
            cfg.rating_window_growth,
            cfg.rating_window_max_widenings,
        );
        let synthesizer = StatSynthesizer::new(&cfg.tier_table);

        let mut states = self.init_players(mode, &mut rng, &elo, &glicko, &trueskill, &mut ledger);
        let pool_parties = self.pool_party_labels();

        // Per-mode ids keep the ledger's monotone guard meaningful across
        // every scenario of the mode.
        let mut next_game_id: u64 = (mode as u64) * 10_000_000 + 1;
        let mut clock = cfg.start_time;

        info!(
            "mode {:?}: {} scenarios over {} pool players",
            mode,
            cfg.scenarios.len(),
            states.len() - cfg.reference_ids().len()
        );

        for scenario in &cfg.scenarios {
            if scenario.members.len() > 1 && mode.party_slot().is_none() {
                debug!("mode {:?}: skipping party scenario, no party queue", mode);
                report.scenarios_skipped += 1;
                continue;
            }
            self.run_scenario(
                mode,
                scenario,
                &mut rng,
                &mut states,
                &mut ledger,
                &pool_parties,
                &builder,
                &synthesizer,
                (&elo, &glicko, &trueskill),
                &mut next_game_id,
                &mut clock,
                &mut report,
                sink,
            )?;
        }

        info!(
            "mode {:?}: emitted {} games ({} roster failures, {} conflicts)",
            mode, report.games_emitted, report.roster_failures, report.constraint_conflicts
        );
        Ok((report, ledger))
    }

    #[allow(clippy::too_many_arguments)]
    fn run_scenario(
        &self,
        mode: Mode,
        scenario: &ScenarioSpec,
        rng: &mut StdRng,
        states: &mut HashMap<PlayerId, PlayerRatingState>,
        ledger: &mut AggregationLedger,
        pool_parties: &HashMap<PlayerId, String>,
        builder: &MatchBuilder,
        synthesizer: &StatSynthesizer<'_>,
        estimators: (&EloEstimator, &GlickoEstimator, &TrueSkillEstimator),
        next_game_id: &mut u64,
        clock: &mut DateTime<Utc>,
        report: &mut ModeReport,
        sink: &mut dyn GameSink,
    ) -> Result<(), SimError> {
        let cfg = &self.config;
        let trajectory = Trajectory::build(
            scenario.law,
            cfg.games_per_reference,
            cfg.baseline_rating,
            cfg.trajectory_amplitude,
            cfg.pause_gap_days,
        )?;

        let members = match mode.party_slot() {
            Some(slot) if scenario.members.len() > 1 => {
                MatchBuilder::truncate_party(&scenario.members, slot)
            }
            _ => vec![scenario.members[0]],
        };
        let party_name = (members.len() > 1)
            .then(|| scenario.party_name.clone())
            .flatten();
        let reference_ids = cfg.reference_ids();
        let mut plateau_games: u32 = 0;

        for game_index in 0..trajectory.total_games() {
            if let Some(gap_days) = trajectory.pause_before(game_index) {
                *clock += Duration::days(gap_days);
            }

            // Script the reference ground truth for this game.
            let target = trajectory.target(game_index);
            for &id in &members {
                if let Some(state) = states.get_mut(&id) {
                    state.true_rating = target;
                }
            }
            let phase = trajectory.phase(game_index);
            let outcome = match phase {
                Phase::Rising => RequiredOutcome::ReferenceWins,
                Phase::Falling => RequiredOutcome::ReferenceLoses,
                Phase::Plateau => {
                    plateau_games += 1;
                    if tie_capable(mode) && plateau_games % TIE_CADENCE == 0 {
                        RequiredOutcome::Tie
                    } else if plateau_games % 2 == 0 {
                        RequiredOutcome::ReferenceWins
                    } else {
                        RequiredOutcome::ReferenceLoses
                    }
                }
            };

            let pool: Vec<PoolEntry> = states
                .iter()
                .filter(|&(id, _)| !reference_ids.contains(id))
                .map(|(&id, s)| PoolEntry {
                    player_id: id,
                    true_rating: s.true_rating,
                    last_played: s.last_played,
                    party_label: pool_parties.get(&id).cloned(),
                })
                .collect();

            let roster = match builder.build(
                mode,
                target,
                &members,
                party_name.as_deref(),
                &pool,
                *clock,
            ) {
                Ok(r) => r,
                Err(SimError::RosterBuildFailure { needed, found, .. }) => {
                    warn!(
                        "mode {:?}: roster failed at game {} (needed {}, found {})",
                        mode, game_index, needed, found
                    );
                    report.roster_failures += 1;
                    *clock += Duration::seconds(cfg.game_gap_secs as i64);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let outcome_result = synthesizer.synthesize(
                rng,
                &roster,
                &|id| {
                    states
                        .get(&id)
                        .map(|s| s.true_rating)
                        .unwrap_or(cfg.baseline_rating)
                },
                0,
                outcome,
                phase,
            );
            let out = match outcome_result {
                Ok(o) => o,
                Err(SimError::AttributeConstraintConflict { mode, reason }) => {
                    warn!("mode {:?}: constraint conflict: {}", mode, reason);
                    report.constraint_conflicts += 1;
                    *clock += Duration::seconds(cfg.game_gap_secs as i64);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let game_id = *next_game_id;
            *next_game_id += 1;
            self.settle_game(
                mode, game_id, *clock, &roster, &out, states, ledger, estimators,
                &reference_ids, sink,
            )?;
            report.games_emitted += 1;
            *clock += Duration::seconds((out.playtime_secs + cfg.game_gap_secs) as i64);
        }
        Ok(())
    }

    /// Apply one finished game: estimator updates, ground-truth drift for
    /// pool players, ledger fold, and record emission.
    #[allow(clippy::too_many_arguments)]
    fn settle_game(
        &self,
        mode: Mode,
        game_id: u64,
        created_at: DateTime<Utc>,
        roster: &crate::types::Roster,
        out: &GameOutcome,
        states: &mut HashMap<PlayerId, PlayerRatingState>,
        ledger: &mut AggregationLedger,
        (elo, glicko, trueskill): (&EloEstimator, &GlickoEstimator, &TrueSkillEstimator),
        reference_ids: &[PlayerId],
        sink: &mut dyn GameSink,
    ) -> Result<(), SimError> {
        let cfg = &self.config;
        let team_count = roster.teams.len();

        let snapshot_of = |states: &HashMap<PlayerId, PlayerRatingState>, id: PlayerId| {
            states.get(&id).map(|s| s.snapshot())
        };
        let before: HashMap<PlayerId, _> = roster
            .players()
            .filter_map(|id| snapshot_of(states, id).map(|s| (id, s)))
            .collect();

        // Estimators see composition and placements only.
        let view = |belief: fn(&PlayerRatingState) -> Belief| -> Vec<Vec<PreGame>> {
            roster
                .teams
                .iter()
                .map(|team| {
                    team.iter()
                        .filter_map(|id| states.get(id))
                        .map(|s| PreGame {
                            belief: belief(s),
                            games_played: s.games_played,
                            idle_days: s.idle_days(created_at),
                        })
                        .collect()
                })
                .collect()
        };
        let elo_after = elo.update(&view(|s| s.elo), &out.placements);
        let glicko_after = glicko.update(&view(|s| s.glicko), &out.placements);
        let ts_after = trueskill.update(&view(|s| s.trueskill), &out.placements);

        for (ti, team) in roster.teams.iter().enumerate() {
            for (pi, &id) in team.iter().enumerate() {
                if let Some(state) = states.get_mut(&id) {
                    state.elo = elo_after[ti][pi];
                    state.glicko = glicko_after[ti][pi];
                    state.trueskill = ts_after[ti][pi];

                    // Pool ground truth drifts with results; reference truth
                    // stays scripted.
                    if !reference_ids.contains(&id) {
                        let placement_term = if team_count > 1 {
                            1.0 - 2.0 * (out.placements[ti] - 1) as f64
                                / (team_count - 1) as f64
                        } else {
                            0.0
                        };
                        let stats = &out.stats[ti][pi];
                        let stat_term = (stats.kill_death_ratio - 1.0).clamp(-1.0, 1.0);
                        let delta = pool_truth_delta(
                            cfg.base_performance,
                            cfg.max_truth_delta,
                            placement_term,
                            stat_term,
                            state.games_played,
                        );
                        state.true_rating =
                            (state.true_rating + delta).clamp(0.0, cfg.max_rating);
                    }
                    state.games_played += 1;
                    state.last_played = Some(created_at);
                }
            }
        }

        let game = Game {
            id: game_id,
            mode,
            created_at,
            playtime_secs: out.playtime_secs,
            team_count,
            team_size: mode.team_size(),
            teams: roster.teams.clone(),
            placements: out.placements.clone(),
            is_tie: mode.applies(Attribute::IsTie).then_some(out.is_tie),
        };
        let mut records = Vec::with_capacity(roster.player_count());
        for (ti, team) in roster.teams.iter().enumerate() {
            for (pi, &id) in team.iter().enumerate() {
                let (Some(b), Some(state)) = (before.get(&id), states.get(&id)) else {
                    continue;
                };
                let record = GamePlayerRecord {
                    game_id,
                    player_id: id,
                    team: ti,
                    party_name: roster.party_names.get(&id).cloned(),
                    placement: out.placements[ti],
                    is_tie: mode.applies(Attribute::IsTie).then_some(out.is_tie),
                    is_mvp: id == out.mvp,
                    is_lvp: id == out.lvp,
                    ratings_before: *b,
                    ratings_after: state.snapshot(),
                    stats: out.stats[ti][pi].clone(),
                    created_at,
                };
                ledger.apply(&record)?;
                records.push(record);
            }
        }
        sink.record(game, records);
        Ok(())
    }

    /// Seed reference players at the baseline and spread the pool over
    /// stratified rating bands, with a slice of the pool in persistent
    /// parties.
    fn init_players(
        &self,
        mode: Mode,
        rng: &mut StdRng,
        elo: &EloEstimator,
        glicko: &GlickoEstimator,
        trueskill: &TrueSkillEstimator,
        ledger: &mut AggregationLedger,
    ) -> HashMap<PlayerId, PlayerRatingState> {
        use rand::Rng;
        let cfg = &self.config;
        let mut states = HashMap::new();

        for id in cfg.reference_ids() {
            states.insert(
                id,
                PlayerRatingState::new(cfg.baseline_rating, elo, glicko, trueskill),
            );
        }

        let first_pool = cfg
            .reference_ids()
            .last()
            .map(|&id| id + 1)
            .unwrap_or(1);
        let band_width = cfg.max_rating / POOL_BANDS as f64;
        for id in first_pool..=cfg.total_players {
            let band = (id - first_pool) % POOL_BANDS;
            let rating = (band as f64 * band_width
                + rng.gen_range(0.0..band_width))
            .clamp(50.0, cfg.max_rating);
            let mut state = PlayerRatingState::new(rating, elo, glicko, trueskill);

            let tier = cfg.tier_table.params(mode, rating);
            let prior_games = (tier.mean_prior_games
                + rng.gen_range(-1.0..1.0) * tier.sd_prior_games)
                .max(0.0)
                .round() as u32;
            state.games_played = prior_games;
            ledger.seed(id, prior_games, tier.mean_prior_win_rate, &tier, cfg.start_time);
            states.insert(id, state);
        }
        states
    }

    /// Stable party labels for the leading slice of the pool.
    fn pool_party_labels(&self) -> HashMap<PlayerId, String> {
        let cfg = &self.config;
        let first_pool = cfg
            .reference_ids()
            .last()
            .map(|&id| id + 1)
            .unwrap_or(1);
        let pool_size = cfg.total_players.saturating_sub(first_pool - 1);
        let partied = (pool_size as f64 * cfg.pool_party_fraction) as u32;

        let mut labels = HashMap::new();
        for offset in 0..partied {
            let id = first_pool + offset;
            let party = offset / POOL_PARTY_SIZE;
            labels.insert(id, format!("pool_party_{party}"));
        }
        labels
    }
}

fn tie_capable(mode: Mode) -> bool {
    matches!(
        mode,
        Mode::TeamDeathmatch | Mode::FreeForAll | Mode::Domination | Mode::SearchAndDestroy
    )
}
