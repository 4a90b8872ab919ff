use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{EloParams, GlickoParams, TrueSkillParams};
use crate::types::RatingSnapshot;

/// An estimator's belief about one player: a point estimate plus how unsure
/// the estimator is about it. Elo carries no uncertainty and reports 0.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Belief {
    pub rating: f64,
    pub dispersion: f64,
}

/// Everything an estimator may see about a player before a game. Crucially
/// this excludes ground truth and the game's stat line.
#[derive(Clone, Copy, Debug)]
pub struct PreGame {
    pub belief: Belief,
    pub games_played: u32,
    pub idle_days: i64,
}

/// A rating estimator updating beliefs from team composition and final
/// placements only.
pub trait RatingAlgorithm {
    fn initial(&self) -> Belief;

    /// Update every player's belief given the game result. `teams[i]` holds
    /// the pre-game views for team `i`; `placements[i]` is that team's final
    /// placement (1 = winner, ties share a value). Output mirrors the input
    /// shape.
    fn update(&self, teams: &[Vec<PreGame>], placements: &[u32]) -> Vec<Vec<Belief>>;
}

fn team_mean_rating(team: &[PreGame]) -> f64 {
    if team.is_empty() {
        return 0.0;
    }
    team.iter().map(|p| p.belief.rating).sum::<f64>() / team.len() as f64
}

/// Actual score of team `a` against team `b` from placements.
fn pairwise_score(placements: &[u32], a: usize, b: usize) -> f64 {
    if placements[a] < placements[b] {
        1.0
    } else if placements[a] > placements[b] {
        0.0
    } else {
        0.5
    }
}

// ---------------------------------------------------------------------------
// Elo

pub struct EloEstimator {
    params: EloParams,
    initial_rating: f64,
}

impl EloEstimator {
    pub fn new(params: EloParams, initial_rating: f64) -> Self {
        Self {
            params,
            initial_rating,
        }
    }

    fn k_factor(&self, games_played: u32) -> f64 {
        let k = self.params.k_base / (1.0 + games_played as f64 / self.params.k_decay_games);
        k.max(self.params.k_min)
    }

    fn expected(rating: f64, opponent: f64) -> f64 {
        1.0 / (1.0 + 10f64.powf((opponent - rating) / 400.0))
    }
}

impl RatingAlgorithm for EloEstimator {
    fn initial(&self) -> Belief {
        Belief {
            rating: self.initial_rating,
            dispersion: 0.0,
        }
    }

    fn update(&self, teams: &[Vec<PreGame>], placements: &[u32]) -> Vec<Vec<Belief>> {
        let means: Vec<f64> = teams.iter().map(|t| team_mean_rating(t)).collect();
        teams
            .iter()
            .enumerate()
            .map(|(ti, team)| {
                team.iter()
                    .map(|player| {
                        // Average the per-opponent-team adjustment so multi-
                        // team modes stay on the same scale as 1v1.
                        let mut delta = 0.0;
                        let mut opponents = 0;
                        for (oi, &opp_mean) in means.iter().enumerate() {
                            if oi == ti {
                                continue;
                            }
                            let expected = Self::expected(player.belief.rating, opp_mean);
                            let actual = pairwise_score(placements, ti, oi);
                            delta += actual - expected;
                            opponents += 1;
                        }
                        if opponents > 0 {
                            delta /= opponents as f64;
                        }
                        let k = self.k_factor(player.games_played);
                        Belief {
                            rating: (player.belief.rating + k * delta).max(0.0),
                            dispersion: 0.0,
                        }
                    })
                    .collect()
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Glicko (original single-period formulation)

pub struct GlickoEstimator {
    params: GlickoParams,
    initial_rating: f64,
}

const GLICKO_Q: f64 = std::f64::consts::LN_10 / 400.0;

impl GlickoEstimator {
    pub fn new(params: GlickoParams, initial_rating: f64) -> Self {
        Self {
            params,
            initial_rating,
        }
    }

    fn clamp_rd(&self, rd: f64) -> f64 {
        rd.clamp(self.params.rd_min, self.params.rd_max)
    }

    /// Pre-period RD inflation for time away from the game.
    fn inflate(&self, rd: f64, idle_days: i64) -> f64 {
        let c2 = self.params.inflation_c * self.params.inflation_c;
        self.clamp_rd((rd * rd + c2 * idle_days.max(0) as f64).sqrt())
    }

    fn g(rd: f64) -> f64 {
        1.0 / (1.0 + 3.0 * GLICKO_Q * GLICKO_Q * rd * rd / (std::f64::consts::PI * std::f64::consts::PI))
            .sqrt()
    }

    fn expected(rating: f64, opp_rating: f64, opp_rd: f64) -> f64 {
        1.0 / (1.0 + 10f64.powf(-Self::g(opp_rd) * (rating - opp_rating) / 400.0))
    }
}

impl RatingAlgorithm for GlickoEstimator {
    fn initial(&self) -> Belief {
        Belief {
            rating: self.initial_rating,
            dispersion: self.params.rd_max,
        }
    }

    fn update(&self, teams: &[Vec<PreGame>], placements: &[u32]) -> Vec<Vec<Belief>> {
        // Opposing teams act as composite opponents at their mean rating and
        // mean (inflated) deviation.
        let means: Vec<f64> = teams.iter().map(|t| team_mean_rating(t)).collect();
        let mean_rds: Vec<f64> = teams
            .iter()
            .map(|t| {
                if t.is_empty() {
                    return self.params.rd_max;
                }
                t.iter()
                    .map(|p| self.inflate(p.belief.dispersion, p.idle_days))
                    .sum::<f64>()
                    / t.len() as f64
            })
            .collect();

        teams
            .iter()
            .enumerate()
            .map(|(ti, team)| {
                team.iter()
                    .map(|player| {
                        let rd = self.inflate(player.belief.dispersion, player.idle_days);
                        let rating = player.belief.rating;

                        let mut d2_inv = 0.0;
                        let mut score_sum = 0.0;
                        for oi in 0..teams.len() {
                            if oi == ti {
                                continue;
                            }
                            let g = Self::g(mean_rds[oi]);
                            let e = Self::expected(rating, means[oi], mean_rds[oi]);
                            d2_inv += GLICKO_Q * GLICKO_Q * g * g * e * (1.0 - e);
                            score_sum += g * (pairwise_score(placements, ti, oi) - e);
                        }
                        if d2_inv <= 0.0 {
                            return Belief {
                                rating,
                                dispersion: self.clamp_rd(rd),
                            };
                        }

                        let denom = 1.0 / (rd * rd) + d2_inv;
                        let new_rating = rating + GLICKO_Q / denom * score_sum;
                        let new_rd = self.clamp_rd((1.0 / denom).sqrt());
                        Belief {
                            rating: new_rating.max(0.0),
                            dispersion: new_rd,
                        }
                    })
                    .collect()
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// TrueSkill-style Gaussian estimator

pub struct TrueSkillEstimator {
    params: TrueSkillParams,
    initial_mu: f64,
}

impl TrueSkillEstimator {
    pub fn new(params: TrueSkillParams, initial_mu: f64) -> Self {
        Self { params, initial_mu }
    }

    fn clamp_sigma(&self, sigma: f64) -> f64 {
        sigma.clamp(self.params.sigma_min, self.params.sigma_max)
    }
}

fn erf_approx(x: f64) -> f64 {
    // Abramowitz & Stegun 7.1.26, max absolute error 1.5e-7.
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.3275911 * x);
    let poly = t
        * (0.254829592
            + t * (-0.284496736 + t * (1.421413741 + t * (-1.453152027 + t * 1.061405429))));
    sign * (1.0 - poly * (-x * x).exp())
}

fn normal_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf_approx(x / std::f64::consts::SQRT_2))
}

/// Additive correction for a win observation (mean), per Herbrich et al.
fn v_win(t: f64, eps: f64) -> f64 {
    let denom = normal_cdf(t - eps);
    if denom < 1e-12 {
        eps - t
    } else {
        normal_pdf(t - eps) / denom
    }
}

fn w_win(t: f64, eps: f64) -> f64 {
    let v = v_win(t, eps);
    v * (v + t - eps)
}

/// Additive correction for a draw observation.
fn v_draw(t: f64, eps: f64) -> f64 {
    let denom = normal_cdf(eps - t) - normal_cdf(-eps - t);
    if denom < 1e-12 {
        if t < 0.0 { -t - eps } else { -t + eps }
    } else {
        (normal_pdf(-eps - t) - normal_pdf(eps - t)) / denom
    }
}

fn w_draw(t: f64, eps: f64) -> f64 {
    let denom = normal_cdf(eps - t) - normal_cdf(-eps - t);
    if denom < 1e-12 {
        return 1.0;
    }
    let v = v_draw(t, eps);
    v * v + ((eps - t) * normal_pdf(eps - t) + (eps + t) * normal_pdf(eps + t)) / denom
}

impl RatingAlgorithm for TrueSkillEstimator {
    fn initial(&self) -> Belief {
        Belief {
            rating: self.initial_mu,
            dispersion: self.params.sigma_max,
        }
    }

    fn update(&self, teams: &[Vec<PreGame>], placements: &[u32]) -> Vec<Vec<Belief>> {
        let beta2 = self.params.beta * self.params.beta;
        let tau2 = self.params.tau * self.params.tau;

        // Team Gaussians after adding dynamics noise.
        let team_mu: Vec<f64> = teams
            .iter()
            .map(|t| t.iter().map(|p| p.belief.rating).sum::<f64>())
            .collect();
        let team_var: Vec<f64> = teams
            .iter()
            .map(|t| {
                t.iter()
                    .map(|p| p.belief.dispersion * p.belief.dispersion + tau2)
                    .sum::<f64>()
            })
            .collect();

        // Rank teams, then apply pairwise corrections between adjacent
        // finishers. Each team accumulates (mu_delta / sigma2, var_factor).
        let mut order: Vec<usize> = (0..teams.len()).collect();
        order.sort_by_key(|&i| (placements[i], i));

        let mut mu_adjust = vec![0.0; teams.len()];
        let mut var_scale = vec![1.0; teams.len()];
        let mut pair_counts = vec![0u32; teams.len()];

        for w in order.windows(2) {
            let (hi, lo) = (w[0], w[1]);
            // One beta^2 of performance noise per participant.
            let players = (teams[hi].len() + teams[lo].len()) as f64;
            let c2 = team_var[hi] + team_var[lo] + players * beta2;
            let c = c2.sqrt();
            let t = (team_mu[hi] - team_mu[lo]) / c;
            let eps = self.params.draw_margin;
            let drawn = placements[hi] == placements[lo];

            let (v, w_) = if drawn {
                (v_draw(t, eps), w_draw(t, eps))
            } else {
                (v_win(t, eps), w_win(t, eps))
            };

            mu_adjust[hi] += team_var[hi] / c * v;
            mu_adjust[lo] -= team_var[lo] / c * v;
            var_scale[hi] *= 1.0 - team_var[hi] / c2 * w_;
            var_scale[lo] *= 1.0 - team_var[lo] / c2 * w_;
            pair_counts[hi] += 1;
            pair_counts[lo] += 1;
        }

        teams
            .iter()
            .enumerate()
            .map(|(ti, team)| {
                let n = pair_counts[ti].max(1) as f64;
                let tv = team_var[ti].max(1e-9);
                team.iter()
                    .map(|player| {
                        let pv = player.belief.dispersion * player.belief.dispersion + tau2;
                        // Members share the team correction weighted by their
                        // own variance: uncertain players absorb more of it.
                        let mu = player.belief.rating + mu_adjust[ti] / n * (pv / tv);
                        let scale = var_scale[ti].powf(1.0 / n).clamp(0.05, 1.0);
                        let sigma = self.clamp_sigma((pv * scale).sqrt());
                        Belief {
                            rating: mu.max(0.0),
                            dispersion: sigma,
                        }
                    })
                    .collect()
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Ground-truth drift for pool players

/// Per-game ground-truth adjustment for an unscripted pool player.
///
/// `placement_term` and `stat_term` are both in [-1, 1]; the adjustment
/// shrinks with experience and is hard-capped at `max_delta`.
pub fn pool_truth_delta(
    base_performance: f64,
    max_delta: f64,
    placement_term: f64,
    stat_term: f64,
    games_played: u32,
) -> f64 {
    let perf = 0.6 * placement_term + 0.4 * stat_term;
    let experience = 0.3 + 1.0 / (1.0 + games_played as f64 / 200.0);
    (base_performance * perf * experience).clamp(-max_delta, max_delta)
}

// ---------------------------------------------------------------------------
// Per-player state

/// Everything tracked about one player's skill: the hidden ground truth plus
/// one belief per estimator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerRatingState {
    pub true_rating: f64,
    pub elo: Belief,
    pub glicko: Belief,
    pub trueskill: Belief,
    pub games_played: u32,
    pub last_played: Option<DateTime<Utc>>,
}

impl PlayerRatingState {
    pub fn new(
        true_rating: f64,
        elo: &EloEstimator,
        glicko: &GlickoEstimator,
        trueskill: &TrueSkillEstimator,
    ) -> Self {
        Self {
            true_rating,
            elo: elo.initial(),
            glicko: glicko.initial(),
            trueskill: trueskill.initial(),
            games_played: 0,
            last_played: None,
        }
    }

    pub fn idle_days(&self, now: DateTime<Utc>) -> i64 {
        self.last_played
            .map(|t| (now - t).num_days().max(0))
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> RatingSnapshot {
        RatingSnapshot {
            true_rating: self.true_rating,
            elo: self.elo.rating,
            glicko_rating: self.glicko.rating,
            glicko_rd: self.glicko.dispersion,
            ts_mu: self.trueskill.rating,
            ts_sigma: self.trueskill.dispersion,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pre(rating: f64, dispersion: f64, games: u32) -> PreGame {
        PreGame {
            belief: Belief { rating, dispersion },
            games_played: games,
            idle_days: 0,
        }
    }

    fn two_teams(a: f64, b: f64, disp: f64) -> Vec<Vec<PreGame>> {
        vec![
            vec![pre(a, disp, 100), pre(a, disp, 100)],
            vec![pre(b, disp, 100), pre(b, disp, 100)],
        ]
    }

    #[test]
    fn elo_winner_gains_loser_drops() {
        let elo = EloEstimator::new(EloParams::default(), 600.0);
        let out = elo.update(&two_teams(600.0, 600.0, 0.0), &[1, 2]);
        assert!(out[0][0].rating > 600.0);
        assert!(out[1][0].rating < 600.0);
        // Equal-strength zero-sum within float noise.
        let total: f64 = out.iter().flatten().map(|b| b.rating).sum();
        assert!((total - 2400.0).abs() < 1e-6);
    }

    #[test]
    fn elo_upset_moves_more_than_expected_result() {
        let elo = EloEstimator::new(EloParams::default(), 600.0);
        let upset = elo.update(&two_teams(500.0, 900.0, 0.0), &[1, 2]);
        let expected = elo.update(&two_teams(900.0, 500.0, 0.0), &[1, 2]);
        let upset_gain = upset[0][0].rating - 500.0;
        let favored_gain = expected[0][0].rating - 900.0;
        assert!(upset_gain > favored_gain);
    }

    #[test]
    fn elo_k_decays_with_games() {
        let elo = EloEstimator::new(EloParams::default(), 600.0);
        assert!(elo.k_factor(0) > elo.k_factor(1000));
        assert!(elo.k_factor(1_000_000) >= EloParams::default().k_min);
    }

    #[test]
    fn elo_rating_never_goes_negative() {
        let elo = EloEstimator::new(EloParams::default(), 600.0);
        let teams = two_teams(1.0, 2000.0, 0.0);
        let out = elo.update(&teams, &[2, 1]);
        assert!(out[0][0].rating >= 0.0);
    }

    #[test]
    fn glicko_rd_shrinks_after_game_and_stays_bounded() {
        let glicko = GlickoEstimator::new(GlickoParams::default(), 600.0);
        let out = glicko.update(&two_teams(600.0, 600.0, 350.0), &[1, 2]);
        for b in out.iter().flatten() {
            assert!(b.dispersion >= 50.0 && b.dispersion < 350.0);
        }
    }

    #[test]
    fn glicko_idle_inflation_raises_rd() {
        let glicko = GlickoEstimator::new(GlickoParams::default(), 600.0);
        assert!(glicko.inflate(100.0, 90) > 100.0);
        assert!(glicko.inflate(340.0, 10_000) <= 350.0);
    }

    #[test]
    fn glicko_uncertain_player_moves_more() {
        let glicko = GlickoEstimator::new(GlickoParams::default(), 600.0);
        let sharp = glicko.update(&two_teams(600.0, 600.0, 60.0), &[1, 2]);
        let fuzzy = glicko.update(&two_teams(600.0, 600.0, 300.0), &[1, 2]);
        assert!(fuzzy[0][0].rating - 600.0 > sharp[0][0].rating - 600.0);
    }

    #[test]
    fn trueskill_winner_mu_rises_sigma_shrinks() {
        let ts = TrueSkillEstimator::new(TrueSkillParams::default(), 600.0);
        let teams = two_teams(600.0, 600.0, 500.0);
        let out = ts.update(&teams, &[1, 2]);
        assert!(out[0][0].rating > 600.0);
        assert!(out[1][0].rating < 600.0);
        assert!(out[0][0].dispersion < 500.0);
    }

    #[test]
    fn trueskill_handles_multiteam_placements() {
        let ts = TrueSkillEstimator::new(TrueSkillParams::default(), 600.0);
        let teams: Vec<Vec<PreGame>> =
            (0..4).map(|_| vec![pre(600.0, 400.0, 10)]).collect();
        let out = ts.update(&teams, &[1, 2, 3, 4]);
        // First place ends above last place.
        assert!(out[0][0].rating > out[3][0].rating);
        for b in out.iter().flatten() {
            assert!(b.dispersion >= TrueSkillParams::default().sigma_min);
        }
    }

    #[test]
    fn trueskill_draw_pulls_ratings_together() {
        let ts = TrueSkillEstimator::new(TrueSkillParams::default(), 600.0);
        let out = ts.update(&two_teams(800.0, 400.0, 400.0), &[1, 1]);
        assert!(out[0][0].rating < 800.0);
        assert!(out[1][0].rating > 400.0);
    }

    #[test]
    fn trueskill_performance_noise_scales_with_participants() {
        let ts = TrueSkillEstimator::new(TrueSkillParams::default(), 600.0);
        let pairs = ts.update(&two_teams(600.0, 600.0, 0.0), &[1, 2]);
        let squads: Vec<Vec<PreGame>> = (0..2)
            .map(|_| (0..6).map(|_| pre(600.0, 0.0, 100)).collect())
            .collect();
        let big = ts.update(&squads, &[1, 2]);
        let pair_gain = pairs[0][0].rating - 600.0;
        let squad_gain = big[0][0].rating - 600.0;
        assert!(squad_gain > 0.0);
        // Twelve participants inject three times the noise of four, damping
        // the per-player move.
        assert!(squad_gain < pair_gain * 0.8);
    }

    #[test]
    fn erf_matches_known_values() {
        assert!((erf_approx(0.0)).abs() < 1e-7);
        assert!((erf_approx(1.0) - 0.8427007).abs() < 1e-5);
        assert!((erf_approx(-1.0) + 0.8427007).abs() < 1e-5);
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-7);
    }

    #[test]
    fn pool_delta_is_capped_and_decays() {
        let big = pool_truth_delta(20.0, 40.0, 1.0, 1.0, 0);
        assert!(big <= 40.0 && big > 0.0);
        let young = pool_truth_delta(20.0, 40.0, 0.5, 0.5, 0);
        let veteran = pool_truth_delta(20.0, 40.0, 0.5, 0.5, 2000);
        assert!(young > veteran);
        assert!(pool_truth_delta(20.0, 40.0, -1.0, -1.0, 0) >= -40.0);
    }

    #[test]
    fn snapshot_reflects_all_estimators() {
        let elo = EloEstimator::new(EloParams::default(), 600.0);
        let glicko = GlickoEstimator::new(GlickoParams::default(), 600.0);
        let ts = TrueSkillEstimator::new(TrueSkillParams::default(), 600.0);
        let state = PlayerRatingState::new(750.0, &elo, &glicko, &ts);
        let snap = state.snapshot();
        assert_eq!(snap.true_rating, 750.0);
        assert_eq!(snap.elo, 600.0);
        assert_eq!(snap.glicko_rd, 350.0);
        assert_eq!(snap.ts_sigma, 500.0);
    }
}
