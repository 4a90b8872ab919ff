use serde::{Deserialize, Serialize};

use crate::error::SimError;

/// Scripted ground-truth shapes for reference entities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrajectoryLaw {
    /// Linear climb over the first half, symmetric decline over the second.
    RiseFall,
    /// Linear climb over the first half, then hold at the peak.
    RisePlateau,
    /// Climb a quarter, hold a quarter, go dormant for a month, hold the rest.
    RisePlateauPausePlateau,
    /// Climb a quarter, crash to a fraction of the baseline, then grind back
    /// past the old peak.
    SmurfDip,
}

/// Which way the script is pushing the entity for a given game. Outcome
/// forcing and stat biasing both key off this.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Rising,
    Falling,
    Plateau,
}

/// One linear piece of a trajectory: `games` steps moving the ground truth
/// from `start` to `end`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Segment {
    pub games: u32,
    pub start: f64,
    pub end: f64,
}

impl Segment {
    fn phase(&self) -> Phase {
        let slope = self.end - self.start;
        if slope > f64::EPSILON {
            Phase::Rising
        } else if slope < -f64::EPSILON {
            Phase::Falling
        } else {
            Phase::Plateau
        }
    }
}

/// A dormancy pause inserted before a given game index.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Pause {
    pub before_game: u32,
    pub gap_days: i64,
}

/// Fully-expanded trajectory for one reference entity: piecewise-linear
/// ground truth over a fixed game count, plus optional dormancy pauses.
#[derive(Clone, Debug)]
pub struct Trajectory {
    segments: Vec<Segment>,
    pauses: Vec<Pause>,
    total_games: u32,
}

impl Trajectory {
    /// Build the segment script for `law` over `total_games` games starting
    /// from `baseline` with peak `baseline + amplitude`.
    pub fn build(
        law: TrajectoryLaw,
        total_games: u32,
        baseline: f64,
        amplitude: f64,
        pause_gap_days: i64,
    ) -> Result<Self, SimError> {
        let peak = baseline + amplitude;
        let half = total_games / 2;
        let quarter = total_games / 4;

        let (segments, pauses) = match law {
            TrajectoryLaw::RiseFall => (
                vec![
                    Segment { games: half, start: baseline, end: peak },
                    Segment { games: total_games - half, start: peak, end: baseline },
                ],
                vec![],
            ),
            TrajectoryLaw::RisePlateau => (
                vec![
                    Segment { games: half, start: baseline, end: peak },
                    Segment { games: total_games - half, start: peak, end: peak },
                ],
                vec![],
            ),
            TrajectoryLaw::RisePlateauPausePlateau => (
                vec![
                    Segment { games: quarter, start: baseline, end: peak },
                    Segment { games: quarter, start: peak, end: peak },
                    Segment {
                        games: total_games - 2 * quarter,
                        start: peak,
                        end: peak,
                    },
                ],
                vec![Pause {
                    before_game: 2 * quarter,
                    gap_days: pause_gap_days,
                }],
            ),
            TrajectoryLaw::SmurfDip => {
                let floor = baseline * 0.25;
                let second_peak = baseline + amplitude * 1.25;
                (
                    vec![
                        Segment { games: quarter, start: baseline, end: peak },
                        Segment { games: quarter, start: peak, end: floor },
                        Segment {
                            games: total_games - 2 * quarter,
                            start: floor,
                            end: second_peak,
                        },
                    ],
                    vec![],
                )
            }
        };

        Self::from_segments(segments, pauses, total_games)
    }

    /// Assemble a trajectory from explicit segments, validating coverage.
    pub fn from_segments(
        segments: Vec<Segment>,
        pauses: Vec<Pause>,
        total_games: u32,
    ) -> Result<Self, SimError> {
        let covered: u32 = segments.iter().map(|s| s.games).sum();
        if covered != total_games {
            return Err(SimError::TrajectoryConfigError {
                covered,
                declared: total_games,
            });
        }
        Ok(Self {
            segments,
            pauses,
            total_games,
        })
    }

    pub fn total_games(&self) -> u32 {
        self.total_games
    }

    fn locate(&self, game_index: u32) -> Option<(&Segment, u32)> {
        let mut offset = 0;
        for segment in &self.segments {
            if game_index < offset + segment.games {
                return Some((segment, game_index - offset));
            }
            offset += segment.games;
        }
        None
    }

    /// Scripted ground-truth rating entering game `game_index` (0-based).
    /// Past the end the trajectory holds its final value.
    pub fn target(&self, game_index: u32) -> f64 {
        match self.locate(game_index) {
            Some((segment, local)) => {
                if segment.games <= 1 {
                    segment.start
                } else {
                    let t = local as f64 / (segment.games - 1) as f64;
                    segment.start + (segment.end - segment.start) * t
                }
            }
            None => self
                .segments
                .last()
                .map(|s| s.end)
                .unwrap_or(0.0),
        }
    }

    /// Direction the script pushes during game `game_index`.
    pub fn phase(&self, game_index: u32) -> Phase {
        match self.locate(game_index) {
            Some((segment, _)) => segment.phase(),
            None => Phase::Plateau,
        }
    }

    /// Dormancy gap to insert before game `game_index`, if any.
    pub fn pause_before(&self, game_index: u32) -> Option<i64> {
        self.pauses
            .iter()
            .find(|p| p.before_game == game_index)
            .map(|p| p.gap_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: f64 = 600.0;
    const AMP: f64 = 900.0;

    fn build(law: TrajectoryLaw, games: u32) -> Trajectory {
        Trajectory::build(law, games, BASE, AMP, 30).unwrap()
    }

    #[test]
    fn rise_fall_is_symmetric() {
        let t = build(TrajectoryLaw::RiseFall, 400);
        assert!((t.target(0) - BASE).abs() < 1e-9);
        assert!((t.target(199) - (BASE + AMP)).abs() < 1e-9);
        assert!((t.target(399) - BASE).abs() < 1e-9);
        assert_eq!(t.phase(50), Phase::Rising);
        assert_eq!(t.phase(300), Phase::Falling);
    }

    #[test]
    fn rise_plateau_holds_peak() {
        let t = build(TrajectoryLaw::RisePlateau, 400);
        assert!((t.target(250) - (BASE + AMP)).abs() < 1e-9);
        assert!((t.target(399) - (BASE + AMP)).abs() < 1e-9);
        assert_eq!(t.phase(250), Phase::Plateau);
    }

    #[test]
    fn pause_law_inserts_single_dormancy_gap() {
        let t = build(TrajectoryLaw::RisePlateauPausePlateau, 400);
        assert_eq!(t.pause_before(200), Some(30));
        assert_eq!(t.pause_before(100), None);
        // Rating is unchanged across the pause.
        assert!((t.target(199) - t.target(200)).abs() < 1e-9);
    }

    #[test]
    fn smurf_dip_crashes_then_overshoots() {
        let t = build(TrajectoryLaw::SmurfDip, 400);
        assert!((t.target(199) - BASE * 0.25).abs() < 1e-9);
        assert!((t.target(399) - (BASE + AMP * 1.25)).abs() < 1e-9);
        assert_eq!(t.phase(150), Phase::Falling);
        assert_eq!(t.phase(300), Phase::Rising);
    }

    #[test]
    fn rising_segment_is_strictly_monotonic_then_exactly_constant() {
        let t = build(TrajectoryLaw::RisePlateau, 5000);
        for i in 1..2500 {
            assert!(t.target(i) > t.target(i - 1), "not increasing at {i}");
        }
        // Continuous across the boundary, then flat to the bit.
        assert_eq!(t.target(2499).to_bits(), t.target(2500).to_bits());
        for i in 2501..5000 {
            assert_eq!(t.target(i).to_bits(), t.target(2500).to_bits());
        }
    }

    #[test]
    fn segment_coverage_mismatch_is_rejected() {
        let err = Trajectory::from_segments(
            vec![Segment { games: 10, start: 0.0, end: 1.0 }],
            vec![],
            20,
        )
        .unwrap_err();
        match err {
            SimError::TrajectoryConfigError { covered, declared } => {
                assert_eq!(covered, 10);
                assert_eq!(declared, 20);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn target_holds_final_value_past_end() {
        let t = build(TrajectoryLaw::RisePlateau, 100);
        assert!((t.target(500) - (BASE + AMP)).abs() < 1e-9);
    }
}
