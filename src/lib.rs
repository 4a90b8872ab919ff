//! Synthetic competitive-match telemetry with a known ground truth.
//!
//! Reference players follow scripted skill trajectories while a large pool of
//! organic players fills out their lobbies. Every game is resolved so that
//! its stat lines obey the mode's win conditions exactly, then folded through
//! three rating estimators (Elo, Glicko, and a TrueSkill-style Gaussian
//! model) that see only team composition and placements. The emitted records
//! carry both the hidden ground truth and each estimator's belief, so
//! estimator lag and recovery can be measured directly.
//!
//! ```no_run
//! use mmr_telemetry_sim::{Pipeline, SimulationConfig};
//!
//! let pipeline = Pipeline::new(SimulationConfig::default());
//! let runs = pipeline.run_all().expect("generation failed");
//! for run in &runs {
//!     println!("{:?}: {} games", run.mode, run.report.games_emitted);
//! }
//! ```

pub mod config;
pub mod error;
pub mod ledger;
pub mod pipeline;
pub mod rating;
pub mod roster;
pub mod scenario;
pub mod synth;
pub mod types;

pub use config::{ScenarioSpec, SimulationConfig, TierAnchors, TierParams, TierTable};
pub use error::SimError;
pub use ledger::AggregationLedger;
pub use pipeline::{GameSink, MemorySink, ModeReport, ModeRun, Pipeline};
pub use rating::{Belief, RatingAlgorithm};
pub use scenario::{Trajectory, TrajectoryLaw};
pub use synth::{GameOutcome, RequiredOutcome};
pub use types::{
    AggregateRecord, Attribute, Game, GamePlayerRecord, Mode, PlayerId, RatingSnapshot, Roster,
    StatLine,
};
