use thiserror::Error;

use crate::types::Mode;

/// Crate-level error type.
///
/// `RosterBuildFailure` and `AttributeConstraintConflict` are recoverable per
/// game (log and skip); the other variants indicate configuration or caller
/// bugs and abort the run.
#[derive(Debug, Error)]
pub enum SimError {
    /// The pool could not fill a roster even after maximal window relaxation.
    #[error("roster build failed for {mode:?}: needed {needed} opponents, found {found} after {widenings} window widenings")]
    RosterBuildFailure {
        mode: Mode,
        needed: usize,
        found: usize,
        widenings: u32,
    },

    /// No attribute assignment can satisfy all mode invariants at once.
    #[error("attribute constraint conflict in {mode:?}: {reason}")]
    AttributeConstraintConflict { mode: Mode, reason: String },

    /// Trajectory segment lengths do not sum to the declared game count.
    #[error("trajectory config error: segments cover {covered} games but {declared} were declared")]
    TrajectoryConfigError { covered: u32, declared: u32 },

    /// A game player record was applied to the ledger more than once.
    #[error("ledger replay: game {game_id} already folded for player {player_id}")]
    LedgerReplayError { game_id: u64, player_id: u32 },
}
