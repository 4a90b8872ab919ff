use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Player identifier. Reference entities occupy the low ids, pool entities
/// the rest.
pub type PlayerId = u32;

/// Game modes the simulation can generate telemetry for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    TeamDeathmatch,
    FreeForAll,
    Domination,
    BattleRoyale1v99,
    BattleRoyale4v96,
    SearchAndDestroy,
}

/// Per-game attributes whose applicability varies across modes. Attributes
/// not listed here (kills, deaths, damage, accuracy, ...) apply everywhere.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Attribute {
    PartyName,
    Assists,
    ContestingKills,
    ObjectiveTime,
    DominationPoints,
    RoundsWonLost,
    IsTie,
}

impl Mode {
    pub const ALL: [Mode; 6] = [
        Mode::TeamDeathmatch,
        Mode::FreeForAll,
        Mode::Domination,
        Mode::BattleRoyale1v99,
        Mode::BattleRoyale4v96,
        Mode::SearchAndDestroy,
    ];

    pub fn team_count(&self) -> usize {
        match self {
            Mode::TeamDeathmatch => 2,
            Mode::FreeForAll => 12,
            Mode::Domination => 2,
            Mode::BattleRoyale1v99 => 100,
            Mode::BattleRoyale4v96 => 25,
            Mode::SearchAndDestroy => 2,
        }
    }

    pub fn team_size(&self) -> usize {
        match self {
            Mode::TeamDeathmatch => 6,
            Mode::FreeForAll => 1,
            Mode::Domination => 6,
            Mode::BattleRoyale1v99 => 1,
            Mode::BattleRoyale4v96 => 4,
            Mode::SearchAndDestroy => 5,
        }
    }

    pub fn roster_size(&self) -> usize {
        self.team_count() * self.team_size()
    }

    /// Kill count ending the game, where the mode has one. For battle royale
    /// modes this is the total elimination count (roster minus survivors).
    pub fn kill_cap(&self) -> Option<u32> {
        match self {
            Mode::TeamDeathmatch => Some(50),
            Mode::FreeForAll => Some(50),
            Mode::BattleRoyale1v99 => Some(99),
            Mode::BattleRoyale4v96 => Some(96),
            _ => None,
        }
    }

    /// Objective score ending the game (Domination only).
    pub fn point_limit(&self) -> Option<u32> {
        match self {
            Mode::Domination => Some(200),
            _ => None,
        }
    }

    /// Round wins needed to take the game (Search and Destroy only).
    pub fn round_win_limit(&self) -> Option<u32> {
        match self {
            Mode::SearchAndDestroy => Some(16),
            _ => None,
        }
    }

    /// Mean match duration in seconds.
    pub fn duration_mean_secs(&self) -> u32 {
        match self {
            Mode::TeamDeathmatch => 600,
            Mode::FreeForAll => 600,
            Mode::Domination => 1020,
            Mode::BattleRoyale1v99 => 1200,
            Mode::BattleRoyale4v96 => 1380,
            Mode::SearchAndDestroy => 1920,
        }
    }

    /// Standard deviation of match duration in seconds.
    pub fn duration_sd_secs(&self) -> u32 {
        match self {
            Mode::TeamDeathmatch => 120,
            Mode::FreeForAll => 120,
            Mode::Domination => 180,
            Mode::BattleRoyale1v99 => 180,
            Mode::BattleRoyale4v96 => 240,
            Mode::SearchAndDestroy => 240,
        }
    }

    /// Largest party that can share a team in this mode, or `None` where
    /// parties do not exist (solo-only modes).
    pub fn party_slot(&self) -> Option<usize> {
        match self {
            Mode::TeamDeathmatch => Some(6),
            Mode::Domination => Some(6),
            Mode::BattleRoyale4v96 => Some(4),
            Mode::SearchAndDestroy => Some(5),
            Mode::FreeForAll | Mode::BattleRoyale1v99 => None,
        }
    }

    /// Explicit mode-to-attribute applicability table. Attributes that do
    /// not apply are omitted from records entirely, never zero-filled.
    pub fn applies(&self, attr: Attribute) -> bool {
        match attr {
            Attribute::PartyName | Attribute::Assists => self.party_slot().is_some(),
            Attribute::ContestingKills
            | Attribute::ObjectiveTime
            | Attribute::DominationPoints => *self == Mode::Domination,
            Attribute::RoundsWonLost => *self == Mode::SearchAndDestroy,
            // FFA carries the flag but only for a shared first place.
            Attribute::IsTie => *self != Mode::BattleRoyale1v99,
        }
    }
}

/// Rating values across all tracked algorithms, captured before and after
/// each game.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct RatingSnapshot {
    pub true_rating: f64,
    pub elo: f64,
    pub glicko_rating: f64,
    pub glicko_rd: f64,
    pub ts_mu: f64,
    pub ts_sigma: f64,
}

/// Full per-game attribute set for one participant. Fields that vary by mode
/// are `Option` and populated only when the mode's applicability table says
/// so.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StatLine {
    pub kills: u32,
    pub deaths: u32,
    pub assists: Option<u32>,

    pub damage_dealt: u32,
    pub damage_taken: u32,
    pub damage_missed: u32,
    pub headshot_damage_dealt: u32,
    pub torso_damage_dealt: u32,
    pub leg_damage_dealt: u32,

    pub accuracy: f64,
    pub headshot_accuracy: f64,
    pub torso_accuracy: f64,
    pub leg_accuracy: f64,

    pub killstreak: u32,
    pub longest_time_alive: u32,

    pub kills_per_minute: f64,
    pub deaths_per_minute: f64,
    pub assists_per_minute: Option<f64>,
    pub damage_dealt_per_minute: f64,
    pub damage_taken_per_minute: f64,

    pub kill_death_ratio: f64,
    pub damage_dealt_and_taken_ratio: f64,

    pub contesting_kills: Option<u32>,
    pub objective_time: Option<u32>,
    pub domination_points: Option<u32>,
    pub rounds_won: Option<u32>,
    pub rounds_lost: Option<u32>,
}

/// One simulated match.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Game {
    /// Monotone per-mode sequence number; also the ledger's replay guard.
    pub id: u64,
    pub mode: Mode,
    pub created_at: DateTime<Utc>,
    /// Realized match duration in seconds.
    pub playtime_secs: u32,
    pub team_count: usize,
    pub team_size: usize,
    /// Full roster, one id list per team.
    pub teams: Vec<Vec<PlayerId>>,
    /// Final placement per team, 1-based, ties sharing a value.
    pub placements: Vec<u32>,
    /// `None` where the mode has no tie concept (BR 1v99).
    pub is_tie: Option<bool>,
}

/// One participant's immutable per-game snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GamePlayerRecord {
    pub game_id: u64,
    pub player_id: PlayerId,
    /// Team index within the game, 0-based.
    pub team: usize,
    pub party_name: Option<String>,
    /// Final placement of the participant's team (or the participant, in
    /// solo modes), 1-based.
    pub placement: u32,
    /// `None` where the mode has no tie concept (BR 1v99).
    pub is_tie: Option<bool>,
    pub is_mvp: bool,
    pub is_lvp: bool,
    pub ratings_before: RatingSnapshot,
    pub ratings_after: RatingSnapshot,
    pub stats: StatLine,
    pub created_at: DateTime<Utc>,
}

/// Per (player, mode) running aggregates, folded from that player's
/// `GamePlayerRecord`s in game order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub games_played: u32,
    pub wins: u32,
    pub losses: u32,
    pub ties: u32,
    /// Current consecutive-win streak; reset on loss and on applicable tie.
    pub win_streak: u32,
    pub best_killstreak: u32,

    pub total_kills: u64,
    pub total_deaths: u64,
    pub total_assists: u64,
    pub total_damage_dealt: u64,
    pub total_damage_taken: u64,

    // Incrementally-maintained means, never recomputed from scratch.
    pub avg_kills: f64,
    pub avg_deaths: f64,
    pub avg_assists: f64,
    pub avg_damage_dealt: f64,
    pub avg_accuracy: f64,
    pub avg_longest_time_alive: f64,
    pub avg_objective_time: f64,

    pub last_played: DateTime<Utc>,
    /// Highest game id folded so far; a record with a lower or equal id is a
    /// replay and rejected.
    pub last_applied_game: Option<u64>,
}

impl AggregateRecord {
    pub fn empty(at: DateTime<Utc>) -> Self {
        Self {
            games_played: 0,
            wins: 0,
            losses: 0,
            ties: 0,
            win_streak: 0,
            best_killstreak: 0,
            total_kills: 0,
            total_deaths: 0,
            total_assists: 0,
            total_damage_dealt: 0,
            total_damage_taken: 0,
            avg_kills: 0.0,
            avg_deaths: 0.0,
            avg_assists: 0.0,
            avg_damage_dealt: 0.0,
            avg_accuracy: 0.0,
            avg_longest_time_alive: 0.0,
            avg_objective_time: 0.0,
            last_played: at,
            last_applied_game: None,
        }
    }

    pub fn win_loss_ratio(&self) -> f64 {
        if self.losses > 0 {
            self.wins as f64 / self.losses as f64
        } else {
            self.wins as f64
        }
    }

    pub fn kill_death_ratio(&self) -> f64 {
        if self.total_deaths > 0 {
            self.total_kills as f64 / self.total_deaths as f64
        } else {
            self.total_kills as f64
        }
    }
}

/// A fully assembled game roster: the reference entity's members always sit
/// on team 0.
#[derive(Clone, Debug)]
pub struct Roster {
    pub mode: Mode,
    pub teams: Vec<Vec<PlayerId>>,
    /// Party label per participant, only for participants that carry one in
    /// this mode.
    pub party_names: std::collections::HashMap<PlayerId, String>,
}

impl Roster {
    pub fn player_count(&self) -> usize {
        self.teams.iter().map(|t| t.len()).sum()
    }

    pub fn team_of(&self, player: PlayerId) -> Option<usize> {
        self.teams.iter().position(|t| t.contains(&player))
    }

    pub fn players(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.teams.iter().flatten().copied()
    }
}
