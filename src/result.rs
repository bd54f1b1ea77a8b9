//! Structured outcome of a finished match.
//!
//! The game writes `logs/scores.json` into the match directory, one entry per player:
//!
//! ```json
//! {
//!     "Alpha Bot": { "is_winner": true,  "is_crashed": false, "race": "Protoss" },
//!     "beta":      { "is_winner": false, "is_crashed": false, "race": "Zerg" }
//! }
//! ```
//!
//! A winner is only reported for a two-player match whose score file names exactly one
//! winner. A missing or malformed score file is logged and leaves the outcome empty; the
//! crash and realtime flags still come from the exit codes.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{debug, error, info, instrument, warn};
use walkdir::WalkDir;

use crate::{
    configuration::MatchConfig,
    error::ArenaError,
    monitor::{TerminalState, Termination},
    player::{Player, Race},
    sandbox_spec::scratch_dir,
};

pub const SCORES_FILE: &str = "scores.json";
pub const RESULT_FILE: &str = "result.json";

/// Why no winner could be read from the score file.
#[derive(Error, Debug)]
pub enum ResultParseError {
    #[error("score file {0:?} not found")]
    Missing(PathBuf),

    #[error("could not read score file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed score file {path:?}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("results are only available for 1v1 games, this one had {0} players")]
    NotOneVersusOne(usize),

    #[error("player '{0}' has no entry in the score file")]
    UnknownPlayer(String),

    #[error("expected a single winner, found {0}")]
    NoSingleWinner(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlayerScore {
    pub is_winner: bool,
    #[serde(default)]
    pub is_crashed: bool,
    pub race: Race,
}

/// Winner and loser of a valid 1v1 match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub winner_name: String,
    pub loser_name: String,
    pub winner_race: Race,
    pub loser_race: Race,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub match_name: String,
    pub elapsed: Duration,
    pub crashed: bool,
    pub realtime_timed_out: bool,
    pub outcome: Option<Outcome>,
    pub log_files: Vec<PathBuf>,
    pub frame_files: Vec<PathBuf>,
    pub score_files: Vec<PathBuf>,
    pub crash_files: Vec<PathBuf>,
}

impl MatchResult {
    /// True when the invoking process should exit with a failure code.
    pub fn is_failure(&self) -> bool {
        self.crashed || self.realtime_timed_out
    }
}

/// Parse a score file, keyed by player name.
pub fn read_scores(path: &Path) -> Result<HashMap<String, PlayerScore>, ResultParseError> {
    let content = fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ResultParseError::Missing(path.to_path_buf())
        } else {
            ResultParseError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    serde_json::from_str(&content).map_err(|source| ResultParseError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

/// Winner and loser among `players`, if the scores designate exactly one winner.
pub fn decide_outcome(
    players: &[Player],
    scores: &HashMap<String, PlayerScore>,
) -> Result<Outcome, ResultParseError> {
    let [first, second] = players else {
        return Err(ResultParseError::NotOneVersusOne(players.len()));
    };
    let score_of = |player: &Player| {
        scores
            .get(player.name())
            .ok_or_else(|| ResultParseError::UnknownPlayer(player.name().to_string()))
    };
    let (a, b) = (score_of(first)?, score_of(second)?);

    let ((winner, winner_score), (loser, loser_score)) = match (a.is_winner, b.is_winner) {
        (true, false) => ((first, a), (second, b)),
        (false, true) => ((second, b), (first, a)),
        (true, true) => return Err(ResultParseError::NoSingleWinner(2)),
        (false, false) => return Err(ResultParseError::NoSingleWinner(0)),
    };
    Ok(Outcome {
        winner_name: winner.name().to_string(),
        loser_name: loser.name().to_string(),
        winner_race: winner_score.race,
        loser_race: loser_score.race,
    })
}

/// Build the result of a match that has been torn down.
///
/// Copies the bots' scratch directories back when the configuration asks for it; a failed
/// copy is logged and does not prevent the result.
#[instrument(skip_all, fields(match_name = %config.match_name()))]
pub fn extract(
    config: &MatchConfig,
    players: &[Player],
    termination: &Termination,
    elapsed: Duration,
) -> MatchResult {
    if config.copy_back_on_finish {
        if let Err(e) = copy_back(config, players) {
            error!("could not copy bot files back: {e}");
        }
    }

    let log_dir = config.log_dir();
    let scores = read_scores(&log_dir.join(SCORES_FILE));
    let score_crash = scores
        .as_ref()
        .map(|s| s.values().any(|p| p.is_crashed))
        .unwrap_or(false);

    let outcome = scores.and_then(|scores| decide_outcome(players, &scores));
    let outcome = match outcome {
        Ok(outcome) => {
            info!(
                "{} ({}) won against {} ({})",
                outcome.winner_name, outcome.winner_race, outcome.loser_name, outcome.loser_race
            );
            Some(outcome)
        }
        Err(ResultParseError::NotOneVersusOne(count)) => {
            debug!(count, "no winner for a non 1v1 game");
            None
        }
        Err(e) => {
            warn!("could not determine the winner: {e}");
            None
        }
    };

    let log_files = files_in(&log_dir, |name| name.ends_with(".log"));
    let frame_files = files_in(&log_dir, |name| name.ends_with(".csv"));
    let score_files = files_in(&log_dir, |name| name.ends_with(SCORES_FILE));
    let crash_files = files_in(&config.crash_dir(), |_| true);

    MatchResult {
        match_name: config.match_name().to_string(),
        elapsed,
        crashed: termination.state == TerminalState::Crashed || score_crash,
        realtime_timed_out: termination.state == TerminalState::RealtimeTimedOut,
        outcome,
        log_files,
        frame_files,
        score_files,
        crash_files,
    }
}

fn files_in(dir: &Path, keep: impl Fn(&str) -> bool) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.file_name().to_str().is_some_and(&keep))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// Copy every bot's scratch directory into its persistent read directory, one bot at a time.
///
/// Must only run once the instances are removed.
pub fn copy_back(config: &MatchConfig, players: &[Player]) -> Result<(), ArenaError> {
    for player in players {
        let Some(bot) = player.as_bot() else {
            continue;
        };
        let source = scratch_dir(config, player);
        if !source.is_dir() {
            debug!(?source, "no scratch directory to copy back");
            continue;
        }
        info!("overwriting bot files for {player}");
        copy_tree(&source, &bot.read_directory)?;
    }
    Ok(())
}

fn copy_tree(source: &Path, destination: &Path) -> Result<(), ArenaError> {
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(source).to_path_buf();
            ArenaError::filesystem(path, e.into())
        })?;
        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| ArenaError::filesystem(&target, e))?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| ArenaError::filesystem(&target, e))?;
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct ResultRecord<'a> {
    #[serde(flatten)]
    config: &'a MatchConfig,
    players: Vec<&'a str>,
    is_crashed: bool,
    is_realtime_outed: bool,
    game_time: f64,
    finished_at: String,
    winner: Option<&'a str>,
    loser: Option<&'a str>,
    winner_race: Option<Race>,
    loser_race: Option<Race>,
}

/// Write `result.json` into the match directory and return its path.
pub fn write_result_json(
    result: &MatchResult,
    config: &MatchConfig,
    players: &[Player],
) -> Result<PathBuf, ArenaError> {
    let outcome = result.outcome.as_ref();
    let record = ResultRecord {
        config,
        players: players.iter().map(Player::name).collect(),
        is_crashed: result.crashed,
        is_realtime_outed: result.realtime_timed_out,
        game_time: result.elapsed.as_secs_f64(),
        finished_at: OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default(),
        winner: outcome.map(|o| o.winner_name.as_str()),
        loser: outcome.map(|o| o.loser_name.as_str()),
        winner_race: outcome.map(|o| o.winner_race),
        loser_race: outcome.map(|o| o.loser_race),
    };

    let path = config.match_dir().join(RESULT_FILE);
    let json = serde_json::to_string_pretty(&record)
        .map_err(|e| ArenaError::filesystem(&path, e.into()))?;
    fs::write(&path, json).map_err(|e| ArenaError::filesystem(&path, e))?;
    debug!(?path, "result written");
    Ok(path)
}
