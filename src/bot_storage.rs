//! Bot catalog: finds bots on disk and turns them into [`Player`]s.
//!
//! A bot lives in its own directory under the bots directory:
//!
//! ```text
//! <bots>/<name>/
//!     bot.json    description, see below
//!     AI/         payload, mounted read-only
//!     read/       persistent data, updated from the match scratch directory on request
//! ```
//!
//! `bot.json` uses the camel-cased keys of the SSCAIT bot descriptions:
//! `name`, `race`, `botType`, and optionally `botFile`, `bwapiVersion`, `javaDebugPort`,
//! `javaOpts`, `port`.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use anyhow::{bail, Context};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::player::{BotMetadata, BotPlayer, Player, Race};

pub const BOT_JSON: &str = "bot.json";
pub const DEFAULT_BWAPI_VERSION: &str = "4.1.2";

static BOT_SPEC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([a-z0-9_][a-z0-9_. -]{0,40})(?::(t|p|z|r|terran|protoss|zerg|random))?$")
        .expect("bot spec pattern is valid")
});

/// Kind of executable the bot ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BotType {
    AiModule,
    Exe,
    JavaMirror,
    JavaJni,
}

impl BotType {
    pub fn extension(&self) -> &'static str {
        match self {
            BotType::AiModule => "dll",
            BotType::Exe => "exe",
            BotType::JavaMirror | BotType::JavaJni => "jar",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPort {
    Number(u16),
    Text(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BotJson {
    name: String,
    race: Race,
    bot_type: BotType,
    bot_file: Option<String>,
    bwapi_version: Option<String>,
    java_debug_port: Option<u16>,
    java_opts: Option<String>,
    port: Option<RawPort>,
}

/// Somewhere bots can be looked up by name.
pub trait BotStorage {
    /// `Ok(None)` if this storage does not know the bot.
    fn find_bot(&self, name: &str) -> anyhow::Result<Option<BotPlayer>>;
}

/// Bots stored in a local directory.
#[derive(Debug, Clone)]
pub struct LocalBotStorage {
    bot_dir: PathBuf,
}

impl LocalBotStorage {
    pub fn new(bot_dir: impl Into<PathBuf>) -> Self {
        LocalBotStorage {
            bot_dir: bot_dir.into(),
        }
    }
}

impl BotStorage for LocalBotStorage {
    #[instrument(skip(self))]
    fn find_bot(&self, name: &str) -> anyhow::Result<Option<BotPlayer>> {
        let dir = self.bot_dir.join(name);
        debug!("checking bot in {dir:?}");
        if !dir.is_dir() {
            return Ok(None);
        }
        debug!("found bot in {dir:?}");
        load_bot(&dir).map(Some)
    }
}

fn load_bot(dir: &Path) -> anyhow::Result<BotPlayer> {
    let json_path = dir.join(BOT_JSON);
    let content = fs::read_to_string(&json_path)
        .with_context(|| format!("could not read {json_path:?}"))?;
    let json: BotJson = serde_json::from_str(&content)
        .with_context(|| format!("invalid bot description {json_path:?}"))?;

    let ai_dir = dir.join("AI");
    if !ai_dir.is_dir() {
        bail!("bot directory {dir:?} has no AI/ directory");
    }
    let base_filename = match json.bot_file {
        Some(file) => file,
        None => find_bot_file(&ai_dir, json.bot_type)
            .unwrap_or_else(|| format!("{}.{}", json.name, json.bot_type.extension())),
    };

    let read_directory = dir.join("read");
    fs::create_dir_all(&read_directory)
        .with_context(|| format!("could not create {read_directory:?}"))?;

    Ok(BotPlayer {
        name: json.name,
        race: json.race,
        bot_directory: ai_dir,
        base_filename,
        bwapi_version: json
            .bwapi_version
            .unwrap_or_else(|| DEFAULT_BWAPI_VERSION.to_string()),
        metadata: BotMetadata {
            java_debug_port: json.java_debug_port,
            java_opts: json.java_opts,
            port: json.port.map(|port| match port {
                RawPort::Number(n) => n.to_string(),
                RawPort::Text(s) => s,
            }),
        },
        read_directory,
    })
}

/// First file of `ai_dir` with the extension expected for `bot_type`.
fn find_bot_file(ai_dir: &Path, bot_type: BotType) -> Option<String> {
    let mut candidates: Vec<String> = fs::read_dir(ai_dir)
        .ok()?
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| {
            Path::new(name)
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(bot_type.extension()))
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

/// Split `NAME[:RACE]`.
pub fn parse_bot_spec(spec: &str) -> anyhow::Result<(String, Option<Race>)> {
    let Some(captures) = BOT_SPEC.captures(spec) else {
        bail!("'{spec}' is not a valid bot specification, expected NAME[:RACE]");
    };
    let name = captures[1].to_string();
    let race = match captures.get(2) {
        Some(race) => Some(race.as_str().parse::<Race>().map_err(anyhow::Error::msg)?),
        None => None,
    };
    Ok((name, race))
}

/// Resolve every `NAME[:RACE]` spec against the storages, first match wins.
pub fn retrieve_bots<S: AsRef<str>>(
    specs: &[S],
    storages: &[&dyn BotStorage],
) -> anyhow::Result<Vec<Player>> {
    let mut bots = Vec::with_capacity(specs.len());
    for spec in specs {
        let (name, race) = parse_bot_spec(spec.as_ref())?;

        let mut found = None;
        for storage in storages {
            if let Some(bot) = storage.find_bot(&name)? {
                found = Some(bot);
                break;
            }
        }
        let Some(mut bot) = found else {
            bail!("could not find bot {name}");
        };
        if let Some(race) = race {
            bot.race = race;
        }
        bots.push(Player::Bot(bot));
    }
    Ok(bots)
}
