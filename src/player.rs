use std::{fmt::Display, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ArenaError;

/// Playable race. Parsed from the full name or its first letter, case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Race {
    Terran,
    Protoss,
    Zerg,
    Random,
}

impl Race {
    pub fn as_str(&self) -> &'static str {
        match self {
            Race::Terran => "Terran",
            Race::Protoss => "Protoss",
            Race::Zerg => "Zerg",
            Race::Random => "Random",
        }
    }
}

impl Display for Race {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Race {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "t" | "terran" => Ok(Race::Terran),
            "p" | "protoss" => Ok(Race::Protoss),
            "z" | "zerg" => Ok(Race::Zerg),
            "r" | "random" => Ok(Race::Random),
            other => Err(format!("unknown race '{other}'")),
        }
    }
}

/// A port the bot wants exposed.
///
/// `Forward` comes from a `"remote:local"` declaration: the sandbox listens on `local` and the
/// host forwards `remote` to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortMapping {
    Single(u16),
    Forward { remote: u16, local: u16 },
}

impl FromStr for PortMapping {
    type Err = ArenaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |part: &str| {
            part.trim().parse::<u16>().map_err(|_| {
                ArenaError::Configuration(format!("malformed port mapping '{s}'"))
            })
        };
        match s.split_once(':') {
            Some((remote, local)) => Ok(PortMapping::Forward {
                remote: parse(remote)?,
                local: parse(local)?,
            }),
            None => Ok(PortMapping::Single(parse(s)?)),
        }
    }
}

/// Optional runtime tweaks declared by a bot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BotMetadata {
    pub java_debug_port: Option<u16>,
    pub java_opts: Option<String>,
    /// Raw declaration, either a port number or `"remote:local"`.
    pub port: Option<String>,
}

impl BotMetadata {
    pub fn port_mapping(&self) -> Result<Option<PortMapping>, ArenaError> {
        self.port.as_deref().map(str::parse).transpose()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotPlayer {
    pub name: String,
    pub race: Race,
    /// Read-only bot payload, mounted as is.
    pub bot_directory: PathBuf,
    pub base_filename: String,
    pub bwapi_version: String,
    pub metadata: BotMetadata,
    /// Persistent `read/` directory, owned by the bot catalog.
    pub read_directory: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HumanPlayer {
    pub name: String,
    pub race: Race,
}

/// A match participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Player {
    Human(HumanPlayer),
    Bot(BotPlayer),
}

impl Player {
    pub fn human(name: impl Into<String>, race: Race) -> Player {
        Player::Human(HumanPlayer {
            name: name.into(),
            race,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Player::Human(h) => &h.name,
            Player::Bot(b) => &b.name,
        }
    }

    pub fn race(&self) -> Race {
        match self {
            Player::Human(h) => h.race,
            Player::Bot(b) => b.race,
        }
    }

    pub fn is_human(&self) -> bool {
        matches!(self, Player::Human(_))
    }

    pub fn as_bot(&self) -> Option<&BotPlayer> {
        match self {
            Player::Bot(b) => Some(b),
            Player::Human(_) => None,
        }
    }

    /// Name usable inside container and directory names.
    pub fn slug(&self) -> String {
        self.name().replace(' ', "_")
    }
}

impl Display for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Player::Human(h) => write!(f, "human player {}:{}", h.name, h.race),
            Player::Bot(b) => write!(f, "bot {}:{}", b.name, b.race),
        }
    }
}

/// Player names are unique within a match, they key instance and mount names.
pub fn check_unique_names(players: &[Player]) -> Result<(), ArenaError> {
    for (i, player) in players.iter().enumerate() {
        if players[..i].iter().any(|p| p.slug() == player.slug()) {
            return Err(ArenaError::Configuration(format!(
                "player name '{}' is used twice",
                player.name()
            )));
        }
    }
    Ok(())
}
