//! Per-player launch specifications.
//!
//! [`build`] turns the resolved players and the [`MatchConfig`] into one [`SandboxSpec`] per
//! participant: which host directories are mounted where, the environment read by the
//! game scripts inside the image, the published ports and the entrypoint command.
//!
//! Layout inside an instance:
//!
//! | sandbox path                   | host path                          | mode |
//! |--------------------------------|------------------------------------|------|
//! | `/app/logs`                    | `<games>/<match>/logs`             | rw   |
//! | `/app/sc/Errors`               | `<games>/<match>/crashes`          | rw   |
//! | `/app/sc/maps`                 | `<maps>`                           | rw   |
//! | `/app/sc/bwapi-data/BWTA`      | BWTA cache                         | rw   |
//! | `/app/sc/bwapi-data/BWTA2`     | BWTA2 cache                        | rw   |
//! | `/app/sc/bwapi-data/write`     | `<games>/<match>/<player>/write`   | rw   |
//! | `/app/bot`                     | bot payload                        | ro   |
//!
//! The last two are mounted for bots only.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, instrument};

use crate::{
    configuration::MatchConfig,
    error::ArenaError,
    player::{check_unique_names, Player, PortMapping},
};

pub const LOG_DIR: &str = "/app/logs";
pub const MAP_DIR: &str = "/app/sc/maps";
pub const ERRORS_DIR: &str = "/app/sc/Errors";
pub const BWAPI_DATA_BWTA_DIR: &str = "/app/sc/bwapi-data/BWTA";
pub const BWAPI_DATA_BWTA2_DIR: &str = "/app/sc/bwapi-data/BWTA2";
pub const BOT_DATA_WRITE_DIR: &str = "/app/sc/bwapi-data/write";
pub const BOT_DIR: &str = "/app/bot";

pub const BOT_ENTRYPOINT: &str = "/app/play_bot.sh";
pub const HUMAN_ENTRYPOINT: &str = "/app/play_human.sh";

/// VNC server port inside every instance.
pub const SANDBOX_VNC_PORT: u16 = 5900;

/// Exit code of an instance whose game fell too far behind realtime.
pub const EXIT_CODE_REALTIME_OUTED: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountMode {
    ReadOnly,
    ReadWrite,
}

impl MountMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MountMode::ReadOnly => "ro",
            MountMode::ReadWrite => "rw",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host_path: PathBuf,
    pub sandbox_path: String,
    pub mode: MountMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBinding {
    pub sandbox_port: u16,
    pub host_port: u16,
}

/// Everything needed to start one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSpec {
    pub name: String,
    pub image: String,
    pub network: String,
    pub mounts: Vec<Mount>,
    pub env: BTreeMap<String, String>,
    pub ports: Vec<PortBinding>,
    pub entrypoint: String,
    pub args: Vec<String>,
    pub extra_options: Vec<String>,
}

impl SandboxSpec {
    /// Host port the VNC server is published on, if any.
    pub fn vnc_host_port(&self) -> Option<u16> {
        self.ports
            .iter()
            .find(|p| p.sandbox_port == SANDBOX_VNC_PORT)
            .map(|p| p.host_port)
    }

    pub fn mount_at(&self, sandbox_path: &str) -> Option<&Mount> {
        self.mounts.iter().find(|m| m.sandbox_path == sandbox_path)
    }
}

/// `"{match}_{player}"`, spaces replaced by underscores.
pub fn instance_name(config: &MatchConfig, player: &Player) -> String {
    format!("{}_{}", config.match_name(), player.slug())
}

/// Host directory mounted as the bot's writable `bwapi-data/write`.
pub fn scratch_dir(config: &MatchConfig, player: &Player) -> PathBuf {
    config.match_dir().join(player.slug()).join("write")
}

/// Path of the played map or replay as seen from inside an instance.
pub fn sandbox_map_path(config: &MatchConfig) -> String {
    format!("{MAP_DIR}/replays/{}", config.map_name())
}

/// The n-th player publishes its VNC server on `base + n`.
fn vnc_host_port(base: u16, index: usize) -> Result<u16, ArenaError> {
    u16::try_from(index)
        .ok()
        .and_then(|offset| base.checked_add(offset))
        .ok_or_else(|| {
            ArenaError::Configuration(format!(
                "no vnc port left above {base} for player number {index}"
            ))
        })
}

fn flag(value: bool) -> String {
    let value = if value { "1" } else { "0" };
    value.to_string()
}

/// Build one [`SandboxSpec`] per player, in player order.
///
/// The first player hosts the game in headless mode, the others join it.
///
/// # Errors
///
/// [`ArenaError::Configuration`] for an empty or inconsistent player list or a malformed port
/// declaration; nothing is created on disk in that case. [`ArenaError::Filesystem`] if a
/// scratch directory cannot be created.
#[instrument(skip_all, fields(match_name = %config.match_name()))]
pub fn build(players: &[Player], config: &MatchConfig) -> Result<Vec<SandboxSpec>, ArenaError> {
    validate(players, config)?;

    let specs = players
        .iter()
        .enumerate()
        .map(|(index, player)| spec_for(index, player, config))
        .collect::<Result<Vec<_>, _>>()?;

    for player in players.iter().filter(|p| p.as_bot().is_some()) {
        create_fresh_dir(&scratch_dir(config, player))?;
    }

    debug!(count = specs.len(), "built launch specifications");
    Ok(specs)
}

/// Check that `players` can play under `config`, without touching the filesystem.
pub fn validate(players: &[Player], config: &MatchConfig) -> Result<(), ArenaError> {
    if players.is_empty() {
        return Err(ArenaError::Configuration(
            "at least one player must be specified".into(),
        ));
    }
    check_unique_names(players)?;
    if config.headless() && players.iter().any(Player::is_human) {
        return Err(ArenaError::Configuration(
            "a human player cannot play in headless mode".into(),
        ));
    }
    if !config.headless() {
        vnc_host_port(config.vnc_base_port, players.len() - 1)?;
    }
    for bot in players.iter().filter_map(Player::as_bot) {
        bot.metadata.port_mapping()?;
    }
    Ok(())
}

fn spec_for(index: usize, player: &Player, config: &MatchConfig) -> Result<SandboxSpec, ArenaError> {
    let rw = |host_path: &Path, sandbox_path: &str| Mount {
        host_path: host_path.to_path_buf(),
        sandbox_path: sandbox_path.to_string(),
        mode: MountMode::ReadWrite,
    };

    let mut mounts = vec![
        rw(&config.log_dir(), LOG_DIR),
        rw(&config.crash_dir(), ERRORS_DIR),
        rw(&config.maps_dir, MAP_DIR),
        rw(&config.bwta_dir, BWAPI_DATA_BWTA_DIR),
        rw(&config.bwta2_dir, BWAPI_DATA_BWTA2_DIR),
    ];

    let mut ports = vec![];
    if !config.headless() {
        ports.push(PortBinding {
            sandbox_port: SANDBOX_VNC_PORT,
            host_port: vnc_host_port(config.vnc_base_port, index)?,
        });
    }

    let map_path = sandbox_map_path(config);
    let speed = config.game_speed.to_string();
    let mut env = BTreeMap::new();
    let mut set = |key: &str, value: String| {
        env.insert(key.to_string(), value);
    };
    set("PLAYER_NAME", player.name().to_string());
    set("PLAYER_RACE", player.race().to_string());
    set("GAME_NAME", config.match_name().to_string());
    set("REPLAY_NAME", map_path.clone());
    set("SPEED_OVERRIDE", speed.clone());
    set("TM_LOG_RESULTS", "../logs/scores.json".to_string());
    set("TM_LOG_FRAMETIMES", "../logs/frames.csv".to_string());
    set("TM_SPEED_OVERRIDE", speed);
    set(
        "TM_ALLOW_USER_INPUT",
        flag(player.is_human() || config.allow_input),
    );
    set(
        "EXIT_CODE_REALTIME_OUTED",
        EXIT_CODE_REALTIME_OUTED.to_string(),
    );
    set("CAPTURE_MOUSE_MOVEMENT", flag(config.capture_movement));
    set("JAVA_DEBUG", flag(false));

    let entrypoint = match player {
        Player::Bot(bot) => {
            mounts.push(rw(&scratch_dir(config, player), BOT_DATA_WRITE_DIR));
            mounts.push(Mount {
                host_path: bot.bot_directory.clone(),
                sandbox_path: BOT_DIR.to_string(),
                mode: MountMode::ReadOnly,
            });

            set("BOT_FILE", bot.base_filename.clone());
            set("BOT_BWAPI", bot.bwapi_version.clone());
            set("JAVA_DEBUG_PORT", String::new());
            set("JAVA_OPTS", bot.metadata.java_opts.clone().unwrap_or_default());

            if let Some(port) = bot.metadata.java_debug_port {
                ports.push(PortBinding {
                    sandbox_port: port,
                    host_port: port,
                });
                set("JAVA_DEBUG", flag(true));
                set("JAVA_DEBUG_PORT", port.to_string());
            }
            match bot.metadata.port_mapping()? {
                Some(PortMapping::Single(port)) => ports.push(PortBinding {
                    sandbox_port: port,
                    host_port: port,
                }),
                Some(PortMapping::Forward { remote, local }) => ports.push(PortBinding {
                    sandbox_port: local,
                    host_port: remote,
                }),
                None => {}
            }
            BOT_ENTRYPOINT
        }
        Player::Human(_) => HUMAN_ENTRYPOINT,
    };

    let args = if config.headless() {
        let mut args = vec![
            "--game".to_string(),
            config.match_name().to_string(),
            "--name".to_string(),
            player.name().to_string(),
        ];
        if index == 0 {
            args.extend(["--host".to_string(), "--map".to_string(), map_path]);
        } else {
            args.push("--join".to_string());
        }
        args
    } else {
        vec!["--headful".to_string()]
    };

    Ok(SandboxSpec {
        name: instance_name(config, player),
        image: config.runtime_image().to_string(),
        network: config.network().to_string(),
        mounts,
        env,
        ports,
        entrypoint: entrypoint.to_string(),
        args,
        extra_options: config.extra_runtime_options.clone(),
    })
}

fn create_fresh_dir(dir: &Path) -> Result<(), ArenaError> {
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(|e| ArenaError::filesystem(dir, e))?;
    }
    fs::create_dir_all(dir).map_err(|e| ArenaError::filesystem(dir, e))
}
