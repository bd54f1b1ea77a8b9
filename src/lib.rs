//! # sc-arena
//!
//! Launch and supervise StarCraft: Brood War matches between bots (and humans), each player
//! running in its own docker container.
//!
//! It provides:
//! - Provisioning of the docker network and game image (`Provisioner`, `install`)
//! - Per-player launch specifications: mounts, environment, ports and command (`sandbox_spec`)
//! - Launch, supervision and teardown of a match (`MatchLauncher`, `LifecycleMonitor`)
//! - Structured results read from the files the game writes (`MatchResult`)
//!
//! A match has one container per player. In headless mode the first bot hosts the game and
//! the others join it; in headful mode every container publishes a VNC screen and the game
//! is started by hand.
//!
//! # Documentation Overview
//!
//! - For running a whole match, see [`Arena`](crate::arena::Arena).
//! - For what a match looks like, see [`MatchConfigBuilder`](crate::configuration::MatchConfigBuilder)
//!   and [`Player`](crate::player::Player).
//! - For the states a match goes through and how it may end, see the [`monitor`] module.
//! - For talking to something other than the `docker` command line, implement
//!   [`ContainerRuntime`](crate::runtime::ContainerRuntime).
//!
//! # Usage Example
//!
//! ```no_run
//! use sc_arena::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let docker = DockerCli::new();
//!     let dirs = DataDirs::default();
//!
//!     let provisioner = Provisioner::new(&docker);
//!     provisioner.ensure_runtime_reachable()?;
//!     provisioner.ensure_network("sc_net", "172.18.0.0/16")?;
//!     provisioner.ensure_image(&ImageSpec::new("starcraft:game-1.0.4", &dirs))?;
//!
//!     let storage = LocalBotStorage::new(dirs.bots());
//!     let players = retrieve_bots(&["Iron:T", "Locutus"], &[&storage])?;
//!
//!     let config = MatchConfigBuilder::with_data_dirs("GAME_demo", "sscai/(2)Benzene.scx", &dirs)
//!         .with_headless(true)
//!         .build()?;
//!
//!     let arena = Arena::new(&docker, MonitorSettings::default());
//!     let cancel = CancellationToken::from_signals()?;
//!     let poll = arena.settings().poll_interval();
//!     let result = arena.run_match(
//!         &players,
//!         &config,
//!         &mut || std::thread::sleep(poll),
//!         &VncViewer::with_program("vnc-viewer"),
//!         &cancel,
//!     )?;
//!
//!     if let Some(outcome) = &result.outcome {
//!         println!("{} won as {}", outcome.winner_name, outcome.winner_race);
//!     }
//!     Ok(())
//! }
//! ```

pub use anyhow;
pub mod arena;
pub mod bot_storage;
pub mod cancel;
pub mod configuration;
pub mod error;
pub mod launcher;
pub mod logger;
pub mod monitor;
pub mod path_translator;
pub mod player;
pub mod provisioner;
pub mod result;
pub mod runtime;
pub mod sandbox_spec;
pub mod vnc;

/// Commonly used types and traits for quick access.
///
/// ```rust
/// use sc_arena::prelude::*;
/// ```
pub mod prelude {
    pub use crate::arena::Arena;
    pub use crate::bot_storage::{retrieve_bots, BotStorage, LocalBotStorage};
    pub use crate::cancel::CancellationToken;
    pub use crate::configuration::{DataDirs, MatchConfig, MatchConfigBuilder, MonitorSettings};
    pub use crate::error::{ArenaError, RuntimeError};
    pub use crate::monitor::{LifecycleMonitor, TerminalState};
    pub use crate::player::{Player, Race};
    pub use crate::provisioner::{ImageSpec, Provisioner};
    pub use crate::result::MatchResult;
    pub use crate::runtime::{ContainerRuntime, DockerCli};
    pub use crate::vnc::{Viewer, VncViewer};
}
