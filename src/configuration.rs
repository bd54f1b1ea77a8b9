//! Match configuration and runtime settings.
//!
//! A [`MatchConfig`] is created once per invocation through [`MatchConfigBuilder`] and never
//! mutated afterwards. It describes *what* to launch: match name, map, display mode and the
//! host directories mounted into every instance.
//!
//! [`MonitorSettings`] controls *how* a running match is supervised (poll interval, settle
//! delay, retries). It can be created programmatically or from environment variables with
//! [`MonitorSettings::from_env()`].
//!
//! # Environment Variables
//!
//! - `SCBW_POLL_INTERVAL_MS`: pause between two polls of the runtime (default: `3000`)
//! - `SCBW_SETTLE_DELAY_MS`: delay before checking that the match started (default: `1000`)
//! - `SCBW_QUERY_RETRIES`: extra attempts for a failing runtime query (default: `0`)
//! - `SCBW_LINGERING_TIMEOUT_SECS`: when set, a single instance left alone for that long is
//!   considered crashed (default: unset)

use std::{
    env,
    path::PathBuf,
    time::Duration,
};

use serde::Serialize;

use crate::error::ArenaError;

/// Prefix of every match name created by the command line, used to recognise our instances.
pub const MATCH_NAME_PREFIX: &str = "GAME_";
pub const DEFAULT_NETWORK: &str = "sc_net";
pub const DEFAULT_SUBNET_CIDR: &str = "172.18.0.0/16";
pub const DEFAULT_VNC_PORT: u16 = 5900;
pub const DEFAULT_VNC_HOST: &str = "localhost";
pub const DEFAULT_IMAGE: &str = "starcraft:game-1.0.4";

/// Host-side data layout.
///
/// Everything lives under one base directory, `~/.scbw` (`%APPDATA%/scbw` on Windows).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDirs {
    pub base: PathBuf,
}

impl DataDirs {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        DataDirs { base: base.into() }
    }

    /// Default location for the current user, `None` if no home directory can be found.
    pub fn detect() -> Option<Self> {
        let dirs = directories::BaseDirs::new()?;
        let base = if cfg!(windows) {
            dirs.config_dir().join("scbw")
        } else {
            dirs.home_dir().join(".scbw")
        };
        Some(DataDirs { base })
    }

    pub fn games(&self) -> PathBuf {
        self.base.join("games")
    }

    pub fn bots(&self) -> PathBuf {
        self.base.join("bots")
    }

    pub fn maps(&self) -> PathBuf {
        self.base.join("maps")
    }

    pub fn replays(&self) -> PathBuf {
        self.maps().join("replays")
    }

    pub fn bwta(&self) -> PathBuf {
        self.base.join("bwapi-data").join("BWTA")
    }

    pub fn bwta2(&self) -> PathBuf {
        self.base.join("bwapi-data").join("BWTA2")
    }

    /// Directory holding the image build context and the downloaded game payload.
    pub fn docker(&self) -> PathBuf {
        self.base.join("docker")
    }

    /// Every directory [`install`](crate::provisioner::install) must create.
    pub fn all(&self) -> Vec<PathBuf> {
        vec![
            self.games(),
            self.bots(),
            self.maps(),
            self.replays(),
            self.bwta(),
            self.bwta2(),
        ]
    }
}

impl Default for DataDirs {
    fn default() -> Self {
        Self::detect().unwrap_or_else(|| DataDirs::new(".scbw"))
    }
}

/// Immutable description of a single match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchConfig {
    pub(crate) headless: bool,
    pub(crate) match_name: String,
    pub(crate) map_name: String,
    pub(crate) game_speed: i32,
    pub(crate) allow_input: bool,
    pub(crate) capture_movement: bool,
    pub(crate) vnc_base_port: u16,
    pub(crate) vnc_host: String,
    pub(crate) show_all_viewers: bool,
    pub(crate) games_dir: PathBuf,
    pub(crate) bots_dir: PathBuf,
    pub(crate) maps_dir: PathBuf,
    pub(crate) bwta_dir: PathBuf,
    pub(crate) bwta2_dir: PathBuf,
    pub(crate) runtime_image: String,
    pub(crate) network: String,
    pub(crate) extra_runtime_options: Vec<String>,
    pub(crate) copy_back_on_finish: bool,
}

impl MatchConfig {
    pub fn match_name(&self) -> &str {
        &self.match_name
    }

    pub fn map_name(&self) -> &str {
        &self.map_name
    }

    pub fn headless(&self) -> bool {
        self.headless
    }

    pub fn vnc_host(&self) -> &str {
        &self.vnc_host
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn runtime_image(&self) -> &str {
        &self.runtime_image
    }

    /// `<games>/<match_name>`, root of everything produced by this match.
    pub fn match_dir(&self) -> PathBuf {
        self.games_dir.join(&self.match_name)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.match_dir().join("logs")
    }

    pub fn crash_dir(&self) -> PathBuf {
        self.match_dir().join("crashes")
    }

    /// Host path of the map or replay file played by this match.
    pub fn map_path(&self) -> PathBuf {
        self.maps_dir.join("replays").join(&self.map_name)
    }

    /// Every instance of the match has a name starting with this prefix.
    pub fn instance_prefix(&self) -> String {
        format!("{}_", self.match_name)
    }
}

/// A builder for [`MatchConfig`].
///
/// Directories default to [`DataDirs::default()`], the display is headful on
/// `localhost:5900`, and the game runs at speed `0` (as fast as possible).
///
/// # Examples
///
/// ```
/// # use sc_arena::configuration::MatchConfigBuilder;
/// let config = MatchConfigBuilder::new("GAME_1234", "1-2-3-UAI12.rep")
///     .with_headless(true)
///     .with_game_speed(-1)
///     .build()
///     .unwrap();
/// assert_eq!(config.instance_prefix(), "GAME_1234_");
/// ```
#[derive(Debug, Clone)]
pub struct MatchConfigBuilder {
    config: MatchConfig,
}

impl MatchConfigBuilder {
    #[must_use]
    pub fn new(match_name: impl Into<String>, map_name: impl Into<String>) -> Self {
        Self::with_data_dirs(match_name, map_name, &DataDirs::default())
    }

    /// Same as [`new`](Self::new) but with every mount rooted in `dirs`.
    #[must_use]
    pub fn with_data_dirs(
        match_name: impl Into<String>,
        map_name: impl Into<String>,
        dirs: &DataDirs,
    ) -> Self {
        MatchConfigBuilder {
            config: MatchConfig {
                headless: false,
                match_name: match_name.into(),
                map_name: map_name.into(),
                game_speed: 0,
                allow_input: false,
                capture_movement: false,
                vnc_base_port: DEFAULT_VNC_PORT,
                vnc_host: DEFAULT_VNC_HOST.to_string(),
                show_all_viewers: false,
                games_dir: dirs.games(),
                bots_dir: dirs.bots(),
                maps_dir: dirs.maps(),
                bwta_dir: dirs.bwta(),
                bwta2_dir: dirs.bwta2(),
                runtime_image: DEFAULT_IMAGE.to_string(),
                network: DEFAULT_NETWORK.to_string(),
                extra_runtime_options: vec![],
                copy_back_on_finish: false,
            },
        }
    }

    /// Run without VNC, bots join each other by themselves.
    #[must_use]
    pub fn with_headless(mut self, value: bool) -> Self {
        self.config.headless = value;
        self
    }

    /// Pause in ms between frames, `-1` for the engine default.
    #[must_use]
    pub fn with_game_speed(mut self, speed: i32) -> Self {
        self.config.game_speed = speed;
        self
    }

    /// Let a human control the running bots (debugging).
    #[must_use]
    pub fn with_allow_input(mut self, value: bool) -> Self {
        self.config.allow_input = value;
        self
    }

    #[must_use]
    pub fn with_capture_movement(mut self, value: bool) -> Self {
        self.config.capture_movement = value;
        self
    }

    #[must_use]
    pub fn with_vnc(mut self, host: impl Into<String>, base_port: u16) -> Self {
        self.config.vnc_host = host.into();
        self.config.vnc_base_port = base_port;
        self
    }

    /// Open a viewer for every instance instead of the hosting one only.
    #[must_use]
    pub fn with_show_all_viewers(mut self, value: bool) -> Self {
        self.config.show_all_viewers = value;
        self
    }

    #[must_use]
    pub fn with_games_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.games_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_bots_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.bots_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_maps_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.maps_dir = dir.into();
        self
    }

    /// BWTA and BWTA2 map analysis caches, shared between matches.
    #[must_use]
    pub fn with_bwapi_data_dirs(mut self, bwta: impl Into<PathBuf>, bwta2: impl Into<PathBuf>) -> Self {
        self.config.bwta_dir = bwta.into();
        self.config.bwta2_dir = bwta2.into();
        self
    }

    #[must_use]
    pub fn with_runtime_image(mut self, image: impl Into<String>) -> Self {
        self.config.runtime_image = image.into();
        self
    }

    #[must_use]
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.config.network = network.into();
        self
    }

    /// Options appended verbatim to every `docker run`.
    #[must_use]
    pub fn with_extra_runtime_options(mut self, options: Vec<String>) -> Self {
        self.config.extra_runtime_options = options;
        self
    }

    /// Copy each bot's `write/` directory back into its `read/` directory after the match.
    #[must_use]
    pub fn with_copy_back_on_finish(mut self, value: bool) -> Self {
        self.config.copy_back_on_finish = value;
        self
    }

    /// # Errors
    ///
    /// Returns [`ArenaError::Configuration`] when the match name or the map is empty, or when
    /// viewers are requested in headless mode.
    pub fn build(self) -> Result<MatchConfig, ArenaError> {
        let config = self.config;
        if config.match_name.trim().is_empty() {
            return Err(ArenaError::Configuration("match name is empty".into()));
        }
        if config.map_name.trim().is_empty() {
            return Err(ArenaError::Configuration("no map or replay given".into()));
        }
        if config.headless && config.show_all_viewers {
            return Err(ArenaError::Configuration(
                "cannot show all screens in headless mode".into(),
            ));
        }
        Ok(config)
    }
}

/// Supervision parameters of a running match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub(crate) poll_interval: Duration,
    pub(crate) settle_delay: Duration,
    pub(crate) query_retries: u32,
    pub(crate) lingering_timeout: Option<Duration>,
}

impl MonitorSettings {
    /// Poll every 3 seconds, wait 1 second before checking the launch, no retries and no
    /// lingering-instance detection.
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            settle_delay: Duration::from_secs(1),
            query_retries: 0,
            lingering_timeout: None,
        }
    }

    /// Create settings from environment variables, see the [module documentation](self).
    ///
    /// Unset or unparsable variables keep their default value.
    pub fn from_env() -> Self {
        fn get_env_u64(var: &str) -> Option<u64> {
            env::var(var).ok()?.trim().parse().ok()
        }

        let defaults = Self::new();
        Self {
            poll_interval: get_env_u64("SCBW_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            settle_delay: get_env_u64("SCBW_SETTLE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.settle_delay),
            query_retries: get_env_u64("SCBW_QUERY_RETRIES")
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(defaults.query_retries),
            lingering_timeout: get_env_u64("SCBW_LINGERING_TIMEOUT_SECS").map(Duration::from_secs),
        }
    }

    pub fn with_poll_interval(mut self, value: Duration) -> Self {
        self.poll_interval = value;
        self
    }

    pub fn with_settle_delay(mut self, value: Duration) -> Self {
        self.settle_delay = value;
        self
    }

    /// Number of extra attempts for a runtime query before giving up.
    pub fn with_query_retries(mut self, value: u32) -> Self {
        self.query_retries = value;
        self
    }

    /// Consider the match crashed when one instance stays alone for longer than `value`.
    pub fn with_lingering_timeout(mut self, value: Option<Duration>) -> Self {
        self.lingering_timeout = value;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod configuration_tests {
    use super::*;

    fn dirs() -> DataDirs {
        DataDirs::new("/data/scbw")
    }

    #[test]
    fn derived_paths() {
        let config = MatchConfigBuilder::with_data_dirs("GAME_X", "map.rep", &dirs())
            .build()
            .unwrap();
        assert_eq!(config.match_dir(), PathBuf::from("/data/scbw/games/GAME_X"));
        assert_eq!(config.log_dir(), PathBuf::from("/data/scbw/games/GAME_X/logs"));
        assert_eq!(
            config.map_path(),
            PathBuf::from("/data/scbw/maps/replays/map.rep")
        );
        assert_eq!(config.instance_prefix(), "GAME_X_");
    }

    #[test]
    fn headless_with_all_viewers_is_refused() {
        let res = MatchConfigBuilder::with_data_dirs("GAME_X", "map.rep", &dirs())
            .with_headless(true)
            .with_show_all_viewers(true)
            .build();
        assert!(matches!(res, Err(ArenaError::Configuration(_))));
    }

    #[test]
    fn empty_names_are_refused() {
        assert!(MatchConfigBuilder::with_data_dirs(" ", "map.rep", &dirs())
            .build()
            .is_err());
        assert!(MatchConfigBuilder::with_data_dirs("GAME_X", "", &dirs())
            .build()
            .is_err());
    }

    #[test]
    fn monitor_defaults() {
        let settings = MonitorSettings::default();
        assert_eq!(settings.poll_interval, Duration::from_secs(3));
        assert_eq!(settings.query_retries, 0);
        assert!(settings.lingering_timeout.is_none());
    }
}
