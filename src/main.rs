use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
    process::ExitCode,
};

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use rand::Rng;
use tracing::{error, info, Level};

use sc_arena::{
    bot_storage::parse_bot_spec,
    configuration::{
        DEFAULT_IMAGE, DEFAULT_NETWORK, DEFAULT_SUBNET_CIDR, DEFAULT_VNC_PORT, MATCH_NAME_PREFIX,
    },
    logger,
    prelude::*,
    provisioner::{install, is_installed, BWTA_CACHE_URL},
    vnc::{resolve_vnc_host, VIEWER_PROGRAM},
};

/// Launch StarCraft docker images for bot/human headless/headful play.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Download all dependencies and data files, needed the first time.
    #[arg(long)]
    install: bool,

    /// Bot that should play, NAME[:RACE]. Bots are looked up in --bot-dir.
    #[arg(long = "bot", value_name = "BOT_NAME")]
    bots: Vec<String>,

    /// Add a human player, NAME[:RACE]. Headful only.
    #[arg(long, value_name = "NAME")]
    human: Option<String>,

    /// Map or replay to play, relative to <map-dir>/replays.
    #[arg(long, alias = "replay", default_value = "1-2-3-UAI12.rep")]
    map: String,

    /// No VNC viewer is launched, the bots start the game by themselves.
    #[arg(long)]
    headless: bool,

    /// Override the auto-generated game name.
    #[arg(long)]
    game_name: Option<String>,

    /// Pause in ms between frames, -1 for the game default.
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    game_speed: i32,

    /// Directory where bots are stored.
    #[arg(long)]
    bot_dir: Option<PathBuf>,

    /// Directory where game logs and results are stored.
    #[arg(long)]
    game_dir: Option<PathBuf>,

    /// Directory where maps are stored.
    #[arg(long)]
    map_dir: Option<PathBuf>,

    /// Directory where BWTA map caches are stored.
    #[arg(long)]
    bwapi_data_bwta_dir: Option<PathBuf>,

    /// Directory where BWTA2 map caches are stored.
    #[arg(long)]
    bwapi_data_bwta2_dir: Option<PathBuf>,

    /// Host port of the first player's VNC screen, the n-th player uses vnc_base_port+n.
    #[arg(long, default_value_t = DEFAULT_VNC_PORT)]
    vnc_base_port: u16,

    /// Address on which VNC connections are accessible, docker-machine ip or localhost when
    /// empty.
    #[arg(long, default_value = "")]
    vnc_host: String,

    /// If the mouse leaves the VNC window, do not move the game (only use the mini map).
    #[arg(long)]
    capture_movement: bool,

    /// Launch VNC viewers for all containers, not just the host.
    #[arg(long)]
    show_all: bool,

    /// Allow controlling the game for running bots. Useful for debugging.
    #[arg(long)]
    allow_input: bool,

    #[arg(long, value_enum, ignore_case = true, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// Add time and thread to every log line.
    #[arg(long)]
    log_verbose: bool,

    /// Write logs to a file in this directory instead of stderr.
    #[arg(long, value_name = "DIR")]
    log_file: Option<PathBuf>,

    /// At the end of the game, copy each bot's write directory into its read directory.
    #[arg(long)]
    read_overwrite: bool,

    /// Image used to launch the game.
    #[arg(long, default_value = DEFAULT_IMAGE)]
    docker_image: String,

    /// Custom `docker run` options, space separated.
    #[arg(long, allow_hyphen_values = true)]
    opt: Option<String>,

    /// Remove the results of a previous game with the same name without asking.
    #[arg(short, long)]
    yes: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let logging = match &args.log_file {
        Some(dir) => logger::init_file_logger(dir).map(|path| eprintln!("logging to {path:?}")),
        None => logger::init_logger(args.log_level.into(), args.log_verbose),
    };
    if let Err(e) = logging {
        eprintln!("{e:#}");
        return ExitCode::FAILURE;
    }

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<ExitCode> {
    let cancel = CancellationToken::from_signals()?;
    let docker = DockerCli::new();
    let dirs = DataDirs::default();
    if !docker.is_available() {
        bail!("docker was not found on PATH, it is required to run the games");
    }

    if args.install || !is_installed(&docker, &args.docker_image) {
        install(
            &docker,
            &dirs,
            &ImageSpec::new(&args.docker_image, &dirs),
            BWTA_CACHE_URL,
        )?;
        if args.install {
            return Ok(ExitCode::SUCCESS);
        }
    }

    if !dirs.base.exists() {
        bail!(
            "the data directory {:?} was not found, did you run \"sc-arena --install\"?",
            dirs.base
        );
    }
    if args.bots.is_empty() && args.human.is_none() {
        bail!("at least one --bot or --human is required");
    }

    let game_name = format!(
        "{MATCH_NAME_PREFIX}{}",
        args.game_name.clone().unwrap_or_else(random_name)
    );
    let game_dir = args.game_dir.clone().unwrap_or_else(|| dirs.games());
    if game_dir.join(&game_name).exists() && !args.yes && !confirm_overwrite(&game_name)? {
        return Ok(ExitCode::FAILURE);
    }

    let provisioner = Provisioner::new(&docker);
    provisioner.ensure_runtime_reachable()?;
    provisioner.ensure_network(DEFAULT_NETWORK, DEFAULT_SUBNET_CIDR)?;

    let (viewer, vnc_host) = if args.headless {
        (VncViewer::with_program(VIEWER_PROGRAM), args.vnc_host.clone())
    } else {
        (
            VncViewer::locate()?,
            resolve_vnc_host(&args.vnc_host),
        )
    };

    let mut players = vec![];
    if let Some(human) = &args.human {
        let (name, race) = parse_bot_spec(human)?;
        players.push(Player::human(name, race.unwrap_or(Race::Random)));
    }
    let bot_dir = args.bot_dir.clone().unwrap_or_else(|| dirs.bots());
    let storage = LocalBotStorage::new(&bot_dir);
    players.extend(retrieve_bots(args.bots.as_slice(), &[&storage])?);

    let config = MatchConfigBuilder::with_data_dirs(&game_name, &args.map, &dirs)
        .with_headless(args.headless)
        .with_game_speed(args.game_speed)
        .with_allow_input(args.allow_input)
        .with_capture_movement(args.capture_movement)
        .with_vnc(vnc_host, args.vnc_base_port)
        .with_show_all_viewers(args.show_all)
        .with_games_dir(game_dir)
        .with_bots_dir(bot_dir)
        .with_maps_dir(args.map_dir.clone().unwrap_or_else(|| dirs.maps()))
        .with_bwapi_data_dirs(
            args.bwapi_data_bwta_dir.clone().unwrap_or_else(|| dirs.bwta()),
            args.bwapi_data_bwta2_dir.clone().unwrap_or_else(|| dirs.bwta2()),
        )
        .with_runtime_image(&args.docker_image)
        .with_extra_runtime_options(
            args.opt
                .as_deref()
                .unwrap_or_default()
                .split_whitespace()
                .map(String::from)
                .collect(),
        )
        .with_copy_back_on_finish(args.read_overwrite)
        .build()?;

    let arena = Arena::new(&docker, MonitorSettings::from_env());
    let poll_interval = arena.settings().poll_interval();
    let mut wait = || {
        cancel.sleep(poll_interval);
    };

    let result = match arena.run_match(&players, &config, &mut wait, &viewer, &cancel) {
        Ok(result) => result,
        Err(ArenaError::Cancelled) => return Ok(ExitCode::FAILURE),
        Err(e) => return Err(e).context(format!("game {game_name} failed")),
    };

    report(&result);
    if result.realtime_timed_out {
        error!("Game has realtime outed!");
    }
    if result.crashed {
        error!("Game has crashed!");
    }
    Ok(if result.is_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn random_name() -> String {
    format!("{:08x}", rand::rng().random::<u32>())
}

fn confirm_overwrite(game_name: &str) -> anyhow::Result<bool> {
    info!("Game {game_name} has already been played, do you wish to continue (and remove logs) ? (Y/n)");
    io::stderr().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "" | "y" | "yes"
    ))
}

fn report(result: &MatchResult) {
    info!(
        "Game {} finished in {:.2} seconds.",
        result.match_name,
        result.elapsed.as_secs_f64()
    );
    for (title, files) in [
        ("Logs are saved here:", &result.log_files),
        ("Frame information is saved here:", &result.frame_files),
        ("Game results are saved here:", &result.score_files),
        ("Crash dumps are saved here:", &result.crash_files),
    ] {
        if files.is_empty() {
            continue;
        }
        info!("---");
        info!("{title}");
        for file in files {
            info!("{}", file.display());
        }
    }
    info!("---");
    match &result.outcome {
        Some(outcome) => info!(
            "Winner: {} ({}), loser: {} ({})",
            outcome.winner_name, outcome.winner_race, outcome.loser_name, outcome.loser_race
        ),
        None => info!("Game results are available only for 1v1 games."),
    }
}
