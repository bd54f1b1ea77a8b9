use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};

use anyhow::Context;
use time::{
    format_description::{self, parse, OwnedFormatItem},
    OffsetDateTime, UtcOffset,
};
use tracing::{subscriber::set_global_default, Level};
use tracing_subscriber::{
    fmt::{time::OffsetTime, writer::BoxMakeWriter},
    FmtSubscriber,
};

type Timer = OffsetTime<OwnedFormatItem>;

/// Log to stderr. `verbose` adds the time, thread and module of every event.
pub fn init_logger(level: Level, verbose: bool) -> anyhow::Result<()> {
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr);

    let res = if verbose {
        set_global_default(
            builder
                .with_timer(local_timer("[hour]:[minute]:[second]")?)
                .with_thread_ids(true)
                .finish(),
        )
    } else {
        set_global_default(builder.without_time().with_target(false).finish())
    };
    res.context("could not set global default tracing subscriber")
}

/// Log everything to a new file in `dir`, returns the file path.
pub fn init_file_logger(dir: &Path) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("could not create {dir:?}"))?;
    let path = dir.join(get_log_file_name()?);
    let file = File::create(&path).with_context(|| format!("could not create {path:?}"))?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::TRACE)
        .with_ansi(false)
        .with_timer(local_timer("[year]-[month]-[day] [hour]:[minute]:[second]")?)
        .with_writer(BoxMakeWriter::new(file))
        .finish();

    set_global_default(subscriber).context(
        "could not set global default tracing subscriber, disable file logging if you are \
         already setting one",
    )?;
    Ok(path)
}

fn local_timer(format: &str) -> anyhow::Result<Timer> {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let format = format_description::parse_owned::<2>(format).context("invalid time format")?;
    Ok(OffsetTime::new(offset, format))
}

fn get_log_file_name() -> anyhow::Result<String> {
    let format = parse("[year]-[month]-[day]_[hour]-[minute]-[second]_log.txt")?;
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    Ok(now.format(&format)?)
}
