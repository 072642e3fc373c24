#[cfg(feature = "main")]
use std::path::Path;
#[cfg(feature = "main")]
use std::str::FromStr;
use std::env;

#[cfg(feature = "main")]
use anyhow::Context;
#[cfg(feature = "main")]
use lnsdk::events::{EventBus, LogEntry};
#[cfg(feature = "main")]
use lnsdk::Arc;

/// Abort on panic.
/// Use this instead of `panic = abort` in Cargo.toml, which doesn't show
/// nice backtraces.
pub fn abort_on_panic() {
    let old = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        old(info);
        std::process::abort();
    }));
}

/// `RUST_LOG` if set, else `level_arg`
pub fn effective_level(level_arg: &str) -> String {
    env::var("RUST_LOG").unwrap_or(level_arg.to_string())
}

#[cfg(feature = "main")]
fn parse_level(level: &str) -> anyhow::Result<log::LevelFilter> {
    log::LevelFilter::from_str(level).with_context(|| format!("bad log level {}", level))
}

#[cfg(feature = "main")]
fn base_dispatch(who: &str, level: log::LevelFilter) -> fern::Dispatch {
    let who = who.to_string();
    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{} {}/{} {}] {}",
                tstamp(),
                who,
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level)
        .level_for("hyper", log::LevelFilter::Info)
        .level_for("rustls", log::LevelFilter::Info)
}

#[cfg(feature = "main")]
fn console_dispatch(who: &str, level: log::LevelFilter) -> fern::Dispatch {
    use fern::colors::{Color, ColoredLevelConfig};

    let who = who.to_string();
    let colors = ColoredLevelConfig::new().info(Color::Green).error(Color::Red).warn(Color::Yellow);
    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{} {}/{} {}] {}",
                tstamp(),
                who,
                record.target(),
                colors.color(record.level()),
                message
            ))
        })
        .level(level)
        .level_for("hyper", log::LevelFilter::Info)
        .level_for("rustls", log::LevelFilter::Info)
        .chain(std::io::stdout())
}

/// Forward formatted records to a log stream
#[cfg(feature = "main")]
pub fn stream_dispatch(
    who: &str,
    level: log::LevelFilter,
    sink: Arc<EventBus<LogEntry>>,
) -> fern::Dispatch {
    base_dispatch(who, level).chain(fern::Output::call(move |record| {
        sink.emit(LogEntry { line: record.args().to_string(), level: record.level().to_string() })
    }))
}

#[cfg(feature = "main")]
fn logging_dispatch<P: AsRef<Path>>(
    datadir: P,
    who: &str,
    level_arg: &str,
) -> anyhow::Result<fern::Dispatch> {
    let level = parse_level(&effective_level(level_arg))?;
    let datadir = datadir.as_ref();
    std::fs::create_dir_all(datadir)
        .with_context(|| format!("create log dir {}", datadir.display()))?;
    let logfile = datadir.join(format!("{}.log", who));
    let file_config = base_dispatch(who, level).chain(
        fern::log_file(&logfile).with_context(|| format!("open {}", logfile.display()))?,
    );
    Ok(fern::Dispatch::new().chain(console_dispatch(who, level)).chain(file_config))
}

/// Log to the console and to `<datadir>/<who>.log`
#[cfg(feature = "main")]
pub fn setup_logging<P: AsRef<Path>>(
    datadir: P,
    who: &str,
    level_arg: &str,
) -> anyhow::Result<()> {
    logging_dispatch(datadir, who, level_arg)?.apply().context("log config")
}

/// Like [`setup_logging`], also feeding `sink`
#[cfg(feature = "main")]
pub fn setup_logging_with_stream<P: AsRef<Path>>(
    datadir: P,
    who: &str,
    level_arg: &str,
    sink: Arc<EventBus<LogEntry>>,
) -> anyhow::Result<()> {
    let level = parse_level(&effective_level(level_arg))?;
    logging_dispatch(datadir, who, level_arg)?
        .chain(stream_dispatch(who, level, sink))
        .apply()
        .context("log config")
}

// Would prefer to use now_local but https://rustsec.org/advisories/RUSTSEC-2020-0071
#[cfg(feature = "main")]
pub fn tstamp() -> String {
    use time::{macros::format_description, OffsetDateTime};

    OffsetDateTime::now_utc()
        .format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
        ))
        .unwrap_or_default()
}
