use colored::{ColoredString, Colorize};
use log::{Level, LevelFilter};

/// The crates of this workspace, logged at the configured level
const WORKSPACE_CRATES: [&str; 3] = ["tally", "tally_ledger", "tally_core"];

/// Sets up logging to stdout. Dependencies only get to report warnings and errors.
pub fn init_logger(max_level: LevelFilter) {
    let dispatch = WORKSPACE_CRATES
        .iter()
        .fold(fern::Dispatch::new().level(LevelFilter::Warn), |dispatch, name| {
            dispatch.level_for(*name, max_level)
        });

    dispatch
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} {} {} {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
                severity(record.level()),
                source(record.target()),
                message
            ))
        })
        .chain(std::io::stdout())
        .apply()
        .expect("logging is initialized")
}

/// Shortens a log target to a colored tag, `ledger` for anything in `tally_ledger` and so on
fn source(target: &str) -> ColoredString {
    let crate_name = target.split("::").next().unwrap_or(target);

    match crate_name.strip_prefix("tally_") {
        Some("ledger") => "[ledger]".magenta(),
        Some("core") => "[core]".cyan(),
        Some(other) => format!("[{other}]").normal(),
        None if crate_name == "tally" => "[tally]".green(),
        None => format!("[{crate_name}]").dimmed(),
    }
}

fn severity(level: Level) -> ColoredString {
    let padded = format!("{:<5}", level);

    match level {
        Level::Error => padded.red().bold(),
        Level::Warn => padded.yellow().bold(),
        Level::Info => padded.blue(),
        Level::Debug | Level::Trace => padded.normal(),
    }
}
