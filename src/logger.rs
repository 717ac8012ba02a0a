use chrono::Local;
use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;

/// `Debug` when `--verbose` was given, otherwise `Info`.
pub fn level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Installs the global logger. `RUST_LOG` still wins over `level` when set.
/// At debug level each line also names the emitting module.
pub fn init(level: LevelFilter) {
    let with_target = level >= LevelFilter::Debug;
    Builder::new()
        .format(move |buf, record| {
            let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
            if with_target {
                writeln!(buf, "{} [{}] {} - {}", stamp, record.level(), record.target(), record.args())
            } else {
                writeln!(buf, "{} [{}] - {}", stamp, record.level(), record.args())
            }
        })
        .filter(None, level)
        .parse_default_env()
        .init();

    log::debug!("Logger initialized at {}.", level);
}
