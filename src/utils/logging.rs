use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;

/// Crates whose info output drowns the per-packet lines
const NOISY_MODULES: [&str; 2] = ["actix_server", "mio"];

/// Initialize the logger.
///
/// `RUST_LOG` still wins for anything it names. Lines carry the thread name so
/// capture-thread output can be told apart from the API workers.
pub fn init_logger(level: LevelFilter) {
    let mut builder = Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{:<5}] {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                std::thread::current().name().unwrap_or("-"),
                record.args()
            )
        })
        .filter(None, level);

    for module in NOISY_MODULES {
        builder.filter_module(module, level.min(LevelFilter::Warn));
    }

    builder.parse_default_env();

    if builder.try_init().is_err() {
        log::debug!("Logger already initialized");
    }
}

/// Level named on the command line, `Info` when unrecognized
pub fn get_log_level(level: &str) -> LevelFilter {
    level.trim().parse().unwrap_or(LevelFilter::Info)
}
