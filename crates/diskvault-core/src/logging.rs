//! Logger installation shared by the diskvault binaries.

use env_logger::Env;

/// Install the process-wide logger.
///
/// `default_level` applies when `DISKVAULT_LOG` is unset. Safe to call more
/// than once; later calls are ignored.
pub fn init(default_level: &str) {
    let env = Env::new()
        .filter_or("DISKVAULT_LOG", default_level)
        .write_style("DISKVAULT_LOG_STYLE");
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .try_init();
}
