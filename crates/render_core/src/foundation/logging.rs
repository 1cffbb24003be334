//! Logging utilities and structured logging support

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system from `RUST_LOG`
pub fn init() {
    env_logger::init();
}

/// Initialize the logging system with an explicit filter string (e.g. `"info"`,
/// `"render_core=debug"`). `RUST_LOG`, when set, still takes precedence.
///
/// Safe to call more than once; only the first call installs the logger.
pub fn init_with_filter(filter: &str) {
    let env = env_logger::Env::default().default_filter_or(filter);
    if env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init()
        .is_ok()
    {
        log::debug!("Logger initialized with filter '{}'", filter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_with_filter_is_idempotent() {
        init_with_filter("debug");
        init_with_filter("warn");
        info!("logging still works after repeated init");
    }
}
