//! Logging utilities
//!
//! The toolkit logs through the `log` facade; applications pick the backend.
//! These helpers install `env_logger`, honouring `RUST_LOG` first.

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system from `RUST_LOG`
pub fn init() {
    // A second init (tests, embedding apps) is not an error
    let _ = env_logger::try_init();
}

/// Initialize logging with a default level used when `RUST_LOG` is unset
pub fn init_with_level(default_level: &str) {
    let env = env_logger::Env::default().default_filter_or(default_level);
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_is_harmless() {
        init_with_level("debug");
        init_with_level("info");
        init();
        log::debug!("logging initialised twice without panicking");
    }
}
