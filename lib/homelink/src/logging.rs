pub use slog::{crit, debug, error, info, o, trace, warn, Discard, Drain, Logger};

use sloggers::{Config, LoggerConfig};

/// Builds the process logger. Everything human readable goes to stderr so
/// that stdout stays reserved for machine consumers.
pub fn init(level: &str) -> Logger {
    let toml = format!(
        r#"
type = "terminal"
level = "{}"
destination = "stderr"
"#,
        level
    );

    let config: LoggerConfig =
        serdeconv::from_toml_str(&toml).expect("Error parsing logger configuration");

    config.build_logger().expect("Error building logger")
}

/// Logger that swallows everything. For tests and embedders that bring
/// their own logging.
pub fn null() -> Logger {
    Logger::root(Discard, o!())
}
