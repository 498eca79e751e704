//! Tracing subscriber setup for hosts embedding the compiler.

use tracing::Level;

/// Install a fmt subscriber at `level`.
///
/// Safe to call more than once: later calls leave the first subscriber in place.
pub fn init(level: Level) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
}

/// Parse a level name (`error`, `warn`, `info`, `debug`, `trace`), defaulting to `info`.
pub fn level_from_str(name: &str) -> Level {
    name.parse().unwrap_or(Level::INFO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing() {
        assert_eq!(level_from_str("debug"), Level::DEBUG);
        assert_eq!(level_from_str("nonsense"), Level::INFO);
        init(Level::WARN);
        init(Level::DEBUG);
    }
}
