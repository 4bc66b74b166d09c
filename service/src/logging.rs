use crate::config::Config;
use log::LevelFilter;
use simplelog::{self, ConfigBuilder};

/// Transport dependencies whose connection chatter is hidden below Trace.
const QUIET_DEPENDENCIES: &[&str] = &[
    "reqwest",
    "hyper",
    "h2",
    "rustls",
    "eventsource_client",
];

pub struct Logger {}

impl Logger {
    /// Installs the global terminal logger at the configured level.
    ///
    /// A second call is reported on stderr and otherwise ignored.
    pub fn init_logger(config: &Config) {
        let level = config.log_level_filter;

        simplelog::TermLogger::init(
            Self::to_simplelog(level),
            Self::build_log_config(level),
            simplelog::TerminalMode::Mixed,
            simplelog::ColorChoice::Auto,
        )
        .unwrap_or_else(|err| eprintln!("Logger already initialized: {err}"));
    }

    fn to_simplelog(level: LevelFilter) -> simplelog::LevelFilter {
        match level {
            LevelFilter::Off => simplelog::LevelFilter::Off,
            LevelFilter::Error => simplelog::LevelFilter::Error,
            LevelFilter::Warn => simplelog::LevelFilter::Warn,
            LevelFilter::Info => simplelog::LevelFilter::Info,
            LevelFilter::Debug => simplelog::LevelFilter::Debug,
            LevelFilter::Trace => simplelog::LevelFilter::Trace,
        }
    }

    fn quiet_dependencies(level: LevelFilter) -> &'static [&'static str] {
        if level == LevelFilter::Trace {
            &[]
        } else {
            QUIET_DEPENDENCIES
        }
    }

    fn build_log_config(level: LevelFilter) -> simplelog::Config {
        let mut builder = ConfigBuilder::new();
        builder.set_time_format_rfc3339();
        for module in Self::quiet_dependencies(level) {
            builder.add_filter_ignore_str(module);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_crates_are_quiet_below_trace() {
        for level in [
            LevelFilter::Error,
            LevelFilter::Warn,
            LevelFilter::Info,
            LevelFilter::Debug,
        ] {
            let quiet = Logger::quiet_dependencies(level);
            assert!(quiet.contains(&"reqwest"), "{level} should quiet reqwest");
            assert!(
                quiet.contains(&"eventsource_client"),
                "{level} should quiet the SSE client"
            );
        }
    }

    #[test]
    fn test_trace_shows_everything() {
        assert!(Logger::quiet_dependencies(LevelFilter::Trace).is_empty());
    }

    #[test]
    fn test_build_log_config_for_every_level() {
        for level in [LevelFilter::Info, LevelFilter::Trace] {
            let _config = Logger::build_log_config(level);
        }
    }

    #[test]
    fn test_level_conversion_preserves_ordering() {
        let levels = [
            LevelFilter::Off,
            LevelFilter::Error,
            LevelFilter::Warn,
            LevelFilter::Info,
            LevelFilter::Debug,
            LevelFilter::Trace,
        ];
        for pair in levels.windows(2) {
            assert!(Logger::to_simplelog(pair[0]) < Logger::to_simplelog(pair[1]));
        }
    }
}
