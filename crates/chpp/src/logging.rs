use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// Crates whose events follow `--log-level`. Dependencies stay at warnings.
const CHPP_TARGETS: [&str; 4] = ["chpp", "chpp_app", "chpp_transport", "chpp_link"];

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// `warn` for everything, `level` for the chpp crates.
fn default_directives(level: LogLevel) -> String {
    std::iter::once("warn".to_string())
        .chain(
            CHPP_TARGETS
                .iter()
                .map(|target| format!("{target}={}", level.directive())),
        )
        .collect::<Vec<_>>()
        .join(",")
}

/// `RUST_LOG` wins when set; otherwise the chpp crates log at `level`.
fn env_filter(level: LogLevel) -> EnvFilter {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::new(directives),
        _ => EnvFilter::new(default_directives(level)),
    }
}

/// Install the stderr subscriber. Stdout stays reserved for command output.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter(level))
        .with_ansi(false)
        .with_thread_names(true)
        .with_target(matches!(level, LogLevel::Debug | LogLevel::Trace));

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chpp_crates_follow_the_requested_level() {
        assert_eq!(
            default_directives(LogLevel::Debug),
            "warn,chpp=debug,chpp_app=debug,chpp_transport=debug,chpp_link=debug"
        );
    }

    #[test]
    fn quiet_level_still_names_every_crate() {
        let directives = default_directives(LogLevel::Error);
        for target in CHPP_TARGETS {
            assert!(directives.contains(&format!("{target}=error")));
        }
    }
}
