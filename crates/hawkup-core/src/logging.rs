//! Logging init: stderr subscriber with a filter derived from the config.

use tracing_subscriber::EnvFilter;

/// Maps a config log level string to a tracing filter directive.
///
/// The config levels follow the daemon's historical severity names;
/// `critical` folds into `error`, `message` is the normal operational level.
/// Unknown strings fall back to `message` with a note on stderr.
fn level_directive(log_level: &str) -> &'static str {
    match log_level {
        "error" | "critical" => "error",
        "warning" => "warn",
        "message" => "info",
        "info" => "debug",
        "debug" => "trace",
        other => {
            eprintln!("invalid log level '{other}' given, defaulting to level \"message\"");
            "info"
        }
    }
}

/// Installs the global subscriber writing to stderr.
///
/// `debug` overrides the configured level with the most verbose filter.
/// `output_systemd` drops timestamps since the journal adds its own.
/// `RUST_LOG` takes precedence over both when set.
pub fn setup_logging(log_level: &str, debug: bool, output_systemd: bool) {
    let directive = if debug { "trace" } else { level_directive(log_level) };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false);

    if output_systemd {
        builder.without_time().init();
    } else {
        builder.init();
    }
}
