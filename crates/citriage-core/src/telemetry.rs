//! Tracing initialisation for the citriage binary.
//!
//! Call [`init_tracing`] once at program start. Later calls are ignored
//! because the global subscriber can only be set once per process.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON, each line carrying the enclosing
///   `triage` span (and so its `run_id`), which CI log collectors parse.
/// * `level`: default verbosity when `RUST_LOG` is not set.
///
/// Logs go to stderr so that command output on stdout stays machine-readable.
/// Colour is off inside GitHub Actions, whose log viewer prints escape codes.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.json().with_current_span(true).with_span_list(false))
            .try_init()
            .ok();
    } else {
        let ansi = use_ansi(std::env::var("GITHUB_ACTIONS").ok().as_deref());
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.with_ansi(ansi))
            .try_init()
            .ok();
    }
}

fn use_ansi(github_actions: Option<&str>) -> bool {
    !matches!(github_actions, Some(v) if v.eq_ignore_ascii_case("true"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing(false, Level::WARN);
        init_tracing(true, Level::DEBUG);
        tracing::info!("still logging");
    }

    #[test]
    fn test_colour_disabled_in_actions() {
        assert!(use_ansi(None));
        assert!(use_ansi(Some("false")));
        assert!(!use_ansi(Some("true")));
    }
}
