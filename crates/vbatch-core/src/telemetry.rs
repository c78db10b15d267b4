//! Log output for the `vbatch` binary.
//!
//! Filter precedence: `VBATCH_LOG`, then `RUST_LOG`, then the level chosen
//! on the command line. The HTTP and SMTP stacks used by alerting are held
//! at `warn` unless a directive names them.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable read before `RUST_LOG`.
pub const LOG_ENV: &str = "VBATCH_LOG";

const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "rustls", "lettre"];

/// Directive string used when no environment override is present.
pub fn default_filter(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = vec![level];
    directives.extend(QUIET_TARGETS.iter().map(|target| format!("{target}=warn")));
    directives.join(",")
}

/// Pick the directive string from the two environment values, if any.
fn select_directives(vbatch_log: Option<String>, rust_log: Option<String>, level: Level) -> String {
    vbatch_log
        .into_iter()
        .chain(rust_log)
        .map(|raw| raw.trim().to_string())
        .find(|raw| !raw.is_empty())
        .unwrap_or_else(|| default_filter(level))
}

fn build_filter(directives: &str, level: Level) -> EnvFilter {
    EnvFilter::try_new(directives).unwrap_or_else(|err| {
        eprintln!("vbatch: ignoring invalid log filter {directives:?}: {err}");
        EnvFilter::new(default_filter(level))
    })
}

/// Install the global subscriber. Later calls are no-ops.
///
/// Logs go to stderr; stdout carries reports and `--json` output.
pub fn init_tracing(json: bool, level: Level) {
    let directives = select_directives(
        std::env::var(LOG_ENV).ok(),
        std::env::var("RUST_LOG").ok(),
        level,
    );
    let filter = build_filter(&directives, level);

    let plain = (!json).then(|| fmt::layer().with_target(false).with_writer(std::io::stderr));
    let structured = json.then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .json()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(structured)
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_quiets_network_crates() {
        let filter = default_filter(Level::DEBUG);
        assert!(filter.starts_with("debug,"));
        assert!(filter.contains("reqwest=warn"));
        assert!(filter.contains("lettre=warn"));
        assert!(EnvFilter::try_new(&filter).is_ok());
    }

    #[test]
    fn test_vbatch_log_wins_over_rust_log() {
        let picked = select_directives(
            Some("vbatch_core=trace".into()),
            Some("error".into()),
            Level::INFO,
        );
        assert_eq!(picked, "vbatch_core=trace");

        let picked = select_directives(Some("  ".into()), Some("error".into()), Level::INFO);
        assert_eq!(picked, "error");

        let picked = select_directives(None, None, Level::WARN);
        assert_eq!(picked, default_filter(Level::WARN));
    }

    #[test]
    fn test_invalid_directive_falls_back() {
        assert!(EnvFilter::try_new("vbatch_core=notalevel").is_err());
        let filter = build_filter("vbatch_core=notalevel", Level::INFO);
        assert!(filter.to_string().contains("reqwest=warn"));
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_tracing(false, Level::WARN);
        init_tracing(true, Level::DEBUG);
    }
}
