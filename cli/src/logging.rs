//! Tracing subscriber setup from `LOG_LEVEL` / `LOG_FORMAT`.

use config::LogFormat;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `level` is an env-filter directive
/// (e.g. `info`, `debug`, `skein=debug`); bad directives fall back to `info`.
/// With `enable_tracing`, span lifecycle events are logged too.
pub fn init(level: &str, format: LogFormat, enable_tracing: bool) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let span_events = if enable_tracing {
        tracing_subscriber::fmt::format::FmtSpan::NEW | tracing_subscriber::fmt::format::FmtSpan::CLOSE
    } else {
        tracing_subscriber::fmt::format::FmtSpan::NONE
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(span_events)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}
