//! Tracing subscriber setup

use tracing::{span, Level, Span};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing system
///
/// Honors `RUST_LOG`, defaulting to `info`. Fails if a global subscriber is
/// already installed.
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .compact()
        .with_thread_names(true)
        .with_level(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

/// Span covering one cache lookup
pub fn lookup_span(key: &str, exclusive: bool) -> Span {
    span!(Level::DEBUG, "handle_lookup", key = %key, exclusive = exclusive)
}
