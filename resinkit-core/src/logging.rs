/// Structured logging setup
///
/// Configures a single global `tracing` subscriber for the process, choosing
/// JSON or human-readable rendering the same way the original service's
/// `core/logging.py` chose between structlog's JSON and console renderers.
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Settings;

/// Initializes the global tracing subscriber. Call once, at process start.
pub fn init(settings: &Settings) {
    let filter = EnvFilter::try_new(&settings.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt().with_env_filter(filter);

    if settings.log_json_format {
        subscriber.json().with_current_span(true).init();
    } else {
        subscriber.init();
    }
}

#[cfg(test)]
mod tests {
    // `tracing_subscriber`'s global subscriber can only be installed once
    // per process, so this module has no executable tests; init() is
    // exercised via the binary's main().
}
