//! Logging initialization.
//!
//! A thin wrapper over `tracing-subscriber`: console output with an
//! `EnvFilter` taken from `RUST_LOG`, or a no-op sink when logging is
//! disabled. Initialization is best-effort so an application that already
//! installed its own subscriber keeps it.

use std::io::IsTerminal;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// With `disabled` set, all scheduler logging is routed to an `off` filter.
pub fn init_logging(disabled: bool) {
    let filter = if disabled {
        EnvFilter::new("off")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let use_ansi = std::io::stdout().is_terminal();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_ansi(use_ansi)
                .with_target(true)
                .with_level(true),
        )
        .try_init();
}
