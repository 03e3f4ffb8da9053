//! Logging setup for civicgate
//!
//! Structured tracing with env-filter overrides. Host applications that
//! install their own subscriber can skip this; `init` is a no-op when a
//! global subscriber is already set.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing with the given default level for this crate.
///
/// `RUST_LOG` takes precedence when set.
pub fn init(log_level: &str) {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("civicgate={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
