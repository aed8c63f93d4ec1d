// src/logging.rs
//
// Tracing subscriber setup, grounded on chopin-core's `init_logging()`.
// `RUST_LOG` drives the filter; defaults to `info` when unset. Idempotent
// via `std::sync::Once` since workers call it once each at startup but
// the subscriber must only be installed a single time per process.

use std::sync::Once;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Installs the global tracing subscriber. Safe to call from every
/// worker thread's startup path; only the first call takes effect.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}

/// JSON-formatted logging, for deployments feeding a log aggregator.
pub fn init_json() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init(); // must not panic on a second call
    }
}
