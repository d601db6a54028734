//! Tracing initialization (SPEC_FULL.md §2, AMBIENT).
//!
//! Grounded on the teacher's `main.rs::init_tracing`: an `EnvFilter` layered
//! registry, falling back to a crate-scoped default directive instead of a
//! bare level when `RUST_LOG`/`LOG_LEVEL` isn't set.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initializes the global tracing subscriber. `default_level` is used only
/// when neither `RUST_LOG` nor a prior subscriber is already configured.
pub fn init(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("capitol_mirror={default_level},{default_level}").into()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
