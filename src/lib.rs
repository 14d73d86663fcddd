// src/lib.rs
// Public library surface for the service binary, the one-shot tool, and integration tests.

pub mod api;
pub mod app;
pub mod bot;
pub mod config;
pub mod conversation;
pub mod generate;
pub mod ingest;
pub mod metrics;
pub mod publish;
pub mod schedule;
pub mod telegram;

// ---- Re-exports for stable public API ----
pub use crate::api::create_router;
pub use crate::app::Services;
pub use crate::config::AppConfig;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber. `LOG_FORMAT=json` switches to JSON lines.
/// Uses `try_init`, so a subscriber already installed by the host runtime wins.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("channel_digest_bot=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
