//! Structured logging setup for the `kb` binary.
//!
//! The library only emits `tracing` events; installing a subscriber is the
//! binary's job. Logs go to stderr so command output on stdout stays
//! machine-readable.
//!
//! `RUST_LOG` takes precedence over the configured level:
//! ```bash
//! RUST_LOG=debug kb update
//! RUST_LOG=knowledge_harness::index=trace kb init
//! ```

use std::sync::Once;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// HH:MM:SS.mmm
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Install the global subscriber. Only the first call takes effect.
pub fn init(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"))
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_timer(CompactTime)
            .with_filter(filter);

        // A subscriber may already be installed by an embedding application.
        let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
    });
}
