//! Log subscriber for the `trellis` binary.
//!
//! `RUST_LOG` overrides the default filter. Logs go to stderr so command
//! output on stdout stays machine-readable.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_FILTER: &str = "trellis=info";

/// Install the global subscriber. A second call is a no-op.
pub fn init(verbose: bool) {
    let fallback = if verbose { "trellis=debug" } else { DEFAULT_FILTER };
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
}
