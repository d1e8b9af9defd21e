//! Tracing subscriber setup for binaries and tests embedding the core.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default directives when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVES: &str = "info,cloudviz_core=info,reqwest=warn,hyper=warn";

/// Install a global fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_directives`. Returns `false` if a subscriber was already set.
pub fn init_tracing(default_directives: &str) -> bool {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directives.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
