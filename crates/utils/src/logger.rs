use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

const DEFAULT_DIRECTIVES: &str = "gcsim=info,gcsim_runtime=warn";

/// Initialise tracing subscriber once per process.
pub fn init_logging() {
    init_logging_with_default(DEFAULT_DIRECTIVES);
}

/// Same as [`init_logging`], but with caller-supplied fallback directives that
/// apply when `RUST_LOG` is unset.
pub fn init_logging_with_default(directives: &str) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

        fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    });
}
