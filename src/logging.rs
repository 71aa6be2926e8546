use tracing_subscriber::{EnvFilter, fmt};

/// Initialize structured logging for the current process.
///
/// `RUST_LOG` wins when set; otherwise the daemon runs at `wirebot=info`
/// and one-off CLI commands stay at `warn` so pipeline output isn't
/// drowned out.
pub fn init(verbose: bool) {
    let default_filter = if verbose { "wirebot=info,warn" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = fmt()
        .with_env_filter(filter)
        .compact()
        .with_target(false)
        .try_init();
}
