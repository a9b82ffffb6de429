use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber, filtered by `RUST_LOG`
/// (default `workgraph=info`).
///
/// Safe to call more than once; subsequent calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("workgraph=info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
