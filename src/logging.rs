use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber. `RUST_LOG` controls filtering,
/// defaulting to `info` for the service itself.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,clinic_comms_service=info"));

    // try_init so tests can call this more than once
    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}
