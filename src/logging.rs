use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_ENV: &str = "KARIKARI_LOG";

/// stdout carries the IPC protocol, so logs always go to stderr.
/// Filter comes from `KARIKARI_LOG`, then `RUST_LOG`, then `info`.
pub fn init() {
    let filter = std::env::var(LOG_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    init_with_filter(&filter);
}

pub fn init_with_filter(filter: &str) {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_level(true)
        .compact()
        .with_writer(std::io::stderr);

    let filter_layer = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));

    // A second init (tests) is a no-op.
    let _ = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init();
}
