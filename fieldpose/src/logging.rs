use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Console logging with `RUST_LOG` filtering. Call once at process
/// start.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_ansi(!cfg!(windows)))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}
