use tracing_subscriber::{prelude::*, util::SubscriberInitExt, EnvFilter};

/// Log to stderr, filtered by `RUST_LOG`. Records emitted through `log` by
/// the tracer end up here too.
pub(crate) fn tracing() {
    tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_filter(EnvFilter::from_default_env()),
        )
        .init();
}
