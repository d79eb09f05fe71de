use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the fmt subscriber, filtered by `RUST_LOG` (`info` when unset).
///
/// Events go to stderr so stdout stays free for command output.
pub fn init(verbose: bool) {
    let default = if verbose { "seedgraph=debug,info" } else { "info" };
    // try_init: a second call (e.g. from tests) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init();
}
