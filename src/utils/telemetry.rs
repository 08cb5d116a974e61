use std::io::IsTerminal as _;

use rama::telemetry::tracing::{
    self,
    metadata::LevelFilter,
    subscriber::{EnvFilter, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _},
};

use crate::Args;

/// Configures structured logging with runtime control via `RUST_LOG` environment variable.
///
/// Defaults to INFO level to balance visibility with performance.
/// Use `RUST_LOG=debug` or `RUST_LOG=trace` for troubleshooting.
pub fn init_tracing(args: &Args) {
    let directive = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    }
    .into();

    if args.pretty {
        tracing::subscriber::fmt()
            .pretty()
            .with_ansi(std::io::stderr().is_terminal())
            .with_env_filter(
                EnvFilter::builder()
                    .with_default_directive(directive)
                    .from_env_lossy(),
            )
            .init();
    } else {
        tracing::subscriber::registry()
            .with(fmt::layer())
            .with(
                EnvFilter::builder()
                    .with_default_directive(directive)
                    .from_env_lossy(),
            )
            .init();
    }

    tracing::info!("tracing is set up");
}
