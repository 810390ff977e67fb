//! Optional tracing hooks.
//!
//! Enable with `--features tracing`. The only emission points are channel
//! constructors; push/pop never log, so the hot path stays allocation- and
//! syscall-free whether or not the feature is on. With the feature disabled
//! every macro below compiles to nothing.

/// Initialize a tracing subscriber suitable for tests and examples.
///
/// Honors `RUST_LOG` when set, otherwise enables `quadring=debug`. Does
/// nothing if the `tracing` feature is not enabled.
#[cfg(feature = "tracing")]
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("quadring=debug"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_timer(fmt::time::uptime()),
        )
        .with(filter)
        .init();
}

/// Initialize a tracing subscriber suitable for tests and examples.
///
/// No-op: the `tracing` feature is not enabled.
#[cfg(not(feature = "tracing"))]
pub const fn init_tracing() {}

#[cfg(feature = "tracing")]
pub(crate) use tracing::debug;

#[cfg(not(feature = "tracing"))]
macro_rules! debug_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
pub(crate) use debug_noop as debug;
