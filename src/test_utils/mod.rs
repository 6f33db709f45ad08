//! Shared components for unit tests: the mock bus, notification
//! recording, and on-disk fixtures.

mod fixtures;
mod mock_bus;
mod recorder;

pub use fixtures::*;
pub use mock_bus::*;
pub use recorder::*;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
}
