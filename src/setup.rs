use env_logger::Builder;
use log::LevelFilter;
pub use log::{debug, info, warn};

/// Init the logger for binaries and demos
pub fn init() {
    let mut builder = Builder::from_default_env();
    builder.filter(None, LevelFilter::Info).init();
}

/// Init the logger in tests, where it may already be set
pub fn init_for_tests() {
    let mut builder = Builder::from_default_env();
    let _ = builder.filter(None, LevelFilter::Debug).is_test(true).try_init();
}
