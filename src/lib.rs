pub mod domains;
pub mod errors;

pub use domains::export::{ExportConfig, ExportService};

/// Set up `env_logger`, defaulting RUST_LOG to debug in debug builds and info otherwise.
/// Safe to call more than once.
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        #[cfg(debug_assertions)]
        std::env::set_var("RUST_LOG", "debug");
        #[cfg(not(debug_assertions))]
        std::env::set_var("RUST_LOG", "info");
    }
    let _ = env_logger::try_init();
}
