//! Tracing initialization for binaries
//!
//! Provides centralized tracing setup with environment-based filtering.
//! Integration tests carry their own guarded variant in the shared test
//! utilities, where the test runner can reach it.

/// Initialize tracing for binaries with environment-based filtering
///
/// Call this early in main() to enable tracing throughout the application.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ordaiq=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .init();
}
