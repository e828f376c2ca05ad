//! Tracing and logging setup shared by the gateway and worker binaries.

pub mod logging;

pub use logging::LogFormat;

/// Initialize process-wide logging from `RUST_LOG` and `LOG_FORMAT`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    logging::init(LogFormat::from_env());
}
