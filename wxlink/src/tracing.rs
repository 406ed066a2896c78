//! Logging setup and prelude.
//!
//! Protocol modules pull in `crate::tracing::prelude::*` rather than
//! importing macros from the `tracing` crate piecemeal.

/// Common tracing macros used throughout the crate.
pub mod prelude {
    pub use ::tracing::{debug, error, info, trace, warn};
}

use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber for binaries.
///
/// Honors `RUST_LOG`; defaults to `info` when unset.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
