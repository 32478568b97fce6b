//! Shared utilities.

pub mod clock;
pub mod telemetry;
pub mod url;

pub use clock::now_ms;
pub use telemetry::init_tracing;
pub use url::domain_of;
