//! Sentinel VMS: real-time person tracking and face identification for
//! camera feeds.
//!
//! The workspace crates are re-exported here so integration tests and
//! embedders can depend on one package.

pub use common;
pub use identity;
pub use surveillance_node;
pub use telemetry;
