// Library root: everything the binary wires together, exposed for
// integration tests. The binary entry point is src/main.rs.

pub mod channels;
pub mod clock;
pub mod component_ids;
pub mod config;
pub mod error;
pub mod interaction;
pub mod logger;
pub mod rate_limit;
pub mod runtime;

#[cfg(feature = "plugin-eval")]
pub mod eval;
