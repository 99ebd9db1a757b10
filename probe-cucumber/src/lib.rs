//! BDD runner adapter: executes Gherkin scenarios against the streaming
//! registry through the `cucumber` crate, on a dedicated blocking thread so
//! synchronous step code can drive the async streams. The JSON report is
//! written into the evidence directory and parsed for the outcome.

pub mod dsl;
pub mod error;
pub mod runner;
pub mod world;

pub use dsl::DslContext;
pub use error::{DslError, RunnerError};
pub use runner::{run, RunRequest, RunResult};
pub use world::ProbeWorld;
