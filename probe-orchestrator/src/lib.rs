//! Orchestration core: the root supervisor, the FIFO admission queue, the
//! per-test execution state machine, and the control-plane router. Agents
//! communicate exclusively through typed mailboxes; at most one test is in
//! a non-terminal state at any time.

pub mod children;
pub mod error;
pub mod fsm;
pub mod queue;
pub mod router;
pub mod status;
pub mod supervisor;

pub use children::TestChildren;
pub use error::OrchestratorError;
pub use fsm::FsmTimers;
pub use router::{router, AppState};
pub use supervisor::{spawn_supervisor, SupervisorHandle, SupervisorSettings};
