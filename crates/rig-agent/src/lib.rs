//! Task execution core of the agent.
//!
//! [`Agent`] polls the controller and drives each task through its setup, main and teardown
//! blocks. A [`TaskContext`] holds the per-run state shared between the execution loop, the
//! [`HeartbeatTicker`] and the timeout watchdogs; all of them stop the run through one
//! [`StopSignal`].

mod error;
pub use error::AgentError;

mod options;
pub use options::{AgentOptions, Mode};

pub mod signal;
pub use signal::{Signal, StopSignal, StopTarget};

pub mod timeout;
pub use timeout::{ActivityClock, DEFAULT_CALLBACK_TIMEOUT, DEFAULT_EXEC_TIMEOUT, DEFAULT_IDLE_TIMEOUT};

pub mod oom;
pub use oom::{DmesgOomTracker, NoopOomTracker, OomTracker};

mod context;
pub use context::{CONTAINER_PROVIDERS, RunState, TaskContext, TimeoutInfo};

mod heartbeat;
pub use heartbeat::HeartbeatTicker;

mod logger;
pub use logger::TaskLogger;

mod agent;
pub use agent::Agent;

mod runner;
