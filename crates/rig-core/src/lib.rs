//! Task execution contracts shared by the agent crates.
//!
//! - [`Command`] and [`CommandRegistry`]: executable units and how project command references resolve to them;
//! - [`TaskConfig`]: read-mostly snapshot of everything a task run needs;
//! - [`Communicator`] and [`LoggerProducer`]: seams to the controller and to the log pipeline.

pub mod error;
pub use error::CoreError;

pub mod comm;
pub use comm::{CommError, Communicator};

pub mod logging;
pub use logging::{LoggerProducer, StreamLogger, TracingLogger};

pub mod command;
pub use command::{Command, CommandBase, CommandError, CommandFactory};

pub mod registry;
pub use registry::CommandRegistry;

pub mod config;
pub use config::{TaskConfig, TaskSetup, Timeout};

pub mod baggage;
pub use baggage::{Baggage, BaggageMember};

pub mod system;

#[cfg(any(test, feature = "mock"))]
pub mod mock;
