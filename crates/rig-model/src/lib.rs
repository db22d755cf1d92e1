//! Serde domain model shared by the agent crates.
//!
//! - [`domain`]: task document, project ref, distro view, patch metadata, expansions.
//! - [`project`]: the declarative project definition and its command references.
//! - [`api`]: payloads exchanged with the controller.

mod error;
pub use error::ModelError;

pub mod api;
pub mod domain;
pub mod project;

pub use api::*;
pub use domain::*;
pub use project::*;
