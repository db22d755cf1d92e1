mod kv;
pub use kv::KeyValue;

mod expansions;
pub use expansions::Expansions;

mod task;
pub use task::{Task, requester};

mod project_ref;
pub use project_ref::ProjectRef;

mod distro;
pub use distro::{CLONE_METHOD_LEGACY_SSH, CLONE_METHOD_OAUTH, DistroView};

mod patch;
pub use patch::{GithubMergeGroup, GithubPatch, Patch};

mod credentials;
pub use credentials::{Ec2Key, S3Credentials};

/// Name of a project task group.
pub type TaskGroupName = String;

/// Timeout value in seconds, as written in project definitions.
pub type TimeoutSecs = u64;
