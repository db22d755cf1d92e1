use serde::{Deserialize, Serialize};

pub const CLONE_METHOD_OAUTH: &str = "oauth";
pub const CLONE_METHOD_LEGACY_SSH: &str = "legacy-ssh";

/// Subset of the distro settings visible to the agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistroView {
    pub clone_method: String,
    pub disable_shallow_clone: bool,
    pub mountpoints: Vec<String>,
}
