use serde::{Deserialize, Serialize};

/// Task document as handed to the agent by the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Task {
    pub id: String,
    pub display_name: String,
    pub execution: u32,
    /// Version the task belongs to. Empty for malformed documents.
    pub version: String,
    pub requester: String,
    pub build_id: String,
    pub build_variant: String,
    /// Project id.
    pub project: String,
    pub distro_id: String,
    /// Task group name, empty when the task is not part of a group.
    pub task_group: String,
}

impl Task {
    #[inline]
    pub fn in_task_group(&self) -> bool {
        !self.task_group.is_empty()
    }
}

/// Known requester values.
pub mod requester {
    pub const REPOTRACKER: &str = "gitter_request";
    pub const PATCH: &str = "patch_request";
    pub const GITHUB_PR: &str = "github_pull_request";
    pub const GITHUB_MERGE: &str = "github_merge_request";
    pub const TRIGGER: &str = "trigger_request";
    pub const AD_HOC: &str = "ad_hoc";

    /// Requesters whose versions carry GitHub patch metadata.
    pub fn is_github_patch_requester(requester: &str) -> bool {
        requester == GITHUB_PR || requester == GITHUB_MERGE
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn github_requesters() {
            assert!(is_github_patch_requester(GITHUB_PR));
            assert!(is_github_patch_requester(GITHUB_MERGE));
            assert!(!is_github_patch_requester(PATCH));
            assert!(!is_github_patch_requester(""));
        }
    }
}
