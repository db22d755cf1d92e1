use serde::{Deserialize, Serialize};

/// GitHub pull request metadata attached to a patch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubPatch {
    pub pr_number: u64,
    pub base_owner: String,
    pub base_repo: String,
    pub base_branch: String,
    pub head_owner: String,
    pub head_repo: String,
    pub head_hash: String,
    pub author: String,
}

/// GitHub merge queue metadata attached to a patch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubMergeGroup {
    pub org: String,
    pub repo: String,
    pub base_sha: String,
    pub head_ref: String,
    pub head_sha: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Patch {
    pub id: String,
    pub github_patch_data: GithubPatch,
    pub github_merge_data: GithubMergeGroup,
}
