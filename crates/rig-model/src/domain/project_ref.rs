use serde::{Deserialize, Serialize};

/// Controller-side project settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectRef {
    pub id: String,
    pub identifier: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
}
