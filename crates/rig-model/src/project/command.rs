use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Failure attribution class of a command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandType {
    #[default]
    Test,
    System,
    Setup,
}

impl CommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::Test => "test",
            CommandType::System => "system",
            CommandType::Setup => "setup",
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of a command script.
///
/// Either names a registered command (`command`) or a project function (`func`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandConf {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub command_type: Option<CommandType>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
    /// Expansions applied while the commands of a function run.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, String>,
    #[serde(default, rename = "func", skip_serializing_if = "String::is_empty")]
    pub function: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl CommandConf {
    pub fn command(name: impl Into<String>) -> Self {
        Self {
            command: name.into(),
            ..Default::default()
        }
    }

    pub fn function(name: impl Into<String>) -> Self {
        Self {
            function: name.into(),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, command_type: CommandType) -> Self {
        self.command_type = Some(command_type);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    #[inline]
    pub fn is_function(&self) -> bool {
        !self.function.is_empty()
    }
}
