use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::CommandConf;

/// Block of command references.
///
/// In YAML a block is either a single mapping or a sequence of mappings; both are exposed as a list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandSet(Vec<CommandConf>);

impl CommandSet {
    pub fn new(commands: Vec<CommandConf>) -> Self {
        Self(commands)
    }

    pub fn single(command: CommandConf) -> Self {
        Self(vec![command])
    }

    pub fn list(&self) -> &[CommandConf] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandConf> {
        self.0.iter()
    }
}

impl From<Vec<CommandConf>> for CommandSet {
    fn from(commands: Vec<CommandConf>) -> Self {
        Self(commands)
    }
}

impl Serialize for CommandSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CommandSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Many(Vec<CommandConf>),
            One(CommandConf),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Many(list) => CommandSet(list),
            Repr::One(one) => CommandSet(vec![one]),
        })
    }
}
