use std::{collections::BTreeMap, io};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use rig_core::{
    Command, CommandBase, CommandError, Communicator, CoreError, LoggerProducer, TaskConfig,
    command::decode_params,
};
use rig_model::ModelError;

use crate::ExecError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct Update {
    key: String,
    value: String,
    /// Append to the current value instead of replacing it.
    concat: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct UpdateParams {
    updates: Vec<Update>,
    /// YAML mapping of keys to values, relative to the working directory.
    file: String,
    ignore_missing_file: bool,
}

/// `expansions.update`: set expansions inline or from a YAML file.
#[derive(Debug, Default)]
pub struct ExpansionsUpdate {
    base: CommandBase,
    params: UpdateParams,
}

impl ExpansionsUpdate {
    pub const NAME: &'static str = "expansions.update";
}

#[async_trait]
impl Command for ExpansionsUpdate {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn base(&self) -> &CommandBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut CommandBase {
        &mut self.base
    }

    fn parse_params(&mut self, params: &Map<String, Value>) -> Result<(), CoreError> {
        let params: UpdateParams = decode_params(Self::NAME, params)?;
        if let Some(u) = params.updates.iter().find(|u| u.key.is_empty()) {
            return Err(CoreError::ParamDecode {
                command: Self::NAME.into(),
                reason: format!("update with value '{}' has no key", u.value),
            });
        }
        self.params = params;
        Ok(())
    }

    async fn execute(
        &self,
        _cancel: CancellationToken,
        _comm: &dyn Communicator,
        logger: &dyn LoggerProducer,
        conf: &TaskConfig,
    ) -> Result<(), CommandError> {
        conf.update_expansions(|exp| -> Result<(), ModelError> {
            for u in &self.params.updates {
                if u.concat.is_empty() {
                    let value = exp.expand(&u.value)?;
                    exp.put(&u.key, value);
                } else {
                    let tail = exp.expand(&u.concat)?;
                    let value = format!("{}{}", exp.get(&u.key).unwrap_or_default(), tail);
                    exp.put(&u.key, value);
                }
            }
            Ok(())
        })
        .map_err(ExecError::from)?;

        if self.params.file.is_empty() {
            return Ok(());
        }

        let path = conf.work_dir.join(conf.expand(&self.params.file).map_err(ExecError::from)?);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound && self.params.ignore_missing_file => {
                logger.execution().info(format!(
                    "Expansions file '{}' does not exist; skipping.",
                    path.display()
                ));
                return Ok(());
            }
            Err(e) => return Err(ExecError::from(e).into()),
        };

        let values: BTreeMap<String, String> = serde_yaml::from_str(&content).map_err(|e| {
            ExecError::InvalidParams(format!("parsing '{}': {e}", path.display()))
        })?;
        conf.update_expansions(|exp| {
            exp.update(values.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        });
        logger.execution().info(format!(
            "Updated {} expansions from '{}'.",
            values.len(),
            path.display()
        ));
        Ok(())
    }
}
