use std::{collections::HashMap, time::Duration};

use parking_lot::RwLock;
use tracing::{instrument, trace};

use rig_model::{BlockType, CommandConf, CommandType, Project};

use crate::{Command, CommandFactory, CoreError};

/// Name-to-factory table used to turn command references into runnable commands.
#[derive(Default)]
pub struct CommandRegistry {
    cmds: RwLock<HashMap<String, CommandFactory>>,
}

impl CommandRegistry {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_command(
        &self,
        name: impl Into<String>,
        factory: CommandFactory,
    ) -> Result<(), CoreError> {
        let name = name.into();
        if name.is_empty() {
            return Err(CoreError::InvalidArgument(
                "cannot register a command without a name".into(),
            ));
        }

        let mut cmds = self.cmds.write();
        if cmds.contains_key(&name) {
            return Err(CoreError::DuplicateKey(name));
        }
        trace!(command = %name, "command registered");
        cmds.insert(name, factory);
        Ok(())
    }

    pub fn get_command_factory(&self, name: &str) -> Option<CommandFactory> {
        self.cmds.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.cmds.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cmds.read().is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cmds.read().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.cmds.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Render a standalone command reference.
    ///
    /// The project's `pre` and `post` hooks come first, each entry named after its block,
    /// followed by the commands `conf` resolves to.
    #[instrument(level = "trace", skip_all, fields(command = %conf.command, func = %conf.function))]
    pub fn render_commands(
        &self,
        conf: &CommandConf,
        project: &Project,
    ) -> Result<Vec<Box<dyn Command>>, CoreError> {
        let mut out = Vec::new();

        if let Some(pre) = &project.pre {
            out.extend(self.render_block(BlockType::Pre, pre.list(), project)?);
        }
        if let Some(post) = &project.post {
            out.extend(self.render_block(BlockType::Post, post.list(), project)?);
        }

        if conf.is_function() {
            out.extend(self.render_function(conf, project)?);
        } else {
            let display = match conf.display_name.as_str() {
                "" => conf.command.clone(),
                name => name.to_string(),
            };
            out.push(self.instantiate(conf, None, display, project)?);
        }
        Ok(out)
    }

    /// Render the commands of one block, in order.
    ///
    /// Entries are named `'<command>' in <block> (#<n>)`; function references expand in place.
    pub fn render_block(
        &self,
        block: BlockType,
        commands: &[CommandConf],
        project: &Project,
    ) -> Result<Vec<Box<dyn Command>>, CoreError> {
        let mut out = Vec::with_capacity(commands.len());
        for (idx, conf) in commands.iter().enumerate() {
            if conf.is_function() {
                out.extend(self.render_function(conf, project)?);
                continue;
            }
            let display = format!("'{}' in {} (#{})", label(conf), block, idx + 1);
            out.push(self.instantiate(conf, None, display, project)?);
        }
        Ok(out)
    }

    /// Entries are named `'<command>' in function '<name>'`, or after the call's own
    /// display name when it has one.
    fn render_function(
        &self,
        call: &CommandConf,
        project: &Project,
    ) -> Result<Vec<Box<dyn Command>>, CoreError> {
        let name = call.function.as_str();
        let body = project
            .function(name)
            .ok_or_else(|| CoreError::UnknownCommand(format!("function '{name}'")))?;

        let scope = match call.display_name.as_str() {
            "" => format!("function '{name}'"),
            display => format!("'{display}'"),
        };
        let total = body.len();
        let mut out = Vec::with_capacity(total);
        for (idx, conf) in body.iter().enumerate() {
            if conf.is_function() {
                return Err(CoreError::InvalidArgument(format!(
                    "function '{name}' references function '{}'; nested functions are not supported",
                    conf.function
                )));
            }
            let display = if total == 1 {
                format!("'{}' in {scope}", label(conf))
            } else {
                format!("'{}' in {scope} (#{})", label(conf), idx + 1)
            };
            out.push(self.instantiate(conf, Some(call), display, project)?);
        }
        Ok(out)
    }

    /// Build one command from `conf`; `call` is the function reference it was expanded from.
    fn instantiate(
        &self,
        conf: &CommandConf,
        call: Option<&CommandConf>,
        display: String,
        project: &Project,
    ) -> Result<Box<dyn Command>, CoreError> {
        if conf.command.is_empty() {
            return Err(CoreError::InvalidArgument(
                "command reference names neither a command nor a function".into(),
            ));
        }
        let factory = self
            .get_command_factory(&conf.command)
            .ok_or_else(|| CoreError::UnknownCommand(conf.command.clone()))?;

        let mut cmd = factory();
        cmd.parse_params(&conf.params)?;

        let command_type = resolve_type(
            conf.command_type.or(call.and_then(|c| c.command_type)),
            project,
        );
        let timeout = conf
            .timeout_secs
            .or(call.and_then(|c| c.timeout_secs))
            .unwrap_or_default();

        let base = cmd.base_mut();
        base.set_display_name(display);
        base.set_command_type(command_type);
        base.set_idle_timeout(Duration::from_secs(timeout));
        if let Some(call) = call {
            let mut vars = conf.vars.clone();
            vars.extend(call.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
            base.set_function_vars(vars);
        } else if !conf.vars.is_empty() {
            base.set_function_vars(conf.vars.clone());
        }
        Ok(cmd)
    }
}

fn resolve_type(declared: Option<CommandType>, project: &Project) -> CommandType {
    declared.or(project.command_type).unwrap_or_default()
}

fn label(conf: &CommandConf) -> &str {
    match conf.display_name.as_str() {
        "" => &conf.command,
        name => name,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rig_model::CommandSet;

    use super::*;
    use crate::mock::MockCommand;

    fn mock_factory() -> CommandFactory {
        Arc::new(|| Box::new(MockCommand::new()) as Box<dyn Command>)
    }

    fn mock_registry() -> CommandRegistry {
        let r = CommandRegistry::new();
        r.register_command(MockCommand::NAME, mock_factory()).unwrap();
        r
    }

    fn names(cmds: &[Box<dyn Command>]) -> Vec<&str> {
        cmds.iter().map(|c| c.display_name()).collect()
    }

    #[test]
    fn register_rejects_empty_and_duplicate() {
        let r = CommandRegistry::new();
        assert!(r.is_empty());

        let err = r.register_command("", mock_factory()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
        assert_eq!(r.len(), 0);

        r.register_command("cmd.factory", mock_factory()).unwrap();
        assert_eq!(r.len(), 1);

        let err = r.register_command("cmd.factory", mock_factory()).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateKey(ref k) if k == "cmd.factory"));
        assert_eq!(r.len(), 1);
        assert_eq!(r.names(), vec!["cmd.factory".to_string()]);

        assert!(r.get_command_factory("cmd.factory").is_some());
        assert!(r.get_command_factory("missing").is_none());
    }

    #[test]
    fn type_defaults_to_test() {
        let cmds = mock_registry()
            .render_commands(&CommandConf::command(MockCommand::NAME), &Project::default())
            .unwrap();
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].command_type(), CommandType::Test);
    }

    #[test]
    fn type_inherits_from_project() {
        let project = Project {
            command_type: Some(CommandType::Setup),
            ..Default::default()
        };
        let cmds = mock_registry()
            .render_commands(&CommandConf::command(MockCommand::NAME), &project)
            .unwrap();
        assert_eq!(cmds[0].command_type(), CommandType::Setup);
    }

    #[test]
    fn conf_type_wins_over_project() {
        let conf = CommandConf::command(MockCommand::NAME).with_type(CommandType::System);
        let r = mock_registry();

        let cmds = r.render_commands(&conf, &Project::default()).unwrap();
        assert_eq!(cmds[0].command_type(), CommandType::System);

        let project = Project {
            command_type: Some(CommandType::Setup),
            ..Default::default()
        };
        let cmds = r.render_commands(&conf, &project).unwrap();
        assert_eq!(cmds[0].command_type(), CommandType::System);
    }

    #[test]
    fn pre_commands_come_first() {
        let r = mock_registry();
        let conf = CommandConf::command(MockCommand::NAME);

        let project = Project::from_yaml(
            r#"
pre:
  - command: command.mock
    params:
      script: "echo hi"
  - command: command.mock
    params:
      script: "echo hi"
"#,
        )
        .unwrap();
        let cmds = r.render_commands(&conf, &project).unwrap();
        assert_eq!(cmds.len(), 3);
        assert_eq!(
            names(&cmds),
            vec![
                "'command.mock' in pre (#1)",
                "'command.mock' in pre (#2)",
                "command.mock"
            ]
        );

        let project = Project::from_yaml("pre:\n  command: command.mock\n").unwrap();
        let cmds = r.render_commands(&conf, &project).unwrap();
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].display_name(), "'command.mock' in pre (#1)");
    }

    #[test]
    fn post_commands_are_named_after_block() {
        let r = mock_registry();
        let conf = CommandConf::command(MockCommand::NAME);

        let project = Project::from_yaml(
            r#"
post:
  - command: command.mock
  - command: command.mock
"#,
        )
        .unwrap();
        let cmds = r.render_commands(&conf, &project).unwrap();
        assert_eq!(cmds.len(), 3);
        assert_eq!(cmds[0].display_name(), "'command.mock' in post (#1)");
        assert_eq!(cmds[1].display_name(), "'command.mock' in post (#2)");

        let project = Project::from_yaml("post:\n  command: command.mock\n").unwrap();
        let cmds = r.render_commands(&conf, &project).unwrap();
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].display_name(), "'command.mock' in post (#1)");
    }

    #[test]
    fn function_expands_in_order_with_vars() {
        let r = mock_registry();
        let project = Project::from_yaml(
            r#"
functions:
  many:
    - command: command.mock
      params: { script: one }
    - command: command.mock
      type: setup
      params: { script: two }
      vars: { local: "1", shared: inner }
  single:
    command: command.mock
"#,
        )
        .unwrap();

        let call = CommandConf::function("many")
            .with_type(CommandType::System)
            .with_var("shared", "outer");
        let cmds = r.render_block(BlockType::Main, &[call], &project).unwrap();
        assert_eq!(
            names(&cmds),
            vec![
                "'command.mock' in function 'many' (#1)",
                "'command.mock' in function 'many' (#2)"
            ]
        );
        assert_eq!(cmds[0].command_type(), CommandType::System);
        assert_eq!(cmds[1].command_type(), CommandType::Setup);

        let vars = cmds[1].base().function_vars();
        assert_eq!(vars.get("local").map(String::as_str), Some("1"));
        assert_eq!(vars.get("shared").map(String::as_str), Some("outer"));

        let cmds = r
            .render_commands(&CommandConf::function("single"), &project)
            .unwrap();
        assert_eq!(names(&cmds), vec!["'command.mock' in function 'single'"]);
    }

    #[test]
    fn block_entries_are_numbered_around_functions() {
        let r = mock_registry();
        let mut project = Project::default();
        project.functions.insert(
            "f".into(),
            CommandSet::single(CommandConf::command(MockCommand::NAME)),
        );

        let block = vec![
            CommandConf::command(MockCommand::NAME),
            CommandConf::function("f"),
            CommandConf::command(MockCommand::NAME),
        ];
        let cmds = r.render_block(BlockType::Main, &block, &project).unwrap();
        assert_eq!(
            names(&cmds),
            vec![
                "'command.mock' in task (#1)",
                "'command.mock' in function 'f'",
                "'command.mock' in task (#3)"
            ]
        );
    }

    #[test]
    fn call_display_name_labels_function_entries() {
        let r = mock_registry();
        let mut project = Project::default();
        project.functions.insert(
            "f".into(),
            CommandSet::new(vec![
                CommandConf::command(MockCommand::NAME),
                CommandConf::command(MockCommand::NAME),
            ]),
        );

        let mut call = CommandConf::function("f");
        call.display_name = "fetch sources".into();
        let cmds = r.render_block(BlockType::Pre, &[call], &project).unwrap();
        assert_eq!(
            names(&cmds),
            vec![
                "'command.mock' in 'fetch sources' (#1)",
                "'command.mock' in 'fetch sources' (#2)"
            ]
        );
    }

    #[test]
    fn render_errors() {
        let r = mock_registry();
        let project = Project::default();

        let err = r
            .render_commands(&CommandConf::command("nope"), &project)
            .err().unwrap();
        assert!(matches!(err, CoreError::UnknownCommand(_)));

        let err = r
            .render_commands(&CommandConf::function("nope"), &project)
            .err().unwrap();
        assert!(matches!(err, CoreError::UnknownCommand(_)));

        let bad = CommandConf::command(MockCommand::NAME).with_param("fail_parse", true);
        let err = r.render_commands(&bad, &project).err().unwrap();
        assert!(matches!(err, CoreError::ParamDecode { .. }));

        let mut nested = Project::default();
        nested.functions.insert(
            "outer".into(),
            CommandSet::single(CommandConf::function("inner")),
        );
        let err = r
            .render_commands(&CommandConf::function("outer"), &nested)
            .err().unwrap();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    #[test]
    fn conf_timeout_becomes_idle_timeout() {
        let mut conf = CommandConf::command(MockCommand::NAME);
        conf.timeout_secs = Some(30);
        let cmds = mock_registry()
            .render_commands(&conf, &Project::default())
            .unwrap();
        assert_eq!(cmds[0].idle_timeout(), Some(Duration::from_secs(30)));
    }
}
