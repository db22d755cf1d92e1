//! Builtin commands and the process plumbing they share.
//!
//! | name                | command                   |
//! |---------------------|---------------------------|
//! | `shell.exec`        | [`ShellExec`]             |
//! | `subprocess.exec`   | [`SubprocessExec`]        |
//! | `timeout.update`    | [`TimeoutUpdate`]         |
//! | `expansions.update` | [`ExpansionsUpdate`]      |

mod error;
pub use error::{ExecError, ExecResult};

pub mod limits;
pub use limits::RlimitConfig;

pub mod proc;
pub mod util;

mod cmd;
pub use cmd::{ExpansionsUpdate, ShellExec, SubprocessExec, TimeoutUpdate};

use std::sync::{Arc, OnceLock};

use rig_core::{Command, CommandFactory, CommandRegistry, CoreError};

static BUILTINS: OnceLock<Arc<CommandRegistry>> = OnceLock::new();

fn factory<C: Command + Default + 'static>() -> CommandFactory {
    Arc::new(|| Box::new(C::default()) as Box<dyn Command>)
}

/// Register every builtin command on `registry`.
pub fn register_builtins(registry: &CommandRegistry) -> Result<(), CoreError> {
    registry.register_command(ShellExec::NAME, factory::<ShellExec>())?;
    registry.register_command(SubprocessExec::NAME, factory::<SubprocessExec>())?;
    registry.register_command(TimeoutUpdate::NAME, factory::<TimeoutUpdate>())?;
    registry.register_command(ExpansionsUpdate::NAME, factory::<ExpansionsUpdate>())?;
    Ok(())
}

/// Process-wide registry holding the builtin commands.
pub fn builtin_registry() -> Arc<CommandRegistry> {
    BUILTINS
        .get_or_init(|| {
            let registry = CommandRegistry::new();
            // Names are distinct constants and the registry is fresh.
            let _ = register_builtins(&registry);
            Arc::new(registry)
        })
        .clone()
}

pub mod prelude {
    pub use crate::error::{ExecError, ExecResult};
    pub use crate::{builtin_registry, register_builtins};
    pub use crate::{ExpansionsUpdate, ShellExec, SubprocessExec, TimeoutUpdate};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_names_match_registry_keys() {
        let registry = builtin_registry();
        assert_eq!(registry.len(), 4);
        for name in registry.names() {
            let factory = registry.get_command_factory(&name).unwrap();
            assert_eq!(factory().name(), name);
        }
    }

    #[test]
    fn registering_twice_fails() {
        let registry = CommandRegistry::new();
        register_builtins(&registry).unwrap();
        assert!(matches!(
            register_builtins(&registry),
            Err(CoreError::DuplicateKey(_))
        ));
        assert_eq!(registry.len(), 4);
    }
}
