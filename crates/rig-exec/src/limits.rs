//! POSIX rlimits for spawned commands.
//!
//! On Unix the limits are set in a `pre_exec` hook, after `fork()` and before `execve()`, so the
//! command never runs unrestricted. Elsewhere a non-empty config is logged and ignored.
use serde::Deserialize;
use tokio::process::Command;
#[cfg(not(unix))]
use tracing::warn;

/// Limits a command may declare under its `limits` param.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RlimitConfig {
    /// `RLIMIT_NOFILE`.
    pub max_open_files: Option<u64>,
    /// `RLIMIT_FSIZE`. Growing a file past it raises `SIGXFSZ`.
    pub max_file_size_bytes: Option<u64>,
    /// `RLIMIT_CORE = 0`.
    pub disable_core_dumps: bool,
}

impl RlimitConfig {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.max_open_files.is_none()
            && self.max_file_size_bytes.is_none()
            && !self.disable_core_dumps
    }
}

pub fn attach_rlimits(cmd: &mut Command, config: &RlimitConfig) {
    if config.is_empty() {
        return;
    }

    #[cfg(unix)]
    unix_impl::attach_rlimits(cmd, config);

    #[cfg(not(unix))]
    {
        let _ = cmd;
        warn!(target: "rig.exec.limits", ?config, "rlimits are not supported on this OS; ignoring");
    }
}

#[cfg(unix)]
mod unix_impl {
    use std::io;

    use tokio::process::Command;

    use super::RlimitConfig;

    pub fn attach_rlimits(cmd: &mut Command, config: &RlimitConfig) {
        let config = config.clone();

        // SAFETY: the hook only calls async-signal-safe `setrlimit`.
        unsafe {
            cmd.pre_exec(move || {
                if let Some(nofile) = config.max_open_files {
                    apply(libc::RLIMIT_NOFILE, nofile)?;
                }
                if let Some(fsize) = config.max_file_size_bytes {
                    apply(libc::RLIMIT_FSIZE, fsize)?;
                }
                if config.disable_core_dumps {
                    apply(libc::RLIMIT_CORE, 0)?;
                }
                Ok(())
            });
        }
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    type Resource = libc::__rlimit_resource_t;
    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    type Resource = libc::c_int;

    fn apply(resource: Resource, value: u64) -> io::Result<()> {
        let rlim = libc::rlimit {
            rlim_cur: value as libc::rlim_t,
            rlim_max: value as libc::rlim_t,
        };
        if unsafe { libc::setrlimit(resource, &rlim) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_noop() {
        let config = RlimitConfig::default();
        assert!(config.is_empty());
        attach_rlimits(&mut Command::new("sh"), &config);
    }

    #[test]
    fn limits_param_decodes() {
        let config: RlimitConfig =
            serde_json::from_str(r#"{"max_open_files":1024,"disable_core_dumps":true}"#).unwrap();
        assert_eq!(config.max_open_files, Some(1024));
        assert!(config.disable_core_dumps);
        assert!(!config.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn limited_child_sees_nofile_limit() {
        let config = RlimitConfig {
            max_open_files: Some(256),
            ..Default::default()
        };
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("ulimit -n");
        attach_rlimits(&mut cmd, &config);

        let out = cmd.output().await.unwrap();
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "256");
    }
}
