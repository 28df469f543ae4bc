//! Service-control commands and the runners that issue them.

use std::cell::RefCell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{info, warn};

use crate::error::{Result, ServiceError};
use crate::paths::INIT_D_DIR;
use crate::platform::PlatformFamily;

/// Native mechanism used to control a service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMechanism {
    /// systemctl
    Systemd,
    /// chkconfig + service
    RedhatInit,
    /// update-rc.d + /etc/init.d
    DebianInit,
}

impl ControlMechanism {
    /// SysV control mechanism for a platform family
    pub fn for_sysvinit(family: PlatformFamily) -> Self {
        match family {
            PlatformFamily::Rhel => ControlMechanism::RedhatInit,
            PlatformFamily::Debian => ControlMechanism::DebianInit,
        }
    }
}

/// A single side effect against the init system
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Re-read unit definitions from disk (systemd only)
    DaemonReload,
    Enable {
        mechanism: ControlMechanism,
        service: String,
    },
    Start {
        mechanism: ControlMechanism,
        service: String,
    },
    Stop {
        mechanism: ControlMechanism,
        service: String,
    },
    Restart {
        mechanism: ControlMechanism,
        service: String,
    },
}

impl ControlCommand {
    /// Program and arguments that carry out this command
    pub fn argv(&self) -> (String, Vec<String>) {
        use ControlMechanism::*;

        let (program, args): (&str, Vec<String>) = match self {
            ControlCommand::DaemonReload => ("/bin/systemctl", vec!["daemon-reload".into()]),
            ControlCommand::Enable { mechanism, service } => match mechanism {
                Systemd => ("/bin/systemctl", vec!["enable".into(), service.clone()]),
                RedhatInit => ("/sbin/chkconfig", vec![service.clone(), "on".into()]),
                DebianInit => (
                    "/usr/sbin/update-rc.d",
                    vec![service.clone(), "defaults".into()],
                ),
            },
            ControlCommand::Start { mechanism, service } => {
                return action_argv(*mechanism, service, "start")
            }
            ControlCommand::Stop { mechanism, service } => {
                return action_argv(*mechanism, service, "stop")
            }
            ControlCommand::Restart { mechanism, service } => {
                return action_argv(*mechanism, service, "restart")
            }
        };

        (program.to_string(), args)
    }
}

fn action_argv(mechanism: ControlMechanism, service: &str, action: &str) -> (String, Vec<String>) {
    match mechanism {
        ControlMechanism::Systemd => (
            "/bin/systemctl".into(),
            vec![action.to_string(), service.to_string()],
        ),
        ControlMechanism::RedhatInit => (
            "/sbin/service".into(),
            vec![service.to_string(), action.to_string()],
        ),
        ControlMechanism::DebianInit => (
            format!("{}/{}", INIT_D_DIR, service),
            vec![action.to_string()],
        ),
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (program, args) = self.argv();
        if args.is_empty() {
            f.write_str(&program)
        } else {
            write!(f, "{} {}", program, args.join(" "))
        }
    }
}

/// Issues service-control commands
pub trait ServiceControl {
    fn execute(&self, command: &ControlCommand) -> Result<()>;
}

/// Runs commands on the local host, or inside `root` via `chroot`
#[derive(Debug, Clone, Default)]
pub struct SystemControl {
    root: Option<PathBuf>,
}

impl SystemControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target the system installed under `root`; `/` means the live host
    pub fn in_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            root: (root != Path::new("/")).then(|| root.to_path_buf()),
        }
    }

    /// Program and arguments actually executed for `command`
    pub fn command_line(&self, command: &ControlCommand) -> (String, Vec<String>) {
        let (program, args) = command.argv();
        match &self.root {
            Some(root) => {
                let mut wrapped = vec![root.display().to_string(), program];
                wrapped.extend(args);
                ("chroot".to_string(), wrapped)
            }
            None => (program, args),
        }
    }
}

impl ServiceControl for SystemControl {
    fn execute(&self, command: &ControlCommand) -> Result<()> {
        let (program, args) = self.command_line(command);

        info!(command = %command, root = ?self.root, "Running service control command");

        let output = Command::new(&program)
            .args(&args)
            .output()
            .map_err(|e| ServiceError::ServiceControl {
                command: command.to_string(),
                message: format!("Failed to run {}: {}", program, e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(command = %command, code = ?output.status.code(), stderr = %stderr, "Service control command failed");
            return Err(ServiceError::ServiceControl {
                command: command.to_string(),
                message: format!("exit code {:?}: {}", output.status.code(), stderr),
            });
        }

        Ok(())
    }
}

/// Records commands instead of running them.
///
/// Backs `--dry-run` and the convergence tests. `fail_on` makes a matching
/// command fail after being recorded.
#[derive(Debug, Default)]
pub struct RecordingControl {
    commands: RefCell<Vec<ControlCommand>>,
    fail_on: Option<ControlCommand>,
}

impl RecordingControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(command: ControlCommand) -> Self {
        Self {
            commands: RefCell::new(Vec::new()),
            fail_on: Some(command),
        }
    }

    pub fn commands(&self) -> Vec<ControlCommand> {
        self.commands.borrow().clone()
    }

    pub fn clear(&self) {
        self.commands.borrow_mut().clear();
    }
}

impl ServiceControl for RecordingControl {
    fn execute(&self, command: &ControlCommand) -> Result<()> {
        info!(command = %command, "Would run service control command");
        self.commands.borrow_mut().push(command.clone());

        if self.fail_on.as_ref() == Some(command) {
            return Err(ServiceError::ServiceControl {
                command: command.to_string(),
                message: "simulated failure".into(),
            });
        }

        Ok(())
    }
}
