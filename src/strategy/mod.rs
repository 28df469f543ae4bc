//! Init-system strategies.
//!
//! A strategy converges the artifacts for its init system and returns an
//! [`ActionPlan`] describing which service-control commands must follow.
//! Strategies never issue commands themselves; the orchestrator does.

mod systemd;
mod sysvinit;
#[cfg(test)]
mod testing;

pub use systemd::Systemd;
pub use sysvinit::SysVInit;

use std::fmt;
use std::path::PathBuf;

use tracing::debug;

use crate::config::ServiceConfig;
use crate::control::{ControlCommand, ControlMechanism};
use crate::converge::{ChangeOutcome, FileApplier, ManagedArtifact};
use crate::error::Result;
use crate::platform::HostDescriptor;
use crate::render::Renderer;

/// Available init strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Systemd,
    SysVInit,
}

impl StrategyKind {
    pub fn create(self) -> Box<dyn ServiceStrategy> {
        match self {
            StrategyKind::Systemd => Box::new(Systemd),
            StrategyKind::SysVInit => Box::new(SysVInit),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StrategyKind::Systemd => "systemd",
            StrategyKind::SysVInit => "sysvinit",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Collaborators and inputs for one strategy action
pub struct StrategyContext<'a> {
    pub renderer: &'a dyn Renderer,
    pub files: &'a dyn FileApplier,
    pub config: &'a ServiceConfig,
    pub host: &'a HostDescriptor,
}

impl StrategyContext<'_> {
    /// Render an artifact and converge it onto the host
    pub fn converge(&self, artifact: &ManagedArtifact) -> Result<ChangeOutcome> {
        let content = self
            .renderer
            .render(&artifact.template_id, &artifact.variables)?;
        let outcome = self
            .files
            .apply(&artifact.path, &content, &artifact.ownership)?;

        debug!(
            path = %artifact.path.display(),
            template = %artifact.template_id,
            outcome = outcome.as_str(),
            "Converged artifact"
        );
        Ok(outcome)
    }
}

/// Start/stop behavior for one init system.
///
/// Restart is not part of the trait: the orchestrator runs stop then start.
pub trait ServiceStrategy {
    fn kind(&self) -> StrategyKind;

    fn start(&self, ctx: &StrategyContext<'_>) -> Result<ActionPlan>;

    fn stop(&self, ctx: &StrategyContext<'_>) -> Result<ActionPlan>;
}

/// One converged path and what happened to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactChange {
    pub path: PathBuf,
    pub outcome: ChangeOutcome,
}

/// Outcome of a strategy action: converged artifacts plus requested side effects.
///
/// Requests are flags, so asking for a restart twice still yields one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionPlan {
    pub service: String,
    pub mechanism: ControlMechanism,
    pub artifacts: Vec<ArtifactChange>,
    pub reload: bool,
    pub restart: bool,
    pub enable_start: bool,
    pub stop: bool,
    /// First-converge marker to create once all commands succeeded
    pub marker: Option<PathBuf>,
}

impl ActionPlan {
    pub fn new(service: &str, mechanism: ControlMechanism) -> Self {
        Self {
            service: service.to_string(),
            mechanism,
            artifacts: Vec::new(),
            reload: false,
            restart: false,
            enable_start: false,
            stop: false,
            marker: None,
        }
    }

    pub fn record(&mut self, path: PathBuf, outcome: ChangeOutcome) {
        self.artifacts.push(ArtifactChange { path, outcome });
    }

    pub fn request_reload(&mut self) {
        self.reload = true;
    }

    pub fn request_restart(&mut self) {
        self.restart = true;
    }

    /// Commands in execution order: reload, restart, enable, start; or stop
    pub fn commands(&self) -> Vec<ControlCommand> {
        let mut commands = Vec::new();
        let service = || self.service.clone();

        if self.reload {
            commands.push(ControlCommand::DaemonReload);
        }
        if self.restart {
            commands.push(ControlCommand::Restart {
                mechanism: self.mechanism,
                service: service(),
            });
        }
        if self.enable_start {
            commands.push(ControlCommand::Enable {
                mechanism: self.mechanism,
                service: service(),
            });
            commands.push(ControlCommand::Start {
                mechanism: self.mechanism,
                service: service(),
            });
        }
        if self.stop {
            commands.push(ControlCommand::Stop {
                mechanism: self.mechanism,
                service: service(),
            });
        }

        commands
    }
}
