//! Lifecycle orchestration.
//!
//! Resolves the strategy for a host, lets it converge its artifacts, then
//! issues the requested service-control commands in order. All state lives on
//! disk, so every invocation can be re-run safely.

use std::fmt;
use std::str::FromStr;

use tracing::info;

use crate::config::ServiceConfig;
use crate::control::{ControlCommand, ServiceControl};
use crate::converge::FileApplier;
use crate::error::{Result, ServiceError};
use crate::platform::{resolve, HostDescriptor};
use crate::render::Renderer;
use crate::strategy::{ActionPlan, ArtifactChange, StrategyContext, StrategyKind};

/// Lifecycle action requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Restart,
}

impl Action {
    pub fn name(self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Restart => "restart",
        }
    }
}

impl FromStr for Action {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "start" => Ok(Action::Start),
            "stop" => Ok(Action::Stop),
            "restart" => Ok(Action::Restart),
            other => Err(ServiceError::config(format!("unknown action '{}'", other))),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What an invocation did
#[derive(Debug, Clone)]
pub struct ActionReport {
    pub action: Action,
    pub strategy: StrategyKind,
    pub artifacts: Vec<ArtifactChange>,
    pub commands: Vec<ControlCommand>,
    pub marker_created: bool,
}

impl ActionReport {
    fn new(action: Action, strategy: StrategyKind) -> Self {
        Self {
            action,
            strategy,
            artifacts: Vec::new(),
            commands: Vec::new(),
            marker_created: false,
        }
    }

    pub fn restarts(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, ControlCommand::Restart { .. }))
            .count()
    }

    pub fn changed_artifacts(&self) -> impl Iterator<Item = &ArtifactChange> {
        self.artifacts.iter().filter(|a| a.outcome.changed())
    }
}

/// Drives strategies against injected collaborators
pub struct Orchestrator<'a> {
    renderer: &'a dyn Renderer,
    files: &'a dyn FileApplier,
    control: &'a dyn ServiceControl,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        renderer: &'a dyn Renderer,
        files: &'a dyn FileApplier,
        control: &'a dyn ServiceControl,
    ) -> Self {
        Self {
            renderer,
            files,
            control,
        }
    }

    /// Run one lifecycle action. Restart runs stop, then start.
    ///
    /// Any failure aborts the remaining steps; re-running `start` is the
    /// recovery path.
    pub fn run(
        &self,
        action: Action,
        config: &ServiceConfig,
        host: &HostDescriptor,
    ) -> Result<ActionReport> {
        config.validate()?;
        let kind = resolve(host)?;
        let strategy = kind.create();

        info!(
            service = %config.service_name,
            host = %host,
            strategy = %kind,
            action = %action,
            "Running lifecycle action"
        );

        let ctx = StrategyContext {
            renderer: self.renderer,
            files: self.files,
            config,
            host,
        };
        let mut report = ActionReport::new(action, kind);

        match action {
            Action::Start => self.execute(strategy.start(&ctx)?, &mut report)?,
            Action::Stop => self.execute(strategy.stop(&ctx)?, &mut report)?,
            Action::Restart => {
                self.execute(strategy.stop(&ctx)?, &mut report)?;
                self.execute(strategy.start(&ctx)?, &mut report)?;
            }
        }

        info!(
            service = %config.service_name,
            action = %action,
            changed = report.changed_artifacts().count(),
            commands = report.commands.len(),
            "Lifecycle action complete"
        );

        Ok(report)
    }

    /// Issue a plan's commands in order, then record first convergence
    fn execute(&self, plan: ActionPlan, report: &mut ActionReport) -> Result<()> {
        report.artifacts.extend(plan.artifacts.iter().cloned());

        for command in plan.commands() {
            self.control.execute(&command)?;
            report.commands.push(command);
        }

        if let Some(marker) = &plan.marker {
            if self.files.create_marker(marker)?.changed() {
                report.marker_created = true;
            }
        }

        Ok(())
    }
}
