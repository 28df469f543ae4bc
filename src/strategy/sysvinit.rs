use serde_json::json;
use tracing::debug;

use super::{ActionPlan, ServiceStrategy, StrategyContext, StrategyKind};
use crate::control::ControlMechanism;
use crate::converge::{ManagedArtifact, Ownership};
use crate::error::Result;
use crate::paths;
use crate::render::SYSVINIT_SCRIPT_TEMPLATE;

/// SysV init strategy: a single `/etc/init.d` script.
///
/// Restarts only when the script content changed. Enable/start/stop go
/// through chkconfig/service on RHEL-family hosts and update-rc.d on Debian.
#[derive(Debug, Clone, Copy, Default)]
pub struct SysVInit;

impl SysVInit {
    fn mechanism(ctx: &StrategyContext<'_>) -> ControlMechanism {
        ControlMechanism::for_sysvinit(ctx.host.family.platform_family())
    }

    /// Converge the init script and note whether it changed
    fn create_init(ctx: &StrategyContext<'_>, plan: &mut ActionPlan) -> Result<bool> {
        let config = ctx.config;
        let script = ManagedArtifact {
            path: paths::init_script(&config.service_name),
            template_id: SYSVINIT_SCRIPT_TEMPLATE.into(),
            variables: json!({
                "config": config,
                "service_name": config.service_name,
                "daemon_bin": config.binary_path,
                "daemon_cmd": config.daemon_command(),
                "daemon_args": config.command_args.join(" "),
                "daemon_opts": config.daemon_options_line(),
                "ctl_cmd": config.control_command(),
            }),
            ownership: Ownership::root(0o755),
        };

        let outcome = ctx.converge(&script)?;
        plan.record(script.path, outcome);
        Ok(outcome.content_changed())
    }
}

impl ServiceStrategy for SysVInit {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SysVInit
    }

    fn start(&self, ctx: &StrategyContext<'_>) -> Result<ActionPlan> {
        let mut plan = ActionPlan::new(&ctx.config.service_name, Self::mechanism(ctx));

        if Self::create_init(ctx, &mut plan)? {
            debug!(service = %ctx.config.service_name, "Init script changed, requesting restart");
            plan.request_restart();
        }
        plan.enable_start = true;

        Ok(plan)
    }

    fn stop(&self, ctx: &StrategyContext<'_>) -> Result<ActionPlan> {
        let mut plan = ActionPlan::new(&ctx.config.service_name, Self::mechanism(ctx));

        // A changed script is picked up by the next start
        Self::create_init(ctx, &mut plan)?;
        plan.stop = true;

        Ok(plan)
    }
}
