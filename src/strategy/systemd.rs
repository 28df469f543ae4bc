use serde_json::json;
use std::path::Path;
use tracing::{debug, info};

use super::{ActionPlan, ServiceStrategy, StrategyContext, StrategyKind};
use crate::control::ControlMechanism;
use crate::converge::{ManagedArtifact, Ownership};
use crate::error::Result;
use crate::paths;
use crate::render::{SYSTEMD_UNIT_TEMPLATE, SYSTEMD_WAIT_READY_TEMPLATE};

/// systemd strategy: unit file plus wait-ready helper.
///
/// A restart is requested when the unit content changed, when the service
/// has never converged, or when `auto_restart_on_change` is set. Stopping is
/// left to the operator.
#[derive(Debug, Clone, Copy, Default)]
pub struct Systemd;

impl Systemd {
    fn wait_ready_artifact(ctx: &StrategyContext<'_>) -> ManagedArtifact {
        let config = ctx.config;
        ManagedArtifact {
            path: paths::wait_ready_script(&config.service_name),
            template_id: SYSTEMD_WAIT_READY_TEMPLATE.into(),
            variables: json!({
                "service_name": config.service_name,
                "ctl_cmd": config.control_command(),
            }),
            ownership: Ownership::root(0o755),
        }
    }

    fn unit_artifact(ctx: &StrategyContext<'_>) -> ManagedArtifact {
        let config = ctx.config;
        ManagedArtifact {
            path: paths::systemd_unit(&config.service_name),
            template_id: SYSTEMD_UNIT_TEMPLATE.into(),
            variables: json!({
                "config": config,
                "service_name": config.service_name,
                "daemon_cmd": config.daemon_command(),
                "ctl_cmd": config.control_command(),
            }),
            ownership: Ownership::root(0o644),
        }
    }
}

impl ServiceStrategy for Systemd {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Systemd
    }

    fn start(&self, ctx: &StrategyContext<'_>) -> Result<ActionPlan> {
        let name = &ctx.config.service_name;
        let mut plan = ActionPlan::new(name, ControlMechanism::Systemd);

        // Debian and Ubuntu ship without /usr/libexec
        let libexec = Path::new(paths::LIBEXEC_DIR);
        let outcome = ctx.files.ensure_directory(libexec, &Ownership::root(0o755))?;
        plan.record(libexec.to_path_buf(), outcome);

        let wait_ready = Self::wait_ready_artifact(ctx);
        let outcome = ctx.converge(&wait_ready)?;
        plan.record(wait_ready.path, outcome);

        let unit = Self::unit_artifact(ctx);
        let unit_outcome = ctx.converge(&unit)?;
        plan.record(unit.path.clone(), unit_outcome);

        if unit_outcome.content_changed() {
            debug!(service = %name, "Unit changed, requesting daemon-reload and restart");
            plan.request_reload();
            plan.request_restart();
        }

        let marker = paths::first_converge_marker(name);
        if !ctx.files.exists(&marker) {
            info!(service = %name, "First converge, requesting restart");
            plan.request_restart();
            plan.marker = Some(marker);
        }

        if ctx.config.auto_restart_on_change {
            plan.request_restart();
        }

        plan.enable_start = ctx.files.exists(&unit.path);

        Ok(plan)
    }

    fn stop(&self, ctx: &StrategyContext<'_>) -> Result<ActionPlan> {
        debug!(service = %ctx.config.service_name, "systemd stop is a no-op");
        Ok(ActionPlan::new(
            &ctx.config.service_name,
            ControlMechanism::Systemd,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::converge::ChangeOutcome;
    use crate::platform::HostDescriptor;
    use crate::render::TemplateEngine;
    use crate::strategy::testing::StubApplier;

    fn plan_with(files: &StubApplier, config: &ServiceConfig) -> ActionPlan {
        let engine = TemplateEngine::builtin().unwrap();
        let host = HostDescriptor::new("fedora", "38").unwrap();
        let ctx = StrategyContext {
            renderer: &engine,
            files,
            config,
            host: &host,
        };
        Systemd.start(&ctx).unwrap()
    }

    #[test]
    fn enable_start_requires_unit_on_disk() {
        let config = ServiceConfig::default();
        let files = StubApplier::new(ChangeOutcome::Unchanged, &[]);

        let plan = plan_with(&files, &config);
        assert!(!plan.enable_start);
    }

    #[test]
    fn applies_wait_ready_before_unit() {
        let config = ServiceConfig::default();
        let files = StubApplier::new(ChangeOutcome::Unchanged, &[]);

        plan_with(&files, &config);
        assert_eq!(
            *files.applied.borrow(),
            vec![
                paths::wait_ready_script("etcd"),
                paths::systemd_unit("etcd"),
            ]
        );
    }

    #[test]
    fn converged_service_with_unchanged_unit_needs_no_restart() {
        let config = ServiceConfig::default();
        let existing = [
            paths::systemd_unit("etcd"),
            paths::first_converge_marker("etcd"),
        ];
        let files = StubApplier::new(ChangeOutcome::Unchanged, &existing);

        let plan = plan_with(&files, &config);
        assert!(!plan.reload);
        assert!(!plan.restart);
        assert!(plan.enable_start);
        assert_eq!(plan.marker, None);
    }

    #[test]
    fn permissions_fix_does_not_restart() {
        let config = ServiceConfig::default();
        let existing = [
            paths::systemd_unit("etcd"),
            paths::first_converge_marker("etcd"),
        ];
        let files = StubApplier::new(ChangeOutcome::PermissionsUpdated, &existing);

        let plan = plan_with(&files, &config);
        assert!(!plan.reload);
        assert!(!plan.restart);
    }

    #[test]
    fn stop_plan_is_empty() {
        let engine = TemplateEngine::builtin().unwrap();
        let files = StubApplier::new(ChangeOutcome::Created, &[]);
        let config = ServiceConfig::default();
        let host = HostDescriptor::new("fedora", "38").unwrap();
        let ctx = StrategyContext {
            renderer: &engine,
            files: &files,
            config: &config,
            host: &host,
        };

        let plan = Systemd.stop(&ctx).unwrap();
        assert!(plan.commands().is_empty());
        assert!(files.applied.borrow().is_empty());
    }
}
