//! Artifact rendering.
//!
//! Unit files and scripts are Tera templates. The built-in set is embedded in
//! the binary; a template directory can override individual templates.

use std::path::Path;

use tera::{Context, Tera};
use tracing::{debug, info};

use crate::error::{Result, ServiceError};

pub const SYSTEMD_UNIT_TEMPLATE: &str = "systemd/etcd.service.tera";
pub const SYSTEMD_WAIT_READY_TEMPLATE: &str = "systemd/etcd-wait-ready.tera";
pub const SYSVINIT_SCRIPT_TEMPLATE: &str = "sysvinit/etcd.tera";

const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    (
        SYSTEMD_UNIT_TEMPLATE,
        include_str!("../templates/systemd/etcd.service.tera"),
    ),
    (
        SYSTEMD_WAIT_READY_TEMPLATE,
        include_str!("../templates/systemd/etcd-wait-ready.tera"),
    ),
    (
        SYSVINIT_SCRIPT_TEMPLATE,
        include_str!("../templates/sysvinit/etcd.tera"),
    ),
];

/// Produces file content from a template identifier and variables.
///
/// Rendering must be deterministic: identical inputs yield identical bytes.
pub trait Renderer {
    fn render(&self, template_id: &str, variables: &serde_json::Value) -> Result<String>;
}

/// Tera-backed renderer
pub struct TemplateEngine {
    tera: Tera,
}

impl TemplateEngine {
    /// Engine with only the embedded templates
    pub fn builtin() -> Result<Self> {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        tera.add_raw_templates(BUILTIN_TEMPLATES.iter().copied())
            .map_err(|e| ServiceError::Render {
                template: "<builtin>".into(),
                message: e.to_string(),
            })?;

        Ok(Self { tera })
    }

    /// Engine whose templates in `dir` take precedence over the embedded ones.
    ///
    /// Templates are matched recursively by `.tera` extension, so an override
    /// for the unit file lives at `<dir>/systemd/etcd.service.tera`.
    pub fn with_overrides(dir: &Path) -> Result<Self> {
        let pattern = dir.join("**/*.tera");
        let pattern_str = pattern.to_string_lossy();

        debug!(pattern = %pattern_str, "Loading template overrides");

        let mut tera = Tera::new(&pattern_str).map_err(|e| ServiceError::Render {
            template: pattern_str.to_string(),
            message: e.to_string(),
        })?;
        tera.autoescape_on(vec![]);

        let overrides = tera.get_template_names().count();
        let builtin = Self::builtin()?;
        tera.extend(&builtin.tera).map_err(|e| ServiceError::Render {
            template: "<builtin>".into(),
            message: e.to_string(),
        })?;

        info!(
            directory = %dir.display(),
            count = overrides,
            "Template overrides loaded"
        );

        Ok(Self { tera })
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.tera.get_template_names().any(|n| n == name)
    }
}

impl Renderer for TemplateEngine {
    fn render(&self, template_id: &str, variables: &serde_json::Value) -> Result<String> {
        let context = Context::from_serialize(variables).map_err(|e| ServiceError::Render {
            template: template_id.to_string(),
            message: format!("invalid template context: {}", e),
        })?;

        self.tera
            .render(template_id, &context)
            .map_err(|e| ServiceError::Render {
                template: template_id.to_string(),
                message: e.to_string(),
            })
    }
}
