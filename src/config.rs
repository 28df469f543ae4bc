//! Service configuration and manifest loading.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, ServiceError};
use crate::platform::HostDescriptor;

/// Desired configuration of the managed daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Name used for the unit, init script and marker file
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Daemon binary
    #[serde(default = "default_binary_path")]
    pub binary_path: String,

    /// Control client binary, used by the wait-ready helper
    #[serde(default = "default_ctl_binary_path")]
    pub ctl_binary_path: String,

    /// Arguments passed to the daemon before its options
    #[serde(default)]
    pub command_args: Vec<String>,

    /// Arguments passed to the control client (endpoints, certs)
    #[serde(default)]
    pub control_command_args: Vec<String>,

    /// Daemon flags rendered as `--key=value`
    #[serde(default)]
    pub daemon_options: BTreeMap<String, String>,

    /// Restart on every start convergence, not only on unit changes
    #[serde(default)]
    pub auto_restart_on_change: bool,
}

fn default_service_name() -> String {
    "etcd".into()
}

fn default_binary_path() -> String {
    "/usr/bin/etcd".into()
}

fn default_ctl_binary_path() -> String {
    "/usr/bin/etcdctl".into()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            binary_path: default_binary_path(),
            ctl_binary_path: default_ctl_binary_path(),
            command_args: Vec::new(),
            control_command_args: Vec::new(),
            daemon_options: BTreeMap::new(),
            auto_restart_on_change: false,
        }
    }
}

impl ServiceConfig {
    /// Daemon options as `--key=value` flags, in key order
    pub fn daemon_options_line(&self) -> String {
        self.daemon_options
            .iter()
            .map(|(k, v)| format!("--{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Arguments and options, without the binary
    pub fn daemon_args_line(&self) -> String {
        let mut parts: Vec<String> = self.command_args.clone();
        let opts = self.daemon_options_line();
        if !opts.is_empty() {
            parts.push(opts);
        }
        parts.join(" ")
    }

    /// Full daemon invocation
    pub fn daemon_command(&self) -> String {
        join_command(&self.binary_path, &self.daemon_args_line())
    }

    /// Control client invocation
    pub fn control_command(&self) -> String {
        join_command(&self.ctl_binary_path, &self.control_command_args.join(" "))
    }

    /// Check names and paths before anything touches the filesystem
    pub fn validate(&self) -> Result<()> {
        let name = &self.service_name;

        if name.is_empty() {
            return Err(ServiceError::config("service_name must not be empty"));
        }
        if name.starts_with('-') || name.starts_with('.') {
            return Err(ServiceError::config(format!(
                "service_name '{}' must not start with '-' or '.'",
                name
            )));
        }
        if let Some(c) = name
            .chars()
            .find(|&c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@')))
        {
            return Err(ServiceError::config(format!(
                "service_name '{}' contains invalid character '{}'",
                name, c
            )));
        }

        for (field, path) in [
            ("binary_path", &self.binary_path),
            ("ctl_binary_path", &self.ctl_binary_path),
        ] {
            if !Path::new(path).is_absolute() {
                return Err(ServiceError::config(format!(
                    "{} must be absolute, got '{}'",
                    field, path
                )));
            }
        }

        // Values are spliced unquoted into ExecStart= and the init script
        check_shell_word("binary_path", &self.binary_path)?;
        check_shell_word("ctl_binary_path", &self.ctl_binary_path)?;
        for arg in &self.command_args {
            check_shell_word("command_args", arg)?;
        }
        for arg in &self.control_command_args {
            check_shell_word("control_command_args", arg)?;
        }
        for (key, value) in &self.daemon_options {
            if key.is_empty() || key.contains('=') {
                return Err(ServiceError::config(format!(
                    "daemon_options key '{}' must be non-empty and contain no '='",
                    key
                )));
            }
            check_shell_word("daemon_options", key)?;
            check_shell_word("daemon_options", value)?;
        }

        Ok(())
    }
}

/// Reject characters that would split or be interpreted by sh or systemd
fn check_shell_word(field: &str, value: &str) -> Result<()> {
    let unsafe_char = value.chars().find(|&c| {
        c.is_whitespace()
            || c.is_control()
            || matches!(
                c,
                '"' | '\'' | '`' | '$' | '\\' | ';' | '&' | '|' | '<' | '>' | '%' | '(' | ')' | '*' | '?'
            )
    });

    match unsafe_char {
        Some(c) => Err(ServiceError::config(format!(
            "{} value {:?} contains unsupported character {:?}",
            field, value, c
        ))),
        None => Ok(()),
    }
}

fn join_command(binary: &str, args: &str) -> String {
    if args.is_empty() {
        binary.to_string()
    } else {
        format!("{} {}", binary, args)
    }
}

/// Manifest describing one managed service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceManifest {
    /// Target host; detected from release files when absent
    #[serde(default)]
    pub host: Option<HostDescriptor>,

    #[serde(default)]
    pub service: ServiceConfig,

    /// Directory of `.tera` templates overriding the built-in ones
    #[serde(default)]
    pub templates_dir: Option<PathBuf>,
}

/// Load a manifest from YAML, JSON or TOML
pub fn load(path: &Path) -> Result<ServiceManifest> {
    let content = fs::read_to_string(path).map_err(|e| {
        ServiceError::config(format!("Failed to read manifest {}: {}", path.display(), e))
    })?;

    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    let manifest = match extension {
        "yaml" | "yml" => parse_yaml(&content)?,
        "json" => parse_json(&content)?,
        "toml" => parse_toml(&content)?,
        _ => parse_auto(&content)?,
    };

    manifest.service.validate()?;
    Ok(manifest)
}

pub fn parse_yaml(content: &str) -> Result<ServiceManifest> {
    serde_yaml::from_str(content)
        .map_err(|e| ServiceError::config(format!("Failed to parse YAML manifest: {}", e)))
}

pub fn parse_json(content: &str) -> Result<ServiceManifest> {
    serde_json::from_str(content)
        .map_err(|e| ServiceError::config(format!("Failed to parse JSON manifest: {}", e)))
}

pub fn parse_toml(content: &str) -> Result<ServiceManifest> {
    toml::from_str(content)
        .map_err(|e| ServiceError::config(format!("Failed to parse TOML manifest: {}", e)))
}

/// Detect the format from content
fn parse_auto(content: &str) -> Result<ServiceManifest> {
    let trimmed = content.trim_start();

    if trimmed.starts_with('{') {
        return parse_json(content);
    }
    if trimmed.starts_with('[') || parse_toml(content).is_ok() {
        return parse_toml(content);
    }

    parse_yaml(content)
}
