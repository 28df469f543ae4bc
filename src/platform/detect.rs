use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::debug;

use super::{HostDescriptor, OsFamily};
use crate::error::{Result, ServiceError};

/// Detect the host descriptor from release files under `root`.
///
/// Checks `/etc/os-release` first, then `/etc/redhat-release` (EL6 and
/// older ship no os-release) and finally `/etc/debian_version`.
pub fn detect_host(root: &Path) -> Result<HostDescriptor> {
    if let Ok(content) = fs::read_to_string(root.join("etc/os-release")) {
        debug!("Detecting host from os-release");
        return from_os_release(&content);
    }

    if let Ok(content) = fs::read_to_string(root.join("etc/redhat-release")) {
        debug!("Detecting host from redhat-release");
        return from_redhat_release(&content);
    }

    if let Ok(content) = fs::read_to_string(root.join("etc/debian_version")) {
        debug!("Detecting host from debian_version");
        return HostDescriptor::new(OsFamily::Debian, content.trim());
    }

    Err(ServiceError::HostDetection {
        message: format!(
            "no os-release, redhat-release or debian_version under {}",
            root.display()
        ),
    })
}

fn from_os_release(content: &str) -> Result<HostDescriptor> {
    let fields: HashMap<&str, &str> = content
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim().trim_matches('"').trim_matches('\'')))
        .collect();

    let id = fields.get("ID").ok_or_else(|| ServiceError::HostDetection {
        message: "os-release has no ID field".into(),
    })?;
    let version = fields
        .get("VERSION_ID")
        .ok_or_else(|| ServiceError::HostDetection {
            message: format!("os-release for {} has no VERSION_ID field", id),
        })?;

    HostDescriptor::new(*id, version)
}

fn from_redhat_release(content: &str) -> Result<HostDescriptor> {
    let line = content.lines().next().unwrap_or("").trim();
    let lower = line.to_lowercase();

    let family = if lower.starts_with("centos") {
        OsFamily::Centos
    } else if lower.starts_with("scientific") {
        OsFamily::Scientific
    } else if lower.starts_with("fedora") {
        OsFamily::Fedora
    } else if lower.starts_with("red hat") {
        OsFamily::Redhat
    } else {
        return Err(ServiceError::HostDetection {
            message: format!("unrecognized redhat-release: {}", line),
        });
    };

    let version = lower
        .split_whitespace()
        .skip_while(|word| *word != "release")
        .nth(1)
        .ok_or_else(|| ServiceError::HostDetection {
            message: format!("no release number in: {}", line),
        })?;

    HostDescriptor::new(family, version)
}
