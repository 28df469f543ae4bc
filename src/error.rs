//! Error types for the service manager.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by platform resolution, convergence and service control.
///
/// Every variant aborts the remaining steps of the current action. Re-running
/// `start` is always safe since each step is convergence-checked.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// No strategy matches the host. Raised before anything is written.
    #[error("Unsupported platform {family} {version}: {reason}")]
    UnsupportedPlatform {
        family: String,
        version: String,
        reason: String,
    },

    /// A managed file or directory could not be written.
    #[error("Failed to write {}: {source}", path.display())]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A service-control command failed to spawn or exited non-zero.
    #[error("Service control command `{command}` failed: {message}")]
    ServiceControl { command: String, message: String },

    /// A template could not be rendered.
    #[error("Failed to render template '{template}': {message}")]
    Render { template: String, message: String },

    /// The service manifest is missing, malformed or invalid.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The host's OS release files could not be interpreted.
    #[error("Host detection failed: {message}")]
    HostDetection { message: String },
}

impl ServiceError {
    pub(crate) fn artifact_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ArtifactWrite {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_write_names_path() {
        let err = ServiceError::artifact_write(
            "/etc/init.d/etcd",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.to_string(), "Failed to write /etc/init.d/etcd: denied");
    }

    #[test]
    fn unsupported_platform_message() {
        let err = ServiceError::UnsupportedPlatform {
            family: "ubuntu".into(),
            version: "14.04".into(),
            reason: "no init strategy".into(),
        };
        assert_eq!(
            err.to_string(),
            "Unsupported platform ubuntu 14.04: no init strategy"
        );
    }
}
