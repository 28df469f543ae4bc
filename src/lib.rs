//! etcd service manager.
//!
//! Installs etcd's init artifacts and supervises the service under systemd or
//! SysV init, picking the strategy from the host's OS family and version.
//!
//! - [`platform`]: host descriptors, detection and strategy resolution
//! - [`strategy`]: per-init-system artifact convergence and restart policy
//! - [`orchestrator`]: runs start/stop/restart and issues control commands
//! - [`render`], [`converge`], [`control`]: templating, file convergence and
//!   service-control collaborators

pub mod config;
pub mod control;
pub mod converge;
pub mod error;
pub mod orchestrator;
pub mod paths;
pub mod platform;
pub mod render;
pub mod strategy;

pub use config::{ServiceConfig, ServiceManifest};
pub use error::{Result, ServiceError};
pub use orchestrator::{Action, ActionReport, Orchestrator};
pub use platform::{detect_host, resolve, HostDescriptor};
