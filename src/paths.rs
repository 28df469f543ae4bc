use std::path::PathBuf;

/// Directory holding helper scripts invoked by unit files
pub const LIBEXEC_DIR: &str = "/usr/libexec";

/// Directory for packaged systemd unit files
pub const SYSTEMD_UNIT_DIR: &str = "/lib/systemd/system";

/// Directory for SysV init scripts
pub const INIT_D_DIR: &str = "/etc/init.d";

/// Owner and group of every managed artifact
pub const ROOT_USER: &str = "root";

/// Helper script that blocks until the daemon answers its control interface
pub fn wait_ready_script(service: &str) -> PathBuf {
    PathBuf::from(LIBEXEC_DIR).join(format!("{}-wait-ready", service))
}

/// systemd unit definition
pub fn systemd_unit(service: &str) -> PathBuf {
    PathBuf::from(SYSTEMD_UNIT_DIR).join(format!("{}.service", service))
}

/// SysV init script
pub fn init_script(service: &str) -> PathBuf {
    PathBuf::from(INIT_D_DIR).join(service)
}

/// Marker recording that the service completed its first start convergence
pub fn first_converge_marker(service: &str) -> PathBuf {
    PathBuf::from("/etc").join(format!("{}-firstconverge", service))
}
