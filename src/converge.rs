//! Convergent file application.
//!
//! Brings managed files and directories to their desired content, mode and
//! ownership, and reports whether anything changed so callers can react.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::unistd::{Group, User};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, ServiceError};
use crate::paths::ROOT_USER;

/// Desired owner, group and permission bits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ownership {
    pub owner: String,
    pub group: String,
    pub mode: u32,
}

impl Ownership {
    /// root:root with the given mode
    pub fn root(mode: u32) -> Self {
        Self {
            owner: ROOT_USER.into(),
            group: ROOT_USER.into(),
            mode,
        }
    }
}

/// A file rendered from a template and converged onto the host
#[derive(Debug, Clone)]
pub struct ManagedArtifact {
    pub path: PathBuf,
    pub template_id: String,
    pub variables: serde_json::Value,
    pub ownership: Ownership,
}

/// Result of converging one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    Created,
    ContentUpdated,
    PermissionsUpdated,
    Unchanged,
}

impl ChangeOutcome {
    pub fn changed(self) -> bool {
        self != ChangeOutcome::Unchanged
    }

    /// Whether the bytes on disk differ from before
    pub fn content_changed(self) -> bool {
        matches!(self, ChangeOutcome::Created | ChangeOutcome::ContentUpdated)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChangeOutcome::Created => "created",
            ChangeOutcome::ContentUpdated => "updated",
            ChangeOutcome::PermissionsUpdated => "permissions",
            ChangeOutcome::Unchanged => "unchanged",
        }
    }
}

/// Ensures paths on the host match desired state
pub trait FileApplier {
    /// Create a directory if missing and fix its mode and ownership
    fn ensure_directory(&self, path: &Path, ownership: &Ownership) -> Result<ChangeOutcome>;

    /// Converge a file's content, mode and ownership
    fn apply(&self, path: &Path, content: &str, ownership: &Ownership) -> Result<ChangeOutcome>;

    /// Create an empty file if absent; never touches an existing one
    fn create_marker(&self, path: &Path) -> Result<ChangeOutcome>;

    fn exists(&self, path: &Path) -> bool;
}

/// Applies files to a real filesystem, with managed paths resolved under `root`.
///
/// In dry-run mode outcomes are computed against the disk but nothing is
/// written; paths that would have been created are tracked so later steps
/// see them as present.
#[derive(Debug, Clone)]
pub struct FsApplier {
    root: PathBuf,
    manage_ownership: bool,
    dry_run: bool,
    pending: RefCell<HashSet<PathBuf>>,
}

impl FsApplier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            manage_ownership: true,
            dry_run: false,
            pending: RefCell::new(HashSet::new()),
        }
    }

    /// Report outcomes without touching the filesystem
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Skip chown, for unprivileged runs against a scratch root
    pub fn without_ownership(mut self) -> Self {
        self.manage_ownership = false;
        self
    }

    /// Map an absolute managed path into the root
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path.strip_prefix("/").unwrap_or(path))
    }

    /// Fix mode and ownership; returns true if anything differed
    fn fix_metadata(&self, target: &Path, ownership: &Ownership) -> Result<bool> {
        let meta = fs::metadata(target).map_err(|e| ServiceError::artifact_write(target, e))?;

        let mode_drift = meta.permissions().mode() & 0o7777 != ownership.mode;
        let ids = if self.manage_ownership {
            Some(lookup_ids(target, ownership)?)
        } else {
            None
        };
        let owner_drift = ids.is_some_and(|(uid, gid)| meta.uid() != uid || meta.gid() != gid);

        if self.dry_run {
            return Ok(mode_drift || owner_drift);
        }

        if mode_drift {
            fs::set_permissions(target, fs::Permissions::from_mode(ownership.mode))
                .map_err(|e| ServiceError::artifact_write(target, e))?;
        }

        if let (true, Some((uid, gid))) = (owner_drift, ids) {
            std::os::unix::fs::chown(target, Some(uid), Some(gid))
                .map_err(|e| ServiceError::artifact_write(target, e))?;
        }

        Ok(mode_drift || owner_drift)
    }

    fn is_pending(&self, path: &Path) -> bool {
        self.pending.borrow().contains(path)
    }

    /// A dry-run write succeeds only where the real one would
    fn check_parent(&self, path: &Path, target: &Path) -> Result<()> {
        let parent_on_disk = target.parent().is_some_and(Path::is_dir);
        let parent_pending = path.parent().is_some_and(|p| self.is_pending(p));

        if parent_on_disk || parent_pending {
            Ok(())
        } else {
            Err(ServiceError::artifact_write(
                target,
                std::io::Error::new(ErrorKind::NotFound, "parent directory does not exist"),
            ))
        }
    }

    /// Write to a temp file beside the target, then rename over it
    fn write_atomic(&self, target: &Path, content: &str, ownership: &Ownership) -> Result<()> {
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let temp_path =
            target.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

        let result = (|| {
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&temp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
            Ok::<_, std::io::Error>(())
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path);
            return Err(ServiceError::artifact_write(target, e));
        }

        if let Err(e) = self.fix_metadata(&temp_path, ownership) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        fs::rename(&temp_path, target).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            ServiceError::artifact_write(target, e)
        })
    }
}

fn lookup_ids(target: &Path, ownership: &Ownership) -> Result<(u32, u32)> {
    let not_found = |what: &str, name: &str| {
        ServiceError::artifact_write(
            target,
            std::io::Error::new(ErrorKind::NotFound, format!("unknown {} '{}'", what, name)),
        )
    };

    let uid = User::from_name(&ownership.owner)
        .map_err(|e| ServiceError::artifact_write(target, e.into()))?
        .ok_or_else(|| not_found("user", &ownership.owner))?
        .uid
        .as_raw();
    let gid = Group::from_name(&ownership.group)
        .map_err(|e| ServiceError::artifact_write(target, e.into()))?
        .ok_or_else(|| not_found("group", &ownership.group))?
        .gid
        .as_raw();

    Ok((uid, gid))
}

impl FileApplier for FsApplier {
    fn ensure_directory(&self, path: &Path, ownership: &Ownership) -> Result<ChangeOutcome> {
        let target = self.resolve(path);

        if target.is_dir() {
            let fixed = self.fix_metadata(&target, ownership)?;
            return Ok(if fixed {
                ChangeOutcome::PermissionsUpdated
            } else {
                ChangeOutcome::Unchanged
            });
        }

        if self.dry_run {
            self.pending.borrow_mut().insert(path.to_path_buf());
            info!(path = %path.display(), "Would create directory");
            return Ok(ChangeOutcome::Created);
        }

        fs::create_dir_all(&target).map_err(|e| ServiceError::artifact_write(&target, e))?;
        self.fix_metadata(&target, ownership)?;

        info!(path = %path.display(), "Created directory");
        Ok(ChangeOutcome::Created)
    }

    fn apply(&self, path: &Path, content: &str, ownership: &Ownership) -> Result<ChangeOutcome> {
        let target = self.resolve(path);

        let existing = match fs::read(&target) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(ServiceError::artifact_write(&target, e)),
        };

        if existing.as_deref() == Some(content.as_bytes()) {
            let fixed = self.fix_metadata(&target, ownership)?;
            let outcome = if fixed {
                ChangeOutcome::PermissionsUpdated
            } else {
                ChangeOutcome::Unchanged
            };
            debug!(path = %path.display(), outcome = outcome.as_str(), "Content up to date");
            return Ok(outcome);
        }

        let outcome = if existing.is_some() {
            ChangeOutcome::ContentUpdated
        } else {
            ChangeOutcome::Created
        };

        if self.dry_run {
            self.check_parent(path, &target)?;
            self.pending.borrow_mut().insert(path.to_path_buf());
            info!(path = %path.display(), outcome = outcome.as_str(), "Would write file");
            return Ok(outcome);
        }

        self.write_atomic(&target, content, ownership)?;

        info!(
            path = %path.display(),
            mode = %format!("{:o}", ownership.mode),
            outcome = outcome.as_str(),
            "Wrote file"
        );
        Ok(outcome)
    }

    fn create_marker(&self, path: &Path) -> Result<ChangeOutcome> {
        let target = self.resolve(path);

        if self.dry_run {
            if target.exists() {
                return Ok(ChangeOutcome::Unchanged);
            }
            info!(path = %path.display(), "Would create marker");
            return Ok(ChangeOutcome::Created);
        }

        match OpenOptions::new().write(true).create_new(true).open(&target) {
            Ok(_) => {
                info!(path = %path.display(), "Created marker");
                Ok(ChangeOutcome::Created)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(ChangeOutcome::Unchanged),
            Err(e) => Err(ServiceError::artifact_write(&target, e)),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        self.resolve(path).exists() || self.is_pending(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn applier() -> (tempfile::TempDir, FsApplier) {
        let dir = tempfile::tempdir().unwrap();
        let applier = FsApplier::new(dir.path()).without_ownership();
        (dir, applier)
    }

    fn mode_of(path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o7777
    }

    #[test]
    fn resolves_under_root() {
        let applier = FsApplier::new("/mnt");
        assert_eq!(
            applier.resolve(Path::new("/etc/init.d/etcd")),
            PathBuf::from("/mnt/etc/init.d/etcd")
        );
    }

    #[test]
    fn apply_creates_then_reports_unchanged() {
        let (dir, applier) = applier();
        fs::create_dir_all(dir.path().join("etc")).unwrap();
        let path = Path::new("/etc/etcd.conf");

        let first = applier.apply(path, "a=1\n", &Ownership::root(0o644)).unwrap();
        assert_eq!(first, ChangeOutcome::Created);
        assert_eq!(
            fs::read_to_string(dir.path().join("etc/etcd.conf")).unwrap(),
            "a=1\n"
        );
        assert_eq!(mode_of(&dir.path().join("etc/etcd.conf")), 0o644);

        let second = applier.apply(path, "a=1\n", &Ownership::root(0o644)).unwrap();
        assert_eq!(second, ChangeOutcome::Unchanged);
    }

    #[test]
    fn apply_detects_content_change() {
        let (dir, applier) = applier();
        fs::create_dir_all(dir.path().join("etc")).unwrap();
        let path = Path::new("/etc/etcd.conf");

        applier.apply(path, "a=1\n", &Ownership::root(0o644)).unwrap();
        let outcome = applier.apply(path, "a=2\n", &Ownership::root(0o644)).unwrap();
        assert_eq!(outcome, ChangeOutcome::ContentUpdated);
        assert!(outcome.content_changed());
    }

    #[test]
    fn mode_fix_is_not_a_content_change() {
        let (dir, applier) = applier();
        fs::create_dir_all(dir.path().join("etc/init.d")).unwrap();
        let path = Path::new("/etc/init.d/etcd");

        applier.apply(path, "#!/bin/sh\n", &Ownership::root(0o644)).unwrap();
        let outcome = applier.apply(path, "#!/bin/sh\n", &Ownership::root(0o755)).unwrap();

        assert_eq!(outcome, ChangeOutcome::PermissionsUpdated);
        assert!(!outcome.content_changed());
        assert_eq!(mode_of(&dir.path().join("etc/init.d/etcd")), 0o755);
    }

    #[test]
    fn apply_without_parent_fails() {
        let (_dir, applier) = applier();
        let err = applier
            .apply(Path::new("/lib/systemd/system/etcd.service"), "x", &Ownership::root(0o644))
            .unwrap_err();
        assert!(matches!(err, ServiceError::ArtifactWrite { .. }));
    }

    #[test]
    fn apply_leaves_no_temp_files() {
        let (dir, applier) = applier();
        fs::create_dir_all(dir.path().join("etc")).unwrap();
        applier
            .apply(Path::new("/etc/a"), "x", &Ownership::root(0o644))
            .unwrap();

        let names: Vec<_> = fs::read_dir(dir.path().join("etc"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("a")]);
    }

    #[test]
    fn ensure_directory_is_idempotent() {
        let (dir, applier) = applier();
        let path = Path::new("/usr/libexec");

        assert_eq!(
            applier.ensure_directory(path, &Ownership::root(0o755)).unwrap(),
            ChangeOutcome::Created
        );
        assert!(dir.path().join("usr/libexec").is_dir());
        assert_eq!(
            applier.ensure_directory(path, &Ownership::root(0o755)).unwrap(),
            ChangeOutcome::Unchanged
        );
    }

    #[test]
    fn dry_run_leaves_disk_untouched() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("etc")).unwrap();
        let applier = FsApplier::new(dir.path()).without_ownership().dry_run();

        let libexec = Path::new("/usr/libexec");
        assert_eq!(
            applier.ensure_directory(libexec, &Ownership::root(0o755)).unwrap(),
            ChangeOutcome::Created
        );
        let script = Path::new("/usr/libexec/etcd-wait-ready");
        assert_eq!(
            applier.apply(script, "#!/bin/sh\n", &Ownership::root(0o755)).unwrap(),
            ChangeOutcome::Created
        );
        let marker = Path::new("/etc/etcd-firstconverge");
        assert_eq!(applier.create_marker(marker).unwrap(), ChangeOutcome::Created);

        assert!(applier.exists(script));
        assert!(!applier.exists(marker));
        assert!(!dir.path().join("usr").exists());
        assert!(!dir.path().join("etc/etcd-firstconverge").exists());
    }

    #[test]
    fn dry_run_reports_changes_against_disk() {
        let (dir, applier) = applier();
        fs::create_dir_all(dir.path().join("etc")).unwrap();
        let path = Path::new("/etc/etcd.conf");
        applier.apply(path, "a=1\n", &Ownership::root(0o644)).unwrap();

        let dry = FsApplier::new(dir.path()).without_ownership().dry_run();
        assert_eq!(
            dry.apply(path, "a=1\n", &Ownership::root(0o644)).unwrap(),
            ChangeOutcome::Unchanged
        );
        assert_eq!(
            dry.apply(path, "a=1\n", &Ownership::root(0o600)).unwrap(),
            ChangeOutcome::PermissionsUpdated
        );
        assert_eq!(
            dry.apply(path, "a=2\n", &Ownership::root(0o644)).unwrap(),
            ChangeOutcome::ContentUpdated
        );

        assert_eq!(fs::read_to_string(dir.path().join("etc/etcd.conf")).unwrap(), "a=1\n");
        assert_eq!(mode_of(&dir.path().join("etc/etcd.conf")), 0o644);
    }

    #[test]
    fn dry_run_fails_where_real_write_would() {
        let dir = tempfile::tempdir().unwrap();
        let applier = FsApplier::new(dir.path()).without_ownership().dry_run();
        let err = applier
            .apply(Path::new("/lib/systemd/system/etcd.service"), "x", &Ownership::root(0o644))
            .unwrap_err();
        assert!(matches!(err, ServiceError::ArtifactWrite { .. }));
    }

    #[test]
    fn marker_is_create_only() {
        let (dir, applier) = applier();
        fs::create_dir_all(dir.path().join("etc")).unwrap();
        let marker = Path::new("/etc/etcd-firstconverge");

        assert!(!applier.exists(marker));
        assert_eq!(applier.create_marker(marker).unwrap(), ChangeOutcome::Created);
        assert!(applier.exists(marker));
        assert_eq!(fs::metadata(dir.path().join("etc/etcd-firstconverge")).unwrap().len(), 0);

        fs::write(dir.path().join("etc/etcd-firstconverge"), "keep").unwrap();
        assert_eq!(applier.create_marker(marker).unwrap(), ChangeOutcome::Unchanged);
        assert_eq!(
            fs::read_to_string(dir.path().join("etc/etcd-firstconverge")).unwrap(),
            "keep"
        );
    }
}
