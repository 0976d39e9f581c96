//! Advisory file locks for the tenant registry
//!
//! Locks live under `<tenants_root>/.locks/`:
//!
//! - `registry.lock`: held only while ports and secrets are allocated and the
//!   new record is persisted.
//! - `tenants/<id>.lock`: held for the whole of one lifecycle operation on a
//!   tenant. The subdirectory keeps ids clear of the fixed lock names.
//! - `hosts.lock`: held while the hosts file is edited.
//!
//! Locks are `flock`-style advisory locks, released by the OS when the
//! holding process dies, so a crashed command never leaves a tenant wedged.
//! The holder writes its PID into the file for diagnostics only.
//!
//! Lock files of deleted tenants may be unlinked by the registry. A holder
//! therefore re-checks after locking that the path still names the file it
//! locked, and retries on a fresh file otherwise.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::types::TenantId;

/// Directory holding lock files, relative to the tenants root
pub const LOCK_DIR_NAME: &str = ".locks";

/// File name of the registry-wide lock
const REGISTRY_LOCK_NAME: &str = "registry.lock";

/// Subdirectory of the per-tenant locks
pub const TENANT_LOCK_DIR_NAME: &str = "tenants";

/// File name of the hosts-file lock
const HOSTS_LOCK_NAME: &str = "hosts.lock";

/// Path of the registry-wide lock under `root`
pub fn registry_lock_path(root: &Path) -> PathBuf {
    root.join(LOCK_DIR_NAME).join(REGISTRY_LOCK_NAME)
}

/// Path of the lock serializing hosts-file edits under `root`
pub fn hosts_lock_path(root: &Path) -> PathBuf {
    root.join(LOCK_DIR_NAME).join(HOSTS_LOCK_NAME)
}

/// Path of the per-tenant lock under `root`
pub fn tenant_lock_path(root: &Path, id: &TenantId) -> PathBuf {
    tenant_lock_dir(root).join(format!("{}.lock", id))
}

/// Directory of the per-tenant locks under `root`
pub fn tenant_lock_dir(root: &Path) -> PathBuf {
    root.join(LOCK_DIR_NAME).join(TENANT_LOCK_DIR_NAME)
}

/// Read the PID last written into a lock file
///
/// Returns `Ok(None)` if the file doesn't exist or is empty.
pub fn read_lock_holder(path: &Path) -> io::Result<Option<u32>> {
    match File::open(path) {
        Ok(mut file) => {
            let mut contents = String::new();
            file.read_to_string(&mut contents)?;
            let trimmed = contents.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            let pid = trimmed
                .parse::<u32>()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            Ok(Some(pid))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
}

/// Whether `path` still names the open `file`
#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;
    let locked = file.metadata()?;
    match fs::metadata(path) {
        Ok(current) => Ok(current.dev() == locked.dev() && current.ino() == locked.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, path: &Path) -> io::Result<bool> {
    Ok(path.exists())
}

fn record_holder(file: &mut File) -> io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "{}", std::process::id())?;
    file.flush()
}

/// An exclusive lock on one file, released on drop
#[derive(Debug)]
pub struct LockFile {
    file: File,
    path: PathBuf,
}

impl LockFile {
    /// Block until the lock at `path` is acquired
    pub fn acquire(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        loop {
            let mut file = open_lock_file(&path)?;
            FileExt::lock_exclusive(&file)?;
            if !still_linked(&file, &path)? {
                tracing::trace!("Lock {:?} was unlinked while waiting; retrying", path);
                continue;
            }
            record_holder(&mut file)?;
            tracing::trace!("Acquired lock {:?}", path);
            return Ok(Self { file, path });
        }
    }

    /// Acquire the lock at `path` without blocking
    ///
    /// Returns `Ok(None)` when another holder has it.
    pub fn try_acquire(path: impl Into<PathBuf>) -> io::Result<Option<Self>> {
        let path = path.into();
        loop {
            let mut file = open_lock_file(&path)?;
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) if !still_linked(&file, &path)? => continue,
                Ok(()) => {
                    record_holder(&mut file)?;
                    return Ok(Some(Self { file, path }));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                    return Ok(None)
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unlink the lock file, then release it
    ///
    /// Waiters that opened the old file notice on wake-up and retry.
    pub fn remove(self) -> io::Result<()> {
        fs::remove_file(&self.path)
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        // The file itself is kept; removing it would race with a waiter that
        // already opened it.
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("Failed to release lock {:?}: {}", self.path, e);
        }
    }
}

/// Proof that the caller holds the registry-wide lock
#[derive(Debug)]
pub struct RegistryLock {
    _lock: LockFile,
}

impl RegistryLock {
    pub fn acquire(root: &Path) -> io::Result<Self> {
        Ok(Self {
            _lock: LockFile::acquire(registry_lock_path(root))?,
        })
    }
}

/// Proof that the caller holds the lock of one tenant
///
/// Registry mutations on an existing tenant require this guard.
#[derive(Debug)]
pub struct TenantLock {
    tenant: TenantId,
    _lock: LockFile,
}

impl TenantLock {
    /// Block until the tenant's lock is acquired
    pub fn acquire(root: &Path, tenant: &TenantId) -> io::Result<Self> {
        Ok(Self {
            tenant: tenant.clone(),
            _lock: LockFile::acquire(tenant_lock_path(root, tenant))?,
        })
    }

    /// Acquire the tenant's lock without blocking
    pub fn try_acquire(root: &Path, tenant: &TenantId) -> io::Result<Option<Self>> {
        Ok(
            LockFile::try_acquire(tenant_lock_path(root, tenant))?.map(|lock| Self {
                tenant: tenant.clone(),
                _lock: lock,
            }),
        )
    }

    /// Tenant this lock covers
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }
}
