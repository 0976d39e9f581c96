//! Hosts-file registration of tenant aliases
//!
//! Entries written here carry a trailing marker comment. Only marked lines
//! are ever removed, so entries an operator wrote by hand are left alone.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::lock::{hosts_lock_path, LockFile};

/// Comment identifying managed entries
pub const MARKER: &str = "# tenantry";

/// One hosts file and the address aliases resolve to
#[derive(Debug, Clone)]
pub struct HostsFile {
    path: PathBuf,
    address: String,
    lock_path: PathBuf,
}

impl HostsFile {
    /// Edits are serialized through a lock under `tenants_root`
    pub fn new(path: impl Into<PathBuf>, address: impl Into<String>, tenants_root: &Path) -> Self {
        Self {
            path: path.into(),
            address: address.into(),
            lock_path: hosts_lock_path(tenants_root),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Make `alias` resolve; returns whether the file changed
    pub fn register(&self, alias: &str) -> io::Result<bool> {
        let entry = format!("{} {} {}", self.address, alias, MARKER);
        self.edit(|content| with_entry(content, alias, &entry))
    }

    /// Drop the managed entry of `alias`; returns whether the file changed
    pub fn unregister(&self, alias: &str) -> io::Result<bool> {
        self.edit(|content| without_entry(content, alias))
    }

    fn edit(&self, change: impl FnOnce(&str) -> Option<String>) -> io::Result<bool> {
        let _lock = LockFile::acquire(&self.lock_path)?;
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };
        let Some(updated) = change(&content) else {
            return Ok(false);
        };
        // Written in place: the system file is often a bind mount and its
        // mode must survive.
        fs::write(&self.path, updated)?;
        Ok(true)
    }
}

/// Host names of one hosts-file line, comments stripped
fn names(line: &str) -> impl Iterator<Item = &str> {
    let data = line.split('#').next().unwrap_or_default();
    data.split_whitespace().skip(1)
}

fn is_managed(line: &str) -> bool {
    line.trim_end().ends_with(MARKER)
}

/// `content` with `entry` appended, or `None` when `alias` already resolves
pub fn with_entry(content: &str, alias: &str, entry: &str) -> Option<String> {
    if content.lines().any(|line| names(line).any(|n| n == alias)) {
        return None;
    }
    let mut updated = content.to_string();
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(entry);
    updated.push('\n');
    Some(updated)
}

/// `content` without managed entries for `alias`, or `None` when there are none
pub fn without_entry(content: &str, alias: &str) -> Option<String> {
    let mut removed = false;
    let mut updated = String::with_capacity(content.len());
    for line in content.split_inclusive('\n') {
        if is_managed(line) && names(line).any(|n| n == alias) {
            removed = true;
            continue;
        }
        updated.push_str(line);
    }
    removed.then_some(updated)
}
