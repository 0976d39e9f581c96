//! Small filesystem helpers shared by the registry and the renderer

use rand::distributions::{Alphanumeric, DistString};
use std::io::{self, Write};
use std::path::Path;

/// Write `content` to `path` atomically using tempfile + rename
///
/// Readers observe either the previous content or the new content, never a
/// partial write.
pub fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));

    // Same directory, so the rename never crosses a filesystem
    let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
    temp_file.write_all(content)?;
    temp_file.as_file().sync_all()?;
    temp_file.persist(path).map_err(|e| e.error)?;

    Ok(())
}

/// Write `content` only if the file does not already hold exactly it
///
/// Returns whether the file was written.
pub fn write_if_changed(path: &Path, content: &[u8]) -> io::Result<bool> {
    match std::fs::read(path) {
        Ok(existing) if existing == content => return Ok(false),
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    write_atomic(path, content)?;
    Ok(true)
}

/// Short random suffix for hidden staging and trash names
pub fn random_suffix() -> String {
    Alphanumeric
        .sample_string(&mut rand::thread_rng(), 8)
        .to_lowercase()
}

/// Whether a directory entry name is hidden (staging, trash, locks)
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.txt");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
    }

    #[test]
    fn test_write_if_changed_skips_identical_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.txt");
        assert!(write_if_changed(&path, b"same").unwrap());
        assert!(!write_if_changed(&path, b"same").unwrap());
        assert!(write_if_changed(&path, b"different").unwrap());
    }

    #[test]
    fn test_random_suffix_is_hidden_safe() {
        let suffix = random_suffix();
        assert_eq!(suffix.len(), 8);
        assert!(!is_hidden(&suffix));
        assert!(is_hidden(".trash-acme"));
    }
}
