use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use spool_api::naming;

use crate::error::EngineError;

// ════════════════════════════════════════════════════════════════
//  StorageDir: handoff between grabber and uploader
// ════════════════════════════════════════════════════════════════

/// The directory shared by the grabber and the uploader.
///
/// There is no lock. The protocol is:
///
/// * the grabber only ever writes the working file, whose reserved name the
///   uploader never selects;
/// * [`publish_working`](Self::publish_working) is the single publication
///   point: a completed name appears atomically, with the full content;
/// * the uploader lists, picks the smallest completed name, reads it and
///   deletes (or quarantines) it.
///
/// ```text
/// {root}/{working_file}                      grabber only
/// {root}/{prefix}{unix_secs}-{nnnnnn}.txt    immutable, uploader only
/// {root}/{quarantine}/…                      operator only
/// ```
#[derive(Debug, Clone)]
pub struct StorageDir {
    root: PathBuf,
    working_file: String,
    prefix: String,
}

impl StorageDir {
    pub fn new(root: impl Into<PathBuf>, working_file: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            working_file: working_file.into(),
            prefix: prefix.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn working_file(&self) -> &str {
        &self.working_file
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn working_path(&self) -> PathBuf {
        self.root.join(&self.working_file)
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn ensure(&self) -> Result<(), EngineError> {
        std::fs::create_dir_all(&self.root)
            .map_err(|e| EngineError::storage(format!("mkdir {}", self.root.display()), e))
    }

    // ── Publish (grabber side) ──

    /// Promote the (closed) working file to a completed file.
    ///
    /// Tries `disambiguator_start`, then increments until a free name is
    /// found. Returns the completed name. The working file no longer exists
    /// afterwards.
    pub fn publish_working(&self, timestamp: u64, disambiguator_start: u32) -> Result<String, EngineError> {
        let working = self.working_path();
        let mut disambiguator = disambiguator_start;
        loop {
            let name = naming::completed_file_name(&self.prefix, timestamp, disambiguator);
            let target = self.root.join(&name);

            match publish_no_clobber(&working, &target) {
                Ok(()) => return Ok(name),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    tracing::debug!(file = %name, "completed name taken, trying next");
                    disambiguator = disambiguator.checked_add(1).ok_or_else(|| {
                        EngineError::storage(
                            format!("publish {}", working.display()),
                            std::io::Error::other("disambiguator exhausted"),
                        )
                    })?;
                }
                Err(e) => {
                    return Err(EngineError::storage(
                        format!("publish {} -> {}", working.display(), target.display()),
                        e,
                    ));
                }
            }
        }
    }

    // ── Consume (uploader side) ──

    /// Names of files eligible for upload, sorted (oldest first).
    pub fn list_completed(&self, strict_names: bool) -> Result<Vec<String>, EngineError> {
        let dir = std::fs::read_dir(&self.root)
            .map_err(|e| EngineError::storage(format!("list {}", self.root.display()), e))?;

        let mut names = Vec::new();
        for entry in dir {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            match entry.file_type() {
                Ok(ft) if ft.is_file() => {}
                _ => continue,
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if self.is_candidate(&name, strict_names) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// The oldest completed file, if any.
    pub fn select_oldest(&self, strict_names: bool) -> Result<Option<String>, EngineError> {
        Ok(self.list_completed(strict_names)?.into_iter().next())
    }

    /// Name filter applied to every listing entry.
    pub fn is_candidate(&self, name: &str, strict_names: bool) -> bool {
        if name == self.working_file {
            return false;
        }
        !strict_names || naming::is_completed_name(&self.prefix, name)
    }

    pub async fn read(&self, name: &str) -> Result<Vec<u8>, EngineError> {
        let path = self.root.join(name);
        tokio::fs::read(&path)
            .await
            .map_err(|e| EngineError::storage(format!("read {}", path.display()), e))
    }

    /// Delete an uploaded file. A file that is already gone is not an error.
    pub fn remove(&self, name: &str) -> Result<(), EngineError> {
        let path = self.root.join(name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EngineError::storage(format!("remove {}", path.display()), e)),
        }
    }

    /// Move a file out of the upload queue into `{root}/{dir}/`.
    pub fn quarantine(&self, name: &str, dir: &str) -> Result<PathBuf, EngineError> {
        let qdir = self.root.join(dir);
        std::fs::create_dir_all(&qdir)
            .map_err(|e| EngineError::storage(format!("mkdir {}", qdir.display()), e))?;
        let from = self.root.join(name);
        let to = qdir.join(name);
        std::fs::rename(&from, &to)
            .map_err(|e| EngineError::storage(format!("quarantine {}", from.display()), e))?;
        Ok(to)
    }
}

/// Pick the upload candidate from an arbitrary listing.
pub fn select_oldest<'a, I>(names: I, working_file: &str, prefix: &str, strict_names: bool) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    names
        .into_iter()
        .filter(|n| *n != working_file)
        .filter(|n| !strict_names || naming::is_completed_name(prefix, n))
        .min()
}

/// Make `from` visible under `to` without ever replacing an existing `to`.
///
/// `hard_link` fails with `AlreadyExists` instead of overwriting, and the new
/// name shows the complete file at once. The working name is unlinked after.
/// Filesystems without hard links fall back to check-then-rename, which is
/// still safe with a single producer.
fn publish_no_clobber(from: &Path, to: &Path) -> std::io::Result<()> {
    match std::fs::hard_link(from, to) {
        Ok(()) => std::fs::remove_file(from),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(e),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(e),
        Err(_) => {
            if to.exists() {
                return Err(std::io::Error::from(ErrorKind::AlreadyExists));
            }
            std::fs::rename(from, to)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(dir: &tempfile::TempDir) -> StorageDir {
        StorageDir::new(dir.path(), "working.tmp", "stream-")
    }

    fn touch(path: &Path, content: &str) {
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn working_file_is_never_selected() {
        let names = ["working.tmp", "stream-1700000002-000000.txt", "stream-1700000001-000000.txt"];
        // every rotation of the listing
        for shift in 0..names.len() {
            let mut listing = names.to_vec();
            listing.rotate_left(shift);
            for strict in [true, false] {
                let picked = select_oldest(listing.iter().copied(), "working.tmp", "stream-", strict);
                assert_eq!(picked, Some("stream-1700000001-000000.txt"));
            }
        }
        assert_eq!(select_oldest(["working.tmp"], "working.tmp", "stream-", false), None);
    }

    #[test]
    fn lax_mode_accepts_foreign_names() {
        let listing = ["a.json", "working.tmp", "stream-1700000001-000000.txt"];
        assert_eq!(select_oldest(listing, "working.tmp", "stream-", false), Some("a.json"));
        assert_eq!(
            select_oldest(listing, "working.tmp", "stream-", true),
            Some("stream-1700000001-000000.txt")
        );
    }

    #[test]
    fn oldest_completed_file_first() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(&dir);
        touch(&s.working_path(), "{}\n");
        touch(&s.path_of("stream-1700000200-000000.txt"), "{}\n");
        touch(&s.path_of("stream-1700000100-000000.txt"), "{}\n");
        touch(&s.path_of("notes.md"), "x");
        std::fs::create_dir(s.path_of("stream-1700000000-000000.txt")).unwrap();

        assert_eq!(
            s.list_completed(true).unwrap(),
            vec!["stream-1700000100-000000.txt", "stream-1700000200-000000.txt"]
        );
        assert_eq!(s.select_oldest(true).unwrap().as_deref(), Some("stream-1700000100-000000.txt"));
    }

    #[test]
    fn publish_skips_taken_names() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(&dir);
        let mut published = Vec::new();
        for i in 0..5 {
            touch(&s.working_path(), &format!("{{\"n\":{i}}}\n"));
            published.push(s.publish_working(1_700_000_000, 0).unwrap());
        }
        assert!(!s.working_path().exists());
        let mut unique = published.clone();
        unique.dedup();
        assert_eq!(unique.len(), 5);
        assert_eq!(published[4], "stream-1700000000-000004.txt");
        // no file was overwritten
        for (i, name) in published.iter().enumerate() {
            let content = std::fs::read_to_string(s.path_of(name)).unwrap();
            assert_eq!(content, format!("{{\"n\":{i}}}\n"));
        }
    }

    #[test]
    fn publish_honours_disambiguator_start() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(&dir);
        touch(&s.working_path(), "{}\n");
        assert_eq!(s.publish_working(1_700_000_000, 7).unwrap(), "stream-1700000000-000007.txt");
    }

    #[test]
    fn publish_without_working_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(&dir);
        assert!(s.publish_working(1_700_000_000, 0).is_err());
    }

    #[test]
    fn quarantine_moves_file_out_of_queue() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(&dir);
        let name = "stream-1700000100-000000.txt";
        touch(&s.path_of(name), "{}\n");

        let moved = s.quarantine(name, "quarantine").unwrap();
        assert!(moved.exists());
        assert!(s.list_completed(true).unwrap().is_empty());
        assert!(s.list_completed(false).unwrap().is_empty());
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(&dir);
        touch(&s.path_of("stream-1700000100-000000.txt"), "{}\n");
        s.remove("stream-1700000100-000000.txt").unwrap();
        s.remove("stream-1700000100-000000.txt").unwrap();
    }
}
