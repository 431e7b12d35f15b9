//! JSON-file storage backend
//!
//! All keys live in one JSON object on disk.  Every write rewrites the file
//! through a temporary sibling and a rename, so a crash mid-write leaves the
//! previous contents intact.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use directories::ProjectDirs;

use super::Storage;
use crate::error::{AuthError, Result};

/// Storage backed by a single JSON map file
pub struct FileStorage {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileStorage {
    /// Creates a store named `file_name` in the user's data directory.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the data directory cannot be
    /// determined or created.
    pub fn new(file_name: &str) -> Result<Self> {
        let proj_dirs = ProjectDirs::from("st", "furryli", "furlist")
            .ok_or_else(|| AuthError::Storage("Could not determine data directory".into()))?;

        Self::new_with_path(proj_dirs.data_dir().join(file_name))
    }

    /// Creates a store at an explicit file path.
    ///
    /// The parent directory is created if needed; the file itself is created
    /// on first write.
    ///
    /// # Examples
    ///
    /// ```
    /// use furlist_auth::storage::{FileStorage, Storage};
    ///
    /// let dir = std::env::temp_dir().join("furlist-doc-example");
    /// let storage = FileStorage::new_with_path(dir.join("state.json")).unwrap();
    /// storage.set("fbl:pdsHost", "https://pds.example").unwrap();
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AuthError::Storage(format!(
                    "Failed to create storage directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| AuthError::Storage("file storage lock poisoned".to_string()))
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Like `read_map`, but an unparseable file counts as empty so the next
    /// write replaces it.
    fn read_map_for_write(&self) -> Result<BTreeMap<String, String>> {
        match self.read_map() {
            Err(AuthError::Serialization(e)) => {
                tracing::warn!("Discarding corrupt storage file {}: {}", self.path.display(), e);
                Ok(BTreeMap::new())
            }
            other => other,
        }
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<()> {
        let tmp = self
            .path
            .with_extension(format!("json.{}.tmp", std::process::id()));
        write_private(&tmp, &serde_json::to_vec_pretty(map)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn modify<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool,
    {
        let _guard = self.lock()?;
        let mut map = self.read_map_for_write()?;
        if f(&mut map) {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

/// Writes `contents` to a fresh file readable only by the owner.
fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    use std::io::Write;

    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    Ok(())
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_map()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.modify(|map| {
            map.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.modify(|map| map.remove(key).is_some())
    }

    /// Claims the file by renaming it aside before reading, so two
    /// processes racing for the same key cannot both take it.
    fn take_if(&self, key: &str, consume: &dyn Fn(&str) -> bool) -> Result<Option<String>> {
        let _guard = self.lock()?;

        let claimed = self
            .path
            .with_extension(format!("json.{}.claim", std::process::id()));
        match std::fs::rename(&self.path, &claimed) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let mut map: BTreeMap<String, String> = match std::fs::read_to_string(&claimed) {
            Ok(contents) if contents.trim().is_empty() => BTreeMap::new(),
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("Discarding corrupt storage file {}: {}", self.path.display(), e);
                BTreeMap::new()
            }),
            Err(e) => {
                let _ = std::fs::rename(&claimed, &self.path);
                return Err(e.into());
            }
        };

        let taken = match map.get(key) {
            Some(value) if consume(value) => map.remove(key),
            _ => None,
        };

        match (&taken, self.path.exists()) {
            // A concurrent write recreated the file; it wins.
            (_, true) => std::fs::remove_file(&claimed)?,
            (Some(_), false) => {
                self.write_map(&map)?;
                std::fs::remove_file(&claimed)?;
            }
            (None, false) => std::fs::rename(&claimed, &self.path)?,
        }

        Ok(taken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_storage() -> (FileStorage, TempDir) {
        let dir = TempDir::new().expect("failed to create tempdir");
        let storage = FileStorage::new_with_path(dir.path().join("nested/state.json"))
            .expect("failed to create file storage");
        (storage, dir)
    }

    #[test]
    fn test_get_on_missing_file_returns_none() {
        let (storage, _dir) = temp_storage();
        assert_eq!(storage.get("anything").unwrap(), None);
    }

    #[test]
    fn test_values_survive_reopen() {
        let (storage, dir) = temp_storage();
        storage.set("fbl:pdsHost", "https://pds.example").unwrap();
        storage.set("other", "value").unwrap();

        let reopened = FileStorage::new_with_path(dir.path().join("nested/state.json")).unwrap();
        assert_eq!(
            reopened.get("fbl:pdsHost").unwrap().as_deref(),
            Some("https://pds.example")
        );
        assert_eq!(reopened.get("other").unwrap().as_deref(), Some("value"));
    }

    #[test]
    fn test_remove_only_touches_one_key() {
        let (storage, _dir) = temp_storage();
        storage.set("a", "1").unwrap();
        storage.set("b", "2").unwrap();
        storage.remove("a").unwrap();
        storage.remove("a").unwrap();

        assert_eq!(storage.get("a").unwrap(), None);
        assert_eq!(storage.get("b").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let (storage, _dir) = temp_storage();
        std::fs::write(storage.path(), "{not json").unwrap();
        assert!(matches!(
            storage.get("a"),
            Err(AuthError::Serialization(_))
        ));
    }

    #[test]
    fn test_corrupt_file_is_replaced_on_write() {
        let (storage, _dir) = temp_storage();
        std::fs::write(storage.path(), "{not json").unwrap();

        storage.set("a", "1").unwrap();
        assert_eq!(storage.get("a").unwrap().as_deref(), Some("1"));

        std::fs::write(storage.path(), "{not json").unwrap();
        storage.remove("a").unwrap();
        assert_eq!(storage.get("a").unwrap(), None);
    }

    #[test]
    fn test_no_scratch_files_left_behind() {
        let (storage, _dir) = temp_storage();
        storage.set("a", "1").unwrap();
        storage.set("b", "2").unwrap();
        storage.take_if("a", &|_| true).unwrap();
        storage.take_if("b", &|_| false).unwrap();

        let parent = storage.path().parent().unwrap();
        let names: Vec<String> = std::fs::read_dir(parent)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["state.json".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_is_private_to_owner() {
        use std::os::unix::fs::PermissionsExt;

        let (storage, _dir) = temp_storage();
        storage.set("fbl:session:v1", "{\"access_token\":\"secret\"}").unwrap();
        let mode = std::fs::metadata(storage.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_take_if_consumes_only_accepted_values() {
        let (storage, _dir) = temp_storage();
        assert_eq!(storage.take_if("k", &|_| true).unwrap(), None);

        storage.set("k", "v").unwrap();
        storage.set("other", "x").unwrap();
        assert_eq!(storage.take_if("k", &|v| v == "nope").unwrap(), None);
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("v"));

        assert_eq!(storage.take_if("k", &|v| v == "v").unwrap().as_deref(), Some("v"));
        assert_eq!(storage.get("k").unwrap(), None);
        assert_eq!(storage.get("other").unwrap().as_deref(), Some("x"));
    }

    #[test]
    fn test_take_if_is_single_use_across_instances() {
        let (storage, dir) = temp_storage();
        storage.set("k", "v").unwrap();
        let second = FileStorage::new_with_path(dir.path().join("nested/state.json")).unwrap();

        let first_take = storage.take_if("k", &|_| true).unwrap();
        let second_take = second.take_if("k", &|_| true).unwrap();
        assert_eq!(first_take.as_deref(), Some("v"));
        assert_eq!(second_take, None);
    }
}
