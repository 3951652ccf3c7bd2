/*
    repository.rs - Versioned document store with optimistic concurrency

    <dir>/<version>   content of one committed version, never modified

    Roles:
    - master: accepts `commit(data, from_version)`, which succeeds only when
      `from_version` is the latest version (0 for an empty repository)
    - slave: accepts `put(data, version)` replicating a master's version

    After every write the oldest versions beyond `retention_limit` are purged
    (0 keeps everything). Writes are serialized; reads are not.
*/

use crate::core_log::range_set::RangeSet;
use crate::core_log::store::log_file::write_atomically;
use crate::core_repo::errors::{RepositoryError, RepositoryResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

const TEMP_SUFFIX: &str = ".tmp";

/// Configuration of one repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub name: String,
    pub dir: PathBuf,
    #[serde(default)]
    pub master: bool,
    /// Versions kept after a write; 0 keeps all
    #[serde(default)]
    pub retention_limit: u64,
}

#[derive(Debug, Clone, Copy)]
struct Role {
    master: bool,
    retention_limit: u64,
}

/// A repository of immutable, numbered versions
pub struct VersionedRepository {
    name: String,
    dir: PathBuf,
    role: RwLock<Role>,
    write_lock: Mutex<()>,
}

impl VersionedRepository {
    /// Open (or create) the repository directory
    pub fn open(config: RepositoryConfig) -> RepositoryResult<Self> {
        fs::create_dir_all(&config.dir)?;
        remove_stale_temp_files(&config.dir)?;
        info!(
            repository = %config.name,
            dir = %config.dir.display(),
            master = config.master,
            "opened repository"
        );

        Ok(Self {
            name: config.name,
            dir: config.dir,
            role: RwLock::new(Role { master: config.master, retention_limit: config.retention_limit }),
            write_lock: Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_master(&self) -> bool {
        self.role().master
    }

    pub fn retention_limit(&self) -> u64 {
        self.role().retention_limit
    }

    fn role(&self) -> Role {
        *self.role.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn version_path(&self, version: u64) -> PathBuf {
        self.dir.join(version.to_string())
    }

    /// Content of `version`, or `None` when it was never committed or has
    /// been purged
    pub fn checkout(&self, version: u64) -> RepositoryResult<Option<Vec<u8>>> {
        if version == 0 {
            return Err(RepositoryError::InvalidVersion(version));
        }
        match fs::read(self.version_path(version)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Latest version and its content
    pub fn checkout_latest(&self) -> RepositoryResult<Option<(u64, Vec<u8>)>> {
        match self.get_highest_version()? {
            0 => Ok(None),
            version => Ok(self.checkout(version)?.map(|data| (version, data))),
        }
    }

    /// Commit `data` as the successor of `from_version`.
    ///
    /// Returns `false` when `data` equals the latest version's content; no
    /// version is created then.
    pub fn commit(&self, data: &[u8], from_version: u64) -> RepositoryResult<bool> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.is_master() {
            return Err(RepositoryError::NotMaster);
        }

        let latest = self.get_highest_version()?;
        if from_version != latest {
            debug!(repository = %self.name, latest, from_version, "commit conflict");
            return Err(RepositoryError::Conflict { expected: latest, actual: from_version });
        }

        if latest > 0 && self.checkout(latest)?.as_deref() == Some(data) {
            debug!(repository = %self.name, version = latest, "content unchanged, nothing committed");
            return Ok(false);
        }

        let version = latest + 1;
        write_atomically(&self.version_path(version), data)?;
        metrics::counter!("repository.commits").increment(1);
        info!(repository = %self.name, version, bytes = data.len(), "committed version");

        self.purge_locked()?;
        Ok(true)
    }

    /// Store a version replicated from the master.
    ///
    /// Returns `false` when the version is already present.
    pub fn put(&self, data: &[u8], version: u64) -> RepositoryResult<bool> {
        if version == 0 {
            return Err(RepositoryError::InvalidVersion(version));
        }

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_master() {
            return Err(RepositoryError::NotSlave);
        }

        let path = self.version_path(version);
        if path.exists() {
            return Ok(false);
        }

        write_atomically(&path, data)?;
        debug!(repository = %self.name, version, "stored replicated version");
        self.purge_locked()?;
        Ok(true)
    }

    /// All stored version numbers
    pub fn get_version_range(&self) -> RepositoryResult<RangeSet> {
        Ok(RangeSet::from_ids(&self.versions()?))
    }

    /// Latest stored version, 0 when empty
    pub fn get_highest_version(&self) -> RepositoryResult<u64> {
        Ok(self.versions()?.last().copied().unwrap_or(0))
    }

    /// Change role and retention limit; a tighter limit purges at once
    pub fn updated(&self, master: bool, retention_limit: u64) -> RepositoryResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let previous = {
            let mut role = self.role.write().unwrap_or_else(PoisonError::into_inner);
            let previous = *role;
            *role = Role { master, retention_limit };
            previous
        };
        info!(repository = %self.name, master, retention_limit, "repository reconfigured");

        let tighter = retention_limit > 0
            && (previous.retention_limit == 0 || retention_limit < previous.retention_limit);
        if tighter {
            self.purge_locked()?;
        }
        Ok(())
    }

    /// Remove the oldest versions beyond the retention limit; returns how
    /// many were removed
    pub fn purge(&self) -> RepositoryResult<usize> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.purge_locked()
    }

    fn purge_locked(&self) -> RepositoryResult<usize> {
        let limit = self.retention_limit();
        if limit == 0 {
            return Ok(0);
        }

        let versions = self.versions()?;
        let excess = versions.len().saturating_sub(limit as usize);
        for version in &versions[..excess] {
            match fs::remove_file(self.version_path(*version)) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        if excess > 0 {
            info!(repository = %self.name, removed = excess, limit, "purged old versions");
        }
        Ok(excess)
    }

    /// Stored versions, ascending
    fn versions(&self) -> RepositoryResult<Vec<u64>> {
        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(version) = entry.file_name().to_str().and_then(|n| n.parse::<u64>().ok()) {
                if version > 0 {
                    versions.push(version);
                }
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }
}

fn remove_stale_temp_files(dir: &Path) -> RepositoryResult<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_str().is_some_and(|n| n.ends_with(TEMP_SUFFIX)) {
            warn!(file = ?name, "removing interrupted write");
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn repo(master: bool, retention_limit: u64) -> (TempDir, VersionedRepository) {
        let dir = tempdir().unwrap();
        let repo = VersionedRepository::open(RepositoryConfig {
            name: "deployment".to_string(),
            dir: dir.path().join("repo"),
            master,
            retention_limit,
        })
        .unwrap();
        (dir, repo)
    }

    #[test]
    fn test_commit_and_checkout() {
        let (_dir, repo) = repo(true, 0);
        assert_eq!(repo.get_highest_version().unwrap(), 0);
        assert!(repo.checkout_latest().unwrap().is_none());

        assert!(repo.commit(b"v1", 0).unwrap());
        assert!(repo.commit(b"v2", 1).unwrap());

        assert_eq!(repo.checkout(1).unwrap().as_deref(), Some(&b"v1"[..]));
        assert_eq!(repo.checkout_latest().unwrap(), Some((2, b"v2".to_vec())));
        assert_eq!(repo.checkout(3).unwrap(), None);
        assert!(matches!(repo.checkout(0), Err(RepositoryError::InvalidVersion(0))));
    }

    #[test]
    fn test_stale_commit_conflicts() {
        let (_dir, repo) = repo(true, 0);
        repo.commit(b"a", 0).unwrap();
        repo.commit(b"b", 1).unwrap();

        let err = repo.commit(b"c", 1).unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict { expected: 2, actual: 1 }));
        assert!(matches!(repo.commit(b"c", 0), Err(RepositoryError::Conflict { .. })));
        assert_eq!(repo.get_highest_version().unwrap(), 2);
    }

    #[test]
    fn test_identical_commit_is_noop() {
        let (_dir, repo) = repo(true, 0);
        assert!(repo.commit(b"same", 0).unwrap());
        assert!(!repo.commit(b"same", 1).unwrap());
        assert_eq!(repo.get_highest_version().unwrap(), 1);

        // Only the immediately preceding version is compared.
        assert!(repo.commit(b"other", 1).unwrap());
        assert!(repo.commit(b"same", 2).unwrap());
        assert_eq!(repo.get_highest_version().unwrap(), 3);
    }

    #[test]
    fn test_slave_rejects_commit() {
        let (_dir, repo) = repo(false, 0);
        assert!(matches!(repo.commit(b"x", 0), Err(RepositoryError::NotMaster)));
        assert_eq!(repo.get_highest_version().unwrap(), 0);
    }

    #[test]
    fn test_slave_put() {
        let (_dir, repo) = repo(false, 0);
        assert!(repo.put(b"v3", 3).unwrap());
        assert!(!repo.put(b"other", 3).unwrap());
        assert!(repo.put(b"v1", 1).unwrap());

        assert_eq!(repo.get_version_range().unwrap().to_string(), "1,3");
        assert_eq!(repo.checkout(3).unwrap().as_deref(), Some(&b"v3"[..]));
        assert!(matches!(repo.put(b"x", 0), Err(RepositoryError::InvalidVersion(0))));
    }

    #[test]
    fn test_master_rejects_put() {
        let (_dir, master) = repo(true, 0);
        assert!(matches!(master.put(b"x", 1), Err(RepositoryError::NotSlave)));
    }

    #[test]
    fn test_retention_keeps_latest() {
        let (_dir, repo) = repo(true, 3);
        for (i, data) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            repo.commit(data.as_bytes(), i as u64).unwrap();
        }

        assert_eq!(repo.get_version_range().unwrap().to_string(), "3-5");
        assert_eq!(repo.checkout(1).unwrap(), None);
        // Numbering continues after a purge.
        assert!(repo.commit(b"f", 5).unwrap());
        assert_eq!(repo.get_version_range().unwrap().to_string(), "4-6");
    }

    #[test]
    fn test_updated_changes_role_and_purges() {
        let (_dir, repo) = repo(true, 0);
        for (i, data) in ["a", "b", "c", "d"].iter().enumerate() {
            repo.commit(data.as_bytes(), i as u64).unwrap();
        }

        repo.updated(true, 2).unwrap();
        assert_eq!(repo.get_version_range().unwrap().to_string(), "3-4");

        repo.updated(false, 5).unwrap();
        assert!(!repo.is_master());
        assert_eq!(repo.retention_limit(), 5);
        assert!(matches!(repo.commit(b"e", 4), Err(RepositoryError::NotMaster)));
        assert_eq!(repo.get_version_range().unwrap().to_string(), "3-4");
    }

    #[test]
    fn test_interrupted_writes_are_cleaned() {
        let dir = tempdir().unwrap();
        let config = RepositoryConfig {
            name: "r".to_string(),
            dir: dir.path().to_path_buf(),
            master: true,
            retention_limit: 0,
        };
        fs::write(dir.path().join("1.tmp"), b"partial").unwrap();

        let repo = VersionedRepository::open(config).unwrap();
        assert!(!dir.path().join("1.tmp").exists());
        assert_eq!(repo.get_highest_version().unwrap(), 0);
    }
}
