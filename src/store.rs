//! On-disk record store for downloaded pull requests.
//!
//! Each repository owns one JSON file, `{root}/{owner}/{repo}.json`, holding
//! its complete pull request collection as of the last download. Files are
//! replaced atomically (written to a temporary file in the same directory,
//! then renamed over the target) so readers never observe a partial write.
//! Recently loaded record sets are kept in an in-memory cache.

use crate::config::RepoId;
use crate::error::{AnalyticsError, Result};
use crate::types::PullRequest;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;

#[derive(Serialize, Deserialize)]
struct RecordSet {
    repository: RepoId,
    pull_requests: Vec<PullRequest>,
}

#[derive(Clone)]
pub struct RecordStore {
    root: PathBuf,
    cache: Cache<RepoId, Arc<[PullRequest]>>,
}

impl RecordStore {
    pub fn new(root: impl Into<PathBuf>, cache_capacity: u64) -> Self {
        let cache = Cache::builder().max_capacity(cache_capacity).build();
        Self {
            root: root.into(),
            cache,
        }
    }

    pub fn path_for(&self, repo: &RepoId) -> PathBuf {
        self.root
            .join(&repo.owner)
            .join(format!("{}.json", repo.repo))
    }

    /// Replaces the stored record set for `repo` wholesale.
    ///
    /// Records sharing an id collapse to the last one seen, and the result is
    /// ordered by id, so storing the same input twice yields identical files.
    pub async fn replace(&self, repo: &RepoId, pull_requests: Vec<PullRequest>) -> Result<usize> {
        let by_id: BTreeMap<u64, PullRequest> = pull_requests
            .into_iter()
            .map(|pr| (pr.id, pr))
            .collect();
        let records: Arc<[PullRequest]> = by_id.into_values().collect();

        let set = RecordSet {
            repository: repo.clone(),
            pull_requests: records.to_vec(),
        };
        let path = self.path_for(repo);

        tokio::task::spawn_blocking(move || write_atomically(&path, &set))
            .await
            .map_err(|e| AnalyticsError::store(self.path_for(repo).display(), e))??;

        let count = records.len();
        self.cache.insert(repo.clone(), records).await;
        tracing::info!(repo = %repo, records = count, "Stored record set");

        Ok(count)
    }

    /// Loads the stored record set for `repo`; `None` means nothing has been
    /// downloaded yet.
    pub async fn load(&self, repo: &RepoId) -> Result<Option<Arc<[PullRequest]>>> {
        if let Some(records) = self.cache.get(repo).await {
            return Ok(Some(records));
        }

        let path = self.path_for(repo);
        let loaded = tokio::task::spawn_blocking(move || read_record_set(&path))
            .await
            .map_err(|e| AnalyticsError::store(self.path_for(repo).display(), e))??;

        let Some(set) = loaded else {
            return Ok(None);
        };

        let records: Arc<[PullRequest]> = set.pull_requests.into();
        self.cache.insert(repo.clone(), records.clone()).await;
        tracing::debug!(repo = %repo, records = records.len(), "Loaded record set from disk");

        Ok(Some(records))
    }
}

fn write_atomically(path: &Path, set: &RecordSet) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| AnalyticsError::store(path.display(), "path has no parent directory"))?;
    let fail = |e: &dyn std::fmt::Display| AnalyticsError::store(path.display(), e);

    std::fs::create_dir_all(dir).map_err(|e| fail(&e))?;

    let mut file = NamedTempFile::new_in(dir).map_err(|e| fail(&e))?;
    serde_json::to_writer_pretty(&mut file, set).map_err(|e| fail(&e))?;
    file.write_all(b"\n").map_err(|e| fail(&e))?;
    file.as_file().sync_all().map_err(|e| fail(&e))?;
    file.persist(path).map_err(|e| fail(&e.error))?;

    Ok(())
}

fn read_record_set(path: &Path) -> Result<Option<RecordSet>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(AnalyticsError::store(path.display(), e)),
    };

    let set: RecordSet =
        serde_json::from_slice(&bytes).map_err(|e| AnalyticsError::store(path.display(), e))?;

    // Hand-edited files must satisfy the same invariants as downloads.
    let pull_requests = set
        .pull_requests
        .into_iter()
        .map(PullRequest::validate)
        .collect::<Result<Vec<_>>>()
        .map_err(|e| AnalyticsError::store(path.display(), e))?;

    Ok(Some(RecordSet {
        repository: set.repository,
        pull_requests,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::pull_request;

    fn repo() -> RepoId {
        RepoId::new("acme", "widgets").unwrap()
    }

    #[tokio::test]
    async fn test_missing_record_set_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path(), 4);
        assert!(store.load(&repo()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let prs = vec![pull_request(2, "b", Some(30)), pull_request(1, "a", None)];

        let writer = RecordStore::new(dir.path(), 4);
        assert_eq!(writer.replace(&repo(), prs.clone()).await.unwrap(), 2);

        // A fresh store has an empty cache, so this reads the file.
        let reader = RecordStore::new(dir.path(), 4);
        let loaded = reader.load(&repo()).await.unwrap().unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], prs[1]);
        assert_eq!(loaded[1], prs[0]);
        assert!(loaded[0].merged_at.is_none());
    }

    #[tokio::test]
    async fn test_replace_overwrites_and_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path(), 4);
        let path = store.path_for(&repo());

        store
            .replace(&repo(), vec![pull_request(9, "z", None)])
            .await
            .unwrap();

        let prs = vec![pull_request(1, "a", Some(60)), pull_request(2, "b", None)];
        store.replace(&repo(), prs.clone()).await.unwrap();
        let first = std::fs::read(&path).unwrap();
        store.replace(&repo(), prs).await.unwrap();
        let second = std::fs::read(&path).unwrap();

        assert_eq!(first, second);
        let loaded = store.load(&repo()).await.unwrap().unwrap();
        assert!(loaded.iter().all(|pr| pr.id != 9));
    }

    #[tokio::test]
    async fn test_duplicate_ids_keep_last() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path(), 4);

        let stale = pull_request(5, "a", None);
        let fresh = pull_request(5, "a", Some(15));
        store.replace(&repo(), vec![stale, fresh.clone()]).await.unwrap();

        let loaded = store.load(&repo()).await.unwrap().unwrap();
        assert_eq!(&loaded[..], &[fresh]);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path(), 4);
        let path = store.path_for(&repo());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{ not json").unwrap();

        let err = store.load(&repo()).await.unwrap_err();
        assert!(matches!(err, AnalyticsError::StoreUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_record_merged_before_creation_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path(), 4);
        let path = store.path_for(&repo());

        let mut pr = pull_request(1, "a", Some(60));
        pr.merged_at = Some(pr.created_at - chrono::Duration::hours(2));
        let set = RecordSet {
            repository: repo(),
            pull_requests: vec![pr],
        };
        write_atomically(&path, &set).unwrap();

        let err = store.load(&repo()).await.unwrap_err();
        assert!(matches!(err, AnalyticsError::StoreUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_unwritable_root_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file, not a directory").unwrap();

        let store = RecordStore::new(&blocker, 4);
        let err = store
            .replace(&repo(), vec![pull_request(1, "a", None)])
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::StoreUnavailable { .. }));
    }
}
