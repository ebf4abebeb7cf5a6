use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tracing::{debug, info};

use crate::{
    Error, Evaluation, Instructor, Result, BATCH_DIR, FAILURE_DIR, INSTRUCTORS_FILE, LEDGER_FILE,
    NAMES_FILE, SNAPSHOT_FILE,
};

/// Keys of instructors whose evaluations are all durably written, in completion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    keys: Vec<i64>,
    index: HashSet<i64>,
}

impl Ledger {
    pub fn from_keys(keys: impl IntoIterator<Item = i64>) -> Self {
        let mut ledger = Self::default();
        ledger.extend(keys);
        ledger
    }

    pub fn contains(&self, key: i64) -> bool {
        self.index.contains(&key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[i64] {
        &self.keys
    }

    pub fn extend(&mut self, keys: impl IntoIterator<Item = i64>) {
        for key in keys {
            if self.index.insert(key) {
                self.keys.push(key);
            }
        }
    }
}

/// Opaque failure markers, in the order they happened.
pub type FailureLog = Vec<String>;

/// All files of a crawl, rooted at one data directory.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.root.join(LEDGER_FILE)
    }

    pub fn instructors_path(&self) -> PathBuf {
        self.root.join(INSTRUCTORS_FILE)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.root.join(SNAPSHOT_FILE)
    }

    pub fn names_path(&self) -> PathBuf {
        self.root.join(NAMES_FILE)
    }

    pub fn batch_dir(&self) -> PathBuf {
        self.root.join(BATCH_DIR)
    }

    pub fn failure_dir(&self) -> PathBuf {
        self.root.join(FAILURE_DIR)
    }

    /// The ledger has to exist. Without it there is no telling where the last run stopped.
    pub async fn load_ledger(&self) -> Result<Ledger> {
        let path = self.ledger_path();
        if !fs::try_exists(&path).await? {
            return Err(Error::MissingLedger(path));
        }
        let keys: Vec<i64> = read_json(&path).await?;
        Ok(Ledger::from_keys(keys))
    }

    pub async fn save_ledger(&self, ledger: &Ledger) -> Result<()> {
        write_json(&self.ledger_path(), ledger.keys()).await
    }

    pub async fn load_instructors(&self) -> Result<Option<Vec<Instructor>>> {
        let path = self.instructors_path();
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }
        Ok(Some(read_json(&path).await?))
    }

    pub async fn save_instructors(&self, instructors: &[Instructor]) -> Result<()> {
        write_json(&self.instructors_path(), instructors).await
    }

    pub async fn save_names(&self, instructors: &[Instructor]) -> Result<()> {
        let names = instructors
            .iter()
            .map(|inst| inst.name.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        fs::write(self.names_path(), names).await?;
        Ok(())
    }

    /// Writes a new batch file tagged `tag`. An existing batch is never overwritten.
    pub async fn write_batch(&self, tag: usize, evaluations: &[Evaluation]) -> Result<PathBuf> {
        let path = next_free_path(&self.batch_dir(), "evaluations", tag).await?;
        write_json(&path, evaluations).await?;
        Ok(path)
    }

    pub async fn write_failures(&self, tag: usize, failures: &[String]) -> Result<PathBuf> {
        let path = next_free_path(&self.failure_dir(), "failures", tag).await?;
        write_json(&path, failures).await?;
        Ok(path)
    }

    /// Batch files sorted by their tag, then by their collision suffix.
    pub async fn batch_files(&self) -> Result<Vec<PathBuf>> {
        let dir = self.batch_dir();
        if !fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }
        let mut tagged = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if let Some(tag) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| parse_tag(n, "evaluations"))
            {
                tagged.push((tag, path));
            }
        }
        tagged.sort();
        Ok(tagged.into_iter().map(|(_, path)| path).collect())
    }

    /// Merges every batch file, followed by `residual`, into the snapshot, dropping records already
    /// seen under the same `Key2`. Returns the number of records written.
    pub async fn write_snapshot(&self, residual: &[Evaluation]) -> Result<usize> {
        let mut seen = HashSet::new();
        let mut merged: Vec<Evaluation> = Vec::new();
        for path in self.batch_files().await? {
            let batch: Vec<Evaluation> = read_json(&path).await?;
            debug!(path = %path.display(), records = batch.len(), "merging batch");
            merged.extend(batch.into_iter().filter(|e| seen.insert(e.key2.clone())));
        }
        merged.extend(
            residual
                .iter()
                .filter(|e| seen.insert(e.key2.clone()))
                .cloned(),
        );
        write_json(&self.snapshot_path(), &merged).await?;
        info!(
            "Evaluations written to \"{}\".",
            self.snapshot_path().display()
        );
        Ok(merged.len())
    }
}

/// `<stem>_<tag>.json`, or `<stem>_<tag>.<k>.json` with the lowest free `k`.
async fn next_free_path(dir: &Path, stem: &str, tag: usize) -> Result<PathBuf> {
    fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{stem}_{tag}.json"));
    if !fs::try_exists(&path).await? {
        return Ok(path);
    }
    let mut k = 1;
    loop {
        let path = dir.join(format!("{stem}_{tag}.{k}.json"));
        if !fs::try_exists(&path).await? {
            return Ok(path);
        }
        k += 1;
    }
}

/// Reads `(tag, k)` back out of a name made by `next_free_path`.
fn parse_tag(file_name: &str, stem: &str) -> Option<(usize, usize)> {
    let rest = file_name
        .strip_prefix(stem)?
        .strip_prefix('_')?
        .strip_suffix(".json")?;
    match rest.split_once('.') {
        Some((tag, k)) => Some((tag.parse().ok()?, k.parse().ok()?)),
        None => Some((rest.parse().ok()?, 0)),
    }
}

pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Writes next to `path` and renames over it, so readers never see a half-written file.
pub(crate) async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn eval(key2: &str) -> Evaluation {
        serde_json::from_value(serde_json::json!({
            "Key2": key2,
            "DepartmentCode": null,
            "InstructorTitle": null,
            "OriginalSource": null,
        }))
        .unwrap()
    }

    #[test]
    fn ledger_ignores_repeated_keys() {
        let mut ledger = Ledger::from_keys([4, 2, 4]);
        ledger.extend([2, 9]);
        assert_eq!(ledger.keys(), &[4, 2, 9]);
        assert!(ledger.contains(9));
        assert!(!ledger.contains(5));
    }

    #[test]
    fn tags_parse_back() {
        assert_eq!(parse_tag("evaluations_12.json", "evaluations"), Some((12, 0)));
        assert_eq!(parse_tag("evaluations_12.3.json", "evaluations"), Some((12, 3)));
        assert_eq!(parse_tag("evaluations_12.json.tmp", "evaluations"), None);
        assert_eq!(parse_tag("failures_12.json", "evaluations"), None);
    }

    #[tokio::test]
    async fn missing_ledger_is_fatal() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        match store.load_ledger().await {
            Err(Error::MissingLedger(path)) => assert_eq!(path, store.ledger_path()),
            other => panic!("expected MissingLedger, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ledger_round_trips_as_flat_list() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        store.save_ledger(&Ledger::from_keys([7, -3])).await.unwrap();

        let raw = std::fs::read_to_string(store.ledger_path()).unwrap();
        assert_eq!(raw, "[7,-3]");
        assert_eq!(store.load_ledger().await.unwrap().keys(), &[7, -3]);
    }

    #[tokio::test]
    async fn batches_are_never_overwritten() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());

        let first = store.write_batch(4, &[eval("A")]).await.unwrap();
        let second = store.write_batch(4, &[eval("B")]).await.unwrap();
        let third = store.write_batch(0, &[eval("C")]).await.unwrap();

        assert!(first.ends_with("evaluations_4.json"));
        assert!(second.ends_with("evaluations_4.1.json"));
        assert_eq!(store.batch_files().await.unwrap(), vec![third, first, second]);
    }

    #[tokio::test]
    async fn snapshot_drops_duplicate_records() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        store.write_batch(0, &[eval("A"), eval("B")]).await.unwrap();
        store.write_batch(2, &[eval("B"), eval("C")]).await.unwrap();

        assert_eq!(store.write_snapshot(&[]).await.unwrap(), 3);
        let snapshot: Vec<Evaluation> = read_json(&store.snapshot_path()).await.unwrap();
        let keys: Vec<_> = snapshot.iter().map(|e| e.key2.as_str()).collect();
        assert_eq!(keys, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn snapshot_appends_unflushed_records() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        store.write_batch(0, &[eval("A")]).await.unwrap();

        assert_eq!(store.write_snapshot(&[eval("A"), eval("Z")]).await.unwrap(), 2);
        let snapshot: Vec<Evaluation> = read_json(&store.snapshot_path()).await.unwrap();
        let keys: Vec<_> = snapshot.iter().map(|e| e.key2.as_str()).collect();
        assert_eq!(keys, vec!["A", "Z"]);
    }
}
