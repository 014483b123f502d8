mod index;
pub mod summary;

pub use index::RebuildReport;
pub use summary::ResultSummary;

use crate::collectors::Snapshot;
use chrono::{DateTime, Utc};
use index::{Index, IndexEntry, RECORD_EXTENSION, STAGING_PREFIX};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

const MAX_KEY_NAME_LEN: usize = 64;
const ID_PREFIX_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub storage_key: String,
    pub payload: Snapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMeta {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub storage_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub count: usize,
    pub total_size: u64,
    pub storage_root: String,
}

impl ResultRecord {
    pub fn meta(&self) -> ResultMeta {
        ResultMeta {
            id: self.id,
            name: self.name.clone(),
            created_at: self.created_at,
            storage_key: self.storage_key.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("результат {id} не найден")]
    NotFound { id: String },
    #[error("результат {id} повреждён: {reason}")]
    Corrupted { id: String, reason: String },
    #[error("префикс {id} соответствует {matches} результатам, укажите полный id")]
    Ambiguous { id: String, matches: usize },
    #[error("ошибка хранилища ({context}): {source}")]
    Storage {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    pub(crate) fn storage(context: impl Into<String>, source: io::Error) -> Self {
        StoreError::Storage {
            context: context.into(),
            source,
        }
    }

    fn not_found(id: impl Into<String>) -> Self {
        StoreError::NotFound { id: id.into() }
    }

    fn corrupted(id: &Uuid, reason: impl Into<String>) -> Self {
        StoreError::Corrupted {
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::NotFound { .. } => "not_found",
            StoreError::Corrupted { .. } => "corrupted",
            StoreError::Ambiguous { .. } => "invalid_request",
            StoreError::Storage { .. } => "storage_failure",
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            StoreError::NotFound { id }
            | StoreError::Corrupted { id, .. }
            | StoreError::Ambiguous { id, .. } => Some(id),
            StoreError::Storage { .. } => None,
        }
    }
}

pub struct ResultStore {
    root: PathBuf,
    index: RwLock<Index>,
}

impl ResultStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let (store, _) = Self::open_with_report(root)?;
        Ok(store)
    }

    pub fn open_with_report(root: impl AsRef<Path>) -> Result<(Self, RebuildReport), StoreError> {
        let root = root.as_ref();
        fs::create_dir_all(root)
            .map_err(|source| StoreError::storage("создание каталога результатов", source))?;
        let root = fs::canonicalize(root)
            .map_err(|source| StoreError::storage("разрешение пути каталога", source))?;

        let (index, report) = Index::rebuild(&root)?;
        Ok((
            Self {
                root,
                index: RwLock::new(index),
            },
            report,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn save(&self, payload: Snapshot, name: &str) -> Result<ResultRecord, StoreError> {
        self.save_at(payload, name, Utc::now())
    }

    pub(crate) fn save_at(
        &self,
        payload: Snapshot,
        name: &str,
        created_at: DateTime<Utc>,
    ) -> Result<ResultRecord, StoreError> {
        let id = Uuid::new_v4();
        let storage_key = storage_key(name, created_at, &id);
        let record = ResultRecord {
            id,
            name: name.to_string(),
            created_at,
            storage_key,
            payload,
        };

        let bytes = serde_json::to_vec_pretty(&record).map_err(|err| {
            StoreError::storage(
                "сериализация записи",
                io::Error::new(io::ErrorKind::InvalidData, err),
            )
        })?;

        let final_path = self.root.join(&record.storage_key);
        let staging_path = self.staging_path(&record.storage_key, "tmp");
        if let Err(err) = write_synced(&staging_path, &bytes) {
            discard(&staging_path);
            return Err(StoreError::storage("запись временного файла", err));
        }

        {
            let mut index = self.write_index();
            if fs::symlink_metadata(&final_path).is_ok() {
                discard(&staging_path);
                return Err(StoreError::storage(
                    format!("публикация {}", record.storage_key),
                    io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        "файл с таким именем уже существует",
                    ),
                ));
            }
            if let Err(err) = fs::rename(&staging_path, &final_path) {
                discard(&staging_path);
                return Err(StoreError::storage(
                    format!("публикация {}", record.storage_key),
                    err,
                ));
            }
            index.insert(IndexEntry {
                meta: record.meta(),
                size: bytes.len() as u64,
            });
        }
        sync_dir(&self.root);

        info!(
            id = %record.id,
            name = %record.name,
            storage_key = %record.storage_key,
            size = bytes.len(),
            "результат сохранён"
        );
        Ok(record)
    }

    pub fn load(&self, id: &str) -> Result<ResultRecord, StoreError> {
        let (record, _) = self.read_indexed(id)?;
        Ok(record)
    }

    pub fn export(&self, id: &str) -> Result<(String, Vec<u8>), StoreError> {
        let (record, bytes) = self.read_indexed(id)?;
        Ok((record.storage_key, bytes))
    }

    pub fn summarize(&self, id: &str) -> Result<ResultSummary, StoreError> {
        let record = self.load(id)?;
        Ok(summary::summarize(&record))
    }

    pub fn list(&self, limit: Option<usize>) -> Vec<ResultMeta> {
        self.discover_all();
        let mut metas = self.read_index().sorted_metas();
        if let Some(limit) = limit {
            metas.truncate(limit);
        }
        metas
    }

    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let Some(uuid) = self.resolve(id)? else {
            return Ok(false);
        };

        let staging_path = {
            let mut index = self.write_index();
            let Some(entry) = index.get(&uuid).cloned() else {
                return Ok(false);
            };

            let path = self.root.join(&entry.meta.storage_key);
            let staging_path = self.staging_path(&entry.meta.storage_key, "deleting");
            match fs::rename(&path, &staging_path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    warn!(
                        id = %uuid,
                        storage_key = %entry.meta.storage_key,
                        "файл записи уже отсутствовал, запись снята с индекса"
                    );
                    index.remove(&uuid);
                    return Ok(true);
                }
                Err(err) => {
                    return Err(StoreError::storage(
                        format!("удаление {}", entry.meta.storage_key),
                        err,
                    ));
                }
            }
            index.remove(&uuid);
            staging_path
        };

        if let Err(err) = fs::remove_file(&staging_path) {
            // Файл уже невидим; остаток будет убран при следующем открытии.
            warn!(
                path = %staging_path.display(),
                error = %err,
                "не удалось удалить временный файл"
            );
        }
        info!(id = %uuid, "результат удалён");
        Ok(true)
    }

    pub fn statistics(&self) -> Statistics {
        self.discover_all();
        let index = self.read_index();
        Statistics {
            count: index.len(),
            total_size: index.total_size(),
            storage_root: self.root.display().to_string(),
        }
    }

    fn read_indexed(&self, id: &str) -> Result<(ResultRecord, Vec<u8>), StoreError> {
        let uuid = self.resolve(id)?.ok_or_else(|| StoreError::not_found(id))?;
        let entry = self
            .read_index()
            .get(&uuid)
            .cloned()
            .ok_or_else(|| StoreError::not_found(id))?;

        let path = self.root.join(&entry.meta.storage_key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                // Параллельный delete снимает запись с индекса под той же блокировкой,
                // под которой убирает файл: повторная проверка отличает его от порчи.
                if self.read_index().contains(&uuid) {
                    warn!(
                        id = %uuid,
                        storage_key = %entry.meta.storage_key,
                        "файл проиндексированной записи отсутствует"
                    );
                    return Err(StoreError::corrupted(
                        &uuid,
                        "файл записи отсутствует на диске",
                    ));
                }
                return Err(StoreError::not_found(id));
            }
            Err(err) => {
                warn!(id = %uuid, error = %err, "файл записи не читается");
                return Err(StoreError::corrupted(
                    &uuid,
                    format!("файл не читается: {err}"),
                ));
            }
        };

        let record: ResultRecord = serde_json::from_slice(&bytes).map_err(|err| {
            warn!(id = %uuid, error = %err, "запись не проходит структурную проверку");
            StoreError::corrupted(&uuid, format!("некорректная структура: {err}"))
        })?;
        if record.id != uuid {
            return Err(StoreError::corrupted(
                &uuid,
                format!("в файле записан другой id: {}", record.id),
            ));
        }
        if record.storage_key != entry.meta.storage_key {
            return Err(StoreError::corrupted(
                &uuid,
                format!("в файле записан другой storage_key: {}", record.storage_key),
            ));
        }

        debug!(id = %uuid, size = bytes.len(), "результат прочитан");
        Ok((record, bytes))
    }

    // Полный UUID или уникальный префикс из первых 8 hex-символов, как в storage_key.
    fn resolve(&self, id: &str) -> Result<Option<Uuid>, StoreError> {
        if let Ok(uuid) = Uuid::parse_str(id) {
            if !self.read_index().contains(&uuid) {
                self.discover_prefix(&uuid.simple().to_string()[..ID_PREFIX_LEN])?;
            }
            return Ok(self.read_index().contains(&uuid).then_some(uuid));
        }

        let prefix = id.to_ascii_lowercase();
        if prefix.len() != ID_PREFIX_LEN || !prefix.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Ok(None);
        }
        self.discover_prefix(&prefix)?;
        let ids = self.read_index().ids_with_prefix(&prefix);
        match ids.as_slice() {
            [] => Ok(None),
            [uuid] => Ok(Some(*uuid)),
            _ => Err(StoreError::Ambiguous {
                id: id.to_string(),
                matches: ids.len(),
            }),
        }
    }

    fn discover_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        let suffix = format!("_{prefix}{RECORD_EXTENSION}");
        self.discover(|file_name| file_name.ends_with(&suffix))
    }

    fn discover_all(&self) {
        if let Err(err) = self.discover(|_| true) {
            warn!(error = %err, "не удалось проверить каталог на новые записи");
        }
    }

    fn discover(&self, matches: impl Fn(&str) -> bool) -> Result<usize, StoreError> {
        let known = self.read_index().storage_keys();
        let found = index::scan_unindexed(&self.root, &known, matches)?;
        if found.is_empty() {
            return Ok(0);
        }

        let mut index = self.write_index();
        let mut added = 0;
        for entry in found {
            // Файл мог быть удалён между сканированием и блокировкой.
            if index.contains(&entry.meta.id)
                || fs::symlink_metadata(self.root.join(&entry.meta.storage_key)).is_err()
            {
                continue;
            }
            info!(
                id = %entry.meta.id,
                storage_key = %entry.meta.storage_key,
                "запись другого процесса добавлена в индекс"
            );
            index.insert(entry);
            added += 1;
        }
        Ok(added)
    }

    fn staging_path(&self, storage_key: &str, suffix: &str) -> PathBuf {
        self.root.join(format!(
            "{STAGING_PREFIX}{storage_key}.{}.{suffix}",
            Uuid::new_v4().simple()
        ))
    }

    fn read_index(&self) -> RwLockReadGuard<'_, Index> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, Index> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// `{имя}_{ГГГГММДД_ччммсс}_{первые 8 символов id}.json`
pub fn storage_key(name: &str, created_at: DateTime<Utc>, id: &Uuid) -> String {
    let mut safe: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_KEY_NAME_LEN)
        .collect();
    if safe.is_empty() {
        safe.push_str("result");
    }
    let id = id.simple().to_string();
    format!(
        "{safe}_{}_{}{RECORD_EXTENSION}",
        created_at.format("%Y%m%d_%H%M%S"),
        &id[..ID_PREFIX_LEN]
    )
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn discard(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "не удалось удалить временный файл");
        }
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(err) = File::open(dir).and_then(|d| d.sync_all()) {
        debug!(dir = %dir.display(), error = %err, "fsync каталога не выполнен");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::{json, Value};
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn payload(value: Value) -> Snapshot {
        match value {
            Value::Object(map) => map,
            other => panic!("ожидался объект, получено {other}"),
        }
    }

    fn open_temp() -> (TempDir, ResultStore) {
        let tmp = TempDir::new().unwrap();
        let store = ResultStore::open(tmp.path()).unwrap();
        (tmp, store)
    }

    #[test]
    fn save_load_delete_scenario() {
        let (_tmp, store) = open_temp();
        let p = payload(json!({"cpu": {"cores": 4}}));

        let saved = store.save(p.clone(), "t1").unwrap();
        let id = saved.id.to_string();
        let loaded = store.load(&id).unwrap();
        assert_eq!(loaded.payload, p);
        assert_eq!(loaded.name, "t1");
        assert_eq!(loaded, saved);

        assert!(store.delete(&id).unwrap());
        assert!(matches!(store.load(&id), Err(StoreError::NotFound { .. })));
        assert!(!store.root().join(&saved.storage_key).exists());
    }

    #[test]
    fn delete_is_idempotent() {
        let (_tmp, store) = open_temp();
        let saved = store.save(payload(json!({"a": 1})), "x").unwrap();
        let id = saved.id.to_string();

        assert!(store.delete(&id).unwrap());
        assert!(!store.delete(&id).unwrap());
        assert!(!store.delete(&Uuid::new_v4().to_string()).unwrap());
        assert!(!store.delete("not-a-uuid").unwrap());
    }

    #[test]
    fn unknown_or_malformed_id_is_not_found() {
        let (_tmp, store) = open_temp();
        assert!(matches!(
            store.load(&Uuid::new_v4().to_string()),
            Err(StoreError::NotFound { .. })
        ));
        let err = store.summarize("garbage").unwrap_err();
        assert_eq!(err.kind(), "not_found");
        assert_eq!(err.id(), Some("garbage"));
    }

    #[test]
    fn storage_key_is_derived_from_name_time_and_id() {
        let id = Uuid::parse_str("3f2a9c1e-0000-4000-8000-000000000000").unwrap();
        let at = Utc.with_ymd_and_hms(2026, 1, 15, 9, 30, 12).unwrap();
        assert_eq!(
            storage_key("device_scan", at, &id),
            "device_scan_20260115_093012_3f2a9c1e.json"
        );
        assert_eq!(
            storage_key("../etc/passwd me", at, &id),
            "___etc_passwd_me_20260115_093012_3f2a9c1e.json"
        );
        assert_eq!(storage_key("  ", at, &id), "result_20260115_093012_3f2a9c1e.json");
    }

    #[test]
    fn list_orders_newest_first_with_id_tie_break() {
        let (_tmp, store) = open_temp();
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        let oldest = store.save_at(payload(json!({})), "a", base).unwrap();
        let newest = store
            .save_at(payload(json!({})), "b", base + Duration::seconds(10))
            .unwrap();
        let tie_1 = store
            .save_at(payload(json!({})), "c", base + Duration::seconds(5))
            .unwrap();
        let tie_2 = store
            .save_at(payload(json!({})), "d", base + Duration::seconds(5))
            .unwrap();

        let (tie_lo, tie_hi) = if tie_1.id < tie_2.id {
            (tie_1.id, tie_2.id)
        } else {
            (tie_2.id, tie_1.id)
        };
        let ids: Vec<Uuid> = store.list(None).into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![newest.id, tie_lo, tie_hi, oldest.id]);
    }

    #[test]
    fn list_limit_returns_most_recent() {
        let (_tmp, store) = open_temp();
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let mut saved = Vec::new();
        for i in 0..5 {
            saved.push(
                store
                    .save_at(payload(json!({"i": i})), "scan", base + Duration::minutes(i))
                    .unwrap(),
            );
        }

        let listed = store.list(Some(2));
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, saved[4].id);
        assert_eq!(listed[1].id, saved[3].id);
        assert_eq!(store.list(Some(0)).len(), 0);
        assert_eq!(store.list(Some(50)).len(), 5);
    }

    #[test]
    fn statistics_match_list() {
        let (_tmp, store) = open_temp();
        for i in 0..3 {
            store.save(payload(json!({"n": i})), "s").unwrap();
        }
        let stats = store.statistics();
        assert_eq!(stats.count, store.list(None).len());
        assert_eq!(stats.count, 3);

        let on_disk: u64 = store
            .list(None)
            .iter()
            .map(|m| fs::metadata(store.root().join(&m.storage_key)).unwrap().len())
            .sum();
        assert_eq!(stats.total_size, on_disk);
        assert_eq!(stats.storage_root, store.root().display().to_string());
    }

    #[test]
    fn concurrent_saves_get_distinct_ids() {
        let (_tmp, store) = open_temp();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..100)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.save(payload(json!({"i": i})), "burst").unwrap())
            })
            .collect();
        let ids: HashSet<Uuid> = handles
            .into_iter()
            .map(|h| h.join().unwrap().id)
            .collect();
        assert_eq!(ids.len(), 100);

        let listed: HashSet<Uuid> = store.list(None).into_iter().map(|m| m.id).collect();
        assert_eq!(listed, ids);
        assert_eq!(store.statistics().count, 100);
    }

    #[test]
    fn read_after_write_from_another_thread() {
        let (_tmp, store) = open_temp();
        let store = Arc::new(store);
        let saved = store.save(payload(json!({"memory": {"total_gb": 8}})), "raw").unwrap();

        let reader = Arc::clone(&store);
        let id = saved.id.to_string();
        let loaded = std::thread::spawn(move || reader.load(&id).unwrap())
            .join()
            .unwrap();
        assert_eq!(loaded.payload, saved.payload);
    }

    #[test]
    fn concurrent_delete_and_load_never_see_half_state() {
        let (_tmp, store) = open_temp();
        let store = Arc::new(store);
        for _ in 0..20 {
            let saved = store.save(payload(json!({"x": 1})), "race").unwrap();
            let id = saved.id.to_string();

            let loader = {
                let store = Arc::clone(&store);
                let id = id.clone();
                std::thread::spawn(move || store.load(&id))
            };
            let deleter = {
                let store = Arc::clone(&store);
                let id = id.clone();
                std::thread::spawn(move || store.delete(&id))
            };

            assert!(deleter.join().unwrap().unwrap());
            match loader.join().unwrap() {
                Ok(record) => assert_eq!(record.payload, saved.payload),
                Err(StoreError::NotFound { .. }) => {}
                Err(other) => panic!("неожиданная ошибка: {other}"),
            }
        }
    }

    #[test]
    fn reopen_rebuilds_index_and_cleans_staging() {
        let tmp = TempDir::new().unwrap();
        let first = ResultStore::open(tmp.path()).unwrap();
        let a = first.save(payload(json!({"a": 1})), "a").unwrap();
        let b = first.save(payload(json!({"b": 2})), "b").unwrap();
        let before = first.list(None);
        drop(first);

        fs::write(tmp.path().join(".half_written.json.abc.tmp"), b"{\"id\":").unwrap();
        fs::write(tmp.path().join("notes.txt"), b"ignored").unwrap();

        let (store, report) = ResultStore::open_with_report(tmp.path()).unwrap();
        assert_eq!(report.indexed, 2);
        assert_eq!(report.stale_staging_removed, 1);
        assert!(report.unreadable.is_empty());
        assert_eq!(store.list(None), before);
        assert_eq!(store.load(&a.id.to_string()).unwrap(), a);
        assert_eq!(store.load(&b.id.to_string()).unwrap(), b);
        assert!(!tmp.path().join(".half_written.json.abc.tmp").exists());
    }

    #[test]
    fn garbage_files_are_reported_on_open_and_not_indexed() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("broken_20260101_000000_deadbeef.json"), b"not json").unwrap();
        fs::write(
            tmp.path().join("array_20260101_000000_deadbeef.json"),
            b"{\"id\":\"3f2a9c1e-0000-4000-8000-000000000000\",\"name\":\"x\",\
              \"created_at\":\"2026-01-01T00:00:00Z\",\
              \"storage_key\":\"array_20260101_000000_deadbeef.json\",\"payload\":[1,2]}",
        )
        .unwrap();

        let (store, report) = ResultStore::open_with_report(tmp.path()).unwrap();
        assert_eq!(report.indexed, 0);
        assert_eq!(report.unreadable.len(), 2);
        assert_eq!(store.statistics().count, 0);
        assert!(tmp.path().join("broken_20260101_000000_deadbeef.json").exists());
    }

    #[test]
    fn overwritten_record_is_corrupted_not_missing() {
        let (_tmp, store) = open_temp();
        let saved = store.save(payload(json!({"cpu": {}})), "c").unwrap();
        let id = saved.id.to_string();
        fs::write(store.root().join(&saved.storage_key), b"{ truncated").unwrap();

        let err = store.load(&id).unwrap_err();
        assert!(matches!(err, StoreError::Corrupted { .. }));
        assert_eq!(err.kind(), "corrupted");
        assert!(matches!(store.summarize(&id), Err(StoreError::Corrupted { .. })));
        assert!(matches!(store.export(&id), Err(StoreError::Corrupted { .. })));
    }

    #[test]
    fn vanished_file_of_indexed_record_is_corrupted() {
        let (_tmp, store) = open_temp();
        let saved = store.save(payload(json!({})), "gone").unwrap();
        fs::remove_file(store.root().join(&saved.storage_key)).unwrap();

        assert!(matches!(
            store.load(&saved.id.to_string()),
            Err(StoreError::Corrupted { .. })
        ));
        // Оператор может снять такую запись обычным delete.
        assert!(store.delete(&saved.id.to_string()).unwrap());
        assert_eq!(store.statistics().count, 0);
    }

    #[test]
    fn record_with_foreign_id_is_corrupted() {
        let (_tmp, store) = open_temp();
        let a = store.save(payload(json!({"a": 1})), "a").unwrap();
        let b = store.save(payload(json!({"b": 1})), "b").unwrap();
        let b_bytes = fs::read(store.root().join(&b.storage_key)).unwrap();
        fs::write(store.root().join(&a.storage_key), b_bytes).unwrap();

        assert!(matches!(
            store.load(&a.id.to_string()),
            Err(StoreError::Corrupted { .. })
        ));
    }

    #[test]
    fn export_returns_exact_file_bytes() {
        let (_tmp, store) = open_temp();
        let saved = store.save(payload(json!({"disk": {}})), "dl").unwrap();
        let (key, bytes) = store.export(&saved.id.to_string()).unwrap();
        assert_eq!(key, saved.storage_key);
        assert_eq!(bytes, fs::read(store.root().join(&key)).unwrap());
    }

    #[test]
    fn failed_save_leaves_no_visible_record() {
        let tmp = TempDir::new().unwrap();
        let store = ResultStore::open(tmp.path().join("root")).unwrap();
        fs::remove_dir_all(store.root()).unwrap();

        let err = store.save(payload(json!({"a": 1})), "lost").unwrap_err();
        assert_eq!(err.kind(), "storage_failure");
        assert!(store.list(None).is_empty());
        assert_eq!(store.statistics().count, 0);
    }

    #[test]
    fn records_saved_by_another_store_become_visible() {
        let tmp = TempDir::new().unwrap();
        let server = ResultStore::open(tmp.path()).unwrap();
        let cli = ResultStore::open(tmp.path()).unwrap();

        let first = cli.save(payload(json!({"cpu": {"cores": 2}})), "cli").unwrap();
        assert_eq!(server.load(&first.id.to_string()).unwrap(), first);

        let second = cli.save(payload(json!({"memory": {}})), "cli").unwrap();
        fs::write(tmp.path().join(".in_flight.json.abc.tmp"), b"{").unwrap();

        let listed: HashSet<Uuid> = server.list(None).into_iter().map(|m| m.id).collect();
        assert_eq!(listed, HashSet::from([first.id, second.id]));
        assert_eq!(server.statistics(), cli.statistics());
        assert!(tmp.path().join(".in_flight.json.abc.tmp").exists());

        assert!(server.delete(&second.id.to_string()).unwrap());
        assert!(!tmp.path().join(&second.storage_key).exists());
        assert!(matches!(
            server.load(&second.id.to_string()),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn deleted_record_is_not_rediscovered() {
        let tmp = TempDir::new().unwrap();
        let server = ResultStore::open(tmp.path()).unwrap();
        let cli = ResultStore::open(tmp.path()).unwrap();

        let saved = cli.save(payload(json!({})), "once").unwrap();
        assert!(cli.delete(&saved.id.to_string()).unwrap());

        assert!(server.list(None).is_empty());
        assert!(matches!(
            server.load(&saved.id.to_string()),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn short_id_prefix_addresses_unique_record() {
        let (_tmp, store) = open_temp();
        let saved = store.save(payload(json!({"a": 1})), "short").unwrap();
        let prefix = saved.id.simple().to_string()[..8].to_string();

        assert_eq!(store.load(&prefix).unwrap(), saved);
        assert_eq!(store.load(&prefix.to_uppercase()).unwrap(), saved);
        assert_eq!(store.summarize(&prefix).unwrap().id, saved.id);
        assert!(matches!(
            store.load(&prefix[..7]),
            Err(StoreError::NotFound { .. })
        ));

        assert!(store.delete(&prefix).unwrap());
        assert!(!store.delete(&prefix).unwrap());
        assert!(matches!(store.load(&prefix), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn ambiguous_prefix_is_rejected() {
        let (_tmp, store) = open_temp();
        let a = store.save(payload(json!({"a": 1})), "a").unwrap();
        let prefix = a.id.simple().to_string()[..8].to_string();

        let twin_id = Uuid::parse_str(&format!("{prefix}000040008000000000000000")).unwrap();
        let created_at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let twin = ResultRecord {
            id: twin_id,
            name: "twin".to_string(),
            created_at,
            storage_key: storage_key("twin", created_at, &twin_id),
            payload: payload(json!({})),
        };
        fs::write(
            store.root().join(&twin.storage_key),
            serde_json::to_vec_pretty(&twin).unwrap(),
        )
        .unwrap();

        let err = store.load(&prefix).unwrap_err();
        assert!(matches!(err, StoreError::Ambiguous { matches: 2, .. }));
        assert_eq!(err.kind(), "invalid_request");
        assert_eq!(err.id(), Some(prefix.as_str()));
        assert!(matches!(store.delete(&prefix), Err(StoreError::Ambiguous { .. })));

        assert_eq!(store.load(&a.id.to_string()).unwrap(), a);
        assert_eq!(store.load(&twin_id.to_string()).unwrap(), twin);
    }
}
