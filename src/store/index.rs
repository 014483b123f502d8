use super::{ResultMeta, ResultRecord, StoreError};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub(crate) const RECORD_EXTENSION: &str = ".json";
pub(crate) const STAGING_PREFIX: char = '.';

#[derive(Debug, Clone)]
pub(crate) struct IndexEntry {
    pub meta: ResultMeta,
    pub size: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Index {
    entries: HashMap<Uuid, IndexEntry>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    pub indexed: usize,
    pub unreadable: Vec<String>,
    pub stale_staging_removed: usize,
}

impl Index {
    pub fn get(&self, id: &Uuid) -> Option<&IndexEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.entries.contains_key(id)
    }

    pub fn insert(&mut self, entry: IndexEntry) {
        self.entries.insert(entry.meta.id, entry);
    }

    pub fn remove(&mut self, id: &Uuid) -> Option<IndexEntry> {
        self.entries.remove(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn total_size(&self) -> u64 {
        self.entries.values().map(|e| e.size).sum()
    }

    pub fn storage_keys(&self) -> HashSet<String> {
        self.entries
            .values()
            .map(|e| e.meta.storage_key.clone())
            .collect()
    }

    pub fn ids_with_prefix(&self, prefix: &str) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self
            .entries
            .keys()
            .filter(|id| id.simple().to_string().starts_with(prefix))
            .copied()
            .collect();
        ids.sort();
        ids
    }

    // Метаданные в порядке: новые первыми, при равенстве времени по возрастанию id.
    pub fn sorted_metas(&self) -> Vec<ResultMeta> {
        let mut metas: Vec<ResultMeta> = self.entries.values().map(|e| e.meta.clone()).collect();
        metas.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        metas
    }

    pub fn rebuild(root: &Path) -> Result<(Self, RebuildReport), StoreError> {
        let dir = fs::read_dir(root)
            .map_err(|source| StoreError::storage("сканирование каталога", source))?;

        let mut index = Index::default();
        let mut report = RebuildReport::default();

        for entry in dir.flatten() {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|v| v.to_str()).map(str::to_string)
            else {
                continue;
            };

            if file_name.starts_with(STAGING_PREFIX) {
                // Остатки прерванных save/delete: ни один читатель их не видел.
                match fs::remove_file(&path) {
                    Ok(()) => report.stale_staging_removed += 1,
                    Err(err) => {
                        warn!(file = %file_name, error = %err, "не удалось удалить временный файл")
                    }
                }
                continue;
            }
            if !file_name.ends_with(RECORD_EXTENSION) {
                continue;
            }

            let entry = match read_record_file(&path, &file_name) {
                Ok(entry) => entry,
                Err(reason) => {
                    warn!(file = %file_name, reason = %reason, "запись пропущена");
                    report.unreadable.push(file_name);
                    continue;
                }
            };
            if index.contains(&entry.meta.id) {
                error!(id = %entry.meta.id, file = %file_name, "повторный id в хранилище, запись пропущена");
                report.unreadable.push(file_name);
                continue;
            }

            index.insert(entry);
            report.indexed += 1;
        }

        report.unreadable.sort();
        info!(
            root = %root.display(),
            indexed = report.indexed,
            unreadable = report.unreadable.len(),
            stale_staging_removed = report.stale_staging_removed,
            "индекс результатов восстановлен"
        );
        Ok((index, report))
    }
}

// Файлы записей, которых нет среди known: их опубликовал другой процесс.
// Временные файлы не трогаются, чужая публикация может быть ещё в процессе.
pub(crate) fn scan_unindexed(
    root: &Path,
    known: &HashSet<String>,
    matches: impl Fn(&str) -> bool,
) -> Result<Vec<IndexEntry>, StoreError> {
    let dir = fs::read_dir(root)
        .map_err(|source| StoreError::storage("сканирование каталога", source))?;

    let mut found = Vec::new();
    for entry in dir.flatten() {
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|v| v.to_str()) else {
            continue;
        };
        if file_name.starts_with(STAGING_PREFIX)
            || !file_name.ends_with(RECORD_EXTENSION)
            || known.contains(file_name)
            || !matches(file_name)
        {
            continue;
        }
        match read_record_file(&path, file_name) {
            Ok(entry) => found.push(entry),
            Err(reason) => debug!(file = %file_name, reason = %reason, "файл не принят в индекс"),
        }
    }
    Ok(found)
}

fn read_record_file(path: &Path, file_name: &str) -> Result<IndexEntry, String> {
    let bytes = fs::read(path).map_err(|err| format!("файл не читается: {err}"))?;
    let record: ResultRecord =
        serde_json::from_slice(&bytes).map_err(|err| format!("запись повреждена: {err}"))?;
    if record.storage_key != file_name {
        return Err(format!(
            "имя файла не совпадает с storage_key {}",
            record.storage_key
        ));
    }
    Ok(IndexEntry {
        meta: record.meta(),
        size: bytes.len() as u64,
    })
}
