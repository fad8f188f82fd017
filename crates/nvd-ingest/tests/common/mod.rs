//! In-memory collaborators for pipeline tests

#![allow(dead_code)]

use async_trait::async_trait;
use flate2::{write::GzEncoder, Compression};
use nvd_ingest::controller::{RunController, RunSettings};
use nvd_ingest::feed::{FeedConfig, FeedFetcher, FetchError};
use nvd_ingest::publish::Publisher;
use nvd_ingest::record::KnownIds;
use nvd_ingest::storage::{BucketHandle, ObjectStorage, StorageError};
use nvd_ingest::warehouse::{LoadJob, TableSchema, Warehouse, WarehouseError};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub fn feed_config() -> FeedConfig {
    FeedConfig {
        url_base: "https://nvd.example.test/feeds/json/cve/1.1/".to_string(),
        file_prefix: "nvdcve-1.1-".to_string(),
        file_suffix: ".json.gz".to_string(),
    }
}

pub fn cve_item(id: &str) -> Value {
    json!({
        "cve": {
            "data_type": "CVE",
            "CVE_data_meta": { "ID": id, "ASSIGNER": "cve@mitre.org" },
            "description": { "description_data": [ { "lang": "en", "value": format!("{id} description") } ] }
        },
        "configurations": { "CVE_data_version": "4.0", "nodes": [] },
        "publishedDate": "2023-01-01T00:00Z"
    })
}

pub fn feed_document(ids: &[&str]) -> Value {
    json!({
        "CVE_data_type": "CVE",
        "CVE_data_format": "MITRE",
        "CVE_data_numberOfCVEs": ids.len().to_string(),
        "CVE_Items": ids.iter().map(|id| cve_item(id)).collect::<Vec<_>>()
    })
}

// ============================================================================
// Fetcher
// ============================================================================

enum Archive {
    Feed(Vec<String>),
    Corrupt,
}

/// Serves gzip archives built from identifier lists; unknown names fail
#[derive(Default)]
pub struct FakeFetcher {
    archives: Mutex<HashMap<String, Archive>>,
    fetched: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn with_feed(self, file_name: &str, ids: &[&str]) -> Self {
        self.archives.lock().unwrap().insert(
            file_name.to_string(),
            Archive::Feed(ids.iter().map(|id| id.to_string()).collect()),
        );
        self
    }

    pub fn with_corrupt(self, file_name: &str) -> Self {
        self.archives
            .lock()
            .unwrap()
            .insert(file_name.to_string(), Archive::Corrupt);
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedFetcher for FakeFetcher {
    async fn fetch(&self, name: &str, local_dir: &Path) -> Result<PathBuf, FetchError> {
        self.fetched.lock().unwrap().push(name.to_string());
        let url = feed_config().url_for(name);

        let bytes = match self.archives.lock().unwrap().get(name) {
            Some(Archive::Feed(ids)) => {
                let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
                let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
                encoder
                    .write_all(feed_document(&ids).to_string().as_bytes())
                    .unwrap();
                encoder.finish().unwrap()
            },
            Some(Archive::Corrupt) => b"definitely not gzip".to_vec(),
            None => return Err(FetchError::Status { url, status: 404 }),
        };

        let path = local_dir.join(name);
        std::fs::create_dir_all(local_dir).unwrap();
        std::fs::write(&path, bytes).unwrap();
        Ok(path)
    }
}

// ============================================================================
// Warehouse
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub enum CountResponse {
    Rows(u64),
    NotFound,
}

pub struct FakeWarehouse {
    count: CountResponse,
    known: KnownIds,
    created: Mutex<Vec<String>>,
    list_calls: Mutex<usize>,
    loads: Mutex<Vec<(String, String)>>,
}

impl FakeWarehouse {
    pub fn new(count: CountResponse, known: &[&str]) -> Self {
        Self {
            count,
            known: known.iter().map(|id| id.to_string()).collect(),
            created: Mutex::default(),
            list_calls: Mutex::default(),
            loads: Mutex::default(),
        }
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        *self.list_calls.lock().unwrap()
    }

    pub fn loads(&self) -> Vec<(String, String)> {
        self.loads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Warehouse for FakeWarehouse {
    async fn count_rows(&self, dataset: &str) -> Result<u64, WarehouseError> {
        match self.count {
            CountResponse::Rows(rows) => Ok(rows),
            CountResponse::NotFound => Err(WarehouseError::NotFound {
                resource: dataset.to_string(),
            }),
        }
    }

    async fn create_dataset(&self, dataset: &str, _schema: &TableSchema) -> Result<(), WarehouseError> {
        self.created.lock().unwrap().push(dataset.to_string());
        Ok(())
    }

    async fn list_ids(&self, _dataset: &str) -> Result<KnownIds, WarehouseError> {
        *self.list_calls.lock().unwrap() += 1;
        Ok(self.known.clone())
    }

    async fn load_from_storage(&self, dataset: &str, uri: &str) -> Result<LoadJob, WarehouseError> {
        let mut loads = self.loads.lock().unwrap();
        loads.push((dataset.to_string(), uri.to_string()));
        Ok(LoadJob {
            job_id: format!("job_{}", loads.len()),
            source_uri: uri.to_string(),
        })
    }
}

// ============================================================================
// Storage
// ============================================================================

/// Keeps every uploaded object's lines in memory
#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<Vec<(String, Vec<String>)>>,
    fail_always: bool,
}

impl FakeStorage {
    pub fn failing() -> Self {
        Self {
            fail_always: true,
            ..Self::default()
        }
    }

    pub fn objects(&self) -> Vec<(String, Vec<String>)> {
        self.objects.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn ensure_bucket(&self, name: &str) -> Result<BucketHandle, StorageError> {
        Ok(BucketHandle::new(name, "gs"))
    }

    async fn upload(
        &self,
        _bucket: &BucketHandle,
        local_path: &Path,
        remote_name: &str,
    ) -> Result<(), StorageError> {
        if self.fail_always {
            return Err(StorageError::transient("503 Service Unavailable"));
        }
        let lines = std::fs::read_to_string(local_path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect();
        self.objects
            .lock()
            .unwrap()
            .push((remote_name.to_string(), lines));
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub staging: TempDir,
    pub fetcher: Arc<FakeFetcher>,
    pub warehouse: Arc<FakeWarehouse>,
    pub storage: Arc<FakeStorage>,
    pub controller: RunController,
}

impl Harness {
    pub fn new(
        fetcher: FakeFetcher,
        warehouse: FakeWarehouse,
        storage: FakeStorage,
        current_year: i32,
    ) -> Self {
        let staging = TempDir::new().unwrap();
        let fetcher = Arc::new(fetcher);
        let warehouse = Arc::new(warehouse);
        let storage = Arc::new(storage);

        let settings = RunSettings {
            staging_dir: staging.path().to_path_buf(),
            dataset: "nvd_dataset".to_string(),
            bucket: "nvd-staging".to_string(),
            first_year: 2002,
            bootstrap_threshold: 100_000,
            current_year: Some(current_year),
        };

        let schema = TableSchema::from_value(&json!([
            { "name": "cve", "type": "RECORD", "fields": [
                { "name": "CVE_data_meta", "type": "RECORD", "fields": [ { "name": "ID" } ] }
            ]}
        ]))
        .unwrap();

        let controller = RunController::new(
            fetcher.clone(),
            warehouse.clone(),
            Publisher::new(storage.clone(), warehouse.clone()),
            feed_config(),
            schema,
            settings,
        );

        Self {
            staging,
            fetcher,
            warehouse,
            storage,
            controller,
        }
    }

    pub fn staged(&self, file_name: &str) -> PathBuf {
        self.staging.path().join(file_name)
    }
}

/// Identifier of each JSON line
pub fn line_ids(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .map(|line| {
            let value: Value = serde_json::from_str(line).unwrap();
            value["cve"]["CVE_data_meta"]["ID"].as_str().unwrap().to_string()
        })
        .collect()
}
