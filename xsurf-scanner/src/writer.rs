//! Incremental JSON-array persistence of discovered surfaces.
//!
//! Each write reads the current file, merges new records by
//! `(request_url, method, param_name)` and atomically replaces the file, so a
//! scan cut short leaves a well-formed array of everything written so far.

use crate::error::{Result, ScanError};
use crate::model::Surface;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// One entry of the output file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceRecord {
    pub base_url: String,
    pub request_url: String,
    pub method: String,
    pub param_name: String,
    pub param_location: String,
    pub depth_level: usize,
    /// Trigger chain joined with `" -> "`.
    pub trigger_chain: String,
    pub sample_payload: String,
    pub is_cross_origin: bool,
}

impl SurfaceRecord {
    pub fn from_surface(base_url: &str, surface: &Surface) -> Self {
        Self {
            base_url: base_url.to_string(),
            request_url: surface.url().to_string(),
            method: surface.method().to_string(),
            param_name: surface.param_name().to_string(),
            param_location: surface.param_type().as_str().to_string(),
            depth_level: surface.depth_level(),
            trigger_chain: surface.trigger_chain().join(" -> "),
            sample_payload: surface.sample_payload().to_string(),
            is_cross_origin: surface.is_cross_origin(),
        }
    }

    pub fn merge_key(&self) -> (String, String, String) {
        (
            self.request_url.clone(),
            self.method.clone(),
            self.param_name.clone(),
        )
    }
}

pub struct ResultWriter {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ResultWriter {
    /// Open `path`, creating it as an empty array when missing.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        if !path.exists() {
            persist_records(&path, &[])?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reset the file to an empty array.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || persist_records(&path, &[])).await?
    }

    pub async fn write_surfaces(&self, base_url: &str, surfaces: &[Surface]) -> Result<usize> {
        let records = surfaces
            .iter()
            .map(|s| SurfaceRecord::from_surface(base_url, s))
            .collect();
        self.write_records(records).await
    }

    /// Merge `records` into the file. Returns how many were new.
    pub async fn write_records(&self, records: Vec<SurfaceRecord>) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let _guard = self.lock.lock().await;
        let path = self.path.clone();
        let added = tokio::task::spawn_blocking(move || merge_into(&path, records)).await??;
        debug!("Persisted {} new records to {}", added, self.path.display());
        Ok(added)
    }

    pub async fn read_all(&self) -> Result<Vec<SurfaceRecord>> {
        let _guard = self.lock.lock().await;
        let path = self.path.clone();
        Ok(tokio::task::spawn_blocking(move || load_records(&path)).await?)
    }

    pub async fn count(&self) -> Result<usize> {
        Ok(self.read_all().await?.len())
    }
}

fn merge_into(path: &Path, records: Vec<SurfaceRecord>) -> Result<usize> {
    let mut existing = load_records(path);
    let mut keys: HashSet<(String, String, String)> =
        existing.iter().map(SurfaceRecord::merge_key).collect();

    let before = existing.len();
    for record in records {
        if keys.insert(record.merge_key()) {
            existing.push(record);
        }
    }
    let added = existing.len() - before;
    if added > 0 {
        persist_records(path, &existing)?;
    }
    Ok(added)
}

/// Read the persisted array. A missing or unreadable file counts as empty.
pub fn load_records(path: &Path) -> Vec<SurfaceRecord> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return Vec::new(),
    };
    if content.trim().is_empty() {
        return Vec::new();
    }
    serde_json::from_str(&content).unwrap_or_else(|e| {
        warn!("Ignoring corrupt result file {}: {}", path.display(), e);
        Vec::new()
    })
}

fn persist_records(path: &Path, records: &[SurfaceRecord]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
    serde_json::to_writer_pretty(&mut temp, records)?;
    temp.write_all(b"\n")?;
    temp.flush()?;
    temp.persist(path)
        .map_err(|e| ScanError::IoError(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ParamType, Source};
    use std::time::Duration;
    use tempfile::TempDir;

    fn record(url: &str, name: &str, payload: &str) -> SurfaceRecord {
        SurfaceRecord {
            base_url: "https://example.com/".into(),
            request_url: url.into(),
            method: "GET".into(),
            param_name: name.into(),
            param_location: "query".into(),
            depth_level: 0,
            trigger_chain: "page_load".into(),
            sample_payload: payload.into(),
            is_cross_origin: false,
        }
    }

    #[tokio::test]
    async fn test_new_file_starts_as_empty_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("result.json");
        let writer = ResultWriter::new(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap().trim(), "[]");
        assert_eq!(writer.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_merge_by_request_url_method_and_name() {
        let dir = TempDir::new().unwrap();
        let writer = ResultWriter::new(dir.path().join("result.json")).unwrap();

        let added = writer
            .write_records(vec![
                record("https://example.com/search", "q", "a"),
                record("https://example.com/search", "q", "b"),
            ])
            .await
            .unwrap();
        assert_eq!(added, 1);

        let added = writer
            .write_records(vec![
                record("https://example.com/search", "q", "c"),
                record("https://example.com/search", "page", "2"),
            ])
            .await
            .unwrap();
        assert_eq!(added, 1);

        let all = writer.read_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].sample_payload, "a");
    }

    #[tokio::test]
    async fn test_corrupt_file_is_treated_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("result.json");
        std::fs::write(&path, "[{\"base_url\": ").unwrap();
        let writer = ResultWriter::new(&path).unwrap();
        writer
            .write_records(vec![record("https://example.com/a", "id", "1")])
            .await
            .unwrap();
        assert_eq!(writer.count().await.unwrap(), 1);
    }

    #[test]
    fn test_trigger_chain_is_joined() {
        let surface = Surface::builder(
            "https://example.com/api?page=2",
            "get",
            "page",
            ParamType::Query,
            Source::TrafficAfterInteraction,
        )
        .trigger_chain(vec!["page_load".into(), "click_Load more".into()])
        .build();
        let rec = SurfaceRecord::from_surface("https://example.com/", &surface);
        assert_eq!(rec.trigger_chain, "page_load -> click_Load more");
        assert_eq!(rec.method, "GET");
        assert_eq!(rec.param_location, "query");
    }

    #[tokio::test]
    async fn test_interrupted_writer_leaves_persisted_prefix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("result.json");
        let writer = std::sync::Arc::new(ResultWriter::new(&path).unwrap());

        let task_writer = writer.clone();
        let scan = async move {
            task_writer
                .write_records(vec![record("https://example.com/a", "id", "1")])
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
            task_writer
                .write_records(vec![record("https://example.com/b", "id", "2")])
                .await
                .unwrap();
        };
        assert!(tokio::time::timeout(Duration::from_millis(200), scan).await.is_err());

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<SurfaceRecord> = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].request_url, "https://example.com/a");
    }

    #[tokio::test]
    async fn test_clear_resets_file() {
        let dir = TempDir::new().unwrap();
        let writer = ResultWriter::new(dir.path().join("result.json")).unwrap();
        writer
            .write_records(vec![record("https://example.com/a", "id", "1")])
            .await
            .unwrap();
        writer.clear().await.unwrap();
        assert_eq!(writer.count().await.unwrap(), 0);
    }
}
