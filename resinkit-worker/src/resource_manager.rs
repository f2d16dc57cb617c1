/// Flink resource resolution (§4.6)
///
/// Grounded on the original service's `flink_resource_manager.py`: resolves
/// JAR references from standard Flink install locations, falling back to an
/// on-demand HTTP download when an entry's source is `"download"`, and
/// caches URL→path resolutions for the lifetime of the manager.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Deserialize;
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceEntry {
    pub name: Option<String>,
    pub location: Option<String>,
    pub source: Option<String>,
    #[serde(rename = "type")]
    pub entry_type: Option<String>,
}

#[derive(Debug, Default)]
pub struct ProcessedResources {
    pub jar_paths: Vec<String>,
    pub classpath_jars: Vec<String>,
}

pub struct FlinkResourceManager {
    flink_home: PathBuf,
    flink_cdc_home: Option<PathBuf>,
    temp_dir: PathBuf,
    http: reqwest::Client,
    downloaded: Mutex<HashMap<String, String>>,
}

impl FlinkResourceManager {
    pub fn new(flink_home: impl Into<PathBuf>, flink_cdc_home: Option<PathBuf>) -> std::io::Result<Self> {
        let temp_dir = std::env::temp_dir().join(format!("resinkit-flink-resources-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&temp_dir)?;

        Ok(FlinkResourceManager {
            flink_home: flink_home.into(),
            flink_cdc_home,
            temp_dir,
            http: reqwest::Client::new(),
            downloaded: Mutex::new(HashMap::new()),
        })
    }

    /// Resolves every entry in `resources.flink_jars` and
    /// `resources.flink_cdc_jars`, splitting `classpath`-typed entries from
    /// plain jar entries.
    pub async fn process_resources(&self, resources: &JsonValue) -> ProcessedResources {
        let mut processed = ProcessedResources::default();

        for key in ["flink_jars", "flink_cdc_jars"] {
            let entries = resources
                .get(key)
                .and_then(JsonValue::as_array)
                .cloned()
                .unwrap_or_default();

            for raw in entries {
                let entry: ResourceEntry = match serde_json::from_value(raw) {
                    Ok(e) => e,
                    Err(_) => continue,
                };

                if let Some(path) = self.resolve_jar(&entry).await {
                    if entry.entry_type.as_deref() == Some("classpath") {
                        processed.classpath_jars.push(path);
                    } else {
                        processed.jar_paths.push(path);
                    }
                }
            }
        }

        processed
    }

    async fn resolve_jar(&self, entry: &ResourceEntry) -> Option<String> {
        let cache_key = entry.location.clone().unwrap_or_default();
        if !cache_key.is_empty() {
            if let Some(cached) = self.downloaded.lock().unwrap().get(&cache_key) {
                return Some(cached.clone());
            }
        }

        let filename = entry
            .location
            .as_ref()
            .and_then(|loc| loc.rsplit('/').next())
            .map(str::to_string)
            .or_else(|| entry.name.clone())?;

        if let Some(found) = self.find_in_standard_locations(&filename) {
            return Some(found);
        }

        if entry.source.as_deref() == Some("download") {
            if let Some(location) = &entry.location {
                if let Some(downloaded) = self.download_jar(location, &filename).await {
                    self.downloaded.lock().unwrap().insert(cache_key, downloaded.clone());
                    return Some(downloaded);
                }
            }
        }

        None
    }

    fn find_in_standard_locations(&self, filename: &str) -> Option<String> {
        let candidates = [
            self.flink_home.join("lib").join(filename),
            self.flink_cdc_home
                .as_ref()
                .map(|home| home.join("lib").join(filename))
                .unwrap_or_default(),
        ];
        for candidate in &candidates {
            if candidate.as_os_str().is_empty() {
                continue;
            }
            if candidate.exists() {
                return Some(candidate.to_string_lossy().into_owned());
            }
        }

        walk_for_basename(&self.flink_home.join("plugins"), filename)
    }

    async fn download_jar(&self, url: &str, filename: &str) -> Option<String> {
        let response = self.http.get(url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let bytes = response.bytes().await.ok()?;

        let dest = self.temp_dir.join(filename);
        tokio::fs::write(&dest, &bytes).await.ok()?;
        Some(dest.to_string_lossy().into_owned())
    }

    /// Removes the per-manager temp directory used for downloaded jars.
    pub fn cleanup(&self) {
        let _ = std::fs::remove_dir_all(&self.temp_dir);
    }
}

fn walk_for_basename(dir: &Path, filename: &str) -> Option<String> {
    if !dir.exists() {
        return None;
    }
    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = walk_for_basename(&path, filename) {
                return Some(found);
            }
        } else if path.file_name().and_then(|n| n.to_str()) == Some(filename) {
            return Some(path.to_string_lossy().into_owned());
        }
    }
    None
}

impl Drop for FlinkResourceManager {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_empty_for_absent_resources() {
        let manager = FlinkResourceManager::new("/nonexistent/flink", None).unwrap();
        let processed = manager.process_resources(&serde_json::json!({})).await;
        assert!(processed.jar_paths.is_empty());
        assert!(processed.classpath_jars.is_empty());
    }

    #[test]
    fn walk_for_basename_finds_nested_file() {
        let dir = std::env::temp_dir().join(format!("resinkit-resource-walk-test-{}", uuid::Uuid::new_v4()));
        let nested = dir.join("nested");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("connector.jar"), b"jar-bytes").unwrap();

        let found = walk_for_basename(&dir, "connector.jar");
        assert!(found.is_some());

        std::fs::remove_dir_all(&dir).ok();
    }
}
