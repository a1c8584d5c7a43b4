//! Cache usage profiler
//!
//! Counts GET and PUT requests per function, parameter and file, and records
//! which files every `(function, parameter)` pair read from the cache. The
//! command loop flushes it on END_PROFILING.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::core::error::{CacheError, CacheResult};

pub const PROFILER_FILE_NAME: &str = "cache_profiler.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccessCounts {
    #[serde(rename = "GET")]
    pub get: u64,
    #[serde(rename = "PUT")]
    pub put: u64,
}

type PerFile<T> = BTreeMap<String, T>;
type PerParameter<T> = BTreeMap<String, T>;

#[derive(Debug, Default, Serialize)]
pub struct CacheProfiler {
    /// function -> parameter -> file -> counts
    usage: BTreeMap<String, PerParameter<PerFile<AccessCounts>>>,
    /// function -> parameter -> files served from cache
    get_structure: BTreeMap<String, PerParameter<BTreeSet<String>>>,
}

#[derive(Serialize)]
struct ProfilerReport<'a> {
    generated_at: String,
    usage: &'a BTreeMap<String, PerParameter<PerFile<AccessCounts>>>,
    get_structure: &'a BTreeMap<String, PerParameter<BTreeSet<String>>>,
}

impl CacheProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_get(&mut self, function: &str, parameter: &str, file_name: &str) {
        self.counts_mut(function, parameter, file_name).get += 1;
        self.get_structure
            .entry(function.to_string())
            .or_default()
            .entry(parameter.to_string())
            .or_default()
            .insert(file_name.to_string());
    }

    pub fn record_put(&mut self, function: &str, parameter: &str, file_name: &str) {
        self.counts_mut(function, parameter, file_name).put += 1;
    }

    pub fn counts(&self, function: &str, parameter: &str, file_name: &str) -> AccessCounts {
        self.usage
            .get(function)
            .and_then(|params| params.get(parameter))
            .and_then(|files| files.get(file_name))
            .copied()
            .unwrap_or_default()
    }

    pub fn files_read_by(&self, function: &str, parameter: &str) -> Vec<String> {
        self.get_structure
            .get(function)
            .and_then(|params| params.get(parameter))
            .map(|files| files.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.usage.is_empty()
    }

    /// Write the collected counters to `<log_dir>/cache_profiler.json`
    pub fn flush(&self, log_dir: &Path) -> CacheResult<PathBuf> {
        let path = log_dir.join(PROFILER_FILE_NAME);
        let report = ProfilerReport {
            generated_at: Utc::now().to_rfc3339(),
            usage: &self.usage,
            get_structure: &self.get_structure,
        };
        let json = serde_json::to_string_pretty(&report)?;

        fs::create_dir_all(log_dir).map_err(|source| CacheError::Profiler {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, json).map_err(|source| CacheError::Profiler {
            path: path.clone(),
            source,
        })?;

        info!(path = %path.display(), functions = self.usage.len(), "Cache profiler flushed");
        Ok(path)
    }

    fn counts_mut(&mut self, function: &str, parameter: &str, file_name: &str) -> &mut AccessCounts {
        self.usage
            .entry(function.to_string())
            .or_default()
            .entry(parameter.to_string())
            .or_default()
            .entry(file_name.to_string())
            .or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_accumulate() {
        let mut profiler = CacheProfiler::new();
        profiler.record_put("increment", "x", "a.npy");
        profiler.record_get("increment", "x", "a.npy");
        profiler.record_get("increment", "x", "a.npy");
        profiler.record_get("increment", "y", "b.npy");

        assert_eq!(
            profiler.counts("increment", "x", "a.npy"),
            AccessCounts { get: 2, put: 1 }
        );
        assert_eq!(profiler.counts("increment", "y", "b.npy").get, 1);
        assert_eq!(profiler.counts("other", "x", "a.npy"), AccessCounts::default());
        assert_eq!(profiler.files_read_by("increment", "x"), vec!["a.npy"]);
        assert!(profiler.files_read_by("increment", "z").is_empty());
    }

    #[test]
    fn test_flush_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut profiler = CacheProfiler::new();
        profiler.record_put("f", "p", "a.npy");
        profiler.record_get("f", "p", "a.npy");

        let path = profiler.flush(dir.path()).unwrap();
        assert_eq!(path, dir.path().join(PROFILER_FILE_NAME));

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["usage"]["f"]["p"]["a.npy"]["GET"], 1);
        assert_eq!(written["usage"]["f"]["p"]["a.npy"]["PUT"], 1);
        assert_eq!(written["get_structure"]["f"]["p"][0], "a.npy");
        assert!(written["generated_at"].is_string());
    }

    #[test]
    fn test_flush_into_unwritable_location_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, b"x").unwrap();

        let err = CacheProfiler::new().flush(&blocker).unwrap_err();
        assert!(matches!(err, CacheError::Profiler { .. }));
    }
}
