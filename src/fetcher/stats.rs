// src/fetcher/stats.rs

//! Run statistics and per-atom errors
//!
//! Counters and the error list share one mutex; writers are the fetcher
//! workers and the cleaner, readers mostly look at the final snapshot.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetcherStats {
    pub tot_atoms: u64,
    pub tot_errors: u64,
    pub tot_bytes: u64,
    pub tot_elaborated: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomError {
    pub atom: String,
    pub error: String,
}

#[derive(Default)]
struct Inner {
    stats: FetcherStats,
    errors: Vec<AtomError>,
}

/// Mutex-guarded stats and error list
#[derive(Default)]
pub struct StatsRecorder {
    inner: Mutex<Inner>,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// An atom entered the pipeline
    pub fn atom_started(&self) {
        self.inner.lock().stats.tot_atoms += 1;
    }

    /// An atom finished; `bytes` were transferred for it
    pub fn atom_done(&self, bytes: u64) {
        let mut inner = self.inner.lock();
        inner.stats.tot_elaborated += 1;
        inner.stats.tot_bytes += bytes;
    }

    pub fn atom_failed(&self, atom: &str, error: &Error) {
        let mut inner = self.inner.lock();
        inner.stats.tot_errors += 1;
        inner.errors.push(AtomError {
            atom: atom.to_string(),
            error: error.to_string(),
        });
    }

    pub fn stats(&self) -> FetcherStats {
        self.inner.lock().stats
    }

    pub fn atoms_in_error(&self) -> Vec<AtomError> {
        self.inner.lock().errors.clone()
    }

    pub fn report(&self, backend: &str) -> FetchReport {
        let inner = self.inner.lock();
        FetchReport {
            backend: backend.to_string(),
            tot_atoms: inner.stats.tot_atoms,
            tot_errors: inner.stats.tot_errors,
            tot_bytes: inner.stats.tot_bytes,
            tot_elaborated: inner.stats.tot_elaborated,
            atoms_errors: inner.errors.clone(),
        }
    }
}

/// End-of-run summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchReport {
    pub backend: String,
    pub tot_atoms: u64,
    pub tot_errors: u64,
    pub tot_bytes: u64,
    pub tot_elaborated: u64,
    pub atoms_errors: Vec<AtomError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Yaml,
    Json,
}

impl ReportFormat {
    /// Pick the format from a file extension; YAML unless `.json`
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::Json,
            _ => Self::Yaml,
        }
    }
}

impl FetchReport {
    pub fn render(&self, format: ReportFormat) -> Result<String> {
        match format {
            ReportFormat::Yaml => {
                serde_yaml::to_string(self).map_err(|e| Error::ParseError(e.to_string()))
            }
            ReportFormat::Json => {
                serde_json::to_string_pretty(self).map_err(|e| Error::ParseError(e.to_string()))
            }
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let content = self.render(ReportFormat::from_path(path))?;
        fs::write(path, content).map_err(|e| Error::io_at(path, e))
    }

    pub fn is_success(&self) -> bool {
        self.tot_errors == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_concurrent_recording() {
        let recorder = Arc::new(StatsRecorder::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let recorder = Arc::clone(&recorder);
                std::thread::spawn(move || {
                    recorder.atom_started();
                    if i % 4 == 0 {
                        recorder.atom_failed(&format!("cat/pkg-{i}"), &Error::DownloadError("boom".into()));
                    } else {
                        recorder.atom_done(10);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let stats = recorder.stats();
        assert_eq!(stats.tot_atoms, 8);
        assert_eq!(stats.tot_errors, 2);
        assert_eq!(stats.tot_elaborated, 6);
        assert_eq!(stats.tot_bytes, 60);
        assert_eq!(recorder.atoms_in_error().len(), 2);
    }

    #[test]
    fn test_report_formats() {
        let recorder = StatsRecorder::new();
        recorder.atom_started();
        recorder.atom_failed("dev-lang/foo-1.0", &Error::DownloadError("HTTP 404".into()));
        let report = recorder.report("dir");
        assert!(!report.is_success());

        let yaml = report.render(ReportFormat::Yaml).unwrap();
        assert!(yaml.contains("tot_errors: 1"));
        let json = report.render(ReportFormat::Json).unwrap();
        let back: FetchReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        report.write(&path).unwrap();
        assert!(fs::read_to_string(&path).unwrap().starts_with('{'));
        assert_eq!(ReportFormat::from_path(Path::new("r.yml")), ReportFormat::Yaml);
    }
}
