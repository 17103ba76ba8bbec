//! Event log statistics
//!
//! Counts events per operation type and reports storage sizes without
//! replaying anything.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::{Duration, Instant};

use indexmap::IndexMap;

use crate::error::StoreResult;
use crate::events::Event;

use super::snapshot::SnapshotManager;
use super::store::EventStoreConfig;

/// Statistics about one data directory
#[derive(Debug, Clone, Default)]
pub struct EventStoreStats {
    /// Parseable events in the log
    pub event_count: usize,
    /// Non-empty lines that failed to parse
    pub corrupt_lines: usize,
    pub log_size: u64,
    pub snapshot_size: u64,
    pub backup_size: u64,
    /// Event count per operation name, in first-seen order
    pub events_by_type: IndexMap<String, usize>,
    /// Highest event version in the log
    pub last_version: u64,
    /// Version captured by the latest snapshot
    pub snapshot_version: Option<u64>,
    pub events_since_snapshot: usize,
}

impl EventStoreStats {
    /// Calculate total storage size
    pub fn total_size(&self) -> u64 {
        self.log_size + self.snapshot_size + self.backup_size
    }

    /// Format size in human-readable format
    pub fn format_size(bytes: u64) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        const GB: u64 = MB * 1024;

        if bytes >= GB {
            format!("{:.2} GB", bytes as f64 / GB as f64)
        } else if bytes >= MB {
            format!("{:.2} MB", bytes as f64 / MB as f64)
        } else if bytes >= KB {
            format!("{:.2} KB", bytes as f64 / KB as f64)
        } else {
            format!("{} B", bytes)
        }
    }
}

/// Collector for Event Store statistics
pub struct StatsCollector {
    config: EventStoreConfig,
}

impl StatsCollector {
    pub fn new(config: EventStoreConfig) -> Self {
        Self { config }
    }

    /// Collect all statistics
    pub fn collect(&self) -> StoreResult<EventStoreStats> {
        let mut stats = EventStoreStats::default();

        let events_path = self.config.events_path();
        if events_path.exists() {
            stats.log_size = fs::metadata(&events_path)?.len();
            self.analyze_event_file(&events_path, &mut stats)?;
        }

        stats.snapshot_size = file_size(&self.config.latest_snapshot_path())?;
        stats.backup_size = file_size(&self.config.previous_snapshot_path())?;

        let snapshots = SnapshotManager::new(self.config.clone());
        stats.snapshot_version = snapshots.load_meta().ok().flatten().map(|m| m.version);

        let base = stats.snapshot_version.unwrap_or(0);
        stats.events_since_snapshot = stats.last_version.saturating_sub(base) as usize;

        Ok(stats)
    }

    fn analyze_event_file(&self, path: &Path, stats: &mut EventStoreStats) -> StoreResult<()> {
        let reader = BufReader::new(File::open(path)?);

        for line_result in reader.lines() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }

            match Event::from_json_line(&line) {
                Ok(event) => {
                    stats.event_count += 1;
                    stats.last_version = stats.last_version.max(event.version);
                    *stats
                        .events_by_type
                        .entry(event.event_type().to_string())
                        .or_insert(0) += 1;
                }
                Err(_) => stats.corrupt_lines += 1,
            }
        }
        Ok(())
    }

    /// Time full replays of the log, ignoring snapshots
    pub fn benchmark_replay(&self, iterations: usize) -> StoreResult<ReplayBenchmark> {
        let iterations = iterations.max(1);
        let log = super::EventStore::with_config(self.config.clone());

        let mut total_duration = Duration::ZERO;
        let mut events_per_iteration = 0;
        for _ in 0..iterations {
            let start = Instant::now();
            let store = log.replay_all()?;
            total_duration += start.elapsed();
            events_per_iteration = store.version() as usize;
        }

        let avg_duration = total_duration / iterations as u32;
        let events_per_second = if avg_duration.as_secs_f64() > 0.0 {
            events_per_iteration as f64 / avg_duration.as_secs_f64()
        } else {
            0.0
        };

        Ok(ReplayBenchmark {
            iterations,
            events_per_iteration,
            avg_duration_ms: avg_duration.as_millis() as u64,
            events_per_second,
        })
    }
}

fn file_size(path: &Path) -> StoreResult<u64> {
    if path.exists() {
        Ok(fs::metadata(path)?.len())
    } else {
        Ok(0)
    }
}

/// Replay benchmark results
#[derive(Debug, Clone, Default)]
pub struct ReplayBenchmark {
    pub iterations: usize,
    /// Events applied per replay
    pub events_per_iteration: usize,
    pub avg_duration_ms: u64,
    pub events_per_second: f64,
}
