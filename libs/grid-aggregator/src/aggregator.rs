//! Per-phase measurement aggregation
//!
//! Readings arrive from gateway callbacks on arbitrary threads and are stored
//! in one bucket map per phase. The evaluator polls [`MeasurementAggregator::take_complete`]
//! for the newest bucket in which every expected phase tag has reported.
//!
//! A single `parking_lot::Mutex` guards buffers, slack references and tag
//! lists together so a topology swap is never observed half-applied.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use grid_model::{Phase, Tag, Topology};

use crate::rounding::bucket_micros;

/// Aggregator configuration
#[derive(Clone, Debug)]
pub struct AggregatorConfig {
    /// Bucket width in milliseconds (default: 10ms)
    pub timestamp_precision_ms: u64,
    /// Maximum buffered rows per phase before a forced clear (default: 100)
    pub buffer_limit: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            timestamp_precision_ms: 10,
            buffer_limit: 100,
        }
    }
}

/// Statistics for monitoring aggregation
#[derive(Debug, Default)]
pub struct AggregatorStats {
    /// Readings stored into a phase buffer
    pub readings_stored: AtomicU64,
    /// Readings for tags that are not phase currents of the active topology
    pub readings_ignored: AtomicU64,
    /// Readings that replaced a value already stored in the same bucket
    pub readings_overwritten: AtomicU64,
    /// Forced buffer clears due to `buffer_limit`
    pub buffer_overflows: AtomicU64,
    /// Complete snapshots handed out
    pub snapshots_taken: AtomicU64,
}

impl AggregatorStats {
    /// Get a snapshot of current stats
    pub fn snapshot(&self) -> AggregatorStatsSnapshot {
        AggregatorStatsSnapshot {
            readings_stored: self.readings_stored.load(Ordering::Relaxed),
            readings_ignored: self.readings_ignored.load(Ordering::Relaxed),
            readings_overwritten: self.readings_overwritten.load(Ordering::Relaxed),
            buffer_overflows: self.buffer_overflows.load(Ordering::Relaxed),
            snapshots_taken: self.snapshots_taken.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of aggregator statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatorStatsSnapshot {
    pub readings_stored: u64,
    pub readings_ignored: u64,
    pub readings_overwritten: u64,
    pub buffer_overflows: u64,
    pub snapshots_taken: u64,
}

/// Result of a single [`MeasurementAggregator::ingest`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IngestOutcome {
    /// Stored into the phase buffer (slack already negated in `value`)
    Stored {
        phase: Phase,
        bucket: DateTime<Utc>,
        value: f64,
    },
    /// Not a phase-current tag of the active topology
    Ignored,
    /// Stored, then the phase buffer exceeded `buffer_limit` and was dropped
    Overflow { phase: Phase },
}

/// One complete bucket of a phase: every expected tag has a value
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRow {
    pub timestamp: DateTime<Utc>,
    /// `(tag, value)` pairs in topology order, slack values negated
    pub values: Vec<(String, f64)>,
}

impl MeasurementRow {
    /// Algebraic sum of the row
    pub fn sum(&self) -> f64 {
        self.values.iter().map(|(_, v)| v).sum()
    }

    pub fn get(&self, tag: &str) -> Option<f64> {
        self.values.iter().find(|(t, _)| t == tag).map(|(_, v)| *v)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Copy of the newest complete rows handed to the evaluator
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompleteSnapshot {
    /// Newest complete row per phase; `None` for phases without tags
    pub rows: [Option<MeasurementRow>; 3],
    pub control: Vec<Tag>,
    pub status: Vec<Tag>,
}

impl CompleteSnapshot {
    pub fn row(&self, phase: Phase) -> Option<&MeasurementRow> {
        self.rows[phase.index()].as_ref()
    }
}

/// Buffered rows of one phase, keyed by bucket microseconds
type PhaseBuffer = BTreeMap<i64, HashMap<String, f64>>;

#[derive(Debug, Default)]
struct AggregatorState {
    /// Expected tag names per phase, in topology order
    phase_tags: [Vec<String>; 3],
    /// Lookup tag name -> phase
    tag_phase: HashMap<String, Phase>,
    slack: [Option<String>; 3],
    control: Vec<Tag>,
    status: Vec<Tag>,
    buffers: [PhaseBuffer; 3],
    /// Set by `take_complete`, executed on the next call
    clear_pending: bool,
}

impl AggregatorState {
    fn apply_pending_clear(&mut self) {
        if self.clear_pending {
            for buffer in &mut self.buffers {
                buffer.clear();
            }
            self.clear_pending = false;
        }
    }

    fn is_active(&self, phase: Phase) -> bool {
        !self.phase_tags[phase.index()].is_empty()
    }

    /// Newest bucket of `phase` where all expected tags are present
    fn newest_complete(&self, phase: Phase) -> Option<(i64, &HashMap<String, f64>)> {
        let expected = self.phase_tags[phase.index()].len();
        self.buffers[phase.index()]
            .iter()
            .rev()
            .find(|(_, row)| row.len() == expected)
            .map(|(ts, row)| (*ts, row))
    }
}

/// Thread-safe time-bucketed measurement buffer
pub struct MeasurementAggregator {
    state: Mutex<AggregatorState>,
    config: AggregatorConfig,
    stats: AggregatorStats,
}

impl MeasurementAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            state: Mutex::new(AggregatorState::default()),
            config,
            stats: AggregatorStats::default(),
        }
    }

    /// Get statistics
    pub fn stats(&self) -> AggregatorStatsSnapshot {
        self.stats.snapshot()
    }

    /// Replace slack references and tag lists, dropping buffered rows
    pub fn set_topology(&self, topology: &Topology) {
        let mut state = self.state.lock();

        let mut tag_phase = HashMap::new();
        for phase in Phase::ALL {
            let names: Vec<String> = topology
                .phase_tags(phase)
                .iter()
                .map(|t| t.name.clone())
                .collect();
            for name in &names {
                tag_phase.insert(name.clone(), phase);
            }
            state.phase_tags[phase.index()] = names;
            state.slack[phase.index()] = topology.slack(phase).map(|t| t.name.clone());
            state.buffers[phase.index()].clear();
        }
        state.tag_phase = tag_phase;
        state.control = topology.control.clone();
        state.status = topology.status.clone();
        state.clear_pending = false;

        debug!(
            grid_id = %topology.grid_id,
            tags = state.tag_phase.len(),
            "Aggregator topology replaced"
        );
    }

    /// Store a reading in its phase buffer
    ///
    /// The timestamp is bucketed to the configured precision; slack readings
    /// are negated. A second reading for the same tag and bucket overwrites
    /// the first.
    pub fn ingest(&self, tag: &str, timestamp: DateTime<Utc>, value: f64) -> IngestOutcome {
        let mut state = self.state.lock();
        state.apply_pending_clear();

        let Some(&phase) = state.tag_phase.get(tag) else {
            self.stats.readings_ignored.fetch_add(1, Ordering::Relaxed);
            trace!(tag, "Reading ignored, not a phase current");
            return IngestOutcome::Ignored;
        };

        let value = if state.slack[phase.index()].as_deref() == Some(tag) {
            -value
        } else {
            value
        };

        let bucket = bucket_micros(timestamp.timestamp_micros(), self.config.timestamp_precision_ms);
        let buffer = &mut state.buffers[phase.index()];
        let previous = buffer
            .entry(bucket)
            .or_default()
            .insert(tag.to_string(), value);

        self.stats.readings_stored.fetch_add(1, Ordering::Relaxed);
        if previous.is_some() {
            self.stats.readings_overwritten.fetch_add(1, Ordering::Relaxed);
        }

        if buffer.len() > self.config.buffer_limit {
            let dropped = buffer.len();
            buffer.clear();
            self.stats.buffer_overflows.fetch_add(1, Ordering::Relaxed);
            warn!(
                phase = %phase,
                rows = dropped,
                limit = self.config.buffer_limit,
                "Phase buffer overflow without complete row, buffer cleared"
            );
            return IngestOutcome::Overflow { phase };
        }

        IngestOutcome::Stored {
            phase,
            bucket: DateTime::from_timestamp_micros(bucket).unwrap_or(timestamp),
            value,
        }
    }

    /// Extract the newest complete row of every active phase
    ///
    /// Returns `None` unless every phase with expected tags has a complete
    /// row. On success the buffers are cleared lazily on the next call.
    pub fn take_complete(&self) -> Option<CompleteSnapshot> {
        let mut state = self.state.lock();
        state.apply_pending_clear();

        if !Phase::ALL.iter().any(|p| state.is_active(*p)) {
            return None;
        }

        let mut snapshot = CompleteSnapshot::default();
        for phase in Phase::ALL {
            if !state.is_active(phase) {
                continue;
            }
            let (bucket, row) = state.newest_complete(phase)?;
            let values = state.phase_tags[phase.index()]
                .iter()
                .filter_map(|name| row.get(name).map(|v| (name.clone(), *v)))
                .collect();
            snapshot.rows[phase.index()] = Some(MeasurementRow {
                timestamp: DateTime::from_timestamp_micros(bucket).unwrap_or_default(),
                values,
            });
        }

        snapshot.control = state.control.clone();
        snapshot.status = state.status.clone();
        state.clear_pending = true;
        self.stats.snapshots_taken.fetch_add(1, Ordering::Relaxed);

        Some(snapshot)
    }

    /// Number of buffered rows for `phase`, including rows pending a clear
    pub fn buffered_rows(&self, phase: Phase) -> usize {
        let state = self.state.lock();
        if state.clear_pending {
            0
        } else {
            state.buffers[phase.index()].len()
        }
    }
}
