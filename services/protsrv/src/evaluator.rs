//! Fault evaluator
//!
//! State machine `Stopped -> Running <-> Paused` driving a poll loop over the
//! aggregator. Each complete snapshot is one evaluation cycle: per active
//! phase the signed current sum is compared against the tolerance and the
//! phase's fault counter steps up or down. While a faulty phase's counter sits
//! at `max_faulty_states` the protective action is asserted every cycle: every
//! infeed-limit actuator is set to the trip value.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use errors::{GridError, GridResult};
use grid_aggregator::{CompleteSnapshot, MeasurementAggregator};
use grid_model::{Phase, Tag, TagRef, Topology};

use crate::config::{ProtsrvConfig, TagConventions};
use crate::counters::FaultCounters;
use crate::gateway::{write_all, ControlGateway};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluatorState {
    Stopped,
    Running,
    Paused,
}

impl fmt::Display for EvaluatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EvaluatorState::Stopped => "stopped",
            EvaluatorState::Running => "running",
            EvaluatorState::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// Evaluation parameters
#[derive(Debug, Clone)]
pub struct EvaluatorSettings {
    /// Absolute current tolerance in A
    pub tolerance_abs: f64,
    pub max_faulty_states: u32,
    pub three_phase: bool,
    pub poll_interval: Duration,
    pub idle_interval: Duration,
    pub tags: TagConventions,
}

impl EvaluatorSettings {
    pub fn from_config(config: &ProtsrvConfig) -> Self {
        let p = &config.protection;
        Self {
            tolerance_abs: p.tolerance_abs(),
            max_faulty_states: p.max_faulty_states,
            three_phase: p.three_phase_calculation,
            poll_interval: Duration::from_millis(p.poll_interval_ms),
            idle_interval: Duration::from_millis(p.idle_interval_ms),
            tags: config.tags.clone(),
        }
    }
}

/// Statistics for monitoring evaluation
#[derive(Debug, Default)]
pub struct EvaluatorStats {
    pub cycles: AtomicU64,
    pub phases_skipped: AtomicU64,
    pub trips: AtomicU64,
    pub write_errors: AtomicU64,
}

impl EvaluatorStats {
    pub fn snapshot(&self) -> EvaluatorStatsSnapshot {
        EvaluatorStatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            phases_skipped: self.phases_skipped.load(Ordering::Relaxed),
            trips: self.trips.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluatorStatsSnapshot {
    pub cycles: u64,
    pub phases_skipped: u64,
    pub trips: u64,
    pub write_errors: u64,
}

/// Balance of one phase in one cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseBalance {
    pub phase: Phase,
    pub sum: f64,
    pub within_tolerance: bool,
    /// Counter value after this cycle
    pub counter: u32,
}

/// Outcome of one evaluation cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub balances: Vec<PhaseBalance>,
    pub skipped: Vec<Phase>,
    /// The protective action fired in this cycle
    pub tripped: bool,
    /// A counter first reached the maximum in this cycle
    pub newly_tripped: bool,
}

struct EvaluatorInner {
    settings: EvaluatorSettings,
    aggregator: Arc<MeasurementAggregator>,
    gateway: Arc<dyn ControlGateway>,
    counters: Arc<FaultCounters>,
    state_tx: watch::Sender<EvaluatorState>,
    /// "protection online" status tags of the bound topology
    online_tags: RwLock<Vec<Tag>>,
    stats: EvaluatorStats,
}

impl EvaluatorInner {
    fn state(&self) -> EvaluatorState {
        *self.state_tx.borrow()
    }

    async fn publish_online(&self, online: bool) -> GridResult<()> {
        let tags = self.online_tags.read().clone();
        write_all(self.gateway.as_ref(), &tags, if online { 1.0 } else { 0.0 })
            .await
            .map(|_| ())
    }

    async fn evaluate(&self, snapshot: &CompleteSnapshot) -> CycleReport {
        let mut report = CycleReport::default();

        for &phase in Phase::active(self.settings.three_phase) {
            let Some(row) = snapshot.row(phase).filter(|r| !r.is_empty()) else {
                debug!(phase = %phase, "No row for phase, skipped");
                self.stats.phases_skipped.fetch_add(1, Ordering::Relaxed);
                report.skipped.push(phase);
                continue;
            };

            let sum = row.sum();
            let within_tolerance = sum.abs() < self.settings.tolerance_abs;
            let step = if within_tolerance {
                self.counters.decrement(phase)
            } else {
                let step = self.counters.increment(phase);
                if self.counters.at_max(&step) {
                    report.tripped = true;
                    report.newly_tripped |= step.changed();
                }
                step
            };

            debug!(
                phase = %phase,
                sum,
                tolerance = self.settings.tolerance_abs,
                counter = step.current,
                "Phase balance evaluated"
            );
            report.balances.push(PhaseBalance {
                phase,
                sum,
                within_tolerance,
                counter: step.current,
            });
        }

        self.stats.cycles.fetch_add(1, Ordering::Relaxed);

        if report.tripped {
            self.trip(&snapshot.control, &report).await;
        }
        self.publish_counters(&snapshot.status).await;

        report
    }

    async fn trip(&self, control: &[Tag], report: &CycleReport) {
        let limits: Vec<Tag> = control
            .iter()
            .filter(|t| t.name.contains(self.settings.tags.limit_ctrl.as_str()))
            .cloned()
            .collect();
        let faulty: Vec<String> = report
            .balances
            .iter()
            .filter(|b| b.counter == self.counters.max())
            .map(|b| format!("{}={:.2}A", b.phase, b.sum))
            .collect();

        self.stats.trips.fetch_add(1, Ordering::Relaxed);
        if limits.is_empty() {
            if report.newly_tripped {
                error!(phases = ?faulty, "Persistent current imbalance but no infeed-limit actuator");
            }
            return;
        }

        if report.newly_tripped {
            error!(
                phases = ?faulty,
                actuators = limits.len(),
                limit = self.settings.tags.limit_trip_value,
                "Persistent current imbalance, limiting infeed"
            );
        } else {
            debug!(phases = ?faulty, "Imbalance persists, re-asserting infeed limit");
        }
        if let Err(e) = write_all(
            self.gateway.as_ref(),
            &limits,
            self.settings.tags.limit_trip_value,
        )
        .await
        {
            self.stats.write_errors.fetch_add(1, Ordering::Relaxed);
            error!("Protective write failed: {}", e);
        }
    }

    /// Write the counters to the fault telemetry tags
    async fn publish_counters(&self, status: &[Tag]) {
        let (refs, values): (Vec<TagRef>, Vec<f64>) = status
            .iter()
            .filter(|t| self.settings.tags.is_fault_counter(&t.name))
            .map(|t| {
                let value = match Phase::from_tag(&t.name) {
                    Some(phase) => self.counters.get(phase),
                    None => self.counters.max_value(),
                };
                (t.reference.clone(), f64::from(value))
            })
            .unzip();
        if refs.is_empty() {
            return;
        }

        if let Err(e) = self.gateway.write_values(&refs, &values).await {
            self.stats.write_errors.fetch_add(1, Ordering::Relaxed);
            warn!("Fault counter telemetry write failed: {}", e);
        }
    }
}

async fn run_loop(inner: Arc<EvaluatorInner>, token: CancellationToken) {
    let mut state_rx = inner.state_tx.subscribe();
    debug!("Evaluation loop started");

    loop {
        let state = *state_rx.borrow_and_update();
        if state == EvaluatorState::Running {
            if let Some(snapshot) = inner.aggregator.take_complete() {
                inner.evaluate(&snapshot).await;
            }
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(inner.settings.poll_interval) => {},
            }
        } else {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = state_rx.changed() => {},
                _ = tokio::time::sleep(inner.settings.idle_interval) => {},
            }
        }
    }

    debug!("Evaluation loop stopped");
}

/// Differential current fault evaluator
pub struct FaultEvaluator {
    inner: Arc<EvaluatorInner>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl FaultEvaluator {
    pub fn new(
        settings: EvaluatorSettings,
        aggregator: Arc<MeasurementAggregator>,
        gateway: Arc<dyn ControlGateway>,
    ) -> Self {
        let (state_tx, _) = watch::channel(EvaluatorState::Stopped);
        let counters = Arc::new(FaultCounters::new(settings.max_faulty_states));
        Self {
            inner: Arc::new(EvaluatorInner {
                settings,
                aggregator,
                gateway,
                counters,
                state_tx,
                online_tags: RwLock::new(Vec::new()),
                stats: EvaluatorStats::default(),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> EvaluatorState {
        self.inner.state()
    }

    pub fn counters(&self) -> Arc<FaultCounters> {
        Arc::clone(&self.inner.counters)
    }

    pub fn stats(&self) -> EvaluatorStatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn settings(&self) -> &EvaluatorSettings {
        &self.inner.settings
    }

    /// Pick up the status tags of a (re)classified topology
    pub fn bind_topology(&self, topology: &Topology) {
        let online = topology.status_with_marker(&self.inner.settings.tags.protection_online);
        *self.inner.online_tags.write() = online;
    }

    /// Move `from -> to`; `Ok(false)` when already in `to`
    fn transition(&self, from: EvaluatorState, to: EvaluatorState) -> GridResult<bool> {
        let mut outcome = Ok(false);
        self.inner.state_tx.send_if_modified(|state| {
            if *state == to {
                false
            } else if *state == from {
                *state = to;
                outcome = Ok(true);
                true
            } else {
                outcome = Err(GridError::InvalidTransition {
                    from: state.to_string(),
                    to: to.to_string(),
                });
                false
            }
        });
        outcome
    }

    /// Start the evaluation loop and report protection online
    pub async fn start(&self) -> GridResult<()> {
        if !self.transition(EvaluatorState::Stopped, EvaluatorState::Running)? {
            return Ok(());
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_loop(Arc::clone(&self.inner), token.clone()));
        if let Some((old_token, _)) = self.task.lock().replace((token, handle)) {
            old_token.cancel();
        }

        info!(
            tolerance = self.inner.settings.tolerance_abs,
            max_faulty_states = self.inner.settings.max_faulty_states,
            three_phase = self.inner.settings.three_phase,
            "Fault evaluator started"
        );
        self.inner.publish_online(true).await
    }

    /// Suspend evaluation; buffered measurements are kept
    pub async fn pause(&self) -> GridResult<()> {
        if !self.transition(EvaluatorState::Running, EvaluatorState::Paused)? {
            return Ok(());
        }
        info!("Fault evaluator paused");
        self.inner.publish_online(false).await
    }

    pub async fn resume(&self) -> GridResult<()> {
        if !self.transition(EvaluatorState::Paused, EvaluatorState::Running)? {
            return Ok(());
        }
        info!("Fault evaluator resumed");
        self.inner.publish_online(true).await
    }

    /// Stop the loop without touching the aggregator
    pub async fn terminate(&self) {
        let task = self.task.lock().take();
        self.inner.state_tx.send_replace(EvaluatorState::Stopped);
        if let Some((token, handle)) = task {
            token.cancel();
            match handle.await {
                Ok(()) => info!("Fault evaluator terminated"),
                Err(e) => error!("Evaluation loop failed: {}", e),
            }
        }
    }

    /// Run one evaluation cycle on `snapshot`
    pub async fn evaluate(&self, snapshot: &CompleteSnapshot) -> CycleReport {
        self.inner.evaluate(snapshot).await
    }
}
