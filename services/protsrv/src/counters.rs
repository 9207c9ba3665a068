//! Per-phase fault counters
//!
//! Each counter moves by exactly one step per evaluation cycle and stays in
//! `[0, max]`. The evaluator owns the counters; telemetry and tests read them
//! through a shared `Arc<FaultCounters>`.

use std::sync::atomic::{AtomicU32, Ordering};

use grid_model::Phase;

/// Result of a counter step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterStep {
    pub previous: u32,
    pub current: u32,
}

impl CounterStep {
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }
}

#[derive(Debug)]
pub struct FaultCounters {
    counts: [AtomicU32; 3],
    max: u32,
}

impl FaultCounters {
    pub fn new(max: u32) -> Self {
        Self {
            counts: [AtomicU32::new(0), AtomicU32::new(0), AtomicU32::new(0)],
            max,
        }
    }

    /// Upper bound (`max_faulty_states`)
    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn get(&self, phase: Phase) -> u32 {
        self.counts[phase.index()].load(Ordering::Acquire)
    }

    /// Highest counter over all phases
    pub fn max_value(&self) -> u32 {
        Phase::ALL.iter().map(|p| self.get(*p)).max().unwrap_or(0)
    }

    pub fn snapshot(&self) -> [u32; 3] {
        [self.get(Phase::L1), self.get(Phase::L2), self.get(Phase::L3)]
    }

    /// Add one, capped at `max`
    pub fn increment(&self, phase: Phase) -> CounterStep {
        let max = self.max;
        self.step(phase, |v| if v < max { v + 1 } else { max })
    }

    /// Subtract one, floored at zero
    pub fn decrement(&self, phase: Phase) -> CounterStep {
        self.step(phase, |v| v.saturating_sub(1))
    }

    /// `true` when the counter sits at `max` after this step
    pub fn at_max(&self, step: &CounterStep) -> bool {
        step.current >= self.max
    }

    fn step(&self, phase: Phase, f: impl Fn(u32) -> u32) -> CounterStep {
        let counter = &self.counts[phase.index()];
        let mut previous = counter.load(Ordering::Acquire);
        loop {
            let next = f(previous);
            match counter.compare_exchange_weak(previous, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    return CounterStep {
                        previous,
                        current: next,
                    }
                },
                Err(actual) => previous = actual,
            }
        }
    }
}
