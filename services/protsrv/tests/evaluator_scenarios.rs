//! Evaluation cycles against an in-process gateway
//!
//! Readings go straight into the aggregator; each complete snapshot is
//! evaluated explicitly so cycle boundaries are deterministic.

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::sync::Arc;

use chrono::{DateTime, Utc};

use grid_aggregator::{AggregatorConfig, MeasurementAggregator};
use grid_model::{Phase, TagRef, Topology, TopologyClassifier, TopologyDescriptor, Value};
use protsrv::{
    ControlGateway, CycleReport, EvaluatorSettings, FaultEvaluator, MemoryGateway, ProtsrvConfig,
};

mod common;
use common::{cycle_ts, registered_gateway, SCOPE, TOPOLOGY};

struct Bench {
    gateway: Arc<MemoryGateway>,
    aggregator: Arc<MeasurementAggregator>,
    evaluator: FaultEvaluator,
    base: DateTime<Utc>,
    cycle: i64,
}

impl Bench {
    async fn new(config: ProtsrvConfig, topology_json: &str) -> Self {
        let gateway = registered_gateway().await;
        let known = gateway.read_tags(SCOPE).await.unwrap();
        let descriptor = TopologyDescriptor::from_json_str(topology_json, "test").unwrap();
        let topology: Topology = TopologyClassifier::classify(&descriptor, &known);

        let aggregator = Arc::new(MeasurementAggregator::new(AggregatorConfig::default()));
        aggregator.set_topology(&topology);
        let evaluator = FaultEvaluator::new(
            EvaluatorSettings::from_config(&config),
            Arc::clone(&aggregator),
            gateway.clone(),
        );
        evaluator.bind_topology(&topology);

        Self {
            gateway,
            aggregator,
            evaluator,
            base: Utc::now(),
            cycle: 0,
        }
    }

    /// Feed one bucket of readings and evaluate it
    async fn cycle(&mut self, readings: &[(&str, f64)]) -> CycleReport {
        let ts = cycle_ts(self.base, self.cycle);
        self.cycle += 1;
        for (tag, value) in readings {
            self.aggregator.ingest(tag, ts, *value);
        }
        let snapshot = self.aggregator.take_complete().unwrap();
        self.evaluator.evaluate(&snapshot).await
    }

    fn counter(&self) -> u32 {
        self.evaluator.counters().get(Phase::L1)
    }

    fn limit_writes(&self) -> Vec<Value> {
        self.gateway.writes_to("PV_LIMIT_CTRL")
    }

    fn limit_ref(&self) -> TagRef {
        TagRef::new(format!("{}.PV_LIMIT_CTRL", SCOPE))
    }
}

/// Transformer feeds 100 A, PV and household draw `pv + hh`
fn readings(pv: f64, hh: f64) -> [(&'static str, f64); 3] {
    [("TR_I_PH1_RES", 100.0), ("PV_I_PH1_RES", pv), ("HH_I_PH1_RES", hh)]
}

#[tokio::test]
async fn test_balanced_cycle_keeps_counter_at_zero() {
    let mut bench = Bench::new(ProtsrvConfig::default(), TOPOLOGY).await;
    assert!((bench.evaluator.settings().tolerance_abs - 13.75).abs() < 1e-9);

    let report = bench.cycle(&readings(60.0, 40.0)).await;
    assert_eq!(report.balances.len(), 1);
    assert!(report.balances[0].within_tolerance);
    assert!(report.balances[0].sum.abs() < 1e-9);
    assert_eq!(bench.counter(), 0);
    assert!(!report.tripped);
}

#[tokio::test]
async fn test_imbalance_increments_counter() {
    let mut bench = Bench::new(ProtsrvConfig::default(), TOPOLOGY).await;

    let report = bench.cycle(&readings(50.0, 30.0)).await;
    assert!((report.balances[0].sum + 20.0).abs() < 1e-9);
    assert!(!report.balances[0].within_tolerance);
    assert_eq!(bench.counter(), 1);
    assert_eq!(bench.gateway.value_of("FAULT_COUNTER"), Some(Value::Int16(1)));
}

#[tokio::test]
async fn test_tolerance_boundary() {
    let mut bench = Bench::new(ProtsrvConfig::default(), TOPOLOGY).await;

    bench.cycle(&readings(60.0, 54.0)).await;
    assert_eq!(bench.counter(), 1);
    bench.cycle(&readings(60.0, 53.0)).await;
    assert_eq!(bench.counter(), 0);
}

#[tokio::test]
async fn test_trip_fires_on_max_faulty_states() {
    let mut bench = Bench::new(ProtsrvConfig::default(), TOPOLOGY).await;

    for n in 1..=4 {
        let report = bench.cycle(&readings(50.0, 30.0)).await;
        assert!(!report.tripped, "tripped early in cycle {}", n);
    }
    assert!(bench.limit_writes().is_empty());

    let report = bench.cycle(&readings(50.0, 30.0)).await;
    assert!(report.tripped);
    assert!(report.newly_tripped);
    assert_eq!(bench.counter(), 5);
    assert_eq!(bench.limit_writes(), vec![Value::Int16(0)]);
}

#[tokio::test]
async fn test_saturated_counter_reasserts_limit() {
    let mut bench = Bench::new(ProtsrvConfig::default(), TOPOLOGY).await;
    for _ in 0..5 {
        bench.cycle(&readings(50.0, 30.0)).await;
    }

    // Someone else restores the limit while the imbalance persists
    bench
        .gateway
        .write_values(&[bench.limit_ref()], &[100.0])
        .await
        .unwrap();

    for _ in 0..3 {
        let report = bench.cycle(&readings(50.0, 30.0)).await;
        assert!(report.tripped);
        assert!(!report.newly_tripped);
    }
    assert_eq!(bench.counter(), 5);
    assert_eq!(bench.gateway.value_of("PV_LIMIT_CTRL"), Some(Value::Int16(0)));
    assert_eq!(bench.evaluator.stats().trips, 4);

    // A recovering cycle leaves the limit alone
    let report = bench.cycle(&readings(60.0, 40.0)).await;
    assert!(!report.tripped);
    assert_eq!(bench.limit_writes().len(), 5);
}

#[tokio::test]
async fn test_recovery_decrements_without_restoring_limit() {
    let mut bench = Bench::new(ProtsrvConfig::default(), TOPOLOGY).await;
    for _ in 0..5 {
        bench.cycle(&readings(50.0, 30.0)).await;
    }
    assert_eq!(bench.limit_writes(), vec![Value::Int16(0)]);

    bench.cycle(&readings(60.0, 40.0)).await;
    assert_eq!(bench.counter(), 4);
    bench.cycle(&readings(60.0, 40.0)).await;
    assert_eq!(bench.counter(), 3);

    assert_eq!(bench.limit_writes(), vec![Value::Int16(0)]);
    assert_eq!(bench.gateway.value_of("PV_LIMIT_CTRL"), Some(Value::Int16(0)));
    assert_eq!(bench.gateway.value_of("FAULT_COUNTER"), Some(Value::Int16(3)));
}

#[tokio::test]
async fn test_retrip_after_partial_recovery() {
    let mut bench = Bench::new(ProtsrvConfig::default(), TOPOLOGY).await;
    for _ in 0..5 {
        bench.cycle(&readings(50.0, 30.0)).await;
    }
    bench.cycle(&readings(60.0, 40.0)).await;
    assert_eq!(bench.counter(), 4);

    let report = bench.cycle(&readings(50.0, 30.0)).await;
    assert!(report.tripped);
    assert_eq!(bench.limit_writes(), vec![Value::Int16(0), Value::Int16(0)]);
}

#[tokio::test]
async fn test_noise_within_tolerance_never_counts() {
    let mut bench = Bench::new(ProtsrvConfig::default(), TOPOLOGY).await;
    let noise = [-13.0, 12.5, -5.0, 0.0, 13.7, -13.74, 7.25, 1.0];

    for (i, delta) in noise.iter().cycle().take(40).enumerate() {
        let report = bench.cycle(&readings(60.0 + delta, 40.0)).await;
        assert!(report.balances[0].within_tolerance, "cycle {} faulty", i);
    }
    assert_eq!(bench.counter(), 0);
    assert!(bench.limit_writes().is_empty());
    assert_eq!(bench.evaluator.stats().cycles, 40);
}

#[tokio::test]
async fn test_counter_telemetry_written_every_cycle() {
    let mut bench = Bench::new(ProtsrvConfig::default(), TOPOLOGY).await;

    bench.cycle(&readings(60.0, 40.0)).await;
    bench.cycle(&readings(60.0, 40.0)).await;
    bench.cycle(&readings(50.0, 30.0)).await;
    bench.cycle(&readings(50.0, 30.0)).await;

    assert_eq!(
        bench.gateway.writes_to("FAULT_COUNTER"),
        vec![Value::Int16(0), Value::Int16(0), Value::Int16(1), Value::Int16(2)]
    );
}

#[tokio::test]
async fn test_three_phase_trips_each_phase() {
    const THREE_PHASE: &str = r#"{
      "Grid-ID": "Three-Phase",
      "POCs": [
        {"TR_I_PH1_RES": "slack"}, {"PV_I_PH1_RES": "pv"},
        {"TR_I_PH2_RES": "slack"}, {"PV_I_PH2_RES": "pv"},
        {"PV_LIMIT_CTRL": "pv"}, {"FAULT_COUNTER": "status"}
      ]
    }"#;
    let gateway = registered_gateway().await;
    gateway
        .register_tags(
            SCOPE,
            &grid_model::parse_device_list("TR_I_PH2_RES 4\nPV_I_PH2_RES 4\n", "test").unwrap(),
        )
        .await
        .unwrap();
    let known = gateway.read_tags(SCOPE).await.unwrap();
    let descriptor = TopologyDescriptor::from_json_str(THREE_PHASE, "test").unwrap();
    let topology = TopologyClassifier::classify(&descriptor, &known);

    let mut config = ProtsrvConfig::default();
    config.protection.three_phase_calculation = true;
    config.protection.max_faulty_states = 2;
    let aggregator = Arc::new(MeasurementAggregator::new(AggregatorConfig::default()));
    aggregator.set_topology(&topology);
    let evaluator = FaultEvaluator::new(
        EvaluatorSettings::from_config(&config),
        Arc::clone(&aggregator),
        gateway.clone(),
    );

    let base = Utc::now();
    let mut tripped = Vec::new();
    for n in 0..3 {
        let ts = cycle_ts(base, n);
        aggregator.ingest("TR_I_PH1_RES", ts, 10.0);
        aggregator.ingest("PV_I_PH1_RES", ts, 10.0);
        aggregator.ingest("TR_I_PH2_RES", ts, 10.0);
        aggregator.ingest("PV_I_PH2_RES", ts, 40.0);
        let snapshot = aggregator.take_complete().unwrap();
        let report = evaluator.evaluate(&snapshot).await;
        assert_eq!(report.skipped, vec![Phase::L3]);
        tripped.push(report.tripped);
    }

    assert_eq!(tripped, vec![false, true, true]);
    assert_eq!(evaluator.counters().snapshot(), [0, 2, 0]);
    assert_eq!(
        gateway.writes_to("PV_LIMIT_CTRL"),
        vec![Value::Int16(0), Value::Int16(0)]
    );
    // Phase-less counter tag carries the highest counter
    assert_eq!(gateway.value_of("FAULT_COUNTER"), Some(Value::Int16(2)));
}

#[tokio::test]
async fn test_single_phase_mode_ignores_other_phases() {
    const TWO_PHASES: &str = r#"{
      "Grid-ID": "Mixed",
      "POCs": [
        {"TR_I_PH1_RES": "slack"}, {"PV_I_PH1_RES": "pv"},
        {"TR_I_PH2_RES": "slack"}, {"PV_I_PH2_RES": "pv"}
      ]
    }"#;
    let gateway = registered_gateway().await;
    gateway
        .register_tags(
            SCOPE,
            &grid_model::parse_device_list("TR_I_PH2_RES 4\nPV_I_PH2_RES 4\n", "test").unwrap(),
        )
        .await
        .unwrap();
    let known = gateway.read_tags(SCOPE).await.unwrap();
    let descriptor = TopologyDescriptor::from_json_str(TWO_PHASES, "test").unwrap();
    let topology = TopologyClassifier::classify(&descriptor, &known);

    let aggregator = Arc::new(MeasurementAggregator::new(AggregatorConfig::default()));
    aggregator.set_topology(&topology);
    let evaluator = FaultEvaluator::new(
        EvaluatorSettings::from_config(&ProtsrvConfig::default()),
        Arc::clone(&aggregator),
        gateway,
    );

    let ts = Utc::now();
    aggregator.ingest("TR_I_PH1_RES", ts, 10.0);
    aggregator.ingest("PV_I_PH1_RES", ts, 10.0);
    aggregator.ingest("TR_I_PH2_RES", ts, 10.0);
    aggregator.ingest("PV_I_PH2_RES", ts, 99.0);
    let report = evaluator.evaluate(&aggregator.take_complete().unwrap()).await;

    assert_eq!(report.balances.len(), 1);
    assert_eq!(report.balances[0].phase, Phase::L1);
    assert!(report.skipped.is_empty());
    assert_eq!(evaluator.counters().snapshot(), [0, 0, 0]);
}
