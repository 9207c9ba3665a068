//! Grid Aggregator Library
//!
//! Collects per-phase current readings into timestamp buckets and hands out
//! complete rows to the fault evaluator.
//!
//! # Modules
//!
//! - `rounding`: timestamp bucketing
//! - `aggregator`: the lock-guarded `MeasurementAggregator`
//!
//! # Example
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use grid_aggregator::{AggregatorConfig, MeasurementAggregator};
//! use grid_model::{Phase, Tag, TopologyClassifier, TopologyDescriptor, ValueType};
//!
//! let descriptor = TopologyDescriptor::from_json_str(
//!     r#"{"Grid-ID": "G1", "POCs": [{"A_I_PH1_RES": "slack"}, {"B_I_PH1_RES": "load"}]}"#,
//!     "inline",
//! )
//! .unwrap();
//! let known = vec![
//!     Tag::new("A_I_PH1_RES", ValueType::Float),
//!     Tag::new("B_I_PH1_RES", ValueType::Float),
//! ];
//! let topology = TopologyClassifier::classify(&descriptor, &known);
//!
//! let aggregator = MeasurementAggregator::new(AggregatorConfig::default());
//! aggregator.set_topology(&topology);
//!
//! let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
//! aggregator.ingest("A_I_PH1_RES", ts, 100.0);
//! aggregator.ingest("B_I_PH1_RES", ts, 100.0);
//!
//! let snapshot = aggregator.take_complete().unwrap();
//! assert_eq!(snapshot.row(Phase::L1).unwrap().sum(), 0.0);
//! ```

pub mod aggregator;
pub mod rounding;

pub use aggregator::{
    AggregatorConfig, AggregatorStats, AggregatorStatsSnapshot, CompleteSnapshot, IngestOutcome,
    MeasurementAggregator, MeasurementRow,
};
pub use rounding::round_to_precision;
