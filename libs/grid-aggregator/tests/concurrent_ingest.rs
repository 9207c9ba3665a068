//! Concurrent ingestion and extraction against a shared aggregator

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use grid_aggregator::{AggregatorConfig, MeasurementAggregator};
use grid_model::{Phase, PocEntry, Tag, TopologyClassifier, TopologyDescriptor, ValueType};

const FEEDERS: usize = 4;
const CYCLES: i64 = 200;

fn three_phase_aggregator() -> Arc<MeasurementAggregator> {
    let mut pocs = Vec::new();
    for phase in Phase::ALL {
        pocs.push(PocEntry::new(format!("TRAFO_I_{}_RES", phase), "Slack"));
        for feeder in 0..FEEDERS {
            pocs.push(PocEntry::new(format!("F{}_I_{}_RES", feeder, phase), "Feeder"));
        }
    }
    let known: Vec<Tag> = pocs
        .iter()
        .map(|p| Tag::new(p.tag.clone(), ValueType::Float))
        .collect();
    let descriptor = TopologyDescriptor {
        grid_id: "concurrency".into(),
        pocs,
    };
    let topology = TopologyClassifier::classify(&descriptor, &known);

    let aggregator = MeasurementAggregator::new(AggregatorConfig {
        timestamp_precision_ms: 10,
        buffer_limit: 1000,
    });
    aggregator.set_topology(&topology);
    Arc::new(aggregator)
}

fn at(cycle: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(1_700_000_000_000 + cycle * 10).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_ingest_and_take() {
    let aggregator = three_phase_aggregator();

    let mut writers = Vec::new();
    for feeder in 0..FEEDERS {
        let aggregator = Arc::clone(&aggregator);
        writers.push(tokio::spawn(async move {
            for cycle in 0..CYCLES {
                for phase in Phase::ALL {
                    aggregator.ingest(&format!("F{}_I_{}_RES", feeder, phase), at(cycle), 25.0);
                }
                tokio::task::yield_now().await;
            }
        }));
    }
    let slack_writer = {
        let aggregator = Arc::clone(&aggregator);
        tokio::spawn(async move {
            for cycle in 0..CYCLES {
                for phase in Phase::ALL {
                    aggregator.ingest(
                        &format!("TRAFO_I_{}_RES", phase),
                        at(cycle),
                        25.0 * FEEDERS as f64,
                    );
                }
                tokio::task::yield_now().await;
            }
        })
    };

    let reader = {
        let aggregator = Arc::clone(&aggregator);
        tokio::spawn(async move {
            let mut sums = Vec::new();
            for _ in 0..(CYCLES * 4) {
                if let Some(snapshot) = aggregator.take_complete() {
                    for phase in Phase::ALL {
                        sums.push(snapshot.row(phase).unwrap().sum());
                    }
                }
                tokio::task::yield_now().await;
            }
            sums
        })
    };

    for writer in writers {
        writer.await.unwrap();
    }
    slack_writer.await.unwrap();
    let sums = reader.await.unwrap();

    // Every complete row is balanced: slack negation never races with a topology
    for sum in sums {
        assert!(sum.abs() < 1e-9, "unbalanced row: {}", sum);
    }

    let stats = aggregator.stats();
    assert_eq!(
        stats.readings_stored,
        (CYCLES as u64) * 3 * (FEEDERS as u64 + 1)
    );
    assert_eq!(stats.buffer_overflows, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_topology_swap_while_ingesting() {
    let aggregator = three_phase_aggregator();

    let writer = {
        let aggregator = Arc::clone(&aggregator);
        tokio::spawn(async move {
            for cycle in 0..CYCLES {
                aggregator.ingest("TRAFO_I_PH1_RES", at(cycle), 10.0);
                aggregator.ingest("F0_I_PH1_RES", at(cycle), 10.0);
                tokio::task::yield_now().await;
            }
        })
    };

    let descriptor = TopologyDescriptor {
        grid_id: "swapped".into(),
        pocs: vec![PocEntry::new("F0_I_PH1_RES", "slack")],
    };
    let topology = TopologyClassifier::classify(
        &descriptor,
        &[Tag::new("F0_I_PH1_RES", ValueType::Float)],
    );
    aggregator.set_topology(&topology);
    writer.await.unwrap();

    // After the swap only F0 counts, and it is the slack now
    aggregator.ingest("F0_I_PH1_RES", at(CYCLES + 1), 10.0);
    let snapshot = aggregator.take_complete().unwrap();
    assert!(snapshot.row(Phase::L1).unwrap().sum() < 0.0);
    assert!(snapshot.row(Phase::L2).is_none());
}
