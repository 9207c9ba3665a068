//! File-based loading of topology descriptors and device lists

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::io::Write;

use errors::GridError;
use grid_model::{
    load_device_file, Phase, Tag, TagRole, TopologyClassifier, TopologyDescriptor, ValueType,
};
use tempfile::NamedTempFile;

const TOPOLOGY: &str = r#"{
    "Grid-ID": "LVGrid-Demo",
    "POCs": [
        {"TRAFO_I_PH1_RES": "Slack Transformer"},
        {"TRAFO_I_PH2_RES": "Slack Transformer"},
        {"TRAFO_I_PH3_RES": "Slack Transformer"},
        {"PV1_I_PH1_RES": "PV Plant 1"},
        {"PV1_I_PH2_RES": "PV Plant 1"},
        {"PV1_I_PH3_RES": "PV Plant 1"},
        {"PV1_P_RES": "PV Plant 1 power"},
        {"PV1_LIMIT_CTRL": "PV Plant 1 limit"},
        {"UPDATE_REQUEST_TOPOLOGY": "Topology update"},
        {"RUN_ONLINE_GRID_PROTECTION": "Run flag"},
        {"FEHLER_COUNTER": "Fault counter"}
    ]
}"#;

const DEVICES: &str = "TRAFO_I_PH1_RES\t4
TRAFO_I_PH2_RES\t4
TRAFO_I_PH3_RES\t4
PV1_I_PH1_RES,4,0
PV1_I_PH2_RES,4,0
PV1_I_PH3_RES,4,0
PV1_P_RES 4
PV1_LIMIT_CTRL 2
UPDATE_REQUEST_TOPOLOGY 2
RUN_ONLINE_GRID_PROTECTION 2
FEHLER_COUNTER 2
";

fn write_temp(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_classify_from_files() {
    let topology_file = write_temp(TOPOLOGY);
    let device_file = write_temp(DEVICES);

    let descriptor = TopologyDescriptor::from_file(topology_file.path()).unwrap();
    let known: Vec<Tag> = load_device_file(device_file.path())
        .unwrap()
        .into_iter()
        .map(|d| Tag::new(d.tag, d.value_type))
        .collect();

    let topology = TopologyClassifier::classify(&descriptor, &known);

    assert_eq!(topology.grid_id, "LVGrid-Demo");
    for phase in Phase::ALL {
        assert_eq!(topology.phase_tags(phase).len(), 2);
        assert!(topology.slack(phase).unwrap().name.starts_with("TRAFO"));
    }
    assert_eq!(topology.other_measurement.len(), 1);
    assert_eq!(topology.control.len(), 1);
    assert_eq!(topology.control[0].value_type, ValueType::Int16);
    assert_eq!(topology.status.len(), 3);
    assert_eq!(topology.role_of("PV1_LIMIT_CTRL"), Some(TagRole::Control));
}

#[test]
fn test_slack_round_trip_roles() {
    let descriptor = TopologyDescriptor::from_json_str(
        r#"{"Grid-ID": "G", "POCs": [{"A_I_PH1_RES": "slack"}, {"B_I_PH1_RES": "load"}]}"#,
        "inline",
    )
    .unwrap();
    let known = vec![
        Tag::new("A_I_PH1_RES", ValueType::Float),
        Tag::new("B_I_PH1_RES", ValueType::Float),
    ];

    let topology = TopologyClassifier::classify(&descriptor, &known);

    assert_eq!(
        topology.role_of("A_I_PH1_RES"),
        Some(TagRole::PhaseCurrent {
            phase: Phase::L1,
            is_slack: true
        })
    );
    assert_eq!(
        topology.role_of("B_I_PH1_RES"),
        Some(TagRole::PhaseCurrent {
            phase: Phase::L1,
            is_slack: false
        })
    );
}

#[test]
fn test_malformed_descriptor_file() {
    let file = write_temp(r#"{"Grid-ID": "G", "POCs": "not-a-list"}"#);
    let err = TopologyDescriptor::from_file(file.path()).unwrap_err();
    assert!(matches!(err, GridError::ParseError { .. }));
    assert!(!err.is_recoverable());
}
