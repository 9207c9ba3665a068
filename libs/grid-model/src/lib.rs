//! Grid Model Library
//!
//! Domain types shared by the protection services: tags and their roles,
//! value types, the topology descriptor and the classifier that partitions
//! a topology into phase groups.
//!
//! # Modules
//!
//! - `types`: `Tag`, `TagRole`, `Phase`, `ValueType`, `Value`
//! - `topology`: topology descriptor parsing and `TopologyClassifier`
//! - `device`: device list parsing used to register tags with a gateway
//!
//! # Example
//!
//! ```
//! use grid_model::{Phase, Tag, TopologyClassifier, TopologyDescriptor, ValueType};
//!
//! let descriptor = TopologyDescriptor::from_json_str(
//!     r#"{"Grid-ID": "G1", "POCs": [{"A_I_PH1_RES": "slack"}, {"B_I_PH1_RES": "feeder"}]}"#,
//!     "inline",
//! )
//! .unwrap();
//! let known = vec![
//!     Tag::new("A_I_PH1_RES", ValueType::Float),
//!     Tag::new("B_I_PH1_RES", ValueType::Float),
//! ];
//! let topology = TopologyClassifier::classify(&descriptor, &known);
//! assert_eq!(topology.phase_tags(Phase::L1).len(), 2);
//! assert_eq!(topology.slack(Phase::L1).map(|t| t.name.as_str()), Some("A_I_PH1_RES"));
//! ```

pub mod device;
pub mod topology;
pub mod types;

pub use device::{load_device_file, parse_device_list, DeviceSpec};
pub use topology::{PocEntry, Topology, TopologyClassifier, TopologyDescriptor};
pub use types::{Phase, Tag, TagRef, TagRole, Value, ValueType};
