//! Differential current protection service
//!
//! Classifies the tags of a grid section into per-phase current POCs,
//! aggregates their readings into time-aligned rows and checks that each
//! phase's currents sum to zero. A persistent imbalance sets the infeed
//! limit of every controllable generator to the trip value.
//!
//! - [`config`]: layered service configuration
//! - [`gateway`]: control gateway contract and the in-process gateway
//! - [`counters`]: per-phase fault counters
//! - [`evaluator`]: evaluation loop and protective action
//! - [`manager`]: session lifecycle, reconnects and command flags
//! - [`bootstrap`]: command line, logging and dry-run validation

pub mod bootstrap;
pub mod config;
pub mod counters;
pub mod evaluator;
pub mod gateway;
pub mod manager;

pub use config::ProtsrvConfig;
pub use counters::FaultCounters;
pub use evaluator::{CycleReport, EvaluatorSettings, EvaluatorState, FaultEvaluator};
pub use gateway::{ControlGateway, MemoryGateway};
pub use manager::{ManagerCommand, ProtectionManager};
