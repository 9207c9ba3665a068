//! Topology descriptor and tag classification
//!
//! A topology descriptor lists the Points of Connection (POCs) of a subgrid:
//!
//! ```json
//! { "Grid-ID": "LVGrid-01", "POCs": [ { "MS1_I_PH1_RES": "Slack Transformer" } ] }
//! ```
//!
//! [`TopologyClassifier::classify`] matches the POC tags against the tags
//! known to the gateway and partitions them into phase groups, controls,
//! status flags and other measurements.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use errors::{GridError, GridResult};

use crate::types::{Phase, Tag, TagRole};

/// Marker of a current measurement
pub const CURRENT_MARKER: &str = "_I_";
/// Marker of a result (measured) value
pub const RESULT_MARKER: &str = "RES";
/// Marker of a controllable tag
pub const CONTROL_MARKER: &str = "CTRL";
/// Label fragment designating the slack POC of a phase
pub const SLACK_LABEL: &str = "slack";

// ============================================================================
// Descriptor
// ============================================================================

fn is_slack_label(label: &str) -> bool {
    label.to_lowercase().contains(SLACK_LABEL)
}

/// Point of Connection entry: `{ "<tag>": "<label>" }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PocEntry {
    pub tag: String,
    pub label: String,
}

impl PocEntry {
    pub fn new(tag: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            label: label.into(),
        }
    }

    /// Case-insensitive check for the slack label
    pub fn is_slack(&self) -> bool {
        is_slack_label(&self.label)
    }
}

/// Parsed topology descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyDescriptor {
    pub grid_id: String,
    pub pocs: Vec<PocEntry>,
}

impl TopologyDescriptor {
    /// Load a descriptor from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> GridResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(GridError::FileNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content, &path.display().to_string())
    }

    /// Parse a descriptor; `source` names the origin in error messages
    pub fn from_json_str(content: &str, source: &str) -> GridResult<Self> {
        let root: JsonValue = serde_json::from_str(content)
            .map_err(|e| GridError::parse(source, e.to_string()))?;

        let grid_id = match root.get("Grid-ID") {
            Some(JsonValue::String(id)) => id.clone(),
            Some(JsonValue::Number(n)) => n.to_string(),
            Some(_) => return Err(GridError::parse(source, "`Grid-ID` must be a string")),
            None => return Err(GridError::parse(source, "missing field `Grid-ID`")),
        };

        let entries = match root.get("POCs") {
            Some(JsonValue::Array(entries)) => entries,
            Some(_) => return Err(GridError::parse(source, "`POCs` must be an array")),
            None => return Err(GridError::parse(source, "missing field `POCs`")),
        };

        let mut pocs = Vec::with_capacity(entries.len());
        for (idx, entry) in entries.iter().enumerate() {
            let object = entry.as_object().ok_or_else(|| {
                GridError::parse(source, format!("POC #{} is not an object", idx))
            })?;
            if object.len() != 1 {
                return Err(GridError::parse(
                    source,
                    format!("POC #{} must contain exactly one tag", idx),
                ));
            }
            for (tag, label) in object {
                let label = label.as_str().ok_or_else(|| {
                    GridError::parse(source, format!("POC #{} label for {} is not a string", idx, tag))
                })?;
                pocs.push(PocEntry::new(tag.clone(), label));
            }
        }

        Ok(Self { grid_id, pocs })
    }
}

// ============================================================================
// Classified topology
// ============================================================================

/// Result of classifying a descriptor against the known tag set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Topology {
    pub grid_id: String,
    /// Phase-current tags per phase, in descriptor order
    pub phases: [Vec<Tag>; 3],
    /// Slack tag per phase
    pub slack: [Option<Tag>; 3],
    pub control: Vec<Tag>,
    pub other_measurement: Vec<Tag>,
    pub status: Vec<Tag>,
    roles: HashMap<String, TagRole>,
}

impl Topology {
    pub fn phase_tags(&self, phase: Phase) -> &[Tag] {
        &self.phases[phase.index()]
    }

    pub fn slack(&self, phase: Phase) -> Option<&Tag> {
        self.slack[phase.index()].as_ref()
    }

    pub fn role_of(&self, tag: &str) -> Option<TagRole> {
        self.roles.get(tag).copied()
    }

    /// Number of classified tags
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Tags subscribed at measurement rate: phase currents, other measurements, controls
    pub fn measurement_tags(&self) -> Vec<Tag> {
        self.phases
            .iter()
            .flatten()
            .chain(&self.other_measurement)
            .chain(&self.control)
            .cloned()
            .collect()
    }

    /// Controls whose name contains `marker`
    pub fn controls_with_marker(&self, marker: &str) -> Vec<Tag> {
        self.control
            .iter()
            .filter(|t| t.name.contains(marker))
            .cloned()
            .collect()
    }

    /// Status tags whose name contains `marker`
    pub fn status_with_marker(&self, marker: &str) -> Vec<Tag> {
        self.status
            .iter()
            .filter(|t| t.name.contains(marker))
            .cloned()
            .collect()
    }
}

/// Category assigned by marker priority, before slack handling
fn category_of(tag: &str) -> TagRole {
    let is_current = tag.contains(CURRENT_MARKER);
    let is_result = tag.contains(RESULT_MARKER);

    if is_current && is_result {
        match Phase::from_tag(tag) {
            Some(phase) => TagRole::PhaseCurrent {
                phase,
                is_slack: false,
            },
            None => TagRole::OtherMeasurement,
        }
    } else if is_result {
        TagRole::OtherMeasurement
    } else if tag.contains(CONTROL_MARKER) {
        TagRole::Control
    } else {
        TagRole::Status
    }
}

/// Partitions a topology descriptor into tag roles
pub struct TopologyClassifier;

impl TopologyClassifier {
    /// Classify the descriptor's POCs against the tags known to the gateway
    ///
    /// POC tags not present in `known_tags` are skipped. When a tag is listed
    /// twice, the later label applies and the tag keeps its first position.
    pub fn classify(descriptor: &TopologyDescriptor, known_tags: &[Tag]) -> Topology {
        // Resolve POCs to known tags, deduplicated in first-seen order
        let mut resolved: Vec<(&Tag, &str)> = Vec::with_capacity(descriptor.pocs.len());
        let mut position: HashMap<&str, usize> = HashMap::new();

        for poc in &descriptor.pocs {
            let Some(tag) = known_tags.iter().find(|t| t.name == poc.tag) else {
                debug!(tag = %poc.tag, "POC tag not registered at gateway, skipped");
                continue;
            };
            match position.get(tag.name.as_str()) {
                Some(&idx) => {
                    debug!(tag = %tag.name, label = %poc.label, "Duplicate POC, later label applies");
                    resolved[idx].1 = poc.label.as_str();
                },
                None => {
                    position.insert(tag.name.as_str(), resolved.len());
                    resolved.push((tag, poc.label.as_str()));
                },
            }
        }

        let mut topology = Topology {
            grid_id: descriptor.grid_id.clone(),
            ..Default::default()
        };

        for (tag, label) in resolved {
            let slack_label = is_slack_label(label);
            let mut role = category_of(&tag.name);

            match &mut role {
                TagRole::PhaseCurrent { phase, is_slack } => {
                    if slack_label {
                        let slot = &mut topology.slack[phase.index()];
                        if let Some(previous) = slot.as_ref() {
                            warn!(
                                phase = %phase,
                                previous = %previous.name,
                                tag = %tag.name,
                                "Multiple slack POCs for phase, last one wins"
                            );
                            topology
                                .roles
                                .insert(previous.name.clone(), TagRole::PhaseCurrent {
                                    phase: *phase,
                                    is_slack: false,
                                });
                        }
                        *slot = Some(tag.clone());
                        *is_slack = true;
                    }
                    topology.phases[phase.index()].push(tag.clone());
                },
                TagRole::OtherMeasurement => topology.other_measurement.push(tag.clone()),
                TagRole::Control => topology.control.push(tag.clone()),
                TagRole::Status => topology.status.push(tag.clone()),
            }

            if slack_label && !role.is_slack() {
                warn!(tag = %tag.name, "Slack label on a tag that is not a phase current, ignored");
            }
            topology.roles.insert(tag.name.clone(), role);
        }

        for phase in Phase::ALL {
            if !topology.phase_tags(phase).is_empty() && topology.slack(phase).is_none() {
                warn!(phase = %phase, "No slack POC for phase, values are summed without inversion");
            }
        }

        info!(
            grid_id = %topology.grid_id,
            ph1 = topology.phases[0].len(),
            ph2 = topology.phases[1].len(),
            ph3 = topology.phases[2].len(),
            control = topology.control.len(),
            status = topology.status.len(),
            other = topology.other_measurement.len(),
            "Topology classified"
        );

        topology
    }
}
