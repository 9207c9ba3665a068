//! Core domain types for grid protection
//!
//! Tags are classified exactly once, when a topology is applied. The
//! evaluation path only ever looks at the resolved [`TagRole`].

use serde::{Deserialize, Serialize};
use std::fmt;

use errors::{GridError, GridResult};

// ============================================================================
// Phase
// ============================================================================

/// Conductor phase of a three-phase low-voltage grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    #[serde(rename = "PH1", alias = "L1")]
    L1,
    #[serde(rename = "PH2", alias = "L2")]
    L2,
    #[serde(rename = "PH3", alias = "L3")]
    L3,
}

impl Phase {
    /// All phases in evaluation order
    pub const ALL: [Phase; 3] = [Phase::L1, Phase::L2, Phase::L3];

    /// Zero-based index, usable for `[T; 3]` per-phase storage
    pub fn index(self) -> usize {
        match self {
            Phase::L1 => 0,
            Phase::L2 => 1,
            Phase::L3 => 2,
        }
    }

    /// Tag marker for this phase (`PH1`, `PH2`, `PH3`)
    pub fn marker(self) -> &'static str {
        match self {
            Phase::L1 => "PH1",
            Phase::L2 => "PH2",
            Phase::L3 => "PH3",
        }
    }

    /// Find the phase marker inside a tag name
    ///
    /// Markers are checked in phase order; the first one present wins.
    ///
    /// # Examples
    /// ```
    /// # use grid_model::Phase;
    /// assert_eq!(Phase::from_tag("MS1_I_PH2_RES"), Some(Phase::L2));
    /// assert_eq!(Phase::from_tag("MS1_U_RES"), None);
    /// ```
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| tag.contains(p.marker()))
    }

    /// Phases evaluated for the given calculation mode
    pub fn active(three_phase: bool) -> &'static [Phase] {
        if three_phase {
            &Self::ALL
        } else {
            &Self::ALL[..1]
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

// ============================================================================
// Value types
// ============================================================================

/// Declared value type of a tag in the gateway address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ValueType {
    Int16,
    Float,
    #[default]
    Double,
    Boolean,
}

impl ValueType {
    /// Map a device list type code to a value type
    ///
    /// `2` is Int16, `4` is Float. Anything else falls back to Double.
    pub fn from_type_code(code: u8) -> Self {
        match code {
            2 => ValueType::Int16,
            4 => ValueType::Float,
            _ => ValueType::Double,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Int16 => "Int16",
            ValueType::Float => "Float",
            ValueType::Double => "Double",
            ValueType::Boolean => "Boolean",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed tag value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Boolean(bool),
    Int16(i16),
    Float(f32),
    Double(f64),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Int16(_) => ValueType::Int16,
            Value::Float(_) => ValueType::Float,
            Value::Double(_) => ValueType::Double,
            Value::Boolean(_) => ValueType::Boolean,
        }
    }

    /// Numeric view of the value (`true` is 1.0)
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Int16(v) => f64::from(v),
            Value::Float(v) => f64::from(v),
            Value::Double(v) => v,
            Value::Boolean(v) => {
                if v {
                    1.0
                } else {
                    0.0
                }
            },
        }
    }

    /// Build a value of the declared type from a numeric setpoint
    ///
    /// Integer targets reject non-finite input and values outside the i16 range.
    pub fn coerce(value_type: ValueType, raw: f64) -> GridResult<Self> {
        match value_type {
            ValueType::Double => Ok(Value::Double(raw)),
            ValueType::Float => Ok(Value::Float(raw as f32)),
            ValueType::Boolean => Ok(Value::Boolean(raw != 0.0)),
            ValueType::Int16 => {
                let rounded = raw.round();
                if !rounded.is_finite()
                    || rounded < f64::from(i16::MIN)
                    || rounded > f64::from(i16::MAX)
                {
                    return Err(GridError::TypeMismatch {
                        expected: ValueType::Int16.to_string(),
                        actual: format!("{}", raw),
                    });
                }
                Ok(Value::Int16(rounded as i16))
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int16(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Boolean(v) => write!(f, "{}", v),
        }
    }
}

// ============================================================================
// Tags
// ============================================================================

/// Opaque reference into the gateway address space
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagRef(pub String);

impl TagRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TagRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A tag known to the gateway
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// Tag identifier, e.g. `MS1_I_PH1_RES`
    pub name: String,
    /// Gateway reference used for reads, writes and subscriptions
    pub reference: TagRef,
    /// Declared value type
    pub value_type: ValueType,
}

impl Tag {
    /// Create a tag whose reference equals its name
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        let name = name.into();
        Self {
            reference: TagRef::new(name.clone()),
            name,
            value_type,
        }
    }

    pub fn with_reference(
        name: impl Into<String>,
        reference: TagRef,
        value_type: ValueType,
    ) -> Self {
        Self {
            name: name.into(),
            reference,
            value_type,
        }
    }
}

/// Role of a tag within the active topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum TagRole {
    /// Current measurement contributing to a phase balance
    PhaseCurrent { phase: Phase, is_slack: bool },
    /// Controllable actuator (e.g. infeed limit)
    Control,
    /// Status or command flag
    Status,
    /// Result measurement that does not take part in the balance
    OtherMeasurement,
}

impl TagRole {
    pub fn phase(&self) -> Option<Phase> {
        match self {
            TagRole::PhaseCurrent { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    pub fn is_slack(&self) -> bool {
        matches!(self, TagRole::PhaseCurrent { is_slack: true, .. })
    }
}
