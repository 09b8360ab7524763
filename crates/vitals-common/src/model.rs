//! Metric model shared by the agent and the server.
//!
//! A metric is a tagged sum of two variants: a [`Metric::Counter`] carries an
//! exact `i64` and merges additively, a [`Metric::Gauge`] carries an `f64` and
//! merges by replacement. The flat wire shape ([`MetricPayload`]) keeps the
//! numeric fields optional so that "unset" is distinguishable from zero.

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown metric type: {0}")]
    InvalidKind(String),

    #[error("invalid {kind} value: {value}")]
    InvalidValue { kind: MetricKind, value: String },

    #[error("metric id is empty")]
    EmptyId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Counter => write!(f, "counter"),
            MetricKind::Gauge => write!(f, "gauge"),
        }
    }
}

impl std::str::FromStr for MetricKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(MetricKind::Counter),
            "gauge" => Ok(MetricKind::Gauge),
            _ => Err(ModelError::InvalidKind(s.to_string())),
        }
    }
}

/// A single metric entry with its merge identity.
#[derive(Debug, Clone, PartialEq)]
pub enum Metric {
    Counter { id: String, value: i64 },
    Gauge { id: String, value: f64 },
}

impl Metric {
    /// Builds a metric from path-form components, validating the value string
    /// against the kind.
    pub fn from_parts(kind: MetricKind, id: &str, raw: &str) -> Result<Self, ModelError> {
        if id.is_empty() {
            return Err(ModelError::EmptyId);
        }

        match kind {
            MetricKind::Counter => {
                let value = raw.parse::<i64>().map_err(|_| ModelError::InvalidValue {
                    kind,
                    value: raw.to_string(),
                })?;
                Ok(Metric::Counter {
                    id: id.to_string(),
                    value,
                })
            }
            MetricKind::Gauge => {
                let value = raw.parse::<f64>().map_err(|_| ModelError::InvalidValue {
                    kind,
                    value: raw.to_string(),
                })?;
                Ok(Metric::Gauge {
                    id: id.to_string(),
                    value,
                })
            }
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Metric::Counter { id, .. } | Metric::Gauge { id, .. } => id,
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Metric::Counter { .. } => MetricKind::Counter,
            Metric::Gauge { .. } => MetricKind::Gauge,
        }
    }

    /// Plain-text rendering. Counters print exactly; gauges use the shortest
    /// representation that round-trips through `f64`.
    pub fn value_string(&self) -> String {
        match self {
            Metric::Counter { value, .. } => value.to_string(),
            Metric::Gauge { value, .. } => value.to_string(),
        }
    }
}

/// Flat JSON wire shape: `{id, type, delta?, value?}`.
///
/// Exactly one numeric field is serialized, matching `type`. On the read
/// side an absent field is taken as zero. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPayload {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl From<&Metric> for MetricPayload {
    fn from(metric: &Metric) -> Self {
        match metric {
            Metric::Counter { id, value } => MetricPayload {
                id: id.clone(),
                kind: MetricKind::Counter,
                delta: Some(*value),
                value: None,
            },
            Metric::Gauge { id, value } => MetricPayload {
                id: id.clone(),
                kind: MetricKind::Gauge,
                delta: None,
                value: Some(*value),
            },
        }
    }
}

impl TryFrom<MetricPayload> for Metric {
    type Error = ModelError;

    fn try_from(payload: MetricPayload) -> Result<Self, Self::Error> {
        if payload.id.is_empty() {
            return Err(ModelError::EmptyId);
        }

        match payload.kind {
            MetricKind::Counter => Ok(Metric::Counter {
                id: payload.id,
                value: payload.delta.unwrap_or(0),
            }),
            MetricKind::Gauge => Ok(Metric::Gauge {
                id: payload.id,
                value: payload.value.unwrap_or(0.0),
            }),
        }
    }
}
