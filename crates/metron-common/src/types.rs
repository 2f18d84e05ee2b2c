use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metric type: a gauge keeps its latest value, a counter accumulates deltas.
///
/// # Examples
///
/// ```
/// use metron_common::types::MetricKind;
///
/// let kind: MetricKind = "counter".parse().unwrap();
/// assert_eq!(kind, MetricKind::Counter);
/// assert_eq!(MetricKind::Gauge.to_string(), "gauge");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Gauge => write!(f, "gauge"),
            MetricKind::Counter => write!(f, "counter"),
        }
    }
}

impl std::str::FromStr for MetricKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            _ => Err(ValidationError::UnknownKind(s.to_string())),
        }
    }
}

/// Rejection reasons for incoming samples and batches.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("metric name is empty")]
    MissingName,

    #[error("unknown metric type '{0}'")]
    UnknownKind(String),

    /// The populated value field does not match the metric type, or a gauge
    /// value is not finite.
    #[error("wrong value for {kind} '{id}'")]
    WrongValue { id: String, kind: MetricKind },

    #[error("no metrics found")]
    EmptyBatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricName {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
}

impl MetricName {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::MissingName);
        }
        Ok(())
    }
}

/// A validated sample value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

/// One sample as it travels between agent and collector.
///
/// Exactly one of `delta` (counters) or `value` (gauges) is populated; anything
/// else is rejected by [`MetricSample::validate`] rather than coerced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    #[serde(flatten)]
    pub name: MetricName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl MetricSample {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            name: MetricName {
                id: id.into(),
                kind: MetricKind::Gauge,
            },
            delta: None,
            value: Some(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            name: MetricName {
                id: id.into(),
                kind: MetricKind::Counter,
            },
            delta: Some(delta),
            value: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.name.id
    }

    pub fn kind(&self) -> MetricKind {
        self.name.kind
    }

    pub fn validate(&self) -> Result<MetricValue, ValidationError> {
        self.name.validate()?;
        match (self.name.kind, self.delta, self.value) {
            (MetricKind::Gauge, None, Some(v)) if v.is_finite() => Ok(MetricValue::Gauge(v)),
            (MetricKind::Counter, Some(d), None) => Ok(MetricValue::Counter(d)),
            (kind, _, _) => Err(ValidationError::WrongValue {
                id: self.name.id.clone(),
                kind,
            }),
        }
    }
}

/// Gauges and counters keyed by metric id.
///
/// Used both as the contents of a [`crate::snapshot::Snapshot`] and as a
/// batch applied to a store in one call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    #[serde(default)]
    pub gauges: HashMap<String, f64>,
    #[serde(default)]
    pub counters: HashMap<String, i64>,
}

impl MetricSet {
    /// Validates every sample, then folds them into one set: repeated gauge
    /// ids keep the last value, repeated counter ids are summed.
    ///
    /// Nothing is folded unless all samples are valid.
    pub fn from_samples(samples: &[MetricSample]) -> Result<Self, ValidationError> {
        if samples.is_empty() {
            return Err(ValidationError::EmptyBatch);
        }
        let values = samples
            .iter()
            .map(MetricSample::validate)
            .collect::<Result<Vec<_>, _>>()?;

        let mut set = Self::default();
        for (sample, value) in samples.iter().zip(values) {
            match value {
                MetricValue::Gauge(v) => {
                    set.gauges.insert(sample.name.id.clone(), v);
                }
                MetricValue::Counter(d) => {
                    let slot = set.counters.entry(sample.name.id.clone()).or_insert(0);
                    *slot = slot.saturating_add(d);
                }
            }
        }
        Ok(set)
    }

    /// Expands the set into wire samples, sorted by id (gauges first).
    pub fn to_samples(&self) -> Vec<MetricSample> {
        let mut gauges: Vec<_> = self.gauges.iter().collect();
        gauges.sort_by(|a, b| a.0.cmp(b.0));
        let mut counters: Vec<_> = self.counters.iter().collect();
        counters.sort_by(|a, b| a.0.cmp(b.0));

        gauges
            .into_iter()
            .map(|(id, v)| MetricSample::gauge(id.clone(), *v))
            .chain(
                counters
                    .into_iter()
                    .map(|(id, d)| MetricSample::counter(id.clone(), *d)),
            )
            .collect()
    }

    pub fn len(&self) -> usize {
        self.gauges.len() + self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty() && self.counters.is_empty()
    }
}
