use crate::error::InvalidMetric;
use crate::proto::{MetricBatchProto, MetricProto};
use serde::{Deserialize, Serialize};

/// Longest identifier accepted anywhere in the pipeline, in bytes.
pub const MAX_ID_LEN: usize = 128;

/// Absolute tolerance used when comparing gauge values.
pub const GAUGE_TOLERANCE: f64 = 1e-4;

/// Metric kind.
///
/// # Examples
///
/// ```
/// use pulsemon_common::types::MetricKind;
///
/// let kind: MetricKind = "counter".parse().unwrap();
/// assert_eq!(kind, MetricKind::Counter);
/// assert_eq!(kind.to_string(), "counter");
/// assert!("gauges".parse::<MetricKind>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricKind {
    type Err = InvalidMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            _ => Err(InvalidMetric::UnknownKind(s.to_string())),
        }
    }
}

/// A single metric as it travels on the wire and sits in the store.
///
/// Gauges carry `value`, counters carry `delta`; the other field stays
/// `None` and is omitted from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: String,
    pub mtype: MetricKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            mtype: MetricKind::Gauge,
            delta: None,
            value: Some(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            mtype: MetricKind::Counter,
            delta: Some(delta),
            value: None,
        }
    }

    /// Checks the encoding constraints of a metric before it is applied.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidMetric`] when the id is empty or too long, or when
    /// the value fields do not match the kind.
    pub fn validate(&self) -> Result<(), InvalidMetric> {
        if self.id.is_empty() {
            return Err(InvalidMetric::MissingId);
        }
        if self.id.len() > MAX_ID_LEN {
            return Err(InvalidMetric::IdTooLong(self.id.len()));
        }
        match (self.mtype, self.delta, self.value) {
            (MetricKind::Gauge, None, Some(v)) if v.is_finite() => Ok(()),
            (MetricKind::Gauge, None, Some(_)) => Err(InvalidMetric::NonFinite(self.id.clone())),
            (MetricKind::Counter, Some(_), None) => Ok(()),
            (kind, _, _) => Err(InvalidMetric::FieldMismatch {
                id: self.id.clone(),
                kind,
            }),
        }
    }

    /// Equality used by tests and round-trip checks: exact id, kind and
    /// delta, gauge values within [`GAUGE_TOLERANCE`].
    pub fn approx_eq(&self, other: &Metric) -> bool {
        if self.id != other.id || self.mtype != other.mtype || self.delta != other.delta {
            return false;
        }
        match (self.value, other.value) {
            (Some(a), Some(b)) => (a - b).abs() <= GAUGE_TOLERANCE,
            (None, None) => true,
            _ => false,
        }
    }

    /// Renders the stored value the way the legacy text endpoints expect.
    pub fn value_text(&self) -> String {
        match self.mtype {
            MetricKind::Gauge => self.value.unwrap_or_default().to_string(),
            MetricKind::Counter => self.delta.unwrap_or_default().to_string(),
        }
    }
}

/// Validates every metric of a batch, stopping at the first invalid one.
pub fn validate_batch(metrics: &[Metric]) -> Result<(), InvalidMetric> {
    metrics.iter().try_for_each(Metric::validate)
}

impl From<&Metric> for MetricProto {
    fn from(m: &Metric) -> Self {
        MetricProto {
            id: m.id.clone(),
            mtype: m.mtype.as_str().to_string(),
            delta: m.delta,
            value: m.value,
        }
    }
}

impl TryFrom<MetricProto> for Metric {
    type Error = InvalidMetric;

    fn try_from(p: MetricProto) -> Result<Self, Self::Error> {
        Ok(Metric {
            mtype: p.mtype.parse()?,
            id: p.id,
            delta: p.delta,
            value: p.value,
        })
    }
}

pub fn to_proto_batch(metrics: &[Metric]) -> MetricBatchProto {
    MetricBatchProto {
        metrics: metrics.iter().map(MetricProto::from).collect(),
    }
}

pub fn from_proto_metrics(protos: Vec<MetricProto>) -> Result<Vec<Metric>, InvalidMetric> {
    protos.into_iter().map(Metric::try_from).collect()
}
