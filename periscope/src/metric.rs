//! Metric definitions and the per-cycle batch they are recorded into
//!
//! Every data point periscope emits belongs to one [`Metric`]. The set is
//! closed: each variant carries a stable dotted name and the label keys its
//! data points are dimensioned by. A [`Recorder`] collects data points for a
//! single scrape cycle, dropping any whose metric has been disabled, and turns
//! into a [`Batch`] once the cycle ends.

use std::{fmt, str::FromStr, time::SystemTime};

use metrics::gauge;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

const HOST: &str = "splunk.host";
const INDEX_NAME: &str = "splunk.index.name";
const BUCKET_DIR: &str = "splunk.bucket.dir";
const QUEUE_NAME: &str = "splunk.queue.name";

/// Errors produced when naming a [`Metric`]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No metric goes by this name
    #[error("Unknown metric: {0}")]
    Unknown(String),
}

/// Every metric periscope knows how to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
#[allow(missing_docs)]
pub enum Metric {
    LicenseIndexUsage,
    SchedulerAvgExecutionLatency,
    SchedulerCompletionRatio,
    SchedulerAvgRunTime,
    IndexerAvgRate,
    IndexerRawWriteTime,
    IndexerCpuTime,
    IoAvgIops,
    AggregationQueueRatio,
    IndexerQueueRatio,
    ParseQueueRatio,
    TypingQueueRatio,
    PipelineSetCount,
    BucketsSearchableStatus,
    IndexesSize,
    IndexesAvgSize,
    IndexesAvgUsage,
    IndexesMedianDataAge,
    IndexesBucketCount,
    IndexerThroughput,
    DataIndexesExtendedTotalSize,
    DataIndexesExtendedEventCount,
    DataIndexesExtendedBucketCount,
    DataIndexesExtendedRawSize,
    DataIndexesExtendedBucketEventCount,
    DataIndexesExtendedBucketHotCount,
    DataIndexesExtendedBucketWarmCount,
    ServerIntrospectionQueuesCurrent,
    ServerIntrospectionQueuesCurrentBytes,
}

impl Metric {
    /// All metrics, in emission order.
    pub const ALL: [Metric; 29] = [
        Metric::LicenseIndexUsage,
        Metric::SchedulerAvgExecutionLatency,
        Metric::SchedulerCompletionRatio,
        Metric::SchedulerAvgRunTime,
        Metric::IndexerAvgRate,
        Metric::IndexerRawWriteTime,
        Metric::IndexerCpuTime,
        Metric::IoAvgIops,
        Metric::AggregationQueueRatio,
        Metric::IndexerQueueRatio,
        Metric::ParseQueueRatio,
        Metric::TypingQueueRatio,
        Metric::PipelineSetCount,
        Metric::BucketsSearchableStatus,
        Metric::IndexesSize,
        Metric::IndexesAvgSize,
        Metric::IndexesAvgUsage,
        Metric::IndexesMedianDataAge,
        Metric::IndexesBucketCount,
        Metric::IndexerThroughput,
        Metric::DataIndexesExtendedTotalSize,
        Metric::DataIndexesExtendedEventCount,
        Metric::DataIndexesExtendedBucketCount,
        Metric::DataIndexesExtendedRawSize,
        Metric::DataIndexesExtendedBucketEventCount,
        Metric::DataIndexesExtendedBucketHotCount,
        Metric::DataIndexesExtendedBucketWarmCount,
        Metric::ServerIntrospectionQueuesCurrent,
        Metric::ServerIntrospectionQueuesCurrentBytes,
    ];

    /// The dotted name this metric is emitted under.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Metric::LicenseIndexUsage => "splunk.license.index.usage",
            Metric::SchedulerAvgExecutionLatency => "splunk.scheduler.avg.execution.latency",
            Metric::SchedulerCompletionRatio => "splunk.scheduler.completion.ratio",
            Metric::SchedulerAvgRunTime => "splunk.scheduler.avg.run.time",
            Metric::IndexerAvgRate => "splunk.indexer.avg.rate",
            Metric::IndexerRawWriteTime => "splunk.indexer.raw.write.time",
            Metric::IndexerCpuTime => "splunk.indexer.cpu.time",
            Metric::IoAvgIops => "splunk.io.avg.iops",
            Metric::AggregationQueueRatio => "splunk.aggregation.queue.ratio",
            Metric::IndexerQueueRatio => "splunk.indexer.queue.ratio",
            Metric::ParseQueueRatio => "splunk.parse.queue.ratio",
            Metric::TypingQueueRatio => "splunk.typing.queue.ratio",
            Metric::PipelineSetCount => "splunk.pipeline.set.count",
            Metric::BucketsSearchableStatus => "splunk.buckets.searchable.status",
            Metric::IndexesSize => "splunk.indexes.size",
            Metric::IndexesAvgSize => "splunk.indexes.avg.size",
            Metric::IndexesAvgUsage => "splunk.indexes.avg.usage",
            Metric::IndexesMedianDataAge => "splunk.indexes.median.data.age",
            Metric::IndexesBucketCount => "splunk.indexes.bucket.count",
            Metric::IndexerThroughput => "splunk.indexer.throughput",
            Metric::DataIndexesExtendedTotalSize => "splunk.data.indexes.extended.total.size",
            Metric::DataIndexesExtendedEventCount => "splunk.data.indexes.extended.event.count",
            Metric::DataIndexesExtendedBucketCount => "splunk.data.indexes.extended.bucket.count",
            Metric::DataIndexesExtendedRawSize => "splunk.data.indexes.extended.raw.size",
            Metric::DataIndexesExtendedBucketEventCount => {
                "splunk.data.indexes.extended.bucket.event.count"
            }
            Metric::DataIndexesExtendedBucketHotCount => {
                "splunk.data.indexes.extended.bucket.hot.count"
            }
            Metric::DataIndexesExtendedBucketWarmCount => {
                "splunk.data.indexes.extended.bucket.warm.count"
            }
            Metric::ServerIntrospectionQueuesCurrent => {
                "splunk.server.introspection.queues.current"
            }
            Metric::ServerIntrospectionQueuesCurrentBytes => {
                "splunk.server.introspection.queues.current.bytes"
            }
        }
    }

    /// The label keys, in order, that data points of this metric carry.
    #[must_use]
    pub fn label_keys(self) -> &'static [&'static str] {
        match self {
            Metric::LicenseIndexUsage
            | Metric::IndexesSize
            | Metric::IndexesAvgSize
            | Metric::IndexesAvgUsage
            | Metric::IndexesMedianDataAge
            | Metric::IndexesBucketCount
            | Metric::DataIndexesExtendedTotalSize
            | Metric::DataIndexesExtendedEventCount
            | Metric::DataIndexesExtendedBucketCount
            | Metric::DataIndexesExtendedRawSize => &[INDEX_NAME],
            Metric::SchedulerAvgExecutionLatency
            | Metric::SchedulerCompletionRatio
            | Metric::SchedulerAvgRunTime
            | Metric::IndexerAvgRate
            | Metric::IndexerRawWriteTime
            | Metric::IndexerCpuTime
            | Metric::IoAvgIops
            | Metric::AggregationQueueRatio
            | Metric::IndexerQueueRatio
            | Metric::ParseQueueRatio
            | Metric::TypingQueueRatio
            | Metric::PipelineSetCount => &[HOST],
            Metric::BucketsSearchableStatus => &[HOST, "splunk.indexer.searchable"],
            Metric::IndexerThroughput => &["splunk.indexer.status"],
            Metric::DataIndexesExtendedBucketEventCount
            | Metric::DataIndexesExtendedBucketHotCount
            | Metric::DataIndexesExtendedBucketWarmCount => &[INDEX_NAME, BUCKET_DIR],
            Metric::ServerIntrospectionQueuesCurrent
            | Metric::ServerIntrospectionQueuesCurrentBytes => &[QUEUE_NAME],
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| Error::Unknown(s.to_string()))
    }
}

impl TryFrom<String> for Metric {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
/// The value of a [`DataPoint`].
#[serde(untagged)]
pub enum Value {
    /// A signed integer, 64 bits wide
    Int(i64),
    /// A floating point, 64 bits wide
    Double(f64),
}

impl Value {
    /// The value widened to a float, for sinks that only speak gauges.
    #[must_use]
    pub fn as_f64(self) -> f64 {
        match self {
            Value::Int(v) => v as f64,
            Value::Double(v) => v,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

/// One recorded observation.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    /// The metric this observation belongs to
    pub metric: Metric,
    /// When the cycle that produced this observation started
    pub timestamp: SystemTime,
    /// The observed value
    pub value: Value,
    /// Label values, paired with [`Metric::label_keys`]
    pub labels: Vec<(&'static str, String)>,
}

impl DataPoint {
    /// Look up a label value by key.
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
/// Per-metric settings
pub struct MetricSettings {
    /// Whether data points for this metric are collected
    pub enabled: bool,
}

/// Enablement flags for every [`Metric`].
///
/// Metrics absent from the user configuration are enabled.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct MetricFlags {
    overrides: FxHashMap<Metric, MetricSettings>,
}

impl MetricFlags {
    /// Whether `metric` should be collected.
    #[must_use]
    pub fn is_enabled(&self, metric: Metric) -> bool {
        self.overrides.get(&metric).is_none_or(|s| s.enabled)
    }

    /// Override the enablement of `metric`.
    pub fn set(&mut self, metric: Metric, enabled: bool) {
        self.overrides.insert(metric, MetricSettings { enabled });
    }
}

/// The data points produced by one scrape cycle.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Batch {
    points: Vec<DataPoint>,
}

impl Batch {
    /// The recorded data points in recording order.
    #[must_use]
    pub fn points(&self) -> &[DataPoint] {
        &self.points
    }

    /// Number of data points in this batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether this batch holds no data points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Data points belonging to `metric`.
    pub fn of(&self, metric: Metric) -> impl Iterator<Item = &DataPoint> {
        self.points.iter().filter(move |p| p.metric == metric)
    }

    /// Mirror every data point into a [`metrics`] gauge of the same name and
    /// labels.
    pub fn publish(&self) {
        for point in &self.points {
            gauge!(point.metric.name(), &point.labels).set(point.value.as_f64());
        }
    }
}

impl IntoIterator for Batch {
    type Item = DataPoint;
    type IntoIter = std::vec::IntoIter<DataPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.into_iter()
    }
}

/// Sink for the data points of a single scrape cycle.
#[derive(Debug)]
pub struct Recorder<'a> {
    flags: &'a MetricFlags,
    timestamp: SystemTime,
    points: Vec<DataPoint>,
}

impl<'a> Recorder<'a> {
    /// Create a new [`Recorder`] stamping every point with `timestamp`.
    #[must_use]
    pub fn new(flags: &'a MetricFlags, timestamp: SystemTime) -> Self {
        Self {
            flags,
            timestamp,
            points: Vec::new(),
        }
    }

    /// Record one data point. `labels` pair positionally with
    /// [`Metric::label_keys`]; points for disabled metrics are dropped.
    pub fn record<V>(&mut self, metric: Metric, value: V, labels: &[&str])
    where
        V: Into<Value>,
    {
        if !self.flags.is_enabled(metric) {
            return;
        }
        debug_assert_eq!(labels.len(), metric.label_keys().len());
        let labels = metric
            .label_keys()
            .iter()
            .zip(labels)
            .map(|(k, v)| (*k, (*v).to_string()))
            .collect();
        self.points.push(DataPoint {
            metric,
            timestamp: self.timestamp,
            value: value.into(),
            labels,
        });
    }

    /// Close the cycle, yielding its [`Batch`].
    #[must_use]
    pub fn finish(self) -> Batch {
        Batch {
            points: self.points,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use metrics::{Key, Label};
    use metrics_util::{
        CompositeKey, MetricKind,
        debugging::{DebugValue, DebuggingRecorder},
    };

    use super::*;

    #[test]
    fn names_round_trip() {
        for metric in Metric::ALL {
            assert_eq!(metric.name().parse::<Metric>(), Ok(metric));
        }
    }

    #[test]
    fn unknown_name_rejected() {
        assert_eq!(
            "splunk.nope".parse::<Metric>(),
            Err(Error::Unknown("splunk.nope".to_string()))
        );
    }

    #[test]
    fn disabled_metric_is_dropped() {
        let mut flags = MetricFlags::default();
        flags.set(Metric::IoAvgIops, false);

        let mut recorder = Recorder::new(&flags, UNIX_EPOCH);
        recorder.record(Metric::IoAvgIops, 12_i64, &["idx-1"]);
        recorder.record(Metric::IndexerCpuTime, 0.5, &["idx-1"]);

        let batch = recorder.finish();
        assert_eq!(batch.len(), 1);
        let point = &batch.points()[0];
        assert_eq!(point.metric, Metric::IndexerCpuTime);
        assert_eq!(point.label("splunk.host"), Some("idx-1"));
        assert_eq!(point.value, Value::Double(0.5));
    }

    #[test]
    fn flags_deserialize_from_names() {
        let flags: MetricFlags = serde_yaml::from_str(
            r"
splunk.io.avg.iops:
  enabled: false
",
        )
        .expect("flags did not parse");
        assert!(!flags.is_enabled(Metric::IoAvgIops));
        assert!(flags.is_enabled(Metric::IndexesSize));

        let err = serde_yaml::from_str::<MetricFlags>("splunk.bogus: { enabled: true }");
        assert!(err.is_err());
    }

    #[test]
    fn publish_mirrors_points_as_gauges() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        let flags = MetricFlags::default();
        let mut points = Recorder::new(&flags, UNIX_EPOCH);
        points.record(Metric::ServerIntrospectionQueuesCurrent, 7_i64, &["parsingqueue"]);
        let batch = points.finish();

        metrics::with_local_recorder(&recorder, || batch.publish());

        let snapshot = snapshotter.snapshot().into_hashmap();
        let key = CompositeKey::new(
            MetricKind::Gauge,
            Key::from_parts(
                "splunk.server.introspection.queues.current",
                vec![Label::new("splunk.queue.name", "parsingqueue")],
            ),
        );
        match snapshot.get(&key).map(|v| &v.2) {
            Some(DebugValue::Gauge(v)) => assert!((v.into_inner() - 7.0).abs() < f64::EPSILON),
            other => panic!("unexpected gauge {other:?}"),
        }
    }
}
