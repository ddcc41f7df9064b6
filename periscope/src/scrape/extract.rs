//! Field extraction
//!
//! Turns decoded payloads into data points. Tabular search results are driven
//! by a static [`Table`]: dimension fields are held until overwritten and every
//! measurement field is parsed and emitted with the dimensions current at that
//! point. Entry lists are walked by per-endpoint functions reading typed views
//! of each entry's content.
//!
//! Unit normalization happens here. Sizes reported in megabytes are emitted in
//! bytes and throughput reported in kilobytes is scaled by 1000.

use serde::{
    Deserialize,
    de::{self, DeserializeOwned, Unexpected},
};
use tracing::trace;

use super::{
    errors::{Error, ScrapeErrors},
    normalize::{Entry, FieldRecord},
};
use crate::metric::{Metric, Recorder, Value};

const BYTES_PER_MEGABYTE: f64 = 1024.0 * 1024.0;
const KILO: f64 = 1000.0;

/// How a measurement field's text is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Parsed and emitted as a double
    Float,
    /// Parsed and emitted as an integer
    Int,
    /// Parsed as a double, emitted truncated to an integer
    FloatAsInt,
}

/// A measurement field of a search result row.
#[derive(Debug, Clone, Copy)]
pub struct Measurement {
    /// The field name
    pub field: &'static str,
    /// The metric the parsed value is recorded under
    pub metric: Metric,
    /// How the value is parsed
    pub kind: Kind,
}

/// How a search job's result rows map to data points.
#[derive(Debug)]
pub struct Table {
    /// Fields held as label values, in the metric's label order
    pub dimensions: &'static [&'static str],
    /// Fields emitted as data points
    pub measurements: &'static [Measurement],
}

/// Where extraction results go.
#[derive(Debug)]
pub struct Output<'o, 'r> {
    job: &'static str,
    recorder: &'o mut Recorder<'r>,
    errors: &'o mut ScrapeErrors,
}

impl<'o, 'r> Output<'o, 'r> {
    /// Create a new [`Output`] attributing failures to `job`.
    pub fn new(
        job: &'static str,
        recorder: &'o mut Recorder<'r>,
        errors: &'o mut ScrapeErrors,
    ) -> Self {
        Self {
            job,
            recorder,
            errors,
        }
    }

    fn record<V: Into<Value>>(&mut self, metric: Metric, value: V, labels: &[&str]) {
        self.recorder.record(metric, value, labels);
    }

    fn fail(&mut self, error: Error) {
        trace!(job = self.job, %error, "field extraction failed");
        self.errors.add(self.job, error);
    }
}

fn parse_float(field: &str, text: &str) -> Result<f64, Error> {
    text.trim().parse().map_err(|source| Error::ParseFloat {
        field: field.to_string(),
        source,
    })
}

fn parse_int(field: &str, text: &str) -> Result<i64, Error> {
    text.trim().parse().map_err(|source| Error::ParseInt {
        field: field.to_string(),
        source,
    })
}

impl Kind {
    #[allow(clippy::cast_possible_truncation)]
    fn parse(self, field: &str, text: &str) -> Result<Value, Error> {
        match self {
            Kind::Float => parse_float(field, text).map(Value::Double),
            Kind::Int => parse_int(field, text).map(Value::Int),
            Kind::FloatAsInt => parse_float(field, text).map(|v| Value::Int(v as i64)),
        }
    }
}

/// Extract data points from search result `fields` according to `table`.
///
/// Dimension values persist across rows until overwritten. A measurement that
/// fails to parse is reported and skipped; extraction carries on.
pub fn table(table: &Table, fields: &[FieldRecord], out: &mut Output<'_, '_>) {
    let mut dimensions = vec![String::new(); table.dimensions.len()];

    for record in fields {
        if let Some(idx) = table.dimensions.iter().position(|d| *d == record.name) {
            dimensions[idx].clone_from(&record.value);
            continue;
        }
        let Some(m) = table.measurements.iter().find(|m| m.field == record.name) else {
            continue;
        };
        match m.kind.parse(m.field, &record.value) {
            Ok(value) => {
                let labels: Vec<&str> = dimensions.iter().map(String::as_str).collect();
                out.record(m.metric, value, &labels);
            }
            Err(e) => out.fail(e),
        }
    }
}

/// A numeric field that Splunk may render either as a JSON number or as a
/// string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum Numeric {
    Number(serde_json::Number),
    Text(String),
}

impl Numeric {
    fn as_float(&self, field: &str) -> Option<Result<f64, Error>> {
        match self {
            Numeric::Number(n) => n.as_f64().map(Ok),
            Numeric::Text(s) if s.trim().is_empty() => None,
            Numeric::Text(s) => Some(parse_float(field, s)),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn as_int(&self, field: &str) -> Option<Result<i64, Error>> {
        match self {
            // Numbers are cast, not parsed: `7.0` is a valid depth of 7.
            Numeric::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).map(Ok),
            Numeric::Text(s) if s.trim().is_empty() => None,
            Numeric::Text(s) => Some(parse_int(field, s)),
        }
    }
}

/// Parse a present, non-empty field as a double.
fn present_float(field: &str, raw: Option<&Numeric>) -> Option<Result<f64, Error>> {
    raw.and_then(|n| n.as_float(field))
}

/// Parse a present, non-empty field as an integer.
fn present_int(field: &str, raw: Option<&Numeric>) -> Option<Result<i64, Error>> {
    raw.and_then(|n| n.as_int(field))
}

#[allow(clippy::cast_possible_truncation)]
fn megabytes_to_bytes(mb: f64) -> i64 {
    (mb * BYTES_PER_MEGABYTE) as i64
}

fn not_an_object(content: &serde_json::Value) -> serde_json::Error {
    let unexpected = match content {
        serde_json::Value::Bool(b) => Unexpected::Bool(*b),
        serde_json::Value::Number(_) => Unexpected::Other("number"),
        serde_json::Value::String(s) => Unexpected::Str(s),
        serde_json::Value::Array(_) => Unexpected::Seq,
        serde_json::Value::Null | serde_json::Value::Object(_) => Unexpected::Other("content"),
    };
    de::Error::invalid_type(unexpected, &"an object")
}

/// Walk `entries`, handing each a typed view of its content and its name.
///
/// An entry with an empty name inherits the last non-empty name seen.
fn walk<T, F>(entries: &[Entry], out: &mut Output<'_, '_>, mut visit: F)
where
    T: DeserializeOwned + Default,
    F: FnMut(&str, &T, &mut Output<'_, '_>),
{
    let mut name = String::new();
    for entry in entries {
        if !entry.name.is_empty() {
            name.clone_from(&entry.name);
        }
        let content = match &entry.content {
            serde_json::Value::Null => T::default(),
            serde_json::Value::Object(_) => match T::deserialize(&entry.content) {
                Ok(c) => c,
                Err(e) => {
                    out.fail(Error::Json(e));
                    continue;
                }
            },
            // Struct deserialization would also accept an array, filling
            // fields by position.
            other => {
                out.fail(Error::Json(not_an_object(other)));
                continue;
            }
        };
        visit(&name, &content, out);
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ThroughputContent {
    status: String,
    #[serde(rename = "average_KBps")]
    average_kbps: f64,
}

/// `/services/server/introspection/indexer`: throughput by indexer status.
pub fn indexer_throughput(entries: &[Entry], out: &mut Output<'_, '_>) {
    walk(entries, out, |_, c: &ThroughputContent, out| {
        out.record(
            Metric::IndexerThroughput,
            KILO * c.average_kbps,
            &[c.status.as_str()],
        );
    });
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BucketDir {
    event_count: Option<Numeric>,
    hot_bucket_count: Option<Numeric>,
    warm_bucket_count: Option<Numeric>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BucketDirs {
    cold: BucketDir,
    home: BucketDir,
    thawed: BucketDir,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IndexContent {
    total_bucket_count: Option<Numeric>,
    #[serde(rename = "totalEventCount")]
    total_event_count: Option<Numeric>,
    total_size: Option<Numeric>,
    total_raw_size: Option<Numeric>,
    bucket_dirs: BucketDirs,
}

fn record_int(
    out: &mut Output<'_, '_>,
    metric: Metric,
    field: &str,
    raw: Option<&Numeric>,
    labels: &[&str],
) {
    match present_int(field, raw) {
        Some(Ok(v)) => out.record(metric, v, labels),
        Some(Err(e)) => out.fail(e),
        None => {}
    }
}

fn record_megabytes(
    out: &mut Output<'_, '_>,
    metric: Metric,
    field: &str,
    raw: Option<&Numeric>,
    labels: &[&str],
) {
    match present_float(field, raw) {
        Some(Ok(mb)) => out.record(metric, megabytes_to_bytes(mb), labels),
        Some(Err(e)) => out.fail(e),
        None => {}
    }
}

/// `/services/data/indexes-extended`: total size, in bytes.
pub fn indexes_total_size(entries: &[Entry], out: &mut Output<'_, '_>) {
    walk(entries, out, |name, c: &IndexContent, out| {
        record_megabytes(
            out,
            Metric::DataIndexesExtendedTotalSize,
            "total_size",
            c.total_size.as_ref(),
            &[name],
        );
    });
}

/// `/services/data/indexes-extended`: raw size, in bytes.
pub fn indexes_raw_size(entries: &[Entry], out: &mut Output<'_, '_>) {
    walk(entries, out, |name, c: &IndexContent, out| {
        record_megabytes(
            out,
            Metric::DataIndexesExtendedRawSize,
            "total_raw_size",
            c.total_raw_size.as_ref(),
            &[name],
        );
    });
}

/// `/services/data/indexes-extended`: total event count.
pub fn indexes_event_count(entries: &[Entry], out: &mut Output<'_, '_>) {
    walk(entries, out, |name, c: &IndexContent, out| {
        record_int(
            out,
            Metric::DataIndexesExtendedEventCount,
            "totalEventCount",
            c.total_event_count.as_ref(),
            &[name],
        );
    });
}

/// `/services/data/indexes-extended`: total bucket count.
pub fn indexes_bucket_count(entries: &[Entry], out: &mut Output<'_, '_>) {
    walk(entries, out, |name, c: &IndexContent, out| {
        record_int(
            out,
            Metric::DataIndexesExtendedBucketCount,
            "total_bucket_count",
            c.total_bucket_count.as_ref(),
            &[name],
        );
    });
}

/// `/services/data/indexes-extended`: event count per bucket directory.
pub fn indexes_bucket_event_count(entries: &[Entry], out: &mut Output<'_, '_>) {
    walk(entries, out, |name, c: &IndexContent, out| {
        let dirs = &c.bucket_dirs;
        for (dir, content) in [("cold", &dirs.cold), ("home", &dirs.home), ("thawed", &dirs.thawed)] {
            record_int(
                out,
                Metric::DataIndexesExtendedBucketEventCount,
                "event_count",
                content.event_count.as_ref(),
                &[name, dir],
            );
        }
    });
}

/// `/services/data/indexes-extended`: hot and warm bucket counts of the home
/// directory.
pub fn indexes_bucket_hot_warm_count(entries: &[Entry], out: &mut Output<'_, '_>) {
    walk(entries, out, |name, c: &IndexContent, out| {
        let home = &c.bucket_dirs.home;
        record_int(
            out,
            Metric::DataIndexesExtendedBucketHotCount,
            "hot_bucket_count",
            home.hot_bucket_count.as_ref(),
            &[name, "hot"],
        );
        record_int(
            out,
            Metric::DataIndexesExtendedBucketWarmCount,
            "warm_bucket_count",
            home.warm_bucket_count.as_ref(),
            &[name, "warm"],
        );
    });
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QueueContent {
    current_size: Option<Numeric>,
    current_size_bytes: Option<Numeric>,
}

/// `/services/server/introspection/queues`: current queue depth.
pub fn introspection_queues_current(entries: &[Entry], out: &mut Output<'_, '_>) {
    walk(entries, out, |name, c: &QueueContent, out| {
        record_int(
            out,
            Metric::ServerIntrospectionQueuesCurrent,
            "current_size",
            c.current_size.as_ref(),
            &[name],
        );
    });
}

/// `/services/server/introspection/queues`: current queue size in bytes.
pub fn introspection_queues_current_bytes(entries: &[Entry], out: &mut Output<'_, '_>) {
    walk(entries, out, |name, c: &QueueContent, out| {
        record_int(
            out,
            Metric::ServerIntrospectionQueuesCurrentBytes,
            "current_size_bytes",
            c.current_size_bytes.as_ref(),
            &[name],
        );
    });
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use proptest::prelude::*;

    use super::*;
    use crate::metric::{Batch, MetricFlags};
    use crate::scrape::normalize::decode_entries;

    static LATENCY: Table = Table {
        dimensions: &["host"],
        measurements: &[Measurement {
            field: "latency",
            metric: Metric::SchedulerAvgExecutionLatency,
            kind: Kind::Float,
        }],
    };

    fn run_table(table_: &Table, fields: &[FieldRecord]) -> (Batch, ScrapeErrors) {
        let flags = MetricFlags::default();
        let mut recorder = Recorder::new(&flags, UNIX_EPOCH);
        let mut errors = ScrapeErrors::default();
        table(table_, fields, &mut Output::new("test", &mut recorder, &mut errors));
        (recorder.finish(), errors)
    }

    fn run_entries(
        extract: fn(&[Entry], &mut Output<'_, '_>),
        body: &str,
    ) -> (Batch, ScrapeErrors) {
        let entries = decode_entries(body.as_bytes()).expect("fixture did not decode");
        let flags = MetricFlags::default();
        let mut recorder = Recorder::new(&flags, UNIX_EPOCH);
        let mut errors = ScrapeErrors::default();
        extract(&entries, &mut Output::new("test", &mut recorder, &mut errors));
        (recorder.finish(), errors)
    }

    fn observed(batch: &Batch) -> Vec<(String, Value)> {
        batch
            .points()
            .iter()
            .map(|p| (p.labels[0].1.clone(), p.value))
            .collect()
    }

    #[test]
    fn dimensions_persist_until_overwritten() {
        let fields = [
            FieldRecord::new("host", "A"),
            FieldRecord::new("latency", "1.5"),
            FieldRecord::new("host", "B"),
            FieldRecord::new("latency", "2.0"),
        ];
        let (batch, errors) = run_table(&LATENCY, &fields);
        assert!(errors.is_empty());
        assert_eq!(
            observed(&batch),
            vec![
                ("A".to_string(), Value::Double(1.5)),
                ("B".to_string(), Value::Double(2.0)),
            ]
        );
    }

    #[test]
    fn parse_failure_skips_only_that_field() {
        let fields = [
            FieldRecord::new("host", "A"),
            FieldRecord::new("latency", "fast"),
            FieldRecord::new("host", "B"),
            FieldRecord::new("latency", "2.0"),
        ];
        let (batch, errors) = run_table(&LATENCY, &fields);
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors.errors()[0].error,
            Error::ParseFloat { ref field, .. } if field == "latency"
        ));
        assert_eq!(observed(&batch), vec![("B".to_string(), Value::Double(2.0))]);
    }

    #[test]
    fn float_as_int_truncates() {
        static USAGE: Table = Table {
            dimensions: &["indexname"],
            measurements: &[Measurement {
                field: "By",
                metric: Metric::LicenseIndexUsage,
                kind: Kind::FloatAsInt,
            }],
        };
        let fields = [
            FieldRecord::new("indexname", "main"),
            FieldRecord::new("By", "1048576.75"),
        ];
        let (batch, _) = run_table(&USAGE, &fields);
        assert_eq!(observed(&batch), vec![("main".to_string(), Value::Int(1_048_576))]);
    }

    #[test]
    fn two_dimensions_label_together() {
        static SEARCHABLE: Table = Table {
            dimensions: &["host", "is_searchable"],
            measurements: &[Measurement {
                field: "bucket_count",
                metric: Metric::BucketsSearchableStatus,
                kind: Kind::Int,
            }],
        };
        let fields = [
            FieldRecord::new("host", "idx-1"),
            FieldRecord::new("is_searchable", "1"),
            FieldRecord::new("bucket_count", "42"),
        ];
        let (batch, _) = run_table(&SEARCHABLE, &fields);
        let point = &batch.points()[0];
        assert_eq!(point.label("splunk.host"), Some("idx-1"));
        assert_eq!(point.label("splunk.indexer.searchable"), Some("1"));
        assert_eq!(point.value, Value::Int(42));
    }

    #[test]
    fn total_size_converts_megabytes_to_bytes() {
        let body = r#"{"entry":[{"name":"main","content":{"total_size":"2.5"}}]}"#;
        let (batch, errors) = run_entries(indexes_total_size, body);
        assert!(errors.is_empty());
        assert_eq!(observed(&batch), vec![("main".to_string(), Value::Int(2_621_440))]);
    }

    #[test]
    fn throughput_scales_kilobytes() {
        let body = r#"{"entry":[{"name":"indexer","content":{"status":"normal","average_KBps":1.25}}]}"#;
        let (batch, _) = run_entries(indexer_throughput, body);
        assert_eq!(
            observed(&batch),
            vec![("normal".to_string(), Value::Double(1250.0))]
        );
    }

    #[test]
    fn empty_names_inherit_previous_name() {
        let body = r#"{"entry":[
            {"name":"main","content":{"totalEventCount":10}},
            {"name":"","content":{"totalEventCount":"11"}},
            {"name":"_internal","content":{"totalEventCount":12}}
        ]}"#;
        let (batch, _) = run_entries(indexes_event_count, body);
        assert_eq!(
            observed(&batch),
            vec![
                ("main".to_string(), Value::Int(10)),
                ("main".to_string(), Value::Int(11)),
                ("_internal".to_string(), Value::Int(12)),
            ]
        );
    }

    #[test]
    fn absent_or_empty_fields_are_skipped() {
        let body = r#"{"entry":[
            {"name":"main","content":{"total_bucket_count":""}},
            {"name":"other","content":{}},
            {"name":"third","content":{"total_bucket_count":"bogus"}}
        ]}"#;
        let (batch, errors) = run_entries(indexes_bucket_count, body);
        assert!(batch.is_empty());
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn bucket_dirs_emit_per_directory() {
        let body = r#"{"entry":[{"name":"main","content":{"bucket_dirs":{
            "cold":{"event_count":"1"},
            "home":{"event_count":"2","hot_bucket_count":"3","warm_bucket_count":"4"},
            "thawed":{"event_count":""}
        }}}]}"#;
        let (batch, _) = run_entries(indexes_bucket_event_count, body);
        let dirs: Vec<_> = batch
            .points()
            .iter()
            .map(|p| (p.label("splunk.bucket.dir").map(str::to_string), p.value))
            .collect();
        assert_eq!(
            dirs,
            vec![
                (Some("cold".to_string()), Value::Int(1)),
                (Some("home".to_string()), Value::Int(2)),
            ]
        );

        let (batch, _) = run_entries(indexes_bucket_hot_warm_count, body);
        assert_eq!(batch.of(Metric::DataIndexesExtendedBucketHotCount).count(), 1);
        assert_eq!(batch.of(Metric::DataIndexesExtendedBucketWarmCount).count(), 1);
    }

    #[test]
    fn queues_read_current_size() {
        let body = r#"{"entry":[{"name":"parsingqueue","content":{"current_size":7,"current_size_bytes":2048}}]}"#;
        let (batch, _) = run_entries(introspection_queues_current, body);
        assert_eq!(observed(&batch), vec![("parsingqueue".to_string(), Value::Int(7))]);
        let (batch, _) = run_entries(introspection_queues_current_bytes, body);
        assert_eq!(observed(&batch), vec![("parsingqueue".to_string(), Value::Int(2048))]);
    }

    #[test]
    fn malformed_content_skips_entry() {
        let body = r#"{"entry":[{"name":"a","content":[1,2]},{"name":"b","content":{"current_size":1}}]}"#;
        let (batch, errors) = run_entries(introspection_queues_current, body);
        assert_eq!(errors.len(), 1);
        assert_eq!(observed(&batch), vec![("b".to_string(), Value::Int(1))]);
        assert!(matches!(errors.errors()[0].error, Error::Json(_)));
    }

    #[test]
    fn scalar_content_is_rejected() {
        let body = r#"{"entry":[{"name":"a","content":"7"},{"name":"b","content":7}]}"#;
        let (batch, errors) = run_entries(introspection_queues_current, body);
        assert!(batch.is_empty());
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn float_rendered_counts_are_cast() {
        let body = r#"{"entry":[
            {"name":"parsingqueue","content":{"current_size":7.0,"current_size_bytes":2048.9}},
            {"name":"indexqueue","content":{"current_size":"12"}}
        ]}"#;
        let (batch, errors) = run_entries(introspection_queues_current, body);
        assert!(errors.is_empty());
        assert_eq!(
            observed(&batch),
            vec![
                ("parsingqueue".to_string(), Value::Int(7)),
                ("indexqueue".to_string(), Value::Int(12)),
            ]
        );
        let (batch, errors) = run_entries(introspection_queues_current_bytes, body);
        assert!(errors.is_empty());
        assert_eq!(observed(&batch), vec![("parsingqueue".to_string(), Value::Int(2048))]);
    }

    proptest! {
        #[test]
        fn dimension_pairs_never_cross(rows in prop::collection::vec(("[a-z]{1,8}", 0.0f64..1e6), 0..32)) {
            let mut fields = Vec::new();
            for (host, latency) in &rows {
                fields.push(FieldRecord::new("host", host.clone()));
                fields.push(FieldRecord::new("latency", latency.to_string()));
            }
            let (batch, errors) = run_table(&LATENCY, &fields);
            prop_assert!(errors.is_empty());
            let expected: Vec<_> = rows.iter().map(|(h, l)| (h.clone(), Value::Double(*l))).collect();
            prop_assert_eq!(observed(&batch), expected);
        }

        #[test]
        fn extraction_is_idempotent(rows in prop::collection::vec(("[a-z]{1,8}", "[0-9.x]{1,6}"), 0..32)) {
            let mut fields = Vec::new();
            for (host, latency) in &rows {
                fields.push(FieldRecord::new("host", host.clone()));
                fields.push(FieldRecord::new("latency", latency.clone()));
            }
            let (first, first_errors) = run_table(&LATENCY, &fields);
            let (second, second_errors) = run_table(&LATENCY, &fields);
            prop_assert_eq!(first, second);
            prop_assert_eq!(first_errors.len(), second_errors.len());
        }
    }
}
