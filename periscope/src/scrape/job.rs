//! Metric jobs and the catalog they draw queries and paths from
//!
//! A [`MetricJob`] is one independently scraped metric family: where its data
//! comes from, which backend answers, which metric gates it and how its
//! payload becomes data points. Jobs are built once from a [`Catalog`] and
//! reused every cycle.

use rustc_hash::FxHashMap;

use super::{
    extract::{self, Kind, Measurement, Output, Table},
    normalize::Entry,
};
use crate::{client::Role, metric::Metric};

/// Entry-list extraction routine for one REST endpoint.
pub type EntryExtractor = fn(&[Entry], &mut Output<'_, '_>);

/// Where a job's data comes from, and how it becomes data points.
#[derive(Debug, Clone)]
pub enum Source {
    /// An asynchronous search job yielding tabular results
    Search {
        /// The search query text
        query: String,
        /// Field to data point mapping
        table: &'static Table,
    },
    /// A REST endpoint answering synchronously with an entry list
    Endpoint {
        /// Path, with query string, relative to the role's base URL
        path: String,
        /// Entry to data point mapping
        extract: EntryExtractor,
    },
}

/// One configured metric family.
#[derive(Debug, Clone)]
pub struct MetricJob {
    /// Stable identifier, used to attribute errors
    pub id: &'static str,
    /// Where data comes from
    pub source: Source,
    /// The backend role that must be configured
    pub role: Role,
    /// The job runs only while this metric is enabled
    pub gate: Metric,
}

const SEARCHES: [(&str, &str); 11] = [
    (
        "license_index_usage",
        r#"search index=_internal source=*license_usage.log type="Usage" | fields idx, b | eval indexname = if(len(idx)=0 OR isnull(idx),"(UNKNOWN)",idx) | stats sum(b) as b by indexname | eval By=round(b, 9) | fields indexname, By"#,
    ),
    (
        "scheduler_avg_execution_latency",
        r#"search index=_internal host=* sourcetype=scheduler (status="completed" OR status="skipped" OR status="deferred" OR status="success") | eval window_time = if(isnotnull(window_time), window_time, 0) | eval execution_latency = max(0.00, dispatch_time - (scheduled_time + window_time)) | stats avg(execution_latency) as latency_avg_exec by host"#,
    ),
    (
        "scheduler_completion_ratio",
        r#"search index=_internal host=* sourcetype=scheduler (status="completed" OR status="skipped" OR status="deferred" OR status="success") | stats count(eval(status=="completed" OR status=="success")) as completed count(eval(status=="skipped")) as skipped by host | eval completion_ratio = round(completed/(completed+skipped)*100, 2) | fields host, completion_ratio"#,
    ),
    (
        "indexer_avg_rate",
        r#"search index=_internal group=per_index_thruput host=* | stats avg(kbps) as indexer_avg_kbps by host"#,
    ),
    (
        "scheduler_avg_run_time",
        r#"search index=_internal host=* sourcetype=scheduler (status="completed" OR status="skipped" OR status="deferred" OR status="success") | stats avg(run_time) as run_time_avg by host"#,
    ),
    (
        "indexer_raw_write_time",
        r#"search index=_introspection sourcetype=splunk_resource_usage component=PerProcess data.process_type=indexer | stats sum(data.write_seconds) as raw_data_write_seconds by host"#,
    ),
    (
        "indexer_cpu_time",
        r#"search index=_introspection sourcetype=splunk_resource_usage component=PerProcess data.process_type=indexer | stats sum(data.cpu_seconds) as service_cpu_seconds by host"#,
    ),
    (
        "io_avg_iops",
        r#"search index=_introspection sourcetype=splunk_resource_usage component=IOStats host=* | eval iops = round('data.reads_ps' + 'data.writes_ps') | stats avg(iops) as iops by host | eval iops = round(iops)"#,
    ),
    (
        "pipeline_queues",
        r#"search index=_telemetry | stats count(index) | appendcols [| rest splunk_server_group=dmc_group_indexer /services/server/introspection/queues | search title=parsingQueue* OR title=aggQueue* OR title=typingQueue* OR title=indexQueue* | eval fill_perc=round(current_size_bytes / max_size_bytes * 100,2) | fields splunk_server, title, fill_perc | rex field=title "(?<queue_name>^\w+)(?:\.(?<pipeline_number>\d+))?" | eval fill_perc = if(isnotnull(pipeline_number), "pset".pipeline_number.": ".fill_perc, fill_perc) | chart values(fill_perc) over splunk_server by queue_name | eval pset_count = mvcount(parsingQueue)] | eval host = splunk_server | stats avg(aggQueue) as agg_queue_ratio avg(indexQueue) as index_queue_ratio avg(parsingQueue) as parse_queue_ratio avg(typingQueue) as typing_queue_ratio max(pset_count) as pipeline_sets by host"#,
    ),
    (
        "buckets_searchable_status",
        r#"search index=_telemetry | stats count(index) | appendcols [| rest splunk_server_group=dmc_group_cluster_master splunk_server_group=* /services/cluster/master/peers | eval splunk_server = label | fields splunk_server, is_searchable, bucket_count] | eval host = splunk_server | stats values(is_searchable) as is_searchable sum(bucket_count) as bucket_count by host"#,
    ),
    (
        "indexes_data",
        r#"search index=_telemetry | stats count(index) | appendcols [| rest splunk_server_group=dmc_group_indexer splunk_server_group=* /services/data/indexes-extended | eval bucket_count = coalesce('bucket_dirs.cold.bucket_count', 0) + coalesce('bucket_dirs.home.warm_bucket_count', 0) + coalesce('bucket_dirs.home.hot_bucket_count', 0) | eval total_size_gb = round(currentDBSizeMB / 1024, 2) | eval median_data_age = round((now() - minTime) / 86400) | stats sum(total_size_gb) as total_size_gb avg(total_size_gb) as average_size_gb avg(eval(currentDBSizeMB / maxTotalDataSizeMB * 100)) as average_usage_perc median(median_data_age) as median_data_age sum(bucket_count) as bucket_count by title]"#,
    ),
];

const ENDPOINTS: [(&str, &str); 3] = [
    (
        "indexer_throughput",
        "/services/server/introspection/indexer?output_mode=json",
    ),
    (
        "indexes_extended",
        "/services/data/indexes-extended?output_mode=json&count=-1",
    ),
    (
        "introspection_queues",
        "/services/server/introspection/queues?output_mode=json&count=-1",
    ),
];

/// The query text and REST paths jobs are built from.
///
/// Starts from built-in defaults; individual keys may be overridden but no
/// key may be added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    searches: FxHashMap<&'static str, String>,
    endpoints: FxHashMap<&'static str, String>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            searches: SEARCHES
                .iter()
                .map(|(k, v)| (*k, (*v).to_string()))
                .collect(),
            endpoints: ENDPOINTS
                .iter()
                .map(|(k, v)| (*k, (*v).to_string()))
                .collect(),
        }
    }
}

fn replace(
    map: &mut FxHashMap<&'static str, String>,
    key: &str,
    value: String,
) -> Result<(), String> {
    match map.get_mut(key) {
        Some(slot) => {
            *slot = value;
            Ok(())
        }
        None => Err(key.to_string()),
    }
}

impl Catalog {
    /// Override the query text of search `key`.
    ///
    /// # Errors
    ///
    /// Returns the key back if no such search exists.
    pub fn set_search(&mut self, key: &str, query: String) -> Result<(), String> {
        replace(&mut self.searches, key, query)
    }

    /// Override the REST path of endpoint `key`.
    ///
    /// # Errors
    ///
    /// Returns the key back if no such endpoint exists.
    pub fn set_endpoint(&mut self, key: &str, path: String) -> Result<(), String> {
        replace(&mut self.endpoints, key, path)
    }

    /// The query text of search `key`.
    #[must_use]
    pub fn search(&self, key: &str) -> Option<&str> {
        self.searches.get(key).map(String::as_str)
    }

    /// The REST path of endpoint `key`.
    #[must_use]
    pub fn endpoint(&self, key: &str) -> Option<&str> {
        self.endpoints.get(key).map(String::as_str)
    }

    fn search_source(&self, key: &str, table: &'static Table) -> Source {
        Source::Search {
            query: self.search(key).unwrap_or_default().to_string(),
            table,
        }
    }

    fn endpoint_source(&self, key: &str, extract: EntryExtractor) -> Source {
        Source::Endpoint {
            path: self.endpoint(key).unwrap_or_default().to_string(),
            extract,
        }
    }
}

const fn float(field: &'static str, metric: Metric) -> Measurement {
    Measurement {
        field,
        metric,
        kind: Kind::Float,
    }
}

const fn int(field: &'static str, metric: Metric) -> Measurement {
    Measurement {
        field,
        metric,
        kind: Kind::Int,
    }
}

const BY_HOST: &[&str] = &["host"];

static LICENSE_INDEX_USAGE: Table = Table {
    dimensions: &["indexname"],
    measurements: &[Measurement {
        field: "By",
        metric: Metric::LicenseIndexUsage,
        kind: Kind::FloatAsInt,
    }],
};

static SCHEDULER_AVG_EXECUTION_LATENCY: Table = Table {
    dimensions: BY_HOST,
    measurements: &[float("latency_avg_exec", Metric::SchedulerAvgExecutionLatency)],
};

static SCHEDULER_COMPLETION_RATIO: Table = Table {
    dimensions: BY_HOST,
    measurements: &[float("completion_ratio", Metric::SchedulerCompletionRatio)],
};

static INDEXER_AVG_RATE: Table = Table {
    dimensions: BY_HOST,
    measurements: &[float("indexer_avg_kbps", Metric::IndexerAvgRate)],
};

static SCHEDULER_AVG_RUN_TIME: Table = Table {
    dimensions: BY_HOST,
    measurements: &[float("run_time_avg", Metric::SchedulerAvgRunTime)],
};

static INDEXER_RAW_WRITE_TIME: Table = Table {
    dimensions: BY_HOST,
    measurements: &[float("raw_data_write_seconds", Metric::IndexerRawWriteTime)],
};

static INDEXER_CPU_TIME: Table = Table {
    dimensions: BY_HOST,
    measurements: &[float("service_cpu_seconds", Metric::IndexerCpuTime)],
};

static IO_AVG_IOPS: Table = Table {
    dimensions: BY_HOST,
    measurements: &[int("iops", Metric::IoAvgIops)],
};

static PIPELINE_QUEUES: Table = Table {
    dimensions: BY_HOST,
    measurements: &[
        float("agg_queue_ratio", Metric::AggregationQueueRatio),
        float("index_queue_ratio", Metric::IndexerQueueRatio),
        float("parse_queue_ratio", Metric::ParseQueueRatio),
        int("pipeline_sets", Metric::PipelineSetCount),
        float("typing_queue_ratio", Metric::TypingQueueRatio),
    ],
};

static BUCKETS_SEARCHABLE_STATUS: Table = Table {
    dimensions: &["host", "is_searchable"],
    measurements: &[int("bucket_count", Metric::BucketsSearchableStatus)],
};

static INDEXES_DATA: Table = Table {
    dimensions: &["title"],
    measurements: &[
        float("total_size_gb", Metric::IndexesSize),
        float("average_size_gb", Metric::IndexesAvgSize),
        float("average_usage_perc", Metric::IndexesAvgUsage),
        int("median_data_age", Metric::IndexesMedianDataAge),
        int("bucket_count", Metric::IndexesBucketCount),
    ],
};

/// The full set of jobs, in scrape order.
#[must_use]
pub fn standard(catalog: &Catalog) -> Vec<MetricJob> {
    let search = |id: &'static str, gate: Metric, table: &'static Table| MetricJob {
        id,
        source: catalog.search_source(id, table),
        role: Role::ClusterManager,
        gate,
    };
    let endpoint = |id: &'static str, key: &str, gate: Metric, f: EntryExtractor| MetricJob {
        id,
        source: catalog.endpoint_source(key, f),
        role: Role::Indexer,
        gate,
    };

    vec![
        search(
            "license_index_usage",
            Metric::LicenseIndexUsage,
            &LICENSE_INDEX_USAGE,
        ),
        search(
            "scheduler_avg_execution_latency",
            Metric::SchedulerAvgExecutionLatency,
            &SCHEDULER_AVG_EXECUTION_LATENCY,
        ),
        search(
            "scheduler_completion_ratio",
            Metric::SchedulerCompletionRatio,
            &SCHEDULER_COMPLETION_RATIO,
        ),
        search(
            "indexer_avg_rate",
            Metric::IndexerAvgRate,
            &INDEXER_AVG_RATE,
        ),
        search(
            "scheduler_avg_run_time",
            Metric::SchedulerAvgRunTime,
            &SCHEDULER_AVG_RUN_TIME,
        ),
        search(
            "indexer_raw_write_time",
            Metric::IndexerRawWriteTime,
            &INDEXER_RAW_WRITE_TIME,
        ),
        search(
            "indexer_cpu_time",
            Metric::IndexerCpuTime,
            &INDEXER_CPU_TIME,
        ),
        search("io_avg_iops", Metric::IoAvgIops, &IO_AVG_IOPS),
        endpoint(
            "indexer_throughput",
            "indexer_throughput",
            Metric::IndexerThroughput,
            extract::indexer_throughput,
        ),
        endpoint(
            "indexes_total_size",
            "indexes_extended",
            Metric::DataIndexesExtendedTotalSize,
            extract::indexes_total_size,
        ),
        endpoint(
            "indexes_event_count",
            "indexes_extended",
            Metric::DataIndexesExtendedEventCount,
            extract::indexes_event_count,
        ),
        endpoint(
            "indexes_bucket_count",
            "indexes_extended",
            Metric::DataIndexesExtendedBucketCount,
            extract::indexes_bucket_count,
        ),
        endpoint(
            "indexes_raw_size",
            "indexes_extended",
            Metric::DataIndexesExtendedRawSize,
            extract::indexes_raw_size,
        ),
        endpoint(
            "indexes_bucket_event_count",
            "indexes_extended",
            Metric::DataIndexesExtendedBucketEventCount,
            extract::indexes_bucket_event_count,
        ),
        endpoint(
            "indexes_bucket_hot_warm_count",
            "indexes_extended",
            Metric::DataIndexesExtendedBucketHotCount,
            extract::indexes_bucket_hot_warm_count,
        ),
        endpoint(
            "introspection_queues_current",
            "introspection_queues",
            Metric::ServerIntrospectionQueuesCurrent,
            extract::introspection_queues_current,
        ),
        endpoint(
            "introspection_queues_current_bytes",
            "introspection_queues",
            Metric::ServerIntrospectionQueuesCurrentBytes,
            extract::introspection_queues_current_bytes,
        ),
        search(
            "pipeline_queues",
            Metric::AggregationQueueRatio,
            &PIPELINE_QUEUES,
        ),
        search(
            "buckets_searchable_status",
            Metric::BucketsSearchableStatus,
            &BUCKETS_SEARCHABLE_STATUS,
        ),
        search("indexes_data", Metric::IndexesSize, &INDEXES_DATA),
    ]
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use super::*;
    use crate::{
        metric::{MetricFlags, Recorder, Value},
        scrape::{errors::ScrapeErrors, normalize::FieldRecord},
    };

    #[test]
    fn every_search_job_has_a_query() {
        let catalog = Catalog::default();
        for job in standard(&catalog) {
            match job.source {
                Source::Search { query, .. } => {
                    assert!(query.starts_with("search "), "{} has no query", job.id);
                    assert_eq!(job.role, Role::ClusterManager);
                }
                Source::Endpoint { path, .. } => {
                    assert!(path.starts_with("/services/"), "{} has no path", job.id);
                    assert_eq!(job.role, Role::Indexer);
                }
            }
        }
    }

    #[test]
    fn job_ids_are_unique() {
        let jobs = standard(&Catalog::default());
        let mut ids: Vec<_> = jobs.iter().map(|j| j.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), jobs.len());
        assert_eq!(jobs.len(), 20);
    }

    #[test]
    fn overrides_flow_into_jobs() {
        let mut catalog = Catalog::default();
        catalog
            .set_endpoint("indexes_extended", "/custom?output_mode=json".to_string())
            .expect("key rejected");
        let overridden = standard(&catalog)
            .into_iter()
            .filter(|j| {
                matches!(&j.source, Source::Endpoint { path, .. } if path == "/custom?output_mode=json")
            })
            .count();
        assert_eq!(overridden, 6);
    }

    #[test]
    fn unknown_keys_rejected() {
        let mut catalog = Catalog::default();
        assert_eq!(
            catalog.set_search("nope", String::new()),
            Err("nope".to_string())
        );
        assert_eq!(catalog.search("nope"), None);
    }

    #[test]
    fn every_table_dimension_count_matches_its_metrics() {
        for job in standard(&Catalog::default()) {
            if let Source::Search { table, .. } = job.source {
                for m in table.measurements {
                    assert_eq!(
                        table.dimensions.len(),
                        m.metric.label_keys().len(),
                        "{} dimensions do not fit {}",
                        job.id,
                        m.metric
                    );
                }
            }
        }
    }

    #[test]
    fn indexes_data_fields_never_alias() {
        let fields = [
            ("total_size_gb", "12.5"),
            ("average_size_gb", "0.75"),
            ("average_usage_perc", "40.0"),
            ("median_data_age", "86400"),
            ("bucket_count", "31"),
        ];
        let expected = [
            (Metric::IndexesSize, Value::Double(12.5)),
            (Metric::IndexesAvgSize, Value::Double(0.75)),
            (Metric::IndexesAvgUsage, Value::Double(40.0)),
            (Metric::IndexesMedianDataAge, Value::Int(86_400)),
            (Metric::IndexesBucketCount, Value::Int(31)),
        ];

        let forward: Vec<_> = fields.iter().collect();
        let reverse: Vec<_> = fields.iter().rev().collect();
        for order in [forward, reverse] {
            let mut records = vec![FieldRecord::new("title", "main")];
            records.extend(order.iter().map(|(k, v)| FieldRecord::new(*k, *v)));

            let flags = MetricFlags::default();
            let mut recorder = Recorder::new(&flags, UNIX_EPOCH);
            let mut errors = ScrapeErrors::default();
            extract::table(
                &INDEXES_DATA,
                &records,
                &mut Output::new("indexes_data", &mut recorder, &mut errors),
            );
            let batch = recorder.finish();

            assert!(errors.is_empty());
            assert_eq!(batch.len(), expected.len());
            for (metric, value) in expected {
                let points: Vec<_> = batch.of(metric).collect();
                assert_eq!(points.len(), 1, "{metric} emitted {} points", points.len());
                assert_eq!(points[0].value, value, "{metric} carries the wrong value");
                assert_eq!(points[0].label("splunk.index.name"), Some("main"));
            }
        }
    }
}
