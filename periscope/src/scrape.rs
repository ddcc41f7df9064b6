//! The scrape cycle
//!
//! A [`Scraper`] owns a [`Transport`] and the fixed list of [`MetricJob`]s. Each
//! call to [`Scraper::scrape`] walks the jobs in order, skipping those whose
//! gating metric is disabled or whose backend role is not configured, and
//! drives each remaining job through either the search job [`poll::Engine`] or
//! a single [`direct::fetch`]. A failing job never stops its siblings: its
//! errors are collected and returned beside whatever data points the cycle
//! managed to record.

use std::time::{Duration, SystemTime};

use metrics::{counter, gauge};
use periscope_signal::Watcher;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::{
    client::Transport,
    config::{self, Config},
    metric::{Batch, MetricFlags, Recorder},
};

pub mod direct;
pub mod errors;
pub mod extract;
pub mod job;
pub mod normalize;
pub mod poll;

#[cfg(test)]
mod fake;

use errors::{PartialScrapeError, ScrapeErrors};
use extract::Output;
use job::{MetricJob, Source};

/// Runs scrape cycles against one Splunk deployment.
#[derive(Debug)]
pub struct Scraper<T> {
    transport: T,
    jobs: Vec<MetricJob>,
    flags: MetricFlags,
    timeout: Duration,
}

impl<T> Scraper<T>
where
    T: Transport,
{
    /// Create a new [`Scraper`].
    ///
    /// Each search job is abandoned `timeout` after its first submission.
    #[must_use]
    pub fn new(transport: T, jobs: Vec<MetricJob>, flags: MetricFlags, timeout: Duration) -> Self {
        Self {
            transport,
            jobs,
            flags,
            timeout,
        }
    }

    /// Create a new [`Scraper`] running the standard jobs described by
    /// `config`.
    ///
    /// # Errors
    ///
    /// Function will error if the configured catalog overrides are invalid.
    pub fn from_config(transport: T, config: &Config) -> Result<Self, config::Error> {
        let catalog = config.catalog()?;
        Ok(Self::new(
            transport,
            job::standard(&catalog),
            config.metrics.clone(),
            config.timeout(),
        ))
    }

    /// The jobs this scraper runs, in order.
    #[must_use]
    pub fn jobs(&self) -> &[MetricJob] {
        &self.jobs
    }

    /// Run one scrape cycle.
    ///
    /// Returns every data point recorded and, if anything went wrong, a
    /// combined error naming each failing job. Once `watcher` fires the job in
    /// flight is abandoned and no further jobs are started.
    pub async fn scrape(&self, watcher: &Watcher) -> (Batch, Result<(), PartialScrapeError>) {
        let started = Instant::now();
        let mut watcher = watcher.clone();
        let mut recorder = Recorder::new(&self.flags, SystemTime::now());
        let mut errors = ScrapeErrors::default();
        let engine = poll::Engine::new(&self.transport, self.timeout);

        for job in &self.jobs {
            if !self.flags.is_enabled(job.gate) {
                trace!(job = job.id, gate = %job.gate, "metric disabled, skipping");
                continue;
            }
            if !self.transport.is_configured(job.role) {
                trace!(job = job.id, role = %job.role, "role not configured, skipping");
                continue;
            }
            if watcher.is_signaled() {
                debug!(job = job.id, "scrape cancelled, remaining jobs skipped");
                break;
            }

            match &job.source {
                Source::Search { query, table } => {
                    if let Some(search) = engine
                        .run(job.id, job.role, query, &mut watcher, &mut errors)
                        .await
                    {
                        let mut out = Output::new(job.id, &mut recorder, &mut errors);
                        extract::table(table, &search.fields, &mut out);
                    }
                }
                Source::Endpoint { path, extract: extractor } => {
                    if let Some(entries) = direct::fetch(
                        &self.transport,
                        job.id,
                        job.role,
                        path,
                        &mut watcher,
                        &mut errors,
                    )
                    .await
                    {
                        let mut out = Output::new(job.id, &mut recorder, &mut errors);
                        extractor(&entries, &mut out);
                    }
                }
            }
        }

        let batch = recorder.finish();
        report(&batch, &errors, started.elapsed());
        (batch, errors.combine())
    }
}

/// Record self-telemetry for one completed cycle.
fn report(batch: &Batch, errors: &ScrapeErrors, elapsed: Duration) {
    counter!("scrape_cycles").increment(1);
    counter!("data_points").increment(batch.len() as u64);
    for err in errors.errors() {
        counter!("scrape_errors", "job" => err.job).increment(1);
    }
    gauge!("scrape_cycle_duration_seconds").set(elapsed.as_secs_f64());
    info!(
        data_points = batch.len(),
        errors = errors.len(),
        elapsed = ?elapsed,
        "scrape cycle complete"
    );
}
