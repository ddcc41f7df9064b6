//! Capture scrape results to disk
//!
//! Every data point of every cycle is written as one JSON object per line,
//! tagged with an id unique to this run and the index of the cycle that
//! produced it. Labels are flattened into the object beside the metric name
//! and value.

use std::{
    borrow::Cow,
    ffi::OsStr,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::metric::{Batch, Value};

/// Errors produced by [`CaptureWriter`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Wrapper around [`std::io::Error`].
    #[error("Io error: {0}")]
    Io(#[from] io::Error),
    /// Wrapper around [`serde_json::Error`].
    #[error("Json serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
/// The structure of a capture file line.
pub struct Line<'a> {
    #[serde(borrow)]
    /// An id unique to this run of periscope.
    pub run_id: Cow<'a, Uuid>,
    /// The time in milliseconds of the cycle that produced this line.
    pub time: u128,
    /// The number of cycles captured before this one.
    pub fetch_index: u64,
    /// The name of the metric recorded by this line.
    pub metric_name: &'a str,
    /// The value of the metric on this line.
    pub value: Value,
    #[serde(flatten)]
    /// The labels associated with this metric.
    pub labels: FxHashMap<&'a str, &'a str>,
}

/// Appends each cycle's [`Batch`] to a capture file.
#[derive(Debug)]
pub struct CaptureWriter {
    run_id: Uuid,
    fetch_index: u64,
    capture_fp: BufWriter<std::fs::File>,
    capture_path: PathBuf,
}

impl CaptureWriter {
    /// Create a new [`CaptureWriter`], truncating any file at `capture_path`.
    ///
    /// # Errors
    ///
    /// Function will error if the capture file cannot be created.
    pub async fn new(capture_path: PathBuf) -> Result<Self, Error> {
        let fp = tokio::fs::File::create(&capture_path).await?;
        let fp = fp.into_std().await;
        Ok(Self {
            run_id: Uuid::new_v4(),
            fetch_index: 0,
            capture_fp: BufWriter::new(fp),
            capture_path,
        })
    }

    /// The path being written to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.capture_path
    }

    /// Write every data point of `batch`, then flush.
    ///
    /// # Errors
    ///
    /// Function will error if a line cannot be serialized or written.
    pub fn record(&mut self, batch: &Batch) -> Result<(), Error> {
        debug!(
            "Recording {} captures to {}",
            batch.len(),
            self.capture_path
                .file_name()
                .and_then(OsStr::to_str)
                .unwrap_or("capture file")
        );
        for point in batch.points() {
            let time = point
                .timestamp
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or_default();
            let line = Line {
                run_id: Cow::Borrowed(&self.run_id),
                time,
                fetch_index: self.fetch_index,
                metric_name: point.metric.name(),
                value: point.value,
                labels: point
                    .labels
                    .iter()
                    .map(|(k, v)| (*k, v.as_str()))
                    .collect(),
            };
            serde_json::to_writer(&mut self.capture_fp, &line)?;
            self.capture_fp.write_all(b"\n")?;
        }
        self.capture_fp.flush()?;
        self.fetch_index += 1;
        Ok(())
    }
}
