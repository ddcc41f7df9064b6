//! Non-fatal scrape errors and their per-cycle aggregation

use std::{fmt, num::ParseFloatError, num::ParseIntError};

use http::StatusCode;

use crate::client;

/// Errors produced while scraping a single metric job
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The request could not be built or sent, or its body not read
    #[error(transparent)]
    Transport(#[from] client::Error),
    /// A search payload was not well-formed XML
    #[error("Failed to unmarshal search response: {0}")]
    Xml(#[from] quick_xml::Error),
    /// An endpoint payload was not the expected JSON
    #[error("Failed to unmarshal endpoint response: {0}")]
    Json(#[from] serde_json::Error),
    /// A field expected to hold a float did not
    #[error("Field {field} is not a float: {source}")]
    ParseFloat {
        /// Name of the offending field
        field: String,
        /// Underlying parse failure
        #[source]
        source: ParseFloatError,
    },
    /// A field expected to hold an integer did not
    #[error("Field {field} is not an integer: {source}")]
    ParseInt {
        /// Name of the offending field
        field: String,
        /// Underlying parse failure
        #[source]
        source: ParseIntError,
    },
    /// The server answered with a status that carries no data
    #[error("Unexpected response status {0}")]
    Status(StatusCode),
    /// The search job did not complete before the deadline
    #[error("maximum search wait time exceeded for metric")]
    MaxSearchWaitTimeExceeded,
    /// The scrape cycle was cancelled while this job was in flight
    #[error("scrape cancelled")]
    Cancelled,
    /// The search job lifecycle was driven into an impossible state
    #[error(transparent)]
    Poll(#[from] super::poll::Error),
}

/// One failure, attributed to the job that suffered it.
#[derive(Debug)]
pub struct ScrapeError {
    /// Identifier of the failing metric job
    pub job: &'static str,
    /// What went wrong
    pub error: Error,
}

impl fmt::Display for ScrapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{job}: {error}", job = self.job, error = self.error)
    }
}

/// Collector of the non-fatal errors of one scrape cycle.
#[derive(Debug, Default)]
pub struct ScrapeErrors {
    errors: Vec<ScrapeError>,
}

impl ScrapeErrors {
    /// Record that `job` failed with `error`.
    pub fn add<E>(&mut self, job: &'static str, error: E)
    where
        E: Into<Error>,
    {
        self.errors.push(ScrapeError {
            job,
            error: error.into(),
        });
    }

    /// Errors recorded so far, in order.
    #[must_use]
    pub fn errors(&self) -> &[ScrapeError] {
        &self.errors
    }

    /// Number of errors recorded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Whether no errors have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Fold everything recorded into a single result.
    ///
    /// # Errors
    ///
    /// Returns [`PartialScrapeError`] if any error was recorded.
    pub fn combine(self) -> Result<(), PartialScrapeError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(PartialScrapeError {
                errors: self.errors,
            })
        }
    }
}

/// Every failure of a scrape cycle that nonetheless produced a batch.
#[derive(Debug)]
pub struct PartialScrapeError {
    errors: Vec<ScrapeError>,
}

impl PartialScrapeError {
    /// The individual failures.
    #[must_use]
    pub fn errors(&self) -> &[ScrapeError] {
        &self.errors
    }
}

impl fmt::Display for PartialScrapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} scrape errors: ", self.errors.len())?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for PartialScrapeError {}
