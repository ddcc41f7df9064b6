//! Search job polling
//!
//! A search job is submitted once and then polled until its results are
//! available. The lifecycle is held in a pure [`StateMachine`] that knows
//! nothing of time or the network; [`Engine`] owns the clock and the
//! [`Transport`] and simply follows the machine's [`Operation`]s.
//!
//! Every job is bounded by a deadline measured from its own first submission.
//! Sleeping never carries a job past its deadline: a backoff is cut short at
//! the deadline, so a job that never completes is abandoned no earlier than
//! the deadline and no later than one backoff after it.

use std::time::Duration;

use http::StatusCode;
use periscope_signal::Watcher;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, trace, warn};

use super::{
    errors::{Error as ScrapeError, ScrapeErrors},
    normalize::{self, FieldRecord},
};
use crate::client::{Role, Transport};

/// The pause between status checks of a running search job.
pub const BACKOFF: Duration = Duration::from_secs(2);

/// The state of a search job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// A request is about to be, or is being, sent
    Submitting,
    /// The job is running, pausing before the next status check
    Waiting,
    /// Results are available
    Ready,
    /// The job was rejected or could not be reached
    Failed,
    /// The deadline passed before results were available
    TimedOut,
}

/// Operations the state machine can request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Send the submission or status request
    Send,
    /// Pause for the backoff, bounded by the deadline
    Backoff,
    /// Hand the last decoded fields to extraction
    Extract,
    /// Stop without reporting anything further
    Stop,
    /// Stop and report that the deadline was exceeded
    ReportTimeout,
}

/// Events that can drive the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Polling begins
    Started,
    /// A response arrived
    Responded {
        /// The response status
        status: StatusCode,
        /// Whether a job identifier has been seen, in this or an earlier
        /// response
        job_known: bool,
        /// Whether this response carried a job identifier
        fresh_job: bool,
    },
    /// The request could not be built or sent
    TransportFailed,
    /// The backoff pause ended before the deadline
    BackoffElapsed,
    /// The deadline passed
    DeadlineExpired,
    /// The scrape cycle was cancelled
    Cancelled,
}

/// Errors produced by [`StateMachine`]
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Transition is not valid
    #[error("Invalid transition from {from:?} via {via:?}")]
    InvalidTransition {
        /// The state the machine was in
        from: State,
        /// The offending event
        via: Event,
    },
}

/// State machine for one search job
///
/// Holds the transition logic of a search job without IO encumbrance, neither
/// timing information nor network calls. [`Engine`] deals with both and
/// follows the output of `next` without consideration.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: State,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a new state machine
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::Submitting,
        }
    }

    /// Get the current state
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// Whether the machine has reached a state it cannot leave
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, State::Ready | State::Failed | State::TimedOut)
    }

    /// Process an event and return the next operation
    ///
    /// State transitions:
    /// ```text
    /// Format: CurrentState --[Event]--> NextState (Operation)
    ///
    /// Submitting --[Started]--> Submitting (Send)
    /// Submitting --[Responded 200, job known]--> Ready (Extract)
    /// Submitting --[Responded 400]--> Failed (Stop)
    /// Submitting --[Responded other, fresh job]--> Submitting (Send)
    /// Submitting --[Responded other]--> Waiting (Backoff)
    /// Submitting --[TransportFailed]--> Failed (Stop)
    ///
    /// Waiting --[BackoffElapsed]--> Submitting (Send)
    ///
    /// Submitting | Waiting --[DeadlineExpired]--> TimedOut (ReportTimeout)
    /// Submitting | Waiting --[Cancelled]--> Failed (Stop)
    /// ```
    ///
    /// # Errors
    ///
    /// Function will error with `InvalidTransition` if the `event` is not valid
    /// for the present state.
    pub fn next(&mut self, event: Event) -> Result<Operation, Error> {
        let (next_state, operation) = match (self.state, event) {
            (State::Submitting, Event::Started) => (State::Submitting, Operation::Send),
            (
                State::Submitting,
                Event::Responded {
                    status,
                    job_known,
                    fresh_job,
                },
            ) => {
                if status == StatusCode::OK && job_known {
                    (State::Ready, Operation::Extract)
                } else if status == StatusCode::BAD_REQUEST {
                    (State::Failed, Operation::Stop)
                } else if fresh_job && status != StatusCode::OK {
                    // A new job was created; its results are worth asking for
                    // straight away.
                    (State::Submitting, Operation::Send)
                } else {
                    (State::Waiting, Operation::Backoff)
                }
            }
            (State::Submitting, Event::TransportFailed) => (State::Failed, Operation::Stop),
            (State::Waiting, Event::BackoffElapsed) => (State::Submitting, Operation::Send),
            (State::Submitting | State::Waiting, Event::DeadlineExpired) => {
                (State::TimedOut, Operation::ReportTimeout)
            }
            (State::Submitting | State::Waiting, Event::Cancelled) => {
                (State::Failed, Operation::Stop)
            }
            _ => {
                return Err(Error::InvalidTransition {
                    from: self.state,
                    via: event,
                });
            }
        };

        self.state = next_state;
        Ok(operation)
    }
}

/// What is known about one in-flight search job.
#[derive(Debug, Clone)]
pub struct SearchJobState {
    /// The server-assigned job identifier, absent until first seen
    pub job_id: Option<String>,
    /// The status of the most recent response
    pub last_status: Option<StatusCode>,
    /// The fields of the most recent successfully decoded response
    pub fields: Vec<FieldRecord>,
    started: Instant,
}

impl SearchJobState {
    fn new(started: Instant) -> Self {
        Self {
            job_id: None,
            last_status: None,
            fields: Vec::new(),
            started,
        }
    }

    /// Time since the job was first submitted.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Drives search jobs through their lifecycle against a [`Transport`].
#[derive(Debug)]
pub struct Engine<'t, T> {
    transport: &'t T,
    timeout: Duration,
    backoff: Duration,
}

impl<'t, T> Engine<'t, T>
where
    T: Transport,
{
    /// Create a new [`Engine`] abandoning any job still incomplete `timeout`
    /// after its first submission.
    #[must_use]
    pub fn new(transport: &'t T, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            backoff: BACKOFF,
        }
    }

    /// Run `query` as a search job against `role` until it completes, fails,
    /// times out or `watcher` fires.
    ///
    /// Returns the job's final state when results are available. Failures are
    /// recorded in `errors` under `job`. A 400 response ends the job with no
    /// data and nothing recorded.
    pub async fn run(
        &self,
        job: &'static str,
        role: Role,
        query: &str,
        watcher: &mut Watcher,
        errors: &mut ScrapeErrors,
    ) -> Option<SearchJobState> {
        let mut machine = StateMachine::new();
        let mut search = SearchJobState::new(Instant::now());
        let deadline = search.started + self.timeout;
        let mut event = Event::Started;

        loop {
            let cancelled = event == Event::Cancelled;
            let operation = match machine.next(event) {
                Ok(op) => op,
                Err(e) => {
                    warn!(job, error = %e, "search job state machine rejected event");
                    errors.add(job, e);
                    return None;
                }
            };
            trace!(job, state = ?machine.state(), ?operation, "search job step");

            event = match operation {
                Operation::Send => {
                    if watcher.is_signaled() {
                        Event::Cancelled
                    } else {
                        self.send(job, role, query, deadline, &mut search, watcher, errors)
                            .await
                    }
                }
                Operation::Backoff => {
                    let wake = (Instant::now() + self.backoff).min(deadline);
                    tokio::select! {
                        () = sleep_until(wake) => {
                            if Instant::now() >= deadline {
                                Event::DeadlineExpired
                            } else {
                                Event::BackoffElapsed
                            }
                        }
                        () = watcher.recv() => Event::Cancelled,
                    }
                }
                Operation::Extract => {
                    debug!(job, elapsed = ?search.elapsed(), fields = search.fields.len(), "search job ready");
                    return Some(search);
                }
                Operation::Stop => {
                    if cancelled {
                        errors.add(job, ScrapeError::Cancelled);
                    }
                    debug!(job, status = ?search.last_status, "search job stopped");
                    return None;
                }
                Operation::ReportTimeout => {
                    warn!(job, elapsed = ?search.elapsed(), "search job exceeded its deadline");
                    errors.add(job, ScrapeError::MaxSearchWaitTimeExceeded);
                    return None;
                }
            };
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn send(
        &self,
        job: &'static str,
        role: Role,
        query: &str,
        deadline: Instant,
        search: &mut SearchJobState,
        watcher: &mut Watcher,
        errors: &mut ScrapeErrors,
    ) -> Event {
        if Instant::now() >= deadline {
            return Event::DeadlineExpired;
        }
        let request = match self
            .transport
            .search_request(role, query, search.job_id.as_deref())
        {
            Ok(r) => r,
            Err(e) => {
                errors.add(job, e);
                return Event::TransportFailed;
            }
        };

        let response = tokio::select! {
            res = self.transport.send(request) => res,
            () = sleep_until(deadline) => return Event::DeadlineExpired,
            () = watcher.recv() => return Event::Cancelled,
        };
        let response = match response {
            Ok(r) => r,
            Err(e) => {
                errors.add(job, e);
                return Event::TransportFailed;
            }
        };

        let normalized = normalize::search(&response);
        search.last_status = Some(normalized.status);
        let mut fresh_job = false;
        match normalized.payload {
            Ok(Some(payload)) => {
                if let Some(id) = payload.job_id {
                    trace!(job, job_id = %id, "search job created");
                    search.job_id = Some(id);
                    fresh_job = true;
                }
                for msg in &payload.messages {
                    debug!(job, status = %normalized.status, message = %msg, "search job message");
                }
                search.fields = payload.fields;
            }
            Ok(None) => {}
            Err(e) => errors.add(job, e),
        }

        Event::Responded {
            status: normalized.status,
            job_known: search.job_id.is_some(),
            fresh_job,
        }
    }
}
