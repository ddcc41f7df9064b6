//! Single request fetch of REST endpoints that answer synchronously

use periscope_signal::Watcher;
use tracing::{debug, warn};

use super::{
    errors::{Error, ScrapeErrors},
    normalize::{self, Entry},
};
use crate::client::{Role, Transport};

/// Fetch `path` from `role` once and decode its entry list.
///
/// Any failure is recorded in `errors` under `job` and yields `None`. There
/// are no retries. The request is abandoned as soon as `watcher` fires.
pub async fn fetch<T>(
    transport: &T,
    job: &'static str,
    role: Role,
    path: &str,
    watcher: &mut Watcher,
    errors: &mut ScrapeErrors,
) -> Option<Vec<Entry>>
where
    T: Transport,
{
    let response = match transport.endpoint_request(role, path) {
        Ok(request) => tokio::select! {
            res = transport.send(request) => res,
            () = watcher.recv() => {
                debug!(job, %role, "endpoint request cancelled");
                errors.add(job, Error::Cancelled);
                return None;
            }
        },
        Err(e) => Err(e),
    };
    let response = match response {
        Ok(r) => r,
        Err(e) => {
            warn!(job, %role, error = %e, "endpoint request failed");
            errors.add(job, e);
            return None;
        }
    };

    let normalized = normalize::entries(&response);
    if !normalized.status.is_success() {
        errors.add(job, Error::Status(normalized.status));
        return None;
    }
    match normalized.payload {
        Ok(entries) => {
            let entries = entries.unwrap_or_default();
            debug!(job, status = %normalized.status, entries = entries.len(), "endpoint fetched");
            Some(entries)
        }
        Err(e) => {
            errors.add(job, e);
            None
        }
    }
}
