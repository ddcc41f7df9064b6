//! Transport to the Splunk management API
//!
//! Scraping code never talks to the network directly. It goes through the
//! [`Transport`] capability: build a request for a search job or a REST path
//! against a given backend [`Role`], send it, and ask whether a role is
//! configured at all. [`HttpTransport`] is the production implementation, a
//! thin layer over [`reqwest`].

use std::{fmt, future::Future, time::Duration};

use bytes::Bytes;
use http::StatusCode;
use reqwest::{Method, Url};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use tracing::trace;

use crate::config::{self, EndpointConfig};

const SEARCH_JOBS_PATH: &str = "/services/search/jobs/";

/// Errors produced by [`Transport`] implementations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// No endpoint is configured for the requested role
    #[error("No endpoint configured for role {0}")]
    NotConfigured(Role),
    /// The configured endpoint and a path did not form a valid URL
    #[error("Invalid URL for role {role}: {reason}")]
    Url {
        /// The role whose endpoint was used
        role: Role,
        /// Why the URL was rejected
        reason: String,
    },
    /// The request could not be constructed
    #[error("Failed to build request: {0}")]
    Build(#[source] reqwest::Error),
    /// The request could not be sent
    #[error("Failed to send request: {0}")]
    Send(#[source] reqwest::Error),
    /// The response body could not be read
    #[error("Failed to read response: {0}")]
    Read(#[source] reqwest::Error),
    /// The underlying HTTP client could not be created
    #[error("Failed to create HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// The backend role a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The cluster manager, which runs search jobs
    ClusterManager,
    /// An indexer, which exposes introspection endpoints
    Indexer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::ClusterManager => "cluster_manager",
            Role::Indexer => "indexer",
        };
        f.write_str(s)
    }
}

/// A request ready to be handed to [`Transport::send`].
pub type Request = reqwest::Request;

/// A fully read response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// The HTTP status
    pub status: StatusCode,
    /// The complete body, empty when the server sent no content
    pub body: Bytes,
}

impl Response {
    /// Construct a new [`Response`].
    #[must_use]
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Capabilities the scrape engines need from the network.
pub trait Transport {
    /// Build a request for a search job. With no `job_id` this submits
    /// `query` as a new job; with one it fetches that job's results.
    ///
    /// # Errors
    ///
    /// Function will error if `role` is not configured or the request cannot
    /// be built.
    fn search_request(
        &self,
        role: Role,
        query: &str,
        job_id: Option<&str>,
    ) -> Result<Request, Error>;

    /// Build a request for a REST `path` that answers synchronously.
    ///
    /// # Errors
    ///
    /// Function will error if `role` is not configured or the request cannot
    /// be built.
    fn endpoint_request(&self, role: Role, path: &str) -> Result<Request, Error>;

    /// Send `request`, reading the whole response body.
    fn send(&self, request: Request) -> impl Future<Output = Result<Response, Error>> + Send;

    /// Whether an endpoint for `role` is configured.
    fn is_configured(&self, role: Role) -> bool;
}

#[derive(Debug, Clone)]
struct Endpoint {
    base: Url,
    username: Option<String>,
    password: Option<String>,
    timeout: Option<Duration>,
}

impl Endpoint {
    fn url(&self, role: Role, path: &str) -> Result<Url, Error> {
        self.base.join(path).map_err(|e| Error::Url {
            role,
            reason: e.to_string(),
        })
    }
}

/// [`Transport`] over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoints: FxHashMap<Role, Endpoint>,
}

impl HttpTransport {
    /// Create a new [`HttpTransport`] for the endpoints in `config`.
    ///
    /// # Errors
    ///
    /// Function will error if an endpoint URL does not parse or the HTTP
    /// client cannot be created.
    pub fn new(config: &config::Config) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(Error::Client)?;
        let mut endpoints = FxHashMap::default();
        for (role, conf) in config.endpoints() {
            endpoints.insert(role, Self::endpoint(role, conf)?);
        }
        Ok(Self { client, endpoints })
    }

    fn endpoint(role: Role, conf: &EndpointConfig) -> Result<Endpoint, Error> {
        let base = Url::parse(&conf.endpoint).map_err(|e| Error::Url {
            role,
            reason: e.to_string(),
        })?;
        Ok(Endpoint {
            base,
            username: conf.username.clone(),
            password: conf.password.clone(),
            timeout: conf.request_timeout_seconds.map(Duration::from_secs),
        })
    }

    fn builder(&self, role: Role, method: Method, path: &str) -> Result<reqwest::RequestBuilder, Error> {
        let endpoint = self.endpoints.get(&role).ok_or(Error::NotConfigured(role))?;
        let url = endpoint.url(role, path)?;
        trace!(%role, %url, %method, "building request");

        let mut builder = self.client.request(method, url);
        if let Some(username) = &endpoint.username {
            builder = builder.basic_auth(username, endpoint.password.as_ref());
        }
        if let Some(timeout) = endpoint.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(builder)
    }
}

impl Transport for HttpTransport {
    fn search_request(
        &self,
        role: Role,
        query: &str,
        job_id: Option<&str>,
    ) -> Result<Request, Error> {
        let builder = match job_id {
            None => self
                .builder(role, Method::POST, SEARCH_JOBS_PATH)?
                .form(&[("search", query)]),
            Some(sid) => self
                .builder(
                    role,
                    Method::GET,
                    &format!("{SEARCH_JOBS_PATH}{sid}/results"),
                )?
                .query(&[("output_mode", "xml"), ("count", "0")]),
        };
        builder.build().map_err(Error::Build)
    }

    fn endpoint_request(&self, role: Role, path: &str) -> Result<Request, Error> {
        self.builder(role, Method::GET, path)?
            .build()
            .map_err(Error::Build)
    }

    async fn send(&self, request: Request) -> Result<Response, Error> {
        let response = self.client.execute(request).await.map_err(Error::Send)?;
        let status = response.status();
        let body = response.bytes().await.map_err(Error::Read)?;
        Ok(Response { status, body })
    }

    fn is_configured(&self, role: Role) -> bool {
        self.endpoints.contains_key(&role)
    }
}
