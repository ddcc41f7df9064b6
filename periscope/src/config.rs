//! This module controls configuration parsing from the end user, providing a
//! convenience mechanism for the rest of the program. Crashes are most likely
//! to originate from this code, intentionally.

use std::{path::Path, time::Duration};

use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::{client::Role, metric::MetricFlags, scrape::job::Catalog};

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error for IO operations when reading the config file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// A catalog override named a key that does not exist
    #[error("Unknown {kind} catalog key: {key}")]
    UnknownCatalogKey {
        /// Either `search` or `endpoint`
        kind: &'static str,
        /// The offending key
        key: String,
    },
    /// No backend endpoint is configured, nothing could ever be scraped
    #[error("At least one of cluster_manager or indexer must be configured")]
    NoEndpoints,
    /// The poll deadline must be positive
    #[error("timeout_seconds must be greater than zero")]
    ZeroTimeout,
    /// The collection interval must be positive
    #[error("collection_interval_seconds must be greater than zero")]
    ZeroInterval,
}

fn default_collection_interval() -> u64 {
    600
}

fn default_timeout() -> u64 {
    60
}

/// Main configuration struct for this program
#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The period, in seconds, between scrape cycles.
    #[serde(default = "default_collection_interval")]
    pub collection_interval_seconds: u64,
    /// The longest, in seconds, any one search job is waited on per cycle.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    /// Endpoint of the cluster manager, which runs search jobs.
    pub cluster_manager: Option<EndpointConfig>,
    /// Endpoint of an indexer, which serves introspection APIs.
    pub indexer: Option<EndpointConfig>,
    /// Per-metric enablement.
    #[serde(default)]
    pub metrics: MetricFlags,
    /// Overrides of the default search queries, keyed by catalog key.
    #[serde(default)]
    pub searches: FxHashMap<String, String>,
    /// Overrides of the default REST paths, keyed by catalog key.
    #[serde(default)]
    pub endpoints: FxHashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
/// Configuration for one backend endpoint
pub struct EndpointConfig {
    /// Base URL, for instance `https://cm.example:8089`
    pub endpoint: String,
    /// Basic auth user name
    pub username: Option<String>,
    /// Basic auth password
    pub password: Option<String>,
    /// Per request timeout, in seconds
    pub request_timeout_seconds: Option<u64>,
}

impl Config {
    /// Parse a [`Config`] from YAML, validating it.
    ///
    /// # Errors
    ///
    /// Function will error if the YAML does not deserialize or the result does
    /// not validate.
    pub fn from_yaml(contents: &str) -> Result<Self, Error> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a [`Config`] from the file at `path`.
    ///
    /// # Errors
    ///
    /// Function will error if the file cannot be read or does not parse.
    pub fn from_path(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.endpoints().next().is_none() {
            return Err(Error::NoEndpoints);
        }
        if self.timeout_seconds == 0 {
            return Err(Error::ZeroTimeout);
        }
        if self.collection_interval_seconds == 0 {
            return Err(Error::ZeroInterval);
        }
        self.catalog()?;
        Ok(())
    }

    /// The configured endpoints, paired with their role.
    pub fn endpoints(&self) -> impl Iterator<Item = (Role, &EndpointConfig)> {
        [
            (Role::ClusterManager, self.cluster_manager.as_ref()),
            (Role::Indexer, self.indexer.as_ref()),
        ]
        .into_iter()
        .filter_map(|(role, conf)| conf.map(|c| (role, c)))
    }

    /// The poll deadline shared by every search job of a cycle.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// The period between scrape cycles.
    #[must_use]
    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval_seconds)
    }

    /// The query and path catalog: defaults with user overrides applied.
    ///
    /// # Errors
    ///
    /// Function will error if an override names an unknown key.
    pub fn catalog(&self) -> Result<Catalog, Error> {
        let mut catalog = Catalog::default();
        for (key, query) in &self.searches {
            catalog
                .set_search(key, query.clone())
                .map_err(|key| Error::UnknownCatalogKey {
                    kind: "search",
                    key,
                })?;
        }
        for (key, path) in &self.endpoints {
            catalog
                .set_endpoint(key, path.clone())
                .map_err(|key| Error::UnknownCatalogKey {
                    kind: "endpoint",
                    key,
                })?;
        }
        Ok(catalog)
    }
}
