//! An in-memory [`Transport`] for tests
//!
//! Requests are routed by their query text or REST path. Each route answers
//! from a script and repeats its final answer once the script is exhausted.

use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use http::StatusCode;
use reqwest::{Method, Url};
use rustc_hash::FxHashMap;

use crate::client::{Error, Request, Response, Role, Transport};

#[derive(Debug)]
enum Answer {
    Script(VecDeque<Response>, Option<Response>),
    Unreachable,
    Hang,
}

#[derive(Debug)]
pub(crate) struct FakeTransport {
    routes: Mutex<FxHashMap<String, Answer>>,
    sent: AtomicUsize,
    configured: Vec<Role>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            routes: Mutex::new(FxHashMap::default()),
            sent: AtomicUsize::new(0),
            configured: vec![Role::ClusterManager, Role::Indexer],
        }
    }
}

impl FakeTransport {
    pub(crate) fn route(self, key: &str, answers: impl IntoIterator<Item = Response>) -> Self {
        self.routes.lock().expect("poisoned").insert(
            key.to_string(),
            Answer::Script(answers.into_iter().collect(), None),
        );
        self
    }

    pub(crate) fn unreachable(self, key: &str) -> Self {
        self.routes
            .lock()
            .expect("poisoned")
            .insert(key.to_string(), Answer::Unreachable);
        self
    }

    pub(crate) fn hang(self, key: &str) -> Self {
        self.routes
            .lock()
            .expect("poisoned")
            .insert(key.to_string(), Answer::Hang);
        self
    }

    pub(crate) fn without(mut self, role: Role) -> Self {
        self.configured.retain(|r| *r != role);
        self
    }

    pub(crate) fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    fn request(role: Role, key: &str, job_id: Option<&str>) -> Result<Request, Error> {
        let host = role.to_string().replace('_', "-");
        let mut url = Url::parse(&format!("https://{host}.test/fake")).map_err(|e| Error::Url {
            role,
            reason: e.to_string(),
        })?;
        url.query_pairs_mut().append_pair("k", key);
        if let Some(sid) = job_id {
            url.query_pairs_mut().append_pair("sid", sid);
        }
        Ok(Request::new(Method::GET, url))
    }
}

fn send_error() -> Error {
    let err = reqwest::Client::new()
        .get("https://unreachable.test")
        .header("not a header", "x")
        .build()
        .expect_err("invalid header accepted");
    Error::Send(err)
}

impl Transport for FakeTransport {
    fn search_request(&self, role: Role, query: &str, job_id: Option<&str>) -> Result<Request, Error> {
        if !self.is_configured(role) {
            return Err(Error::NotConfigured(role));
        }
        Self::request(role, query, job_id)
    }

    fn endpoint_request(&self, role: Role, path: &str) -> Result<Request, Error> {
        if !self.is_configured(role) {
            return Err(Error::NotConfigured(role));
        }
        Self::request(role, path, None)
    }

    async fn send(&self, request: Request) -> Result<Response, Error> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        let key = request
            .url()
            .query_pairs()
            .find(|(k, _)| k == "k")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();

        let answer = {
            let mut routes = self.routes.lock().expect("poisoned");
            match routes.get_mut(&key) {
                None => Some(Ok(Response::new(StatusCode::NOT_FOUND, ""))),
                Some(Answer::Unreachable) => Some(Err(send_error())),
                Some(Answer::Hang) => None,
                Some(Answer::Script(script, last)) => {
                    if let Some(next) = script.pop_front() {
                        *last = Some(next);
                    }
                    Some(Ok(last
                        .clone()
                        .unwrap_or_else(|| Response::new(StatusCode::NO_CONTENT, ""))))
                }
            }
        };
        match answer {
            Some(answer) => answer,
            None => std::future::pending().await,
        }
    }

    fn is_configured(&self, role: Role) -> bool {
        self.configured.contains(&role)
    }
}
