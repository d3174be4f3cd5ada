//! Virtual user state and the per-user iteration loop.
//!
//! Each virtual user runs in its own tokio task with its own
//! [`reqwest::Client`], its own seeded random source, and a cloned handle to
//! the metric sink. The parent retires a user by sending
//! [`UserCommand::Exit`] over the user's command channel; the user notices
//! between iterations and between think-time slices, so an in-flight
//! iteration always completes.

use http::StatusCode;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

use crate::identity::{Identity, IdentityPool};
use crate::metrics::MetricSink;
use crate::scenario::IterationFunction;
use crate::StampedeError;

/// Counter of every request made, recorded by the request helpers.
pub const HTTP_REQS: &str = "http_reqs";
/// Latency Trend of every request made, recorded by the request helpers.
pub const HTTP_REQ_DURATION: &str = "http_req_duration";

// Never sleep more than 500 milliseconds at a time, so a thinking user can
// shut down quickly when its scenario drains.
const MAXIMUM_SLEEP_TIME_MS: u64 = 500;

// No request waits longer than this; a stalled upstream becomes a failed
// check instead of blocking shutdown.
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Commands the parent sends to running virtual users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCommand {
    /// Finish the current iteration and exit.
    Exit,
}

/// The outcome of one HTTP call, as seen by a journey.
///
/// A transport failure is represented with a status of 0 and no body; an
/// unparseable body is represented with `body: None`. Neither aborts the
/// iteration.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// The HTTP status code, or 0 when the request never completed.
    pub status: u16,
    /// Milliseconds from sending the request to reading the full body.
    pub response_time_ms: u64,
    /// The response body, when it parsed as JSON.
    pub body: Option<Value>,
}

impl ApiResponse {
    /// Whether the call returned 200 and the JSON body has a non-null value
    /// at `pointer` (JSON pointer syntax, ie `/data/token`).
    pub fn check(&self, pointer: &str) -> bool {
        self.status == StatusCode::OK.as_u16()
            && self
                .body
                .as_ref()
                .and_then(|body| body.pointer(pointer))
                .map(truthy)
                .unwrap_or(false)
    }

    /// Whether the call returned 200 and the JSON body contains `pointer` at
    /// all, even with a null value.
    pub fn check_present(&self, pointer: &str) -> bool {
        self.status == StatusCode::OK.as_u16()
            && self
                .body
                .as_ref()
                .and_then(|body| body.pointer(pointer))
                .is_some()
    }

    /// The string at `pointer` in the JSON body, if any.
    pub fn string_at(&self, pointer: &str) -> Option<String> {
        self.body
            .as_ref()
            .and_then(|body| body.pointer(pointer))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

// Truthiness of a JSON value: null, false, 0, and "" don't count.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(true),
        Value::String(string) => !string.is_empty(),
        _ => true,
    }
}

/// An individual user state, repeatedly running iterations of its scenario's
/// journey.
pub struct VirtualUser {
    /// Which number user this is, unique across the whole load test.
    pub user_number: usize,
    /// The name of the scenario this user runs.
    pub scenario_name: String,
    /// Tags attached to every metric this user records.
    pub tags: BTreeMap<String, String>,
    /// A seeded random source for identity selection and think times.
    pub rng: StdRng,
    /// Handle used to record metric observations.
    pub sink: MetricSink,
    /// The read-only pool of test identities.
    pub identities: Arc<IdentityPool>,
    // The client maintains this user's connection pool.
    client: Client,
    base_url: Url,
    think_time: (u64, u64),
}

impl VirtualUser {
    /// Create a new virtual user.
    ///
    /// The `seed` makes the user's random decisions reproducible; users in
    /// the same test get distinct seeds derived from the base seed.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_number: usize,
        scenario_name: &str,
        tags: BTreeMap<String, String>,
        base_url: Url,
        sink: MetricSink,
        identities: Arc<IdentityPool>,
        think_time: (u64, u64),
        seed: u64,
    ) -> Result<VirtualUser, StampedeError> {
        trace!("creating user {} for {}", user_number, scenario_name);
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(VirtualUser {
            user_number,
            scenario_name: scenario_name.to_string(),
            tags,
            rng: StdRng::seed_from_u64(seed),
            sink,
            identities,
            client,
            base_url,
            think_time,
        })
    }

    /// Select a test identity uniformly at random from the pool.
    pub fn pick_identity(&mut self) -> Identity {
        let VirtualUser {
            identities, rng, ..
        } = self;
        identities.pick(rng).clone()
    }

    // Join a path onto the configured host.
    fn build_url(&self, path: &str) -> Result<Url, StampedeError> {
        self.base_url
            .join(path)
            .map_err(|parse_error| StampedeError::InvalidHost {
                host: format!("{}{}", self.base_url, path),
                detail: "failed to join path onto host".to_string(),
                parse_error,
            })
    }

    /// Make a `POST` request with a JSON body and collect engine metrics.
    pub async fn post_json(&mut self, path: &str, body: &Value) -> ApiResponse {
        match self.build_url(path) {
            Ok(url) => {
                let request = self.client.post(url).json(body);
                self.send(path, request).await
            }
            Err(e) => {
                warn!("user {}: {}", self.user_number, e);
                self.transport_failure(0)
            }
        }
    }

    /// Make a bearer-authenticated `GET` request and collect engine metrics.
    pub async fn get_with_bearer(&mut self, path: &str, token: &str) -> ApiResponse {
        match self.build_url(path) {
            Ok(url) => {
                let request = self.client.get(url).bearer_auth(token);
                self.send(path, request).await
            }
            Err(e) => {
                warn!("user {}: {}", self.user_number, e);
                self.transport_failure(0)
            }
        }
    }

    // Send a prepared request, timing it through the full body read, and
    // record the engine-level request metrics.
    async fn send(&mut self, path: &str, request: RequestBuilder) -> ApiResponse {
        let started = Instant::now();
        let response = match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = match response.bytes().await {
                    Ok(bytes) => serde_json::from_slice::<Value>(&bytes).ok(),
                    Err(e) => {
                        debug!(
                            "user {}: failed reading response body from {}: {}",
                            self.user_number, path, e
                        );
                        None
                    }
                };
                ApiResponse {
                    status,
                    response_time_ms: started.elapsed().as_millis() as u64,
                    body,
                }
            }
            Err(e) => {
                debug!("user {}: request to {} failed: {}", self.user_number, path, e);
                self.transport_failure(started.elapsed().as_millis() as u64)
            }
        };

        self.sink.add_count(HTTP_REQS, &self.tags, 1);
        self.sink
            .add_time(HTTP_REQ_DURATION, &self.tags, response.response_time_ms);
        response
    }

    fn transport_failure(&self, response_time_ms: u64) -> ApiResponse {
        ApiResponse {
            status: 0,
            response_time_ms,
            body: None,
        }
    }

    /// Draw a randomized think time from the configured range, inclusive.
    pub fn think_time(&mut self) -> Duration {
        let (min, max) = self.think_time;
        if max <= min {
            return Duration::from_millis(min);
        }
        Duration::from_millis(self.rng.random_range(min..=max))
    }
}

// Determine if the parent has sent a UserCommand::Exit message.
fn received_exit(receiver: &flume::Receiver<UserCommand>) -> bool {
    while let Ok(command) = receiver.try_recv() {
        match command {
            UserCommand::Exit => return true,
        }
    }
    false
}

// The virtual user main loop: run iterations of the scenario's journey,
// sleeping a randomized think time in between, until told to exit.
pub(crate) async fn user_main(
    mut user: VirtualUser,
    iteration: IterationFunction,
    receiver: flume::Receiver<UserCommand>,
) {
    info!(
        "launching user {} from {}...",
        user.user_number, user.scenario_name
    );

    'iterations: loop {
        // The iteration always runs to completion; failures inside it only
        // degrade metrics.
        iteration(&mut user).await;

        if received_exit(&receiver) {
            break 'iterations;
        }

        // Sleep the think time in short slices so a drain command interrupts
        // promptly.
        let mut wait_time = user.think_time().as_millis() as u64;
        while wait_time > 0 {
            if received_exit(&receiver) {
                break 'iterations;
            }
            let slice = wait_time.min(MAXIMUM_SLEEP_TIME_MS);
            tokio::time::sleep(Duration::from_millis(slice)).await;
            wait_time -= slice;
        }
    }

    info!(
        "exiting user {} from {}...",
        user.user_number, user.scenario_name
    );
}
