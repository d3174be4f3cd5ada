//! # Stampede
//!
//! Stampede is a scenario-driven HTTP load-test engine. A load test is built
//! by registering one or more [`Scenario`](./scenario/struct.Scenario.html)s,
//! each pairing an execution plan (constant or ramping concurrency) with a
//! journey its virtual users iterate, and zero or more thresholds that gate
//! the run at the end.
//!
//! While the test runs, every virtual user records latency, error, and
//! throughput observations into a shared metric sink. When all scenarios
//! finish, the aggregated snapshot is checked against the registered
//! thresholds and rendered as a report; the overall verdict drives the
//! process exit code.
//!
//! ## Creating and running a load test
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use gumdrop::Options;
//! use stampede::config::Configuration;
//! use stampede::iteration;
//! use stampede::journey::run_iteration;
//! use stampede::plan::ExecutionPlan;
//! use stampede::scenario::Scenario;
//! use stampede::{LoadTest, StampedeError};
//!
//! fn main() -> Result<(), StampedeError> {
//!     let configuration =
//!         Configuration::parse_args_default(&["--host", "http://localhost:3000"])
//!             .expect("failed to parse options");
//!
//!     let report = LoadTest::initialize_with_config(configuration)?
//!         .register_scenario(Scenario::new(
//!             "smoke",
//!             ExecutionPlan::Constant {
//!                 users: 1,
//!                 duration: Duration::from_secs(10),
//!             },
//!             iteration!(run_iteration),
//!         ))
//!         .register_threshold("error_rate", "rate<0.01")?
//!         .execute()?;
//!
//!     if !report.success {
//!         std::process::exit(1);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Scenarios run concurrently, each starting at its configured offset from
//! the global test start, under a global ceiling on commanded users. A
//! ctrl-c drains all scenarios early; a second ctrl-c exits immediately.
//!
//! ## License
//!
//! Copyright 2026 Stampede contributors
//!
//! Licensed under the Apache License, Version 2.0 (the "License");
//! you may not use this file except in compliance with the License.
//! You may obtain a copy of the License at
//!
//! <http://www.apache.org/licenses/LICENSE-2.0>
//!
//! Unless required by applicable law or agreed to in writing, software
//! distributed under the License is distributed on an "AS IS" BASIS,
//! WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//! See the License for the specific language governing permissions and
//! limitations under the License.

#[macro_use]
extern crate log;

pub mod config;
pub mod identity;
pub mod journey;
pub mod metrics;
pub mod plan;
pub mod report;
pub mod scenario;
pub mod threshold;
pub mod user;
pub mod util;

use chrono::prelude::*;
use gumdrop::Options;
use lazy_static::lazy_static;
use std::str::FromStr;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use std::{fmt, io};
use url::Url;

use crate::config::Configuration;
use crate::identity::IdentityPool;
use crate::metrics::{sink_channel, MetricRegistry};
use crate::plan::ExecutionPlan;
use crate::report::LoadTestReport;
use crate::scenario::{scenario_main, Scenario, ScenarioContext};
use crate::threshold::{evaluate_all, Threshold};

lazy_static! {
    // Flipped by the ctrl-c handler; polled by every scenario executor and
    // thinking virtual user so a stop propagates within a bounded grace
    // period.
    pub(crate) static ref CANCELED: RwLock<bool> = RwLock::new(false);
}

// Whether a global stop has been requested.
pub(crate) fn canceled() -> bool {
    *CANCELED.read().unwrap()
}

/// An enumeration of all errors a [`LoadTest`] can return.
#[derive(Debug)]
pub enum StampedeError {
    /// Wraps a [`std::io::Error`](https://doc.rust-lang.org/std/io/struct.Error.html).
    Io(io::Error),
    /// Wraps a [`reqwest::Error`](https://docs.rs/reqwest/*/reqwest/struct.Error.html).
    Reqwest(reqwest::Error),
    /// Wraps a [`tokio::task::JoinError`](https://docs.rs/tokio/*/tokio/task/struct.JoinError.html).
    TokioJoin(tokio::task::JoinError),
    /// Failed to parse a hostname.
    InvalidHost {
        /// The invalid hostname that caused this error.
        host: String,
        /// An optional explanation of the error.
        detail: String,
        /// Wraps a [`url::ParseError`](https://docs.rs/url/*/url/enum.ParseError.html).
        parse_error: url::ParseError,
    },
    /// Invalid option or value specified, may only be invalid in context.
    InvalidOption {
        /// The invalid option that caused this error.
        option: String,
        /// The invalid value that caused this error.
        value: String,
        /// An optional explanation of the error.
        detail: String,
    },
    /// Invalid think-time range specified.
    InvalidWaitTime {
        /// The specified minimum wait time.
        min_wait: Duration,
        /// The specified maximum wait time.
        max_wait: Duration,
        /// An optional explanation of the error.
        detail: String,
    },
    /// Failed to parse a threshold selector or expression.
    InvalidThreshold {
        /// The offending selector or expression.
        expression: String,
        /// An optional explanation of the error.
        detail: String,
    },
    /// A [`LoadTest`] has no [`Scenario`](./scenario/struct.Scenario.html)
    /// defined.
    NoScenarios {
        /// An optional explanation of the error.
        detail: String,
    },
}

/// Implement a helper to provide a text description of all possible types of
/// errors.
impl StampedeError {
    fn describe(&self) -> &str {
        match *self {
            StampedeError::Io(_) => "io::Error",
            StampedeError::Reqwest(_) => "reqwest::Error",
            StampedeError::TokioJoin(_) => "tokio::task::JoinError",
            StampedeError::InvalidHost { .. } => "failed to parse hostname",
            StampedeError::InvalidOption { .. } => "invalid option or value specified",
            StampedeError::InvalidWaitTime { .. } => "invalid think-time range specified",
            StampedeError::InvalidThreshold { .. } => "failed to parse threshold",
            StampedeError::NoScenarios { .. } => "no scenarios defined",
        }
    }
}

/// Implement format trait to allow displaying errors.
impl fmt::Display for StampedeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            StampedeError::Io(ref source) => {
                write!(f, "StampedeError: {} ({})", self.describe(), source)
            }
            StampedeError::Reqwest(ref source) => {
                write!(f, "StampedeError: {} ({})", self.describe(), source)
            }
            StampedeError::TokioJoin(ref source) => {
                write!(f, "StampedeError: {} ({})", self.describe(), source)
            }
            StampedeError::InvalidHost {
                ref parse_error, ..
            } => write!(f, "StampedeError: {} ({})", self.describe(), parse_error),
            StampedeError::InvalidThreshold { ref detail, .. } => {
                write!(f, "StampedeError: {} ({})", self.describe(), detail)
            }
            _ => write!(f, "StampedeError: {}", self.describe()),
        }
    }
}

// Define the lower level source of this error, if any.
impl std::error::Error for StampedeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            StampedeError::Io(ref source) => Some(source),
            StampedeError::Reqwest(ref source) => Some(source),
            StampedeError::TokioJoin(ref source) => Some(source),
            StampedeError::InvalidHost {
                ref parse_error, ..
            } => Some(parse_error),
            _ => None,
        }
    }
}

/// Auto-convert Reqwest errors.
impl From<reqwest::Error> for StampedeError {
    fn from(err: reqwest::Error) -> StampedeError {
        StampedeError::Reqwest(err)
    }
}

/// Auto-convert IO errors.
impl From<io::Error> for StampedeError {
    fn from(err: io::Error) -> StampedeError {
        StampedeError::Io(err)
    }
}

/// Auto-convert TokioJoin errors.
impl From<tokio::task::JoinError> for StampedeError {
    fn from(err: tokio::task::JoinError) -> StampedeError {
        StampedeError::TokioJoin(err)
    }
}

/// Global internal state for the load test.
pub struct LoadTest {
    /// One copy of each scenario registered for this load test.
    scenarios: Vec<Scenario>,
    /// Thresholds evaluated once, after all scenarios finish.
    thresholds: Vec<Threshold>,
    /// Configuration object holding options set when launching the load test.
    configuration: Configuration,
}

impl LoadTest {
    /// Load configuration from command-line arguments and initialize a
    /// [`LoadTest`].
    pub fn initialize() -> Result<LoadTest, StampedeError> {
        Ok(LoadTest {
            scenarios: Vec::new(),
            thresholds: Vec::new(),
            configuration: Configuration::parse_args_default_or_exit(),
        })
    }

    /// Initialize a [`LoadTest`] with an already loaded configuration.
    ///
    /// This is generally used by tests.
    pub fn initialize_with_config(
        configuration: Configuration,
    ) -> Result<LoadTest, StampedeError> {
        Ok(LoadTest {
            scenarios: Vec::new(),
            thresholds: Vec::new(),
            configuration,
        })
    }

    /// The configuration the load test was initialized with.
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// The scenarios registered so far.
    pub fn scenarios(&self) -> &[Scenario] {
        &self.scenarios
    }

    /// Register a scenario. A load test needs at least one.
    pub fn register_scenario(mut self, scenario: Scenario) -> Self {
        self.scenarios.push(scenario);
        self
    }

    /// Register a threshold from a metric selector and an expression, for
    /// example `("error_rate{scenario:light_load}", "rate<0.01")`.
    pub fn register_threshold(
        mut self,
        selector: &str,
        expression: &str,
    ) -> Result<Self, StampedeError> {
        self.thresholds.push(Threshold::parse(selector, expression)?);
        Ok(self)
    }

    // Apply --scenario and --stages, narrowing and rewriting the registered
    // scenarios.
    fn select_scenarios(&mut self) -> Result<(), StampedeError> {
        if self.configuration.scenario.is_empty() {
            return Ok(());
        }
        let known: Vec<String> = self
            .scenarios
            .iter()
            .map(|scenario| scenario.name.clone())
            .collect();
        let wanted = self.configuration.scenario.clone();
        let selected: Vec<Scenario> = self
            .scenarios
            .drain(..)
            .filter(|scenario| scenario.name == wanted)
            .collect();
        if selected.is_empty() {
            return Err(StampedeError::InvalidOption {
                option: "--scenario".to_string(),
                value: self.configuration.scenario.clone(),
                detail: format!("unknown scenario, expected one of: {}", known.join(", ")),
            });
        }
        // A scenario run on its own starts immediately, whatever offset it
        // carries in the full plan.
        let mut selected: Vec<Scenario> = selected
            .into_iter()
            .map(|scenario| scenario.set_start_offset(Duration::from_secs(0)))
            .collect();
        if !self.configuration.stages.is_empty() {
            let plan = ExecutionPlan::from_str(&self.configuration.stages)?;
            for scenario in &mut selected {
                scenario.plan = plan.clone();
            }
        }
        self.scenarios = selected;
        Ok(())
    }

    /// Execute the load test, returning the final report.
    ///
    /// Runs every registered scenario to completion (or until ctrl-c), then
    /// evaluates thresholds, optionally prints the summary tables, and
    /// optionally writes the JSON report file.
    pub fn execute(mut self) -> Result<LoadTestReport, StampedeError> {
        self.configuration.validate()?;
        self.configuration.initialize_logger();
        util::setup_ctrlc_handler();

        self.select_scenarios()?;
        if self.scenarios.is_empty() {
            return Err(StampedeError::NoScenarios {
                detail: "register at least one scenario before calling execute()".to_string(),
            });
        }

        let base_url =
            Url::parse(&self.configuration.host).map_err(|parse_error| {
                StampedeError::InvalidHost {
                    host: self.configuration.host.clone(),
                    detail: "invalid host".to_string(),
                    parse_error,
                }
            })?;

        let identities = Arc::new(IdentityPool::load(self.configuration.users_file()));
        info!("loaded {} test identities", identities.len());

        let base_seed = match self.configuration.seed {
            Some(seed) => seed,
            None => rand::random(),
        };
        info!("seeding random source: {}", base_seed);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        let report = runtime.block_on(self.run(base_url, identities, base_seed))?;

        if !self.configuration.no_print_metrics {
            println!("{}", report);
        }
        if !self.configuration.report_file.is_empty() {
            report.write_json(&self.configuration.report_file)?;
        }
        if report.success {
            info!("all thresholds passed");
        } else {
            warn!("one or more thresholds failed");
        }

        Ok(report)
    }

    // Start every scenario executor, drain the metric channel until all of
    // them reach Done, then evaluate thresholds against the frozen snapshot.
    async fn run(
        &self,
        base_url: Url,
        identities: Arc<IdentityPool>,
        base_seed: u64,
    ) -> Result<LoadTestReport, StampedeError> {
        let started = Utc::now().to_rfc3339();
        let (sink, metrics_receiver) = sink_channel();
        let mut registry = MetricRegistry::new();

        let context = ScenarioContext {
            base_url,
            sink,
            identities,
            think_time: self.configuration.think_time(),
            base_seed,
            next_user_number: Arc::new(AtomicUsize::new(1)),
            active_users: Arc::new(AtomicUsize::new(0)),
            max_users: self.configuration.user_ceiling(),
        };

        info!(
            "starting {} scenario(s), user ceiling {}",
            self.scenarios.len(),
            context.max_users
        );
        let mut controllers = Vec::new();
        for scenario in &self.scenarios {
            controllers.push(tokio::spawn(scenario_main(
                scenario.clone(),
                context.clone(),
            )));
        }
        // Every sink handle now lives in a scenario executor or one of its
        // users; once they all exit, the receive loop below ends.
        drop(context);

        // The receive loop only ends once every queued observation has been
        // aggregated and the last sender is gone.
        while let Ok(observation) = metrics_receiver.recv_async().await {
            registry.aggregate(observation);
        }
        for controller in controllers {
            controller.await?;
        }

        let snapshot = registry.snapshot();
        let results = evaluate_all(&self.thresholds, &snapshot);
        Ok(LoadTestReport::new(
            started,
            snapshot,
            results,
            self.configuration.strict_thresholds,
        ))
    }
}
