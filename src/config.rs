//! Functions and structures related to configuring a load test.
//!
//! A load test is configured at run time through the options and flags
//! defined by the [`Configuration`] structure, parsed with
//! [`gumdrop`](https://docs.rs/gumdrop/).

use gumdrop::Options;
use serde::{Deserialize, Serialize};
use simplelog::*;
use std::path::PathBuf;

use crate::util;
use crate::StampedeError;

/// The users file consulted when `--users-file` isn't set.
pub const DEFAULT_USERS_FILE: &str = "users.txt";

// Think-time bounds applied when not otherwise configured: 1 to 3 seconds,
// simulating realistic pauses between user actions.
const DEFAULT_THINK_TIME_MIN_MS: u64 = 1_000;
const DEFAULT_THINK_TIME_MAX_MS: u64 = 3_000;

// Commanded users across all scenarios never exceed this unless raised with
// --max-users.
const DEFAULT_MAX_USERS: usize = 1_000;

/// Runtime options available when launching a load test.
#[derive(Options, Debug, Clone, Default, Serialize, Deserialize)]
#[options(
    help = r#"Stampede drives scenario-based load against an HTTP API, aggregates
latency/error/throughput metrics, and gates the run on configurable thresholds.

The following runtime options are available when launching a load test:"#
)]
pub struct Configuration {
    /// Displays this help
    #[options(short = "h")]
    pub help: bool,
    /// Prints version information
    #[options(short = "V")]
    pub version: bool,
    /// Lists all scenarios and exits
    // Add a blank line after this option
    #[options(short = "l", help = "Lists all scenarios and exits\n")]
    pub list: bool,

    /// Defines host to load test (ie http://localhost:3000)
    #[options(short = "H")]
    pub host: String,
    /// Sets newline-delimited test identity file (default: users.txt)
    #[options(no_short, meta = "NAME")]
    pub users_file: String,
    /// Runs only the named scenario, immediately
    #[options(no_short, meta = "NAME")]
    pub scenario: String,
    /// Replaces the selected scenario's plan (ie "100,1m;0,30s")
    #[options(no_short, meta = "PLAN")]
    pub stages: String,
    /// Caps commanded users across all scenarios (default: 1000)
    #[options(no_short, meta = "COUNT")]
    pub max_users: Option<usize>,
    /// Sets minimum think time between iterations (milliseconds)
    #[options(no_short, meta = "MS")]
    pub think_time_min: Option<u64>,
    /// Sets maximum think time between iterations (milliseconds)
    #[options(no_short, meta = "MS")]
    pub think_time_max: Option<u64>,
    /// Seeds the random source for reproducible runs
    #[options(no_short, meta = "SEED")]
    pub seed: Option<u64>,

    /// Fails thresholds that matched no samples
    #[options(no_short)]
    pub strict_thresholds: bool,
    /// Doesn't display metrics at end of load test
    #[options(no_short)]
    pub no_print_metrics: bool,
    /// Creates a json-formatted report file
    #[options(no_short, meta = "NAME")]
    pub report_file: String,

    /// Enables log file and sets name
    #[options(no_short, meta = "NAME")]
    pub log_file: String,
    /// Increases file log level (-g, -gg, etc)
    #[options(short = "g", count)]
    pub log_level: u8,
    /// Decreases verbosity (-q, -qq, etc)
    #[options(count, short = "q", help = "Decreases verbosity (-q, -qq, etc)")]
    pub quiet: u8,
    /// Increases verbosity (-v, -vv, etc)
    #[options(count, short = "v")]
    pub verbose: u8,
}

impl Configuration {
    /// Confirm the configuration is internally consistent before starting.
    pub(crate) fn validate(&self) -> Result<(), StampedeError> {
        // A host is required and must parse as a URL.
        if self.host.is_empty() {
            return Err(StampedeError::InvalidOption {
                option: "--host".to_string(),
                value: self.host.clone(),
                detail: "a host must be defined via the --host option (ie http://localhost:3000)"
                    .to_string(),
            });
        }
        util::is_valid_host(&self.host)?;

        let (think_time_min, think_time_max) = self.think_time();
        if think_time_min > think_time_max {
            return Err(StampedeError::InvalidWaitTime {
                min_wait: std::time::Duration::from_millis(think_time_min),
                max_wait: std::time::Duration::from_millis(think_time_max),
                detail: "--think-time-min must not exceed --think-time-max".to_string(),
            });
        }

        if self.max_users == Some(0) {
            return Err(StampedeError::InvalidOption {
                option: "--max-users".to_string(),
                value: "0".to_string(),
                detail: "--max-users must allow at least 1 user".to_string(),
            });
        }

        // Replacement stages only make sense against a single scenario.
        if !self.stages.is_empty() && self.scenario.is_empty() {
            return Err(StampedeError::InvalidOption {
                option: "--stages".to_string(),
                value: self.stages.clone(),
                detail: "--stages requires --scenario to name the scenario it replaces".to_string(),
            });
        }

        Ok(())
    }

    /// The effective think-time range, in milliseconds.
    pub(crate) fn think_time(&self) -> (u64, u64) {
        (
            self.think_time_min.unwrap_or(DEFAULT_THINK_TIME_MIN_MS),
            self.think_time_max.unwrap_or(DEFAULT_THINK_TIME_MAX_MS),
        )
    }

    /// The effective global user ceiling.
    pub(crate) fn user_ceiling(&self) -> usize {
        self.max_users.unwrap_or(DEFAULT_MAX_USERS)
    }

    /// The effective users file path.
    pub(crate) fn users_file(&self) -> &str {
        if self.users_file.is_empty() {
            DEFAULT_USERS_FILE
        } else {
            &self.users_file
        }
    }

    /// Initialize the logger, writing to standard out and optionally to a
    /// configurable log file.
    pub(crate) fn initialize_logger(&self) {
        // Configure stdout output level.
        let debug_level = match self.verbose {
            0 => match self.quiet {
                0 => LevelFilter::Info,
                1 => LevelFilter::Warn,
                _ => LevelFilter::Error,
            },
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Configure log file level.
        let log_level = match self.log_level {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Open the log file if configured.
        let log_file: Option<PathBuf> = if !self.log_file.is_empty() {
            Some(PathBuf::from(&self.log_file))
        } else {
            None
        };

        if let Some(log_to_file) = log_file {
            let file = match std::fs::File::create(&log_to_file) {
                Ok(file) => file,
                Err(e) => {
                    eprintln!("failed to create log_file ({}): {}", log_to_file.display(), e);
                    return;
                }
            };
            match CombinedLogger::init(vec![
                SimpleLogger::new(debug_level, Config::default()),
                WriteLogger::new(log_level, Config::default(), file),
            ]) {
                Ok(_) => (),
                Err(e) => {
                    info!("failed to initialize CombinedLogger: {}", e);
                }
            }
            info!("Writing to log file: {}", log_to_file.display());
        } else {
            match CombinedLogger::init(vec![SimpleLogger::new(debug_level, Config::default())]) {
                Ok(_) => (),
                Err(e) => {
                    info!("failed to initialize CombinedLogger: {}", e);
                }
            }
        }

        info!("Output verbosity level: {}", debug_level);
        info!("Logfile verbosity level: {}", log_level);
    }
}
