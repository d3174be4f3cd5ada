//! Execution plans: how a scenario schedules its virtual users over time.
//!
//! A plan is either a fixed number of users held for a fixed duration, or a
//! ramp through an ordered list of stages with linear interpolation inside
//! each stage.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::util;
use crate::StampedeError;

/// A single ramping stage: reach `target` users by the end of `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// How long the ramp toward `target` takes.
    pub duration: Duration,
    /// The number of users running exactly when the stage ends.
    pub target: usize,
}

impl Stage {
    /// Create a stage reaching `target` users over `duration`.
    pub fn new(duration: Duration, target: usize) -> Self {
        Stage { duration, target }
    }
}

/// How a scenario schedules its virtual users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionPlan {
    /// A fixed number of users for a fixed duration.
    Constant {
        /// How many users run for the whole duration.
        users: usize,
        /// How long the scenario runs.
        duration: Duration,
    },
    /// A piecewise-linear ramp through the given stages, starting from
    /// `start_users`.
    Ramping {
        /// The number of users running at the instant the scenario starts.
        start_users: usize,
        /// The ordered ramp stages.
        stages: Vec<Stage>,
    },
}

impl ExecutionPlan {
    /// How long the plan runs before the scenario begins draining.
    pub fn total_duration(&self) -> Duration {
        match self {
            ExecutionPlan::Constant { duration, .. } => *duration,
            ExecutionPlan::Ramping { stages, .. } => stages
                .iter()
                .fold(Duration::from_secs(0), |total, stage| total + stage.duration),
        }
    }

    /// The target number of users at `elapsed` since the scenario started.
    ///
    /// Within a ramping stage the target is linearly interpolated between the
    /// previous stage's target (or `start_users`) and the stage's own target;
    /// the stage target is reached exactly when its duration ends. At an
    /// elapsed of zero the target equals the starting value. Past the end of
    /// the plan the final target is returned.
    pub fn target_at(&self, elapsed: Duration) -> usize {
        match self {
            ExecutionPlan::Constant { users, .. } => *users,
            ExecutionPlan::Ramping {
                start_users,
                stages,
            } => {
                let mut from = *start_users;
                let mut offset = Duration::from_secs(0);
                for stage in stages {
                    // A zero-duration stage jumps straight to its target.
                    let end = offset + stage.duration;
                    if elapsed < end {
                        let progress =
                            (elapsed - offset).as_secs_f64() / stage.duration.as_secs_f64();
                        let interpolated = from as f64
                            + (stage.target as f64 - from as f64) * progress;
                        return interpolated.round() as usize;
                    }
                    from = stage.target;
                    offset = end;
                }
                from
            }
        }
    }

    /// The largest target the plan ever commands, used to validate global
    /// user ceilings.
    pub fn peak_users(&self) -> usize {
        match self {
            ExecutionPlan::Constant { users, .. } => *users,
            ExecutionPlan::Ramping {
                start_users,
                stages,
            } => stages
                .iter()
                .map(|stage| stage.target)
                .chain(std::iter::once(*start_users))
                .max()
                .unwrap_or(0),
        }
    }
}

/// Implement [`FromStr`] to convert `"users,timespan"` strings into an
/// [`ExecutionPlan`].
///
/// A single segment, for example `"50,1m"`, becomes a constant plan of 50
/// users for one minute. Multiple segments split by semicolons, for example
/// `"100,1m;200,2m;0,1m"`, become a ramping plan starting from 0 users.
///
/// Time spans can be an integer number of seconds, or integers with one or
/// more of "h", "m", and "s": 20, 20s, 3m, 2h, 1h20m, 3h30m10s, etc.
impl FromStr for ExecutionPlan {
    type Err = StampedeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let re = Regex::new(r"^\s*(\d+)\s*,\s*(\d+|((\d+?)h)?((\d+?)m)?((\d+?)s)?)\s*$")
            .expect("failed to compile plan segment regex");
        let mut stages: Vec<Stage> = Vec::new();
        for segment in s.split(';') {
            if let Some(capture) = re.captures(segment) {
                let target = capture[1]
                    .parse::<usize>()
                    .expect("failed to convert \\d to usize");
                let duration = util::parse_timespan(&capture[2]);
                stages.push(Stage { duration, target });
            } else {
                return Err(StampedeError::InvalidOption {
                    option: "`configuration.stages`".to_string(),
                    value: segment.to_string(),
                    detail:
                        "expected format: \"{users},{timespan}\" segments split by \";\", ie \"100,1m;0,30s\""
                            .to_string(),
                });
            }
        }
        // The split above always yields at least one segment, and invalid
        // segments error out, so one or more stages remain here.
        if stages.len() == 1 {
            Ok(ExecutionPlan::Constant {
                users: stages[0].target,
                duration: stages[0].duration,
            })
        } else {
            Ok(ExecutionPlan::Ramping {
                start_users: 0,
                stages,
            })
        }
    }
}

/// A scenario moves through each of the following phases during a load test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScenarioPhase {
    /// Waiting for the scenario's start offset to elapse.
    Pending,
    /// Virtual users are being spawned and retired to track the plan.
    Running,
    /// The plan has ended; in-flight iterations finish, no new ones start.
    Draining,
    /// All virtual users have exited.
    Done,
}
