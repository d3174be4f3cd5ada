//! Scenario definitions and the per-scenario executor.
//!
//! A [`Scenario`] names a load pattern: an [`ExecutionPlan`], a start offset
//! relative to the global test start, a tag set stamped onto every metric the
//! scenario records, and the journey its virtual users iterate.
//!
//! The executor walks the scenario through `Pending`, `Running`, `Draining`,
//! and `Done`, spawning and retiring virtual users once per scheduling tick
//! to track the plan's target concurrency.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

use crate::identity::IdentityPool;
use crate::metrics::MetricSink;
use crate::plan::{ExecutionPlan, ScenarioPhase};
use crate::user::{user_main, UserCommand, VirtualUser};
use crate::util;
use crate::StampedeError;

// How often the executor recomputes its target concurrency. Fine enough that
// commanded concurrency tracks the plan within one tick's error.
const SCHEDULER_TICK_MS: u64 = 250;

// Slice used while waiting out a start offset, so a cancel interrupts
// promptly.
const PENDING_SLEEP_MS: u64 = 500;

/// The function virtual users invoke once per iteration.
pub type IterationFunction = Arc<
    dyn for<'r> Fn(&'r mut VirtualUser) -> Pin<Box<dyn Future<Output = ()> + Send + 'r>>
        + Send
        + Sync,
>;

/// Shorthand to wrap an async function into an [`IterationFunction`].
///
/// # Example
/// ```rust
/// use stampede::iteration;
/// use stampede::user::VirtualUser;
///
/// async fn browse(user: &mut VirtualUser) {
///     let _response = user.get_with_bearer("/api/v1/get-user-banners", "token").await;
/// }
///
/// let function = iteration!(browse);
/// ```
#[macro_export]
macro_rules! iteration {
    ($function:ident) => {
        $crate::scenario::Scenario::wrap(std::sync::Arc::new(move |user| {
            std::boxed::Box::pin($function(user))
        }))
    };
}

/// One named load pattern within a load test.
#[derive(Clone)]
pub struct Scenario {
    /// The scenario name, also stamped as the `scenario` tag.
    pub name: String,
    /// How the scenario schedules its virtual users.
    pub plan: ExecutionPlan,
    /// Delay relative to the global test start before the scenario runs.
    pub start_offset: Duration,
    /// Tags attached to every metric the scenario's users record.
    pub tags: BTreeMap<String, String>,
    /// Optional think-time range override, in milliseconds.
    pub(crate) think_time: Option<(u64, u64)>,
    /// The journey each virtual user iterates.
    pub(crate) iteration: IterationFunction,
}

impl Scenario {
    /// Create a new scenario. The `scenario` tag is set to the name
    /// automatically.
    ///
    /// # Example
    /// ```rust
    /// use std::time::Duration;
    /// use stampede::iteration;
    /// use stampede::journey::run_iteration;
    /// use stampede::plan::ExecutionPlan;
    /// use stampede::scenario::Scenario;
    ///
    /// let scenario = Scenario::new(
    ///     "light_load",
    ///     ExecutionPlan::Constant {
    ///         users: 50,
    ///         duration: Duration::from_secs(60),
    ///     },
    ///     iteration!(run_iteration),
    /// );
    /// ```
    pub fn new(name: &str, plan: ExecutionPlan, iteration: IterationFunction) -> Self {
        let mut tags = BTreeMap::new();
        tags.insert("scenario".to_string(), name.to_string());
        Scenario {
            name: name.to_string(),
            plan,
            start_offset: Duration::from_secs(0),
            tags,
            think_time: None,
            iteration,
        }
    }

    /// Identity helper giving `iteration!` a coercion site.
    pub fn wrap(function: IterationFunction) -> IterationFunction {
        function
    }

    /// Delay the scenario's start relative to the global test start.
    pub fn set_start_offset(mut self, offset: Duration) -> Self {
        self.start_offset = offset;
        self
    }

    /// Attach an extra tag to every metric the scenario records.
    pub fn set_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    /// Override the think-time range slept between iterations.
    pub fn set_wait_time(mut self, min_wait: Duration, max_wait: Duration) -> Result<Self, StampedeError> {
        if min_wait > max_wait {
            return Err(StampedeError::InvalidWaitTime {
                min_wait,
                max_wait,
                detail: "set_wait_time requires min_wait <= max_wait".to_string(),
            });
        }
        self.think_time = Some((min_wait.as_millis() as u64, max_wait.as_millis() as u64));
        Ok(self)
    }
}

// Shared state the orchestrator hands to every scenario executor.
#[derive(Clone)]
pub(crate) struct ScenarioContext {
    pub(crate) base_url: Url,
    pub(crate) sink: MetricSink,
    pub(crate) identities: Arc<IdentityPool>,
    // Default think-time range when the scenario doesn't override it.
    pub(crate) think_time: (u64, u64),
    pub(crate) base_seed: u64,
    // Next unique user number across all scenarios.
    pub(crate) next_user_number: Arc<AtomicUsize>,
    // Commanded users across all scenarios, bounded by max_users.
    pub(crate) active_users: Arc<AtomicUsize>,
    pub(crate) max_users: usize,
}

// Log and apply a phase transition.
fn set_phase(name: &str, phase: &mut ScenarioPhase, new_phase: ScenarioPhase) {
    debug!("{}: phase {:?} -> {:?}", name, phase, new_phase);
    *phase = new_phase;
}

/// Run one scenario from `Pending` to `Done`.
pub(crate) async fn scenario_main(scenario: Scenario, context: ScenarioContext) {
    let mut phase = ScenarioPhase::Pending;

    // Pending: wait out the start offset, in slices so a cancel interrupts.
    if !scenario.start_offset.is_zero() {
        info!(
            "{}: starting in {:?}...",
            scenario.name, scenario.start_offset
        );
    }
    let mut remaining = scenario.start_offset;
    while !remaining.is_zero() {
        if crate::canceled() {
            set_phase(&scenario.name, &mut phase, ScenarioPhase::Done);
            info!("{}: canceled before starting", scenario.name);
            return;
        }
        let slice = remaining.min(Duration::from_millis(PENDING_SLEEP_MS));
        tokio::time::sleep(slice).await;
        remaining = remaining.saturating_sub(slice);
    }

    set_phase(&scenario.name, &mut phase, ScenarioPhase::Running);
    info!("{}: running...", scenario.name);

    let think_time = scenario.think_time.unwrap_or(context.think_time);
    let started = Instant::now();
    let total_duration = scenario.plan.total_duration();
    let mut users: Vec<tokio::task::JoinHandle<()>> = Vec::new();
    let mut user_channels: Vec<flume::Sender<UserCommand>> = Vec::new();
    let mut drift_timer = tokio::time::Instant::now();

    loop {
        if crate::canceled() {
            info!("{}: canceled, draining early...", scenario.name);
            break;
        }
        let elapsed = started.elapsed();
        if elapsed >= total_duration {
            break;
        }

        let target = scenario.plan.target_at(elapsed);
        let current = user_channels.len();
        if target > current {
            // Spawn up toward the target, respecting the global ceiling.
            let headroom = context
                .max_users
                .saturating_sub(context.active_users.load(Ordering::SeqCst));
            let spawning = (target - current).min(headroom);
            if spawning < target - current {
                debug!(
                    "{}: user ceiling {} reached, spawning {} of {}",
                    scenario.name,
                    context.max_users,
                    spawning,
                    target - current
                );
            }
            for _ in 0..spawning {
                let user_number = context.next_user_number.fetch_add(1, Ordering::SeqCst);
                match VirtualUser::new(
                    user_number,
                    &scenario.name,
                    scenario.tags.clone(),
                    context.base_url.clone(),
                    context.sink.clone(),
                    context.identities.clone(),
                    think_time,
                    context.base_seed.wrapping_add(user_number as u64),
                ) {
                    Ok(user) => {
                        let (sender, receiver) = flume::unbounded();
                        context.active_users.fetch_add(1, Ordering::SeqCst);
                        users.push(tokio::spawn(user_main(
                            user,
                            scenario.iteration.clone(),
                            receiver,
                        )));
                        user_channels.push(sender);
                    }
                    Err(e) => {
                        error!("{}: failed to create user: {}", scenario.name, e);
                    }
                }
            }
        } else if target < current {
            // Retire the most recently spawned users down to the target.
            for _ in 0..(current - target) {
                if let Some(channel) = user_channels.pop() {
                    let _ = channel.send(UserCommand::Exit);
                    context.active_users.fetch_sub(1, Ordering::SeqCst);
                }
            }
        }

        drift_timer =
            util::sleep_minus_drift(Duration::from_millis(SCHEDULER_TICK_MS), drift_timer).await;
    }

    // Draining: no new iterations start; in-flight iterations finish.
    set_phase(&scenario.name, &mut phase, ScenarioPhase::Draining);
    info!(
        "{}: draining {} user(s)...",
        scenario.name,
        user_channels.len()
    );
    for channel in user_channels.drain(..) {
        let _ = channel.send(UserCommand::Exit);
        context.active_users.fetch_sub(1, Ordering::SeqCst);
    }
    for result in futures::future::join_all(users).await {
        if let Err(e) = result {
            error!("{}: user task failed: {}", scenario.name, e);
        }
    }

    set_phase(&scenario.name, &mut phase, ScenarioPhase::Done);
    info!("{}: {:?}", scenario.name, phase);
}
