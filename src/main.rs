//! Load test for the authentication-and-dashboard API.
//!
//! Drives three scenarios of increasing intensity against the target host,
//! walking the full profile → login → dashboard journey, and gates the run
//! on per-scenario latency, error-rate, and throughput thresholds. The
//! process exits 0 when every threshold holds, 1 when any fails, and 2 on a
//! startup error.

use stampede::iteration;
use stampede::journey::{self, run_iteration};
use stampede::plan::{ExecutionPlan, Stage};
use stampede::scenario::Scenario;
use stampede::user::{HTTP_REQS, HTTP_REQ_DURATION};
use stampede::util::parse_timespan;
use stampede::{LoadTest, StampedeError};

// The per-call latency trends gated per scenario, plus the engine-level
// request duration.
const LATENCY_TRENDS: &[&str] = &[
    journey::GET_USER_TREND,
    journey::LOGIN_TREND,
    journey::ACCOUNTS_TREND,
    journey::DEBIT_CARDS_TREND,
    journey::SAVED_ACCOUNTS_TREND,
    journey::BANNERS_TREND,
    HTTP_REQ_DURATION,
];

// Per-scenario gates: (scenario, p95 bound in ms, error-rate bound,
// per-second floor for transactions and requests).
const SCENARIO_GATES: &[(&str, &str, &str, &str)] = &[
    ("light_load", "300", "0.01", "1"),
    ("normal_load", "3000", "0.03", "10"),
    ("heavy_load", "8000", "0.05", "30"),
];

// The built-in scenario table: a constant warm-up, a moderate ramp, and a
// heavy ramp, staggered so each begins as the previous one winds down.
fn journey_scenarios() -> Vec<Scenario> {
    vec![
        Scenario::new(
            "light_load",
            ExecutionPlan::Constant {
                users: 50,
                duration: parse_timespan("1m"),
            },
            iteration!(run_iteration),
        ),
        Scenario::new(
            "normal_load",
            ExecutionPlan::Ramping {
                start_users: 0,
                stages: vec![
                    Stage::new(parse_timespan("1m"), 100),
                    Stage::new(parse_timespan("2m"), 200),
                    Stage::new(parse_timespan("1m"), 0),
                ],
            },
            iteration!(run_iteration),
        )
        .set_start_offset(parse_timespan("1m5s")),
        Scenario::new(
            "heavy_load",
            ExecutionPlan::Ramping {
                start_users: 0,
                stages: vec![
                    Stage::new(parse_timespan("2m"), 200),
                    Stage::new(parse_timespan("3m"), 400),
                    Stage::new(parse_timespan("2m"), 600),
                    Stage::new(parse_timespan("1m"), 0),
                ],
            },
            iteration!(run_iteration),
        )
        .set_start_offset(parse_timespan("5m15s")),
    ]
}

fn build_load_test() -> Result<LoadTest, StampedeError> {
    let mut load_test = LoadTest::initialize()?;
    for scenario in journey_scenarios() {
        load_test = load_test.register_scenario(scenario);
    }

    for (scenario, p95_bound, error_bound, per_second_floor) in SCENARIO_GATES {
        for trend in LATENCY_TRENDS {
            load_test = load_test.register_threshold(
                &format!("{}{{scenario:{}}}", trend, scenario),
                &format!("p(95)<{}", p95_bound),
            )?;
        }
        load_test = load_test
            .register_threshold(
                &format!("error_rate{{scenario:{}}}", scenario),
                &format!("rate<{}", error_bound),
            )?
            .register_threshold(
                &format!("{}{{scenario:{}}}", journey::TRANSACTION_COUNTER, scenario),
                &format!("rate>{}", per_second_floor),
            )?
            .register_threshold(
                &format!("{}{{scenario:{}}}", HTTP_REQS, scenario),
                &format!("rate>{}", per_second_floor),
            )?;
    }

    Ok(load_test)
}

fn main() {
    let load_test = match build_load_test() {
        Ok(load_test) => load_test,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    if load_test.configuration().version {
        println!("stampede {}", env!("CARGO_PKG_VERSION"));
        return;
    }
    if load_test.configuration().list {
        println!("Available scenarios:");
        for scenario in load_test.scenarios() {
            println!(" - {}", scenario.name);
        }
        return;
    }

    match load_test.execute() {
        // The exit code carries the overall threshold verdict.
        Ok(report) => {
            if !report.success {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }
}
