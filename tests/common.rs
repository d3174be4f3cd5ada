use gumdrop::Options;
use httpmock::prelude::*;
use httpmock::Mock;
use serde_json::json;
use std::time::Duration;

use stampede::config::Configuration;
use stampede::iteration;
use stampede::journey::{self, run_iteration};
use stampede::plan::ExecutionPlan;
use stampede::scenario::Scenario;

/// Not all functions are used by all tests, so we enable allow(dead_code) to
/// avoid compiler warnings during testing.

/// The following options are configured by default, if not set to a custom
/// value:
///  --host <mock-server>
///  --think-time-min 1 / --think-time-max 2 (keep test iterations fast)
///  --seed 42 (deterministic identity selection and think times)
///  --users-file <missing> (force the built-in fallback identities)
///  --no-print-metrics and -q (keep test output readable)
#[allow(dead_code)]
pub fn build_configuration(server: &MockServer, custom: Vec<&str>) -> Configuration {
    // Start with an empty configuration.
    let mut configuration: Vec<&str> = vec![];
    // Declare server_url here no matter what, so its lifetime is sufficient
    // when needed.
    let server_url = server.base_url();

    // Merge in all custom options first.
    configuration.extend_from_slice(&custom);

    // Default to using the mock server if not otherwise configured.
    if !configuration.contains(&"--host") {
        configuration.extend_from_slice(&["--host", &server_url]);
    }

    // Default to a tiny think time so tests iterate quickly.
    if !configuration.contains(&"--think-time-min") {
        configuration.extend_from_slice(&["--think-time-min", "1"]);
    }
    if !configuration.contains(&"--think-time-max") {
        configuration.extend_from_slice(&["--think-time-max", "2"]);
    }

    // Default to a fixed seed so runs are reproducible.
    if !configuration.contains(&"--seed") {
        configuration.extend_from_slice(&["--seed", "42"]);
    }

    // Default to the built-in fallback identities.
    if !configuration.contains(&"--users-file") {
        configuration.extend_from_slice(&["--users-file", "/nonexistent/stampede-test-users.txt"]);
    }

    // Keep test output readable.
    if !configuration.contains(&"--no-print-metrics") {
        configuration.push("--no-print-metrics");
    }
    if !configuration.contains(&"-q") {
        configuration.push("-qq");
    }

    // Parse these options to generate a Configuration.
    Configuration::parse_args_default(&configuration)
        .expect("failed to parse options and generate a configuration")
}

/// Mocks for all six journey endpoints, healthy by default.
#[allow(dead_code)]
pub struct JourneyMocks<'a> {
    pub profile: Mock<'a>,
    pub login: Mock<'a>,
    pub accounts: Mock<'a>,
    pub debit_cards: Mock<'a>,
    pub saved_accounts: Mock<'a>,
    pub banners: Mock<'a>,
}

/// Stand up healthy mocks for the full journey.
#[allow(dead_code)]
pub fn mock_journey(server: &MockServer) -> JourneyMocks {
    JourneyMocks {
        profile: mock_profile_ok(server),
        login: mock_login_ok(server),
        accounts: mock_resource_ok(server, journey::ACCOUNTS_PATH),
        debit_cards: mock_resource_ok(server, journey::DEBIT_CARDS_PATH),
        saved_accounts: mock_resource_ok(server, journey::SAVED_ACCOUNTS_PATH),
        banners: mock_resource_ok(server, journey::BANNERS_PATH),
    }
}

#[allow(dead_code)]
pub fn mock_profile_ok(server: &MockServer) -> Mock {
    server.mock(|when, then| {
        when.method(POST).path(journey::PROFILE_PATH);
        then.status(200)
            .json_body(json!({"data": {"user_info": {"name": "Test User"}}}));
    })
}

#[allow(dead_code)]
pub fn mock_login_ok(server: &MockServer) -> Mock {
    server.mock(|when, then| {
        when.method(POST).path(journey::LOGIN_PATH);
        then.status(200).json_body(json!({"data": {"token": "test-token"}}));
    })
}

#[allow(dead_code)]
pub fn mock_resource_ok<'a>(server: &'a MockServer, path: &str) -> Mock<'a> {
    let path = path.to_string();
    server.mock(|when, then| {
        when.method(GET).path(path);
        then.status(200).json_body(json!({"data": []}));
    })
}

/// A mock that fails every request to `path` with the given status.
#[allow(dead_code)]
pub fn mock_failing<'a>(server: &'a MockServer, method: httpmock::Method, path: &str) -> Mock<'a> {
    let path = path.to_string();
    server.mock(|when, then| {
        when.method(method).path(path);
        then.status(500).json_body(json!({"error": "internal"}));
    })
}

/// A short constant-concurrency scenario running the built-in journey.
#[allow(dead_code)]
pub fn constant_scenario(name: &str, users: usize, duration: Duration) -> Scenario {
    Scenario::new(
        name,
        ExecutionPlan::Constant { users, duration },
        iteration!(run_iteration),
    )
}
