use httpmock::prelude::*;
use serial_test::serial;
use std::collections::BTreeMap;
use std::time::Duration;

mod common;

use stampede::journey;
use stampede::metrics::MetricSnapshot;
use stampede::report::LoadTestReport;
use stampede::LoadTest;

// Run a one-user, one-second journey load test against the mock server.
fn run_journey_test(server: &MockServer) -> LoadTestReport {
    let configuration = common::build_configuration(server, vec![]);
    LoadTest::initialize_with_config(configuration)
        .unwrap()
        .register_scenario(common::constant_scenario(
            "journey_test",
            1,
            Duration::from_secs(1),
        ))
        .execute()
        .unwrap()
}

// Total of a counter across all tags, defaulting to 0 when never recorded.
fn counter(snapshot: &MetricSnapshot, name: &str) -> u64 {
    snapshot
        .counter_total(name, &BTreeMap::new())
        .unwrap_or(0.0) as u64
}

// Sample count of a trend across all tags, defaulting to 0.
fn trend_count(snapshot: &MetricSnapshot, name: &str) -> usize {
    snapshot
        .trends
        .iter()
        .filter(|trend| trend.key.name == name)
        .map(|trend| trend.count)
        .sum()
}

#[test]
#[serial]
// All six calls succeed: every iteration is a complete transaction, and the
// funnel counters all agree.
fn test_full_chain_counts_transactions() {
    let server = MockServer::start();
    let mocks = common::mock_journey(&server);

    let report = run_journey_test(&server);
    let snapshot = &report.metrics;

    let iterations = mocks.profile.hits() as u64;
    assert!(iterations > 0);

    // Every call in the chain ran once per iteration.
    assert_eq!(mocks.login.hits() as u64, iterations);
    assert_eq!(mocks.accounts.hits() as u64, iterations);
    assert_eq!(mocks.debit_cards.hits() as u64, iterations);
    assert_eq!(mocks.saved_accounts.hits() as u64, iterations);
    assert_eq!(mocks.banners.hits() as u64, iterations);

    // Every success counter matches, and every iteration was a transaction.
    assert_eq!(counter(snapshot, journey::SUCCESSFUL_GET_USER), iterations);
    assert_eq!(counter(snapshot, journey::SUCCESSFUL_LOGIN), iterations);
    assert_eq!(
        counter(snapshot, journey::SUCCESSFUL_GET_USER_ACCOUNTS),
        iterations
    );
    assert_eq!(
        counter(snapshot, journey::SUCCESSFUL_GET_USER_BANNERS),
        iterations
    );
    assert_eq!(counter(snapshot, journey::TRANSACTION_COUNTER), iterations);

    // Six requests per iteration were recorded by the engine.
    assert_eq!(counter(snapshot, "http_reqs"), iterations * 6);
    assert_eq!(trend_count(snapshot, "http_req_duration"), iterations as usize * 6);

    // Each call fed its own latency trend.
    assert_eq!(trend_count(snapshot, journey::GET_USER_TREND), iterations as usize);
    assert_eq!(trend_count(snapshot, journey::LOGIN_TREND), iterations as usize);

    // Nothing failed.
    let error_fraction = snapshot
        .rate_fraction(journey::ERROR_RATE, &BTreeMap::new())
        .unwrap();
    assert!(error_fraction < f64::EPSILON);

    // Order-statistic sanity on a real trend.
    for trend in &snapshot.trends {
        assert!(trend.p95 >= trend.median);
        assert!(trend.p95 <= trend.maximum);
    }
}

#[test]
#[serial]
// A failed profile fetch short-circuits login and everything after it.
fn test_profile_failure_short_circuits_login() {
    let server = MockServer::start();
    let profile = common::mock_failing(&server, POST, journey::PROFILE_PATH);
    let login = common::mock_login_ok(&server);

    let report = run_journey_test(&server);
    let snapshot = &report.metrics;

    let iterations = profile.hits() as u64;
    assert!(iterations > 0);

    // Login was never attempted; no transaction was counted.
    assert_eq!(login.hits(), 0);
    assert_eq!(counter(snapshot, journey::SUCCESSFUL_GET_USER), 0);
    assert_eq!(counter(snapshot, journey::SUCCESSFUL_LOGIN), 0);
    assert_eq!(counter(snapshot, journey::TRANSACTION_COUNTER), 0);

    // The profile latency was still recorded, and every trial failed:
    // exactly one error per iteration.
    assert_eq!(trend_count(snapshot, journey::GET_USER_TREND), iterations as usize);
    let errors = snapshot
        .rates
        .iter()
        .filter(|rate| rate.key.name == journey::ERROR_RATE)
        .map(|rate| (rate.nonzero, rate.total))
        .fold((0, 0), |(nonzero, total), (n, t)| (nonzero + n, total + t));
    assert_eq!(errors, (iterations, iterations));
}

#[test]
#[serial]
// A failed login skips all four dashboard fetches.
fn test_login_failure_skips_resources() {
    let server = MockServer::start();
    let profile = common::mock_profile_ok(&server);
    let _login = common::mock_failing(&server, POST, journey::LOGIN_PATH);
    let accounts = common::mock_resource_ok(&server, journey::ACCOUNTS_PATH);
    let banners = common::mock_resource_ok(&server, journey::BANNERS_PATH);

    let report = run_journey_test(&server);
    let snapshot = &report.metrics;

    let iterations = profile.hits() as u64;
    assert!(iterations > 0);

    assert_eq!(accounts.hits(), 0);
    assert_eq!(banners.hits(), 0);
    assert_eq!(counter(snapshot, journey::SUCCESSFUL_GET_USER), iterations);
    assert_eq!(counter(snapshot, journey::SUCCESSFUL_LOGIN), 0);
    assert_eq!(counter(snapshot, journey::TRANSACTION_COUNTER), 0);
}

#[test]
#[serial]
// Three of four dashboard fetches succeeding is still not a transaction.
fn test_resource_failure_blocks_transaction() {
    let server = MockServer::start();
    let mocks = common::JourneyMocks {
        profile: common::mock_profile_ok(&server),
        login: common::mock_login_ok(&server),
        accounts: common::mock_resource_ok(&server, journey::ACCOUNTS_PATH),
        debit_cards: common::mock_resource_ok(&server, journey::DEBIT_CARDS_PATH),
        saved_accounts: common::mock_resource_ok(&server, journey::SAVED_ACCOUNTS_PATH),
        banners: common::mock_failing(&server, GET, journey::BANNERS_PATH),
    };

    let report = run_journey_test(&server);
    let snapshot = &report.metrics;

    let iterations = mocks.profile.hits() as u64;
    assert!(iterations > 0);

    // All four fetches still ran: they are independent of each other.
    assert_eq!(mocks.accounts.hits() as u64, iterations);
    assert_eq!(mocks.debit_cards.hits() as u64, iterations);
    assert_eq!(mocks.saved_accounts.hits() as u64, iterations);
    assert_eq!(mocks.banners.hits() as u64, iterations);

    // The three healthy fetches counted; the chain never did.
    assert_eq!(
        counter(snapshot, journey::SUCCESSFUL_GET_USER_ACCOUNTS),
        iterations
    );
    assert_eq!(
        counter(snapshot, journey::SUCCESSFUL_GET_USER_SAVED_ACCOUNTS),
        iterations
    );
    assert_eq!(counter(snapshot, journey::SUCCESSFUL_GET_USER_BANNERS), 0);
    assert_eq!(counter(snapshot, journey::TRANSACTION_COUNTER), 0);

    // One failed trial out of six per iteration.
    let error_fraction = snapshot
        .rate_fraction(journey::ERROR_RATE, &BTreeMap::new())
        .unwrap();
    assert!((error_fraction - 1.0 / 6.0).abs() < 1e-9);

    // Funnel monotonicity: transactions <= logins <= profile fetches.
    let transactions = counter(snapshot, journey::TRANSACTION_COUNTER);
    let logins = counter(snapshot, journey::SUCCESSFUL_LOGIN);
    let profiles = counter(snapshot, journey::SUCCESSFUL_GET_USER);
    assert!(transactions <= logins);
    assert!(logins <= profiles);
}

#[test]
#[serial]
// A 200 with an unparseable body is a failed check, never a crash.
fn test_malformed_body_fails_check() {
    let server = MockServer::start();
    let profile = common::mock_profile_ok(&server);
    let login = server.mock(|when, then| {
        when.method(POST).path(journey::LOGIN_PATH);
        then.status(200).body("this is not json");
    });
    let accounts = common::mock_resource_ok(&server, journey::ACCOUNTS_PATH);

    let report = run_journey_test(&server);
    let snapshot = &report.metrics;

    let iterations = profile.hits() as u64;
    assert!(iterations > 0);
    assert_eq!(login.hits() as u64, iterations);

    // The malformed login never yielded a token, so no fetches ran.
    assert_eq!(accounts.hits(), 0);
    assert_eq!(counter(snapshot, journey::SUCCESSFUL_LOGIN), 0);
    assert_eq!(counter(snapshot, journey::TRANSACTION_COUNTER), 0);
    // The login latency was still recorded.
    assert_eq!(trend_count(snapshot, journey::LOGIN_TREND), iterations as usize);
}
