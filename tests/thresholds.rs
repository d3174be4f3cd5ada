use httpmock::prelude::*;
use serial_test::serial;
use std::time::Duration;

mod common;

use stampede::journey;
use stampede::threshold::ThresholdVerdict;
use stampede::LoadTest;

#[test]
#[serial]
// Thresholds are evaluated once at run end against the aggregated snapshot,
// and a single failing threshold fails the whole run.
fn test_threshold_verdicts_gate_the_run() {
    let server = MockServer::start();
    let _mocks = common::mock_journey(&server);

    let configuration = common::build_configuration(&server, vec![]);
    let report = LoadTest::initialize_with_config(configuration)
        .unwrap()
        .register_scenario(common::constant_scenario(
            "gate_test",
            1,
            Duration::from_secs(1),
        ))
        // Generous latency bound against a local mock: passes.
        .register_threshold(journey::LOGIN_TREND, "p(95)<10000")
        .unwrap()
        // Nothing fails against healthy mocks: passes.
        .register_threshold(journey::ERROR_RATE, "rate<0.01")
        .unwrap()
        // At least one full chain completed: passes.
        .register_threshold(journey::TRANSACTION_COUNTER, "count>=1")
        .unwrap()
        // An error rate above one half is impossible here: fails.
        .register_threshold(journey::ERROR_RATE, "rate>0.5")
        .unwrap()
        .execute()
        .unwrap();

    assert_eq!(report.thresholds.len(), 4);

    let verdict_for = |metric: &str, expression_contains: &str| {
        report
            .thresholds
            .iter()
            .find(|result| {
                result.threshold.metric == metric
                    && result.threshold.to_string().contains(expression_contains)
            })
            .map(|result| result.verdict)
            .unwrap()
    };

    assert_eq!(
        verdict_for(journey::LOGIN_TREND, "p(95)<10000"),
        ThresholdVerdict::Passed
    );
    assert_eq!(
        verdict_for(journey::ERROR_RATE, "rate<0.01"),
        ThresholdVerdict::Passed
    );
    assert_eq!(
        verdict_for(journey::TRANSACTION_COUNTER, "count>=1"),
        ThresholdVerdict::Passed
    );
    assert_eq!(
        verdict_for(journey::ERROR_RATE, "rate>0.5"),
        ThresholdVerdict::Failed
    );

    // One failure fails the run.
    assert!(!report.success);
}

#[test]
#[serial]
// A threshold whose selector matches no samples is skipped by default.
fn test_missing_samples_skipped_by_default() {
    let server = MockServer::start();
    let _mocks = common::mock_journey(&server);

    let configuration = common::build_configuration(&server, vec![]);
    let report = LoadTest::initialize_with_config(configuration)
        .unwrap()
        .register_scenario(common::constant_scenario(
            "skip_test",
            1,
            Duration::from_secs(1),
        ))
        .register_threshold(journey::ERROR_RATE, "rate<0.01")
        .unwrap()
        // Tagged for a scenario that never ran: no data.
        .register_threshold(
            "login_response_time{scenario:not_running}",
            "p(95)<300",
        )
        .unwrap()
        .execute()
        .unwrap();

    let verdicts: Vec<ThresholdVerdict> = report
        .thresholds
        .iter()
        .map(|result| result.verdict)
        .collect();
    assert!(verdicts.contains(&ThresholdVerdict::Passed));
    assert!(verdicts.contains(&ThresholdVerdict::NoData));

    // Skipped, not failed.
    assert!(report.success);
}

#[test]
#[serial]
// With --strict-thresholds the same missing selector fails the run.
fn test_missing_samples_fail_when_strict() {
    let server = MockServer::start();
    let _mocks = common::mock_journey(&server);

    let configuration = common::build_configuration(&server, vec!["--strict-thresholds"]);
    let report = LoadTest::initialize_with_config(configuration)
        .unwrap()
        .register_scenario(common::constant_scenario(
            "strict_test",
            1,
            Duration::from_secs(1),
        ))
        .register_threshold(
            "login_response_time{scenario:not_running}",
            "p(95)<300",
        )
        .unwrap()
        .execute()
        .unwrap();

    assert_eq!(report.thresholds[0].verdict, ThresholdVerdict::NoData);
    assert!(!report.success);
}
