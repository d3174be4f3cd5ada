//! End-of-run reporting: text summary tables and the optional JSON report
//! file.

use num_format::{Locale, ToFormattedString};
use serde::Serialize;
use std::fmt;
use std::io;

use crate::metrics::MetricSnapshot;
use crate::threshold::{all_passed, ThresholdResult, ThresholdVerdict};
use crate::util;
use crate::StampedeError;

// Width of the name column in summary tables; longer names are truncated.
const NAME_WIDTH: usize = 44;

/// Everything a finished load test produced: the frozen metric snapshot, the
/// evaluated thresholds, and the overall verdict.
///
/// Viewing the report with [`std::fmt::Display`] renders the summary tables;
/// [`LoadTestReport::write_json`] writes the same data to a file.
#[derive(Debug, Clone, Serialize)]
pub struct LoadTestReport {
    /// When the load test started, RFC 3339 formatted.
    pub started: String,
    /// Wall-clock seconds the load test ran.
    pub elapsed_seconds: f64,
    /// Whether every evaluated threshold held.
    pub success: bool,
    /// The frozen metric aggregates.
    pub metrics: MetricSnapshot,
    /// Per-threshold verdicts.
    pub thresholds: Vec<ThresholdResult>,
}

impl LoadTestReport {
    pub(crate) fn new(
        started: String,
        metrics: MetricSnapshot,
        thresholds: Vec<ThresholdResult>,
        strict: bool,
    ) -> Self {
        let success = all_passed(&thresholds, strict);
        LoadTestReport {
            started,
            elapsed_seconds: metrics.elapsed_seconds,
            success,
            metrics,
            thresholds,
        }
    }

    /// Write the report as pretty-printed JSON.
    pub fn write_json(&self, path: &str) -> Result<(), StampedeError> {
        let json = serde_json::to_string_pretty(self).map_err(io::Error::from)?;
        std::fs::write(path, json)?;
        info!("wrote json report to: {}", path);
        Ok(())
    }
}

impl fmt::Display for LoadTestReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let horizontal_rule =
            " ------------------------------------------------------------------------------";

        if !self.metrics.trends.is_empty() {
            writeln!(f, "\n === TREND METRICS ===")?;
            writeln!(f, "{}", horizontal_rule)?;
            writeln!(
                f,
                " {:<width$} | {:>9} | {:>9} | {:>6} | {:>6} | {:>6}",
                "Name",
                "# samples",
                "Avg (ms)",
                "Median",
                "p95",
                "Max",
                width = NAME_WIDTH
            )?;
            writeln!(f, "{}", horizontal_rule)?;
            for trend in &self.metrics.trends {
                writeln!(
                    f,
                    " {:<width$} | {:>9} | {:>9.2} | {:>6} | {:>6} | {:>6}",
                    util::truncate_string(&trend.key.to_string(), NAME_WIDTH),
                    trend.count.to_formatted_string(&Locale::en),
                    trend.mean,
                    trend.median,
                    trend.p95,
                    trend.maximum,
                    width = NAME_WIDTH
                )?;
            }
        }

        if !self.metrics.counters.is_empty() {
            writeln!(f, "\n === COUNTER METRICS ===")?;
            writeln!(f, "{}", horizontal_rule)?;
            writeln!(
                f,
                " {:<width$} | {:>12} | {:>10}",
                "Name",
                "Total",
                "Per sec",
                width = NAME_WIDTH
            )?;
            writeln!(f, "{}", horizontal_rule)?;
            for counter in &self.metrics.counters {
                writeln!(
                    f,
                    " {:<width$} | {:>12} | {:>10.2}",
                    util::truncate_string(&counter.key.to_string(), NAME_WIDTH),
                    (counter.total as u64).to_formatted_string(&Locale::en),
                    counter.per_second,
                    width = NAME_WIDTH
                )?;
            }
        }

        if !self.metrics.rates.is_empty() {
            writeln!(f, "\n === RATE METRICS ===")?;
            writeln!(f, "{}", horizontal_rule)?;
            writeln!(
                f,
                " {:<width$} | {:>17} | {:>8}",
                "Name",
                "Nonzero / total",
                "Ratio",
                width = NAME_WIDTH
            )?;
            writeln!(f, "{}", horizontal_rule)?;
            for rate in &self.metrics.rates {
                writeln!(
                    f,
                    " {:<width$} | {:>7} / {:>7} | {:>8.4}",
                    util::truncate_string(&rate.key.to_string(), NAME_WIDTH),
                    rate.nonzero.to_formatted_string(&Locale::en),
                    rate.total.to_formatted_string(&Locale::en),
                    rate.fraction,
                    width = NAME_WIDTH
                )?;
            }
        }

        if !self.thresholds.is_empty() {
            writeln!(f, "\n === THRESHOLDS ===")?;
            writeln!(f, "{}", horizontal_rule)?;
            for result in &self.thresholds {
                let verdict = match result.verdict {
                    ThresholdVerdict::Passed => "pass",
                    ThresholdVerdict::Failed => "FAIL",
                    ThresholdVerdict::NoData => "no data",
                };
                match result.observed {
                    Some(observed) => writeln!(
                        f,
                        " {:<60} | observed {:>10.2} | {}",
                        util::truncate_string(&result.threshold.to_string(), 60),
                        observed,
                        verdict
                    )?,
                    None => writeln!(
                        f,
                        " {:<60} | {:>19} | {}",
                        util::truncate_string(&result.threshold.to_string(), 60),
                        "-",
                        verdict
                    )?,
                }
            }
        }

        writeln!(
            f,
            "\n Started {}, ran for {:.1}s: overall {}",
            self.started,
            self.elapsed_seconds,
            if self.success { "PASSED" } else { "FAILED" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{sink_channel, MetricRegistry};
    use crate::threshold::{evaluate_all, Threshold};
    use std::collections::BTreeMap;

    fn sample_report(strict: bool) -> LoadTestReport {
        let (sink, receiver) = sink_channel();
        let no_tags = BTreeMap::new();
        for milliseconds in 1..=10 {
            sink.add_time("login_response_time", &no_tags, milliseconds * 10);
        }
        sink.add_count("transaction_counter", &no_tags, 10);
        sink.add_rate("error_rate", &no_tags, false);

        let mut registry = MetricRegistry::new();
        while let Ok(observation) = receiver.try_recv() {
            registry.aggregate(observation);
        }
        let snapshot = registry.snapshot();
        let thresholds = vec![
            Threshold::parse("login_response_time", "p(95)<300").unwrap(),
            Threshold::parse("get_user_response_time", "p(95)<300").unwrap(),
        ];
        let results = evaluate_all(&thresholds, &snapshot);
        LoadTestReport::new("2020-01-01T00:00:00+00:00".to_string(), snapshot, results, strict)
    }

    #[test]
    fn summary_renders_all_sections() {
        let report = sample_report(false);
        assert!(report.success);
        let rendered = format!("{}", report);
        assert!(rendered.contains("=== TREND METRICS ==="));
        assert!(rendered.contains("=== COUNTER METRICS ==="));
        assert!(rendered.contains("=== RATE METRICS ==="));
        assert!(rendered.contains("=== THRESHOLDS ==="));
        assert!(rendered.contains("login_response_time"));
        assert!(rendered.contains("no data"));
        assert!(rendered.contains("overall PASSED"));
    }

    #[test]
    fn strict_mode_fails_missing_thresholds() {
        let report = sample_report(true);
        assert!(!report.success);
        let rendered = format!("{}", report);
        assert!(rendered.contains("overall FAILED"));
    }

    #[test]
    fn json_report_round_trips_to_disk() {
        let report = sample_report(false);
        let path = std::env::temp_dir().join("stampede-report.json");
        report.write_json(path.to_str().unwrap()).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed["success"], serde_json::Value::Bool(true));
        assert!(parsed["metrics"]["trends"].is_array());
    }
}
