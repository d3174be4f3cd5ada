//! Pass/fail assertions over aggregated metrics, evaluated once at the end of
//! a load test.
//!
//! Thresholds are declared with a metric selector and a comparison
//! expression, for example:
//!
//! ```rust
//! use stampede::threshold::Threshold;
//!
//! // 95% of light_load logins must complete within 300ms.
//! let threshold = Threshold::parse("login_response_time{scenario:light_load}", "p(95)<300").unwrap();
//! ```
//!
//! The selector matches series by exact metric name and tag subset; every
//! matching series is merged before the statistic is computed.

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::metrics::MetricSnapshot;
use crate::StampedeError;

/// The statistic a threshold computes from the selected series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Statistic {
    /// Nearest-rank percentile of a Trend, `p(95)`.
    Percentile(f64),
    /// Fraction of a Rate, or events per second of a Counter.
    Rate,
    /// Total of a Counter.
    Count,
    /// Mean of a Trend.
    Average,
    /// Median of a Trend.
    Median,
    /// Minimum of a Trend.
    Minimum,
    /// Maximum of a Trend.
    Maximum,
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Statistic::Percentile(percent) => write!(f, "p({})", percent),
            Statistic::Rate => write!(f, "rate"),
            Statistic::Count => write!(f, "count"),
            Statistic::Average => write!(f, "avg"),
            Statistic::Median => write!(f, "med"),
            Statistic::Minimum => write!(f, "min"),
            Statistic::Maximum => write!(f, "max"),
        }
    }
}

/// How the computed statistic compares against the bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Comparator {
    /// Strictly less than.
    LessThan,
    /// Less than or equal.
    LessThanOrEqual,
    /// Strictly greater than.
    GreaterThan,
    /// Greater than or equal.
    GreaterThanOrEqual,
}

impl Comparator {
    fn compare(&self, observed: f64, bound: f64) -> bool {
        match self {
            Comparator::LessThan => observed < bound,
            Comparator::LessThanOrEqual => observed <= bound,
            Comparator::GreaterThan => observed > bound,
            Comparator::GreaterThanOrEqual => observed >= bound,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Comparator::LessThan => write!(f, "<"),
            Comparator::LessThanOrEqual => write!(f, "<="),
            Comparator::GreaterThan => write!(f, ">"),
            Comparator::GreaterThanOrEqual => write!(f, ">="),
        }
    }
}

/// A pass/fail assertion over one metric selector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Threshold {
    /// The exact metric name the threshold selects.
    pub metric: String,
    /// Tags a series must carry (subset match) to be selected.
    pub tags: BTreeMap<String, String>,
    /// The statistic computed over the merged selection.
    pub statistic: Statistic,
    /// How the statistic compares against `bound`.
    pub comparator: Comparator,
    /// The literal bound compared against.
    pub bound: f64,
}

impl Threshold {
    /// Parse a threshold from a metric selector and a comparison expression.
    ///
    /// The selector is a metric name with an optional tag filter:
    /// `error_rate` or `error_rate{scenario:light_load}`. The expression is a
    /// statistic, a comparator, and a numeric bound: `p(95)<300`,
    /// `rate<0.01`, `rate>10`, `count>100`, `avg<=250`.
    pub fn parse(selector: &str, expression: &str) -> Result<Threshold, StampedeError> {
        let (metric, tags) = parse_selector(selector)?;

        let re = Regex::new(
            r"^\s*(?P<stat>p\(\s*(?P<percent>\d+(\.\d+)?)\s*\)|rate|count|avg|med|min|max)\s*(?P<cmp><=|<|>=|>)\s*(?P<bound>\d+(\.\d+)?)\s*$",
        )
        .expect("failed to compile threshold expression regex");
        let captures = re.captures(expression).ok_or_else(|| {
            StampedeError::InvalidThreshold {
                expression: format!("{}: {}", selector, expression),
                detail: "expected \"<statistic> <comparator> <bound>\", ie \"p(95)<300\" or \"rate>1\""
                    .to_string(),
            }
        })?;

        let statistic = if let Some(percent) = captures.name("percent") {
            let percent: f64 = percent
                .as_str()
                .parse()
                .expect("regex guarantees a numeric percentile");
            if percent > 100.0 {
                return Err(StampedeError::InvalidThreshold {
                    expression: format!("{}: {}", selector, expression),
                    detail: "percentile must be between 0 and 100".to_string(),
                });
            }
            Statistic::Percentile(percent)
        } else {
            match &captures["stat"] {
                "rate" => Statistic::Rate,
                "count" => Statistic::Count,
                "avg" => Statistic::Average,
                "med" => Statistic::Median,
                "min" => Statistic::Minimum,
                "max" => Statistic::Maximum,
                _ => unreachable!("regex only matches known statistics"),
            }
        };
        let comparator = match &captures["cmp"] {
            "<" => Comparator::LessThan,
            "<=" => Comparator::LessThanOrEqual,
            ">" => Comparator::GreaterThan,
            ">=" => Comparator::GreaterThanOrEqual,
            _ => unreachable!("regex only matches known comparators"),
        };
        let bound: f64 = captures["bound"]
            .parse()
            .expect("regex guarantees a numeric bound");

        Ok(Threshold {
            metric,
            tags,
            statistic,
            comparator,
            bound,
        })
    }

    // Compute the statistic over the snapshot, or None when no series
    // matches the selector (or the statistic doesn't apply to the kind).
    fn observe(&self, snapshot: &MetricSnapshot) -> Option<f64> {
        match self.statistic {
            Statistic::Percentile(percent) => {
                snapshot.trend_quantile(&self.metric, &self.tags, percent)
            }
            Statistic::Average => snapshot.trend_mean(&self.metric, &self.tags),
            Statistic::Median => snapshot.trend_quantile(&self.metric, &self.tags, 50.0),
            Statistic::Minimum => snapshot.trend_minimum(&self.metric, &self.tags),
            Statistic::Maximum => snapshot.trend_maximum(&self.metric, &self.tags),
            Statistic::Count => snapshot.counter_total(&self.metric, &self.tags),
            // "rate" means the fraction of a Rate metric, or the per-second
            // rate of a Counter metric.
            Statistic::Rate => snapshot
                .rate_fraction(&self.metric, &self.tags)
                .or_else(|| snapshot.counter_per_second(&self.metric, &self.tags)),
        }
    }

    /// Evaluate the threshold against a frozen snapshot.
    pub fn evaluate(&self, snapshot: &MetricSnapshot) -> ThresholdResult {
        let observed = self.observe(snapshot);
        let verdict = match observed {
            Some(value) => {
                if self.comparator.compare(value, self.bound) {
                    ThresholdVerdict::Passed
                } else {
                    ThresholdVerdict::Failed
                }
            }
            None => ThresholdVerdict::NoData,
        };
        ThresholdResult {
            threshold: self.clone(),
            observed,
            verdict,
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.tags.is_empty() {
            write!(
                f,
                "{}: {}{}{}",
                self.metric, self.statistic, self.comparator, self.bound
            )
        } else {
            let tags = self
                .tags
                .iter()
                .map(|(key, value)| format!("{}:{}", key, value))
                .collect::<Vec<_>>()
                .join(",");
            write!(
                f,
                "{}{{{}}}: {}{}{}",
                self.metric, tags, self.statistic, self.comparator, self.bound
            )
        }
    }
}

// Split "name{key:value,key:value}" into a metric name and a tag filter.
fn parse_selector(selector: &str) -> Result<(String, BTreeMap<String, String>), StampedeError> {
    let re = Regex::new(r"^\s*(?P<name>[A-Za-z0-9_]+)\s*(\{(?P<tags>[^}]*)\})?\s*$")
        .expect("failed to compile threshold selector regex");
    let captures = re
        .captures(selector)
        .ok_or_else(|| StampedeError::InvalidThreshold {
            expression: selector.to_string(),
            detail: "expected \"metric_name\" or \"metric_name{tag:value}\"".to_string(),
        })?;
    let name = captures["name"].to_string();
    let mut tags = BTreeMap::new();
    if let Some(tag_list) = captures.name("tags") {
        for pair in tag_list.as_str().split(',') {
            if pair.trim().is_empty() {
                continue;
            }
            let mut parts = pair.splitn(2, ':');
            match (parts.next(), parts.next()) {
                (Some(key), Some(value)) => {
                    tags.insert(key.trim().to_string(), value.trim().to_string());
                }
                _ => {
                    return Err(StampedeError::InvalidThreshold {
                        expression: selector.to_string(),
                        detail: format!("malformed tag \"{}\", expected \"tag:value\"", pair),
                    });
                }
            }
        }
    }
    Ok((name, tags))
}

/// The outcome of evaluating one threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ThresholdVerdict {
    /// The statistic satisfied the comparison.
    Passed,
    /// The statistic violated the comparison.
    Failed,
    /// No series matched the selector, so there was nothing to compare.
    /// Counts as a failure when running with `--strict-thresholds`.
    NoData,
}

/// One threshold together with its observed statistic and verdict.
#[derive(Debug, Clone, Serialize)]
pub struct ThresholdResult {
    /// The threshold that was evaluated.
    pub threshold: Threshold,
    /// The computed statistic, if any series matched.
    pub observed: Option<f64>,
    /// The evaluation outcome.
    pub verdict: ThresholdVerdict,
}

/// Evaluate every threshold against the snapshot.
pub fn evaluate_all(thresholds: &[Threshold], snapshot: &MetricSnapshot) -> Vec<ThresholdResult> {
    thresholds
        .iter()
        .map(|threshold| threshold.evaluate(snapshot))
        .collect()
}

/// Whether the run passes overall. `NoData` verdicts are skipped unless
/// `strict` is set, in which case they fail the run.
pub fn all_passed(results: &[ThresholdResult], strict: bool) -> bool {
    results.iter().all(|result| match result.verdict {
        ThresholdVerdict::Passed => true,
        ThresholdVerdict::Failed => false,
        ThresholdVerdict::NoData => !strict,
    })
}
