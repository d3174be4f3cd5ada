//! Metrics collected and aggregated during load tests.
//!
//! Virtual users record observations through a cheaply cloneable
//! [`MetricSink`]. Observations travel over an unbounded
//! [`flume channel`](https://docs.rs/flume/*/flume/fn.unbounded.html) to the
//! parent process, which folds them into a [`MetricRegistry`]. The channel is
//! the only write path, and every message is aggregated exactly once when the
//! parent drains it, so no observation is lost or double-counted no matter how
//! many users record concurrently.
//!
//! When the load test completes the registry is frozen into a
//! [`MetricSnapshot`], which the threshold evaluator and the report renderer
//! consume.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Instant;

/// The three supported metric kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricKind {
    /// A monotonically increasing sum, also reported as a per-second rate
    /// over the elapsed test window.
    Counter,
    /// The fraction of nonzero observations over all observations.
    Rate,
    /// A distribution of numeric samples supporting order-statistic queries.
    Trend,
}

/// Identity of one metric series: a name plus its full tag set.
///
/// Observations recorded with different tag sets accumulate into distinct
/// series, even under the same name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    /// The metric name, for example `login_response_time`.
    pub name: String,
    /// The tags the observation was recorded with, for example
    /// `scenario=light_load`.
    pub tags: BTreeMap<String, String>,
}

impl SeriesKey {
    /// Build a series key from a name and a tag set.
    pub fn new(name: &str, tags: &BTreeMap<String, String>) -> Self {
        SeriesKey {
            name: name.to_string(),
            tags: tags.clone(),
        }
    }

    /// Whether this series is selected by a name and a tag filter.
    ///
    /// The name must match exactly; every tag in the filter must be present
    /// in the series' tag set with the same value (subset match).
    pub(crate) fn matches(&self, name: &str, filter: &BTreeMap<String, String>) -> bool {
        self.name == name
            && filter
                .iter()
                .all(|(key, value)| self.tags.get(key) == Some(value))
    }
}

/// Display as `name{tag:value,..}`, the form used in reports and thresholds.
impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.tags.is_empty() {
            write!(f, "{}", self.name)
        } else {
            let tags = self
                .tags
                .iter()
                .map(|(key, value)| format!("{}:{}", key, value))
                .join(",");
            write!(f, "{}{{{}}}", self.name, tags)
        }
    }
}

/// One observation sent from a virtual user to the parent process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// Which series the observation belongs to.
    pub key: SeriesKey,
    /// How the observation is aggregated.
    pub kind: MetricKind,
    /// Counter: the amount to add. Rate: nonzero counts toward the rate.
    /// Trend: the sample value in milliseconds.
    pub value: f64,
}

/// Cheaply cloneable handle used by virtual users to record observations.
///
/// Recording is best-effort: once the receiving side has shut down, further
/// observations are silently dropped, matching how a drained load test
/// discards stragglers.
#[derive(Clone, Debug)]
pub struct MetricSink {
    channel: flume::Sender<Observation>,
}

impl MetricSink {
    /// Record a raw observation.
    pub fn record(&self, observation: Observation) {
        // Best effort metrics.
        let _ = self.channel.send(observation);
    }

    /// Add a sample, in milliseconds, to a Trend series.
    pub fn add_time(&self, name: &str, tags: &BTreeMap<String, String>, milliseconds: u64) {
        self.record(Observation {
            key: SeriesKey::new(name, tags),
            kind: MetricKind::Trend,
            value: milliseconds as f64,
        });
    }

    /// Add an amount to a Counter series.
    pub fn add_count(&self, name: &str, tags: &BTreeMap<String, String>, amount: u64) {
        self.record(Observation {
            key: SeriesKey::new(name, tags),
            kind: MetricKind::Counter,
            value: amount as f64,
        });
    }

    /// Add one trial to a Rate series. A `nonzero` trial counts toward the
    /// rate; all trials count toward the denominator.
    pub fn add_rate(&self, name: &str, tags: &BTreeMap<String, String>, nonzero: bool) {
        self.record(Observation {
            key: SeriesKey::new(name, tags),
            kind: MetricKind::Rate,
            value: if nonzero { 1.0 } else { 0.0 },
        });
    }
}

/// Create a connected sink and receiver pair.
///
/// The sink is handed (cloned) to every virtual user; the receiver is drained
/// by the parent into a [`MetricRegistry`].
pub fn sink_channel() -> (MetricSink, flume::Receiver<Observation>) {
    let (channel, receiver) = flume::unbounded();
    (MetricSink { channel }, receiver)
}

// Rate numerator and denominator.
#[derive(Debug, Clone, Default)]
struct RateTally {
    nonzero: u64,
    total: u64,
}

/// Parent-side accumulation of all metric series.
///
/// Single-writer by construction: only the parent process aggregates, while
/// virtual users write through the channel.
#[derive(Debug)]
pub struct MetricRegistry {
    started: Instant,
    counters: HashMap<SeriesKey, f64>,
    rates: HashMap<SeriesKey, RateTally>,
    trends: HashMap<SeriesKey, Vec<u64>>,
}

impl MetricRegistry {
    /// Create an empty registry; the elapsed window for counter rates starts
    /// now.
    pub fn new() -> Self {
        MetricRegistry {
            started: Instant::now(),
            counters: HashMap::new(),
            rates: HashMap::new(),
            trends: HashMap::new(),
        }
    }

    /// Fold one observation into the registry.
    pub fn aggregate(&mut self, observation: Observation) {
        match observation.kind {
            MetricKind::Counter => {
                *self.counters.entry(observation.key).or_insert(0.0) += observation.value;
            }
            MetricKind::Rate => {
                let tally = self.rates.entry(observation.key).or_default();
                tally.total += 1;
                if observation.value != 0.0 {
                    tally.nonzero += 1;
                }
            }
            MetricKind::Trend => {
                self.trends
                    .entry(observation.key)
                    .or_insert_with(Vec::new)
                    .push(observation.value.max(0.0).round() as u64);
            }
        }
    }

    /// Freeze the registry into an immutable snapshot.
    ///
    /// Trend order statistics are computed here, not during the load test.
    pub fn snapshot(&self) -> MetricSnapshot {
        let elapsed_seconds = self.started.elapsed().as_secs_f64();

        let counters: Vec<CounterAggregate> = self
            .counters
            .iter()
            .map(|(key, total)| CounterAggregate {
                key: key.clone(),
                total: *total,
                per_second: if elapsed_seconds > 0.0 {
                    total / elapsed_seconds
                } else {
                    0.0
                },
            })
            .sorted_by(|a, b| a.key.cmp(&b.key))
            .collect();

        let rates: Vec<RateAggregate> = self
            .rates
            .iter()
            .map(|(key, tally)| RateAggregate {
                key: key.clone(),
                nonzero: tally.nonzero,
                total: tally.total,
                fraction: if tally.total > 0 {
                    tally.nonzero as f64 / tally.total as f64
                } else {
                    0.0
                },
            })
            .sorted_by(|a, b| a.key.cmp(&b.key))
            .collect();

        let trends: Vec<TrendAggregate> = self
            .trends
            .iter()
            .map(|(key, samples)| TrendAggregate::new(key.clone(), samples.clone()))
            .sorted_by(|a, b| a.key.cmp(&b.key))
            .collect();

        MetricSnapshot {
            elapsed_seconds,
            counters,
            rates,
            trends,
        }
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        MetricRegistry::new()
    }
}

/// Final aggregate of one Counter series.
#[derive(Debug, Clone, Serialize)]
pub struct CounterAggregate {
    /// The series this aggregate describes.
    pub key: SeriesKey,
    /// Sum of all recorded amounts.
    pub total: f64,
    /// `total` divided by the elapsed wall-clock window.
    pub per_second: f64,
}

/// Final aggregate of one Rate series.
#[derive(Debug, Clone, Serialize)]
pub struct RateAggregate {
    /// The series this aggregate describes.
    pub key: SeriesKey,
    /// How many trials counted toward the rate.
    pub nonzero: u64,
    /// How many trials were recorded in total.
    pub total: u64,
    /// `nonzero / total`, or 0 with no trials.
    pub fraction: f64,
}

/// Final aggregate of one Trend series.
///
/// Retains the full sorted sample list so thresholds can merge series before
/// computing order statistics.
#[derive(Debug, Clone, Serialize)]
pub struct TrendAggregate {
    /// The series this aggregate describes.
    pub key: SeriesKey,
    /// How many samples were recorded.
    pub count: usize,
    /// Arithmetic mean of all samples.
    pub mean: f64,
    /// Smallest sample.
    pub minimum: u64,
    /// Largest sample.
    pub maximum: u64,
    /// 50th percentile.
    pub median: u64,
    /// 95th percentile.
    pub p95: u64,
    #[serde(skip)]
    samples: Vec<u64>,
}

impl TrendAggregate {
    fn new(key: SeriesKey, mut samples: Vec<u64>) -> Self {
        samples.sort_unstable();
        let count = samples.len();
        let mean = if count > 0 {
            samples.iter().sum::<u64>() as f64 / count as f64
        } else {
            0.0
        };
        let minimum = samples.first().copied().unwrap_or(0);
        let maximum = samples.last().copied().unwrap_or(0);
        let median = quantile(&samples, 50.0).unwrap_or(0);
        let p95 = quantile(&samples, 95.0).unwrap_or(0);
        TrendAggregate {
            key,
            count,
            mean,
            minimum,
            maximum,
            median,
            p95,
            samples,
        }
    }

    /// The sorted samples backing this aggregate.
    pub fn samples(&self) -> &[u64] {
        &self.samples
    }

    /// Nearest-rank percentile of this series alone.
    pub fn quantile(&self, percent: f64) -> Option<u64> {
        quantile(&self.samples, percent)
    }
}

// Nearest-rank percentile over a sorted sample list. Exact, no interpolation:
// the reported value is always one of the recorded samples.
fn quantile(sorted: &[u64], percent: f64) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = ((percent / 100.0) * sorted.len() as f64).ceil() as usize;
    let index = rank.clamp(1, sorted.len()) - 1;
    Some(sorted[index])
}

/// A frozen view of all metrics, produced once after all scenarios finish.
#[derive(Debug, Clone, Serialize)]
pub struct MetricSnapshot {
    /// Wall-clock seconds between registry creation and the snapshot.
    pub elapsed_seconds: f64,
    /// All Counter series, sorted by key.
    pub counters: Vec<CounterAggregate>,
    /// All Rate series, sorted by key.
    pub rates: Vec<RateAggregate>,
    /// All Trend series, sorted by key.
    pub trends: Vec<TrendAggregate>,
}

impl MetricSnapshot {
    /// Sum of all Counter series selected by name and tag filter, or `None`
    /// if no series matches.
    pub fn counter_total(&self, name: &str, filter: &BTreeMap<String, String>) -> Option<f64> {
        let matching: Vec<_> = self
            .counters
            .iter()
            .filter(|aggregate| aggregate.key.matches(name, filter))
            .collect();
        if matching.is_empty() {
            None
        } else {
            Some(matching.iter().map(|aggregate| aggregate.total).sum())
        }
    }

    /// Per-second rate of all Counter series selected by name and tag filter.
    pub fn counter_per_second(&self, name: &str, filter: &BTreeMap<String, String>) -> Option<f64> {
        self.counter_total(name, filter).map(|total| {
            if self.elapsed_seconds > 0.0 {
                total / self.elapsed_seconds
            } else {
                0.0
            }
        })
    }

    /// Merged fraction of all Rate series selected by name and tag filter.
    pub fn rate_fraction(&self, name: &str, filter: &BTreeMap<String, String>) -> Option<f64> {
        let matching: Vec<_> = self
            .rates
            .iter()
            .filter(|aggregate| aggregate.key.matches(name, filter))
            .collect();
        if matching.is_empty() {
            return None;
        }
        let nonzero: u64 = matching.iter().map(|aggregate| aggregate.nonzero).sum();
        let total: u64 = matching.iter().map(|aggregate| aggregate.total).sum();
        if total == 0 {
            Some(0.0)
        } else {
            Some(nonzero as f64 / total as f64)
        }
    }

    // Merge the samples of every Trend series selected by name and tag
    // filter. None if no series matches or all matches are empty.
    fn merged_trend_samples(&self, name: &str, filter: &BTreeMap<String, String>) -> Option<Vec<u64>> {
        let mut merged: Vec<u64> = Vec::new();
        let mut matched = false;
        for aggregate in &self.trends {
            if aggregate.key.matches(name, filter) {
                matched = true;
                merged.extend_from_slice(aggregate.samples());
            }
        }
        if !matched || merged.is_empty() {
            None
        } else {
            merged.sort_unstable();
            Some(merged)
        }
    }

    /// Nearest-rank percentile over the merged samples of all matching Trend
    /// series.
    pub fn trend_quantile(
        &self,
        name: &str,
        filter: &BTreeMap<String, String>,
        percent: f64,
    ) -> Option<f64> {
        self.merged_trend_samples(name, filter)
            .and_then(|samples| quantile(&samples, percent))
            .map(|value| value as f64)
    }

    /// Mean over the merged samples of all matching Trend series.
    pub fn trend_mean(&self, name: &str, filter: &BTreeMap<String, String>) -> Option<f64> {
        self.merged_trend_samples(name, filter)
            .map(|samples| samples.iter().sum::<u64>() as f64 / samples.len() as f64)
    }

    /// Minimum over the merged samples of all matching Trend series.
    pub fn trend_minimum(&self, name: &str, filter: &BTreeMap<String, String>) -> Option<f64> {
        self.merged_trend_samples(name, filter)
            .and_then(|samples| samples.first().copied())
            .map(|value| value as f64)
    }

    /// Maximum over the merged samples of all matching Trend series.
    pub fn trend_maximum(&self, name: &str, filter: &BTreeMap<String, String>) -> Option<f64> {
        self.merged_trend_samples(name, filter)
            .and_then(|samples| samples.last().copied())
            .map(|value| value as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    // Drain a receiver into a fresh registry.
    fn drain(receiver: &flume::Receiver<Observation>) -> MetricRegistry {
        let mut registry = MetricRegistry::new();
        while let Ok(observation) = receiver.try_recv() {
            registry.aggregate(observation);
        }
        registry
    }

    #[test]
    fn counters_sum() {
        let (sink, receiver) = sink_channel();
        let no_tags = BTreeMap::new();
        for _ in 0..10 {
            sink.add_count("transactions", &no_tags, 1);
        }
        sink.add_count("transactions", &no_tags, 5);

        let snapshot = drain(&receiver).snapshot();
        assert_eq!(snapshot.counter_total("transactions", &no_tags), Some(15.0));
        assert_eq!(snapshot.counter_total("missing", &no_tags), None);
    }

    #[test]
    fn rates_fraction() {
        let (sink, receiver) = sink_channel();
        let no_tags = BTreeMap::new();
        for i in 0..10 {
            sink.add_rate("error_rate", &no_tags, i < 3);
        }

        let snapshot = drain(&receiver).snapshot();
        let fraction = snapshot.rate_fraction("error_rate", &no_tags).unwrap();
        assert!((fraction - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn trend_order_statistics() {
        let (sink, receiver) = sink_channel();
        let no_tags = BTreeMap::new();
        for milliseconds in 1..=100 {
            sink.add_time("latency", &no_tags, milliseconds);
        }

        let snapshot = drain(&receiver).snapshot();
        let trend = &snapshot.trends[0];
        assert_eq!(trend.count, 100);
        assert_eq!(trend.minimum, 1);
        assert_eq!(trend.maximum, 100);
        assert_eq!(trend.median, 50);
        assert_eq!(trend.p95, 95);

        // The p95 is never below the median and never above the max.
        assert!(trend.p95 >= trend.median);
        assert!(trend.p95 <= trend.maximum);
    }

    #[test]
    fn trend_single_sample() {
        let (sink, receiver) = sink_channel();
        let no_tags = BTreeMap::new();
        sink.add_time("latency", &no_tags, 42);

        let snapshot = drain(&receiver).snapshot();
        let trend = &snapshot.trends[0];
        assert_eq!(trend.median, 42);
        assert_eq!(trend.p95, 42);
        assert_eq!(trend.quantile(99.9), Some(42));
    }

    #[test]
    fn tag_sets_split_series() {
        let (sink, receiver) = sink_channel();
        let light = tags(&[("scenario", "light_load")]);
        let heavy = tags(&[("scenario", "heavy_load")]);
        sink.add_count("http_reqs", &light, 10);
        sink.add_count("http_reqs", &heavy, 20);

        let snapshot = drain(&receiver).snapshot();
        assert_eq!(snapshot.counters.len(), 2);
        // A tag filter selects one series; an empty filter merges both.
        assert_eq!(snapshot.counter_total("http_reqs", &light), Some(10.0));
        assert_eq!(snapshot.counter_total("http_reqs", &heavy), Some(20.0));
        assert_eq!(
            snapshot.counter_total("http_reqs", &BTreeMap::new()),
            Some(30.0)
        );
    }

    #[test]
    fn merged_trend_quantile() {
        let (sink, receiver) = sink_channel();
        let light = tags(&[("scenario", "light_load")]);
        let heavy = tags(&[("scenario", "heavy_load")]);
        for milliseconds in 1..=50 {
            sink.add_time("latency", &light, milliseconds);
        }
        for milliseconds in 51..=100 {
            sink.add_time("latency", &heavy, milliseconds);
        }

        let snapshot = drain(&receiver).snapshot();
        // Merged across both series the samples are 1..=100.
        assert_eq!(
            snapshot.trend_quantile("latency", &BTreeMap::new(), 95.0),
            Some(95.0)
        );
        // Filtered to one series only its own samples count.
        assert_eq!(snapshot.trend_quantile("latency", &light, 95.0), Some(48.0));
        assert_eq!(snapshot.trend_maximum("latency", &light), Some(50.0));
    }

    #[test]
    fn nothing_lost_under_concurrent_writers() {
        let (sink, receiver) = sink_channel();
        let no_tags = BTreeMap::new();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let sink = sink.clone();
            let no_tags = no_tags.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1_000 {
                    sink.add_count("http_reqs", &no_tags, 1);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = drain(&receiver).snapshot();
        assert_eq!(snapshot.counter_total("http_reqs", &no_tags), Some(8_000.0));
    }
}
