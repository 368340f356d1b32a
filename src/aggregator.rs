//! In-process metric series shared by every virtual user.
//!
//! Three series kinds are supported, keyed by name:
//! - [`MetricKind::Trend`]: latency distribution backed by an HDR histogram
//! - [`MetricKind::Counter`]: monotonic accumulate
//! - [`MetricKind::Rate`]: fraction of boolean outcomes
//!
//! All recording methods take `&self` and are safe to call from many tasks at
//! once. Once the run ends the registry is sealed and [`MetricsRegistry::snapshot`]
//! returns an owned copy that no longer changes.

use hdrhistogram::Histogram;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Highest latency the trend histograms can hold (1 hour, in microseconds).
const MAX_TRACKABLE_US: u64 = 3_600_000_000;

/// The three kinds of series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Trend,
    Counter,
    Rate,
}

impl MetricKind {
    pub fn label(&self) -> &'static str {
        match self {
            MetricKind::Trend => "trend",
            MetricKind::Counter => "counter",
            MetricKind::Rate => "rate",
        }
    }
}

/// Thread-safe latency distribution.
///
/// Samples are stored in microseconds with 3 significant digits of precision.
pub struct Trend {
    histogram: Mutex<Histogram<u64>>,
}

impl Trend {
    fn new() -> Self {
        let histogram =
            Histogram::new_with_bounds(1, MAX_TRACKABLE_US, 3).expect("Failed to create histogram");
        Self {
            histogram: Mutex::new(histogram),
        }
    }

    pub fn add(&self, sample: Duration) {
        let latency_us = (sample.as_micros() as u64).clamp(1, MAX_TRACKABLE_US);
        let mut hist = self.histogram.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = hist.record(latency_us) {
            warn!(latency_us, error = %e, "Failed to record latency in histogram");
        }
    }

    fn snapshot(&self) -> TrendSnapshot {
        let hist = self.histogram.lock().unwrap_or_else(PoisonError::into_inner);
        TrendSnapshot {
            histogram: hist.clone(),
        }
    }
}

/// Monotonic counter.
///
/// Tracks how many times it was recorded as well as its value, so a counter
/// that stayed at zero because nothing happened can be told apart from one
/// that stayed at zero because every `add(0)` said so.
#[derive(Default)]
pub struct Counter {
    value: AtomicU64,
    records: AtomicU64,
}

impl Counter {
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
        self.records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            value: self.get(),
            records: self.records.load(Ordering::Relaxed),
        }
    }
}

/// Fraction of successful boolean outcomes.
///
/// Both halves sit behind one lock so a reader never sees `successes > total`.
#[derive(Default)]
pub struct Rate {
    tallies: Mutex<(u64, u64)>,
}

impl Rate {
    pub fn add(&self, success: bool) {
        let mut tallies = self.tallies.lock().unwrap_or_else(PoisonError::into_inner);
        if success {
            tallies.0 += 1;
        }
        tallies.1 += 1;
    }

    fn snapshot(&self) -> RateSnapshot {
        let (successes, total) = *self.tallies.lock().unwrap_or_else(PoisonError::into_inner);
        RateSnapshot { successes, total }
    }
}

/// One named series.
pub enum MetricSeries {
    Trend(Trend),
    Counter(Counter),
    Rate(Rate),
}

impl MetricSeries {
    fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Trend => MetricSeries::Trend(Trend::new()),
            MetricKind::Counter => MetricSeries::Counter(Counter::default()),
            MetricKind::Rate => MetricSeries::Rate(Rate::default()),
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            MetricSeries::Trend(_) => MetricKind::Trend,
            MetricSeries::Counter(_) => MetricKind::Counter,
            MetricSeries::Rate(_) => MetricKind::Rate,
        }
    }

    fn snapshot(&self) -> SeriesSnapshot {
        match self {
            MetricSeries::Trend(t) => SeriesSnapshot::Trend(t.snapshot()),
            MetricSeries::Counter(c) => SeriesSnapshot::Counter(c.snapshot()),
            MetricSeries::Rate(r) => SeriesSnapshot::Rate(r.snapshot()),
        }
    }
}

/// Registry of named series for one run.
///
/// Series are created on first use. Recording into a name that already exists
/// with a different kind is ignored with a warning.
#[derive(Default)]
pub struct MetricsRegistry {
    series: Mutex<BTreeMap<String, Arc<MetricSeries>>>,
    sealed: AtomicBool,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a series up front so it shows up in snapshots even with zero samples.
    pub fn declare(&self, name: &str, kind: MetricKind) {
        let _ = self.series_for(name, kind);
    }

    pub fn add_trend(&self, name: &str, sample: Duration) {
        if let Some(MetricSeries::Trend(t)) = self.writable(name, MetricKind::Trend).as_deref() {
            t.add(sample);
        }
    }

    pub fn add_counter(&self, name: &str, n: u64) {
        if let Some(MetricSeries::Counter(c)) = self.writable(name, MetricKind::Counter).as_deref()
        {
            c.add(n);
        }
    }

    pub fn add_rate(&self, name: &str, success: bool) {
        if let Some(MetricSeries::Rate(r)) = self.writable(name, MetricKind::Rate).as_deref() {
            r.add(success);
        }
    }

    /// Stops accepting samples. Further `add_*` calls are dropped.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    /// Owned copy of every series.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let series = self.series.lock().unwrap_or_else(PoisonError::into_inner);
        MetricsSnapshot {
            series: series
                .iter()
                .map(|(name, s)| (name.clone(), s.snapshot()))
                .collect(),
        }
    }

    fn writable(&self, name: &str, kind: MetricKind) -> Option<Arc<MetricSeries>> {
        if self.is_sealed() {
            debug!(metric = name, "Registry sealed, dropping sample");
            return None;
        }
        self.series_for(name, kind)
    }

    fn series_for(&self, name: &str, kind: MetricKind) -> Option<Arc<MetricSeries>> {
        let mut series = self.series.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = match series.get(name) {
            Some(existing) => existing.clone(),
            None => {
                let created = Arc::new(MetricSeries::new(kind));
                series.insert(name.to_string(), created.clone());
                created
            }
        };
        drop(series);

        if entry.kind() != kind {
            warn!(
                metric = name,
                existing = entry.kind().label(),
                requested = kind.label(),
                "Metric kind mismatch, sample ignored"
            );
            return None;
        }
        Some(entry)
    }
}

/// Frozen copy of a trend.
#[derive(Debug, Clone)]
pub struct TrendSnapshot {
    histogram: Histogram<u64>,
}

impl TrendSnapshot {
    pub fn count(&self) -> u64 {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    /// Latency at percentile `p` (0–100) in milliseconds.
    pub fn percentile_ms(&self, p: f64) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        let quantile = (p / 100.0).clamp(0.0, 1.0);
        Some(self.histogram.value_at_quantile(quantile) as f64 / 1000.0)
    }

    pub fn min_ms(&self) -> Option<f64> {
        (!self.is_empty()).then(|| self.histogram.min() as f64 / 1000.0)
    }

    pub fn max_ms(&self) -> Option<f64> {
        (!self.is_empty()).then(|| self.histogram.max() as f64 / 1000.0)
    }

    pub fn mean_ms(&self) -> Option<f64> {
        (!self.is_empty()).then(|| self.histogram.mean() / 1000.0)
    }
}

/// Frozen copy of a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub value: u64,

    /// Number of `add` calls, including `add(0)`
    pub records: u64,
}

/// Frozen copy of a rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSnapshot {
    pub successes: u64,
    pub total: u64,
}

impl RateSnapshot {
    /// `successes / total`, or None before the first sample.
    pub fn ratio(&self) -> Option<f64> {
        (self.total > 0).then(|| self.successes as f64 / self.total as f64)
    }
}

#[derive(Debug, Clone)]
pub enum SeriesSnapshot {
    Trend(TrendSnapshot),
    Counter(CounterSnapshot),
    Rate(RateSnapshot),
}

impl SeriesSnapshot {
    pub fn kind(&self) -> MetricKind {
        match self {
            SeriesSnapshot::Trend(_) => MetricKind::Trend,
            SeriesSnapshot::Counter(_) => MetricKind::Counter,
            SeriesSnapshot::Rate(_) => MetricKind::Rate,
        }
    }

    /// Number of samples that went into the series.
    pub fn sample_count(&self) -> u64 {
        match self {
            SeriesSnapshot::Trend(t) => t.count(),
            SeriesSnapshot::Counter(c) => c.records,
            SeriesSnapshot::Rate(r) => r.total,
        }
    }
}

/// Immutable view of every series at one instant.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    series: BTreeMap<String, SeriesSnapshot>,
}

impl MetricsSnapshot {
    pub fn get(&self, name: &str) -> Option<&SeriesSnapshot> {
        self.series.get(name)
    }

    pub fn trend(&self, name: &str) -> Option<&TrendSnapshot> {
        match self.series.get(name) {
            Some(SeriesSnapshot::Trend(t)) => Some(t),
            _ => None,
        }
    }

    pub fn counter(&self, name: &str) -> Option<u64> {
        match self.series.get(name) {
            Some(SeriesSnapshot::Counter(c)) => Some(c.value),
            _ => None,
        }
    }

    pub fn rate(&self, name: &str) -> Option<RateSnapshot> {
        match self.series.get(name) {
            Some(SeriesSnapshot::Rate(r)) => Some(*r),
            _ => None,
        }
    }

    /// Iterates series sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &SeriesSnapshot)> {
        self.series.iter()
    }

    /// Builds a snapshot directly from trend samples (used by tests and tools).
    pub fn insert_trend_samples(&mut self, name: &str, samples: &[Duration]) {
        let trend = Trend::new();
        for s in samples {
            trend.add(*s);
        }
        self.series
            .insert(name.to_string(), SeriesSnapshot::Trend(trend.snapshot()));
    }

    /// Inserts a counter recorded once with `value`.
    pub fn insert_counter(&mut self, name: &str, value: u64) {
        self.insert_counter_records(name, value, 1);
    }

    pub fn insert_counter_records(&mut self, name: &str, value: u64, records: u64) {
        self.series.insert(
            name.to_string(),
            SeriesSnapshot::Counter(CounterSnapshot { value, records }),
        );
    }

    pub fn insert_rate(&mut self, name: &str, successes: u64, total: u64) {
        self.series.insert(
            name.to_string(),
            SeriesSnapshot::Rate(RateSnapshot { successes, total }),
        );
    }
}

/// Format the trend series of a snapshot as a table.
pub fn format_trend_table(title: &str, snapshot: &MetricsSnapshot) -> String {
    let trends: Vec<_> = snapshot
        .iter()
        .filter_map(|(name, s)| match s {
            SeriesSnapshot::Trend(t) if !t.is_empty() => Some((name, t)),
            _ => None,
        })
        .collect();

    if trends.is_empty() {
        return format!("## {}\n\nNo data available.\n", title);
    }

    let mut output = String::new();
    output.push_str(&format!("\n## {}\n\n", title));
    output.push_str(&format!(
        "{:<30} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}\n",
        "Metric", "Count", "P50", "P90", "P95", "P99", "Mean", "Max"
    ));
    output.push_str(&format!(
        "{:<30} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}\n",
        "", "", "(ms)", "(ms)", "(ms)", "(ms)", "(ms)", "(ms)"
    ));
    output.push_str(&"-".repeat(100));
    output.push('\n');

    for (name, t) in trends {
        output.push_str(&format!(
            "{:<30} {:>8} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>8.2}\n",
            name,
            t.count(),
            t.percentile_ms(50.0).unwrap_or_default(),
            t.percentile_ms(90.0).unwrap_or_default(),
            t.percentile_ms(95.0).unwrap_or_default(),
            t.percentile_ms(99.0).unwrap_or_default(),
            t.mean_ms().unwrap_or_default(),
            t.max_ms().unwrap_or_default(),
        ));
    }

    output
}
