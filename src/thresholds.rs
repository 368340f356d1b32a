//! SLA thresholds and their evaluation.
//!
//! Thresholds are written in k6 notation and attached to a metric name:
//!
//! ```yaml
//! thresholds:
//!   create_url_duration: ["p(95)<600"]
//!   success_rate: ["rate>0.95"]
//! ```
//!
//! Trend values are compared in milliseconds.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::aggregator::{MetricKind, MetricsSnapshot, SeriesSnapshot};

lazy_static::lazy_static! {
    static ref EXPRESSION: Regex = Regex::new(
        r"^\s*(p\(\s*(\d+(?:\.\d+)?)\s*\)|avg|med|min|max|rate|count)\s*(<=|>=|==|<|>)\s*(-?\d+(?:\.\d+)?)\s*$"
    ).expect("threshold expression regex is valid");
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ThresholdParseError {
    #[error("Invalid threshold expression '{0}'. Expected e.g. 'p(95)<600' or 'rate>0.95'")]
    Syntax(String),

    #[error("Percentile must be between 0 and 100, got {0}")]
    PercentileOutOfRange(f64),

    #[error("Threshold on '{metric}' references a metric that is never recorded")]
    UnknownMetric { metric: String },

    #[error("Aggregation '{aggregation}' does not apply to {kind} metric '{metric}'")]
    KindMismatch {
        metric: String,
        aggregation: String,
        kind: &'static str,
    },
}

/// Aggregated value a threshold looks at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Percentile(f64),
    Avg,
    Med,
    Min,
    Max,
    Rate,
    Count,
}

impl Aggregation {
    /// Whether the aggregation can be computed on a series of `kind`.
    pub fn applies_to(&self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Trend => !matches!(self, Aggregation::Rate),
            MetricKind::Counter => matches!(self, Aggregation::Count),
            MetricKind::Rate => matches!(self, Aggregation::Rate | Aggregation::Count),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Percentile(p) => write!(f, "p({})", p),
            Aggregation::Avg => f.write_str("avg"),
            Aggregation::Med => f.write_str("med"),
            Aggregation::Min => f.write_str("min"),
            Aggregation::Max => f.write_str("max"),
            Aggregation::Rate => f.write_str("rate"),
            Aggregation::Count => f.write_str("count"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

impl Comparison {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "<" => Some(Comparison::Lt),
            "<=" => Some(Comparison::Le),
            ">" => Some(Comparison::Gt),
            ">=" => Some(Comparison::Ge),
            "==" => Some(Comparison::Eq),
            _ => None,
        }
    }

    pub fn holds(&self, observed: f64, bound: f64) -> bool {
        match self {
            Comparison::Lt => observed < bound,
            Comparison::Le => observed <= bound,
            Comparison::Gt => observed > bound,
            Comparison::Ge => observed >= bound,
            Comparison::Eq => (observed - bound).abs() < f64::EPSILON,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Eq => "==",
        }
    }
}

/// One SLA predicate over an aggregated metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub metric: String,
    pub aggregation: Aggregation,
    pub comparison: Comparison,
    pub bound: f64,
}

impl Threshold {
    pub fn parse(metric: &str, expression: &str) -> Result<Self, ThresholdParseError> {
        let captures = EXPRESSION
            .captures(expression)
            .ok_or_else(|| ThresholdParseError::Syntax(expression.to_string()))?;

        let syntax = || ThresholdParseError::Syntax(expression.to_string());

        let aggregation = match (&captures[1], captures.get(2)) {
            (_, Some(p)) => {
                let p: f64 = p.as_str().parse().map_err(|_| syntax())?;
                if !(0.0..=100.0).contains(&p) {
                    return Err(ThresholdParseError::PercentileOutOfRange(p));
                }
                Aggregation::Percentile(p)
            }
            ("avg", None) => Aggregation::Avg,
            ("med", None) => Aggregation::Med,
            ("min", None) => Aggregation::Min,
            ("max", None) => Aggregation::Max,
            ("rate", None) => Aggregation::Rate,
            ("count", None) => Aggregation::Count,
            _ => return Err(syntax()),
        };

        let comparison = Comparison::parse(&captures[3]).ok_or_else(syntax)?;
        let bound = captures[4].parse().map_err(|_| syntax())?;

        Ok(Self {
            metric: metric.to_string(),
            aggregation,
            comparison,
            bound,
        })
    }

    /// Checks the threshold against the metrics a run will record.
    pub fn validate_against(&self, known: &[(&str, MetricKind)]) -> Result<(), ThresholdParseError> {
        let kind = known
            .iter()
            .find(|(name, _)| *name == self.metric)
            .map(|(_, kind)| *kind)
            .ok_or_else(|| ThresholdParseError::UnknownMetric {
                metric: self.metric.clone(),
            })?;

        if !self.aggregation.applies_to(kind) {
            return Err(ThresholdParseError::KindMismatch {
                metric: self.metric.clone(),
                aggregation: self.aggregation.to_string(),
                kind: kind.label(),
            });
        }
        Ok(())
    }

    /// Evaluates the threshold against a snapshot.
    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> ThresholdResult {
        let observed = snapshot
            .get(&self.metric)
            .and_then(|series| self.observe(series));

        let verdict = match observed {
            None => Verdict::Undetermined,
            Some(value) if self.comparison.holds(value, self.bound) => Verdict::Pass,
            Some(_) => Verdict::Fail,
        };

        ThresholdResult {
            threshold: self.clone(),
            observed,
            verdict,
        }
    }

    fn observe(&self, series: &SeriesSnapshot) -> Option<f64> {
        match (series, self.aggregation) {
            (SeriesSnapshot::Trend(t), Aggregation::Percentile(p)) => t.percentile_ms(p),
            (SeriesSnapshot::Trend(t), Aggregation::Med) => t.percentile_ms(50.0),
            (SeriesSnapshot::Trend(t), Aggregation::Avg) => t.mean_ms(),
            (SeriesSnapshot::Trend(t), Aggregation::Min) => t.min_ms(),
            (SeriesSnapshot::Trend(t), Aggregation::Max) => t.max_ms(),
            (SeriesSnapshot::Trend(t), Aggregation::Count) => {
                (!t.is_empty()).then(|| t.count() as f64)
            }
            (SeriesSnapshot::Counter(c), Aggregation::Count) => {
                (c.records > 0).then(|| c.value as f64)
            }
            (SeriesSnapshot::Rate(r), Aggregation::Rate) => r.ratio(),
            (SeriesSnapshot::Rate(r), Aggregation::Count) => {
                (r.total > 0).then(|| r.successes as f64)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}{}{}",
            self.metric,
            self.aggregation,
            self.comparison.symbol(),
            self.bound
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,

    /// The metric had no samples
    Undetermined,
}

impl Verdict {
    /// Fail dominates Undetermined, which dominates Pass.
    pub fn combine(verdicts: impl IntoIterator<Item = Verdict>) -> Verdict {
        verdicts.into_iter().fold(Verdict::Pass, |acc, v| match (acc, v) {
            (Verdict::Fail, _) | (_, Verdict::Fail) => Verdict::Fail,
            (Verdict::Undetermined, _) | (_, Verdict::Undetermined) => Verdict::Undetermined,
            _ => Verdict::Pass,
        })
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => f.write_str("pass"),
            Verdict::Fail => f.write_str("fail"),
            Verdict::Undetermined => f.write_str("undetermined"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdResult {
    pub threshold: Threshold,
    pub observed: Option<f64>,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub results: Vec<ThresholdResult>,
    pub overall: Verdict,
}

/// Evaluates every threshold against `snapshot`.
///
/// With no thresholds configured the overall verdict is Pass.
pub fn evaluate(thresholds: &[Threshold], snapshot: &MetricsSnapshot) -> Evaluation {
    let results: Vec<ThresholdResult> = thresholds.iter().map(|t| t.evaluate(snapshot)).collect();
    let overall = Verdict::combine(results.iter().map(|r| r.verdict));
    Evaluation { results, overall }
}

/// Format threshold results as a table.
pub fn format_threshold_table(evaluation: &Evaluation) -> String {
    let mut output = String::new();
    output.push_str("\n## Thresholds\n\n");

    if evaluation.results.is_empty() {
        output.push_str("No thresholds configured.\n");
        return output;
    }

    output.push_str(&format!(
        "{:<45} {:>12} {:>14}\n",
        "Threshold", "Observed", "Verdict"
    ));
    output.push_str(&"-".repeat(73));
    output.push('\n');

    for result in &evaluation.results {
        let observed = result
            .observed
            .map(|v| format!("{:.3}", v))
            .unwrap_or_else(|| "-".to_string());
        output.push_str(&format!(
            "{:<45} {:>12} {:>14}\n",
            result.threshold.to_string(),
            observed,
            result.verdict.to_string()
        ));
    }

    output.push_str(&format!("\nOverall: {}\n", evaluation.overall));
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn trend_with_p95(p95_ms: u64) -> MetricsSnapshot {
        // The 95th of 100 samples is the first slow one.
        let mut samples = vec![Duration::from_millis(100); 94];
        samples.extend(vec![Duration::from_millis(p95_ms); 6]);
        let mut snapshot = MetricsSnapshot::default();
        snapshot.insert_trend_samples("create_url_duration", &samples);
        snapshot
    }

    #[test]
    fn test_parse_expressions() {
        let t = Threshold::parse("create_url_duration", "p(95)<600").unwrap();
        assert_eq!(t.aggregation, Aggregation::Percentile(95.0));
        assert_eq!(t.comparison, Comparison::Lt);
        assert_eq!(t.bound, 600.0);

        let t = Threshold::parse("success_rate", " rate > 0.95 ").unwrap();
        assert_eq!(t.aggregation, Aggregation::Rate);
        assert_eq!(t.comparison, Comparison::Gt);

        let t = Threshold::parse("http_req_duration", "p(99.9)<=1500").unwrap();
        assert_eq!(t.aggregation, Aggregation::Percentile(99.9));
        assert_eq!(t.comparison, Comparison::Le);

        assert_eq!(
            Threshold::parse("failed_requests", "count<10").unwrap().aggregation,
            Aggregation::Count
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Threshold::parse("x", "p95<600"),
            Err(ThresholdParseError::Syntax(_))
        ));
        assert!(matches!(
            Threshold::parse("x", "rate"),
            Err(ThresholdParseError::Syntax(_))
        ));
        assert_eq!(
            Threshold::parse("x", "p(101)<5"),
            Err(ThresholdParseError::PercentileOutOfRange(101.0))
        );
    }

    #[test]
    fn test_validate_against_known_metrics() {
        let known = [
            ("create_url_duration", MetricKind::Trend),
            ("success_rate", MetricKind::Rate),
        ];

        assert!(Threshold::parse("create_url_duration", "p(95)<600")
            .unwrap()
            .validate_against(&known)
            .is_ok());
        assert!(matches!(
            Threshold::parse("nope", "p(95)<600").unwrap().validate_against(&known),
            Err(ThresholdParseError::UnknownMetric { .. })
        ));
        assert!(matches!(
            Threshold::parse("success_rate", "p(95)<600").unwrap().validate_against(&known),
            Err(ThresholdParseError::KindMismatch { .. })
        ));
    }

    #[test]
    fn test_percentile_breach_fails() {
        let snapshot = trend_with_p95(650);
        let t = Threshold::parse("create_url_duration", "p(95)<600").unwrap();

        let result = t.evaluate(&snapshot);
        assert_eq!(result.verdict, Verdict::Fail);
        let observed = result.observed.unwrap();
        assert!((observed - 650.0).abs() < 1.0, "observed {}", observed);
    }

    #[test]
    fn test_zero_samples_is_undetermined() {
        let mut snapshot = MetricsSnapshot::default();
        snapshot.insert_trend_samples("access_url_duration", &[]);
        snapshot.insert_rate("success_rate", 0, 0);

        let thresholds = vec![
            Threshold::parse("access_url_duration", "p(95)<400").unwrap(),
            Threshold::parse("success_rate", "rate>0.95").unwrap(),
            Threshold::parse("never_recorded", "count<1").unwrap(),
        ];
        let evaluation = evaluate(&thresholds, &snapshot);

        assert!(evaluation
            .results
            .iter()
            .all(|r| r.verdict == Verdict::Undetermined && r.observed.is_none()));
        assert_eq!(evaluation.overall, Verdict::Undetermined);
    }

    #[test]
    fn test_unrecorded_counter_is_undetermined() {
        let t = Threshold::parse("failed_requests", "count<1").unwrap();

        let mut snapshot = MetricsSnapshot::default();
        snapshot.insert_counter_records("failed_requests", 0, 0);
        assert_eq!(t.evaluate(&snapshot).verdict, Verdict::Undetermined);

        // zero failures over recorded requests is a real zero
        snapshot.insert_counter_records("failed_requests", 0, 12);
        assert_eq!(t.evaluate(&snapshot).verdict, Verdict::Pass);

        snapshot.insert_counter_records("failed_requests", 3, 12);
        assert_eq!(t.evaluate(&snapshot).verdict, Verdict::Fail);
    }

    #[test]
    fn test_overall_combination() {
        use Verdict::*;
        assert_eq!(Verdict::combine(Vec::new()), Pass);
        assert_eq!(Verdict::combine([Pass, Pass]), Pass);
        assert_eq!(Verdict::combine([Pass, Undetermined]), Undetermined);
        assert_eq!(Verdict::combine([Undetermined, Fail, Pass]), Fail);
    }

    #[test]
    fn test_rate_threshold() {
        let mut snapshot = MetricsSnapshot::default();
        snapshot.insert_rate("success_rate", 96, 100);
        let t = Threshold::parse("success_rate", "rate>0.95").unwrap();
        assert_eq!(t.evaluate(&snapshot).verdict, Verdict::Pass);

        snapshot.insert_rate("success_rate", 90, 100);
        assert_eq!(t.evaluate(&snapshot).verdict, Verdict::Fail);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let snapshot = trend_with_p95(650);
        let thresholds = vec![
            Threshold::parse("create_url_duration", "p(95)<600").unwrap(),
            Threshold::parse("create_url_duration", "avg<1000").unwrap(),
        ];

        let first = evaluate(&thresholds, &snapshot);
        for _ in 0..10 {
            assert_eq!(evaluate(&thresholds, &snapshot), first);
        }
    }

    #[test]
    fn test_format_threshold_table() {
        let snapshot = trend_with_p95(650);
        let thresholds = vec![Threshold::parse("create_url_duration", "p(95)<600").unwrap()];
        let table = format_threshold_table(&evaluate(&thresholds, &snapshot));

        assert!(table.contains("create_url_duration p(95)<600"));
        assert!(table.contains("Overall: fail"));
    }
}
