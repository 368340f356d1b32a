use std::fmt::Write as _;

use crate::aggregator::{format_trend_table, MetricsSnapshot, SeriesSnapshot};
use crate::runner::OperationRecord;
use crate::scheduler::ScheduleReport;
use crate::thresholds::{format_threshold_table, Evaluation, Verdict};

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub seed: u64,
    pub schedule: ScheduleReport,
    pub snapshot: MetricsSnapshot,
    pub evaluation: Evaluation,

    /// Short codes made visible to reading VUs
    pub published: u64,

    /// Operation records, when the scenario keeps them
    pub records: Vec<OperationRecord>,
}

impl RunReport {
    pub fn verdict(&self) -> Verdict {
        self.evaluation.overall
    }

    /// Process exit code for the verdict.
    pub fn exit_code(&self) -> i32 {
        match self.verdict() {
            Verdict::Pass => 0,
            Verdict::Fail => 1,
            Verdict::Undetermined => 2,
        }
    }

    /// Human-readable report with stage, metric and threshold tables.
    pub fn render(&self) -> String {
        let mut output = String::new();

        output.push_str("\n## Stages\n\n");
        let _ = writeln!(
            output,
            "{:<8} {:>10} {:>10} {:>12}",
            "Stage", "Target", "Observed", "At (ms)"
        );
        output.push_str(&"-".repeat(43));
        output.push('\n');
        for obs in &self.schedule.observations {
            let _ = writeln!(
                output,
                "{:<8} {:>10} {:>10} {:>12}",
                obs.stage_index,
                obs.target,
                obs.observed_active,
                obs.at.as_millis()
            );
        }
        let _ = writeln!(
            output,
            "\nPeak VUs: {}  Spawned: {}  Iterations: {}  Aborted: {}  Elapsed: {:?}",
            self.schedule.peak_active,
            self.schedule.spawned,
            self.schedule.iterations,
            self.schedule.aborted,
            self.schedule.elapsed
        );

        output.push_str(&format_trend_table("Latency", &self.snapshot));
        output.push_str(&format_counter_and_rate_table(&self.snapshot));
        output.push_str(&format_threshold_table(&self.evaluation));
        let _ = writeln!(output, "Seed: {}", self.seed);

        output
    }
}

fn format_counter_and_rate_table(snapshot: &MetricsSnapshot) -> String {
    let mut output = String::new();
    output.push_str("\n## Counters and Rates\n\n");
    let _ = writeln!(output, "{:<30} {:>12} {:>12}", "Metric", "Value", "Total");
    output.push_str(&"-".repeat(56));
    output.push('\n');

    for (name, series) in snapshot.iter() {
        match series {
            SeriesSnapshot::Counter(counter) => {
                let _ = writeln!(output, "{:<30} {:>12} {:>12}", name, counter.value, "");
            }
            SeriesSnapshot::Rate(rate) => {
                let ratio = rate
                    .ratio()
                    .map(|r| format!("{:.2}%", r * 100.0))
                    .unwrap_or_else(|| "-".to_string());
                let _ = writeln!(output, "{:<30} {:>12} {:>12}", name, ratio, rate.total);
            }
            SeriesSnapshot::Trend(_) => {}
        }
    }

    output
}
