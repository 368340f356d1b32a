use std::sync::Arc;
use tracing::info;

use crate::aggregator::MetricsRegistry;
use crate::client::{build_client, ServiceClient};
use crate::config::HarnessConfig;
use crate::errors::ConfigError;
use crate::publish::IdentifierSlot;
use crate::report::RunReport;
use crate::runner::ScenarioRunner;
use crate::scheduler::StageScheduler;
use crate::thresholds::{self, Threshold};

/// A validated, ready-to-run load test.
///
/// All configuration problems surface from [`LoadTest::new`]; once it returns
/// `Ok`, [`LoadTest::run`] always produces a report.
pub struct LoadTest {
    config: HarnessConfig,
    thresholds: Vec<Threshold>,
    seed: u64,
    client: ServiceClient,
    parsed_headers: reqwest::header::HeaderMap,
}

impl LoadTest {
    pub fn new(config: HarnessConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let thresholds = config.parsed_thresholds()?;
        let seed = config.seed.unwrap_or_else(rand::random);

        let built = build_client(&config.to_client_config())?;
        let client = ServiceClient::new(built.client, &config.base_url);

        Ok(Self {
            config,
            thresholds,
            seed,
            client,
            parsed_headers: built.parsed_headers,
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Seed in effect for this run (drawn at random when not configured).
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn parsed_headers(&self) -> &reqwest::header::HeaderMap {
        &self.parsed_headers
    }

    /// Runs every stage, then seals the metrics and evaluates thresholds.
    pub async fn run(self) -> RunReport {
        let plan = self.config.stage_plan();
        let registry = Arc::new(MetricsRegistry::new());
        let slot = Arc::new(if self.config.mix.keeps_pool() {
            IdentifierSlot::pooled()
        } else {
            IdentifierSlot::new()
        });

        let runner = Arc::new(ScenarioRunner::new(
            self.client,
            self.config.mix.clone(),
            self.config.to_scenario_config(self.seed),
            plan.peak_target(),
            registry.clone(),
            slot.clone(),
        ));

        info!(
            base_url = %self.config.base_url,
            seed = self.seed,
            mix = self.config.mix.label(),
            thresholds = self.thresholds.len(),
            "Starting load test"
        );

        runner.setup().await;

        let schedule =
            StageScheduler::new(plan, self.config.to_scheduler_config(), runner.clone())
                .run()
                .await;

        registry.seal();
        let snapshot = registry.snapshot();
        let evaluation = thresholds::evaluate(&self.thresholds, &snapshot);

        info!(
            verdict = %evaluation.overall,
            published = slot.published_count(),
            "Load test finished"
        );

        RunReport {
            seed: self.seed,
            schedule,
            snapshot,
            evaluation,
            published: slot.published_count(),
            records: runner.take_records(),
        }
    }
}
