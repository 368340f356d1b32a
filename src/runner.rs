//! Scenario runner: what a VU does in one iteration.
//!
//! Two scenario shapes are supported:
//!
//! - **Minimal**: one operation picked by the workload mix, checked and recorded,
//!   followed by pacing.
//! - **Correlated**: a `create` phase (writer roles only) followed by think time
//!   and an `access` phase that resolves the code just created, or the code the
//!   mix points at. The access phase is skipped while no code is known.
//!
//! Writes record under the create metrics, reads under the access metrics, so
//! thresholds can target each phase on its own.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::{self, Duration, Instant};
use tracing::{debug, info, warn};

use crate::aggregator::{MetricKind, MetricsRegistry};
use crate::checks::{check_operation, CheckResult};
use crate::client::{RawResponse, ServiceClient};
use crate::errors::FailureKind;
use crate::metrics::{CHECKS_TOTAL, OPERATIONS_TOTAL, OPERATION_DURATION_SECONDS};
use crate::policy::{
    vu_rng, CreateUrlRequest, Decision, Operation, ReadTarget, WorkloadMix,
};
use crate::publish::IdentifierSlot;
use crate::scheduler::{VuBody, VuContext};
use crate::utils::serde_duration;

pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const ITERATIONS: &str = "iterations";
pub const CHECKS: &str = "checks";

const REGISTER_USER_STATUS: &str = "Users: status is 201";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScenarioKind {
    #[default]
    Minimal,
    Correlated,
}

/// A bounded delay, either fixed or drawn uniformly from a range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Pacing {
    Fixed(#[serde(with = "serde_duration")] Duration),

    Random {
        #[serde(with = "serde_duration")]
        min: Duration,
        #[serde(with = "serde_duration")]
        max: Duration,
    },
}

impl Default for Pacing {
    fn default() -> Self {
        Pacing::Fixed(Duration::from_secs(1))
    }
}

impl Pacing {
    /// Delay for this iteration, drawn from the VU's RNG.
    pub fn sample(&self, rng: &mut StdRng) -> Duration {
        match self {
            Pacing::Fixed(duration) => *duration,
            Pacing::Random { min, max } => {
                let min_ms = min.as_millis() as u64;
                let max_ms = max.as_millis() as u64;

                if min_ms >= max_ms {
                    return *min;
                }

                Duration::from_millis(rng.gen_range(min_ms..=max_ms))
            }
        }
    }
}

/// Names of the per-phase series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricNames {
    pub create_duration: String,
    pub access_duration: String,
    pub failed_requests: String,
    pub success_rate: String,
}

impl Default for MetricNames {
    fn default() -> Self {
        Self {
            create_duration: "create_url_duration".to_string(),
            access_duration: "access_url_duration".to_string(),
            failed_requests: "failed_requests".to_string(),
            success_rate: "success_rate".to_string(),
        }
    }
}

impl MetricNames {
    /// Every series a run records, with its kind.
    pub fn all(&self) -> Vec<(&str, MetricKind)> {
        vec![
            (HTTP_REQS, MetricKind::Counter),
            (HTTP_REQ_DURATION, MetricKind::Trend),
            (HTTP_REQ_FAILED, MetricKind::Rate),
            (ITERATIONS, MetricKind::Counter),
            (CHECKS, MetricKind::Rate),
            (self.create_duration.as_str(), MetricKind::Trend),
            (self.access_duration.as_str(), MetricKind::Trend),
            (self.failed_requests.as_str(), MetricKind::Counter),
            (self.success_rate.as_str(), MetricKind::Rate),
        ]
    }

    fn trend_for(&self, operation: &Operation) -> &str {
        match operation {
            Operation::Write(_) => &self.create_duration,
            Operation::Read(_) => &self.access_duration,
        }
    }
}

/// Everything the runner needs to know about the scenario.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub kind: ScenarioKind,
    pub write: CreateUrlRequest,

    /// Delay at the end of every iteration
    pub pacing: Pacing,

    /// Delay between the create and access phases of a correlated iteration
    pub think_time: Pacing,

    /// Record transport failures in the trends using their elapsed time
    pub record_failed_latency: bool,

    /// Register `write.user_id` through `POST /users` before traffic starts
    pub register_user: bool,

    pub metric_names: MetricNames,

    /// Keep every operation record in memory for the run report
    pub keep_records: bool,

    pub seed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// One executed operation.
#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub vu: usize,
    pub operation: &'static str,
    pub short_code: Option<String>,
    pub started_at: Instant,
    pub finished_at: Instant,
    pub outcome: Outcome,

    /// None when no response was received
    pub status_code: Option<u16>,
    pub failure: Option<FailureKind>,
}

impl OperationRecord {
    pub fn latency(&self) -> Duration {
        self.finished_at.duration_since(self.started_at)
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// Executes scenario iterations for every VU of a run.
pub struct ScenarioRunner {
    client: ServiceClient,
    mix: WorkloadMix,
    scenario: ScenarioConfig,
    peak_target: usize,
    registry: Arc<MetricsRegistry>,
    slot: Arc<IdentifierSlot>,
    records: Mutex<Vec<OperationRecord>>,
}

impl ScenarioRunner {
    pub fn new(
        client: ServiceClient,
        mix: WorkloadMix,
        scenario: ScenarioConfig,
        peak_target: usize,
        registry: Arc<MetricsRegistry>,
        slot: Arc<IdentifierSlot>,
    ) -> Self {
        for (name, kind) in scenario.metric_names.all() {
            registry.declare(name, kind);
        }

        Self {
            client,
            mix,
            scenario,
            peak_target,
            registry,
            slot,
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn slot(&self) -> &Arc<IdentifierSlot> {
        &self.slot
    }

    /// Operation records collected so far (empty unless `keep_records` is set).
    pub fn take_records(&self) -> Vec<OperationRecord> {
        std::mem::take(&mut *self.records.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// One-off setup before any VU starts.
    ///
    /// A failed user registration is logged and counted as a failed check; it
    /// does not stop the run.
    pub async fn setup(&self) {
        if !self.scenario.register_user {
            return;
        }

        let user_id = &self.scenario.write.user_id;
        let passed = match self.client.register_user(user_id).await {
            Ok(RawResponse { status: 201, .. }) => {
                info!(user_id = %user_id, "Registered load test user");
                true
            }
            Ok(RawResponse { status, body }) => {
                warn!(user_id = %user_id, status, body = %body, "User registration rejected");
                false
            }
            Err(e) => {
                warn!(
                    user_id = %user_id,
                    error = %e,
                    category = %FailureKind::from_reqwest_error(&e),
                    "User registration failed"
                );
                false
            }
        };

        self.record_checks(&[CheckResult {
            name: REGISTER_USER_STATUS,
            passed,
        }]);
    }

    /// Issues `operation`, checks the response and records the outcome.
    pub async fn execute(&self, vu: &mut VuContext, operation: Operation) -> OperationRecord {
        let label = operation.label();
        let started_at = Instant::now();
        let result = self.client.execute(&operation).await;
        let finished_at = Instant::now();
        let latency = finished_at.duration_since(started_at);

        let names = &self.scenario.metric_names;
        self.registry.add_counter(HTTP_REQS, 1);

        let (status_code, failure, created) = match result {
            Ok(response) => {
                let checks = check_operation(&operation, response.status, &response.body);
                self.record_checks(&checks.checks);
                self.registry.add_trend(HTTP_REQ_DURATION, latency);
                self.registry.add_trend(names.trend_for(&operation), latency);

                if let Some(ref violation) = checks.failure {
                    debug!(
                        vu = vu.ordinal,
                        operation = label,
                        status = response.status,
                        error = %violation,
                        "Contract violation"
                    );
                }
                (
                    Some(response.status),
                    checks.failure.map(|f| f.kind()),
                    checks.short_code,
                )
            }
            Err(e) => {
                let kind = FailureKind::from_reqwest_error(&e);
                warn!(
                    vu = vu.ordinal,
                    operation = label,
                    error = %e,
                    category = %kind,
                    "Request failed"
                );
                // No response: every check of the operation fails.
                self.record_checks(&check_operation(&operation, 0, "").checks);
                if self.scenario.record_failed_latency {
                    self.registry.add_trend(HTTP_REQ_DURATION, latency);
                    self.registry.add_trend(names.trend_for(&operation), latency);
                }
                (None, Some(kind), None)
            }
        };

        let passed = failure.is_none();
        self.registry.add_rate(HTTP_REQ_FAILED, !passed);
        self.registry.add_rate(&names.success_rate, passed);
        self.registry
            .add_counter(&names.failed_requests, u64::from(!passed));

        let outcome_label = failure.map_or("success", |f| f.label());
        OPERATIONS_TOTAL
            .with_label_values(&[label, outcome_label])
            .inc();
        OPERATION_DURATION_SECONDS
            .with_label_values(&[label])
            .observe(latency.as_secs_f64());

        let short_code = match (&operation, created) {
            (Operation::Write(request), Some(code)) => {
                vu.last_created = Some(ReadTarget::existing(&code, &request.url));
                if self.mix.publishes(vu.role) {
                    let seq = self.slot.publish(code.clone(), request.url.clone());
                    debug!(vu = vu.ordinal, seq, short_code = %code, "Published short code");
                }
                Some(code)
            }
            (Operation::Read(target), _) => Some(target.short_code.clone()),
            _ => None,
        };

        let record = OperationRecord {
            vu: vu.ordinal,
            operation: label,
            short_code,
            started_at,
            finished_at,
            outcome: if passed {
                Outcome::Success
            } else {
                Outcome::Failure
            },
            status_code,
            failure,
        };

        if self.scenario.keep_records {
            self.records
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(record.clone());
        }

        record
    }

    async fn minimal_iteration(&self, vu: &mut VuContext, stage_index: usize) {
        match self.mix.decide(vu.role, stage_index, &self.slot, &mut vu.rng) {
            Decision::Write => {
                self.execute(vu, Operation::Write(self.scenario.write.clone()))
                    .await;
                self.registry.add_counter(ITERATIONS, 1);
            }
            Decision::Read(target) => {
                self.execute(vu, Operation::Read(target)).await;
                self.registry.add_counter(ITERATIONS, 1);
            }
            Decision::Skip => {
                debug!(vu = vu.ordinal, "No short code published yet, skipping iteration");
            }
        }
    }

    async fn correlated_iteration(&self, vu: &mut VuContext, stage_index: usize) {
        let decision = self
            .mix
            .decide(vu.role, stage_index, &self.slot, &mut vu.rng);
        if decision == Decision::Skip && vu.last_created.is_none() {
            debug!(vu = vu.ordinal, "No short code known yet, skipping iteration");
            return;
        }

        // create phase
        let created = decision == Decision::Write;
        if created {
            self.execute(vu, Operation::Write(self.scenario.write.clone()))
                .await;
        }

        // think time separates the phases for every VU, writer or not
        let think = self.scenario.think_time.sample(&mut vu.rng);
        time::sleep(think).await;

        // access phase
        let pending = match decision {
            Decision::Read(target) => Some(target),
            _ => None,
        };
        let target = pending
            .or_else(|| vu.last_created.clone())
            .or_else(|| self.mix.read_target(&self.slot, &mut vu.rng));

        let accessed = match target {
            Some(target) => {
                self.execute(vu, Operation::Read(target)).await;
                true
            }
            None => {
                debug!(vu = vu.ordinal, "No short code known yet, skipping access phase");
                false
            }
        };

        if created || accessed {
            self.registry.add_counter(ITERATIONS, 1);
        }
    }

    fn record_checks(&self, checks: &[CheckResult]) {
        for check in checks {
            self.registry.add_rate(CHECKS, check.passed);
            CHECKS_TOTAL
                .with_label_values(&[check.name, if check.passed { "passed" } else { "failed" }])
                .inc();
        }
    }
}

#[async_trait]
impl VuBody for ScenarioRunner {
    fn spawn_context(&self, ordinal: usize) -> VuContext {
        VuContext {
            ordinal,
            role: self.mix.assign_role(ordinal, self.peak_target),
            rng: vu_rng(self.scenario.seed, ordinal),
            last_created: None,
            iterations: 0,
        }
    }

    async fn iterate(&self, vu: &mut VuContext, stage_index: usize) {
        match self.scenario.kind {
            ScenarioKind::Minimal => self.minimal_iteration(vu, stage_index).await,
            ScenarioKind::Correlated => self.correlated_iteration(vu, stage_index).await,
        }

        let pause = self.scenario.pacing.sample(&mut vu.rng);
        time::sleep(pause).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{build_client, ClientConfig};
    use crate::policy::ReadSelection;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ORIGINAL_URL: &str = "https://kubernetes.io/docs/concepts/overview/components/";

    fn scenario(kind: ScenarioKind) -> ScenarioConfig {
        ScenarioConfig {
            kind,
            write: CreateUrlRequest {
                url: ORIGINAL_URL.to_string(),
                user_id: "1c8be2ab-694d-40a1-acda-6d2ff09e8b76".to_string(),
            },
            pacing: Pacing::Fixed(Duration::ZERO),
            think_time: Pacing::Fixed(Duration::ZERO),
            record_failed_latency: false,
            register_user: true,
            metric_names: MetricNames::default(),
            keep_records: true,
            seed: 1,
        }
    }

    fn runner(base_url: &str, mix: WorkloadMix, kind: ScenarioKind) -> ScenarioRunner {
        runner_with(base_url, mix, scenario(kind), IdentifierSlot::new())
    }

    fn runner_with(
        base_url: &str,
        mix: WorkloadMix,
        scenario: ScenarioConfig,
        slot: IdentifierSlot,
    ) -> ScenarioRunner {
        let client = build_client(&ClientConfig::default()).unwrap().client;
        ScenarioRunner::new(
            ServiceClient::new(client, base_url),
            mix,
            scenario,
            5,
            Arc::new(MetricsRegistry::new()),
            Arc::new(slot),
        )
    }

    fn pinned(read_selection: ReadSelection) -> WorkloadMix {
        WorkloadMix::RolePinned {
            producer_ordinal: 1,
            read_selection,
        }
    }

    async fn mount_create(server: &MockServer, code: &str) {
        Mock::given(method("POST"))
            .and(path("/create"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(serde_json::json!({ "shortUrl": code })),
            )
            .mount(server)
            .await;
    }

    async fn mount_resolve(server: &MockServer, code: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/short/{}", code)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "originalUrl": ORIGINAL_URL })),
            )
            .mount(server)
            .await;
    }

    #[test]
    fn test_pacing_sample() {
        let mut rng = vu_rng(3, 1);
        assert_eq!(
            Pacing::Fixed(Duration::from_millis(500)).sample(&mut rng),
            Duration::from_millis(500)
        );

        let random = Pacing::Random {
            min: Duration::from_secs(10),
            max: Duration::from_secs(20),
        };
        for _ in 0..100 {
            let d = random.sample(&mut rng);
            assert!(d >= Duration::from_secs(10) && d <= Duration::from_secs(20));
        }
    }

    #[test]
    fn test_pacing_from_yaml() {
        let fixed: Pacing = serde_yaml::from_str("500ms").unwrap();
        assert_eq!(fixed, Pacing::Fixed(Duration::from_millis(500)));

        let random: Pacing = serde_yaml::from_str("min: 10s\nmax: 20s").unwrap();
        assert_eq!(
            random,
            Pacing::Random {
                min: Duration::from_secs(10),
                max: Duration::from_secs(20)
            }
        );
    }

    #[tokio::test]
    async fn test_successful_write_records_create_metrics() {
        let server = MockServer::start().await;
        mount_create(&server, "abc123").await;

        let runner = runner(&server.uri(), WorkloadMix::WriteOnly, ScenarioKind::Minimal);
        let mut vu = runner.spawn_context(1);
        runner.iterate(&mut vu, 0).await;

        let snapshot = runner.registry.snapshot();
        assert_eq!(snapshot.trend("create_url_duration").unwrap().count(), 1);
        assert!(snapshot.trend("access_url_duration").unwrap().is_empty());
        assert_eq!(snapshot.rate("success_rate").unwrap().successes, 1);
        assert_eq!(snapshot.counter("http_reqs"), Some(1));
        assert_eq!(snapshot.counter("iterations"), Some(1));
        assert_eq!(snapshot.counter("failed_requests"), Some(0));
        assert_eq!(
            vu.last_created,
            Some(ReadTarget::existing("abc123", ORIGINAL_URL))
        );
        // writers outside the role-pinned mix do not publish
        assert!(runner.slot().latest().is_none());
    }

    #[tokio::test]
    async fn test_missing_read_is_inverted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/short/CCaICRddd"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/short/exists"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mix = WorkloadMix::ReadOnly {
            read_target: ReadTarget::missing("CCaICRddd"),
        };
        let runner = runner(&server.uri(), mix, ScenarioKind::Minimal);
        let mut vu = runner.spawn_context(1);

        let ok = runner
            .execute(&mut vu, Operation::Read(ReadTarget::missing("CCaICRddd")))
            .await;
        assert!(ok.succeeded());
        assert_eq!(ok.status_code, Some(404));

        let bad = runner
            .execute(&mut vu, Operation::Read(ReadTarget::missing("exists")))
            .await;
        assert!(!bad.succeeded());
        assert_eq!(bad.failure, Some(FailureKind::UnexpectedStatus));

        let snapshot = runner.registry.snapshot();
        assert_eq!(snapshot.counter("failed_requests"), Some(1));
        let rate = snapshot.rate("success_rate").unwrap();
        assert_eq!((rate.successes, rate.total), (1, 2));
    }

    #[tokio::test]
    async fn test_transport_failure_skips_trend() {
        let runner = runner("http://127.0.0.1:9", WorkloadMix::WriteOnly, ScenarioKind::Minimal);
        let mut vu = runner.spawn_context(1);

        let record = runner
            .execute(&mut vu, Operation::Write(runner.scenario.write.clone()))
            .await;
        assert!(!record.succeeded());
        assert_eq!(record.status_code, None);
        assert!(record.failure.unwrap().is_transport());

        let snapshot = runner.registry.snapshot();
        assert!(snapshot.trend("create_url_duration").unwrap().is_empty());
        assert!(snapshot.trend("http_req_duration").unwrap().is_empty());
        assert_eq!(snapshot.counter("failed_requests"), Some(1));
        assert_eq!(snapshot.rate("http_req_failed").unwrap().successes, 1);
        assert_eq!(snapshot.rate("checks").unwrap().successes, 0);
    }

    #[tokio::test]
    async fn test_role_pinned_reader_waits_for_producer() {
        let server = MockServer::start().await;
        mount_create(&server, "pinned1").await;
        mount_resolve(&server, "pinned1").await;

        let mix = pinned(ReadSelection::Latest);
        let runner = runner(&server.uri(), mix, ScenarioKind::Minimal);
        let mut producer = runner.spawn_context(1);
        let mut reader = runner.spawn_context(2);

        runner.iterate(&mut reader, 0).await;
        assert!(runner.take_records().is_empty());

        runner.iterate(&mut producer, 0).await;
        runner.iterate(&mut reader, 0).await;

        let records = runner.take_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].operation, "create");
        assert_eq!(records[1].operation, "resolve");
        assert_eq!(records[1].short_code.as_deref(), Some("pinned1"));
        assert!(records.iter().all(OperationRecord::succeeded));
        assert_eq!(runner.slot().published_count(), 1);
    }

    #[tokio::test]
    async fn test_correlated_iteration_accesses_own_code() {
        let server = MockServer::start().await;
        mount_create(&server, "own42").await;
        mount_resolve(&server, "own42").await;

        let mix = pinned(ReadSelection::Latest);
        let runner = runner(&server.uri(), mix, ScenarioKind::Correlated);
        let mut producer = runner.spawn_context(1);
        runner.iterate(&mut producer, 0).await;

        let records = runner.take_records();
        let ops: Vec<_> = records.iter().map(|r| r.operation).collect();
        assert_eq!(ops, vec!["create", "resolve"]);
        assert!(records[0].finished_at <= records[1].started_at);

        let snapshot = runner.registry.snapshot();
        assert_eq!(snapshot.trend("create_url_duration").unwrap().count(), 1);
        assert_eq!(snapshot.trend("access_url_duration").unwrap().count(), 1);
        assert_eq!(snapshot.counter("iterations"), Some(1));
    }

    #[tokio::test]
    async fn test_correlated_reader_skips_access_without_code() {
        let mix = pinned(ReadSelection::Latest);
        let runner = runner("http://127.0.0.1:9", mix, ScenarioKind::Correlated);
        let mut reader = runner.spawn_context(3);
        runner.iterate(&mut reader, 0).await;

        let snapshot = runner.registry.snapshot();
        assert_eq!(snapshot.counter("http_reqs"), Some(0));
        assert_eq!(snapshot.counter("iterations"), Some(0));
    }

    #[tokio::test]
    async fn test_correlated_reader_thinks_before_access() {
        let server = MockServer::start().await;
        mount_resolve(&server, "seeded1").await;

        let mut scenario = scenario(ScenarioKind::Correlated);
        scenario.think_time = Pacing::Fixed(Duration::from_millis(200));
        let runner = runner_with(
            &server.uri(),
            pinned(ReadSelection::Latest),
            scenario,
            IdentifierSlot::new(),
        );
        runner
            .slot()
            .publish("seeded1".into(), ORIGINAL_URL.to_string());

        let mut reader = runner.spawn_context(2);
        let started = Instant::now();
        runner.iterate(&mut reader, 0).await;

        assert!(
            started.elapsed() >= Duration::from_millis(200),
            "reader iteration took {:?}",
            started.elapsed()
        );
        let records = runner.take_records();
        let ops: Vec<_> = records.iter().map(|r| r.operation).collect();
        assert_eq!(ops, vec!["resolve"]);
        assert!(records[0].started_at >= started + Duration::from_millis(200));
        assert_eq!(runner.registry.snapshot().counter("iterations"), Some(1));
    }

    #[tokio::test]
    async fn test_random_published_reader_resolves_pooled_codes() {
        let server = MockServer::start().await;
        for code in ["pool0", "pool1", "pool2"] {
            mount_resolve(&server, code).await;
        }

        let runner = runner_with(
            &server.uri(),
            pinned(ReadSelection::RandomPublished),
            scenario(ScenarioKind::Minimal),
            IdentifierSlot::pooled(),
        );
        for code in ["pool0", "pool1", "pool2"] {
            runner.slot().publish(code.into(), ORIGINAL_URL.to_string());
        }

        let mut reader = runner.spawn_context(2);
        for _ in 0..30 {
            runner.iterate(&mut reader, 0).await;
        }

        let records = runner.take_records();
        assert_eq!(records.len(), 30);
        assert!(records.iter().all(OperationRecord::succeeded));
        let distinct: std::collections::HashSet<_> =
            records.iter().filter_map(|r| r.short_code.clone()).collect();
        assert!(distinct.len() > 1, "only {:?} resolved", distinct);
    }

    #[tokio::test]
    async fn test_setup_registers_user() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let runner = runner(&server.uri(), WorkloadMix::WriteOnly, ScenarioKind::Minimal);
        runner.setup().await;

        let checks = runner.registry.snapshot().rate("checks").unwrap();
        assert_eq!((checks.successes, checks.total), (1, 1));
    }

    #[tokio::test]
    async fn test_failed_setup_is_not_fatal() {
        let runner = runner("http://127.0.0.1:9", WorkloadMix::WriteOnly, ScenarioKind::Minimal);
        runner.setup().await;

        let checks = runner.registry.snapshot().rate("checks").unwrap();
        assert_eq!((checks.successes, checks.total), (0, 1));
    }
}
