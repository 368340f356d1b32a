//! Run configuration.
//!
//! A run is described by a YAML file (camelCase keys) or by one of the built-in
//! [`Preset`]s. A few environment variables override the loaded values:
//!
//! | Variable          | Effect                                 |
//! |-------------------|----------------------------------------|
//! | `LOADTEST_CONFIG` | Path of the YAML file to load          |
//! | `LOADTEST_PRESET` | Preset used when no file is given      |
//! | `TARGET_URL`      | Overrides `baseUrl`                    |
//! | `RANDOM_SEED`     | Overrides `seed`                       |
//! | `METRICS_PORT`    | Overrides `metricsPort`                |

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tokio::time::Duration;

use crate::client::ClientConfig;
use crate::config_validation::{RangeValidator, StageValidator, UrlValidator, ValidationContext};
use crate::errors::ConfigError;
use crate::policy::{CreateUrlRequest, ReadSelection, ReadTarget, WorkloadMix};
use crate::runner::{MetricNames, Pacing, ScenarioConfig, ScenarioKind};
use crate::scheduler::SchedulerConfig;
use crate::stages::{Stage, StagePlan};
use crate::thresholds::Threshold;
use crate::utils::serde_duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:3001";

fn default_tick() -> Duration {
    Duration::from_millis(100)
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(90)
}

fn default_max_idle_per_host() -> usize {
    32
}

/// HTTP client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSettings {
    #[serde(with = "serde_duration", default = "default_timeout")]
    pub timeout: Duration,

    #[serde(default)]
    pub skip_tls_verify: bool,

    /// `hostname:ip:port` DNS override
    #[serde(default)]
    pub resolve_target_addr: Option<String>,

    /// Comma-separated `Name:Value` pairs; `\,` escapes a comma
    #[serde(default)]
    pub custom_headers: Option<String>,

    #[serde(default = "default_max_idle_per_host")]
    pub max_idle_per_host: usize,

    #[serde(with = "serde_duration", default = "default_idle_timeout")]
    pub idle_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            skip_tls_verify: false,
            resolve_target_addr: None,
            custom_headers: None,
            max_idle_per_host: default_max_idle_per_host(),
            idle_timeout: default_idle_timeout(),
        }
    }
}

/// Scenario shape and pacing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioSettings {
    #[serde(default)]
    pub kind: ScenarioKind,

    /// Request sent by every write
    pub write: CreateUrlRequest,

    #[serde(default)]
    pub pacing: Pacing,

    #[serde(default = "default_think_time")]
    pub think_time: Pacing,

    #[serde(default)]
    pub record_failed_latency: bool,

    #[serde(default)]
    pub register_user: bool,

    #[serde(default)]
    pub metric_names: MetricNames,

    #[serde(default)]
    pub keep_records: bool,
}

fn default_think_time() -> Pacing {
    Pacing::Fixed(Duration::ZERO)
}

/// Complete description of one load test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarnessConfig {
    pub base_url: String,

    /// Run seed; a random one is drawn (and logged) when absent
    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(with = "serde_duration", default = "default_tick")]
    pub tick: Duration,

    /// Bound on the final drain; VUs still busy after it are aborted.
    /// Unset waits for every in-flight iteration.
    #[serde(default, with = "serde_duration::option")]
    pub graceful_stop: Option<Duration>,

    /// Serve Prometheus metrics on this port during the run
    #[serde(default)]
    pub metrics_port: Option<u16>,

    #[serde(default)]
    pub client: ClientSettings,

    pub stages: Vec<Stage>,
    pub mix: WorkloadMix,
    pub scenario: ScenarioSettings,

    /// Metric name to k6-style expressions
    #[serde(default)]
    pub thresholds: BTreeMap<String, Vec<String>>,
}

/// Built-in configurations mirroring the classic benchmark scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// Seeding cohort plus an 80/20 read/write mix
    MixedReadWrite,

    /// Every VU writes
    FullWrite,

    /// Every VU resolves a code that does not exist
    NonExistentRead,

    /// One producer creates, everybody resolves what it published
    RealScenario,
}

impl FromStr for Preset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "mixedreadwrite" | "mixed" => Ok(Preset::MixedReadWrite),
            "fullwrite" | "write" => Ok(Preset::FullWrite),
            "nonexistentread" | "missing" => Ok(Preset::NonExistentRead),
            "realscenario" | "real" => Ok(Preset::RealScenario),
            _ => Err(ConfigError::Env {
                name: "LOADTEST_PRESET".to_string(),
                message: format!(
                    "unknown preset '{}'. Use mixedReadWrite, fullWrite, nonExistentRead or realScenario",
                    s
                ),
            }),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::read_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: HarnessConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn read_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Loads the file named by `LOADTEST_CONFIG`, or else the preset named by
    /// `LOADTEST_PRESET` (mixedReadWrite by default), then applies overrides.
    ///
    /// Validation runs once, after the overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match env::var("LOADTEST_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::read_file(path.trim())?,
            _ => {
                let preset = match env::var("LOADTEST_PRESET") {
                    Ok(name) => name.parse()?,
                    Err(_) => Preset::MixedReadWrite,
                };
                Self::preset(preset, DEFAULT_BASE_URL)
            }
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `TARGET_URL`, `RANDOM_SEED` and `METRICS_PORT` when set.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = env::var("TARGET_URL") {
            self.base_url = url;
        }

        if let Ok(seed) = env::var("RANDOM_SEED") {
            self.seed = Some(parse_env("RANDOM_SEED", &seed)?);
        }

        if let Ok(port) = env::var("METRICS_PORT") {
            self.metrics_port = Some(parse_env("METRICS_PORT", &port)?);
        }

        Ok(())
    }

    pub fn preset(preset: Preset, base_url: &str) -> Self {
        let google = CreateUrlRequest {
            url: "https://www.google.com".to_string(),
            user_id: "cb9f7d80-691c-4b33-88c6-b1c99dac8cbc".to_string(),
        };
        let short_burst = vec![
            Stage::linear(Duration::from_secs(1), 5),
            Stage::linear(Duration::from_secs(1), 5),
            Stage::linear(Duration::from_secs(1), 0),
        ];
        let p95_under_500 = BTreeMap::from([(
            "http_req_duration".to_string(),
            vec!["p(95)<500".to_string()],
        )]);

        let (stages, mix, scenario, thresholds) = match preset {
            Preset::MixedReadWrite => (
                short_burst,
                WorkloadMix::PhaseGated {
                    p_read: 0.8,
                    seeding_fraction: 0.2,
                    seeding_until_stage: None,
                    read_target: ReadTarget::existing("CCaICRin", &google.url),
                    read_selection: None,
                },
                ScenarioSettings::minimal(google, Pacing::Fixed(Duration::from_secs(1))),
                BTreeMap::new(),
            ),
            Preset::FullWrite => (
                short_burst,
                WorkloadMix::WriteOnly,
                ScenarioSettings::minimal(google, Pacing::Fixed(Duration::from_millis(500))),
                p95_under_500,
            ),
            Preset::NonExistentRead => (
                short_burst,
                WorkloadMix::ReadOnly {
                    read_target: ReadTarget::missing("CCaICRddd"),
                },
                ScenarioSettings::minimal(google, Pacing::Fixed(Duration::ZERO)),
                p95_under_500,
            ),
            Preset::RealScenario => {
                let kubernetes = CreateUrlRequest {
                    url: "https://kubernetes.io/docs/concepts/overview/components/".to_string(),
                    user_id: "1c8be2ab-694d-40a1-acda-6d2ff09e8b76".to_string(),
                };
                let mut scenario =
                    ScenarioSettings::minimal(kubernetes, Pacing::Fixed(Duration::from_secs(1)));
                scenario.kind = ScenarioKind::Correlated;
                scenario.think_time = Pacing::Fixed(Duration::from_secs(5));

                (
                    vec![
                        Stage::linear(Duration::from_secs(5), 1),
                        Stage::linear(Duration::from_secs(10), 5000),
                        Stage::linear(Duration::from_secs(5), 0),
                    ],
                    WorkloadMix::RolePinned {
                        producer_ordinal: 1,
                        read_selection: ReadSelection::Latest,
                    },
                    scenario,
                    BTreeMap::from([
                        ("http_req_duration".to_string(), vec!["p(95)<500".to_string()]),
                        ("create_url_duration".to_string(), vec!["p(95)<600".to_string()]),
                        ("access_url_duration".to_string(), vec!["p(95)<400".to_string()]),
                        ("success_rate".to_string(), vec!["rate>0.95".to_string()]),
                    ]),
                )
            }
        };

        Self {
            base_url: base_url.to_string(),
            seed: None,
            tick: default_tick(),
            graceful_stop: None,
            metrics_port: None,
            client: ClientSettings::default(),
            stages,
            mix,
            scenario,
            thresholds,
        }
    }

    pub fn stage_plan(&self) -> StagePlan {
        StagePlan::new(self.stages.clone())
    }

    /// Parses every threshold expression.
    pub fn parsed_thresholds(&self) -> Result<Vec<Threshold>, ConfigError> {
        let mut parsed = Vec::new();
        for (metric, expressions) in &self.thresholds {
            for expression in expressions {
                let threshold = Threshold::parse(metric, expression)
                    .map_err(|e| ConfigError::Validation(format!("thresholds.{}: {}", metric, e)))?;
                parsed.push(threshold);
            }
        }
        Ok(parsed)
    }

    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            request_timeout: self.client.timeout,
            skip_tls_verify: self.client.skip_tls_verify,
            resolve_target_addr: self.client.resolve_target_addr.clone(),
            custom_headers: self.client.custom_headers.clone(),
            max_idle_per_host: self.client.max_idle_per_host,
            idle_timeout: self.client.idle_timeout,
        }
    }

    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick: self.tick,
            graceful_stop: self.graceful_stop,
        }
    }

    pub fn to_scenario_config(&self, seed: u64) -> ScenarioConfig {
        ScenarioConfig {
            kind: self.scenario.kind,
            write: self.scenario.write.clone(),
            pacing: self.scenario.pacing.clone(),
            think_time: self.scenario.think_time.clone(),
            record_failed_latency: self.scenario.record_failed_latency,
            register_user: self.scenario.register_user,
            metric_names: self.scenario.metric_names.clone(),
            keep_records: self.scenario.keep_records,
            seed,
        }
    }

    /// Validates every field, reporting all problems at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut ctx = ValidationContext::new();

        ctx.enter("baseUrl");
        ctx.check(UrlValidator::validate(&self.base_url));
        ctx.exit();

        ctx.enter("tick");
        if self.tick.is_zero() {
            ctx.field_error("Tick must be greater than 0".to_string());
        }
        ctx.exit();

        ctx.enter("stages");
        ctx.check(StageValidator::validate_plan(&self.stages));
        for (idx, stage) in self.stages.iter().enumerate() {
            ctx.enter(&format!("[{}]", idx));
            ctx.check(StageValidator::validate_stage(stage));
            ctx.exit();
        }
        ctx.exit();

        let peak = self.stage_plan().peak_target();

        ctx.enter("mix");
        match &self.mix {
            WorkloadMix::PhaseGated {
                p_read,
                seeding_fraction,
                seeding_until_stage,
                read_target,
                ..
            } => {
                ctx.enter("pRead");
                ctx.check(RangeValidator::validate_probability(*p_read, "pRead"));
                ctx.exit();

                ctx.enter("seedingFraction");
                ctx.check(RangeValidator::validate_probability(
                    *seeding_fraction,
                    "seedingFraction",
                ));
                ctx.exit();

                if let Some(until) = seeding_until_stage {
                    ctx.enter("seedingUntilStage");
                    if *until >= self.stages.len() {
                        ctx.field_error(format!(
                            "Stage index {} does not exist (run has {} stages)",
                            until,
                            self.stages.len()
                        ));
                    }
                    ctx.exit();
                }

                validate_read_target(&mut ctx, read_target);
            }
            WorkloadMix::RolePinned {
                producer_ordinal, ..
            } => {
                ctx.enter("producerOrdinal");
                ctx.check(RangeValidator::validate_usize(
                    *producer_ordinal,
                    1,
                    peak.max(1),
                    "producerOrdinal",
                ));
                ctx.exit();
            }
            WorkloadMix::ReadOnly { read_target } => validate_read_target(&mut ctx, read_target),
            WorkloadMix::WriteOnly => {}
        }
        ctx.exit();

        ctx.enter("scenario");
        if self.scenario.kind == ScenarioKind::Correlated
            && matches!(self.mix, WorkloadMix::ReadOnly { .. })
        {
            ctx.field_error(
                "A correlated scenario needs a mix with at least one writer role".to_string(),
            );
        }

        ctx.enter("write");
        if self.scenario.write.url.is_empty() {
            ctx.field_error("Write url cannot be empty".to_string());
        }
        if self.scenario.write.user_id.is_empty() {
            ctx.field_error("Write userId cannot be empty".to_string());
        }
        ctx.exit();

        for (field, pacing) in [
            ("pacing", &self.scenario.pacing),
            ("thinkTime", &self.scenario.think_time),
        ] {
            if let Pacing::Random { min, max } = pacing {
                if min > max {
                    ctx.enter(field);
                    ctx.field_error(format!("min ({:?}) must not exceed max ({:?})", min, max));
                    ctx.exit();
                }
            }
        }
        ctx.exit();

        ctx.enter("thresholds");
        let known = self.scenario.metric_names.all();
        for (metric, expressions) in &self.thresholds {
            ctx.enter(metric);
            for expression in expressions {
                match Threshold::parse(metric, expression) {
                    Ok(threshold) => {
                        if let Err(e) = threshold.validate_against(&known) {
                            ctx.field_error(e.to_string());
                        }
                    }
                    Err(e) => ctx.field_error(e.to_string()),
                }
            }
            ctx.exit();
        }
        ctx.exit();

        ctx.into_result()
            .map_err(|e| ConfigError::Validation(e.to_string()))
    }

    /// Prints the configuration summary.
    pub fn print_summary(&self, seed: u64, parsed_headers: &reqwest::header::HeaderMap) {
        let plan = self.stage_plan();
        println!("Starting load test:");
        println!("  Target URL: {}", self.base_url);
        println!("  Seed: {}", seed);
        println!("  Workload Mix: {}", self.mix.label());
        println!("  Scenario: {:?}", self.scenario.kind);
        println!("  Peak VUs: {}", plan.peak_target());
        println!("  Overall Test Duration: {:?}", plan.total_duration());
        for (idx, stage) in self.stages.iter().enumerate() {
            println!(
                "    Stage {}: {:?} -> {} VUs ({:?})",
                idx, stage.duration, stage.target, stage.ramp
            );
        }
        match self.graceful_stop {
            Some(bound) => println!("  Graceful Stop: {:?} (stragglers aborted)", bound),
            None => println!("  Graceful Stop: wait for in-flight iterations"),
        }
        println!("  Skip TLS Verify: {}", self.client.skip_tls_verify);

        if parsed_headers.is_empty() {
            println!("  Custom Headers Enabled: No");
        } else {
            println!("  Custom Headers Enabled: Yes");
            for (name, value) in parsed_headers.iter() {
                println!(
                    "    {}: {}",
                    name,
                    value.to_str().unwrap_or("<non-ASCII or sensitive value>")
                );
            }
        }

        if !self.thresholds.is_empty() {
            println!("  Thresholds:");
            for (metric, expressions) in &self.thresholds {
                println!("    {}: {}", metric, expressions.join(", "));
            }
        }
    }
}

impl ScenarioSettings {
    fn minimal(write: CreateUrlRequest, pacing: Pacing) -> Self {
        Self {
            kind: ScenarioKind::Minimal,
            write,
            pacing,
            think_time: default_think_time(),
            record_failed_latency: false,
            register_user: false,
            metric_names: MetricNames::default(),
            keep_records: false,
        }
    }
}

fn validate_read_target(ctx: &mut ValidationContext, target: &ReadTarget) {
    ctx.enter("readTarget");
    if target.short_code.trim().is_empty() {
        ctx.field_error("shortCode cannot be empty".to_string());
    }
    ctx.exit();
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        name: name.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_YAML: &str = r#"
baseUrl: http://localhost:3001
seed: 42
tick: 50ms
metricsPort: 9090
client:
  timeout: 10s
  customHeaders: "X-Bench-Run:nightly"
stages:
  - duration: 5s
    target: 1
  - duration: 10s
    target: 5000
  - duration: 5s
    target: 0
mix:
  policy: rolePinned
scenario:
  kind: correlated
  write:
    url: https://kubernetes.io/docs/concepts/overview/components/
    userId: 1c8be2ab-694d-40a1-acda-6d2ff09e8b76
  pacing: 1s
  thinkTime: 5s
thresholds:
  create_url_duration: ["p(95)<600"]
  success_rate: ["rate>0.95"]
"#;

    #[test]
    fn test_parse_full_yaml() {
        let config = HarnessConfig::from_yaml_str(FULL_YAML).unwrap();

        assert_eq!(config.seed, Some(42));
        assert_eq!(config.tick, Duration::from_millis(50));
        assert_eq!(config.graceful_stop, None);
        assert_eq!(config.metrics_port, Some(9090));
        assert_eq!(config.client.timeout, Duration::from_secs(10));
        assert_eq!(config.stages.len(), 3);
        assert_eq!(config.stage_plan().peak_target(), 5000);
        assert_eq!(
            config.mix,
            WorkloadMix::RolePinned {
                producer_ordinal: 1,
                read_selection: ReadSelection::Latest,
            }
        );
        assert_eq!(config.scenario.kind, ScenarioKind::Correlated);
        assert_eq!(config.scenario.think_time, Pacing::Fixed(Duration::from_secs(5)));
        assert_eq!(config.parsed_thresholds().unwrap().len(), 2);
    }

    #[test]
    fn test_presets_are_valid() {
        for preset in [
            Preset::MixedReadWrite,
            Preset::FullWrite,
            Preset::NonExistentRead,
            Preset::RealScenario,
        ] {
            let config = HarnessConfig::preset(preset, DEFAULT_BASE_URL);
            assert!(config.validate().is_ok(), "{:?} invalid", preset);
        }
    }

    #[test]
    fn test_preset_names() {
        assert_eq!("realScenario".parse::<Preset>().unwrap(), Preset::RealScenario);
        assert_eq!("full-write".parse::<Preset>().unwrap(), Preset::FullWrite);
        assert!("nonsense".parse::<Preset>().is_err());
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = HarnessConfig::preset(Preset::MixedReadWrite, "localhost");
        config.mix = WorkloadMix::PhaseGated {
            p_read: 1.5,
            seeding_fraction: 0.2,
            seeding_until_stage: Some(9),
            read_target: ReadTarget::missing(""),
            read_selection: None,
        };

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("baseUrl"), "{}", err);
        assert!(err.contains("mix.pRead"), "{}", err);
        assert!(err.contains("mix.seedingUntilStage"), "{}", err);
        assert!(err.contains("mix.readTarget"), "{}", err);
    }

    #[test]
    fn test_zero_duration_linear_stage_rejected() {
        let mut config = HarnessConfig::preset(Preset::FullWrite, DEFAULT_BASE_URL);
        config.stages.push(Stage::linear(Duration::ZERO, 3));
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("stages.[3]"), "{}", err);
    }

    #[test]
    fn test_producer_ordinal_beyond_peak_rejected() {
        let mut config = HarnessConfig::preset(Preset::RealScenario, DEFAULT_BASE_URL);
        config.stages = vec![Stage::linear(Duration::from_secs(1), 2)];
        config.mix = WorkloadMix::RolePinned {
            producer_ordinal: 3,
            read_selection: ReadSelection::RandomPublished,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_threshold_on_unknown_metric_rejected() {
        let mut config = HarnessConfig::preset(Preset::FullWrite, DEFAULT_BASE_URL);
        config
            .thresholds
            .insert("no_such_metric".to_string(), vec!["p(95)<100".to_string()]);
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("no_such_metric"), "{}", err);

        let mut config = HarnessConfig::preset(Preset::FullWrite, DEFAULT_BASE_URL);
        config
            .thresholds
            .insert("success_rate".to_string(), vec!["p(95)<100".to_string()]);
        assert!(config.validate().is_err());

        let mut config = HarnessConfig::preset(Preset::FullWrite, DEFAULT_BASE_URL);
        config
            .thresholds
            .insert("http_req_duration".to_string(), vec!["fast".to_string()]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_correlated_read_only_rejected() {
        let mut config = HarnessConfig::preset(Preset::NonExistentRead, DEFAULT_BASE_URL);
        config.scenario.kind = ScenarioKind::Correlated;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("writer role"), "{}", err);
    }

    #[test]
    fn test_invalid_yaml_is_parse_error() {
        assert!(matches!(
            HarnessConfig::from_yaml_str("baseUrl: [unterminated"),
            Err(ConfigError::YamlParse(_))
        ));
    }

    #[test]
    fn test_client_and_scenario_conversion() {
        let config = HarnessConfig::from_yaml_str(FULL_YAML).unwrap();

        let client = config.to_client_config();
        assert_eq!(client.request_timeout, Duration::from_secs(10));
        assert_eq!(client.custom_headers.as_deref(), Some("X-Bench-Run:nightly"));

        let scenario = config.to_scenario_config(7);
        assert_eq!(scenario.seed, 7);
        assert_eq!(scenario.kind, ScenarioKind::Correlated);

        assert_eq!(config.to_scheduler_config().tick, Duration::from_millis(50));
    }
}
