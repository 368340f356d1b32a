//! Workload mix: which operation a virtual user performs next.
//!
//! Roles are assigned once, when a VU is spawned, from its ordinal and the
//! plan's peak target. [`WorkloadMix::decide`] is then called on every
//! iteration; it draws from the VU's own RNG and never performs I/O.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::publish::{IdentifierSlot, Published};

/// Body of a `POST /create` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUrlRequest {
    pub url: String,
    pub user_id: String,
}

/// What a read is expected to find.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "expect", rename_all = "camelCase")]
pub enum ReadExpectation {
    /// 200 with `originalUrl` equal to the URL used at creation
    #[serde(rename_all = "camelCase")]
    Exists { original_url: String },

    /// 404; a 200 counts as a failure
    Missing,
}

/// Short code to resolve plus the expected result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadTarget {
    pub short_code: String,
    #[serde(flatten)]
    pub expectation: ReadExpectation,
}

impl ReadTarget {
    pub fn existing(short_code: impl Into<String>, original_url: impl Into<String>) -> Self {
        Self {
            short_code: short_code.into(),
            expectation: ReadExpectation::Exists {
                original_url: original_url.into(),
            },
        }
    }

    pub fn missing(short_code: impl Into<String>) -> Self {
        Self {
            short_code: short_code.into(),
            expectation: ReadExpectation::Missing,
        }
    }

    fn from_published(published: &Published) -> Self {
        Self::existing(&published.short_code, &published.original_url)
    }
}

/// One unit of work against the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Write(CreateUrlRequest),
    Read(ReadTarget),
}

impl Operation {
    /// Label used in logs and Prometheus metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Operation::Write(_) => "create",
            Operation::Read(ReadTarget {
                expectation: ReadExpectation::Exists { .. },
                ..
            }) => "resolve",
            Operation::Read(ReadTarget {
                expectation: ReadExpectation::Missing,
                ..
            }) => "resolve_missing",
        }
    }
}

/// Role a VU keeps for its whole life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VuRole {
    /// Member of the phase-gated seeding cohort
    Seeder,

    /// The single writer of the role-pinned mix; publishes every code it creates
    Producer,

    /// Always writes, never publishes
    Writer,

    /// Only reads
    Reader,

    /// Draws read or write per iteration
    General,
}

impl VuRole {
    pub fn label(&self) -> &'static str {
        match self {
            VuRole::Seeder => "seeder",
            VuRole::Producer => "producer",
            VuRole::Writer => "writer",
            VuRole::Reader => "reader",
            VuRole::General => "general",
        }
    }
}

impl fmt::Display for VuRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of one policy draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Write,
    Read(ReadTarget),

    /// Nothing to do this iteration (no identifier published yet)
    Skip,
}

fn default_producer_ordinal() -> usize {
    1
}

/// Which published code a reader resolves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadSelection {
    /// The most recently published code
    #[default]
    Latest,

    /// Uniform draw over every code published so far
    RandomPublished,
}

/// How reads and writes are distributed across VUs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "camelCase")]
pub enum WorkloadMix {
    /// A seeding cohort of `floor(peak * seeding_fraction)` VUs only writes.
    /// Every other VU reads `read_target` with probability `p_read`.
    #[serde(rename_all = "camelCase")]
    PhaseGated {
        p_read: f64,
        seeding_fraction: f64,
        /// Stage index from which seeders join the general mix. None keeps
        /// them writing for the whole run.
        #[serde(default)]
        seeding_until_stage: Option<usize>,
        read_target: ReadTarget,
        /// When set, every write publishes and reads resolve a published
        /// code, using `read_target` only until the first one exists.
        #[serde(default)]
        read_selection: Option<ReadSelection>,
    },

    /// One producer writes and publishes; everybody else reads the latest
    /// published code.
    #[serde(rename_all = "camelCase")]
    RolePinned {
        #[serde(default = "default_producer_ordinal")]
        producer_ordinal: usize,
        #[serde(default)]
        read_selection: ReadSelection,
    },

    WriteOnly,

    #[serde(rename_all = "camelCase")]
    ReadOnly { read_target: ReadTarget },
}

impl WorkloadMix {
    pub fn label(&self) -> &'static str {
        match self {
            WorkloadMix::PhaseGated { .. } => "phaseGated",
            WorkloadMix::RolePinned { .. } => "rolePinned",
            WorkloadMix::WriteOnly => "writeOnly",
            WorkloadMix::ReadOnly { .. } => "readOnly",
        }
    }

    /// Size of the phase-gated seeding cohort for a plan peaking at `peak`.
    pub fn seeding_cohort(&self, peak: usize) -> usize {
        match self {
            WorkloadMix::PhaseGated {
                seeding_fraction, ..
            } => (peak as f64 * seeding_fraction).floor() as usize,
            _ => 0,
        }
    }

    /// Assigns the role for the VU with 1-based `ordinal`.
    pub fn assign_role(&self, ordinal: usize, peak: usize) -> VuRole {
        match self {
            WorkloadMix::PhaseGated { .. } => {
                if ordinal <= self.seeding_cohort(peak) {
                    VuRole::Seeder
                } else {
                    VuRole::General
                }
            }
            WorkloadMix::RolePinned {
                producer_ordinal, ..
            } => {
                if ordinal == *producer_ordinal {
                    VuRole::Producer
                } else {
                    VuRole::Reader
                }
            }
            WorkloadMix::WriteOnly => VuRole::Writer,
            WorkloadMix::ReadOnly { .. } => VuRole::Reader,
        }
    }

    /// Whether codes created by a VU in `role` are made visible to other VUs.
    pub fn publishes(&self, role: VuRole) -> bool {
        match self {
            WorkloadMix::RolePinned { .. } => role == VuRole::Producer,
            WorkloadMix::PhaseGated { read_selection, .. } => read_selection.is_some(),
            WorkloadMix::WriteOnly | WorkloadMix::ReadOnly { .. } => false,
        }
    }

    /// Whether readers draw from every published code rather than the latest.
    pub fn keeps_pool(&self) -> bool {
        match self {
            WorkloadMix::RolePinned { read_selection, .. } => {
                *read_selection == ReadSelection::RandomPublished
            }
            WorkloadMix::PhaseGated { read_selection, .. } => {
                *read_selection == Some(ReadSelection::RandomPublished)
            }
            WorkloadMix::WriteOnly | WorkloadMix::ReadOnly { .. } => false,
        }
    }

    /// Picks the next operation for a VU in `role` during stage `stage_index`.
    pub fn decide(
        &self,
        role: VuRole,
        stage_index: usize,
        published: &IdentifierSlot,
        rng: &mut StdRng,
    ) -> Decision {
        if let WorkloadMix::PhaseGated {
            seeding_until_stage,
            ..
        } = self
        {
            return match (role, seeding_until_stage) {
                (VuRole::Seeder, Some(until)) if stage_index < *until => Decision::Write,
                (VuRole::Seeder, None) => Decision::Write,
                _ => self.general_draw(published, rng),
            };
        }

        match role {
            VuRole::Producer | VuRole::Writer => Decision::Write,
            VuRole::Seeder | VuRole::Reader | VuRole::General => {
                match self.read_target(published, rng) {
                    Some(target) => Decision::Read(target),
                    None => Decision::Skip,
                }
            }
        }
    }

    /// Read target a VU without a code of its own would resolve.
    ///
    /// Random selection draws from `rng`, so a seeded VU replays the same
    /// picks over the same published sequence.
    pub fn read_target(&self, published: &IdentifierSlot, rng: &mut StdRng) -> Option<ReadTarget> {
        match self {
            WorkloadMix::PhaseGated {
                read_target,
                read_selection: None,
                ..
            }
            | WorkloadMix::ReadOnly { read_target } => Some(read_target.clone()),
            WorkloadMix::PhaseGated {
                read_target,
                read_selection: Some(selection),
                ..
            } => Some(
                select(*selection, published, rng)
                    .map(|p| ReadTarget::from_published(&p))
                    .unwrap_or_else(|| read_target.clone()),
            ),
            WorkloadMix::RolePinned { read_selection, .. } => {
                select(*read_selection, published, rng).map(|p| ReadTarget::from_published(&p))
            }
            WorkloadMix::WriteOnly => None,
        }
    }

    fn general_draw(&self, published: &IdentifierSlot, rng: &mut StdRng) -> Decision {
        match self {
            WorkloadMix::PhaseGated { p_read, .. } => {
                if rng.gen::<f64>() < *p_read {
                    match self.read_target(published, rng) {
                        Some(target) => Decision::Read(target),
                        None => Decision::Skip,
                    }
                } else {
                    Decision::Write
                }
            }
            _ => Decision::Write,
        }
    }
}

fn select(
    selection: ReadSelection,
    published: &IdentifierSlot,
    rng: &mut StdRng,
) -> Option<std::sync::Arc<Published>> {
    match selection {
        ReadSelection::Latest => published.latest(),
        ReadSelection::RandomPublished => published.random(rng),
    }
}

/// Deterministic per-VU RNG derived from the run seed.
pub fn vu_rng(run_seed: u64, ordinal: usize) -> StdRng {
    StdRng::seed_from_u64(run_seed ^ (ordinal as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}
