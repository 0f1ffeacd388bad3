// SPDX-License-Identifier: Apache-2.0
//! The opaque `issue` payload carried by every incident event.

use fieldpulse_rng::DeterministicRng;
use serde::{Deserialize, Serialize};

/// Coarse category a concrete issue type belongs to.
///
/// The repair scheduler (§4.E) selects on `Infrastructure` exclusively; the
/// other four categories exist so the catalog reads like a real telecom
/// incident feed rather than an infrastructure-only toy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    /// Physical plant failures: power, fiber, towers, congestion.
    Infrastructure,
    /// End-user-facing service complaints.
    Consumer,
    /// Billing, contracts, account-level issues.
    Business,
    /// Regulatory/compliance-flavored incidents.
    Federal,
    /// 5G, IoT, edge-compute incidents.
    EmergingTech,
}

/// A closed enumeration of concrete issue types, each tagged with a
/// [`IssueCategory`]. Deserialization falls back to `Unknown` for any tag
/// not in this set, so a store record written by a newer build with an
/// additional issue type never fails to decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IssueType {
    /// Utility power loss affecting a site.
    PowerOutage,
    /// Severed fiber run.
    FiberCut,
    /// A cell tower is offline.
    CellTowerDown,
    /// Congestion-driven degradation.
    NetworkCongestion,
    /// Subscriber-reported slow throughput.
    SlowInternet,
    /// Subscriber-reported call drops.
    DroppedCalls,
    /// Subscriber-reported loss of dial tone.
    NoDialTone,
    /// Customer billing dispute.
    BillingDispute,
    /// Involuntary service tier downgrade.
    ServiceDowngrade,
    /// Regulatory compliance complaint.
    RegulatoryComplaint,
    /// Licensed-spectrum interference report.
    SpectrumInterference,
    /// Failed 5G handover between cells.
    FiveGHandoverFailure,
    /// IoT device fleet flooding the network.
    IotDeviceFlood,
    /// Catch-all for any tag not recognized by this build.
    #[serde(other)]
    Unknown,
}

/// The full set of variants the builder draws from, in a fixed order so a
/// seeded RNG index is reproducible across builds.
const VARIANTS: [IssueType; 13] = [
    IssueType::PowerOutage,
    IssueType::FiberCut,
    IssueType::CellTowerDown,
    IssueType::NetworkCongestion,
    IssueType::SlowInternet,
    IssueType::DroppedCalls,
    IssueType::NoDialTone,
    IssueType::BillingDispute,
    IssueType::ServiceDowngrade,
    IssueType::RegulatoryComplaint,
    IssueType::SpectrumInterference,
    IssueType::FiveGHandoverFailure,
    IssueType::IotDeviceFlood,
];

impl IssueType {
    /// Category this issue type is tagged with. `Unknown` is conservatively
    /// classified outside `Infrastructure`; the scheduler applies its own
    /// substring heuristic on top of this for borderline/unknown tags.
    #[must_use]
    pub fn category(&self) -> IssueCategory {
        match self {
            IssueType::PowerOutage
            | IssueType::FiberCut
            | IssueType::CellTowerDown
            | IssueType::NetworkCongestion => IssueCategory::Infrastructure,
            IssueType::SlowInternet | IssueType::DroppedCalls | IssueType::NoDialTone => {
                IssueCategory::Consumer
            }
            IssueType::BillingDispute | IssueType::ServiceDowngrade => IssueCategory::Business,
            IssueType::RegulatoryComplaint | IssueType::SpectrumInterference => {
                IssueCategory::Federal
            }
            IssueType::FiveGHandoverFailure | IssueType::IotDeviceFlood => {
                IssueCategory::EmergingTech
            }
            IssueType::Unknown => IssueCategory::Consumer,
        }
    }

    /// A lowercase token used by the scheduler's substring heuristic
    /// (§4.E.4) when deciding whether a record not carrying a recognized
    /// category still reads as infrastructure-flavored.
    #[must_use]
    pub fn token(&self) -> &'static str {
        match self {
            IssueType::PowerOutage => "power_outage",
            IssueType::FiberCut => "fiber_cut",
            IssueType::CellTowerDown => "cell_tower_down",
            IssueType::NetworkCongestion => "network_congestion",
            IssueType::SlowInternet => "slow_internet",
            IssueType::DroppedCalls => "dropped_calls",
            IssueType::NoDialTone => "no_dial_tone",
            IssueType::BillingDispute => "billing_dispute",
            IssueType::ServiceDowngrade => "service_downgrade",
            IssueType::RegulatoryComplaint => "regulatory_complaint",
            IssueType::SpectrumInterference => "spectrum_interference",
            IssueType::FiveGHandoverFailure => "5g_handover_failure",
            IssueType::IotDeviceFlood => "iot_device_flood",
            IssueType::Unknown => "unknown",
        }
    }

    /// Draw one variant uniformly from the fixed enumeration.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn sample(rng: &mut DeterministicRng) -> Self {
        let idx = (rng.uniform() * VARIANTS.len() as f64) as usize;
        VARIANTS[idx.min(VARIANTS.len() - 1)].clone()
    }
}

/// Opaque issue subdocument attached to an incident event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// Flatten so the wire shape is `{ "type": "...", "category": "..." }`
    /// rather than nesting the type tag under a sub-object.
    #[serde(flatten)]
    pub issue_type: IssueType,
    /// Redundant, explicit category field so store-side queries/projections
    /// don't need to know every `IssueType` variant to filter by category.
    pub category: IssueCategory,
}

impl Issue {
    /// Draw one issue uniformly from the fixed enumeration of variants.
    pub fn sample(rng: &mut DeterministicRng) -> Self {
        let issue_type = IssueType::sample(rng);
        let category = issue_type.category();
        Self {
            issue_type,
            category,
        }
    }
}
