//! Pipeline data stages.

use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named phase of the curation pipeline.
///
/// Declaration order is pipeline order, so the derived `Ord` sorts stages the
/// way datasets flow: per-site EHR first, controlled tier and wearables last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataStage {
    /// Per-site EHR submissions.
    Ehr,
    /// EHR submissions unioned across sites.
    Unioned,
    /// Participant survey and program data.
    Rdr,
    /// Unioned EHR combined with RDR data.
    Combined,
    /// Registered tier de-identified base dataset.
    DeidBase,
    /// Registered tier de-identified clean dataset.
    DeidClean,
    /// Controlled tier de-identification pass.
    ControlledTierDeid,
    /// Controlled tier de-identified base dataset.
    ControlledTierDeidBase,
    /// Controlled tier de-identified clean dataset.
    ControlledTierDeidClean,
    /// Wearable (Fitbit) data.
    Fitbit,
    /// De-identified wearable data.
    FitbitDeid,
    /// Synthetic data generated for testing.
    Synthetic,
}

impl DataStage {
    /// Every stage, in pipeline order.
    pub const ALL: [Self; 12] = [
        Self::Ehr,
        Self::Unioned,
        Self::Rdr,
        Self::Combined,
        Self::DeidBase,
        Self::DeidClean,
        Self::ControlledTierDeid,
        Self::ControlledTierDeidBase,
        Self::ControlledTierDeidClean,
        Self::Fitbit,
        Self::FitbitDeid,
        Self::Synthetic,
    ];

    /// Returns the canonical string identifier of the stage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ehr => "ehr",
            Self::Unioned => "unioned",
            Self::Rdr => "rdr",
            Self::Combined => "combined",
            Self::DeidBase => "deid_base",
            Self::DeidClean => "deid_clean",
            Self::ControlledTierDeid => "controlled_tier_deid",
            Self::ControlledTierDeidBase => "controlled_tier_deid_base",
            Self::ControlledTierDeidClean => "controlled_tier_deid_clean",
            Self::Fitbit => "fitbit",
            Self::FitbitDeid => "fitbit_deid",
            Self::Synthetic => "synthetic",
        }
    }
}

impl fmt::Display for DataStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataStage {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == wanted)
            .ok_or_else(|| ConfigurationError::unknown_stage(s))
    }
}
