//! Built-in cleaning rules.
//!
//! A small representative catalog: enough rules that every stage has work to
//! do and the engine can be exercised end to end. SQL lives in `const`
//! templates rendered by [`crate::rules::sql::render`].

mod common;
mod drop_zero_concept_ids;
mod ensure_date_datetime_consistency;
mod fitbit_future_dates;
mod generalize_zip_codes;
mod no_data_after_death;
mod remove_participants_under_18;
mod suppress_concepts;
mod truncate_rdr_data;

pub use drop_zero_concept_ids::DropZeroConceptIds;
pub use ensure_date_datetime_consistency::EnsureDateDatetimeConsistency;
pub use fitbit_future_dates::FitbitFutureDates;
pub use generalize_zip_codes::GeneralizeZipCodes;
pub use no_data_after_death::NoDataAfterDeath;
pub use remove_participants_under_18::RemoveParticipantsUnder18;
pub use suppress_concepts::SuppressConcepts;
pub use truncate_rdr_data::TruncateRdrData;

/// Catalog keys of the built-in rules.
pub mod keys {
    pub use super::drop_zero_concept_ids::KEY as DROP_ZERO_CONCEPT_IDS;
    pub use super::ensure_date_datetime_consistency::KEY as ENSURE_DATE_DATETIME_CONSISTENCY;
    pub use super::fitbit_future_dates::KEY as FITBIT_FUTURE_DATES;
    pub use super::generalize_zip_codes::KEY as GENERALIZE_ZIP_CODES;
    pub use super::no_data_after_death::KEY as NO_DATA_AFTER_DEATH;
    pub use super::remove_participants_under_18::KEY as REMOVE_PARTICIPANTS_UNDER_18;
    pub use super::suppress_concepts::KEY as SUPPRESS_CONCEPTS;
    pub use super::truncate_rdr_data::KEY as TRUNCATE_RDR_DATA;
}

use crate::registry::RuleDefinition;

/// Returns the definitions of every built-in rule.
#[must_use]
pub fn definitions() -> Vec<RuleDefinition> {
    vec![
        DropZeroConceptIds::definition(),
        EnsureDateDatetimeConsistency::definition(),
        FitbitFutureDates::definition(),
        GeneralizeZipCodes::definition(),
        NoDataAfterDeath::definition(),
        RemoveParticipantsUnder18::definition(),
        SuppressConcepts::definition(),
        TruncateRdrData::definition(),
    ]
}
