//! Consensus forks relevant to era decoding.

use serde::{Deserialize, Serialize};

/// A consensus-layer fork.
///
/// The variant determines the layout of the beacon block body stored in era files.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConsensusFork {
    /// The genesis fork.
    Phase0,
    /// Adds the sync aggregate.
    Altair,
    /// Adds the execution payload.
    Bellatrix,
    /// Adds withdrawals and BLS to execution changes.
    Capella,
    /// Adds blob gas fields and KZG commitments.
    Deneb,
    /// Adds execution requests.
    Electra,
}

impl ConsensusFork {
    /// Returns true if beacon blocks of this fork embed an execution payload.
    pub const fn has_execution_payload(&self) -> bool {
        matches!(self, Self::Bellatrix | Self::Capella | Self::Deneb | Self::Electra)
    }

    /// Returns true if execution payloads of this fork carry withdrawals.
    pub const fn has_withdrawals(&self) -> bool {
        matches!(self, Self::Capella | Self::Deneb | Self::Electra)
    }

    /// Returns true if execution payloads of this fork carry blob gas fields.
    pub const fn has_blob_gas(&self) -> bool {
        matches!(self, Self::Deneb | Self::Electra)
    }

    /// Returns true if beacon blocks of this fork carry execution requests.
    pub const fn has_execution_requests(&self) -> bool {
        matches!(self, Self::Electra)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_forks_are_ordered() {
        let forks: Vec<_> = ConsensusFork::iter().collect();
        let mut sorted = forks.clone();
        sorted.sort();
        assert_eq!(forks, sorted);
    }

    #[test]
    fn test_feature_gates() {
        assert!(!ConsensusFork::Altair.has_execution_payload());
        assert!(ConsensusFork::Bellatrix.has_execution_payload());
        assert!(!ConsensusFork::Bellatrix.has_withdrawals());
        assert!(ConsensusFork::Capella.has_withdrawals());
        assert!(ConsensusFork::Deneb.has_blob_gas());
        assert!(!ConsensusFork::Deneb.has_execution_requests());
        assert!(ConsensusFork::Electra.has_execution_requests());
        assert_eq!(ConsensusFork::Electra.to_string(), "electra");
    }
}
