//! Historical accumulators from era beacon states.

use crate::{
    DecodeError,
    container::{Field, read_root, read_u64, split_container, split_fixed_list},
};
use alloy_primitives::B256;
use marlin_genesis::{ChainConfig, ConsensusFork, SLOTS_PER_HISTORICAL_ROOT};

const SLOT_OFFSET: usize = 40;
const EPOCHS_PER_HISTORICAL_VECTOR: usize = 65_536;
const EPOCHS_PER_SLASHINGS_VECTOR: usize = 8_192;
const SYNC_COMMITTEE_LEN: usize = 512 * 48 + 48;
const CHECKPOINT_LEN: usize = 40;

const HISTORICAL_ROOTS_FIELD: usize = 7;
// After the Altair, Bellatrix and Capella additions.
const HISTORICAL_SUMMARIES_FIELD: usize = 27;

/// One entry of the Capella historical summaries list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoricalSummary {
    /// Root of the block roots of the summarised period.
    pub block_summary_root: B256,
    /// Root of the state roots of the summarised period.
    pub state_summary_root: B256,
}

/// The accumulators needed to authenticate archived beacon blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoricalBoundary {
    /// Pre-Capella historical roots, frozen at Capella.
    pub historical_roots: Vec<B256>,
    /// Capella and later historical summaries.
    pub historical_summaries: Vec<HistoricalSummary>,
    /// The last slot whose block is covered by the archive.
    pub last_slot: u64,
}

pub(crate) fn state_layout(fork: ConsensusFork) -> Vec<Field> {
    let roots_vector = Field::Fixed(SLOTS_PER_HISTORICAL_ROOT as usize * 32);
    let mut layout = vec![
        Field::Fixed(8),   // genesis_time
        Field::Fixed(32),  // genesis_validators_root
        Field::Fixed(8),   // slot
        Field::Fixed(16),  // fork
        Field::Fixed(112), // latest_block_header
        roots_vector,      // block_roots
        roots_vector,      // state_roots
        Field::Var,        // historical_roots
        Field::Fixed(72),  // eth1_data
        Field::Var,        // eth1_data_votes
        Field::Fixed(8),   // eth1_deposit_index
        Field::Var,        // validators
        Field::Var,        // balances
        Field::Fixed(EPOCHS_PER_HISTORICAL_VECTOR * 32),
        Field::Fixed(EPOCHS_PER_SLASHINGS_VECTOR * 8),
        Field::Var, // previous epoch attestations or participation
        Field::Var, // current epoch attestations or participation
        Field::Fixed(1),
        Field::Fixed(CHECKPOINT_LEN),
        Field::Fixed(CHECKPOINT_LEN),
        Field::Fixed(CHECKPOINT_LEN),
    ];
    if fork >= ConsensusFork::Altair {
        layout.extend([
            Field::Var, // inactivity_scores
            Field::Fixed(SYNC_COMMITTEE_LEN),
            Field::Fixed(SYNC_COMMITTEE_LEN),
        ]);
    }
    if fork >= ConsensusFork::Bellatrix {
        layout.push(Field::Var); // latest_execution_payload_header
    }
    if fork >= ConsensusFork::Capella {
        layout.extend([Field::Fixed(8), Field::Fixed(8), Field::Var]);
    }
    if fork >= ConsensusFork::Electra {
        layout.extend([Field::Fixed(8); 6]);
        layout.extend([Field::Var; 3]);
    }
    layout
}

/// Reads the slot of an SSZ `BeaconState` without decoding the rest.
pub fn state_slot(bytes: &[u8]) -> Result<u64, DecodeError> {
    let field = bytes
        .get(SLOT_OFFSET..SLOT_OFFSET + 8)
        .ok_or(DecodeError::Field("beacon state too short"))?;
    read_u64(field)
}

/// Decodes the historical accumulators of an SSZ `BeaconState`.
pub fn decode_historical_boundary(
    bytes: &[u8],
    config: &ChainConfig,
) -> Result<HistoricalBoundary, DecodeError> {
    let slot = state_slot(bytes)?;
    let fork = config.fork_at_slot(slot);
    let fields = split_container(bytes, &state_layout(fork))?;

    let historical_roots = split_fixed_list(fields[HISTORICAL_ROOTS_FIELD], 32)?
        .into_iter()
        .map(read_root)
        .collect::<Result<Vec<_>, _>>()?;
    let historical_summaries = if fork >= ConsensusFork::Capella {
        split_fixed_list(fields[HISTORICAL_SUMMARIES_FIELD], 64)?
            .into_iter()
            .map(|item| {
                Ok(HistoricalSummary {
                    block_summary_root: read_root(&item[..32])?,
                    state_summary_root: read_root(&item[32..])?,
                })
            })
            .collect::<Result<Vec<_>, DecodeError>>()?
    } else {
        Vec::new()
    };

    Ok(HistoricalBoundary {
        historical_roots,
        historical_summaries,
        last_slot: slot.saturating_sub(1),
    })
}

#[cfg(any(test, feature = "test-utils"))]
pub(crate) mod encode {
    //! Beacon state encoding for fixtures.

    use super::*;
    use crate::container::encode::{Value, container};

    /// Encodes a beacon state with zeroed fields except the slot and the accumulators.
    pub(crate) fn beacon_state(
        slot: u64,
        fork: ConsensusFork,
        roots: &[B256],
        summaries: &[HistoricalSummary],
    ) -> Vec<u8> {
        let values = state_layout(fork)
            .into_iter()
            .enumerate()
            .map(|(i, field)| match (i, field) {
                (2, _) => Value::Fixed(slot.to_le_bytes().to_vec()),
                (HISTORICAL_ROOTS_FIELD, _) => {
                    Value::Var(roots.iter().flat_map(|r| r.0).collect())
                }
                (HISTORICAL_SUMMARIES_FIELD, Field::Var) if fork >= ConsensusFork::Capella => {
                    Value::Var(
                        summaries
                            .iter()
                            .flat_map(|s| [s.block_summary_root.0, s.state_summary_root.0])
                            .flatten()
                            .collect(),
                    )
                }
                (_, Field::Fixed(len)) => Value::Fixed(vec![0; len]),
                (_, Field::Var) => Value::Var(Vec::new()),
            })
            .collect();
        container(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn fixed_len(fork: ConsensusFork) -> usize {
        state_layout(fork)
            .iter()
            .map(|f| match f {
                Field::Fixed(len) => *len,
                Field::Var => 4,
            })
            .sum()
    }

    #[test]
    fn test_phase0_fixed_size() {
        assert_eq!(fixed_len(ConsensusFork::Phase0), 2_687_377);
    }

    #[test]
    fn test_summaries_field_position() {
        assert_eq!(state_layout(ConsensusFork::Capella)[HISTORICAL_SUMMARIES_FIELD], Field::Var);
        assert_eq!(state_layout(ConsensusFork::Capella).len(), HISTORICAL_SUMMARIES_FIELD + 1);
    }

    #[rstest]
    #[case::bellatrix(ConsensusFork::Bellatrix, 0)]
    #[case::capella(ConsensusFork::Capella, 2)]
    #[case::electra(ConsensusFork::Electra, 3)]
    fn test_boundary_roundtrip(#[case] fork: ConsensusFork, #[case] summaries: usize) {
        let config = ChainConfig {
            altair_epoch: 0,
            bellatrix_epoch: 0,
            capella_epoch: if fork >= ConsensusFork::Capella { 0 } else { u64::MAX },
            deneb_epoch: if fork >= ConsensusFork::Deneb { 0 } else { u64::MAX },
            electra_epoch: if fork >= ConsensusFork::Electra { 0 } else { u64::MAX },
            ..ChainConfig::holesky()
        };
        let roots = vec![B256::repeat_byte(1), B256::repeat_byte(2)];
        let summaries = (0..summaries)
            .map(|i| HistoricalSummary {
                block_summary_root: B256::repeat_byte(10 + i as u8),
                state_summary_root: B256::repeat_byte(20 + i as u8),
            })
            .collect::<Vec<_>>();

        let bytes = encode::beacon_state(3 * 8192, fork, &roots, &summaries);
        assert_eq!(state_slot(&bytes).unwrap(), 3 * 8192);
        let boundary = decode_historical_boundary(&bytes, &config).unwrap();
        assert_eq!(boundary.historical_roots, roots);
        assert_eq!(boundary.historical_summaries, summaries);
        assert_eq!(boundary.last_slot, 3 * 8192 - 1);
    }
}
