//! Beacon blocks from era files and their embedded execution payloads.

use crate::{
    DecodeError,
    container::{Field, read_root, read_u64, split_byte_lists, split_container, split_fixed_list},
};
use alloy_consensus::{
    Header, TxEnvelope,
    constants::EMPTY_OMMER_ROOT_HASH,
    proofs::{calculate_transaction_root, calculate_withdrawals_root},
};
use alloy_eips::{
    eip2718::Decodable2718,
    eip4895::{Withdrawal, Withdrawals},
};
use alloy_primitives::{Address, B64, B256, Bloom, Bytes, U256};
use marlin_genesis::ConsensusFork;
use marlin_primitives::{Block, BlockBody, SealedBlock};
use sha2::{Digest, Sha256};

const SIGNATURE_LEN: usize = 96;
const WITHDRAWAL_LEN: usize = 44;

/// A decoded beacon block, reduced to what execution history needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconBlock {
    /// The slot of the block.
    pub slot: u64,
    /// The proposer index.
    pub proposer_index: u64,
    /// Root of the parent beacon block.
    pub parent_root: B256,
    /// Root of the post-state.
    pub state_root: B256,
    /// The execution payload, for Bellatrix and later.
    pub payload: Option<ExecutionPayload>,
    /// Execution layer requests, for Electra and later.
    pub requests: Option<ExecutionRequests>,
}

/// The execution payload embedded in a beacon block body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPayload {
    /// Execution parent hash.
    pub parent_hash: B256,
    /// Block beneficiary.
    pub fee_recipient: Address,
    /// Execution state root.
    pub state_root: B256,
    /// Receipts root.
    pub receipts_root: B256,
    /// Logs bloom.
    pub logs_bloom: Bloom,
    /// Beacon randomness, stored as the header mix hash.
    pub prev_randao: B256,
    /// Execution block number.
    pub block_number: u64,
    /// Gas limit.
    pub gas_limit: u64,
    /// Gas used.
    pub gas_used: u64,
    /// Block timestamp.
    pub timestamp: u64,
    /// Header extra data.
    pub extra_data: Bytes,
    /// Base fee per gas.
    pub base_fee_per_gas: U256,
    /// Execution block hash.
    pub block_hash: B256,
    /// EIP-2718 encoded transactions.
    pub transactions: Vec<Bytes>,
    /// Withdrawals, for Capella and later.
    pub withdrawals: Option<Vec<Withdrawal>>,
    /// Blob gas used, for Deneb and later.
    pub blob_gas_used: Option<u64>,
    /// Excess blob gas, for Deneb and later.
    pub excess_blob_gas: Option<u64>,
}

/// SSZ encoded execution layer requests by type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionRequests {
    /// Deposit requests.
    pub deposits: Bytes,
    /// Withdrawal requests.
    pub withdrawals: Bytes,
    /// Consolidation requests.
    pub consolidations: Bytes,
}

impl ExecutionRequests {
    /// Computes the EIP-7685 commitment over the non-empty requests.
    pub fn requests_hash(&self) -> B256 {
        let mut outer = Sha256::new();
        for (kind, data) in
            [(0u8, &self.deposits), (1u8, &self.withdrawals), (2u8, &self.consolidations)]
        {
            if data.is_empty() {
                continue;
            }
            let mut inner = Sha256::new();
            inner.update([kind]);
            inner.update(data);
            outer.update(inner.finalize());
        }
        B256::from_slice(&outer.finalize())
    }
}

fn body_layout(fork: ConsensusFork) -> Vec<Field> {
    // randao_reveal, eth1_data, graffiti, then the five operation lists
    let mut layout = vec![Field::Fixed(96), Field::Fixed(72), Field::Fixed(32)];
    layout.extend([Field::Var; 5]);
    if fork >= ConsensusFork::Altair {
        layout.push(Field::Fixed(160));
    }
    if fork >= ConsensusFork::Bellatrix {
        layout.push(Field::Var);
    }
    if fork >= ConsensusFork::Capella {
        layout.push(Field::Var);
    }
    if fork >= ConsensusFork::Deneb {
        layout.push(Field::Var);
    }
    if fork >= ConsensusFork::Electra {
        layout.push(Field::Var);
    }
    layout
}

fn payload_layout(fork: ConsensusFork) -> Vec<Field> {
    let mut layout = vec![
        Field::Fixed(32),
        Field::Fixed(20),
        Field::Fixed(32),
        Field::Fixed(32),
        Field::Fixed(256),
        Field::Fixed(32),
        Field::Fixed(8),
        Field::Fixed(8),
        Field::Fixed(8),
        Field::Fixed(8),
        Field::Var,
        Field::Fixed(32),
        Field::Fixed(32),
        Field::Var,
    ];
    if fork.has_withdrawals() {
        layout.push(Field::Var);
    }
    if fork.has_blob_gas() {
        layout.extend([Field::Fixed(8), Field::Fixed(8)]);
    }
    layout
}

/// Decodes an SSZ `SignedBeaconBlock` of the given fork.
pub fn decode_signed_beacon_block(
    bytes: &[u8],
    fork: ConsensusFork,
) -> Result<BeaconBlock, DecodeError> {
    let signed = split_container(bytes, &[Field::Var, Field::Fixed(SIGNATURE_LEN)])?;
    let message = split_container(
        signed[0],
        &[Field::Fixed(8), Field::Fixed(8), Field::Fixed(32), Field::Fixed(32), Field::Var],
    )?;
    let body_layout = body_layout(fork);
    let body = split_container(message[4], &body_layout)?;

    // The payload follows the sync aggregate, the requests are always last.
    let payload = if fork.has_execution_payload() {
        Some(decode_execution_payload(body[9], fork)?)
    } else {
        None
    };
    let requests = if fork.has_execution_requests() {
        Some(decode_execution_requests(body[body_layout.len() - 1])?)
    } else {
        None
    };

    Ok(BeaconBlock {
        slot: read_u64(message[0])?,
        proposer_index: read_u64(message[1])?,
        parent_root: read_root(message[2])?,
        state_root: read_root(message[3])?,
        payload,
        requests,
    })
}

/// Decodes an SSZ `ExecutionPayload` of the given fork.
pub fn decode_execution_payload(
    bytes: &[u8],
    fork: ConsensusFork,
) -> Result<ExecutionPayload, DecodeError> {
    let f = split_container(bytes, &payload_layout(fork))?;

    let withdrawals = if fork.has_withdrawals() {
        let items = split_fixed_list(f[14], WITHDRAWAL_LEN)?;
        Some(items.into_iter().map(decode_withdrawal).collect::<Result<Vec<_>, _>>()?)
    } else {
        None
    };
    let (blob_gas_used, excess_blob_gas) = if fork.has_blob_gas() {
        (Some(read_u64(f[15])?), Some(read_u64(f[16])?))
    } else {
        (None, None)
    };

    Ok(ExecutionPayload {
        parent_hash: read_root(f[0])?,
        fee_recipient: Address::try_from(f[1])
            .map_err(|_| DecodeError::Field("fee recipient"))?,
        state_root: read_root(f[2])?,
        receipts_root: read_root(f[3])?,
        logs_bloom: Bloom::try_from(f[4]).map_err(|_| DecodeError::Field("logs bloom"))?,
        prev_randao: read_root(f[5])?,
        block_number: read_u64(f[6])?,
        gas_limit: read_u64(f[7])?,
        gas_used: read_u64(f[8])?,
        timestamp: read_u64(f[9])?,
        extra_data: Bytes::copy_from_slice(f[10]),
        base_fee_per_gas: U256::from_le_slice(f[11]),
        block_hash: read_root(f[12])?,
        transactions: split_byte_lists(f[13])?.into_iter().map(Bytes::from).collect(),
        withdrawals,
        blob_gas_used,
        excess_blob_gas,
    })
}

fn decode_withdrawal(bytes: &[u8]) -> Result<Withdrawal, DecodeError> {
    Ok(Withdrawal {
        index: read_u64(&bytes[0..8])?,
        validator_index: read_u64(&bytes[8..16])?,
        address: Address::try_from(&bytes[16..36])
            .map_err(|_| DecodeError::Field("withdrawal address"))?,
        amount: read_u64(&bytes[36..44])?,
    })
}

fn decode_execution_requests(bytes: &[u8]) -> Result<ExecutionRequests, DecodeError> {
    let f = split_container(bytes, &[Field::Var, Field::Var, Field::Var])?;
    Ok(ExecutionRequests {
        deposits: Bytes::copy_from_slice(f[0]),
        withdrawals: Bytes::copy_from_slice(f[1]),
        consolidations: Bytes::copy_from_slice(f[2]),
    })
}

impl BeaconBlock {
    /// Returns true if the block carries a real execution payload.
    ///
    /// Bellatrix blocks before the merge carry an all-zero default payload.
    pub fn has_execution_block(&self) -> bool {
        self.payload.as_ref().is_some_and(|p| !p.block_hash.is_zero())
    }

    /// Rebuilds the execution block from the payload.
    ///
    /// Returns `Ok(None)` when there is no execution block. The rebuilt header must hash to the
    /// payload's block hash.
    pub fn into_execution_block(self) -> Result<Option<SealedBlock>, DecodeError> {
        if !self.has_execution_block() {
            return Ok(None);
        }
        let Some(payload) = self.payload else { return Ok(None) };

        let transactions = payload
            .transactions
            .iter()
            .map(|raw| TxEnvelope::decode_2718(&mut raw.as_ref()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| DecodeError::Field("transaction"))?;
        let base_fee_per_gas = u64::try_from(payload.base_fee_per_gas)
            .map_err(|_| DecodeError::Field("base fee exceeds 64 bits"))?;
        let withdrawals = payload.withdrawals.map(Withdrawals::new);
        let deneb = payload.blob_gas_used.is_some();

        let header = Header {
            parent_hash: payload.parent_hash,
            ommers_hash: EMPTY_OMMER_ROOT_HASH,
            beneficiary: payload.fee_recipient,
            state_root: payload.state_root,
            transactions_root: calculate_transaction_root(&transactions),
            receipts_root: payload.receipts_root,
            logs_bloom: payload.logs_bloom,
            difficulty: U256::ZERO,
            number: payload.block_number,
            gas_limit: payload.gas_limit,
            gas_used: payload.gas_used,
            timestamp: payload.timestamp,
            extra_data: payload.extra_data,
            mix_hash: payload.prev_randao,
            nonce: B64::ZERO,
            base_fee_per_gas: Some(base_fee_per_gas),
            withdrawals_root: withdrawals.as_ref().map(|w| calculate_withdrawals_root(w)),
            blob_gas_used: payload.blob_gas_used,
            excess_blob_gas: payload.excess_blob_gas,
            parent_beacon_block_root: deneb.then_some(self.parent_root),
            requests_hash: self.requests.as_ref().map(ExecutionRequests::requests_hash),
        };

        let block = SealedBlock::new(Block {
            header,
            body: BlockBody { transactions, ommers: Vec::new(), withdrawals },
        });
        if block.hash() != payload.block_hash {
            return Err(DecodeError::BlockHash {
                expected: payload.block_hash,
                computed: block.hash(),
            });
        }
        Ok(Some(block))
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub(crate) mod encode {
    //! Beacon block encoding for fixtures.

    use super::*;
    use crate::container::encode::{Value, byte_lists, container};
    use alloy_eips::eip2718::Encodable2718;

    /// Encodes `block` as the execution payload of a signed beacon block at `slot`.
    pub(crate) fn signed_beacon_block(
        block: &SealedBlock,
        slot: u64,
        fork: ConsensusFork,
        parent_root: B256,
    ) -> Vec<u8> {
        let header = block.header();
        let mut payload = vec![
            Value::Fixed(header.parent_hash.to_vec()),
            Value::Fixed(header.beneficiary.to_vec()),
            Value::Fixed(header.state_root.to_vec()),
            Value::Fixed(header.receipts_root.to_vec()),
            Value::Fixed(header.logs_bloom.to_vec()),
            Value::Fixed(header.mix_hash.to_vec()),
            Value::Fixed(header.number.to_le_bytes().to_vec()),
            Value::Fixed(header.gas_limit.to_le_bytes().to_vec()),
            Value::Fixed(header.gas_used.to_le_bytes().to_vec()),
            Value::Fixed(header.timestamp.to_le_bytes().to_vec()),
            Value::Var(header.extra_data.to_vec()),
            Value::Fixed(
                U256::from(header.base_fee_per_gas.unwrap_or_default())
                    .to_le_bytes::<32>()
                    .to_vec(),
            ),
            Value::Fixed(block.hash().to_vec()),
            Value::Var(byte_lists(
                &block.body().transactions.iter().map(|tx| tx.encoded_2718()).collect::<Vec<_>>(),
            )),
        ];
        if fork.has_withdrawals() {
            let mut withdrawals = Vec::new();
            for w in block.body().withdrawals.iter().flat_map(|w| w.iter()) {
                withdrawals.extend_from_slice(&w.index.to_le_bytes());
                withdrawals.extend_from_slice(&w.validator_index.to_le_bytes());
                withdrawals.extend_from_slice(w.address.as_slice());
                withdrawals.extend_from_slice(&w.amount.to_le_bytes());
            }
            payload.push(Value::Var(withdrawals));
        }
        if fork.has_blob_gas() {
            payload.push(Value::Fixed(
                header.blob_gas_used.unwrap_or_default().to_le_bytes().to_vec(),
            ));
            payload.push(Value::Fixed(
                header.excess_blob_gas.unwrap_or_default().to_le_bytes().to_vec(),
            ));
        }

        let mut body = vec![
            Value::Fixed(vec![0; 96]),
            Value::Fixed(vec![0; 72]),
            Value::Fixed(vec![0; 32]),
            Value::Var(vec![]),
            Value::Var(vec![]),
            Value::Var(vec![]),
            Value::Var(vec![]),
            Value::Var(vec![]),
        ];
        if fork >= ConsensusFork::Altair {
            body.push(Value::Fixed(vec![0; 160]));
        }
        if fork >= ConsensusFork::Bellatrix {
            body.push(Value::Var(container(payload)));
        }
        if fork >= ConsensusFork::Capella {
            body.push(Value::Var(vec![]));
        }
        if fork >= ConsensusFork::Deneb {
            body.push(Value::Var(vec![]));
        }
        if fork >= ConsensusFork::Electra {
            body.push(Value::Var(container(vec![
                Value::Var(vec![]),
                Value::Var(vec![]),
                Value::Var(vec![]),
            ])));
        }

        let message = container(vec![
            Value::Fixed(slot.to_le_bytes().to_vec()),
            Value::Fixed(7u64.to_le_bytes().to_vec()),
            Value::Fixed(parent_root.to_vec()),
            Value::Fixed(B256::ZERO.to_vec()),
            Value::Var(container(body)),
        ]);
        container(vec![Value::Var(message), Value::Fixed(vec![0; SIGNATURE_LEN])])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::post_merge_chain;
    use rstest::rstest;

    #[rstest]
    #[case::bellatrix(ConsensusFork::Bellatrix)]
    #[case::capella(ConsensusFork::Capella)]
    #[case::deneb(ConsensusFork::Deneb)]
    #[case::electra(ConsensusFork::Electra)]
    fn test_execution_block_roundtrip(#[case] fork: ConsensusFork) {
        let blocks = post_merge_chain(None, 100, 3, fork);
        for (slot, parent_root, block) in blocks {
            let bytes = encode::signed_beacon_block(&block, slot, fork, parent_root);
            let beacon = decode_signed_beacon_block(&bytes, fork).unwrap();
            assert_eq!(beacon.slot, slot);
            assert_eq!(beacon.parent_root, parent_root);
            let rebuilt = beacon.into_execution_block().unwrap().unwrap();
            assert_eq!(rebuilt.hash(), block.hash());
            assert_eq!(rebuilt.body(), block.body());
        }
    }

    #[test]
    fn test_wrong_fork_layout_fails() {
        let (slot, root, block) = post_merge_chain(None, 10, 1, ConsensusFork::Capella).remove(0);
        let bytes = encode::signed_beacon_block(&block, slot, ConsensusFork::Capella, root);
        let decoded = decode_signed_beacon_block(&bytes, ConsensusFork::Deneb)
            .and_then(BeaconBlock::into_execution_block);
        assert!(decoded.is_err());
    }

    #[test]
    fn test_pre_merge_payload_has_no_block() {
        let beacon = BeaconBlock {
            slot: 1,
            proposer_index: 0,
            parent_root: B256::ZERO,
            state_root: B256::ZERO,
            payload: None,
            requests: None,
        };
        assert!(!beacon.has_execution_block());
        assert_eq!(beacon.into_execution_block().unwrap(), None);
    }

    #[test]
    fn test_empty_requests_hash() {
        // sha256 of the empty string
        assert_eq!(
            ExecutionRequests::default().requests_hash(),
            alloy_primitives::b256!(
                "0xe3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
            )
        );
    }
}
