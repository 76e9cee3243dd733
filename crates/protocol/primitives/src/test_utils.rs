//! Builders for synthetic chains used across the workspace tests.

use crate::{Block, BlockBody, BlockInfo, Header, SealedBlock};
use alloy_consensus::{
    SignableTransaction, TxEnvelope, TxLegacy,
    constants::EMPTY_OMMER_ROOT_HASH,
    proofs::{calculate_transaction_root, calculate_withdrawals_root},
};
use alloy_eips::eip4895::{Withdrawal, Withdrawals};
use alloy_primitives::{Address, B256, Bytes, Signature, TxKind, U256};

/// Builds linked chains of valid blocks.
///
/// Every block produced commits to its body, so it passes [`crate::validate_body`]. Two builders
/// with different salts produce distinct hashes for the same heights, which makes it easy to
/// create forks off a shared parent.
#[derive(Debug, Clone, Default)]
pub struct ChainBuilder {
    parent: Option<BlockInfo>,
    transactions: usize,
    withdrawals: bool,
    salt: u8,
    gas_per_tx: u64,
}

impl ChainBuilder {
    /// Starts the chain on top of `parent` instead of at genesis.
    pub const fn with_parent(mut self, parent: BlockInfo) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Number of transactions in every block.
    pub const fn with_transactions(mut self, count: usize) -> Self {
        self.transactions = count;
        self
    }

    /// Whether blocks carry withdrawals.
    pub const fn with_withdrawals(mut self, enabled: bool) -> Self {
        self.withdrawals = enabled;
        self
    }

    /// Sets a salt that is mixed into the extra data of every block.
    pub const fn with_salt(mut self, salt: u8) -> Self {
        self.salt = salt;
        self
    }

    /// Gas recorded per transaction. Defaults to 21000.
    pub const fn with_gas_per_tx(mut self, gas: u64) -> Self {
        self.gas_per_tx = gas;
        self
    }

    /// Builds `count` linked blocks.
    pub fn build(&self, count: usize) -> Vec<SealedBlock> {
        let mut out = Vec::with_capacity(count);
        let mut parent = self.parent;
        for _ in 0..count {
            let number = parent.map_or(0, |p| p.number + 1);
            let parent_hash = parent.map_or(B256::ZERO, |p| p.hash);
            let block = self.block(number, parent_hash);
            parent = Some(block.info());
            out.push(block);
        }
        out
    }

    /// Builds a single block at `number` on top of `parent_hash`.
    pub fn block(&self, number: u64, parent_hash: B256) -> SealedBlock {
        let gas_per_tx = if self.gas_per_tx == 0 { 21_000 } else { self.gas_per_tx };
        let transactions: Vec<TxEnvelope> =
            (0..self.transactions).map(|i| transaction(number, i as u64, self.salt)).collect();
        let withdrawals = self.withdrawals.then(|| {
            Withdrawals::new(vec![Withdrawal {
                index: number,
                validator_index: self.salt as u64,
                address: Address::with_last_byte(self.salt),
                amount: 32,
            }])
        });

        let header = Header {
            parent_hash,
            number,
            ommers_hash: EMPTY_OMMER_ROOT_HASH,
            transactions_root: calculate_transaction_root(&transactions),
            withdrawals_root: withdrawals.as_ref().map(|w| calculate_withdrawals_root(w)),
            gas_limit: 30_000_000,
            gas_used: gas_per_tx * transactions.len() as u64,
            timestamp: 1_600_000_000 + number * 12,
            extra_data: Bytes::from(vec![self.salt]),
            base_fee_per_gas: Some(7),
            ..Default::default()
        };
        let body = BlockBody { transactions, ommers: Vec::new(), withdrawals };
        SealedBlock::new(Block { header, body })
    }
}

/// A signed legacy transfer with a fixed, non-recoverable signature.
pub fn transaction(block: u64, index: u64, salt: u8) -> TxEnvelope {
    let tx = TxLegacy {
        chain_id: Some(1),
        nonce: block * 1_000 + index,
        gas_price: 1_000_000_000,
        gas_limit: 21_000,
        to: TxKind::Call(Address::with_last_byte(salt)),
        value: U256::from(index + 1),
        input: Bytes::new(),
    };
    let signature = Signature::new(U256::from(1u64), U256::from(1u64), false);
    TxEnvelope::from(tx.into_signed(signature))
}
