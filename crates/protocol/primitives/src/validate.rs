//! Structural consistency checks between a block body and its header.

use crate::{BlockBody, BlockInfo, Header};
use alloy_consensus::proofs::{
    calculate_ommers_root, calculate_transaction_root, calculate_withdrawals_root,
};
use alloy_primitives::B256;
use thiserror::Error;

/// A body does not match the commitments in its header.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BodyValidationError {
    /// The transactions root does not match.
    #[error("transactions root mismatch: header {expected}, body {got}")]
    TransactionsRoot {
        /// Root committed in the header.
        expected: B256,
        /// Root computed from the body.
        got: B256,
    },
    /// The ommers hash does not match.
    #[error("ommers hash mismatch: header {expected}, body {got}")]
    OmmersHash {
        /// Hash committed in the header.
        expected: B256,
        /// Hash computed from the body.
        got: B256,
    },
    /// The withdrawals root does not match.
    #[error("withdrawals root mismatch: header {expected}, body {got}")]
    WithdrawalsRoot {
        /// Root committed in the header.
        expected: B256,
        /// Root computed from the body.
        got: B256,
    },
    /// The header commits to withdrawals but the body has none, or the other way around.
    #[error("withdrawals presence mismatch: header {header}, body {body}")]
    WithdrawalsPresence {
        /// Whether the header has a withdrawals root.
        header: bool,
        /// Whether the body has withdrawals.
        body: bool,
    },
    /// The block does not extend the expected parent.
    #[error("block #{number} does not extend parent {parent}")]
    ParentMismatch {
        /// Number of the offending block.
        number: u64,
        /// The parent it was expected to extend.
        parent: BlockInfo,
    },
}

/// Checks that `body` matches the transactions root, ommers hash and withdrawals root committed
/// in `header`.
pub fn validate_body(header: &Header, body: &BlockBody) -> Result<(), BodyValidationError> {
    let tx_root = calculate_transaction_root(&body.transactions);
    if tx_root != header.transactions_root {
        return Err(BodyValidationError::TransactionsRoot {
            expected: header.transactions_root,
            got: tx_root,
        });
    }

    let ommers_hash = calculate_ommers_root(&body.ommers);
    if ommers_hash != header.ommers_hash {
        return Err(BodyValidationError::OmmersHash {
            expected: header.ommers_hash,
            got: ommers_hash,
        });
    }

    match (header.withdrawals_root, body.withdrawals.as_ref()) {
        (Some(expected), Some(withdrawals)) => {
            let got = calculate_withdrawals_root(withdrawals);
            if got != expected {
                return Err(BodyValidationError::WithdrawalsRoot { expected, got });
            }
        }
        (None, None) => {}
        (header, body) => {
            return Err(BodyValidationError::WithdrawalsPresence {
                header: header.is_some(),
                body: body.is_some(),
            });
        }
    }

    Ok(())
}

/// Checks that `header` is the direct child of `parent`.
pub fn validate_child(parent: &BlockInfo, header: &Header) -> Result<(), BodyValidationError> {
    if header.parent_hash != parent.hash || header.number != parent.number + 1 {
        return Err(BodyValidationError::ParentMismatch { number: header.number, parent: *parent });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ChainBuilder;
    use alloy_eips::eip4895::{Withdrawal, Withdrawals};

    #[test]
    fn test_valid_bodies_pass() {
        let chain = ChainBuilder::default().with_transactions(3).with_withdrawals(true).build(4);
        for block in &chain {
            validate_body(block.header(), block.body()).unwrap();
        }
    }

    #[test]
    fn test_tampered_transactions_rejected() {
        let donor = ChainBuilder::default().with_transactions(2).build(1).remove(0);
        let block = ChainBuilder::default().with_transactions(1).build(1).remove(0);
        let err = validate_body(block.header(), donor.body()).unwrap_err();
        assert!(matches!(err, BodyValidationError::TransactionsRoot { .. }));
    }

    #[test]
    fn test_withdrawals_presence_mismatch() {
        let block = ChainBuilder::default().build(1).remove(0);
        let mut body = block.body().clone();
        body.withdrawals = Some(Withdrawals::new(vec![Withdrawal::default()]));
        let err = validate_body(block.header(), &body).unwrap_err();
        assert_eq!(err, BodyValidationError::WithdrawalsPresence { header: false, body: true });
    }

    #[test]
    fn test_validate_child() {
        let chain = ChainBuilder::default().build(3);
        validate_child(&chain[0].info(), chain[1].header()).unwrap();
        let err = validate_child(&chain[0].info(), chain[2].header()).unwrap_err();
        assert!(matches!(err, BodyValidationError::ParentMismatch { number: 2, .. }));
    }
}
