//! Wrapper transaction status rule

use crate::models::{TxStatus, WrapperLegs};

/// Height gap of the source-confirmed rule
pub const SOURCE_CONFIRM_GAP: u64 = 12;

/// Status implied by the legs present for a wrapper transaction
///
/// Without a relay leg the status depends on
/// `block_height - checkpoint > SOURCE_CONFIRM_GAP` in wrapping u64
/// arithmetic, so a checkpoint past the wrapper's block yields
/// `SourceConfirmed`. A missing chain row yields `SourceDone`.
pub fn derive_status(block_height: u64, checkpoint: Option<u64>, has_poly: bool, has_dst: bool) -> TxStatus {
    match (has_poly, has_dst) {
        (true, true) => TxStatus::Finished,
        (true, false) => TxStatus::PolyConfirmed,
        (false, _) => match checkpoint {
            Some(height) if block_height.wrapping_sub(height) > SOURCE_CONFIRM_GAP => TxStatus::SourceConfirmed,
            _ => TxStatus::SourceDone,
        },
    }
}

/// New status of a wrapper, `None` when nothing changes
///
/// A derived status in an earlier phase than the stored one is discarded.
pub fn next_status(legs: &WrapperLegs, checkpoint: Option<u64>) -> Option<TxStatus> {
    let current = legs.wrapper.status;
    let derived = derive_status(
        legs.wrapper.block_height,
        checkpoint,
        legs.poly_hash.is_some(),
        legs.dst_hash.is_some(),
    );

    if derived == current || derived.phase() < current.phase() {
        None
    } else {
        Some(derived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WrapperTransaction;
    use ethers::types::U256;

    fn legs(status: TxStatus, poly: bool, dst: bool) -> WrapperLegs {
        WrapperLegs {
            wrapper: WrapperTransaction {
                hash: "w".into(),
                user: "u".into(),
                src_chain_id: 2,
                dst_chain_id: 6,
                fee_token: "t".into(),
                fee_amount: U256::zero(),
                block_height: 100,
                time: 0,
                status,
            },
            poly_hash: poly.then(|| "p".to_string()),
            dst_hash: dst.then(|| "d".to_string()),
        }
    }

    #[test]
    fn relay_and_destination_legs_drive_the_status() {
        assert_eq!(derive_status(100, Some(100), true, false), TxStatus::PolyConfirmed);
        assert_eq!(derive_status(100, Some(100), true, true), TxStatus::Finished);
        assert_eq!(derive_status(100, None, false, false), TxStatus::SourceDone);
    }

    #[test]
    fn source_status_uses_wrapping_height_difference() {
        // block well ahead of the checkpoint
        assert_eq!(derive_status(120, Some(100), false, false), TxStatus::SourceConfirmed);
        // within the gap
        assert_eq!(derive_status(112, Some(100), false, false), TxStatus::SourceDone);
        assert_eq!(derive_status(100, Some(100), false, false), TxStatus::SourceDone);
        // checkpoint already past the block wraps around to a huge difference
        assert_eq!(derive_status(100, Some(101), false, false), TxStatus::SourceConfirmed);
    }

    #[test]
    fn legs_in_order_never_move_backward() {
        let mut status = TxStatus::SourceDone;
        let mut seen = vec![status];
        for (poly, dst) in [(false, false), (true, false), (true, true), (true, true)] {
            if let Some(next) = next_status(&legs(status, poly, dst), Some(100)) {
                assert!(next.phase() >= status.phase());
                status = next;
                seen.push(status);
            }
        }
        assert_eq!(
            seen,
            vec![TxStatus::SourceDone, TxStatus::PolyConfirmed, TxStatus::Finished]
        );
    }

    #[test]
    fn earlier_phase_is_discarded() {
        assert_eq!(next_status(&legs(TxStatus::PolyConfirmed, false, false), Some(100)), None);
        assert_eq!(next_status(&legs(TxStatus::Finished, true, false), Some(100)), None);
    }

    #[test]
    fn source_statuses_switch_within_their_phase() {
        assert_eq!(
            next_status(&legs(TxStatus::SourceDone, false, false), Some(50)),
            Some(TxStatus::SourceConfirmed)
        );
        assert_eq!(
            next_status(&legs(TxStatus::SourceConfirmed, false, false), Some(95)),
            Some(TxStatus::SourceDone)
        );
    }
}
