use braid_core::constants::THRESHOLD_SIZE;
use braid_core::types::Amount;

/// Fee due for units above the size threshold. Grows faster than linearly
/// in the excess, in pure integer arithmetic so every node computes the
/// identical value:
///
///   fee = excess + excess² / THRESHOLD_SIZE
pub fn required_oversize_fee(size: usize) -> Amount {
    if size <= THRESHOLD_SIZE {
        return 0;
    }
    let excess = (size - THRESHOLD_SIZE) as u64;
    excess + excess.saturating_mul(excess) / THRESHOLD_SIZE as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_fee_at_or_below_threshold() {
        assert_eq!(required_oversize_fee(THRESHOLD_SIZE), 0);
        assert_eq!(required_oversize_fee(100), 0);
    }

    #[test]
    fn fee_is_superlinear() {
        let f1 = required_oversize_fee(THRESHOLD_SIZE + 1000);
        let f2 = required_oversize_fee(THRESHOLD_SIZE + 2000);
        assert!(f2 > 2 * f1);
    }
}
