//! Margin arithmetic in wire units.
//!
//! Mirrors the exchange program's formulas so callers can preview an order
//! before sending it. Sizes carry 10^8 scale, prices and USD 10^6, so
//! `|size| * price / 10^8` lands in micro-USD.

use crate::domain::fixed_point::{BPS_DENOMINATOR, SIZE_SCALE};
use crate::domain::Side;
use crate::program_error::ProgramError;

/// Notional value in micro-USD.
pub fn notional(size: i64, price: u64) -> Result<u64, ProgramError> {
    let value = size.unsigned_abs() as u128 * price as u128 / SIZE_SCALE as u128;
    u64::try_from(value).map_err(|_| ProgramError::MathOverflow)
}

/// Initial margin locked when opening `size` at `price`.
pub fn required_margin(size: i64, price: u64, initial_margin_bps: u16) -> Result<u64, ProgramError> {
    let n = notional(size, price)? as u128;
    let margin = n * initial_margin_bps as u128 / BPS_DENOMINATOR as u128;
    u64::try_from(margin).map_err(|_| ProgramError::MathOverflow)
}

/// Liquidation price the program stores: entry moved against the position by
/// the maintenance margin rate. Longs round down and shorts round up, so the
/// result stays strictly on the loss side of entry even at sub-cent prices.
pub fn estimate_liquidation_price(
    entry_price: u64,
    side: Side,
    maintenance_margin_bps: u16,
) -> Result<u64, ProgramError> {
    let denominator = BPS_DENOMINATOR as u128;
    let mmr = maintenance_margin_bps as u128;
    let price = match side {
        Side::Long => entry_price as u128 * denominator.saturating_sub(mmr) / denominator,
        Side::Short => (entry_price as u128 * (denominator + mmr)).div_ceil(denominator),
    };
    u64::try_from(price).map_err(|_| ProgramError::MathOverflow)
}

/// PnL in micro-USD of closing `size` (signed) opened at `entry_price` at `exit_price`.
pub fn realized_pnl(size: i64, entry_price: u64, exit_price: u64) -> Result<i64, ProgramError> {
    let diff = exit_price as i128 - entry_price as i128;
    let pnl = size as i128 * diff / SIZE_SCALE as i128;
    i64::try_from(pnl).map_err(|_| ProgramError::MathOverflow)
}

/// Whether `mark_price` has crossed the stored liquidation price.
pub fn is_liquidatable(side: Side, mark_price: u64, liquidation_price: u64) -> bool {
    match side {
        Side::Long => mark_price <= liquidation_price,
        Side::Short => mark_price >= liquidation_price,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notional_and_margin() {
        // 0.5 BTC at 67,420
        assert_eq!(notional(50_000_000, 67_420_000_000).unwrap(), 33_710_000_000);
        assert_eq!(notional(-50_000_000, 67_420_000_000).unwrap(), 33_710_000_000);
        // 2% initial margin = 50x
        assert_eq!(
            required_margin(50_000_000, 67_420_000_000, 200).unwrap(),
            674_200_000
        );
    }

    #[test]
    fn test_realized_pnl_scenario() {
        // (68150 - 67420) * 0.5 = 365
        assert_eq!(
            realized_pnl(50_000_000, 67_420_000_000, 68_150_000_000).unwrap(),
            365_000_000
        );
        assert_eq!(
            realized_pnl(-50_000_000, 67_420_000_000, 68_150_000_000).unwrap(),
            -365_000_000
        );
    }

    #[test]
    fn test_liquidation_price_sits_on_loss_side() {
        let entry = 67_420_000_000;
        for mmr in [1u16, 50, 500, 2500, 9999] {
            let long = estimate_liquidation_price(entry, Side::Long, mmr).unwrap();
            let short = estimate_liquidation_price(entry, Side::Short, mmr).unwrap();
            assert!(long < entry, "long liq {} at mmr {}", long, mmr);
            assert!(short > entry, "short liq {} at mmr {}", short, mmr);
        }
        assert_eq!(
            estimate_liquidation_price(entry, Side::Long, 500).unwrap(),
            64_049_000_000
        );
        assert_eq!(
            estimate_liquidation_price(entry, Side::Short, 500).unwrap(),
            70_791_000_000
        );
    }

    #[test]
    fn test_short_liquidation_rounds_up_at_tiny_prices() {
        // 0.00005 at 1% maintenance: 50.5 micro-units
        assert_eq!(estimate_liquidation_price(50, Side::Short, 100).unwrap(), 51);
        assert_eq!(estimate_liquidation_price(50, Side::Long, 100).unwrap(), 49);
        assert_eq!(estimate_liquidation_price(1, Side::Short, 1).unwrap(), 2);
    }

    #[test]
    fn test_is_liquidatable() {
        assert!(is_liquidatable(Side::Long, 64_000, 64_049));
        assert!(!is_liquidatable(Side::Long, 65_000, 64_049));
        assert!(is_liquidatable(Side::Short, 70_800, 70_791));
        assert!(!is_liquidatable(Side::Short, 70_000, 70_791));
    }

    #[test]
    fn test_overflow_is_reported() {
        assert_eq!(
            realized_pnl(i64::MAX, 0, u64::MAX),
            Err(ProgramError::MathOverflow)
        );
    }
}
