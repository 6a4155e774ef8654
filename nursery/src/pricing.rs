//! Booking pricing.
//!
//! Amounts are whole currency units. The advance is rounded half-up and the
//! balance is derived by subtraction, so `advance + balance == total` holds
//! exactly for every quote.

use crate::error::{BookingError, BookingResult};
use crate::types::Money;
use serde::{Deserialize, Serialize};

/// Largest advance percentage a quote will apply
pub const MAX_ADVANCE_PERCENT: u8 = 100;

/// Priced booking terms
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingQuote {
    /// Units booked
    pub quantity: u32,
    /// Advance percentage applied
    pub advance_percent: u8,
    /// `unit_price × quantity`
    pub amount_total: Money,
    /// `round(amount_total × advance_percent / 100)`
    pub amount_advance: Money,
    /// `amount_total − amount_advance`
    pub amount_balance: Money,
}

/// Price a booking request
///
/// - quantity: the larger of `min_order_qty` and the requested quantity when a
///   positive one is given, otherwise `min_order_qty`
/// - advance percent: the larger of the floor and the requested percent when
///   given, otherwise the floor; never above 100
///
/// # Errors
///
/// - [`BookingError::InvalidPlantPrice`] if `unit_price` is zero
/// - [`BookingError::Validation`] if the quantity or total does not fit
pub fn compute_booking(
    unit_price: Money,
    requested_quantity: Option<i64>,
    min_order_qty: u32,
    requested_advance_percent: Option<i64>,
    advance_floor_percent: u8,
) -> BookingResult<BookingQuote> {
    if unit_price.is_zero() {
        return Err(BookingError::InvalidPlantPrice);
    }

    let min_order_qty = min_order_qty.max(1);
    let quantity = match requested_quantity {
        Some(requested) if requested > 0 => {
            let requested = u32::try_from(requested).map_err(|_| {
                BookingError::Validation(format!("quantity {requested} is too large"))
            })?;
            requested.max(min_order_qty)
        },
        _ => min_order_qty,
    };

    let floor = advance_floor_percent.min(MAX_ADVANCE_PERCENT);
    let advance_percent = requested_advance_percent.map_or(floor, |requested| {
        let clamped = requested.clamp(0, i64::from(MAX_ADVANCE_PERCENT));
        u8::try_from(clamped).unwrap_or(MAX_ADVANCE_PERCENT).max(floor)
    });

    let amount_total = unit_price
        .checked_mul(u64::from(quantity))
        .ok_or_else(|| BookingError::Validation("booking total overflows".to_string()))?;
    let amount_advance = round_percent(amount_total, advance_percent);
    let amount_balance = amount_total
        .checked_sub(amount_advance)
        .ok_or_else(|| BookingError::Validation("advance exceeds total".to_string()))?;

    Ok(BookingQuote {
        quantity,
        advance_percent,
        amount_total,
        amount_advance,
        amount_balance,
    })
}

/// `round_half_up(amount × percent / 100)`, never more than `amount` for `percent <= 100`
fn round_percent(amount: Money, percent: u8) -> Money {
    let scaled = u128::from(amount.units()) * u128::from(percent) + 50;
    let units = u64::try_from(scaled / 100).unwrap_or(u64::MAX);
    Money::from_units(units.min(amount.units()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn ten_percent_of_fifteen_hundred() {
        let quote = compute_booking(Money::from_units(150), Some(10), 1, Some(10), 10).unwrap();
        assert_eq!(quote.quantity, 10);
        assert_eq!(quote.amount_total, Money::from_units(1500));
        assert_eq!(quote.amount_advance, Money::from_units(150));
        assert_eq!(quote.amount_balance, Money::from_units(1350));
    }

    #[test]
    fn quantity_never_below_minimum() {
        let quote = compute_booking(Money::from_units(20), Some(3), 25, None, 10).unwrap();
        assert_eq!(quote.quantity, 25);

        let quote = compute_booking(Money::from_units(20), Some(-4), 25, None, 10).unwrap();
        assert_eq!(quote.quantity, 25);

        let quote = compute_booking(Money::from_units(20), None, 25, None, 10).unwrap();
        assert_eq!(quote.quantity, 25);
    }

    #[test]
    fn advance_never_below_floor() {
        let quote = compute_booking(Money::from_units(100), Some(1), 1, Some(-50), 10).unwrap();
        assert_eq!(quote.advance_percent, 10);

        let quote = compute_booking(Money::from_units(100), Some(1), 1, Some(5), 10).unwrap();
        assert_eq!(quote.advance_percent, 10);

        let quote = compute_booking(Money::from_units(100), Some(1), 1, Some(40), 10).unwrap();
        assert_eq!(quote.advance_percent, 40);
        assert_eq!(quote.amount_advance, Money::from_units(40));
    }

    #[test]
    fn advance_capped_at_full_amount() {
        let quote = compute_booking(Money::from_units(99), Some(2), 1, Some(250), 10).unwrap();
        assert_eq!(quote.advance_percent, 100);
        assert_eq!(quote.amount_advance, quote.amount_total);
        assert_eq!(quote.amount_balance, Money::ZERO);
    }

    #[test]
    fn advance_rounds_half_up() {
        // 15 × 10% = 1.5 → 2
        let quote = compute_booking(Money::from_units(15), Some(1), 1, None, 10).unwrap();
        assert_eq!(quote.amount_advance, Money::from_units(2));
        assert_eq!(quote.amount_balance, Money::from_units(13));

        // 14 × 10% = 1.4 → 1
        let quote = compute_booking(Money::from_units(14), Some(1), 1, None, 10).unwrap();
        assert_eq!(quote.amount_advance, Money::from_units(1));
    }

    #[test]
    fn zero_price_is_rejected() {
        assert_eq!(
            compute_booking(Money::ZERO, Some(1), 1, None, 10),
            Err(BookingError::InvalidPlantPrice)
        );
    }

    #[test]
    fn oversized_quantity_is_a_validation_error() {
        let result = compute_booking(Money::from_units(1), Some(i64::MAX), 1, None, 10);
        assert!(matches!(result, Err(BookingError::Validation(_))));

        let result = compute_booking(Money::from_units(u64::MAX), Some(2), 1, None, 10);
        assert!(matches!(result, Err(BookingError::Validation(_))));
    }
}
