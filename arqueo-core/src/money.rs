use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Truncate a decimal amount to integral minor currency units. Fractional
/// cents are dropped, never rounded.
pub fn truncate_amount(value: Decimal) -> i64 {
    value.trunc().to_i64().unwrap_or(0)
}
