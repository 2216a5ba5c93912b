use rust_decimal::Decimal;

use crate::models::Instrument;

/// Round `value` down to the largest multiple of `increment` that does not exceed it
///
/// Never rounds up, so a quantity can never exceed what the caller asked for.
/// Negative input yields zero. A non-positive increment means the exchange
/// imposes no filter and the value is only normalized.
pub fn quantize(value: Decimal, increment: Decimal) -> Decimal {
    if value <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    if increment <= Decimal::ZERO {
        return value.normalize();
    }

    (value - value % increment).normalize()
}

/// Quantity rounded to the instrument's LOT_SIZE step
pub fn quantize_quantity(instrument: &Instrument, quantity: Decimal) -> Decimal {
    quantize(quantity, instrument.step_size)
}

/// Price rounded to the instrument's PRICE_FILTER tick
pub fn quantize_price(instrument: &Instrument, price: Decimal) -> Decimal {
    quantize(price, instrument.tick_size)
}

/// Plain decimal text for the wire, never scientific notation
pub fn to_wire(value: Decimal) -> String {
    value.normalize().to_string()
}
