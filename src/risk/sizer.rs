use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Converts a fixed risk budget and stop distance into an order quantity
///
/// quantity = max_risk / (price * stop_loss_pct), never below `min_quantity`.
/// Stateless; the result is unquantized and still goes through validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSizer {
    pub max_risk: Decimal,      // quote currency lost if the stop is hit
    pub stop_loss_pct: Decimal, // 0.01 = 1%
    pub min_quantity: Decimal,
}

impl Default for RiskSizer {
    fn default() -> Self {
        Self {
            max_risk: dec!(50),
            stop_loss_pct: dec!(0.01),
            min_quantity: dec!(0.001),
        }
    }
}

impl RiskSizer {
    pub fn new(max_risk: Decimal, stop_loss_pct: Decimal, min_quantity: Decimal) -> Self {
        Self {
            max_risk,
            stop_loss_pct,
            min_quantity,
        }
    }

    pub fn size(&self, price: Decimal) -> Decimal {
        if price <= Decimal::ZERO || self.stop_loss_pct <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let quantity = self.max_risk / (price * self.stop_loss_pct);
        quantity.max(self.min_quantity)
    }

    /// Stop price for a long entry at `price`
    pub fn stop_price(&self, price: Decimal) -> Decimal {
        price * (Decimal::ONE - self.stop_loss_pct)
    }
}
