use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::Instrument;

use super::{BatchReport, StepFailure};
use crate::error::ExecutionError;
use crate::execution::ExecutionGateway;
use crate::models::{OrderIntent, OrderResult, Side};

/// Ladder prices for a one-sided grid, nearest level first
///
/// Level i (1-based) sits `step_pct * i` below the base for buys and above
/// it for sells. Prices are unquantized.
pub fn grid_levels(base_price: Decimal, levels: u32, step_pct: Decimal, side: Side) -> Vec<Decimal> {
    (1..=levels)
        .map(|i| {
            let offset = step_pct * Decimal::from(i);
            match side {
                Side::Buy => base_price * (Decimal::ONE - offset),
                Side::Sell => base_price * (Decimal::ONE + offset),
            }
        })
        .collect()
}

/// Places a ladder of limit orders around a reference price
pub struct GridBuilder {
    gateway: Arc<ExecutionGateway>,
}

impl GridBuilder {
    pub fn new(gateway: Arc<ExecutionGateway>) -> Self {
        Self { gateway }
    }

    /// Place one limit order per level, stopping at the first failure
    pub async fn build(
        &self,
        symbol: &str,
        base_price: Decimal,
        levels: u32,
        step_pct: Decimal,
        quantity: Decimal,
        side: Side,
    ) -> Result<BatchReport<OrderResult>, ExecutionError> {
        if base_price <= Decimal::ZERO {
            return Err(ExecutionError::InvalidParameters(
                "base price must be positive".to_string(),
            ));
        }
        if step_pct <= Decimal::ZERO {
            return Err(ExecutionError::InvalidParameters(
                "step percentage must be positive".to_string(),
            ));
        }

        let span = tracing::info_span!("grid", symbol = %symbol.to_uppercase(), side = %side);
        Ok(self
            .place_levels(symbol, grid_levels(base_price, levels, step_pct, side), quantity, side)
            .instrument(span)
            .await)
    }

    async fn place_levels(
        &self,
        symbol: &str,
        prices: Vec<Decimal>,
        quantity: Decimal,
        side: Side,
    ) -> BatchReport<OrderResult> {
        let mut report = BatchReport::new();
        let total = prices.len();

        for (i, price) in prices.into_iter().enumerate() {
            let level = i + 1;
            match self
                .gateway
                .place(&OrderIntent::limit(symbol, side, quantity, price))
                .await
            {
                Ok(order) => {
                    tracing::info!(
                        order_id = order.order_id,
                        price = ?order.price,
                        "Grid level {}/{} placed",
                        level,
                        total
                    );
                    report.completed.push(order);
                }
                Err(error) => {
                    tracing::error!("Grid level {}/{} failed: {}", level, total, error);
                    report.failure = Some(StepFailure { step: level, error });
                    return report;
                }
            }
        }

        tracing::info!("Grid built: {} levels", report.completed.len());
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockExchange;
    use crate::error::ValidationError;
    use crate::execution::RetryPolicy;
    use crate::models::{Instrument, OrderType};
    use crate::strategy::ExecutionStatus;
    use rust_decimal_macros::dec;

    fn setup() -> (Arc<MockExchange>, GridBuilder) {
        let exchange = Arc::new(MockExchange::new().with_instrument(Instrument {
            symbol: "ETHUSDT".to_string(),
            step_size: dec!(0.001),
            tick_size: dec!(0.01),
            min_qty: dec!(0.001),
        }));
        let gateway = Arc::new(ExecutionGateway::new(exchange.clone(), RetryPolicy::default()));
        (exchange, GridBuilder::new(gateway))
    }

    #[test]
    fn test_grid_levels() {
        assert_eq!(
            grid_levels(dec!(100), 3, dec!(0.01), Side::Buy),
            vec![dec!(99), dec!(98), dec!(97)]
        );
        assert_eq!(
            grid_levels(dec!(100), 3, dec!(0.01), Side::Sell),
            vec![dec!(101), dec!(102), dec!(103)]
        );
        assert!(grid_levels(dec!(100), 0, dec!(0.01), Side::Buy).is_empty());
    }

    #[tokio::test]
    async fn test_build_places_limit_orders() {
        let (exchange, grid) = setup();

        let report = grid
            .build("ETHUSDT", dec!(100), 3, dec!(0.01), dec!(0.5), Side::Sell)
            .await
            .unwrap();

        assert_eq!(report.status(), ExecutionStatus::Succeeded);
        let attempts = exchange.order_attempts();
        let prices: Vec<_> = attempts.iter().map(|o| o.price).collect();
        assert_eq!(prices, vec![Some(dec!(101)), Some(dec!(102)), Some(dec!(103))]);
        assert!(attempts
            .iter()
            .all(|o| o.order_type == OrderType::Limit && o.side == Side::Sell));
    }

    #[tokio::test]
    async fn test_prices_are_quantized_to_tick() {
        let (exchange, grid) = setup();

        grid.build("ETHUSDT", dec!(1234.567), 2, dec!(0.003), dec!(1), Side::Buy)
            .await
            .unwrap();

        // 1230.863299 -> 1230.86, 1227.159598 -> 1227.15
        let attempts = exchange.order_attempts();
        assert_eq!(attempts[0].price, Some(dec!(1230.86)));
        assert_eq!(attempts[1].price, Some(dec!(1227.15)));
    }

    #[tokio::test]
    async fn test_failure_returns_placed_levels() {
        let (_exchange, grid) = setup();

        // Level 2 is at zero and cannot be priced
        let report = grid
            .build("ETHUSDT", dec!(100), 3, dec!(0.5), dec!(1), Side::Buy)
            .await
            .unwrap();

        assert_eq!(report.status(), ExecutionStatus::Partial);
        assert_eq!(report.completed.len(), 1);
        let failure = report.failure.unwrap();
        assert_eq!(failure.step, 2);
        assert_eq!(
            failure.error,
            ExecutionError::Validation(ValidationError::PriceRequired(OrderType::Limit))
        );
    }

    #[tokio::test]
    async fn test_invalid_parameters() {
        let (exchange, grid) = setup();

        let err = grid
            .build("ETHUSDT", dec!(0), 3, dec!(0.01), dec!(1), Side::Buy)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidParameters(_)));

        let err = grid
            .build("ETHUSDT", dec!(100), 3, dec!(-0.01), dec!(1), Side::Buy)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidParameters(_)));
        assert!(exchange.order_attempts().is_empty());
    }
}
