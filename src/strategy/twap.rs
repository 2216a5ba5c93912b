use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::Instrument;

use super::{BatchReport, StepFailure};
use crate::error::ExecutionError;
use crate::execution::ExecutionGateway;
use crate::models::{OrderIntent, OrderResult, Side};

/// Validated TWAP parameters
#[derive(Debug, Clone, PartialEq)]
pub struct TwapPlan {
    pub symbol: String,
    pub side: Side,
    pub total_quantity: Decimal,
    pub duration: Duration,
    pub slices: u32,
    pub min_slice_quantity: Decimal,
}

impl TwapPlan {
    pub fn new(
        symbol: &str,
        side: Side,
        total_quantity: Decimal,
        duration: Duration,
        slices: u32,
        min_slice_quantity: Decimal,
    ) -> Result<Self, ExecutionError> {
        if slices == 0 {
            return Err(ExecutionError::InvalidParameters(
                "slice count must be positive".to_string(),
            ));
        }
        if duration.is_zero() {
            return Err(ExecutionError::InvalidParameters(
                "duration must be positive".to_string(),
            ));
        }

        Ok(Self {
            symbol: symbol.to_uppercase(),
            side,
            total_quantity,
            duration,
            slices,
            min_slice_quantity,
        })
    }

    /// total / slices, raised to the minimum slice size
    pub fn slice_quantity(&self) -> Decimal {
        (self.total_quantity / Decimal::from(self.slices)).max(self.min_slice_quantity)
    }

    /// Pause between consecutive slices
    pub fn interval(&self) -> Duration {
        self.duration / self.slices
    }
}

/// Time-sliced market execution
///
/// Slices go out one at a time through the gateway with a fixed pause
/// between them. The first failed slice ends the run; earlier slices stay
/// filled. Cancellation is checked only between slices.
pub struct TwapScheduler {
    gateway: Arc<ExecutionGateway>,
}

impl TwapScheduler {
    pub fn new(gateway: Arc<ExecutionGateway>) -> Self {
        Self { gateway }
    }

    pub async fn execute(&self, plan: &TwapPlan) -> BatchReport<OrderResult> {
        let (_never, cancel) = watch::channel(false);
        self.execute_with_cancel(plan, cancel).await
    }

    /// Run the plan; setting the watch value to `true` stops it at the next slice boundary
    pub async fn execute_with_cancel(
        &self,
        plan: &TwapPlan,
        cancel: watch::Receiver<bool>,
    ) -> BatchReport<OrderResult> {
        let span = tracing::info_span!("twap", symbol = %plan.symbol, side = %plan.side);
        self.run(plan, cancel).instrument(span).await
    }

    async fn run(&self, plan: &TwapPlan, mut cancel: watch::Receiver<bool>) -> BatchReport<OrderResult> {
        let slice_quantity = plan.slice_quantity();
        let interval = plan.interval();
        let mut report = BatchReport::new();

        tracing::info!(
            total = %plan.total_quantity,
            slices = plan.slices,
            slice_quantity = %slice_quantity,
            interval = ?interval,
            "Starting TWAP"
        );

        for slice in 1..=plan.slices {
            if slice > 1 && pause(interval, &mut cancel).await {
                tracing::info!("TWAP cancelled after {} of {} slices", slice - 1, plan.slices);
                report.cancelled = true;
                return report;
            }

            let intent = OrderIntent::market(&plan.symbol, plan.side, slice_quantity);
            match self.gateway.place(&intent).await {
                Ok(order) => {
                    tracing::info!(
                        order_id = order.order_id,
                        "TWAP slice {}/{} placed",
                        slice,
                        plan.slices
                    );
                    report.completed.push(order);
                }
                Err(error) => {
                    tracing::error!("TWAP slice {}/{} failed: {}", slice, plan.slices, error);
                    report.failure = Some(StepFailure {
                        step: slice as usize,
                        error,
                    });
                    return report;
                }
            }
        }

        tracing::info!("TWAP complete: {} slices placed", report.completed.len());
        report
    }
}

/// Sleep for `interval` unless cancelled first; returns true on cancel
async fn pause(interval: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    if *cancel.borrow_and_update() {
        return true;
    }

    let sleep = tokio::time::sleep(interval);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = cancel.changed() => match changed {
                Ok(()) if *cancel.borrow_and_update() => return true,
                Ok(()) => {}
                // Sender gone: nobody can cancel any more
                Err(_) => {
                    sleep.as_mut().await;
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockExchange;
    use crate::error::ExchangeError;
    use crate::execution::RetryPolicy;
    use crate::models::Instrument;
    use crate::strategy::ExecutionStatus;
    use rust_decimal_macros::dec;

    fn setup() -> (Arc<MockExchange>, TwapScheduler) {
        let exchange = Arc::new(MockExchange::new().with_instrument(Instrument {
            symbol: "BTCUSDT".to_string(),
            step_size: dec!(0.0001),
            tick_size: dec!(0.01),
            min_qty: dec!(0.0001),
        }));
        let gateway = Arc::new(ExecutionGateway::new(exchange.clone(), RetryPolicy::default()));
        (exchange, TwapScheduler::new(gateway))
    }

    fn plan(total: Decimal, secs: u64, slices: u32) -> TwapPlan {
        TwapPlan::new("BTCUSDT", Side::Buy, total, Duration::from_secs(secs), slices, Decimal::ZERO)
            .unwrap()
    }

    #[test]
    fn test_slice_arithmetic() {
        let p = plan(dec!(1.0), 8, 4);
        assert_eq!(p.slice_quantity(), dec!(0.25));
        assert_eq!(p.interval(), Duration::from_secs(2));

        let p = TwapPlan::new("BTCUSDT", Side::Buy, dec!(1), Duration::from_secs(8), 4, dec!(0.3))
            .unwrap();
        assert_eq!(p.slice_quantity(), dec!(0.3));
    }

    #[test]
    fn test_invalid_parameters() {
        let zero_slices = TwapPlan::new("BTCUSDT", Side::Buy, dec!(1), Duration::from_secs(8), 0, dec!(0));
        assert!(matches!(zero_slices, Err(ExecutionError::InvalidParameters(_))));

        let zero_duration = TwapPlan::new("BTCUSDT", Side::Buy, dec!(1), Duration::ZERO, 4, dec!(0));
        assert!(matches!(zero_duration, Err(ExecutionError::InvalidParameters(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_slices_paced() {
        let (exchange, twap) = setup();
        let start = tokio::time::Instant::now();

        let report = twap.execute(&plan(dec!(1.0), 8, 4)).await;

        assert_eq!(report.status(), ExecutionStatus::Succeeded);
        assert_eq!(report.completed.len(), 4);
        // Pauses only between slices
        assert_eq!(start.elapsed(), Duration::from_secs(6));

        let attempts = exchange.order_attempts();
        assert!(attempts.iter().all(|o| o.quantity == dec!(0.25)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_stops_remaining_slices() {
        let (exchange, twap) = setup();
        exchange.script_orders(vec![
            Ok(()),
            Ok(()),
            Err(ExchangeError::Api {
                status: 400,
                code: -2010,
                message: "insufficient balance".to_string(),
            }),
        ]);

        let report = twap.execute(&plan(dec!(1.0), 8, 4)).await;

        assert_eq!(report.status(), ExecutionStatus::Partial);
        assert_eq!(report.completed.len(), 2);
        let failure = report.failure.unwrap();
        assert_eq!(failure.step, 3);
        assert!(matches!(failure.error, ExecutionError::Rejected(_)));
        // No retry of the failed slice and no fourth slice
        assert_eq!(exchange.order_attempts().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_at_slice_boundary() {
        let (exchange, twap) = setup();
        let (tx, rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            let _ = tx.send(true);
        });

        let report = twap.execute_with_cancel(&plan(dec!(1.0), 8, 4), rx).await;

        assert!(report.cancelled);
        assert_eq!(report.status(), ExecutionStatus::Cancelled);
        assert_eq!(report.completed.len(), 2);
        assert_eq!(exchange.order_attempts().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_too_small_slice_fails_first_step() {
        let (exchange, twap) = setup();

        let report = twap.execute(&plan(dec!(0.0002), 8, 4)).await;

        assert_eq!(report.status(), ExecutionStatus::Failed);
        assert!(matches!(
            report.failure.map(|f| f.error),
            Some(ExecutionError::Validation(_))
        ));
        assert!(exchange.order_attempts().is_empty());
    }
}
