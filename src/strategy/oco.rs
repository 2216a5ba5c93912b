use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::Instrument;

use super::ExecutionStatus;
use crate::error::ExecutionError;
use crate::execution::ExecutionGateway;
use crate::models::{OcoOrderResult, OcoRequest, OrderIntent, OrderResult, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcoMode {
    /// Exchange-side linked order list
    Native,
    /// Two independent orders placed by us
    Client,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LegOutcome {
    Placed(OrderResult),
    Failed(ExecutionError),
    NotAttempted,
}

impl LegOutcome {
    pub fn order(&self) -> Option<&OrderResult> {
        match self {
            LegOutcome::Placed(order) => Some(order),
            _ => None,
        }
    }

    pub fn is_placed(&self) -> bool {
        matches!(self, LegOutcome::Placed(_))
    }
}

/// Outcome of a take-profit / stop-loss submission
///
/// A placed take-profit leg is left on the book when the stop-loss leg
/// fails; cancelling it is up to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct OcoReport {
    pub mode: OcoMode,
    pub native: Option<OcoOrderResult>,
    /// Why the native attempt was abandoned, if it was
    pub fallback_reason: Option<ExecutionError>,
    pub take_profit: LegOutcome,
    pub stop_loss: LegOutcome,
}

impl OcoReport {
    pub fn status(&self) -> ExecutionStatus {
        if self.mode == OcoMode::Native {
            return ExecutionStatus::Succeeded;
        }

        match (self.take_profit.is_placed(), self.stop_loss.is_placed()) {
            (true, true) => ExecutionStatus::Succeeded,
            (true, false) => ExecutionStatus::Partial,
            _ => ExecutionStatus::Failed,
        }
    }

    pub fn order_ids(&self) -> Vec<u64> {
        if let Some(native) = &self.native {
            return native.order_ids.clone();
        }

        [&self.take_profit, &self.stop_loss]
            .iter()
            .filter_map(|leg| leg.order())
            .map(|order| order.order_id)
            .collect()
    }
}

/// Places a take-profit / stop-loss exit pair
///
/// Tries the exchange's native OCO first. If the exchange does not offer it,
/// refuses it, or keeps failing transiently, places the two legs as separate
/// orders instead: take-profit LIMIT first, then STOP_LIMIT. A fatal failure
/// aborts without falling back, and so does an unconfirmed native call, since
/// the linked pair may already be live.
pub struct OcoCoordinator {
    gateway: Arc<ExecutionGateway>,
}

impl OcoCoordinator {
    pub fn new(gateway: Arc<ExecutionGateway>) -> Self {
        Self { gateway }
    }

    /// `entry_side` is the side of the position being protected; both exit
    /// legs are placed on the opposite side.
    pub async fn submit(
        &self,
        symbol: &str,
        entry_side: Side,
        quantity: Decimal,
        take_profit_price: Decimal,
        stop_loss_price: Decimal,
    ) -> Result<OcoReport, ExecutionError> {
        let span = tracing::info_span!("oco", symbol = %symbol.to_uppercase());
        self.run(symbol, entry_side, quantity, take_profit_price, stop_loss_price)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        symbol: &str,
        entry_side: Side,
        quantity: Decimal,
        take_profit_price: Decimal,
        stop_loss_price: Decimal,
    ) -> Result<OcoReport, ExecutionError> {
        let exit_side = entry_side.opposite();

        // Both legs are validated up front so nothing is sent for bad input
        let take_profit = self
            .gateway
            .prepare(&OrderIntent::limit(symbol, exit_side, quantity, take_profit_price))
            .await?;
        let stop_loss = self
            .gateway
            .prepare(&OrderIntent::stop_limit(
                symbol,
                exit_side,
                quantity,
                stop_loss_price,
                stop_loss_price,
            ))
            .await?;

        let native_request = OcoRequest {
            symbol: take_profit.symbol.clone(),
            side: exit_side,
            quantity: take_profit.quantity,
            take_profit_price: take_profit.price.unwrap_or(take_profit_price),
            stop_price: stop_loss.stop_price.unwrap_or(stop_loss_price),
            stop_limit_price: stop_loss.price.unwrap_or(stop_loss_price),
        };

        let fallback_reason = match self.gateway.submit_oco(&native_request).await {
            Ok(native) => {
                tracing::info!(
                    order_list_id = native.order_list_id,
                    order_ids = ?native.order_ids,
                    "Native OCO placed"
                );
                return Ok(OcoReport {
                    mode: OcoMode::Native,
                    native: Some(native),
                    fallback_reason: None,
                    take_profit: LegOutcome::NotAttempted,
                    stop_loss: LegOutcome::NotAttempted,
                });
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) if e.is_unconfirmed() => {
                tracing::error!("Native OCO outcome unknown, not placing client legs: {}", e);
                return Err(e);
            }
            Err(e) => {
                tracing::warn!("Native OCO failed, falling back to client-side legs: {}", e);
                e
            }
        };

        let mut report = OcoReport {
            mode: OcoMode::Client,
            native: None,
            fallback_reason: Some(fallback_reason),
            take_profit: LegOutcome::NotAttempted,
            stop_loss: LegOutcome::NotAttempted,
        };

        match self.gateway.submit(&take_profit).await {
            Ok(order) => {
                tracing::info!(order_id = order.order_id, "Take-profit leg placed");
                report.take_profit = LegOutcome::Placed(order);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::error!("Take-profit leg failed, stop-loss not attempted: {}", e);
                report.take_profit = LegOutcome::Failed(e);
                return Ok(report);
            }
        }

        match self.gateway.submit(&stop_loss).await {
            Ok(order) => {
                tracing::info!(order_id = order.order_id, "Stop-loss leg placed");
                report.stop_loss = LegOutcome::Placed(order);
            }
            Err(e) => {
                tracing::error!(
                    "Stop-loss leg failed after take-profit was placed, position is only partly protected: {}",
                    e
                );
                report.stop_loss = LegOutcome::Failed(e);
            }
        }

        Ok(report)
    }
}
