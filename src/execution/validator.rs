use rust_decimal::Decimal;
use uuid::Uuid;

use super::quantizer::{quantize_price, quantize_quantity};
use crate::error::ValidationError;
use crate::models::{Instrument, OrderIntent, OrderRequest, OrderType, Side};

/// Checks proposed orders against instrument rules and quantizes them
///
/// Pure: the instrument lookup is done by the caller and passed in, so
/// validation never touches the network. Checks run in a fixed order and
/// the first failure wins.
#[derive(Debug, Clone, Default)]
pub struct OrderValidator;

impl OrderValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate command-surface input where side and type are still text
    #[allow(clippy::too_many_arguments)]
    pub fn validate_raw(
        &self,
        symbol: &str,
        side: &str,
        order_type: &str,
        quantity: Decimal,
        price: Option<Decimal>,
        stop_price: Option<Decimal>,
        instrument: Option<&Instrument>,
    ) -> Result<OrderRequest, ValidationError> {
        let instrument = Self::resolve(symbol, instrument)?;
        let side: Side = side.parse()?;
        let order_type: OrderType = order_type.parse()?;

        let intent = OrderIntent {
            symbol: instrument.symbol.clone(),
            side,
            order_type,
            quantity,
            price,
            stop_price,
        };
        Self::check(&intent, instrument)
    }

    /// Validate a typed intent, producing a new quantized request
    pub fn validate(
        &self,
        intent: &OrderIntent,
        instrument: Option<&Instrument>,
    ) -> Result<OrderRequest, ValidationError> {
        let instrument = Self::resolve(&intent.symbol, instrument)?;
        Self::check(intent, instrument)
    }

    fn resolve<'a>(
        symbol: &str,
        instrument: Option<&'a Instrument>,
    ) -> Result<&'a Instrument, ValidationError> {
        instrument
            .filter(|i| i.symbol.eq_ignore_ascii_case(symbol.trim()))
            .ok_or_else(|| ValidationError::UnknownSymbol(symbol.to_string()))
    }

    fn check(intent: &OrderIntent, instrument: &Instrument) -> Result<OrderRequest, ValidationError> {
        let quantity = quantize_quantity(instrument, intent.quantity);
        let minimum = instrument.step_size.max(instrument.min_qty);
        if quantity <= Decimal::ZERO || quantity < minimum {
            return Err(ValidationError::QuantityTooSmall {
                quantity: intent.quantity,
                minimum,
            });
        }

        let price = if intent.order_type.requires_price() {
            let price = intent
                .price
                .map(|p| quantize_price(instrument, p))
                .filter(|p| *p > Decimal::ZERO)
                .ok_or(ValidationError::PriceRequired(intent.order_type))?;
            Some(price)
        } else {
            None
        };

        let stop_price = if intent.order_type.requires_stop_price() {
            let stop = intent
                .stop_price
                .map(|p| quantize_price(instrument, p))
                .filter(|p| *p > Decimal::ZERO)
                .ok_or(ValidationError::StopPriceRequired(intent.order_type))?;
            Some(stop)
        } else {
            None
        };

        Ok(OrderRequest {
            symbol: instrument.symbol.clone(),
            side: intent.side,
            order_type: intent.order_type,
            quantity,
            price,
            stop_price,
            client_order_id: format!("sb-{}", Uuid::new_v4().simple()),
        })
    }
}
