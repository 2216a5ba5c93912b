use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::Exchange;
use crate::error::ExchangeError;
use crate::models::{
    Balance, Bar, Instrument, OcoOrderResult, OcoRequest, OrderRequest, OrderResult, OrderStatus,
    OrderType,
};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory exchange with scripted outcomes
///
/// Orders are accepted unless an outcome has been queued with
/// [`MockExchange::script_orders`]; each queued entry is consumed by one
/// `create_order` call. Every attempt is recorded, accepted or not.
pub struct MockExchange {
    instruments: Mutex<HashMap<String, Instrument>>,
    balances: Mutex<HashMap<String, Balance>>,
    bars: Mutex<Vec<Bar>>,
    supports_oco: bool,
    order_script: Mutex<VecDeque<Result<(), ExchangeError>>>,
    oco_script: Mutex<VecDeque<Result<(), ExchangeError>>>,
    ping_script: Mutex<VecDeque<Result<(), ExchangeError>>>,
    attempts: Mutex<Vec<OrderRequest>>,
    oco_attempts: Mutex<Vec<OcoRequest>>,
    orders: Mutex<HashMap<u64, OrderResult>>,
    instrument_lookups: AtomicUsize,
    next_id: AtomicU64,
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            instruments: Mutex::new(HashMap::new()),
            balances: Mutex::new(HashMap::new()),
            bars: Mutex::new(Vec::new()),
            supports_oco: true,
            order_script: Mutex::new(VecDeque::new()),
            oco_script: Mutex::new(VecDeque::new()),
            ping_script: Mutex::new(VecDeque::new()),
            attempts: Mutex::new(Vec::new()),
            oco_attempts: Mutex::new(Vec::new()),
            orders: Mutex::new(HashMap::new()),
            instrument_lookups: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_instrument(self, instrument: Instrument) -> Self {
        guard(&self.instruments).insert(instrument.symbol.clone(), instrument);
        self
    }

    pub fn with_balance(self, balance: Balance) -> Self {
        guard(&self.balances).insert(balance.asset.clone(), balance);
        self
    }

    pub fn with_bars(self, bars: Vec<Bar>) -> Self {
        *guard(&self.bars) = bars;
        self
    }

    /// Behave like an exchange with no native OCO endpoint
    pub fn without_oco(mut self) -> Self {
        self.supports_oco = false;
        self
    }

    /// Queue outcomes for the next `create_order` calls, in order
    pub fn script_orders(&self, outcomes: Vec<Result<(), ExchangeError>>) {
        guard(&self.order_script).extend(outcomes);
    }

    pub fn script_oco(&self, outcomes: Vec<Result<(), ExchangeError>>) {
        guard(&self.oco_script).extend(outcomes);
    }

    pub fn script_ping(&self, outcomes: Vec<Result<(), ExchangeError>>) {
        guard(&self.ping_script).extend(outcomes);
    }

    /// Every `create_order` request received, including failed ones
    pub fn order_attempts(&self) -> Vec<OrderRequest> {
        guard(&self.attempts).clone()
    }

    pub fn oco_attempts(&self) -> Vec<OcoRequest> {
        guard(&self.oco_attempts).clone()
    }

    /// Orders currently held by the exchange
    pub fn open_orders(&self) -> Vec<OrderResult> {
        let mut orders: Vec<_> = guard(&self.orders).values().cloned().collect();
        orders.sort_by_key(|o| o.order_id);
        orders
    }

    pub fn instrument_lookups(&self) -> usize {
        self.instrument_lookups.load(Ordering::SeqCst)
    }

    fn next_outcome(script: &Mutex<VecDeque<Result<(), ExchangeError>>>) -> Result<(), ExchangeError> {
        guard(script).pop_front().unwrap_or(Ok(()))
    }

    fn accept(&self, request: &OrderRequest) -> OrderResult {
        let order_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (status, executed_quantity) = match request.order_type {
            OrderType::Market => (OrderStatus::Filled, request.quantity),
            _ => (OrderStatus::New, Decimal::ZERO),
        };

        let result = OrderResult {
            order_id,
            client_order_id: request.client_order_id.clone(),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            quantity: request.quantity,
            executed_quantity,
            price: request.price,
            stop_price: request.stop_price,
            status,
            transact_time: Some(Utc::now()),
            raw: serde_json::json!({
                "orderId": order_id,
                "symbol": request.symbol,
                "clientOrderId": request.client_order_id,
            }),
        };

        guard(&self.orders).insert(order_id, result.clone());
        result
    }

    fn not_found(order_id: u64) -> ExchangeError {
        ExchangeError::Api {
            status: 400,
            code: -2013,
            message: format!("Order {} does not exist.", order_id),
        }
    }
}

impl Default for MockExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Exchange for MockExchange {
    async fn ping(&self) -> Result<(), ExchangeError> {
        Self::next_outcome(&self.ping_script)
    }

    async fn account_balance(&self, asset: &str) -> Result<Balance, ExchangeError> {
        Ok(guard(&self.balances)
            .get(asset)
            .cloned()
            .unwrap_or_else(|| Balance {
                asset: asset.to_string(),
                free: Decimal::ZERO,
                locked: Decimal::ZERO,
            }))
    }

    async fn instrument(&self, symbol: &str) -> Result<Option<Instrument>, ExchangeError> {
        self.instrument_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(guard(&self.instruments).get(symbol).cloned())
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<OrderResult, ExchangeError> {
        guard(&self.attempts).push(request.clone());
        Self::next_outcome(&self.order_script)?;
        Ok(self.accept(request))
    }

    async fn create_oco_order(&self, request: &OcoRequest) -> Result<OcoOrderResult, ExchangeError> {
        if !self.supports_oco {
            return Err(ExchangeError::Unsupported);
        }

        guard(&self.oco_attempts).push(request.clone());
        Self::next_outcome(&self.oco_script)?;

        let order_list_id = self.next_id.fetch_add(1, Ordering::SeqCst) as i64;
        let first = self.next_id.fetch_add(2, Ordering::SeqCst);
        let order_ids = vec![first, first + 1];

        Ok(OcoOrderResult {
            order_list_id,
            raw: serde_json::json!({ "orderListId": order_list_id, "symbol": request.symbol }),
            order_ids,
        })
    }

    async fn cancel_order(
        &self,
        _symbol: &str,
        order_id: u64,
    ) -> Result<OrderResult, ExchangeError> {
        let mut orders = guard(&self.orders);
        let order = orders.get_mut(&order_id).ok_or_else(|| Self::not_found(order_id))?;
        order.status = OrderStatus::Canceled;
        Ok(order.clone())
    }

    async fn get_order(&self, _symbol: &str, order_id: u64) -> Result<OrderResult, ExchangeError> {
        guard(&self.orders)
            .get(&order_id)
            .cloned()
            .ok_or_else(|| Self::not_found(order_id))
    }

    async fn klines(
        &self,
        _symbol: &str,
        _interval: &str,
        limit: u32,
    ) -> Result<Vec<Bar>, ExchangeError> {
        let bars = guard(&self.bars);
        let skip = bars.len().saturating_sub(limit as usize);
        Ok(bars[skip..].to_vec())
    }
}
