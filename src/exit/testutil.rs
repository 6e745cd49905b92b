// =============================================================================
// Test-only in-memory exchange
// =============================================================================

use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::okx::{Candle, ExchangeApi, ExchangePosition, OrderStatus};
use crate::types::{Direction, OrderSide};

/// A limit or market order recorded by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub pos_side: Direction,
    pub size: f64,
    pub price: Option<f64>,
    pub reduce_only: bool,
}

/// Scriptable `ExchangeApi` implementation for unit tests.
#[derive(Default)]
pub struct MockExchange {
    mark_prices: Mutex<HashMap<String, f64>>,
    klines: Mutex<HashMap<String, Vec<Candle>>>,
    order_statuses: Mutex<HashMap<String, OrderStatus>>,
    positions: Mutex<Vec<ExchangePosition>>,
    tick_size: Mutex<Option<f64>>,
    placed: Mutex<Vec<PlacedOrder>>,
    canceled: Mutex<Vec<String>>,
    next_id: Mutex<u64>,
    fail_limit_orders: Mutex<bool>,
    fail_cancels: Mutex<bool>,
}

impl MockExchange {
    pub fn set_mark_price(&self, symbol: &str, price: f64) {
        self.mark_prices.lock().insert(symbol.to_string(), price);
    }

    pub fn set_klines(&self, symbol: &str, candles: Vec<Candle>) {
        self.klines.lock().insert(symbol.to_string(), candles);
    }

    pub fn set_order_status(&self, order_id: &str, status: OrderStatus) {
        self.order_statuses
            .lock()
            .insert(order_id.to_string(), status);
    }

    pub fn set_tick_size(&self, tick: f64) {
        *self.tick_size.lock() = Some(tick);
    }

    pub fn set_positions(&self, positions: Vec<ExchangePosition>) {
        *self.positions.lock() = positions;
    }

    pub fn fail_limit_orders(&self, fail: bool) {
        *self.fail_limit_orders.lock() = fail;
    }

    pub fn fail_cancels(&self, fail: bool) {
        *self.fail_cancels.lock() = fail;
    }

    pub fn placed_orders(&self) -> Vec<PlacedOrder> {
        self.placed.lock().clone()
    }

    pub fn canceled_orders(&self) -> Vec<String> {
        self.canceled.lock().clone()
    }

    fn next_order_id(&self) -> String {
        let mut id = self.next_id.lock();
        *id += 1;
        format!("mock-order-{}", *id)
    }
}

#[async_trait]
impl ExchangeApi for MockExchange {
    async fn get_mark_price(&self, symbol: &str) -> Result<f64> {
        Ok(*self.mark_prices.lock().get(symbol).unwrap_or(&0.0))
    }

    async fn get_klines(&self, symbol: &str, _bar: &str, limit: usize) -> Result<Vec<Candle>> {
        let all = self.klines.lock().get(symbol).cloned().unwrap_or_default();
        let start = all.len().saturating_sub(limit);
        Ok(all[start..].to_vec())
    }

    async fn get_order_status(&self, _symbol: &str, order_id: &str) -> Result<OrderStatus> {
        Ok(*self
            .order_statuses
            .lock()
            .get(order_id)
            .unwrap_or(&OrderStatus::Unknown))
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        pos_side: Direction,
        size: f64,
        price: f64,
        reduce_only: bool,
    ) -> Result<String> {
        if *self.fail_limit_orders.lock() {
            bail!("mock: limit order placement failure");
        }
        let order_id = self.next_order_id();
        self.order_statuses
            .lock()
            .insert(order_id.clone(), OrderStatus::Open);
        self.placed.lock().push(PlacedOrder {
            order_id: order_id.clone(),
            symbol: symbol.to_string(),
            side,
            pos_side,
            size,
            price: Some(price),
            reduce_only,
        });
        Ok(order_id)
    }

    async fn place_market_close(
        &self,
        symbol: &str,
        pos_side: Direction,
        size: f64,
    ) -> Result<String> {
        let order_id = self.next_order_id();
        self.placed.lock().push(PlacedOrder {
            order_id: order_id.clone(),
            symbol: symbol.to_string(),
            side: pos_side.closing_side(),
            pos_side,
            size,
            price: None,
            reduce_only: true,
        });
        Ok(order_id)
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<()> {
        if *self.fail_cancels.lock() {
            bail!("mock: cancel failure");
        }
        self.canceled.lock().push(order_id.to_string());
        self.order_statuses
            .lock()
            .insert(order_id.to_string(), OrderStatus::Canceled);
        Ok(())
    }

    async fn get_positions(&self) -> Result<Vec<ExchangePosition>> {
        Ok(self.positions.lock().clone())
    }

    async fn get_tick_size(&self, _symbol: &str) -> Result<Option<f64>> {
        Ok(*self.tick_size.lock())
    }
}
