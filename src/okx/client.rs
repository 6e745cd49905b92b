// =============================================================================
// OKX v5 REST API Client — HMAC-SHA256/base64 signed requests
// =============================================================================
//
// SECURITY: the secret key and passphrase are never logged or serialized.
// Signed requests carry OK-ACCESS-KEY / OK-ACCESS-SIGN / OK-ACCESS-TIMESTAMP /
// OK-ACCESS-PASSPHRASE headers; the signature covers
// `timestamp + method + path + body` and is base64-encoded.
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, warn};

use crate::okx::api::{Candle, ExchangeApi, ExchangePosition, OrderStatus};
use crate::types::{Direction, OrderSide};

type HmacSha256 = Hmac<Sha256>;

/// OKX error codes meaning "the order is already gone" — cancellation against
/// such an order is treated as success (idempotent cancel).
const CANCEL_GONE_CODES: [&str; 4] = ["51400", "51401", "51402", "51410"];

/// OKX error code for "order does not exist".
const ORDER_NOT_EXIST_CODE: &str = "51603";

/// OKX v5 REST client.
#[derive(Clone)]
pub struct OkxClient {
    api_key: String,
    secret: String,
    passphrase: String,
    base_url: String,
    client: reqwest::Client,
}

impl OkxClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a new `OkxClient`.
    pub fn new(
        api_key: impl Into<String>,
        secret: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        debug!("OkxClient initialised (base_url=https://www.okx.com)");

        Self {
            api_key: api_key.into(),
            secret: secret.into(),
            passphrase: passphrase.into(),
            base_url: "https://www.okx.com".to_string(),
            client,
        }
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    /// Produce the base64 HMAC-SHA256 signature over
    /// `timestamp + method + path + body`.
    fn sign(&self, timestamp: &str, method: &str, path: &str, body: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(timestamp.as_bytes());
        mac.update(method.as_bytes());
        mac.update(path.as_bytes());
        mac.update(body.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }

    /// ISO-8601 timestamp with millisecond precision, as the signature scheme
    /// requires.
    fn iso_timestamp() -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Issue a signed request and return the parsed `data` array from the
    /// standard `{code, msg, data}` envelope. A non-zero `code` is an error.
    async fn signed_request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let ts = Self::iso_timestamp();
        let body_str = body
            .as_ref()
            .map(|b| b.to_string())
            .unwrap_or_default();
        let sig = self.sign(&ts, method.as_str(), path, &body_str);

        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .client
            .request(method, &url)
            .header("OK-ACCESS-KEY", &self.api_key)
            .header("OK-ACCESS-SIGN", sig)
            .header("OK-ACCESS-TIMESTAMP", ts)
            .header("OK-ACCESS-PASSPHRASE", &self.passphrase)
            .header("Content-Type", "application/json");
        if let Some(b) = body {
            req = req.json(&b);
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("request to {path} failed"))?;
        let envelope: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse response from {path}"))?;

        let code = envelope["code"].as_str().unwrap_or("");
        if code != "0" {
            anyhow::bail!(
                "OKX {} returned code {}: {}",
                path,
                code,
                envelope["msg"].as_str().unwrap_or("")
            );
        }
        Ok(envelope["data"].clone())
    }

    /// Issue an unsigned public GET and return the `data` array.
    async fn public_get(&self, path: &str) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("request to {path} failed"))?;
        let envelope: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse response from {path}"))?;

        let code = envelope["code"].as_str().unwrap_or("");
        if code != "0" {
            anyhow::bail!(
                "OKX {} returned code {}: {}",
                path,
                code,
                envelope["msg"].as_str().unwrap_or("")
            );
        }
        Ok(envelope["data"].clone())
    }
}

// ---------------------------------------------------------------------------
// Response parsing (pure helpers, unit-tested)
// ---------------------------------------------------------------------------

/// Parse an `f64` out of an OKX string-typed numeric field.
fn num(value: &serde_json::Value) -> f64 {
    value
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Parse one candle row. OKX rows are positional string arrays:
/// `[ts, open, high, low, close, volume, ...]`.
fn parse_candle_row(row: &serde_json::Value) -> Option<Candle> {
    let arr = row.as_array()?;
    if arr.len() < 6 {
        return None;
    }
    Some(Candle {
        ts: arr[0].as_str()?.parse().ok()?,
        open: num(&arr[1]),
        high: num(&arr[2]),
        low: num(&arr[3]),
        close: num(&arr[4]),
        volume: num(&arr[5]),
    })
}

/// Map an OKX order `state` string to our status enum.
fn parse_order_state(state: &str) -> OrderStatus {
    match state {
        "live" => OrderStatus::Open,
        "partially_filled" => OrderStatus::PartiallyFilled,
        "filled" => OrderStatus::Filled,
        "canceled" | "mmp_canceled" => OrderStatus::Canceled,
        _ => OrderStatus::Unknown,
    }
}

/// Parse one row of the positions endpoint into an `ExchangePosition`.
fn parse_position_row(row: &serde_json::Value) -> Option<ExchangePosition> {
    let symbol = row["instId"].as_str()?.to_string();
    let direction = match row["posSide"].as_str()? {
        "long" => Direction::Long,
        "short" => Direction::Short,
        _ => return None,
    };
    let size = num(&row["pos"]);
    // The exchange reports size unsigned for long/short mode; sign it so the
    // reconciler can check sign consistency directly.
    let quantity = size.abs() * direction.signum();
    Some(ExchangePosition {
        symbol,
        direction,
        quantity,
        avg_entry_price: num(&row["avgPx"]),
        realized_pnl: num(&row["realizedPnl"]),
        updated_ms: row["uTime"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
    })
}

// ---------------------------------------------------------------------------
// ExchangeApi implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ExchangeApi for OkxClient {
    async fn get_mark_price(&self, symbol: &str) -> Result<f64> {
        let path = format!("/api/v5/public/mark-price?instType=SWAP&instId={symbol}");
        let data = self.public_get(&path).await?;
        // Missing data is "price unavailable", not an error.
        Ok(data
            .as_array()
            .and_then(|rows| rows.first())
            .map(|row| num(&row["markPx"]))
            .unwrap_or(0.0))
    }

    async fn get_klines(&self, symbol: &str, bar: &str, limit: usize) -> Result<Vec<Candle>> {
        let path = format!("/api/v5/market/candles?instId={symbol}&bar={bar}&limit={limit}");
        let data = self.public_get(&path).await?;

        let mut candles: Vec<Candle> = data
            .as_array()
            .map(|rows| rows.iter().filter_map(parse_candle_row).collect())
            .unwrap_or_default();
        // OKX returns newest-first; the engine works oldest-first.
        candles.reverse();
        Ok(candles)
    }

    async fn get_order_status(&self, symbol: &str, order_id: &str) -> Result<OrderStatus> {
        let path = format!("/api/v5/trade/order?instId={symbol}&ordId={order_id}");
        match self
            .signed_request(reqwest::Method::GET, &path, None)
            .await
        {
            Ok(data) => Ok(data
                .as_array()
                .and_then(|rows| rows.first())
                .and_then(|row| row["state"].as_str())
                .map(parse_order_state)
                .unwrap_or(OrderStatus::Unknown)),
            // An id the exchange no longer knows is a valid terminal state;
            // anything else (network, auth) must propagate so callers skip
            // the tick instead of mistaking it for a fill.
            Err(e) if e.to_string().contains(ORDER_NOT_EXIST_CODE) => {
                warn!(symbol, order_id, "order id unknown to the exchange");
                Ok(OrderStatus::Unknown)
            }
            Err(e) => Err(e),
        }
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
        let body = serde_json::json!({
            "instId": symbol,
            "tdMode": "cross",
            "side": side.to_string(),
            "posSide": pos_side.to_string(),
            "ordType": "limit",
            "sz": size.to_string(),
            "px": price.to_string(),
            "reduceOnly": reduce_only,
        });

        let data = self
            .signed_request(reqwest::Method::POST, "/api/v5/trade/order", Some(body))
            .await?;

        let order_id = data
            .as_array()
            .and_then(|rows| rows.first())
            .and_then(|row| row["ordId"].as_str())
            .context("order response missing ordId")?
            .to_string();

        debug!(symbol, %side, price, size, order_id = %order_id, "limit order placed");
        Ok(order_id)
    }

    async fn place_market_close(
        &self,
        symbol: &str,
        pos_side: Direction,
        size: f64,
    ) -> Result<String> {
        let body = serde_json::json!({
            "instId": symbol,
            "tdMode": "cross",
            "side": pos_side.closing_side().to_string(),
            "posSide": pos_side.to_string(),
            "ordType": "market",
            "sz": size.to_string(),
            "reduceOnly": true,
        });

        let data = self
            .signed_request(reqwest::Method::POST, "/api/v5/trade/order", Some(body))
            .await?;

        let order_id = data
            .as_array()
            .and_then(|rows| rows.first())
            .and_then(|row| row["ordId"].as_str())
            .context("close order response missing ordId")?
            .to_string();

        debug!(symbol, pos_side = %pos_side, size, order_id = %order_id, "market close placed");
        Ok(order_id)
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        let body = serde_json::json!({ "instId": symbol, "ordId": order_id });
        match self
            .signed_request(reqwest::Method::POST, "/api/v5/trade/cancel-order", Some(body))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                let msg = e.to_string();
                if CANCEL_GONE_CODES.iter().any(|c| msg.contains(c)) {
                    debug!(symbol, order_id, "cancel: order already gone — treated as success");
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn get_positions(&self) -> Result<Vec<ExchangePosition>> {
        let data = self
            .signed_request(
                reqwest::Method::GET,
                "/api/v5/account/positions?instType=SWAP",
                None,
            )
            .await?;

        Ok(data
            .as_array()
            .map(|rows| rows.iter().filter_map(parse_position_row).collect())
            .unwrap_or_default())
    }

    async fn get_tick_size(&self, symbol: &str) -> Result<Option<f64>> {
        let path = format!("/api/v5/public/instruments?instType=SWAP&instId={symbol}");
        let data = self.public_get(&path).await?;
        let tick = data
            .as_array()
            .and_then(|rows| rows.first())
            .map(|row| num(&row["tickSz"]))
            .filter(|t| *t > 0.0);
        Ok(tick)
    }
}

impl std::fmt::Debug for OkxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OkxClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candle_row_parses_positionally() {
        let row = serde_json::json!([
            "1700000000000", "100.1", "101.5", "99.2", "100.9", "1234.5", "0", "0", "1"
        ]);
        let c = parse_candle_row(&row).unwrap();
        assert_eq!(c.ts, 1_700_000_000_000);
        assert!((c.open - 100.1).abs() < 1e-12);
        assert!((c.high - 101.5).abs() < 1e-12);
        assert!((c.low - 99.2).abs() < 1e-12);
        assert!((c.close - 100.9).abs() < 1e-12);
        assert!((c.volume - 1234.5).abs() < 1e-12);
    }

    #[test]
    fn short_candle_row_is_skipped() {
        let row = serde_json::json!(["1700000000000", "100.1"]);
        assert!(parse_candle_row(&row).is_none());
    }

    #[test]
    fn order_states_map() {
        assert_eq!(parse_order_state("live"), OrderStatus::Open);
        assert_eq!(parse_order_state("partially_filled"), OrderStatus::PartiallyFilled);
        assert_eq!(parse_order_state("filled"), OrderStatus::Filled);
        assert_eq!(parse_order_state("canceled"), OrderStatus::Canceled);
        assert_eq!(parse_order_state("mmp_canceled"), OrderStatus::Canceled);
        assert_eq!(parse_order_state("whatever"), OrderStatus::Unknown);
    }

    #[test]
    fn position_row_signs_quantity() {
        let row = serde_json::json!({
            "instId": "BTC-USDT-SWAP",
            "posSide": "short",
            "pos": "3",
            "avgPx": "45000",
            "realizedPnl": "-12.5",
            "uTime": "1700000000000"
        });
        let p = parse_position_row(&row).unwrap();
        assert_eq!(p.direction, Direction::Short);
        assert!(p.quantity < 0.0);
        assert!((p.quantity + 3.0).abs() < 1e-12);
        assert_eq!(p.updated_ms, 1_700_000_000_000);
    }

    #[test]
    fn position_row_unknown_side_skipped() {
        let row = serde_json::json!({
            "instId": "BTC-USDT-SWAP",
            "posSide": "net",
            "pos": "3"
        });
        assert!(parse_position_row(&row).is_none());
    }

    #[test]
    fn signature_is_deterministic_base64() {
        let client = OkxClient::new("key", "secret", "pass");
        let sig1 = client.sign("2024-01-01T00:00:00.000Z", "GET", "/api/v5/account/positions", "");
        let sig2 = client.sign("2024-01-01T00:00:00.000Z", "GET", "/api/v5/account/positions", "");
        assert_eq!(sig1, sig2);
        assert!(BASE64.decode(&sig1).is_ok());
    }
}
