use super::{
    ExchangeError, ExchangeGateway, OpenOrder, OrderSide, OrderStatus, TriggerDirection,
};
use crate::config::{Credentials, ExchangeSettings};
use crate::models::{Candle, Direction, ExchangePosition};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use log::*;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

const CATEGORY: &str = "linear";

#[derive(Debug, Clone)]
pub struct BybitGateway {
    settings: ExchangeSettings,
    credentials: Credentials,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct BybitResponse<T> {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct KlineResult {
    list: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TickerResult {
    list: Vec<TickerEntry>,
}

#[derive(Debug, Deserialize)]
struct TickerEntry {
    #[serde(rename = "lastPrice")]
    last_price: String,
}

#[derive(Debug, Deserialize)]
struct OrderCreateResult {
    #[serde(rename = "orderId")]
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct OrderListResult {
    list: Vec<OrderEntry>,
}

#[derive(Debug, Deserialize)]
struct OrderEntry {
    #[serde(rename = "orderId")]
    order_id: String,
    side: String,
    qty: String,
    #[serde(default)]
    price: String,
    #[serde(rename = "triggerPrice", default)]
    trigger_price: String,
    #[serde(rename = "reduceOnly", default)]
    reduce_only: bool,
    #[serde(rename = "orderStatus")]
    order_status: String,
}

#[derive(Debug, Deserialize)]
struct PositionListResult {
    list: Vec<PositionEntry>,
}

#[derive(Debug, Deserialize)]
struct PositionEntry {
    symbol: String,
    side: String,
    size: String,
    #[serde(rename = "avgPrice", default)]
    avg_price: String,
}

impl BybitGateway {
    pub fn new(settings: ExchangeSettings, credentials: Credentials) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self { settings, credentials, client })
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    // Bybit v5 signature: HMAC-SHA256 over timestamp + key + recv_window +
    // (query string for GET, JSON body for POST).
    fn sign(&self, timestamp: u64, payload: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.credentials.api_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(
            format!(
                "{}{}{}{}",
                timestamp, self.credentials.api_key, self.settings.recv_window_ms, payload
            )
            .as_bytes(),
        );
        hex::encode(mac.finalize().into_bytes())
    }

    async fn signed_get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &str,
    ) -> Result<T, ExchangeError> {
        let timestamp = Self::timestamp_ms();
        let signature = self.sign(timestamp, query);
        let url = format!("{}{}?{}", self.settings.base_url, endpoint, query);

        let response = self
            .client
            .get(&url)
            .header("X-BAPI-API-KEY", &self.credentials.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", self.settings.recv_window_ms.to_string())
            .header("X-BAPI-SIGN", signature)
            .send()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        Self::decode(response).await
    }

    async fn signed_post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<T, ExchangeError> {
        let payload = body.to_string();
        let timestamp = Self::timestamp_ms();
        let signature = self.sign(timestamp, &payload);
        let url = format!("{}{}", self.settings.base_url, endpoint);

        let response = self
            .client
            .post(&url)
            .header("X-BAPI-API-KEY", &self.credentials.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", self.settings.recv_window_ms.to_string())
            .header("X-BAPI-SIGN", signature)
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ExchangeError> {
        let body = response
            .text()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        let parsed: BybitResponse<T> = serde_json::from_str(&body).map_err(|e| {
            error!("Failed to parse Bybit response: {}, body: {}", e, body);
            ExchangeError::Parse(e.to_string())
        })?;

        if parsed.ret_code != 0 {
            return Err(Self::map_error(parsed.ret_code, parsed.ret_msg));
        }
        parsed
            .result
            .ok_or_else(|| ExchangeError::Parse("missing result field".to_string()))
    }

    fn map_error(code: i64, message: String) -> ExchangeError {
        match code {
            110017 => ExchangeError::PositionAlreadyClosed(message),
            110043 => ExchangeError::LeverageUnchanged(message),
            10006 | 10018 => ExchangeError::RateLimited(message),
            10003 | 10004 | 10005 => ExchangeError::Auth(message),
            110001 => ExchangeError::OrderNotFound(message),
            110007 | 110012 => ExchangeError::OrderRejected(message),
            _ if message.contains("current position is zero") => {
                ExchangeError::PositionAlreadyClosed(message)
            }
            _ if message.contains("leverage not modified") => {
                ExchangeError::LeverageUnchanged(message)
            }
            _ => ExchangeError::Api { code, message },
        }
    }

    fn map_status(status: &str) -> OrderStatus {
        match status {
            "Created" | "New" | "PartiallyFilled" | "Untriggered" => OrderStatus::Open,
            "Filled" => OrderStatus::Filled,
            "Triggered" => OrderStatus::Triggered,
            "Cancelled" | "PartiallyFilledCanceled" | "Deactivated" | "Rejected" => {
                OrderStatus::Cancelled
            }
            other => {
                warn!("Unknown Bybit order status: {}", other);
                OrderStatus::NotFound
            }
        }
    }

    fn parse_f64(value: &str, field: &str) -> Result<f64, ExchangeError> {
        value
            .parse::<f64>()
            .map_err(|_| ExchangeError::Parse(format!("bad {} value: {:?}", field, value)))
    }

    fn format_qty(quantity: f64) -> String {
        // Trailing zeros are harmless; scientific notation is not.
        format!("{}", quantity)
    }
}

#[async_trait]
impl ExchangeGateway for BybitGateway {
    async fn get_candles(
        &self,
        symbol: &str,
        interval_minutes: u64,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let query = format!(
            "category={}&symbol={}&interval={}&limit={}",
            CATEGORY, symbol, interval_minutes, limit
        );
        let result: KlineResult = self.signed_get("/v5/market/kline", &query).await?;

        // Bybit returns newest first; the pipeline wants ascending time.
        let mut candles = Vec::with_capacity(result.list.len());
        for entry in result.list.iter().rev() {
            if entry.len() < 6 {
                return Err(ExchangeError::Parse(format!(
                    "kline entry with {} fields",
                    entry.len()
                )));
            }
            let start_ms: i64 = entry[0]
                .parse()
                .map_err(|_| ExchangeError::Parse(format!("bad kline start: {:?}", entry[0])))?;
            let timestamp = Utc
                .timestamp_millis_opt(start_ms)
                .single()
                .ok_or_else(|| ExchangeError::Parse(format!("bad kline timestamp: {}", start_ms)))?;
            candles.push(Candle {
                timestamp,
                open: Self::parse_f64(&entry[1], "open")?,
                high: Self::parse_f64(&entry[2], "high")?,
                low: Self::parse_f64(&entry[3], "low")?,
                close: Self::parse_f64(&entry[4], "close")?,
                volume: Self::parse_f64(&entry[5], "volume")?,
            });
        }
        Ok(candles)
    }

    async fn get_ticker(&self, symbol: &str) -> Result<f64, ExchangeError> {
        let query = format!("category={}&symbol={}", CATEGORY, symbol);
        let result: TickerResult = self.signed_get("/v5/market/tickers", &query).await?;
        let entry = result
            .list
            .first()
            .ok_or_else(|| ExchangeError::Parse(format!("no ticker for {}", symbol)))?;
        Self::parse_f64(&entry.last_price, "lastPrice")
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        reduce_only: bool,
    ) -> Result<String, ExchangeError> {
        let body = serde_json::json!({
            "category": CATEGORY,
            "symbol": symbol,
            "side": side.to_string(),
            "orderType": "Market",
            "qty": Self::format_qty(quantity),
            "reduceOnly": reduce_only,
        });
        let result: OrderCreateResult = self.signed_post("/v5/order/create", body).await?;
        debug!("{}: market {} {} (id {})", symbol, side, quantity, result.order_id);
        Ok(result.order_id)
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        price: f64,
        reduce_only: bool,
    ) -> Result<String, ExchangeError> {
        let body = serde_json::json!({
            "category": CATEGORY,
            "symbol": symbol,
            "side": side.to_string(),
            "orderType": "Limit",
            "qty": Self::format_qty(quantity),
            "price": price.to_string(),
            "timeInForce": "GTC",
            "reduceOnly": reduce_only,
        });
        let result: OrderCreateResult = self.signed_post("/v5/order/create", body).await?;
        debug!("{}: limit {} {} @ {} (id {})", symbol, side, quantity, price, result.order_id);
        Ok(result.order_id)
    }

    async fn place_stop_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        trigger_price: f64,
        trigger_direction: TriggerDirection,
        reduce_only: bool,
    ) -> Result<String, ExchangeError> {
        let direction_code = match trigger_direction {
            TriggerDirection::Rise => 1,
            TriggerDirection::Fall => 2,
        };
        let body = serde_json::json!({
            "category": CATEGORY,
            "symbol": symbol,
            "side": side.to_string(),
            "orderType": "Market",
            "qty": Self::format_qty(quantity),
            "triggerPrice": trigger_price.to_string(),
            "triggerDirection": direction_code,
            "triggerBy": "LastPrice",
            "reduceOnly": reduce_only,
        });
        let result: OrderCreateResult = self.signed_post("/v5/order/create", body).await?;
        debug!(
            "{}: stop {} {} trigger {} (id {})",
            symbol, side, quantity, trigger_price, result.order_id
        );
        Ok(result.order_id)
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError> {
        let body = serde_json::json!({
            "category": CATEGORY,
            "symbol": symbol,
            "orderId": order_id,
        });
        let _: serde_json::Value = self.signed_post("/v5/order/cancel", body).await?;
        Ok(())
    }

    async fn get_order_status(
        &self,
        symbol: &str,
        order_id: &str,
    ) -> Result<OrderStatus, ExchangeError> {
        let query = format!(
            "category={}&symbol={}&orderId={}",
            CATEGORY, symbol, order_id
        );
        let open: OrderListResult = self.signed_get("/v5/order/realtime", &query).await?;
        if let Some(entry) = open.list.first() {
            return Ok(Self::map_status(&entry.order_status));
        }

        // Not resting any more; look it up in order history.
        let history: OrderListResult = self.signed_get("/v5/order/history", &query).await?;
        match history.list.first() {
            Some(entry) => Ok(Self::map_status(&entry.order_status)),
            None => Ok(OrderStatus::NotFound),
        }
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
        let query = format!("category={}&symbol={}", CATEGORY, symbol);
        let result: OrderListResult = self.signed_get("/v5/order/realtime", &query).await?;

        let mut orders = Vec::with_capacity(result.list.len());
        for entry in result.list {
            let side = match entry.side.as_str() {
                "Buy" => OrderSide::Buy,
                "Sell" => OrderSide::Sell,
                other => return Err(ExchangeError::Parse(format!("bad order side: {}", other))),
            };
            let price = if entry.price.is_empty() {
                None
            } else {
                Some(Self::parse_f64(&entry.price, "price")?)
            };
            let trigger_price = if entry.trigger_price.is_empty() {
                None
            } else {
                Some(Self::parse_f64(&entry.trigger_price, "triggerPrice")?)
            };
            orders.push(OpenOrder {
                order_id: entry.order_id,
                side,
                quantity: Self::parse_f64(&entry.qty, "qty")?,
                price,
                trigger_price,
                reduce_only: entry.reduce_only,
            });
        }
        Ok(orders)
    }

    async fn get_open_positions(&self) -> Result<Vec<ExchangePosition>, ExchangeError> {
        let query = format!("category={}&settleCoin=USDT", CATEGORY);
        let result: PositionListResult = self.signed_get("/v5/position/list", &query).await?;

        let mut positions = Vec::new();
        for entry in result.list {
            let quantity = Self::parse_f64(&entry.size, "size")?;
            if quantity == 0.0 {
                continue;
            }
            let direction = match entry.side.as_str() {
                "Buy" => Direction::Long,
                "Sell" => Direction::Short,
                other => {
                    return Err(ExchangeError::Parse(format!("bad position side: {}", other)))
                }
            };
            let entry_price = if entry.avg_price.is_empty() {
                f64::NAN
            } else {
                Self::parse_f64(&entry.avg_price, "avgPrice")?
            };
            positions.push(ExchangePosition {
                symbol: entry.symbol,
                direction,
                quantity,
                entry_price,
            });
        }
        Ok(positions)
    }

    async fn set_leverage(&self, symbol: &str, leverage: f64) -> Result<(), ExchangeError> {
        let body = serde_json::json!({
            "category": CATEGORY,
            "symbol": symbol,
            "buyLeverage": leverage.to_string(),
            "sellLeverage": leverage.to_string(),
        });
        match self.signed_post::<serde_json::Value>("/v5/position/set-leverage", body).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_idempotent() => {
                debug!("{}: leverage already {}", symbol, leverage);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_position_zero_ret_code() {
        let err = BybitGateway::map_error(110017, "reduce-only rejected".to_string());
        assert!(matches!(err, ExchangeError::PositionAlreadyClosed(_)));
        assert!(err.is_idempotent());
    }

    #[test]
    fn maps_leverage_not_modified_message() {
        let err = BybitGateway::map_error(34015, "leverage not modified".to_string());
        assert!(err.is_idempotent());
    }

    #[test]
    fn maps_order_statuses() {
        assert_eq!(BybitGateway::map_status("New"), OrderStatus::Open);
        assert_eq!(BybitGateway::map_status("Untriggered"), OrderStatus::Open);
        assert_eq!(BybitGateway::map_status("Filled"), OrderStatus::Filled);
        assert_eq!(BybitGateway::map_status("Triggered"), OrderStatus::Triggered);
        assert_eq!(BybitGateway::map_status("Cancelled"), OrderStatus::Cancelled);
    }
}
