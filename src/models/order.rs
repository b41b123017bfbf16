//! Normalized order records.
//!
//! Spot and futures history endpoints return different field sets, so an
//! [`Order`] keeps a common core plus a [`MarketDetail`] chosen by the
//! market it came from. Anything neither part recognises is kept verbatim
//! in [`Order::extra`] so no upstream field is lost.
//!
//! Prices, sizes and fees stay as strings. Timestamps are epoch
//! milliseconds and are accepted as either JSON numbers or numeric strings.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::client::{FUTURES_HISTORY_PATH, SPOT_HISTORY_PATH};

/// Raw JSON object as returned by the exchange.
pub type RawOrder = Map<String, Value>;

/// Spot order family selected by the `tpslType` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TpslType {
    Normal,
    Tpsl,
}

impl TpslType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Tpsl => "tpsl",
        }
    }
}

/// Sub-market an order was fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MarketKind {
    Spot(TpslType),
    /// A futures contract variant such as `UMCBL`.
    Futures { contract: String },
}

impl MarketKind {
    /// Value written to the `_market` tag, e.g. `spot_tpsl` or `futures_UMCBL`.
    pub fn tag(&self) -> String {
        match self {
            Self::Spot(kind) => format!("spot_{}", kind.as_str()),
            Self::Futures { contract } => format!("futures_{contract}"),
        }
    }

    /// Endpoint path written to the `_endpoint` tag.
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Spot(_) => SPOT_HISTORY_PATH,
            Self::Futures { .. } => FUTURES_HISTORY_PATH,
        }
    }
}

/// Fields only spot history returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpotDetail {
    pub order_type: Option<String>,
    pub price_avg: Option<String>,
    pub base_volume: Option<String>,
    pub quote_volume: Option<String>,
    pub enter_point_source: Option<String>,
    pub tpsl_type: Option<String>,
}

/// Fields only futures history returns, plus the contract tags added on fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FuturesDetail {
    /// `_contractType`: the contract suffix, e.g. `UMCBL`.
    pub contract_type: Option<String>,
    /// Always `"Future"` for orders tagged by the fetch layer.
    pub category: Option<String>,
    pub state: Option<String>,
    pub order_type: Option<String>,
    pub price_avg: Option<String>,
    pub filled_qty: Option<String>,
    pub filled_amount: Option<String>,
    pub leverage: Option<String>,
    pub margin_coin: Option<String>,
    pub pos_side: Option<String>,
    pub trade_side: Option<String>,
    pub total_profits: Option<String>,
}

/// Market-specific extension of an [`Order`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MarketDetail {
    Spot(SpotDetail),
    Futures(FuturesDetail),
    /// No market tag was present; every non-core field lives in `extra`.
    #[default]
    Unknown,
}

/// A field held a JSON value of the wrong shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("order is not a JSON object (got {0})")]
    NotAnObject(&'static str),

    #[error("order field '{field}' has an invalid value: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// One historical order, tagged with where it came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawOrder", into = "RawOrder")]
pub struct Order {
    pub order_id: Option<String>,
    pub client_oid: Option<String>,
    pub symbol: Option<String>,
    pub side: Option<String>,
    pub price: Option<String>,
    pub size: Option<String>,
    pub fee: Option<String>,
    pub status: Option<String>,
    /// `cTime`, epoch milliseconds.
    pub c_time: Option<i64>,
    /// `uTime`, epoch milliseconds.
    pub u_time: Option<i64>,
    /// `_symbol`: the requested symbol, not the exchange's instrument id.
    pub source_symbol: Option<String>,
    /// `_market`: see [`MarketKind::tag`].
    pub market: Option<String>,
    /// `_endpoint`
    pub endpoint: Option<String>,
    pub detail: MarketDetail,
    pub extra: Map<String, Value>,
}

impl Order {
    /// Parses an exchange record and stamps it with provenance tags.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError`] if a core field holds an object or array.
    pub fn from_api(raw: RawOrder, kind: &MarketKind, symbol: &str) -> Result<Self, OrderError> {
        let mut map = raw;
        let mut order = parse_core(&mut map)?;
        order.detail = match kind {
            MarketKind::Spot(_) => MarketDetail::Spot(parse_spot(&mut map)?),
            MarketKind::Futures { contract } => {
                let mut detail = parse_futures(&mut map)?;
                detail.contract_type = Some(contract.clone());
                detail.category = Some("Future".to_string());
                MarketDetail::Futures(detail)
            }
        };
        order.source_symbol = Some(symbol.to_string());
        order.market = Some(kind.tag());
        order.endpoint = Some(kind.endpoint().to_string());
        order.extra = map;
        Ok(order)
    }

    /// Best available timestamp for chronological ordering.
    ///
    /// Checks `uTime`, `cTime`, `updateTime`, `createTime` in that order;
    /// the first positive one wins. Orders without any sort as `0`.
    pub fn sort_timestamp(&self) -> i64 {
        self.u_time
            .filter(|t| *t > 0)
            .or(self.c_time.filter(|t| *t > 0))
            .or_else(|| extra_ms(&self.extra, "updateTime"))
            .or_else(|| extra_ms(&self.extra, "createTime"))
            .unwrap_or(0)
    }

    /// Numeric order id, when the exchange id is an integer.
    pub fn numeric_id(&self) -> Option<u64> {
        self.order_id.as_deref()?.trim().parse().ok()
    }
}

impl TryFrom<Value> for Order {
    type Error = OrderError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Self::try_from(map),
            other => Err(OrderError::NotAnObject(json_kind(&other))),
        }
    }
}

impl TryFrom<RawOrder> for Order {
    type Error = OrderError;

    /// Rebuilds an order from its serialized form; the `_market` tag (or a
    /// futures `category`) selects which detail fields are lifted out.
    fn try_from(raw: RawOrder) -> Result<Self, Self::Error> {
        let mut map = raw;
        let mut order = parse_core(&mut map)?;
        order.source_symbol = take_text(&mut map, "_symbol")?;
        order.market = take_text(&mut map, "_market")?;
        order.endpoint = take_text(&mut map, "_endpoint")?;

        let market = order.market.as_deref().unwrap_or_default();
        let is_future = map.get("category").and_then(Value::as_str) == Some("Future");
        order.detail = if market.starts_with("spot") {
            MarketDetail::Spot(parse_spot(&mut map)?)
        } else if market.starts_with("futures") || is_future {
            let mut detail = parse_futures(&mut map)?;
            detail.contract_type = take_text(&mut map, "_contractType")?;
            detail.category = take_text(&mut map, "category")?;
            MarketDetail::Futures(detail)
        } else {
            MarketDetail::Unknown
        };
        order.extra = map;
        Ok(order)
    }
}

impl From<Order> for RawOrder {
    fn from(order: Order) -> Self {
        let mut map = order.extra;
        put(&mut map, "orderId", order.order_id);
        put(&mut map, "clientOid", order.client_oid);
        put(&mut map, "symbol", order.symbol);
        put(&mut map, "side", order.side);
        put(&mut map, "price", order.price);
        put(&mut map, "size", order.size);
        put(&mut map, "fee", order.fee);
        put(&mut map, "status", order.status);
        put(&mut map, "cTime", order.c_time.map(|t| t.to_string()));
        put(&mut map, "uTime", order.u_time.map(|t| t.to_string()));
        put(&mut map, "_symbol", order.source_symbol);
        put(&mut map, "_market", order.market);
        put(&mut map, "_endpoint", order.endpoint);

        match order.detail {
            MarketDetail::Spot(d) => {
                put(&mut map, "orderType", d.order_type);
                put(&mut map, "priceAvg", d.price_avg);
                put(&mut map, "baseVolume", d.base_volume);
                put(&mut map, "quoteVolume", d.quote_volume);
                put(&mut map, "enterPointSource", d.enter_point_source);
                put(&mut map, "tpslType", d.tpsl_type);
            }
            MarketDetail::Futures(d) => {
                put(&mut map, "_contractType", d.contract_type);
                put(&mut map, "category", d.category);
                put(&mut map, "state", d.state);
                put(&mut map, "orderType", d.order_type);
                put(&mut map, "priceAvg", d.price_avg);
                put(&mut map, "filledQty", d.filled_qty);
                put(&mut map, "filledAmount", d.filled_amount);
                put(&mut map, "leverage", d.leverage);
                put(&mut map, "marginCoin", d.margin_coin);
                put(&mut map, "posSide", d.pos_side);
                put(&mut map, "tradeSide", d.trade_side);
                put(&mut map, "totalProfits", d.total_profits);
            }
            MarketDetail::Unknown => {}
        }
        map
    }
}

fn parse_core(map: &mut RawOrder) -> Result<Order, OrderError> {
    Ok(Order {
        order_id: take_text(map, "orderId")?,
        client_oid: take_text(map, "clientOid")?,
        symbol: take_text(map, "symbol")?,
        side: take_text(map, "side")?,
        price: take_text(map, "price")?,
        size: take_text(map, "size")?,
        fee: take_text(map, "fee")?,
        status: take_text(map, "status")?,
        c_time: take_ms(map, "cTime")?,
        u_time: take_ms(map, "uTime")?,
        ..Order::default()
    })
}

fn parse_spot(map: &mut RawOrder) -> Result<SpotDetail, OrderError> {
    Ok(SpotDetail {
        order_type: take_text(map, "orderType")?,
        price_avg: take_text(map, "priceAvg")?,
        base_volume: take_text(map, "baseVolume")?,
        quote_volume: take_text(map, "quoteVolume")?,
        enter_point_source: take_text(map, "enterPointSource")?,
        tpsl_type: take_text(map, "tpslType")?,
    })
}

fn parse_futures(map: &mut RawOrder) -> Result<FuturesDetail, OrderError> {
    Ok(FuturesDetail {
        contract_type: None,
        category: None,
        state: take_text(map, "state")?,
        order_type: take_text(map, "orderType")?,
        price_avg: take_text(map, "priceAvg")?,
        filled_qty: take_text(map, "filledQty")?,
        filled_amount: take_text(map, "filledAmount")?,
        leverage: take_text(map, "leverage")?,
        margin_coin: take_text(map, "marginCoin")?,
        pos_side: take_text(map, "posSide")?,
        trade_side: take_text(map, "tradeSide")?,
        total_profits: take_text(map, "totalProfits")?,
    })
}

/// Removes `key` as text. Numbers keep their exact JSON rendering.
fn take_text(map: &mut RawOrder, key: &'static str) -> Result<Option<String>, OrderError> {
    match map.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(OrderError::InvalidField {
            field: key,
            value: other.to_string(),
        }),
    }
}

/// Removes `key` as epoch milliseconds. Empty strings count as absent.
fn take_ms(map: &mut RawOrder, key: &'static str) -> Result<Option<i64>, OrderError> {
    let invalid = |value: &Value| OrderError::InvalidField {
        field: key,
        value: value.to_string(),
    };
    match map.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(v @ Value::String(_)) => v
            .as_str()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .map(Some)
            .ok_or_else(|| invalid(&v)),
        Some(v @ Value::Number(_)) => v.as_i64().map(Some).ok_or_else(|| invalid(&v)),
        Some(other) => Err(invalid(&other)),
    }
}

fn extra_ms(extra: &Map<String, Value>, key: &str) -> Option<i64> {
    let value = extra.get(key)?;
    let ms = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    (ms > 0).then_some(ms)
}

fn put(map: &mut RawOrder, key: &str, value: Option<String>) {
    if let Some(v) = value {
        map.insert(key.to_string(), Value::String(v));
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
