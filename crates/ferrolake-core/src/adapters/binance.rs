use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{info_span, warn, Instrument};

use super::{ensure_provider, extract_scopes, parse_count, parse_decimal, ProviderClient};
use crate::data_source::{Extraction, SourceAdapter, SourceError};
use crate::http_client::{HttpClient, HttpRequest};
use crate::provider_policy::ProviderPolicy;
use crate::throttling::ThrottleRegistry;
use crate::{ExtractionRequest, ProviderId, Record, StageError, UtcDateTime};

const ORDER_BOOK_DEPTH: u32 = 5;
const RECENT_TRADES: u32 = 5;

/// Connection settings for the public market data API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinanceSettings {
    pub base_url: String,
    pub policy: ProviderPolicy,
}

impl Default for BinanceSettings {
    fn default() -> Self {
        Self {
            base_url: String::from("https://api.binance.com"),
            policy: ProviderPolicy::binance_default(),
        }
    }
}

/// Market snapshot adapter: 24h ticker, best bid/ask and recent trades per symbol.
#[derive(Clone)]
pub struct BinanceAdapter {
    client: ProviderClient,
    base_url: String,
}

impl BinanceAdapter {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        throttles: &ThrottleRegistry,
        settings: BinanceSettings,
    ) -> Self {
        let throttle = throttles.throttle_for(&settings.policy);
        Self {
            client: ProviderClient::new(http_client, throttle, settings.policy),
            base_url: settings.base_url.trim_end_matches('/').to_owned(),
        }
    }

    async fn symbol_snapshot(
        &self,
        symbol: String,
        extracted_at: UtcDateTime,
    ) -> Result<Vec<Record>, SourceError> {
        let ticker: TickerPayload = self
            .client
            .get_json(
                HttpRequest::get(format!("{}/api/v3/ticker/24hr", self.base_url))
                    .with_query("symbol", &symbol),
            )
            .await?;

        let book = match self
            .client
            .get_json::<DepthPayload>(
                HttpRequest::get(format!("{}/api/v3/depth", self.base_url))
                    .with_query("symbol", &symbol)
                    .with_query("limit", ORDER_BOOK_DEPTH),
            )
            .await
        {
            Ok(depth) => Some(BookTop::from_depth(&depth)),
            Err(error) => {
                warn!(symbol = %symbol, error = %error, "order book unavailable, leaving spread columns empty");
                None
            }
        };

        let trades = match self
            .client
            .get_json::<Vec<TradePayload>>(
                HttpRequest::get(format!("{}/api/v3/trades", self.base_url))
                    .with_query("symbol", &symbol)
                    .with_query("limit", RECENT_TRADES),
            )
            .await
        {
            Ok(trades) => Some(TradeSummary::from_trades(&trades)),
            Err(error) => {
                warn!(symbol = %symbol, error = %error, "recent trades unavailable, leaving trade columns empty");
                None
            }
        };

        Ok(vec![normalize_snapshot(
            &symbol,
            extracted_at,
            &ticker,
            book.as_ref(),
            trades.as_ref(),
        )])
    }
}

impl SourceAdapter for BinanceAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Binance
    }

    fn extract<'a>(
        &'a self,
        request: &'a ExtractionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Extraction, StageError>> + Send + 'a>> {
        let span = info_span!("extract", provider = "binance", scopes = request.sub_scopes().len());
        Box::pin(
            async move {
                ensure_provider(ProviderId::Binance, request)?;
                let extracted_at = UtcDateTime::now().truncate_to_seconds();

                extract_scopes(
                    ProviderId::Binance,
                    request.sub_scopes(),
                    extracted_at,
                    |symbol| self.symbol_snapshot(symbol, extracted_at),
                )
                .await
            }
            .instrument(span),
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerPayload {
    #[serde(default)]
    last_price: serde_json::Value,
    #[serde(default)]
    price_change: serde_json::Value,
    #[serde(default)]
    price_change_percent: serde_json::Value,
    #[serde(default)]
    high_price: serde_json::Value,
    #[serde(default)]
    low_price: serde_json::Value,
    #[serde(default)]
    open_price: serde_json::Value,
    #[serde(default)]
    volume: serde_json::Value,
    #[serde(default)]
    quote_volume: serde_json::Value,
    #[serde(default)]
    weighted_avg_price: serde_json::Value,
    #[serde(default)]
    count: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct DepthPayload {
    #[serde(default)]
    bids: Vec<(String, String)>,
    #[serde(default)]
    asks: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct TradePayload {
    price: String,
    qty: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct BookTop {
    best_bid: f64,
    best_ask: f64,
    bid_quantity: f64,
    ask_quantity: f64,
}

impl BookTop {
    fn from_depth(depth: &DepthPayload) -> Self {
        let level = |levels: &[(String, String)]| {
            levels
                .first()
                .map(|(price, qty)| (parse_level(price), parse_level(qty)))
                .unwrap_or((0.0, 0.0))
        };
        let (best_bid, bid_quantity) = level(&depth.bids);
        let (best_ask, ask_quantity) = level(&depth.asks);
        Self {
            best_bid,
            best_ask,
            bid_quantity,
            ask_quantity,
        }
    }

    /// Zero unless both sides of the book are present.
    fn spread(&self) -> f64 {
        if self.best_bid > 0.0 && self.best_ask > 0.0 {
            self.best_ask - self.best_bid
        } else {
            0.0
        }
    }

    fn spread_percent(&self) -> f64 {
        if self.best_bid > 0.0 {
            self.spread() / self.best_bid * 100.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TradeSummary {
    average_price: f64,
    volume: f64,
}

impl TradeSummary {
    fn from_trades(trades: &[TradePayload]) -> Self {
        if trades.is_empty() {
            return Self {
                average_price: 0.0,
                volume: 0.0,
            };
        }

        let total_price: f64 = trades.iter().map(|trade| parse_level(&trade.price)).sum();
        Self {
            average_price: total_price / trades.len() as f64,
            volume: trades.iter().map(|trade| parse_level(&trade.qty)).sum(),
        }
    }
}

fn parse_level(value: &str) -> f64 {
    value.trim().parse::<f64>().unwrap_or(0.0)
}

fn normalize_snapshot(
    symbol: &str,
    extracted_at: UtcDateTime,
    ticker: &TickerPayload,
    book: Option<&BookTop>,
    trades: Option<&TradeSummary>,
) -> Record {
    Record::new(symbol, symbol, extracted_at)
        .with("symbol", symbol)
        .with("unix_timestamp", extracted_at.unix_timestamp_millis())
        .with("last_price", parse_decimal(&ticker.last_price))
        .with("price_change_24h", parse_decimal(&ticker.price_change))
        .with("price_change_percent_24h", parse_decimal(&ticker.price_change_percent))
        .with("high_24h", parse_decimal(&ticker.high_price))
        .with("low_24h", parse_decimal(&ticker.low_price))
        .with("open_price", parse_decimal(&ticker.open_price))
        .with("volume_24h", parse_decimal(&ticker.volume))
        .with("quote_volume_24h", parse_decimal(&ticker.quote_volume))
        .with("weighted_avg_price", parse_decimal(&ticker.weighted_avg_price))
        .with("best_bid", book.map(|book| book.best_bid))
        .with("best_ask", book.map(|book| book.best_ask))
        .with("spread", book.map(BookTop::spread))
        .with("spread_percent", book.map(BookTop::spread_percent))
        .with("bid_quantity", book.map(|book| book.bid_quantity))
        .with("ask_quantity", book.map(|book| book.ask_quantity))
        .with("avg_recent_trade_price", trades.map(|trades| trades.average_price))
        .with("recent_trades_volume", trades.map(|trades| trades.volume))
        .with("trade_count_24h", parse_count(&ticker.count))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth(bids: &[(&str, &str)], asks: &[(&str, &str)]) -> DepthPayload {
        let owned = |levels: &[(&str, &str)]| {
            levels
                .iter()
                .map(|(price, qty)| ((*price).to_owned(), (*qty).to_owned()))
                .collect()
        };
        DepthPayload {
            bids: owned(bids),
            asks: owned(asks),
        }
    }

    #[test]
    fn spread_is_derived_from_best_levels() {
        let top = BookTop::from_depth(&depth(
            &[("100.00", "2.0"), ("99.00", "1.0")],
            &[("101.00", "3.0")],
        ));

        assert_eq!(top.spread(), 1.0);
        assert_eq!(top.spread_percent(), 1.0);
        assert_eq!(top.ask_quantity, 3.0);
    }

    #[test]
    fn one_sided_book_has_zero_spread() {
        let top = BookTop::from_depth(&depth(&[], &[("101.00", "3.0")]));

        assert_eq!(top.best_bid, 0.0);
        assert_eq!(top.spread(), 0.0);
        assert_eq!(top.spread_percent(), 0.0);
    }

    #[test]
    fn trade_summary_averages_price_and_sums_quantity() {
        let trades = vec![
            TradePayload {
                price: String::from("10.0"),
                qty: String::from("1.5"),
            },
            TradePayload {
                price: String::from("20.0"),
                qty: String::from("0.5"),
            },
        ];

        let summary = TradeSummary::from_trades(&trades);
        assert_eq!(summary.average_price, 15.0);
        assert_eq!(summary.volume, 2.0);
    }
}
