use crate::domain::errors::MarketDataError;

/// Quote currencies recognized when splitting an exchange-native pair, longest
/// first so `USDT` wins over `USD`.
const QUOTE_CURRENCIES: &[&str] = &[
    "FDUSD", // 5 chars
    "USDT", "USDC", "BUSD", "TUSD", // Stablecoins (4 chars)
    "USD", "EUR", "TRY", "BTC", "ETH", "BNB", // 3 chars
];

/// Splits an exchange-native pair (`BTCUSDT`) into `BASE/QUOTE` form.
///
/// Already-normalized input is returned unchanged.
pub fn normalize_crypto_symbol(symbol: &str) -> Result<String, String> {
    if symbol.contains('/') {
        return Ok(symbol.to_string());
    }

    if symbol.is_empty() {
        return Err("Cannot normalize empty symbol".to_string());
    }

    for quote in QUOTE_CURRENCIES {
        if symbol.ends_with(quote) && symbol.len() > quote.len() {
            let base = &symbol[..symbol.len() - quote.len()];
            if base.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()) {
                return Ok(format!("{}/{}", base, quote));
            }
        }
    }

    Err(format!(
        "Cannot normalize crypto symbol: '{}' - no recognized quote currency",
        symbol
    ))
}

/// Exchange-native form used on the REST wire: `BTC/USDT` -> `BTCUSDT`.
pub fn denormalize_crypto_symbol(symbol: &str) -> String {
    symbol.replace('/', "").to_uppercase()
}

/// Stream-name form used on the websocket wire: `BTC/USDT` -> `btcusdt`.
pub fn stream_symbol(symbol: &str) -> String {
    symbol.replace('/', "").to_lowercase()
}

/// Canonical key form for any downstream-supplied symbol.
///
/// Accepts `btc/usdt`, `BTCUSDT` or `BTC/USDT` and yields `BTC/USDT`. Pairs
/// with an unrecognized quote currency keep their upper-cased spelling.
pub fn canonical_symbol(raw: &str) -> Result<String, MarketDataError> {
    let upper = raw.trim().to_uppercase();
    if upper.is_empty() {
        return Err(MarketDataError::invalid("symbol must not be empty"));
    }
    if !upper.chars().all(|c| c.is_ascii_alphanumeric() || c == '/') || upper.matches('/').count() > 1 {
        return Err(MarketDataError::invalid(format!("malformed symbol '{}'", raw)));
    }
    if upper.starts_with('/') || upper.ends_with('/') {
        return Err(MarketDataError::invalid(format!("malformed symbol '{}'", raw)));
    }

    Ok(normalize_crypto_symbol(&upper).unwrap_or(upper))
}
