//! Market identity and dataset kinds

use crate::error::IngestError;
use std::fmt;
use std::str::FromStr;

/// Default quote assets a symbol must be priced in to be ingested.
pub const DEFAULT_QUOTE_ASSETS: &[&str] = &["USD", "USDT", "USDC"];

/// Canonical `EXCHANGE:SYMBOL` identifier used as the storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Market(String);

impl Market {
    /// Build the market for an exchange directory and a raw symbol directory.
    ///
    /// Fails with [`IngestError::Ineligible`] when the symbol is not quoted in
    /// one of `quote_assets`.
    pub fn derive(exchange: &str, symbol: &str, quote_assets: &[String]) -> Result<Self, IngestError> {
        if !is_quoted_in(symbol, quote_assets) {
            return Err(IngestError::Ineligible(symbol.to_string()));
        }
        let id = format!("{}:{}", exchange.to_uppercase(), symbol.to_uppercase()).replace('-', "_");
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Eligibility predicate: the symbol ends with a quote asset and has a
/// non-empty base in front of it. Separators (`-`, `_`, `/`) are ignored.
pub fn is_quoted_in(symbol: &str, quote_assets: &[String]) -> bool {
    let compact: String = symbol
        .chars()
        .filter(|c| !matches!(c, '-' | '_' | '/'))
        .collect::<String>()
        .to_uppercase();
    quote_assets.iter().any(|quote| {
        let quote = quote.to_uppercase();
        compact.len() > quote.len() && compact.ends_with(&quote)
    })
}

/// Dataset kinds found under `<root>/<exchange>/<symbol>/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    Trades,
    IncrementalBookL2,
}

impl DataType {
    pub const ALL: [DataType; 2] = [DataType::Trades, DataType::IncrementalBookL2];

    /// Directory name, also accepted on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Trades => "trades",
            DataType::IncrementalBookL2 => "incremental_book_L2",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trades" => Ok(DataType::Trades),
            "incremental_book_L2" | "incremental_book_l2" => Ok(DataType::IncrementalBookL2),
            other => Err(format!("unknown datatype: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quotes() -> Vec<String> {
        DEFAULT_QUOTE_ASSETS.iter().map(|q| q.to_string()).collect()
    }

    #[test]
    fn test_market_is_upper_cased_and_dash_free() {
        let market = Market::derive("binance", "btc-usdt", &quotes()).unwrap();
        assert_eq!(market.as_str(), "BINANCE:BTC_USDT");

        let market = Market::derive("coinbase", "ETHUSD", &quotes()).unwrap();
        assert_eq!(market.to_string(), "COINBASE:ETHUSD");
    }

    #[test]
    fn test_non_usd_symbol_is_ineligible() {
        let err = Market::derive("binance", "ethbtc", &quotes()).unwrap_err();
        assert!(matches!(err, IngestError::Ineligible(s) if s == "ethbtc"));
    }

    #[test]
    fn test_bare_quote_is_not_a_market() {
        assert!(!is_quoted_in("usdt", &quotes()));
        assert!(is_quoted_in("solusdc", &quotes()));
        assert!(is_quoted_in("SOL/USD", &quotes()));
    }

    #[test]
    fn test_datatype_round_trips_directory_name() {
        for dt in DataType::ALL {
            assert_eq!(dt.as_str().parse::<DataType>().unwrap(), dt);
        }
        assert!("book_snapshot_25".parse::<DataType>().is_err());
    }
}
