//! pay-currency
//!
//! Pure pairwise currency conversion and token-unit arithmetic.
//!
//! GBP is the base currency. Every other supported currency carries a static
//! multiplier relative to GBP (1 GBP = rate × currency units). Tokens are an
//! integer unit derived from the base-currency amount.
//!
//! This crate performs no I/O. The rate table is an explicit value injected
//! by the caller — there is no module-level global.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Currency
// ---------------------------------------------------------------------------

/// Supported currency codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Gbp,
    Eur,
    Usd,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Gbp => "GBP",
            Currency::Eur => "EUR",
            Currency::Usd => "USD",
        }
    }

    /// Parse a currency code. Unknown codes fail — there is no silent
    /// fallback to the base currency anywhere in this crate.
    pub fn parse(s: &str) -> Result<Self, UnsupportedCurrency> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GBP" => Ok(Currency::Gbp),
            "EUR" => Ok(Currency::Eur),
            "USD" => Ok(Currency::Usd),
            other => Err(UnsupportedCurrency {
                code: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// UnsupportedCurrency
// ---------------------------------------------------------------------------

/// A currency code that is not present in the rate table (or not parseable).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedCurrency {
    pub code: String,
}

impl std::fmt::Display for UnsupportedCurrency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unsupported currency: {}", self.code)
    }
}

impl std::error::Error for UnsupportedCurrency {}

// ---------------------------------------------------------------------------
// CurrencyTable
// ---------------------------------------------------------------------------

/// Injected conversion table: base-relative rates plus the token ratio.
///
/// `rates[c]` is how many units of `c` one unit of the base currency buys.
/// The base currency itself must be present with rate 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyTable {
    pub base: Currency,
    pub rates: BTreeMap<Currency, f64>,
    /// Tokens credited per one unit of the base currency.
    pub tokens_per_base: i64,
}

impl Default for CurrencyTable {
    /// The production table: GBP base, 1 GBP = 1.15 EUR = 1.33 USD,
    /// 100 tokens per GBP.
    fn default() -> Self {
        let mut rates = BTreeMap::new();
        rates.insert(Currency::Gbp, 1.0);
        rates.insert(Currency::Eur, 1.15);
        rates.insert(Currency::Usd, 1.33);
        Self {
            base: Currency::Gbp,
            rates,
            tokens_per_base: 100,
        }
    }
}

impl CurrencyTable {
    fn rate(&self, currency: Currency) -> Result<f64, UnsupportedCurrency> {
        self.rates
            .get(&currency)
            .copied()
            .ok_or_else(|| UnsupportedCurrency {
                code: currency.as_str().to_string(),
            })
    }

    /// Convert an amount in `currency` into the base currency.
    pub fn to_base(&self, amount: f64, currency: Currency) -> Result<f64, UnsupportedCurrency> {
        if currency == self.base {
            return Ok(amount);
        }
        Ok(amount / self.rate(currency)?)
    }

    /// Convert a base-currency amount into `currency`.
    pub fn from_base(&self, amount: f64, currency: Currency) -> Result<f64, UnsupportedCurrency> {
        if currency == self.base {
            return Ok(amount);
        }
        Ok(amount * self.rate(currency)?)
    }

    /// Tokens bought by `amount` of `currency`: round(to_base × tokens_per_base).
    pub fn tokens_for(&self, amount: f64, currency: Currency) -> Result<i64, UnsupportedCurrency> {
        let in_base = self.to_base(amount, currency)?;
        Ok((in_base * self.tokens_per_base as f64).round() as i64)
    }

    /// Amount of `currency` needed to buy `tokens` tokens.
    pub fn amount_for_tokens(
        &self,
        tokens: i64,
        currency: Currency,
    ) -> Result<f64, UnsupportedCurrency> {
        let in_base = tokens as f64 / self.tokens_per_base as f64;
        self.from_base(in_base, currency)
    }

    /// Minimum chargeable amount, uniform across currencies.
    pub fn min_amount(&self, _currency: Currency) -> f64 {
        0.01
    }
}

/// Convert a major-unit amount to minor units (pence/cents), rounded.
pub fn to_minor_units(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-9;

    #[test]
    fn currency_parse() {
        assert_eq!(Currency::parse("GBP").unwrap(), Currency::Gbp);
        assert_eq!(Currency::parse("eur").unwrap(), Currency::Eur);
        assert_eq!(Currency::parse(" usd ").unwrap(), Currency::Usd);
        let err = Currency::parse("AUD").unwrap_err();
        assert_eq!(err.code, "AUD");
    }

    #[test]
    fn base_currency_is_identity() {
        let t = CurrencyTable::default();
        assert_eq!(t.to_base(12.5, Currency::Gbp).unwrap(), 12.5);
        assert_eq!(t.from_base(12.5, Currency::Gbp).unwrap(), 12.5);
    }

    #[test]
    fn round_trip_within_tolerance() {
        let t = CurrencyTable::default();
        for c in [Currency::Gbp, Currency::Eur, Currency::Usd] {
            for amount in [0.01, 1.0, 9.99, 123.45, 10_000.0] {
                let there = t.from_base(amount, c).unwrap();
                let back = t.to_base(there, c).unwrap();
                assert!(
                    (back - amount).abs() < TOL,
                    "round trip {amount} {c} drifted to {back}"
                );
            }
        }
    }

    #[test]
    fn ten_gbp_is_one_thousand_tokens() {
        let t = CurrencyTable::default();
        assert_eq!(t.tokens_for(10.0, Currency::Gbp).unwrap(), 1000);
    }

    #[test]
    fn eur_converts_through_base() {
        let t = CurrencyTable::default();
        // 11.50 EUR == 10 GBP == 1000 tokens.
        assert_eq!(t.tokens_for(11.50, Currency::Eur).unwrap(), 1000);
        // 13.30 USD == 10 GBP.
        assert_eq!(t.tokens_for(13.30, Currency::Usd).unwrap(), 1000);
    }

    #[test]
    fn tokens_for_is_monotonic_in_amount() {
        let t = CurrencyTable::default();
        for c in [Currency::Gbp, Currency::Eur, Currency::Usd] {
            let mut prev = t.tokens_for(0.0, c).unwrap();
            let mut amount = 0.0;
            while amount < 50.0 {
                amount += 0.37;
                let tok = t.tokens_for(amount, c).unwrap();
                assert!(tok >= prev, "tokens decreased at {amount} {c}");
                prev = tok;
            }
        }
    }

    #[test]
    fn amount_for_tokens_inverts_tokens_for() {
        let t = CurrencyTable::default();
        let amount = t.amount_for_tokens(5000, Currency::Eur).unwrap();
        assert!((amount - 57.5).abs() < TOL);
        assert_eq!(t.tokens_for(amount, Currency::Eur).unwrap(), 5000);
    }

    #[test]
    fn missing_rate_is_unsupported() {
        let mut t = CurrencyTable::default();
        t.rates.remove(&Currency::Usd);
        assert!(t.to_base(1.0, Currency::Usd).is_err());
        assert!(t.tokens_for(1.0, Currency::Usd).is_err());
        // Base stays usable even with a sparse table.
        assert_eq!(t.tokens_for(1.0, Currency::Gbp).unwrap(), 100);
    }

    #[test]
    fn minor_units_rounding() {
        assert_eq!(to_minor_units(10.0), 1000);
        assert_eq!(to_minor_units(9.995), 1000);
        assert_eq!(to_minor_units(0.01), 1);
    }
}
