//! Option contract naming.

use rust_decimal::Decimal;

use crate::types::OptionRight;

/// A single exchange-traded option, identified by its trading symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionContract {
    pub underlying: String,
    /// Expiry tag in symbol form, e.g. `02DEC25`.
    pub expiry: String,
    pub strike: Decimal,
    pub right: OptionRight,
}

impl OptionContract {
    pub fn new(underlying: &str, expiry: &str, strike: Decimal, right: OptionRight) -> Self {
        Self {
            underlying: underlying.to_uppercase(),
            expiry: expiry.to_uppercase(),
            strike,
            right,
        }
    }

    /// Trading symbol, e.g. `NIFTY02DEC2524500CE`.
    #[must_use]
    pub fn symbol(&self) -> String {
        format!(
            "{}{}{}{}",
            self.underlying,
            self.expiry,
            self.strike.normalize(),
            self.right
        )
    }
}

/// Converts a broker expiry like `02-DEC-25` (or `02-Dec-2025`) into the
/// symbol form `02DEC25`. Already-compact tags pass through upper-cased.
#[must_use]
pub fn expiry_tag(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let parts: Vec<&str> = raw.split('-').collect();
    match parts.as_slice() {
        [day, month, year] if !day.is_empty() && month.len() == 3 && year.len() >= 2 => {
            let yy = year.get(year.len() - 2..)?;
            Some(format!("{day:0>2}{}{yy}", month.to_uppercase()))
        }
        [compact] if compact.len() == 7 => Some(compact.to_uppercase()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn builds_exchange_symbol() {
        let contract = OptionContract::new("nifty", "02DEC25", dec!(24500.00), OptionRight::Call);
        assert_eq!(contract.symbol(), "NIFTY02DEC2524500CE");

        let put = OptionContract::new("SENSEX", "04DEC25", dec!(85100), OptionRight::Put);
        assert_eq!(put.symbol(), "SENSEX04DEC2585100PE");
    }

    #[test]
    fn expiry_formats() {
        assert_eq!(expiry_tag("02-DEC-25").as_deref(), Some("02DEC25"));
        assert_eq!(expiry_tag("2-Dec-2025").as_deref(), Some("02DEC25"));
        assert_eq!(expiry_tag("02dec25").as_deref(), Some("02DEC25"));
        assert_eq!(expiry_tag("2025-12-02x"), None);
        assert_eq!(expiry_tag(""), None);
    }
}
