//! Ticker symbol validation.

use crate::errors::{Error, Result};

/// Longest accepted symbol.
pub const MAX_SYMBOL_LEN: usize = 20;

/// Trim and upper-case `raw`, rejecting anything that is not a plausible
/// ticker (letters, digits, `.`, `-`, `^`, `=`, `:`).
pub fn normalize_symbol(raw: &str) -> Result<String> {
    let symbol = raw.trim().to_ascii_uppercase();
    if symbol.is_empty() {
        return Err(Error::Validation("Symbol must not be empty".to_string()));
    }
    if symbol.len() > MAX_SYMBOL_LEN {
        return Err(Error::Validation(format!(
            "Symbol '{}' is longer than {} characters",
            symbol, MAX_SYMBOL_LEN
        )));
    }
    let valid = symbol
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '=' | ':'));
    if !valid {
        return Err(Error::Validation(format!("Malformed symbol: '{}'", raw)));
    }
    Ok(symbol)
}

/// Normalize every symbol, then sort and deduplicate.
pub fn normalize_symbols(raw: &[String]) -> Result<Vec<String>> {
    let mut symbols = raw
        .iter()
        .map(|s| normalize_symbol(s))
        .collect::<Result<Vec<_>>>()?;
    symbols.sort();
    symbols.dedup();
    Ok(symbols)
}

/// Identity of a target universe: normalized symbols joined with `,`.
///
/// Two triggers with the same key refer to the same universe.
pub fn universe_key(symbols: &[String]) -> String {
    symbols.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(normalize_symbol(" aapl ").unwrap(), "AAPL");
        assert_eq!(normalize_symbol("brk.b").unwrap(), "BRK.B");
        assert_eq!(normalize_symbol("^GSPC").unwrap(), "^GSPC");
        assert!(normalize_symbol("").is_err());
        assert!(normalize_symbol("AA PL").is_err());
        assert!(normalize_symbol("DROP;TABLE").is_err());
        assert!(normalize_symbol(&"X".repeat(21)).is_err());
    }

    #[test]
    fn test_normalize_symbols_dedups_and_sorts() {
        let raw = vec!["msft".to_string(), "AAPL".to_string(), "MSFT ".to_string()];
        let symbols = normalize_symbols(&raw).unwrap();
        assert_eq!(symbols, vec!["AAPL", "MSFT"]);
        assert_eq!(universe_key(&symbols), "AAPL,MSFT");
    }

    #[test]
    fn test_one_bad_symbol_rejects_all() {
        let raw = vec!["AAPL".to_string(), "bad symbol".to_string()];
        assert!(matches!(normalize_symbols(&raw), Err(Error::Validation(_))));
    }
}
