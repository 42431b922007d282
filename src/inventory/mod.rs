//! Stock aggregation over the raw catalog payload

use std::collections::BTreeMap;

use serde_json::Value;

use crate::models::{ProductInfo, Quantity, RawProduct, RawStock};

/// Sums the `qty` of every warehouse entry.
///
/// Missing input counts as zero stock. Each `qty` is coerced with
/// [`coerce_qty`]. The sum is taken in `f64`, so it cannot overflow and
/// fractional quantities add up exactly like the payload's own numbers.
pub fn calc_quantity(stocks: Option<&[RawStock]>) -> f64 {
    stocks
        .unwrap_or_default()
        .iter()
        .map(|stock| stock.qty.as_ref().map_or(0.0, coerce_qty))
        .sum()
}

/// Builds the per-size stock summary for one product.
///
/// Sizes sharing an `origName` are not merged, the later entry wins.
pub fn build_product_info(product: &RawProduct) -> ProductInfo {
    let mut stock = BTreeMap::new();

    for size in product.sizes.as_deref().unwrap_or_default() {
        stock.insert(
            size.orig_name.clone(),
            Quantity::from(calc_quantity(size.stocks.as_deref())),
        );
    }

    ProductInfo {
        art: product.id,
        stock,
    }
}

/// Numeric value of a raw `qty`, following JavaScript's `Number()`:
/// numbers as-is, `true`/`false` as 1/0, `null` as 0, strings parsed as
/// numeric literals. Values `Number()` cannot convert (objects, arrays,
/// non-numeric strings) contribute 0.
fn coerce_qty(qty: &Value) -> f64 {
    match qty {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::Bool(flag) => f64::from(u8::from(*flag)),
        Value::String(s) => parse_numeric_literal(s).unwrap_or(0.0),
        Value::Null | Value::Array(_) | Value::Object(_) => 0.0,
    }
}

/// Parses a string the way `Number()` does: surrounding whitespace is
/// ignored, an empty string is 0, `0x`/`0o`/`0b` prefixes select the radix
/// and `Infinity` is accepted. `NaN` and Rust-only spellings like `inf`
/// are rejected.
fn parse_numeric_literal(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return Some(0.0);
    }

    let head = s.get(..2).map(str::to_ascii_lowercase);
    for (prefix, radix) in [("0x", 16), ("0o", 8), ("0b", 2)] {
        if head.as_deref() == Some(prefix) {
            let digits = &s[2..];
            if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
                return None;
            }
            return u128::from_str_radix(digits, radix).ok().map(|n| n as f64);
        }
    }

    match s {
        "Infinity" | "+Infinity" => return Some(f64::INFINITY),
        "-Infinity" => return Some(f64::NEG_INFINITY),
        _ => {}
    }

    let is_decimal = s
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'));
    if is_decimal { s.parse().ok() } else { None }
}
