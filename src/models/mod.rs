//! Data models for the stock detail payload and the normalized result

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tracing::warn;

/// Top-level body of the `/cards/v1/detail` response
#[derive(Debug, Default, Deserialize)]
pub struct DetailResponse {
    #[serde(default)]
    pub data: Option<DetailData>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DetailData {
    #[serde(default)]
    pub products: Option<Vec<RawProduct>>,
}

/// One product variant as returned by the catalog API
#[derive(Debug, Clone, Deserialize)]
pub struct RawProduct {
    pub id: u64,
    #[serde(default, deserialize_with = "lenient_seq")]
    pub sizes: Option<Vec<RawSize>>,
}

/// One size variant and its per-warehouse stock entries
#[derive(Debug, Clone, Deserialize)]
pub struct RawSize {
    #[serde(rename = "origName", default, deserialize_with = "key_string")]
    pub orig_name: String,
    #[serde(default, deserialize_with = "lenient_seq")]
    pub stocks: Option<Vec<RawStock>>,
}

/// One warehouse entry. `qty` stays untyped so it can be coerced.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStock {
    #[serde(default)]
    pub qty: Option<Value>,
}

/// Total stock of one size.
///
/// Whole totals serialize as JSON integers, fractional ones as floats.
/// JSON has no infinity, so non-finite totals come out as `null`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantity(pub f64);

/// Largest magnitude below which every integer is exact in an `f64`
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let total = self.0;
        if total.fract() == 0.0 && total.abs() < MAX_EXACT_INTEGER {
            serializer.serialize_i64(total as i64)
        } else {
            serializer.serialize_f64(total)
        }
    }
}

impl From<f64> for Quantity {
    fn from(total: f64) -> Self {
        Self(total)
    }
}

/// Normalized stock summary for one article
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductInfo {
    pub art: u64,
    pub stock: BTreeMap<String, Quantity>,
}

impl ProductInfo {
    /// Envelope with no stock data, used when nothing was scraped
    pub fn empty(art: u64) -> Self {
        Self {
            art,
            stock: BTreeMap::new(),
        }
    }
}

/// Result of one scrape run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ScrapeOutcome {
    /// The detail response was intercepted and carried products
    Ok { products: Vec<ProductInfo> },
    /// The browser session never got far enough to see the response
    Empty(ProductInfo),
    /// The detail response was intercepted but had no `data.products`
    Missing,
}

/// Keeps the well-formed entries of a JSON array.
///
/// A value that is not an array is treated as absent. Entries that do
/// not fit `T` are skipped one by one, the rest of the array survives.
fn lenient_seq<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(None);
    };

    let kept = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!("Skipping malformed entry in stock detail response: {}", e);
                None
            }
        })
        .collect();

    Ok(Some(kept))
}

/// Size names are used as map keys, so any scalar is accepted in its
/// string form (`0` becomes `"0"`, `null` becomes `"null"`).
fn key_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(name) => name,
        Value::Null => "null".to_string(),
        other => other.to_string(),
    })
}
