//! Cart snapshot and the totals derived from it.
//!
//! Totals are recomputed from whatever items were read (live or cached) and
//! are never stored on their own.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
  pub product_id: String,
  pub quantity: u32,
  #[serde(default)]
  pub unit_price: f64,
  /// Fields this crate does not interpret
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// Cart payload as returned by the remote service.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CartSnapshot {
  #[serde(default)]
  pub items: Vec<CartLine>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartTotals {
  pub item_count: u64,
  pub subtotal: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartView {
  pub items: Vec<CartLine>,
  pub totals: CartTotals,
}

impl From<CartSnapshot> for CartView {
  fn from(snapshot: CartSnapshot) -> Self {
    let totals = cart_totals(&snapshot.items);
    Self {
      items: snapshot.items,
      totals,
    }
  }
}

/// Item count and subtotal (rounded to cents) for a set of cart lines.
pub fn cart_totals(items: &[CartLine]) -> CartTotals {
  let item_count = items.iter().map(|line| u64::from(line.quantity)).sum();
  let subtotal: f64 = items
    .iter()
    .map(|line| line.unit_price * f64::from(line.quantity))
    .sum();

  CartTotals {
    item_count,
    subtotal: (subtotal * 100.0).round() / 100.0,
  }
}
