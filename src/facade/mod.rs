//! Read-through facade: the functions page code calls.
//!
//! Every read tries the network first. A live result is cached with the
//! resource's TTL; when the network is unreachable the cached copy is served
//! and marked `from_cache`. Any other failure propagates untouched.

mod cart;
mod read_through;
mod storefront;

pub use cart::{cart_totals, CartLine, CartSnapshot, CartTotals, CartView};
pub use read_through::{cache_key, Fetched, Params, ReadThrough, Resource};
pub use storefront::{MutationOutcome, StorefrontApi};
