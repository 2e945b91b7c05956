//! Query cache for ERP data.
//!
//! This module provides an ERP-agnostic caching mechanism that:
//! - Identifies each logical query by an ordered key (`["leaves", "requests", status, limit]`)
//! - Serves values younger than a per-query staleness window without a round trip
//! - Drops whole families of queries by key prefix after mutations
//! - Refetches selected queries on a timer (e.g. worked hours ticking up)
//! - Discards late results of fetches that were superseded or invalidated

mod key;
mod layer;
mod traits;

pub(crate) use key::query_key;
pub use key::QueryKey;
pub use layer::{IntervalRefetch, QueryCache};
pub use traits::{CacheResult, QueryStatus};
