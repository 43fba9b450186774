//! Departure board server for Stockholm public transit: a thin HTTP layer
//! over the SL Transport API, with TTL-cached site and departure lookups.

pub mod cache;
pub mod server;
pub mod sl_api;
