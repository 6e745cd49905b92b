// =============================================================================
// OKX exchange integration
// =============================================================================
//
// `api` holds the abstract collaborator contract the rest of the engine
// depends on; `client` is the concrete OKX v5 REST implementation.

pub mod api;
pub mod client;

pub use api::{Candle, ExchangeApi, ExchangePosition, OrderStatus};
pub use client::OkxClient;
