// Durable storage collaborators: order history and a bar cache
pub mod bar_cache;
pub mod postgres;

use async_trait::async_trait;

use crate::models::OrderResult;

pub use bar_cache::RedisBarCache;
pub use postgres::PostgresOrderStore;

/// Sink for accepted orders
///
/// Called by the gateway after the exchange accepts an order. A failure
/// here is logged by the caller and never changes the order's outcome.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn save_order(&self, order: &OrderResult) -> crate::Result<()>;
}
