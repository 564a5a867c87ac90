pub mod cache;
pub mod dashboard;
pub mod health;
pub mod market;
pub mod portfolio;
pub mod stats;
pub mod wallet;

pub use cache::*;
pub use dashboard::*;
pub use health::*;
pub use market::*;
pub use portfolio::*;
pub use stats::*;
pub use wallet::*;

use crate::services::{
    BlockchainGateway, DashboardService, MarketDataGateway, PersistentCache, PortfolioService,
};
use std::sync::Arc;

/// Shared by every route.
#[derive(Clone)]
pub struct AppState {
    pub market: Arc<MarketDataGateway>,
    pub blockchain: Arc<BlockchainGateway>,
    pub portfolio: Arc<PortfolioService>,
    pub dashboard: Arc<DashboardService>,
    pub persistent: Arc<PersistentCache>,
    pub top_markets_limit: u32,
}
