pub mod blockchain;
pub mod cache;
pub mod dashboard;
pub mod fallback;
pub mod market;
pub mod persistent;
pub mod pipeline;
pub mod portfolio;

pub use blockchain::BlockchainGateway;
pub use cache::ResponseCache;
pub use dashboard::DashboardService;
pub use fallback::FallbackChain;
pub use market::MarketDataGateway;
pub use persistent::{KeyValueStore, MemoryStore, PersistentCache, RedisStore};
pub use pipeline::{PipelineConfig, RequestDescriptor, RequestPipeline, ReqwestTransport, Transport};
pub use portfolio::{AddressInput, PortfolioService};
