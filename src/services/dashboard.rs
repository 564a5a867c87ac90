use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::models::{DataSource, MarketSnapshot, Stats};
use crate::services::market::{GLOBAL_STATS_KEY, MARKET_DATA_KEY};
use crate::services::{BlockchainGateway, MarketDataGateway, PersistentCache};

const UPDATE_CHANNEL_CAPACITY: usize = 16;

/// Clears the in-flight flag when a refresh ends, however it ends.
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Market dashboard state: the latest snapshot, its viewers and the
/// periodic refresh that keeps it current.
pub struct DashboardService {
    market: Arc<MarketDataGateway>,
    blockchain: Arc<BlockchainGateway>,
    persistent: Arc<PersistentCache>,
    top_markets_limit: u32,
    refresh_interval: Duration,
    latest: RwLock<Option<MarketSnapshot>>,
    updates: broadcast::Sender<MarketSnapshot>,
    refreshing: AtomicBool,
    started_at: Instant,
}

impl DashboardService {
    pub fn new(
        market: Arc<MarketDataGateway>,
        blockchain: Arc<BlockchainGateway>,
        persistent: Arc<PersistentCache>,
        top_markets_limit: u32,
        refresh_interval: Duration,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            market,
            blockchain,
            persistent,
            top_markets_limit,
            refresh_interval,
            latest: RwLock::new(None),
            updates,
            refreshing: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }

    /// Fetches global stats and the market listing together and publishes
    /// the result. Returns `None` when another refresh is already running.
    pub async fn refresh(&self) -> Option<MarketSnapshot> {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Refresh already in flight, skipping");
            return None;
        }
        let _guard = RefreshGuard(&self.refreshing);

        let (global_stats, markets) = tokio::join!(
            self.market.fetch_global_stats(),
            self.market.fetch_top_markets(self.top_markets_limit),
        );

        if global_stats.source == DataSource::Live {
            self.persistent.set(GLOBAL_STATS_KEY, &global_stats.value).await;
        }
        if markets.source == DataSource::Live {
            self.persistent.set(MARKET_DATA_KEY, &markets.value).await;
        }

        let snapshot = MarketSnapshot {
            global_stats: global_stats.value,
            global_stats_source: global_stats.source,
            markets: markets.value,
            markets_source: markets.source,
            fetched_at: Utc::now(),
        };

        tracing::info!(
            "Dashboard refreshed: {} markets (stats: {}, listing: {})",
            snapshot.markets.len(),
            snapshot.global_stats_source.as_str(),
            snapshot.markets_source.as_str()
        );

        *self.latest.write().await = Some(snapshot.clone());
        // No receivers is fine; the snapshot is still kept as latest.
        let _ = self.updates.send(snapshot.clone());

        Some(snapshot)
    }

    /// Refreshes on a fixed interval while anyone is watching.
    pub fn spawn_auto_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let dashboard = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(dashboard.refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately; startup already refreshed.
            ticker.tick().await;

            loop {
                ticker.tick().await;

                if dashboard.is_refreshing() {
                    tracing::debug!("Auto-refresh skipped: refresh in flight");
                    continue;
                }
                if dashboard.viewer_count() == 0 {
                    tracing::debug!("Auto-refresh skipped: no viewers");
                    continue;
                }

                dashboard.refresh().await;
            }
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MarketSnapshot> {
        self.updates.subscribe()
    }

    pub fn viewer_count(&self) -> usize {
        self.updates.receiver_count()
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::SeqCst)
    }

    pub async fn latest(&self) -> Option<MarketSnapshot> {
        self.latest.read().await.clone()
    }

    /// Drops both gateways' in-memory caches and every persisted entry.
    pub async fn clear_caches(&self) -> usize {
        self.market.clear_cache();
        self.blockchain.clear_cache();
        let removed = self.persistent.clear("").await;
        tracing::info!("All caches cleared ({} persisted entries)", removed);
        removed
    }

    pub async fn stats(&self) -> Stats {
        let (market, blockchain) = tokio::join!(self.market.status(), self.blockchain.status());
        let last_refresh_at = self.latest.read().await.as_ref().map(|s| s.fetched_at);

        Stats {
            market,
            blockchain,
            last_refresh_at,
            viewers: self.viewer_count(),
            uptime_seconds: self.uptime_seconds(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GlobalStats;
    use crate::services::pipeline::testing::{ScriptedTransport, Step};
    use crate::services::{MemoryStore, PipelineConfig, RequestPipeline};
    use serde_json::json;

    fn global_payload() -> serde_json::Value {
        json!({"data": {
            "total_market_cap": {"usd": 3.1e12},
            "total_volume": {"usd": 9.0e10},
            "market_cap_percentage": {"btc": 55.0},
            "active_cryptocurrencies": 15000
        }})
    }

    fn listing_payload() -> serde_json::Value {
        json!([{"id": "bitcoin", "symbol": "btc", "name": "Bitcoin", "current_price": 70000.0}])
    }

    fn dashboard(market: Arc<ScriptedTransport>) -> (Arc<DashboardService>, Arc<PersistentCache>) {
        let persistent = Arc::new(PersistentCache::new(Arc::new(MemoryStore::new()), "uberWallet_cache_"));
        let market_pipeline = RequestPipeline::new(
            PipelineConfig {
                name: "market".to_string(),
                max_retries: 0,
                ..PipelineConfig::default()
            },
            market,
        );
        let chain_pipeline = RequestPipeline::new(
            PipelineConfig {
                name: "blockchain".to_string(),
                ..PipelineConfig::default()
            },
            ScriptedTransport::new(vec![]),
        );
        let market = MarketDataGateway::new("https://market.test", Arc::new(market_pipeline), persistent.clone());
        let blockchain = BlockchainGateway::new("https://rpc.test", "https://ens.test/", Arc::new(chain_pipeline));

        let dashboard = DashboardService::new(
            Arc::new(market),
            Arc::new(blockchain),
            persistent.clone(),
            20,
            Duration::from_secs(30),
        );
        (Arc::new(dashboard), persistent)
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_publishes_and_persists_live_data() {
        let transport = ScriptedTransport::new(vec![Step::Ok(global_payload()), Step::Ok(listing_payload())]);
        let (dashboard, persistent) = dashboard(transport);
        let mut updates = dashboard.subscribe();

        let snapshot = dashboard.refresh().await.unwrap();
        assert_eq!(snapshot.global_stats_source, DataSource::Live);
        assert_eq!(snapshot.markets_source, DataSource::Live);

        let pushed = updates.recv().await.unwrap();
        assert_eq!(pushed.markets, snapshot.markets);

        let persisted: Option<GlobalStats> = persistent.get(GLOBAL_STATS_KEY, Duration::from_secs(300)).await;
        assert_eq!(persisted.unwrap().data.btc_dominance(), Some(55.0));
        assert!(dashboard.latest().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn placeholder_data_is_not_persisted() {
        let transport = ScriptedTransport::new(vec![Step::Status(500), Step::Status(500)]);
        let (dashboard, persistent) = dashboard(transport);

        let snapshot = dashboard.refresh().await.unwrap();
        assert_eq!(snapshot.global_stats_source, DataSource::Placeholder);
        assert_eq!(snapshot.markets_source, DataSource::Placeholder);
        assert_eq!(snapshot.markets.len(), 3);

        let persisted: Option<serde_json::Value> = persistent.get(MARKET_DATA_KEY, Duration::from_secs(300)).await;
        assert!(persisted.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_refresh_is_a_no_op() {
        let transport = ScriptedTransport::new(vec![Step::Ok(global_payload()), Step::Ok(listing_payload())]);
        let (dashboard, _) = dashboard(transport.clone());

        let (first, second) = tokio::join!(dashboard.refresh(), dashboard.refresh());

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(transport.calls(), 2);
        assert!(!dashboard.is_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn auto_refresh_waits_for_a_viewer() {
        let transport = ScriptedTransport::new(vec![Step::Ok(global_payload()), Step::Ok(listing_payload())]);
        let (dashboard, _) = dashboard(transport.clone());
        let handle = dashboard.spawn_auto_refresh();

        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(transport.calls(), 0);

        let mut updates = dashboard.subscribe();
        let snapshot = updates.recv().await.unwrap();
        assert_eq!(snapshot.markets[0].id, "bitcoin");
        assert_eq!(transport.calls(), 2);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn clear_caches_empties_every_tier() {
        let transport = ScriptedTransport::new(vec![Step::Ok(global_payload()), Step::Ok(listing_payload())]);
        let (dashboard, persistent) = dashboard(transport);
        dashboard.refresh().await.unwrap();

        assert_eq!(dashboard.clear_caches().await, 2);
        assert!(persistent.get::<serde_json::Value>(MARKET_DATA_KEY, Duration::from_secs(300)).await.is_none());

        let stats = dashboard.stats().await;
        assert_eq!(stats.market.request_count, 2);
        assert!(stats.last_refresh_at.is_some());
        assert_eq!(stats.viewers, 0);
    }
}
