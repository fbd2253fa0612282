use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::info;

use xpush_config::FetcherConfig;

use crate::candidate::{Candidate, StrategyOrigin, WeightedTag};
use crate::contracts::{AffinityProfile, ContentApi, PushStore};
use crate::scheduler::QuotaMap;
use crate::threshold::ThresholdCache;

mod combination;
mod ranking;
mod related;
mod subscription;

pub use combination::{CombinationSearch, MAX_PER_ORIGINATOR, select_pairs};
pub use ranking::RankingFetch;
pub use related::RelatedExpansion;
pub(crate) use related::score_related;
pub use subscription::SubscriptionMerge;

// ── Shared cycle context ─────────────────────────────────────────────────────

/// Everything a strategy may read during one discovery cycle.  Owned by the
/// cycle; the threshold cache inside it dies with the cycle.
pub struct DiscoveryContext {
    pub api: Arc<dyn ContentApi>,
    pub affinity: Arc<dyn AffinityProfile>,
    pub store: Arc<dyn PushStore>,
    pub thresholds: ThresholdCache,
    pub fetcher: FetcherConfig,
    /// Profile tags read at the start of the cycle, descending weight.
    pub top_tags: Vec<WeightedTag>,
    /// Normalized tag → weight, for scoring inside strategies.
    pub weights: HashMap<String, f64>,
}

// ── Strategy trait and registry ──────────────────────────────────────────────

/// A producer of raw candidates.  Implementations never fail: fetch errors
/// are logged and the strategy contributes whatever it managed to collect.
#[async_trait]
pub trait DiscoveryStrategy: Send + Sync {
    fn origin(&self) -> StrategyOrigin;
    async fn discover(&self, ctx: &DiscoveryContext, quota: usize) -> Vec<Candidate>;
}

/// One strategy's contribution to a cycle.
#[derive(Debug, Clone)]
pub struct StrategyBatch {
    pub origin: StrategyOrigin,
    pub candidates: Vec<Candidate>,
}

#[derive(Default)]
pub struct StrategySet {
    strategies: Vec<Arc<dyn DiscoveryStrategy>>,
}

impl StrategySet {
    /// The four built-in strategies in declaration order.
    pub fn standard() -> Self {
        let mut set = Self::default();
        set.register(Arc::new(CombinationSearch));
        set.register(Arc::new(SubscriptionMerge));
        set.register(Arc::new(RankingFetch));
        set.register(Arc::new(RelatedExpansion));
        set
    }

    pub fn register(&mut self, strategy: Arc<dyn DiscoveryStrategy>) {
        self.strategies.push(strategy);
    }

    pub fn origins(&self) -> Vec<StrategyOrigin> {
        self.strategies.iter().map(|s| s.origin()).collect()
    }

    /// Run every strategy with a non-zero quota concurrently and wait for all
    /// of them.  Each batch is truncated to its strategy's quota.
    pub async fn run(&self, ctx: &DiscoveryContext, quotas: &QuotaMap) -> Vec<StrategyBatch> {
        let active: Vec<_> = self
            .strategies
            .iter()
            .filter(|s| quotas.get(s.origin()) > 0)
            .collect();

        let batches = join_all(active.iter().map(|strategy| async move {
            let origin = strategy.origin();
            let quota = quotas.get(origin);
            let mut candidates = strategy.discover(ctx, quota).await;
            candidates.truncate(quota);
            StrategyBatch { origin, candidates }
        }))
        .await;

        for batch in &batches {
            info!(
                strategy = %batch.origin,
                count = batch.candidates.len(),
                "strategy finished"
            );
        }
        batches
    }
}
