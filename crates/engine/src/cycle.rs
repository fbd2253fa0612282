//! The discovery cycle: allocate, discover, filter, deliver, record.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use xpush_config::{AppConfig, CycleOverlap};

use crate::cascade::ChainReaction;
use crate::candidate::{CachedCandidate, ChainMetadata, ScoredCandidate, StrategyOrigin};
use crate::contracts::Collaborators;
use crate::error::EngineResult;
use crate::filter::ContentFilter;
use crate::scheduler::{QuotaMap, StrategyScheduler};
use crate::strategies::{DiscoveryContext, StrategySet};
use crate::supervisor::CascadeSupervisor;
use crate::threshold::ThresholdCache;

/// Summary of one `run_cycle` call.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// `true` when another cycle held the lock and overlap mode is `skip`.
    pub skipped: bool,
    pub quotas: QuotaMap,
    pub raw_counts: BTreeMap<StrategyOrigin, usize>,
    pub fetched: usize,
    pub survivors: usize,
    pub delivered: Vec<u64>,
}

impl CycleReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

pub struct DiscoveryEngine {
    pub(crate) config: AppConfig,
    pub(crate) collab: Collaborators,
    pub(crate) chain: Arc<ChainReaction>,
    strategies: StrategySet,
    scheduler: StrategyScheduler,
    cycle_lock: Mutex<()>,
}

impl DiscoveryEngine {
    pub fn new(config: AppConfig, collab: Collaborators) -> Self {
        let supervisor = Arc::new(CascadeSupervisor::new());
        let chain = Arc::new(ChainReaction::new(
            collab.clone(),
            config.filter.clone(),
            config.boosted_originators(),
            config.feedback.clone(),
            supervisor,
        ));
        let scheduler = StrategyScheduler::new(collab.store.clone(), config.mab.clone());
        Self {
            config,
            collab,
            chain,
            strategies: StrategySet::standard(),
            scheduler,
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &Arc<CascadeSupervisor> {
        self.chain.supervisor()
    }

    /// Run one full discovery-to-delivery cycle.  At most one cycle runs at a
    /// time; cascade branches are not bound by this.
    pub async fn run_cycle(&self) -> EngineResult<CycleReport> {
        let Some(_guard) = self.acquire_cycle().await else {
            info!("discovery cycle already running; trigger skipped");
            return Ok(CycleReport::skipped());
        };

        let fetcher = &self.config.fetcher;
        let affinity = &self.collab.affinity;
        let top_tags = affinity.top_tags(fetcher.top_n).await?;
        let weights = affinity.weights().await?;

        let quotas = self.scheduler.allocate(fetcher.discovery_limit).await?;
        let ctx = DiscoveryContext {
            api: self.collab.api.clone(),
            affinity: affinity.clone(),
            store: self.collab.store.clone(),
            thresholds: ThresholdCache::new(self.collab.api.clone()),
            fetcher: fetcher.clone(),
            top_tags,
            weights,
        };

        let batches = self.strategies.run(&ctx, &quotas).await;
        let mut report = CycleReport {
            quotas,
            ..CycleReport::default()
        };
        let mut merged = Vec::new();
        for batch in batches {
            report.raw_counts.insert(batch.origin, batch.candidates.len());
            merged.extend(
                batch
                    .candidates
                    .into_iter()
                    .map(|c| ScoredCandidate::new(c, batch.origin)),
            );
        }
        report.fetched = merged.len();
        info!(
            fetched = report.fetched,
            ceilings = ctx.thresholds.len(),
            "discovery finished"
        );

        let boosted = self.boosted_originators().await;
        let filter = ContentFilter::new(self.config.filter.clone(), boosted);
        let survivors = filter
            .filter(merged, &ctx.weights, self.collab.store.as_ref())
            .await?;
        report.survivors = survivors.len();
        if survivors.is_empty() {
            info!("nothing to deliver this cycle");
            return Ok(report);
        }

        report.delivered = self.deliver(&survivors).await?;
        info!(
            survivors = report.survivors,
            delivered = report.delivered.len(),
            "discovery cycle complete"
        );
        Ok(report)
    }

    /// Configured boost list plus every followed originator.  An unreachable
    /// following list leaves only the configured ones.
    async fn boosted_originators(&self) -> HashSet<u64> {
        let mut boosted: HashSet<u64> = self.config.boosted_originators().into_iter().collect();
        let configured = boosted.len();
        match self
            .collab
            .api
            .following(self.config.fetcher.following_limit)
            .await
        {
            Ok(followed) => boosted.extend(followed),
            Err(err) => warn!(?err, "following list unavailable; boosting configured originators only"),
        }
        info!(configured, total = boosted.len(), "boosted originators resolved");
        boosted
    }

    async fn acquire_cycle(&self) -> Option<MutexGuard<'_, ()>> {
        match self.config.scheduler.overlap {
            CycleOverlap::Queue => Some(self.cycle_lock.lock().await),
            CycleOverlap::Skip => self.cycle_lock.try_lock().ok(),
        }
    }

    /// Cache, deliver, then record every item the channel accepted.
    async fn deliver(&self, survivors: &[ScoredCandidate]) -> EngineResult<Vec<u64>> {
        let store = &self.collab.store;
        for item in survivors {
            store
                .cache_candidate(CachedCandidate::from_candidate(
                    &item.candidate,
                    ChainMetadata::default(),
                ))
                .await?;
        }

        let receipt = self.collab.delivery.deliver(survivors).await?;
        let mut delivered = Vec::with_capacity(receipt.len());
        for item in survivors {
            let Some(message_ref) = receipt.delivered.get(&item.id()) else {
                continue;
            };
            store.mark_delivered(item.id(), item.origin.into()).await?;
            store.update_strategy_stats(item.origin, false).await?;
            if let Some(message_ref) = message_ref {
                let chain = ChainMetadata {
                    message_ref: Some(message_ref.clone()),
                    ..ChainMetadata::default()
                };
                store
                    .cache_candidate(CachedCandidate::from_candidate(&item.candidate, chain))
                    .await?;
            }
            delivered.push(item.id());
        }
        Ok(delivered)
    }
}
