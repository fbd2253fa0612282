use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::candidate::{Candidate, StrategyOrigin};

use super::{DiscoveryContext, DiscoveryStrategy};

/// Fetches the configured ranking lists, splitting the quota evenly.
pub struct RankingFetch;

#[async_trait]
impl DiscoveryStrategy for RankingFetch {
    fn origin(&self) -> StrategyOrigin {
        StrategyOrigin::Ranking
    }

    async fn discover(&self, ctx: &DiscoveryContext, quota: usize) -> Vec<Candidate> {
        let ranking = &ctx.fetcher.ranking;
        if !ranking.enabled || ranking.modes.is_empty() {
            debug!("ranking fetch disabled");
            return vec![];
        }

        let per_mode = (quota / ranking.modes.len()).max(1);
        let lists = join_all(ranking.modes.iter().map(|mode| async move {
            (mode, ctx.api.ranking(mode, per_mode).await)
        }))
        .await;

        let mut collected = Vec::new();
        for (mode, result) in lists {
            match result {
                Ok(items) => {
                    info!(mode = %mode, count = items.len(), "ranking list fetched");
                    collected.extend(items);
                }
                Err(err) => warn!(mode = %mode, ?err, "ranking fetch failed"),
            }
        }
        collected
    }
}
