use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tracing::{info, warn};

use crate::candidate::{Candidate, StrategyOrigin};
use crate::contracts::PushStore;
use crate::query::normalize_tag;

use super::{DiscoveryContext, DiscoveryStrategy};

/// Items related to a random previously liked item, ranked by profile
/// affinity plus originator reputation.
pub struct RelatedExpansion;

#[async_trait]
impl DiscoveryStrategy for RelatedExpansion {
    fn origin(&self) -> StrategyOrigin {
        StrategyOrigin::Related
    }

    async fn discover(&self, ctx: &DiscoveryContext, quota: usize) -> Vec<Candidate> {
        let liked = match ctx.store.liked_ids().await {
            Ok(liked) => liked,
            Err(err) => {
                warn!(?err, "liked set unavailable; skipping related expansion");
                return vec![];
            }
        };

        let Some(seed) = pick_seed(liked) else {
            return vec![];
        };

        let related = match ctx.api.related(seed, quota * 2).await {
            Ok(items) => items,
            Err(err) => {
                warn!(seed, ?err, "related fetch failed");
                return vec![];
            }
        };

        let mut scored = score_related(related, &ctx.weights, ctx.store.as_ref()).await;
        scored.truncate(quota);
        info!(seed, count = scored.len(), "related expansion finished");
        scored.into_iter().map(|(candidate, _)| candidate).collect()
    }
}

/// Uniform choice over the liked set.
fn pick_seed(liked: HashSet<u64>) -> Option<u64> {
    let mut liked: Vec<u64> = liked.into_iter().collect();
    liked.sort_unstable();
    liked.choose(&mut rand::thread_rng()).copied()
}

/// Sum of profile weights for the candidate's tags.  Tags are normalized the
/// way the profile stores them, with a plain lowercase match as fallback.
pub(crate) fn affinity_score(tags: &[String], weights: &HashMap<String, f64>) -> f64 {
    tags.iter()
        .filter_map(|tag| {
            weights
                .get(&normalize_tag(tag))
                .or_else(|| weights.get(&tag.to_lowercase()))
        })
        .sum()
}

/// Score by affinity plus the originator's boost, sorted descending.  Ties
/// keep upstream order.
pub(crate) async fn score_related(
    items: Vec<Candidate>,
    weights: &HashMap<String, f64>,
    store: &dyn PushStore,
) -> Vec<(Candidate, f64)> {
    let mut scored = Vec::with_capacity(items.len());
    for item in items {
        let boost = match store.originator_boost_score(item.originator_id).await {
            Ok(score) => score,
            Err(err) => {
                warn!(originator = item.originator_id, ?err, "originator score unavailable");
                0.0
            }
        };
        let score = affinity_score(&item.tags, weights) + boost;
        scored.push((item, score));
    }
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored
}
