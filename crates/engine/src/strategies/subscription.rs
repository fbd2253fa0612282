use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use futures::future::join_all;
use tracing::{info, warn};

use crate::candidate::{Candidate, StrategyOrigin};

use super::{DiscoveryContext, DiscoveryStrategy};

/// Follow feed plus a short recent-items fetch per subscribed originator,
/// merged by id with the first occurrence kept.
pub struct SubscriptionMerge;

#[async_trait]
impl DiscoveryStrategy for SubscriptionMerge {
    fn origin(&self) -> StrategyOrigin {
        StrategyOrigin::Subscription
    }

    async fn discover(&self, ctx: &DiscoveryContext, quota: usize) -> Vec<Candidate> {
        let fetcher = &ctx.fetcher;
        let mut seen = HashSet::new();
        let mut merged = Vec::new();

        match ctx.api.follow_feed(fetcher.follow_feed_limit).await {
            Ok(items) => merged.extend(items.into_iter().filter(|c| seen.insert(c.id))),
            Err(err) => warn!(?err, "follow feed fetch failed"),
        }

        if !fetcher.subscribed_originators.is_empty() {
            let since = Utc::now() - Duration::days(i64::from(fetcher.date_range_days));
            let per_originator = join_all(fetcher.subscribed_originators.iter().map(|id| async move {
                let result = ctx
                    .api
                    .originator_items(*id, since, fetcher.originator_recent_limit)
                    .await;
                (*id, result)
            }))
            .await;

            for (id, result) in per_originator {
                match result {
                    Ok(items) => merged.extend(items.into_iter().filter(|c| seen.insert(c.id))),
                    Err(err) => warn!(originator = id, ?err, "originator fetch failed"),
                }
            }
        }

        info!(count = merged.len(), quota, "subscription merge finished");
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeAffinity, FakeContentApi, FakeStore, candidate, context};
    use std::sync::Arc;

    #[tokio::test]
    async fn feed_and_originators_merge_first_seen() {
        let api = Arc::new(FakeContentApi::default());
        api.set_follow_feed(vec![candidate(1, &["cat"], 7), candidate(2, &["hat"], 8)]);
        api.add_originator_items(9, vec![candidate(2, &["hat"], 9), candidate(3, &["owl"], 9)]);

        let mut ctx = context(
            api.clone(),
            Arc::new(FakeAffinity::default()),
            Arc::new(FakeStore::default()),
        );
        ctx.fetcher.subscribed_originators = vec![9, 10];
        api.fail_originator(10);

        let found = SubscriptionMerge.discover(&ctx, 50).await;
        assert_eq!(found.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1, 2, 3]);
        // The feed copy of item 2 wins.
        assert_eq!(found[1].originator_id, 8);
    }

    #[tokio::test]
    async fn feed_failure_still_returns_originator_items() {
        let api = Arc::new(FakeContentApi::default());
        api.fail_follow_feed();
        api.add_originator_items(4, vec![candidate(5, &["cat"], 4)]);
        let mut ctx = context(
            api,
            Arc::new(FakeAffinity::default()),
            Arc::new(FakeStore::default()),
        );
        ctx.fetcher.subscribed_originators = vec![4];

        let found = SubscriptionMerge.discover(&ctx, 50).await;
        assert_eq!(found.len(), 1);
    }
}
