use tracing::{info, warn};

use crate::candidate::{
    CachedCandidate, Candidate, ChainMetadata, FeedbackAction, StrategyOrigin,
};
use crate::cascade::CascadeRequest;
use crate::cycle::DiscoveryEngine;
use crate::error::{EngineError, EngineResult};

/// What a feedback event changed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackOutcome {
    pub action: FeedbackAction,
    /// The bandit arm credited with a success, if any.
    pub credited: Option<StrategyOrigin>,
    pub suggested_block: Option<String>,
    pub cascade_launched: bool,
}

impl DiscoveryEngine {
    /// Entry point for feedback arriving from a delivery channel.
    pub async fn on_feedback(&self, id: u64, action: &str) -> EngineResult<FeedbackOutcome> {
        let action = FeedbackAction::parse(action)
            .ok_or_else(|| EngineError::UnknownAction(action.to_string()))?;
        self.handle_feedback(id, action).await
    }

    pub async fn handle_feedback(
        &self,
        id: u64,
        action: FeedbackAction,
    ) -> EngineResult<FeedbackOutcome> {
        let store = &self.collab.store;
        let cached = store.cached_candidate(id).await?;
        let lineage = cached
            .as_ref()
            .map(|record| record.chain.clone())
            .unwrap_or_default();
        let candidate = self.resolve_candidate(id, action, cached).await?;

        store.record_feedback(id, action).await?;
        let suggested_block = self
            .collab
            .affinity
            .apply_feedback(&candidate, action, &self.config.feedback)
            .await?;
        if let Some(tag) = &suggested_block {
            let notice = format!(
                "Tag `{tag}` has reached the dislike threshold. Send `/block {tag}` to block it."
            );
            if let Err(err) = self.collab.delivery.notify(&notice).await {
                warn!(tag = %tag, ?err, "block suggestion could not be sent");
            }
        }

        let mut outcome = FeedbackOutcome {
            action,
            credited: None,
            suggested_block,
            cascade_launched: false,
        };
        if action != FeedbackAction::Like {
            info!(id, action = action.as_str(), "feedback recorded");
            return Ok(outcome);
        }

        if let Some(origin) = store.delivery_source(id).await?.and_then(|s| s.strategy()) {
            store.update_strategy_stats(origin, true).await?;
            info!(id, strategy = %origin, "strategy credited");
            outcome.credited = Some(origin);
        }

        let feedback = &self.config.feedback;
        if feedback.chain_enabled {
            if lineage.depth >= feedback.max_chain_depth {
                info!(id, depth = lineage.depth, "chain depth exhausted; no cascade");
            } else if !store.is_delivered(id).await? {
                info!(id, "item never delivered; no cascade");
            } else {
                outcome.cascade_launched = self.chain.launch(CascadeRequest {
                    seed: candidate,
                    seed_depth: lineage.depth,
                    reply_to: lineage.message_ref,
                });
            }
        }

        info!(id, action = action.as_str(), "feedback recorded");
        Ok(outcome)
    }

    /// Rebuild the liked or disliked item from the cache, falling back to the
    /// upstream detail call.
    async fn resolve_candidate(
        &self,
        id: u64,
        action: FeedbackAction,
        cached: Option<CachedCandidate>,
    ) -> EngineResult<Candidate> {
        let api = &self.collab.api;
        if let Some(record) = cached {
            let candidate = Candidate::from_cached(&record);
            if action == FeedbackAction::Like && candidate.originator_id == 0 {
                match api.detail(id).await {
                    Ok(Some(full)) => return Ok(full),
                    Ok(None) => {}
                    Err(err) => warn!(id, ?err, "detail refresh failed; using cached record"),
                }
            }
            return Ok(candidate);
        }

        warn!(id, "feedback on uncached item; fetching detail");
        match api.detail(id).await {
            Ok(Some(full)) => {
                self.collab
                    .store
                    .cache_candidate(CachedCandidate::from_candidate(&full, ChainMetadata::default()))
                    .await?;
                Ok(full)
            }
            Ok(None) => Err(EngineError::UnknownCandidate(id)),
            Err(err) => {
                warn!(id, ?err, "detail fetch failed");
                Err(EngineError::UnknownCandidate(id))
            }
        }
    }
}
