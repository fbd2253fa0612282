//! Chain reaction: a liked item seeds a depth-bounded run of related-item
//! deliveries, each threaded as a reply to its parent.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use xpush_config::{FeedbackConfig, FilterConfig};

use crate::candidate::{
    CachedCandidate, Candidate, ChainMetadata, DeliverySource, MessageRef, ScoredCandidate,
    StrategyOrigin,
};
use crate::contracts::Collaborators;
use crate::error::{EngineError, EngineResult};
use crate::filter::{ContentFilter, match_score};
use crate::strategies::score_related;
use crate::supervisor::CascadeSupervisor;

/// One cascade step's input.  `seed_depth` is the depth recorded for the
/// seed itself (`0` when it came from a discovery cycle).
#[derive(Debug, Clone)]
pub struct CascadeRequest {
    pub seed: Candidate,
    pub seed_depth: u32,
    pub reply_to: Option<MessageRef>,
}

/// An item delivered by a cascade step.
#[derive(Debug, Clone)]
pub struct ChainedItem {
    pub candidate: Candidate,
    pub depth: u32,
    pub message_ref: Option<MessageRef>,
}

impl ChainedItem {
    fn into_request(self) -> CascadeRequest {
        CascadeRequest {
            seed: self.candidate,
            seed_depth: self.depth,
            reply_to: self.message_ref,
        }
    }
}

pub struct ChainReaction {
    collab: Collaborators,
    filter: FilterConfig,
    boosted: HashSet<u64>,
    feedback: FeedbackConfig,
    supervisor: Arc<CascadeSupervisor>,
}

impl ChainReaction {
    pub fn new(
        collab: Collaborators,
        filter: FilterConfig,
        boosted: impl IntoIterator<Item = u64>,
        feedback: FeedbackConfig,
        supervisor: Arc<CascadeSupervisor>,
    ) -> Self {
        Self {
            collab,
            filter,
            boosted: boosted.into_iter().collect(),
            feedback,
            supervisor,
        }
    }

    pub fn supervisor(&self) -> &Arc<CascadeSupervisor> {
        &self.supervisor
    }

    /// Run a branch in the background.  When auto-recursion is on, every item
    /// it delivers below the depth limit seeds a branch of its own.
    pub fn launch(self: &Arc<Self>, request: CascadeRequest) -> bool {
        let this = Arc::clone(self);
        let seed = request.seed.id;
        self.supervisor.spawn(seed, async move {
            let delivered = this.step(&request).await?;
            if this.feedback.chain_auto_recurse {
                for mut item in delivered {
                    item.depth = this.recorded_depth(&item).await;
                    if item.depth < this.feedback.max_chain_depth {
                        this.launch(item.into_request());
                    }
                }
            }
            Ok(())
        })
    }

    /// One cascade step without recursion.  Returns what was delivered.
    pub async fn step(&self, request: &CascadeRequest) -> EngineResult<Vec<ChainedItem>> {
        let seed = &request.seed;
        let depth = request.seed_depth + 1;
        if depth > self.feedback.max_chain_depth {
            debug!(seed = seed.id, depth, "chain depth limit reached");
            return Ok(vec![]);
        }

        info!(seed = seed.id, depth, "cascade step started");
        let related = self
            .collab
            .api
            .related(seed.id, self.feedback.related_fetch_limit)
            .await
            .map_err(|source| EngineError::CascadeFetch {
                seed: seed.id,
                source,
            })?;
        if related.is_empty() {
            info!(seed = seed.id, "no related items; chain ends");
            return Ok(vec![]);
        }

        let filter = ContentFilter::new(self.filter.clone(), self.boosted.iter().copied())
            .with_blocked_tags(self.collab.affinity.stop_words());
        let blocked = self.collab.affinity.blocked_originators();
        let weights = self.collab.affinity.weights().await?;

        let mut seen = HashSet::new();
        let mut eligible = Vec::new();
        for item in related {
            if item.id == seed.id || !seen.insert(item.id) {
                continue;
            }
            if self.collab.store.is_delivered(item.id).await? {
                debug!(id = item.id, "cascade skip: already delivered");
                continue;
            }
            if !filter.admits(&item) || blocked.contains(&item.originator_id) {
                continue;
            }
            eligible.push(item);
        }

        let mut ranked = score_related(eligible, &weights, self.collab.store.as_ref()).await;
        ranked.truncate(self.feedback.related_push_limit);
        if ranked.is_empty() {
            info!(seed = seed.id, "related items all filtered; chain ends");
            return Ok(vec![]);
        }

        let batch: Vec<ScoredCandidate> = ranked
            .into_iter()
            .map(|(candidate, _)| {
                let score = match_score(&candidate.tags, &weights);
                ScoredCandidate::new(candidate, StrategyOrigin::Related).with_score(score)
            })
            .collect();

        for item in &batch {
            self.collab
                .store
                .cache_candidate(CachedCandidate::from_candidate(
                    &item.candidate,
                    self.lineage(depth, seed.id, None),
                ))
                .await?;
        }

        let sent = self
            .collab
            .delivery
            .deliver_chain(&batch, seed, request.reply_to.as_ref())
            .await?;

        let mut delivered = Vec::with_capacity(sent.len());
        for item in batch {
            let Some(message_ref) = sent.get(&item.id()).cloned() else {
                continue;
            };
            self.collab
                .store
                .mark_delivered(item.id(), DeliverySource::Chain)
                .await?;
            self.collab
                .store
                .cache_candidate(CachedCandidate::from_candidate(
                    &item.candidate,
                    self.lineage(depth, seed.id, Some(message_ref.clone())),
                ))
                .await?;
            delivered.push(ChainedItem {
                candidate: item.candidate,
                depth,
                message_ref: Some(message_ref),
            });
        }

        info!(seed = seed.id, depth, delivered = delivered.len(), "cascade step delivered");
        Ok(delivered)
    }

    /// Depth from the item's stored lineage, or the depth it was delivered at
    /// when no record is readable.
    async fn recorded_depth(&self, item: &ChainedItem) -> u32 {
        match self.collab.store.cached_candidate(item.candidate.id).await {
            Ok(Some(record)) => record.chain.depth,
            Ok(None) => item.depth,
            Err(err) => {
                warn!(id = item.candidate.id, ?err, "lineage unavailable; using delivered depth");
                item.depth
            }
        }
    }

    fn lineage(&self, depth: u32, parent: u64, message_ref: Option<MessageRef>) -> ChainMetadata {
        ChainMetadata {
            depth,
            parent_id: Some(parent),
            message_ref,
        }
    }
}
