//! Contracts for the collaborators the engine drives but does not own: the
//! interest profile, persistence, the upstream content API, and delivery.
//!
//! All four are held as `Arc<dyn Trait>` so cascade branches can outlive the
//! discovery cycle that launched them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use xpush_config::FeedbackConfig;

use crate::candidate::{
    CachedCandidate, Candidate, DeliverySource, FeedbackAction, MessageRef, ScoredCandidate,
    StrategyOrigin, StrategyStat, TagPair, WeightedTag,
};

/// Read side of the interest profile, plus the feedback hook that updates it.
#[async_trait]
pub trait AffinityProfile: Send + Sync {
    /// Highest-weight tags, descending.
    async fn top_tags(&self, n: usize) -> Result<Vec<WeightedTag>>;
    async fn top_tag_pairs(&self, limit: usize) -> Result<Vec<TagPair>>;
    /// The raw search term that most often produced hits for a normalized tag.
    async fn best_search_tag(&self, normalized_tag: &str) -> Result<String>;
    /// Full normalized tag → weight map used for match scoring.
    async fn weights(&self) -> Result<HashMap<String, f64>>;
    /// Apply a feedback event.  Returns a tag the profiler suggests blocking.
    async fn apply_feedback(
        &self,
        candidate: &Candidate,
        action: FeedbackAction,
        config: &FeedbackConfig,
    ) -> Result<Option<String>>;
    fn stop_words(&self) -> HashSet<String>;
    fn blocked_originators(&self) -> HashSet<u64>;
}

#[async_trait]
pub trait PushStore: Send + Sync {
    async fn is_delivered(&self, id: u64) -> Result<bool>;
    async fn mark_delivered(&self, id: u64, source: DeliverySource) -> Result<()>;
    async fn delivery_source(&self, id: u64) -> Result<Option<DeliverySource>>;
    async fn strategy_stats(&self, strategy: StrategyOrigin) -> Result<StrategyStat>;
    async fn update_strategy_stats(&self, strategy: StrategyOrigin, success: bool) -> Result<()>;
    async fn originator_boost_score(&self, originator_id: u64) -> Result<f64>;
    async fn liked_ids(&self) -> Result<HashSet<u64>>;
    async fn record_feedback(&self, id: u64, action: FeedbackAction) -> Result<()>;
    async fn cache_candidate(&self, record: CachedCandidate) -> Result<()>;
    async fn cached_candidate(&self, id: u64) -> Result<Option<CachedCandidate>>;
}

/// A tag search request.  `bookmark_threshold` of `None` means the upstream
/// default ordering with no popularity floor.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub tags: Vec<String>,
    pub bookmark_threshold: Option<u64>,
    pub date_range_days: Option<u32>,
    pub limit: usize,
}

/// Upstream content API.  Timeouts are the implementation's concern; the
/// engine treats them like any other error.
#[async_trait]
pub trait ContentApi: Send + Sync {
    /// Results come back in the upstream's popularity ordering.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Candidate>>;
    async fn ranking(&self, mode: &str, limit: usize) -> Result<Vec<Candidate>>;
    async fn follow_feed(&self, limit: usize) -> Result<Vec<Candidate>>;
    /// Ids of the originators the account follows, at most `limit` of them.
    async fn following(&self, limit: usize) -> Result<HashSet<u64>>;
    async fn originator_items(
        &self,
        originator_id: u64,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Candidate>>;
    async fn related(&self, id: u64, limit: usize) -> Result<Vec<Candidate>>;
    async fn detail(&self, id: u64) -> Result<Option<Candidate>>;
}

/// Result of one delivery attempt: the ids that actually went out, each with
/// the message handle the channel assigned (if it has one).
#[derive(Debug, Clone, Default)]
pub struct DeliveryReceipt {
    pub delivered: HashMap<u64, Option<MessageRef>>,
}

impl DeliveryReceipt {
    pub fn len(&self) -> usize {
        self.delivered.len()
    }
}

#[async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(&self, batch: &[ScoredCandidate]) -> Result<DeliveryReceipt>;
    /// Deliver cascade items as replies to `reply_to`, prefixed with the seed.
    async fn deliver_chain(
        &self,
        batch: &[ScoredCandidate],
        seed: &Candidate,
        reply_to: Option<&MessageRef>,
    ) -> Result<HashMap<u64, MessageRef>>;
    async fn notify(&self, text: &str) -> Result<()>;
}

/// The collaborator set one engine instance runs against.
#[derive(Clone)]
pub struct Collaborators {
    pub affinity: Arc<dyn AffinityProfile>,
    pub store: Arc<dyn PushStore>,
    pub api: Arc<dyn ContentApi>,
    pub delivery: Arc<dyn Delivery>,
}
