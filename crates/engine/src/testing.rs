//! In-memory collaborators for engine tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use xpush_config::{FeedbackConfig, FetcherConfig};

use crate::candidate::{
    AiFlag, CachedCandidate, Candidate, DeliverySource, FeedbackAction, MessageRef,
    ScoredCandidate, StrategyOrigin, StrategyStat, TagPair, WeightedTag,
};
use crate::contracts::{
    AffinityProfile, Collaborators, ContentApi, Delivery, DeliveryReceipt, PushStore, SearchQuery,
};
use crate::strategies::DiscoveryContext;
use crate::threshold::ThresholdCache;

pub fn candidate(id: u64, tags: &[&str], originator: u64) -> Candidate {
    Candidate {
        id,
        title: format!("item {id}"),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        originator_id: originator,
        originator_name: format!("artist {originator}"),
        bookmark_count: 0,
        view_count: 0,
        create_date: Utc::now(),
        is_r18: false,
        ai_flag: AiFlag::Human,
        page_count: 1,
        image_urls: vec![],
    }
}

impl Candidate {
    pub fn with_bookmarks(mut self, count: u64) -> Self {
        self.bookmark_count = count;
        self
    }

    pub fn with_ai(mut self, flag: AiFlag) -> Self {
        self.ai_flag = flag;
        self
    }

    pub fn mature(mut self) -> Self {
        self.is_r18 = true;
        self
    }

    pub fn created_days_ago(mut self, days: i64) -> Self {
        self.create_date = Utc::now() - Duration::days(days);
        self
    }
}

pub fn context(
    api: Arc<FakeContentApi>,
    affinity: Arc<FakeAffinity>,
    store: Arc<FakeStore>,
) -> DiscoveryContext {
    let top_tags = affinity.sorted_tags();
    let weights = affinity.weight_map();
    DiscoveryContext {
        thresholds: ThresholdCache::new(api.clone()),
        api,
        affinity,
        store,
        fetcher: FetcherConfig::default(),
        top_tags,
        weights,
    }
}

/// All four fakes wired together.
pub struct Harness {
    pub api: Arc<FakeContentApi>,
    pub affinity: Arc<FakeAffinity>,
    pub store: Arc<FakeStore>,
    pub delivery: Arc<FakeDelivery>,
}

impl Harness {
    pub fn new(tags: &[(&str, f64)]) -> Self {
        Self {
            api: Arc::new(FakeContentApi::default()),
            affinity: Arc::new(FakeAffinity::with_tags(tags)),
            store: Arc::new(FakeStore::default()),
            delivery: Arc::new(FakeDelivery::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            affinity: self.affinity.clone(),
            store: self.store.clone(),
            api: self.api.clone(),
            delivery: self.delivery.clone(),
        }
    }
}

// ── Content API ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct ApiState {
    searches: HashMap<String, Vec<Candidate>>,
    failing_searches: HashSet<String>,
    queries: Vec<SearchQuery>,
    rankings: HashMap<String, Vec<Candidate>>,
    failing_rankings: HashSet<String>,
    follow_feed: Vec<Candidate>,
    follow_feed_fails: bool,
    following: HashSet<u64>,
    following_fails: bool,
    originator_items: HashMap<u64, Vec<Candidate>>,
    failing_originators: HashSet<u64>,
    related: HashMap<u64, Vec<Candidate>>,
    failing_related: HashSet<u64>,
    related_calls: Vec<(u64, usize)>,
    details: HashMap<u64, Candidate>,
}

/// Search results are keyed by the query terms joined with a space.
#[derive(Default)]
pub struct FakeContentApi {
    state: Mutex<ApiState>,
}

impl FakeContentApi {
    pub fn add_search(&self, key: &str, items: Vec<Candidate>) {
        self.state.lock().unwrap().searches.insert(key.to_string(), items);
    }

    pub fn fail_search(&self, key: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_searches
            .insert(key.to_string());
    }

    pub fn queries(&self) -> Vec<SearchQuery> {
        self.state.lock().unwrap().queries.clone()
    }

    pub fn search_calls(&self) -> usize {
        self.state.lock().unwrap().queries.len()
    }

    pub fn set_ranking(&self, mode: &str, items: Vec<Candidate>) {
        self.state.lock().unwrap().rankings.insert(mode.to_string(), items);
    }

    pub fn fail_ranking(&self, mode: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_rankings
            .insert(mode.to_string());
    }

    pub fn set_follow_feed(&self, items: Vec<Candidate>) {
        self.state.lock().unwrap().follow_feed = items;
    }

    pub fn fail_follow_feed(&self) {
        self.state.lock().unwrap().follow_feed_fails = true;
    }

    pub fn set_following(&self, originators: &[u64]) {
        self.state.lock().unwrap().following = originators.iter().copied().collect();
    }

    pub fn fail_following(&self) {
        self.state.lock().unwrap().following_fails = true;
    }

    pub fn add_originator_items(&self, originator: u64, items: Vec<Candidate>) {
        self.state
            .lock()
            .unwrap()
            .originator_items
            .insert(originator, items);
    }

    pub fn fail_originator(&self, originator: u64) {
        self.state
            .lock()
            .unwrap()
            .failing_originators
            .insert(originator);
    }

    pub fn set_related(&self, seed: u64, items: Vec<Candidate>) {
        self.state.lock().unwrap().related.insert(seed, items);
    }

    pub fn fail_related(&self, seed: u64) {
        self.state.lock().unwrap().failing_related.insert(seed);
    }

    pub fn related_calls(&self) -> Vec<(u64, usize)> {
        self.state.lock().unwrap().related_calls.clone()
    }

    pub fn set_detail(&self, item: Candidate) {
        self.state.lock().unwrap().details.insert(item.id, item);
    }
}

fn take(items: Option<&Vec<Candidate>>, limit: usize) -> Vec<Candidate> {
    items
        .map(|list| list.iter().take(limit).cloned().collect())
        .unwrap_or_default()
}

#[async_trait]
impl ContentApi for FakeContentApi {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Candidate>> {
        let mut state = self.state.lock().unwrap();
        state.queries.push(query.clone());
        let key = query.tags.join(" ");
        if state.failing_searches.contains(&key) {
            return Err(anyhow!("search `{key}` failed"));
        }
        Ok(take(state.searches.get(&key), query.limit))
    }

    async fn ranking(&self, mode: &str, limit: usize) -> Result<Vec<Candidate>> {
        let state = self.state.lock().unwrap();
        if state.failing_rankings.contains(mode) {
            return Err(anyhow!("ranking `{mode}` failed"));
        }
        Ok(take(state.rankings.get(mode), limit))
    }

    async fn follow_feed(&self, limit: usize) -> Result<Vec<Candidate>> {
        let state = self.state.lock().unwrap();
        if state.follow_feed_fails {
            return Err(anyhow!("follow feed failed"));
        }
        Ok(take(Some(&state.follow_feed), limit))
    }

    async fn following(&self, limit: usize) -> Result<HashSet<u64>> {
        let state = self.state.lock().unwrap();
        if state.following_fails {
            return Err(anyhow!("following list failed"));
        }
        Ok(state.following.iter().take(limit).copied().collect())
    }

    async fn originator_items(
        &self,
        originator_id: u64,
        _since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Candidate>> {
        let state = self.state.lock().unwrap();
        if state.failing_originators.contains(&originator_id) {
            return Err(anyhow!("originator {originator_id} failed"));
        }
        Ok(take(state.originator_items.get(&originator_id), limit))
    }

    async fn related(&self, id: u64, limit: usize) -> Result<Vec<Candidate>> {
        let mut state = self.state.lock().unwrap();
        state.related_calls.push((id, limit));
        if state.failing_related.contains(&id) {
            return Err(anyhow!("related {id} failed"));
        }
        Ok(take(state.related.get(&id), limit))
    }

    async fn detail(&self, id: u64) -> Result<Option<Candidate>> {
        Ok(self.state.lock().unwrap().details.get(&id).cloned())
    }
}

// ── Affinity profile ─────────────────────────────────────────────────────────

#[derive(Default)]
struct AffinityState {
    tags: Vec<WeightedTag>,
    pairs: Vec<TagPair>,
    stop_words: HashSet<String>,
    blocked: HashSet<u64>,
    suggestion: Option<String>,
    feedback: Vec<(u64, u64, FeedbackAction)>,
}

#[derive(Default)]
pub struct FakeAffinity {
    state: Mutex<AffinityState>,
}

impl FakeAffinity {
    pub fn with_tags(tags: &[(&str, f64)]) -> Self {
        let fake = Self::default();
        fake.state.lock().unwrap().tags = tags
            .iter()
            .map(|(tag, weight)| WeightedTag::new(*tag, *weight))
            .collect();
        fake
    }

    pub fn set_pairs(&self, pairs: Vec<TagPair>) {
        self.state.lock().unwrap().pairs = pairs;
    }

    pub fn add_stop_word(&self, word: &str) {
        self.state
            .lock()
            .unwrap()
            .stop_words
            .insert(word.to_string());
    }

    pub fn block_originator(&self, originator: u64) {
        self.state.lock().unwrap().blocked.insert(originator);
    }

    pub fn suggest_block(&self, tag: &str) {
        self.state.lock().unwrap().suggestion = Some(tag.to_string());
    }

    pub fn feedback_count(&self) -> usize {
        self.state.lock().unwrap().feedback.len()
    }

    pub fn last_feedback_originator(&self) -> Option<u64> {
        self.state
            .lock()
            .unwrap()
            .feedback
            .last()
            .map(|(_, originator, _)| *originator)
    }

    pub fn sorted_tags(&self) -> Vec<WeightedTag> {
        let mut tags = self.state.lock().unwrap().tags.clone();
        tags.sort_by(|a, b| b.weight.total_cmp(&a.weight));
        tags
    }

    pub fn weight_map(&self) -> HashMap<String, f64> {
        self.state
            .lock()
            .unwrap()
            .tags
            .iter()
            .map(|t| (t.tag.clone(), t.weight))
            .collect()
    }
}

#[async_trait]
impl AffinityProfile for FakeAffinity {
    async fn top_tags(&self, n: usize) -> Result<Vec<WeightedTag>> {
        Ok(self.sorted_tags().into_iter().take(n).collect())
    }

    async fn top_tag_pairs(&self, limit: usize) -> Result<Vec<TagPair>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .pairs
            .iter()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn best_search_tag(&self, normalized_tag: &str) -> Result<String> {
        Ok(normalized_tag.to_string())
    }

    async fn weights(&self) -> Result<HashMap<String, f64>> {
        Ok(self.weight_map())
    }

    async fn apply_feedback(
        &self,
        candidate: &Candidate,
        action: FeedbackAction,
        _config: &FeedbackConfig,
    ) -> Result<Option<String>> {
        let mut state = self.state.lock().unwrap();
        state
            .feedback
            .push((candidate.id, candidate.originator_id, action));
        Ok(state.suggestion.clone())
    }

    fn stop_words(&self) -> HashSet<String> {
        self.state.lock().unwrap().stop_words.clone()
    }

    fn blocked_originators(&self) -> HashSet<u64> {
        self.state.lock().unwrap().blocked.clone()
    }
}

// ── Persistence ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct StoreState {
    delivered: HashMap<u64, DeliverySource>,
    stats: HashMap<StrategyOrigin, StrategyStat>,
    stats_reads: usize,
    stats_fail: bool,
    originator_scores: HashMap<u64, f64>,
    liked: HashSet<u64>,
    feedback: Vec<(u64, FeedbackAction)>,
    cache: HashMap<u64, CachedCandidate>,
}

#[derive(Default)]
pub struct FakeStore {
    state: Mutex<StoreState>,
}

impl FakeStore {
    pub fn deliver(&self, id: u64) {
        self.put_source(id, DeliverySource::Strategy(StrategyOrigin::XpSearch));
    }

    pub fn put_source(&self, id: u64, source: DeliverySource) {
        self.state.lock().unwrap().delivered.insert(id, source);
    }

    pub fn source_of(&self, id: u64) -> Option<DeliverySource> {
        self.state.lock().unwrap().delivered.get(&id).copied()
    }

    pub fn set_stats(&self, origin: StrategyOrigin, success: u64, total: u64) {
        self.state
            .lock()
            .unwrap()
            .stats
            .insert(origin, StrategyStat { success, total });
    }

    pub fn stat(&self, origin: StrategyOrigin) -> StrategyStat {
        self.state
            .lock()
            .unwrap()
            .stats
            .get(&origin)
            .copied()
            .unwrap_or_default()
    }

    pub fn stats_reads(&self) -> usize {
        self.state.lock().unwrap().stats_reads
    }

    pub fn fail_stats(&self) {
        self.state.lock().unwrap().stats_fail = true;
    }

    pub fn set_originator_score(&self, originator: u64, score: f64) {
        self.state
            .lock()
            .unwrap()
            .originator_scores
            .insert(originator, score);
    }

    pub fn like(&self, id: u64) {
        self.state.lock().unwrap().liked.insert(id);
    }

    pub fn feedback_for(&self, id: u64) -> Vec<FeedbackAction> {
        self.state
            .lock()
            .unwrap()
            .feedback
            .iter()
            .filter(|(item, _)| *item == id)
            .map(|(_, action)| *action)
            .collect()
    }

    pub fn put_cached(&self, record: CachedCandidate) {
        self.state.lock().unwrap().cache.insert(record.id, record);
    }

    pub fn cached(&self, id: u64) -> Option<CachedCandidate> {
        self.state.lock().unwrap().cache.get(&id).cloned()
    }
}

#[async_trait]
impl PushStore for FakeStore {
    async fn is_delivered(&self, id: u64) -> Result<bool> {
        Ok(self.state.lock().unwrap().delivered.contains_key(&id))
    }

    async fn mark_delivered(&self, id: u64, source: DeliverySource) -> Result<()> {
        self.put_source(id, source);
        Ok(())
    }

    async fn delivery_source(&self, id: u64) -> Result<Option<DeliverySource>> {
        Ok(self.source_of(id))
    }

    async fn strategy_stats(&self, strategy: StrategyOrigin) -> Result<StrategyStat> {
        let mut state = self.state.lock().unwrap();
        if state.stats_fail {
            return Err(anyhow!("stats table unavailable"));
        }
        state.stats_reads += 1;
        Ok(state.stats.get(&strategy).copied().unwrap_or_default())
    }

    async fn update_strategy_stats(&self, strategy: StrategyOrigin, success: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let stat = state.stats.entry(strategy).or_default();
        if success {
            stat.success += 1;
            stat.total = stat.total.max(stat.success);
        } else {
            stat.total += 1;
        }
        Ok(())
    }

    async fn originator_boost_score(&self, originator_id: u64) -> Result<f64> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .originator_scores
            .get(&originator_id)
            .copied()
            .unwrap_or(0.0))
    }

    async fn liked_ids(&self) -> Result<HashSet<u64>> {
        Ok(self.state.lock().unwrap().liked.clone())
    }

    async fn record_feedback(&self, id: u64, action: FeedbackAction) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.feedback.push((id, action));
        if action == FeedbackAction::Like {
            state.liked.insert(id);
        }
        Ok(())
    }

    async fn cache_candidate(&self, record: CachedCandidate) -> Result<()> {
        self.put_cached(record);
        Ok(())
    }

    async fn cached_candidate(&self, id: u64) -> Result<Option<CachedCandidate>> {
        Ok(self.cached(id))
    }
}

// ── Delivery ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct DeliveryState {
    rejected: HashSet<u64>,
    delivered: Vec<u64>,
    chain_replies: Vec<Option<MessageRef>>,
    notices: Vec<String>,
}

#[derive(Default)]
pub struct FakeDelivery {
    state: Mutex<DeliveryState>,
}

impl FakeDelivery {
    pub fn reject(&self, id: u64) {
        self.state.lock().unwrap().rejected.insert(id);
    }

    pub fn delivered(&self) -> Vec<u64> {
        self.state.lock().unwrap().delivered.clone()
    }

    pub fn chain_replies(&self) -> Vec<Option<MessageRef>> {
        self.state.lock().unwrap().chain_replies.clone()
    }

    pub fn notices(&self) -> Vec<String> {
        self.state.lock().unwrap().notices.clone()
    }
}

#[async_trait]
impl Delivery for FakeDelivery {
    async fn deliver(&self, batch: &[ScoredCandidate]) -> Result<DeliveryReceipt> {
        let mut state = self.state.lock().unwrap();
        let mut receipt = DeliveryReceipt::default();
        for item in batch {
            if state.rejected.contains(&item.id()) {
                continue;
            }
            state.delivered.push(item.id());
            receipt
                .delivered
                .insert(item.id(), Some(MessageRef(format!("m{}", item.id()))));
        }
        Ok(receipt)
    }

    async fn deliver_chain(
        &self,
        batch: &[ScoredCandidate],
        _seed: &Candidate,
        reply_to: Option<&MessageRef>,
    ) -> Result<HashMap<u64, MessageRef>> {
        let mut state = self.state.lock().unwrap();
        state.chain_replies.push(reply_to.cloned());
        let mut sent = HashMap::new();
        for item in batch {
            if state.rejected.contains(&item.id()) {
                continue;
            }
            state.delivered.push(item.id());
            sent.insert(item.id(), MessageRef(format!("c{}", item.id())));
        }
        Ok(sent)
    }

    async fn notify(&self, text: &str) -> Result<()> {
        self.state.lock().unwrap().notices.push(text.to_string());
        Ok(())
    }
}
