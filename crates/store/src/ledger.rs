//! `PushLedger`: the persistence contract over a replayed JSONL event log.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

use xpush_config::StoreConfig;
use xpush_engine::{
    CachedCandidate, DeliverySource, FeedbackAction, PushStore, StrategyOrigin, StrategyStat,
};

use crate::event_log::{LedgerEvent, LedgerLog, LedgerRecord};

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRecord {
    pub id: u64,
    pub source: DeliverySource,
    pub delivered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct FeedbackRecord {
    action: FeedbackAction,
    at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionSummary {
    pub events_before: usize,
    pub events_after: usize,
    pub deliveries_dropped: usize,
    pub cache_dropped: usize,
}

/// State folded from the event log.
#[derive(Debug, Default)]
struct LedgerState {
    events: usize,
    deliveries: HashMap<u64, DeliveryRecord>,
    feedback: HashMap<u64, FeedbackRecord>,
    stats: BTreeMap<StrategyOrigin, StrategyStat>,
    originator_scores: HashMap<u64, f64>,
    cache: HashMap<u64, CachedCandidate>,
}

impl LedgerState {
    fn replay(events: &[LedgerEvent]) -> Self {
        let mut state = Self::default();
        for event in events {
            state.apply(event);
        }
        state
    }

    fn apply(&mut self, event: &LedgerEvent) {
        self.events += 1;
        match &event.record {
            LedgerRecord::Delivered { id, source } => {
                self.deliveries.insert(
                    *id,
                    DeliveryRecord {
                        id: *id,
                        source: *source,
                        delivered_at: event.occurred_at,
                    },
                );
            }
            LedgerRecord::Feedback { id, action } => {
                self.feedback.insert(
                    *id,
                    FeedbackRecord {
                        action: *action,
                        at: event.occurred_at,
                    },
                );
            }
            LedgerRecord::StrategyOutcome { strategy, success } => {
                let stat = self.stats.entry(*strategy).or_default();
                if *success {
                    // A success with no recorded delivery still counts as one.
                    stat.success += 1;
                    stat.total = stat.total.max(stat.success);
                } else {
                    stat.total += 1;
                }
            }
            LedgerRecord::StrategySnapshot { strategy, stat } => {
                self.stats.insert(*strategy, *stat);
            }
            LedgerRecord::CandidateCached { candidate } => {
                self.cache.insert(candidate.id, candidate.clone());
            }
            LedgerRecord::OriginatorScoreAdjusted {
                originator_id,
                delta,
            } => {
                *self.originator_scores.entry(*originator_id).or_insert(0.0) += delta;
            }
        }
    }

    /// The minimal event sequence that rebuilds the retained state.
    fn snapshot(&self, now: DateTime<Utc>) -> Vec<LedgerEvent> {
        let mut events = Vec::new();
        for (strategy, stat) in &self.stats {
            events.push(LedgerEvent::at(
                now,
                LedgerRecord::StrategySnapshot {
                    strategy: *strategy,
                    stat: *stat,
                },
            ));
        }

        let mut scores: Vec<_> = self.originator_scores.iter().collect();
        scores.sort_by_key(|(id, _)| **id);
        for (originator_id, score) in scores {
            events.push(LedgerEvent::at(
                now,
                LedgerRecord::OriginatorScoreAdjusted {
                    originator_id: *originator_id,
                    delta: *score,
                },
            ));
        }

        let mut feedback: Vec<_> = self.feedback.iter().collect();
        feedback.sort_by_key(|(id, record)| (record.at, **id));
        for (id, record) in feedback {
            events.push(LedgerEvent::at(
                record.at,
                LedgerRecord::Feedback {
                    id: *id,
                    action: record.action,
                },
            ));
        }

        let mut deliveries: Vec<_> = self.deliveries.values().collect();
        deliveries.sort_by_key(|d| (d.delivered_at, d.id));
        for delivery in deliveries {
            events.push(LedgerEvent::at(
                delivery.delivered_at,
                LedgerRecord::Delivered {
                    id: delivery.id,
                    source: delivery.source,
                },
            ));
        }

        let mut cached: Vec<_> = self.cache.values().collect();
        cached.sort_by_key(|c| (c.cached_at, c.id));
        for candidate in cached {
            events.push(LedgerEvent::at(
                candidate.cached_at,
                LedgerRecord::CandidateCached {
                    candidate: candidate.clone(),
                },
            ));
        }
        events
    }
}

/// Push history, bandit counters, originator scores and the candidate cache,
/// persisted as an append-only event log and replayed on open.
pub struct PushLedger {
    log: LedgerLog,
    config: StoreConfig,
    state: Mutex<LedgerState>,
}

impl PushLedger {
    /// Open the ledger at `config.ledger_path`, replaying whatever it holds.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        Self::open_at(&config.ledger_path, config)
    }

    pub fn open_at(path: impl Into<PathBuf>, config: &StoreConfig) -> Result<Self> {
        let log = LedgerLog::new(path);
        let events = log.load()?;
        let state = LedgerState::replay(&events);
        info!(
            path = %log.path().display(),
            events = state.events,
            deliveries = state.deliveries.len(),
            "push ledger opened"
        );
        Ok(Self {
            log,
            config: config.clone(),
            state: Mutex::new(state),
        })
    }

    /// Append first, then fold; a failed write leaves memory untouched.
    async fn record(&self, record: LedgerRecord) -> Result<()> {
        let event = LedgerEvent::new(record);
        let mut state = self.state.lock().await;
        self.log.append(&event).await?;
        state.apply(&event);
        Ok(())
    }

    /// Counters for every strategy, including ones never delivered.
    pub async fn strategy_table(&self) -> BTreeMap<StrategyOrigin, StrategyStat> {
        let state = self.state.lock().await;
        StrategyOrigin::ALL
            .into_iter()
            .map(|origin| (origin, state.stats.get(&origin).copied().unwrap_or_default()))
            .collect()
    }

    /// Newest first.
    pub async fn recent_deliveries(&self, limit: usize) -> Vec<DeliveryRecord> {
        let state = self.state.lock().await;
        let mut deliveries: Vec<DeliveryRecord> = state.deliveries.values().cloned().collect();
        deliveries.sort_by(|a, b| {
            b.delivered_at
                .cmp(&a.delivered_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        deliveries.truncate(limit);
        deliveries
    }

    /// Shift an originator's boost score and return the new value.
    pub async fn adjust_originator_score(&self, originator_id: u64, delta: f64) -> Result<f64> {
        self.record(LedgerRecord::OriginatorScoreAdjusted {
            originator_id,
            delta,
        })
        .await?;
        let state = self.state.lock().await;
        Ok(state
            .originator_scores
            .get(&originator_id)
            .copied()
            .unwrap_or(0.0))
    }

    /// Drop expired history and cache records and rewrite the log in place.
    pub async fn compact(&self, now: DateTime<Utc>) -> Result<CompactionSummary> {
        let history_cutoff = now - Duration::days(i64::from(self.config.history_retention_days));
        let cache_cutoff = now - Duration::days(i64::from(self.config.cache_retention_days));

        let mut state = self.state.lock().await;
        let mut summary = CompactionSummary {
            events_before: state.events,
            ..CompactionSummary::default()
        };

        let mut retained = LedgerState {
            events: 0,
            deliveries: state.deliveries.clone(),
            feedback: state.feedback.clone(),
            stats: state.stats.clone(),
            originator_scores: state.originator_scores.clone(),
            cache: state.cache.clone(),
        };
        retained
            .deliveries
            .retain(|_, d| d.delivered_at >= history_cutoff);
        retained.cache.retain(|_, c| c.cached_at >= cache_cutoff);
        summary.deliveries_dropped = state.deliveries.len() - retained.deliveries.len();
        summary.cache_dropped = state.cache.len() - retained.cache.len();

        let events = retained.snapshot(now);
        self.log.overwrite(&events).await?;
        *state = LedgerState::replay(&events);
        summary.events_after = state.events;

        info!(
            before = summary.events_before,
            after = summary.events_after,
            deliveries_dropped = summary.deliveries_dropped,
            cache_dropped = summary.cache_dropped,
            "ledger compacted"
        );
        Ok(summary)
    }
}

#[async_trait]
impl PushStore for PushLedger {
    async fn is_delivered(&self, id: u64) -> Result<bool> {
        Ok(self.state.lock().await.deliveries.contains_key(&id))
    }

    async fn mark_delivered(&self, id: u64, source: DeliverySource) -> Result<()> {
        self.record(LedgerRecord::Delivered { id, source }).await
    }

    async fn delivery_source(&self, id: u64) -> Result<Option<DeliverySource>> {
        Ok(self
            .state
            .lock()
            .await
            .deliveries
            .get(&id)
            .map(|d| d.source))
    }

    async fn strategy_stats(&self, strategy: StrategyOrigin) -> Result<StrategyStat> {
        Ok(self
            .state
            .lock()
            .await
            .stats
            .get(&strategy)
            .copied()
            .unwrap_or_default())
    }

    async fn update_strategy_stats(&self, strategy: StrategyOrigin, success: bool) -> Result<()> {
        self.record(LedgerRecord::StrategyOutcome { strategy, success })
            .await
    }

    async fn originator_boost_score(&self, originator_id: u64) -> Result<f64> {
        Ok(self
            .state
            .lock()
            .await
            .originator_scores
            .get(&originator_id)
            .copied()
            .unwrap_or(0.0))
    }

    async fn liked_ids(&self) -> Result<HashSet<u64>> {
        Ok(self
            .state
            .lock()
            .await
            .feedback
            .iter()
            .filter(|(_, record)| record.action == FeedbackAction::Like)
            .map(|(id, _)| *id)
            .collect())
    }

    async fn record_feedback(&self, id: u64, action: FeedbackAction) -> Result<()> {
        self.record(LedgerRecord::Feedback { id, action }).await
    }

    async fn cache_candidate(&self, record: CachedCandidate) -> Result<()> {
        debug!(id = record.id, depth = record.chain.depth, "candidate cached");
        self.record(LedgerRecord::CandidateCached { candidate: record })
            .await
    }

    async fn cached_candidate(&self, id: u64) -> Result<Option<CachedCandidate>> {
        Ok(self.state.lock().await.cache.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xpush_engine::{ChainMetadata, MessageRef};

    fn cached(id: u64, depth: u32) -> CachedCandidate {
        CachedCandidate {
            id,
            tags: vec!["cat".into(), "hat".into()],
            originator_id: 7,
            originator_name: "ann".into(),
            chain: ChainMetadata {
                depth,
                parent_id: (depth > 0).then_some(1),
                message_ref: Some(MessageRef(format!("m{id}"))),
            },
            cached_at: Utc::now(),
        }
    }

    fn open(dir: &tempfile::TempDir) -> PushLedger {
        PushLedger::open_at(dir.path().join("ledger.jsonl"), &StoreConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let ledger = open(&dir);
            ledger
                .mark_delivered(10, StrategyOrigin::Subscription.into())
                .await
                .unwrap();
            ledger.mark_delivered(11, DeliverySource::Chain).await.unwrap();
            ledger.record_feedback(10, FeedbackAction::Like).await.unwrap();
            ledger.cache_candidate(cached(11, 2)).await.unwrap();
            ledger.adjust_originator_score(7, 0.4).await.unwrap();
        }

        let ledger = open(&dir);
        assert!(ledger.is_delivered(10).await.unwrap());
        assert!(!ledger.is_delivered(12).await.unwrap());
        assert_eq!(
            ledger.delivery_source(11).await.unwrap(),
            Some(DeliverySource::Chain)
        );
        assert_eq!(ledger.liked_ids().await.unwrap(), HashSet::from([10]));
        assert_eq!(ledger.cached_candidate(11).await.unwrap().unwrap().chain.depth, 2);
        assert!((ledger.originator_boost_score(7).await.unwrap() - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn stats_keep_success_within_total() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open(&dir);
        let origin = StrategyOrigin::Ranking;
        ledger.update_strategy_stats(origin, true).await.unwrap();
        assert_eq!(
            ledger.strategy_stats(origin).await.unwrap(),
            StrategyStat { success: 1, total: 1 }
        );

        ledger.update_strategy_stats(origin, false).await.unwrap();
        ledger.update_strategy_stats(origin, false).await.unwrap();
        ledger.update_strategy_stats(origin, true).await.unwrap();
        assert_eq!(
            ledger.strategy_stats(origin).await.unwrap(),
            StrategyStat { success: 2, total: 3 }
        );
    }

    #[tokio::test]
    async fn strategy_table_lists_every_origin() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open(&dir);
        ledger
            .update_strategy_stats(StrategyOrigin::Related, false)
            .await
            .unwrap();
        let table = ledger.strategy_table().await;
        assert_eq!(table.len(), 4);
        assert_eq!(table[&StrategyOrigin::Related].total, 1);
        assert_eq!(table[&StrategyOrigin::XpSearch], StrategyStat::default());
    }

    #[tokio::test]
    async fn latest_feedback_wins_for_liked_ids() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open(&dir);
        ledger.record_feedback(3, FeedbackAction::Like).await.unwrap();
        ledger.record_feedback(3, FeedbackAction::Dislike).await.unwrap();
        ledger.record_feedback(4, FeedbackAction::Like).await.unwrap();
        assert_eq!(ledger.liked_ids().await.unwrap(), HashSet::from([4]));
    }

    #[tokio::test]
    async fn recent_deliveries_are_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open(&dir);
        for id in 1..=5 {
            ledger
                .mark_delivered(id, StrategyOrigin::XpSearch.into())
                .await
                .unwrap();
        }
        let recent: Vec<u64> = ledger
            .recent_deliveries(3)
            .await
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(recent, vec![5, 4, 3]);
    }

    #[tokio::test]
    async fn compaction_drops_expired_history_and_keeps_counters() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open(&dir);
        ledger
            .mark_delivered(1, StrategyOrigin::XpSearch.into())
            .await
            .unwrap();
        ledger.cache_candidate(cached(1, 0)).await.unwrap();
        ledger.cache_candidate(cached(1, 0)).await.unwrap();
        for _ in 0..4 {
            ledger
                .update_strategy_stats(StrategyOrigin::XpSearch, false)
                .await
                .unwrap();
        }
        ledger.record_feedback(1, FeedbackAction::Like).await.unwrap();
        ledger.adjust_originator_score(7, 0.2).await.unwrap();
        ledger.adjust_originator_score(7, 0.3).await.unwrap();

        // Past the 30-day history window but inside the 60-day cache window.
        let summary = ledger.compact(Utc::now() + Duration::days(40)).await.unwrap();
        assert_eq!(summary.events_before, 10);
        assert_eq!(summary.deliveries_dropped, 1);
        assert_eq!(summary.cache_dropped, 0);
        // One snapshot, one score, one feedback, one cached candidate.
        assert_eq!(summary.events_after, 4);

        let reopened = open(&dir);
        assert!(!reopened.is_delivered(1).await.unwrap());
        assert!(reopened.cached_candidate(1).await.unwrap().is_some());
        assert_eq!(
            reopened
                .strategy_stats(StrategyOrigin::XpSearch)
                .await
                .unwrap()
                .total,
            4
        );
        assert!((reopened.originator_boost_score(7).await.unwrap() - 0.5).abs() < 1e-9);
        assert_eq!(reopened.liked_ids().await.unwrap(), HashSet::from([1]));
    }

    #[tokio::test]
    async fn compaction_expires_old_cache_records() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open(&dir);
        ledger.cache_candidate(cached(2, 1)).await.unwrap();
        let summary = ledger.compact(Utc::now() + Duration::days(61)).await.unwrap();
        assert_eq!(summary.cache_dropped, 1);
        assert!(ledger.cached_candidate(2).await.unwrap().is_none());
    }
}
