//! Turns a merged batch of raw candidates into the final ranked list.
//!
//! Stages run in a fixed order and each sees only the survivors of the one
//! before it:
//!
//! 1. drop items already delivered
//! 2. drop items older than `min_create_days` (when non-zero)
//! 3. drop items carrying a blocked tag
//! 4. drop machine-generated items (when `exclude_ai`)
//! 5. apply the maturity mode
//! 6. collapse duplicate ids, first occurrence wins
//! 7. score against the profile, boost, then apply `min_match_score`
//! 8. sort by the composite of score and relative popularity
//! 9. cap items per originator
//! 10. truncate to `daily_limit`

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use xpush_config::{FilterConfig, MaturityMode};

use crate::candidate::{Candidate, ScoredCandidate};
use crate::contracts::PushStore;
use crate::error::EngineResult;

mod scoring;

pub use scoring::{ProfileIndex, match_score};

/// Tags that are always excluded regardless of configuration.
pub const HARD_BLOCKED_TAGS: [&str; 3] = ["r-18g", "guro", "gore"];

#[derive(Debug, Clone)]
pub struct ContentFilter {
    config: FilterConfig,
    blocked_tags: HashSet<String>,
    boosted: HashSet<u64>,
}

impl ContentFilter {
    pub fn new(config: FilterConfig, boosted: impl IntoIterator<Item = u64>) -> Self {
        let blocked_tags = config
            .blacklist_tags
            .iter()
            .map(|t| t.to_lowercase())
            .chain(HARD_BLOCKED_TAGS.iter().map(|t| t.to_string()))
            .collect();
        Self {
            config,
            blocked_tags,
            boosted: boosted.into_iter().collect(),
        }
    }

    /// Extend the tag blocklist, e.g. with the profile's stop words.
    pub fn with_blocked_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.blocked_tags
            .extend(tags.into_iter().map(|t| t.to_lowercase()));
        self
    }

    /// Stages 2 to 5 only: no history check, no scoring, no dedupe.
    pub fn admits(&self, candidate: &Candidate) -> bool {
        self.admits_at(candidate, Utc::now())
    }

    pub fn admits_at(&self, candidate: &Candidate, now: DateTime<Utc>) -> bool {
        if self.config.min_create_days > 0 {
            let cutoff = now - Duration::days(i64::from(self.config.min_create_days));
            if candidate.create_date < cutoff {
                debug!(id = candidate.id, "rejected: too old");
                return false;
            }
        }

        if self.has_blocked_tag(candidate) {
            debug!(id = candidate.id, "rejected: blocked tag");
            return false;
        }

        if self.config.exclude_ai && candidate.is_ai_generated() {
            debug!(id = candidate.id, "rejected: generated");
            return false;
        }

        match self.config.maturity_mode {
            MaturityMode::MatureOnly if !candidate.is_r18 => false,
            MaturityMode::Safe if candidate.is_r18 => false,
            _ => true,
        }
    }

    pub fn has_blocked_tag(&self, candidate: &Candidate) -> bool {
        candidate
            .tags
            .iter()
            .any(|tag| self.blocked_tags.contains(&tag.to_lowercase()))
    }

    /// Full pipeline.  Only the delivered-history lookup touches persistence;
    /// its failure is returned to the caller.
    pub async fn filter(
        &self,
        candidates: Vec<ScoredCandidate>,
        profile: &HashMap<String, f64>,
        store: &dyn PushStore,
    ) -> EngineResult<Vec<ScoredCandidate>> {
        let incoming = candidates.len();
        let mut fresh = Vec::with_capacity(incoming);
        for candidate in candidates {
            if store.is_delivered(candidate.id()).await? {
                debug!(id = candidate.id(), "rejected: already delivered");
                continue;
            }
            fresh.push(candidate);
        }

        let ranked = self.rank(fresh, profile, Utc::now());
        info!(incoming, survivors = ranked.len(), "filter finished");
        Ok(ranked)
    }

    /// Stages 2 to 10 over a batch already checked against history.
    pub fn rank(
        &self,
        candidates: Vec<ScoredCandidate>,
        profile: &HashMap<String, f64>,
        now: DateTime<Utc>,
    ) -> Vec<ScoredCandidate> {
        let mut seen = HashSet::new();
        let unique: Vec<ScoredCandidate> = candidates
            .into_iter()
            .filter(|c| self.admits_at(&c.candidate, now))
            .filter(|c| seen.insert(c.id()))
            .collect();

        let scored = self.score(unique, profile);
        let sorted = self.sort_composite(scored);

        let mut per_originator: HashMap<u64, usize> = HashMap::new();
        let mut result: Vec<ScoredCandidate> = sorted
            .into_iter()
            .filter(|c| {
                let count = per_originator.entry(c.originator_id()).or_insert(0);
                if *count < self.config.max_per_originator {
                    *count += 1;
                    true
                } else {
                    false
                }
            })
            .collect();
        result.truncate(self.config.daily_limit);

        for top in result.iter().take(3) {
            debug!(id = top.id(), score = top.match_score, "top match");
        }
        result
    }

    fn score(
        &self,
        candidates: Vec<ScoredCandidate>,
        profile: &HashMap<String, f64>,
    ) -> Vec<ScoredCandidate> {
        let boost = self.config.originator_boost;
        let Some(index) = ProfileIndex::new(profile) else {
            return candidates
                .into_iter()
                .map(|c| {
                    let score = if self.boosted.contains(&c.originator_id()) {
                        boost.min(1.0)
                    } else {
                        0.0
                    };
                    c.with_score(score)
                })
                .collect();
        };

        candidates
            .into_iter()
            .filter_map(|c| {
                let mut score = index.score(&c.candidate.tags);
                if self.boosted.contains(&c.originator_id()) {
                    score = (score + boost).min(1.0);
                }
                if score < self.config.min_match_score {
                    debug!(id = c.id(), score, "rejected: below match threshold");
                    return None;
                }
                Some(c.with_score(score))
            })
            .collect()
    }

    fn sort_composite(&self, mut candidates: Vec<ScoredCandidate>) -> Vec<ScoredCandidate> {
        let max_bookmarks = candidates
            .iter()
            .map(|c| c.candidate.bookmark_count)
            .max()
            .filter(|m| *m > 0)
            .unwrap_or(1) as f64;
        let weight = self.config.match_weight;
        let key = |c: &ScoredCandidate| {
            c.match_score * weight
                + (c.candidate.bookmark_count as f64 / max_bookmarks) * (1.0 - weight)
        };
        candidates.sort_by(|a, b| key(b).total_cmp(&key(a)));
        candidates
    }
}
