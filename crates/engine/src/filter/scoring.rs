use std::collections::HashMap;

use crate::query::normalize_tag;

/// Cap on the bonus for matching many profile tags.
const QUANTITY_BONUS_CAP: f64 = 0.3;
/// Per-match bonus for tags in the top fifth of the profile.
const QUALITY_BONUS_STEP: f64 = 0.05;
const QUALITY_BONUS_CAP: f64 = 0.2;

/// Precomputed view of an affinity profile for scoring one batch.
pub struct ProfileIndex<'a> {
    weights: &'a HashMap<String, f64>,
    max_weight: f64,
    top_threshold: f64,
}

impl<'a> ProfileIndex<'a> {
    /// `None` for an empty profile.
    pub fn new(weights: &'a HashMap<String, f64>) -> Option<Self> {
        let mut sorted: Vec<f64> = weights.values().copied().collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(|a, b| b.total_cmp(a));

        let max_weight = sorted[0];
        let top_threshold = if sorted.len() >= 5 {
            sorted[sorted.len() / 5]
        } else {
            max_weight * 0.8
        };

        Some(Self {
            weights,
            max_weight,
            top_threshold,
        })
    }

    pub fn top_threshold(&self) -> f64 {
        self.top_threshold
    }

    fn lookup(&self, tag: &str) -> Option<f64> {
        self.weights
            .get(&normalize_tag(tag))
            .or_else(|| self.weights.get(&tag.to_lowercase()))
            .copied()
    }

    /// Match score in `[0, 1]`: normalized mean weight of the matched tags,
    /// plus a saturating bonus for the number of matches and a bonus for
    /// matches among the strongest profile tags.
    pub fn score(&self, tags: &[String]) -> f64 {
        let mut total = 0.0;
        let mut matched = 0usize;
        let mut high = 0usize;

        for weight in tags.iter().filter_map(|t| self.lookup(t)) {
            total += weight;
            matched += 1;
            if weight >= self.top_threshold {
                high += 1;
            }
        }

        if matched == 0 {
            return 0.0;
        }

        let base = if self.max_weight > 0.0 {
            total / (matched as f64 * self.max_weight)
        } else {
            0.0
        };
        let quantity = ((1.0 + matched as f64).ln() / 6f64.ln()).min(QUANTITY_BONUS_CAP);
        let quality = (high as f64 * QUALITY_BONUS_STEP).min(QUALITY_BONUS_CAP);

        (base + quantity + quality).clamp(0.0, 1.0)
    }
}

/// One-off score against a profile; `0.0` when the profile is empty.
pub fn match_score(tags: &[String], weights: &HashMap<String, f64>) -> f64 {
    ProfileIndex::new(weights).map_or(0.0, |index| index.score(tags))
}
