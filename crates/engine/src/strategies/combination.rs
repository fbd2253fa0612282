//! Profile-driven tag search: pair combinations first, weighted single-tag
//! samples when the pairs under-fill the quota.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use futures::future::join_all;
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::candidate::{Candidate, StrategyOrigin, TagPair, WeightedTag};
use crate::contracts::SearchQuery;
use crate::query::{build_query, expand_search_query, is_redundant_pair};

use super::{DiscoveryContext, DiscoveryStrategy};

/// Most candidates any one originator may contribute to a search batch.
pub const MAX_PER_ORIGINATOR: usize = 3;
const PAIR_DISCOUNT: f64 = 0.3;
const SINGLE_DISCOUNT: f64 = 0.5;

pub struct CombinationSearch;

#[async_trait]
impl DiscoveryStrategy for CombinationSearch {
    fn origin(&self) -> StrategyOrigin {
        StrategyOrigin::XpSearch
    }

    async fn discover(&self, ctx: &DiscoveryContext, quota: usize) -> Vec<Candidate> {
        if ctx.top_tags.is_empty() {
            warn!("no profile tags; skipping tag search");
            return vec![];
        }

        let fetcher = &ctx.fetcher;
        let pairs = match ctx.affinity.top_tag_pairs(fetcher.tag_pair_limit).await {
            Ok(pairs) => pairs,
            Err(err) => {
                warn!(?err, "tag pair lookup failed; using single tags only");
                vec![]
            }
        };

        let selected = select_pairs(&pairs, fetcher.combination_cap, &fetcher.query_aliases);
        let used: HashSet<String> = selected
            .iter()
            .flat_map(|p| [p.tag1.clone(), p.tag2.clone()])
            .collect();

        if !selected.is_empty() {
            info!(pairs = selected.len(), "running combination searches");
        }
        let mut collected: Vec<Candidate> = join_all(selected.iter().map(|p| search_pair(ctx, p)))
            .await
            .into_iter()
            .flatten()
            .collect();

        let remaining = quota.saturating_sub(collected.len());
        if remaining > 0 {
            let tags = pick_fallback_tags(&ctx.top_tags, &used, fetcher.fallback_samples);
            if !tags.is_empty() {
                info!(tags = ?tags, remaining, "running single-tag fallback searches");
                let per_tag = (remaining / 2).max(1);
                let fallback = join_all(tags.iter().map(|t| search_single(ctx, t, per_tag))).await;
                collected.extend(fallback.into_iter().flatten());
            }
        }

        let raw = collected.len();
        let mut capped = cap_per_originator(collected, MAX_PER_ORIGINATOR);
        capped.truncate(quota);
        info!(raw, kept = capped.len(), "tag search finished");
        capped
    }
}

/// Pick up to `cap` pairs in profile order, skipping repeats of the same
/// unordered pair and pairs whose search forms overlap.
pub fn select_pairs(
    pairs: &[TagPair],
    cap: usize,
    aliases: &BTreeMap<String, Vec<String>>,
) -> Vec<TagPair> {
    let mut seen = HashSet::new();
    let mut selected = Vec::new();

    for pair in pairs {
        if selected.len() >= cap {
            break;
        }
        if !seen.insert(pair.key()) {
            continue;
        }
        let q1 = expand_search_query(&pair.tag1, aliases);
        let q2 = expand_search_query(&pair.tag2, aliases);
        if is_redundant_pair(&pair.tag1, &q1, &pair.tag2, &q2) {
            debug!(tag1 = %pair.tag1, tag2 = %pair.tag2, "redundant pair skipped");
            continue;
        }
        selected.push(pair.clone());
    }
    selected
}

fn pick_fallback_tags(tags: &[WeightedTag], used: &HashSet<String>, k: usize) -> Vec<String> {
    sample_fallback_tags(tags, used, k, &mut rand::thread_rng())
}

/// Weighted sampling without replacement over positive-weight tags not
/// already covered by a pair search.
fn sample_fallback_tags<R: Rng + ?Sized>(
    tags: &[WeightedTag],
    used: &HashSet<String>,
    k: usize,
    rng: &mut R,
) -> Vec<String> {
    let pool: Vec<&WeightedTag> = tags
        .iter()
        .filter(|t| t.weight > 0.0 && !used.contains(&t.tag))
        .collect();
    if pool.len() <= k {
        return pool.into_iter().map(|t| t.tag.clone()).collect();
    }

    match pool.choose_multiple_weighted(rng, k, |t| t.weight) {
        Ok(chosen) => chosen.map(|t| t.tag.clone()).collect(),
        Err(err) => {
            warn!(?err, "weighted sampling failed; taking top tags");
            pool.into_iter().take(k).map(|t| t.tag.clone()).collect()
        }
    }
}

/// Keep at most `cap` candidates per originator, preserving order.
pub(crate) fn cap_per_originator(candidates: Vec<Candidate>, cap: usize) -> Vec<Candidate> {
    let mut counts: HashMap<u64, usize> = HashMap::new();
    candidates
        .into_iter()
        .filter(|c| {
            let count = counts.entry(c.originator_id).or_insert(0);
            *count += 1;
            *count <= cap
        })
        .collect()
}

async fn resolve_query(ctx: &DiscoveryContext, tag: &str) -> String {
    let raw = match ctx.affinity.best_search_tag(tag).await {
        Ok(raw) => raw,
        Err(err) => {
            debug!(tag, ?err, "no best search term; using tag");
            tag.to_string()
        }
    };
    build_query(tag, &raw, &ctx.fetcher.query_aliases)
}

async fn search_pair(ctx: &DiscoveryContext, pair: &TagPair) -> Vec<Candidate> {
    let base = ctx.fetcher.search_bookmark_threshold;
    let (t1, t2) = tokio::join!(
        ctx.thresholds.dynamic_threshold(&pair.tag1, base),
        ctx.thresholds.dynamic_threshold(&pair.tag2, base),
    );
    let threshold = (t1.min(t2) as f64 * PAIR_DISCOUNT) as u64;

    let (q1, q2) = tokio::join!(resolve_query(ctx, &pair.tag1), resolve_query(ctx, &pair.tag2));
    let query = SearchQuery {
        tags: vec![q1, q2],
        bookmark_threshold: Some(threshold),
        date_range_days: Some(ctx.fetcher.date_range_days),
        limit: ctx.fetcher.combination_fetch_limit,
    };

    match ctx.api.search(&query).await {
        Ok(items) => items,
        Err(err) => {
            warn!(tag1 = %pair.tag1, tag2 = %pair.tag2, ?err, "combination search failed");
            vec![]
        }
    }
}

async fn search_single(ctx: &DiscoveryContext, tag: &str, limit: usize) -> Vec<Candidate> {
    let base = ctx.fetcher.search_bookmark_threshold;
    let dynamic = ctx.thresholds.dynamic_threshold(tag, base).await;
    let threshold = (dynamic as f64).min(base as f64 * SINGLE_DISCOUNT) as u64;

    let query = SearchQuery {
        tags: vec![resolve_query(ctx, tag).await],
        bookmark_threshold: Some(threshold),
        date_range_days: Some(ctx.fetcher.date_range_days),
        limit,
    };

    match ctx.api.search(&query).await {
        Ok(items) => items,
        Err(err) => {
            warn!(tag, ?err, "single-tag search failed");
            vec![]
        }
    }
}
